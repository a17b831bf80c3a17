//! Failure classification for exclusion filtering
//!
//! Every failed call is given a [`FailureClass`]. Handlers carry a set of
//! excluded classes; failures in that set are passed through to the caller
//! without counting against the circuit (e.g. a "not found" answer is a
//! legitimate business outcome, not a sign the dependency is unhealthy).

use std::any::Any;
use std::borrow::Cow;
use std::error::Error;
use std::fmt;
use std::time::Duration;

/// Identifier for a category of failure
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FailureClass(Cow<'static, str>);

impl FailureClass {
    /// Class assigned to calls that exceeded the invocation timeout
    pub const INVOCATION_TIMEOUT: FailureClass = FailureClass::from_static("invocation_timeout");

    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    /// Class derived from a Rust type, as produced by [`TypeNameClassifier`]
    pub fn of<T: ?Sized>() -> Self {
        Self::from_static(std::any::type_name::<T>())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for FailureClass {
    fn from(name: &'static str) -> Self {
        Self::from_static(name)
    }
}

impl From<String> for FailureClass {
    fn from(name: String) -> Self {
        Self(Cow::Owned(name))
    }
}

/// Context provided to failure classifiers for error evaluation
#[derive(Debug)]
pub struct FailureContext<'a> {
    /// Circuit name
    pub circuit_name: &'a str,
    /// The error that occurred (can be downcast to specific types)
    pub error: &'a dyn Any,
    /// `std::any::type_name` of the error
    pub error_type: &'static str,
    /// How long the failed call ran
    pub duration: Duration,
}

impl FailureContext<'_> {
    /// The error as `T`, looking through `Box<dyn Error>` wrappers
    pub fn downcast_ref<T: Error + 'static>(&self) -> Option<&T> {
        if let Some(error) = self.error.downcast_ref::<T>() {
            return Some(error);
        }
        if let Some(boxed) = self.error.downcast_ref::<Box<dyn Error + Send + Sync>>() {
            return (**boxed).downcast_ref::<T>();
        }
        self.error
            .downcast_ref::<Box<dyn Error>>()
            .and_then(|boxed| (**boxed).downcast_ref::<T>())
    }
}

/// Classifies errors of one concrete type as `FailureClass::of::<T>()`,
/// whether returned directly or boxed
#[derive(Debug, Clone)]
pub(crate) struct TypeMatcher {
    class: FailureClass,
    matches: fn(&FailureContext<'_>) -> bool,
}

fn is_type<T: Error + 'static>(ctx: &FailureContext<'_>) -> bool {
    ctx.downcast_ref::<T>().is_some()
}

impl TypeMatcher {
    pub(crate) fn of<T: Error + 'static>() -> Self {
        Self {
            class: FailureClass::of::<T>(),
            matches: is_type::<T>,
        }
    }

    pub(crate) fn class(&self) -> &FailureClass {
        &self.class
    }

    pub(crate) fn classify(&self, ctx: &FailureContext<'_>) -> Option<FailureClass> {
        (self.matches)(ctx).then(|| self.class.clone())
    }
}

/// Assigns a [`FailureClass`] to an operation error
///
/// # Examples
///
/// ```rust
/// use circuit_guard::{FailureClass, FailureClassifier, FailureContext};
///
/// #[derive(Debug)]
/// struct StatusClassifier;
///
/// impl FailureClassifier for StatusClassifier {
///     fn classify(&self, ctx: &FailureContext<'_>) -> FailureClass {
///         match ctx.error.downcast_ref::<u16>() {
///             Some(404) => FailureClass::from_static("not_found"),
///             _ => FailureClass::of::<u16>(),
///         }
///     }
/// }
/// ```
pub trait FailureClassifier: Send + Sync + std::fmt::Debug {
    fn classify(&self, ctx: &FailureContext<'_>) -> FailureClass;
}

/// Default classifier: the class is the error's static type name
///
/// Excluding `FailureClass::of::<NotFound>()` then skips every `NotFound`
/// returned as such. Boxed errors all share the box's type name; use
/// [`HandlerBuilder::exclude_type`](crate::HandlerBuilder::exclude_type) to
/// match them by their concrete type.
#[derive(Debug, Clone, Copy, Default)]
pub struct TypeNameClassifier;

impl FailureClassifier for TypeNameClassifier {
    fn classify(&self, ctx: &FailureContext<'_>) -> FailureClass {
        FailureClass::from_static(ctx.error_type)
    }
}

/// Predicate-based classifier using a closure
///
/// Returning `None` falls back to the error's type name.
pub struct PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_>) -> Option<FailureClass> + Send + Sync,
{
    predicate: F,
}

impl<F> PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_>) -> Option<FailureClass> + Send + Sync,
{
    pub fn new(predicate: F) -> Self {
        Self { predicate }
    }
}

impl<F> FailureClassifier for PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_>) -> Option<FailureClass> + Send + Sync,
{
    fn classify(&self, ctx: &FailureContext<'_>) -> FailureClass {
        (self.predicate)(ctx).unwrap_or_else(|| TypeNameClassifier.classify(ctx))
    }
}

impl<F> std::fmt::Debug for PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_>) -> Option<FailureClass> + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PredicateClassifier")
            .field("predicate", &"<closure>")
            .finish()
    }
}
