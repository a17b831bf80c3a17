//! Basic circuit handler usage example

use circuit_guard::{CircuitError, CircuitHandler, TracingSink};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    println!("=== Circuit Handler Basic Example ===\n");

    // Create a handler with builder API
    let handler = CircuitHandler::builder("payment_api")
        .failure_threshold(2)
        .failure_timeout(Duration::from_millis(200))
        .invocation_timeout(Duration::from_millis(50))
        .sink(Arc::new(TracingSink))
        .on_open(|name| println!("🔴 Circuit '{}' opened!", name))
        .on_close(|name| println!("🟢 Circuit '{}' closed!", name))
        .on_half_open(|name| println!("🟡 Circuit '{}' half-open, testing...", name))
        .build()
        .expect("valid configuration");
    let state = handler.new_circuit_state();

    println!("Initial state: {}\n", state.phase());

    // Simulate successful calls
    println!("--- Successful calls ---");
    for i in 1..=2 {
        match handler
            .handle(&state, move || async move { Ok::<_, String>(format!("Payment {}", i)) })
            .await
        {
            Ok(result) => println!("✓ {}", result),
            Err(e) => println!("✗ Error: {}", e),
        }
    }
    println!("State: {}\n", state.phase());

    // Simulate failures, the last one by running past the invocation timeout
    println!("--- Triggering failures ---");
    for i in 1..=2 {
        let result = handler
            .handle(&state, move || async move {
                Err::<String, _>(format!("Payment failed {}", i))
            })
            .await;
        if let Err(e) = result {
            println!("✗ {}", e);
        }
    }
    let slow = handler
        .handle(&state, || async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok::<_, String>("too late")
        })
        .await;
    if let Err(e) = slow {
        println!("✗ {}", e);
    }
    println!(
        "State: {} after {} failures\n",
        state.phase(),
        state.failure_count()
    );

    // Try calling while open
    println!("--- Attempting call while open ---");
    match handler
        .handle(&state, || async { Ok::<_, String>("Should be rejected") })
        .await
    {
        Ok(_) => println!("✓ Success"),
        Err(CircuitError::Open { phase, .. }) => println!("✗ refused while {}", phase),
        Err(e) => println!("✗ {}", e),
    }
    println!();

    // Wait out the cooldown and let a probe close the circuit
    println!("--- Probing after cooldown ---");
    tokio::time::sleep(Duration::from_millis(250)).await;
    match handler
        .handle(&state, || async { Ok::<_, String>("Payment successful") })
        .await
    {
        Ok(result) => println!("✓ {}", result),
        Err(e) => println!("✗ {}", e),
    }
    println!("State: {}", state.phase());
}
