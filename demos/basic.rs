use cascade_guard::{BreakerError, CircuitBreaker, DefaultPolicy};
use std::error::Error;
use std::fmt;
use std::thread;
use std::time::Duration;

// Custom error type that implements Error trait
#[derive(Debug)]
struct ServiceError(String);

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Service error: {}", self.0)
    }
}

impl Error for ServiceError {}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cascade_guard=debug".into()),
        )
        .init();

    let breaker = CircuitBreaker::<DefaultPolicy, ServiceError>::builder()
        .failure_threshold(3) // 3 failures trip the circuit
        .open_period(Duration::from_secs(1)) // 1 second cooldown
        .half_open_period(Duration::from_secs(1))
        .half_open_max_calls(2) // Allow 2 probes when half-open
        .build()?;

    println!("Circuit initial state: {}", breaker.current_state());

    // The service is down for the first 6 calls, then recovers.
    let mut attempts = 0;
    let mut call_service = || -> Result<String, ServiceError> {
        attempts += 1;
        if attempts <= 6 {
            Err(ServiceError("External service error".to_string()))
        } else {
            Ok("Success".to_string())
        }
    };

    for i in 1..=15 {
        print!("Attempt {}: ", i);

        match breaker.fire(&mut call_service) {
            Ok(result) => println!("call succeeded with result: {}", result),
            Err(BreakerError::CircuitOpen) => println!("circuit is open, call was not made"),
            Err(BreakerError::ProbeSaturated) => println!("circuit is probing, try later"),
            Err(BreakerError::Upstream(err)) => println!("call failed with error: {}", err),
        }

        println!("  state: {}", breaker.current_state());
        thread::sleep(Duration::from_millis(300));
    }

    println!("{}", breaker.statistics());
    Ok(())
}
