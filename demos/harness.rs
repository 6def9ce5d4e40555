//! Fires a call at a flaky downstream every 100ms and prints statistics at the end.
//!
//! Run with `cargo run --example harness --features async`.

use cascade_guard::{
    BreakerError, CircuitBreaker, DefaultPolicy, TokioClock, TokioTimerDriver, TracingSink,
};
use std::error::Error;
use std::fmt;
use std::time::Duration;

const CALLS: usize = 1000;
const INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug)]
struct DownstreamError(u64);

impl fmt::Display for DownstreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed due to value {}", self.0)
    }
}

impl Error for DownstreamError {}

/// Settles after `value * 100ms` and fails for two values out of ten.
async fn downstream() -> Result<&'static str, DownstreamError> {
    let value = fastrand::u64(0..10);
    tokio::time::sleep(Duration::from_millis(value * 100)).await;
    if value == 2 || value == 9 {
        Err(DownstreamError(value))
    } else {
        Ok("success")
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let breaker = CircuitBreaker::<DefaultPolicy, DownstreamError>::builder()
        .clock(TokioClock)
        .timer_driver(TokioTimerDriver::try_current()?)
        .metric_sink(TracingSink::new("downstream"))
        .build()?;

    let mut ticker = tokio::time::interval(INTERVAL);
    let mut calls = Vec::with_capacity(CALLS);

    for instance in 0..CALLS {
        ticker.tick().await;
        let breaker = breaker.clone();
        calls.push(tokio::spawn(async move {
            match breaker.fire_async(downstream).await {
                Ok(_) => println!("call for instance {instance} completed successfully"),
                Err(BreakerError::Upstream(err)) => {
                    println!("call for instance {instance} failed with error {err}")
                }
                Err(rejected) => println!("call for instance {instance} rejected: {rejected}"),
            }
        }));
    }

    for call in calls {
        call.await?;
    }

    println!("{}", breaker.report_statistics());
    Ok(())
}
