//! Stream accelerometer samples and ramp the on-device sample rate
//!
//! Subscribes to the accelerometer characteristic, prints every sample and
//! switches the sample rate to 1 s, 10 s and 20 s after 50, 100 and 200
//! poll iterations.
//!
//! Run with: cargo run --example accelerometer_stream -- [name-substring]

use std::sync::Arc;
use std::time::Duration;

use ble_central_session::{
    shutdown_channel, AddressType, BtleplugStack, Central, LogSink, RateSchedule, Result,
    SampleSchema, SessionConfig,
};

/// Value handle of the accelerometer characteristic.
const ACC_HANDLE: u16 = 0x000E;
/// Value handle of the sample-rate characteristic.
const SAMPLE_RATE_HANDLE: u16 = 0x0011;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ble_central_session=info".parse().unwrap()),
        )
        .init();

    let name = std::env::args().nth(1).unwrap_or_else(|| "Bluepio".to_string());

    let config = SessionConfig::new(ACC_HANDLE)
        .with_target_name(name)
        .with_config_char(SAMPLE_RATE_HANDLE)
        .with_sample_schema(SampleSchema::Accelerometer)
        .with_rate_schedule(RateSchedule::sample_rate_ramp())
        .with_address_type(AddressType::Random)
        .with_scan_duration(Duration::from_secs(5));

    let selector = config.selector();
    let stack = Arc::new(BtleplugStack::new().await?);
    let central = Central::new(stack, config)?;

    let _handle = central.connections().on_disconnect(|event| {
        println!("Disconnected from {}", event.address);
    });

    let (shutdown, signal) = shutdown_channel();
    shutdown.trigger_on_ctrl_c();

    println!("Waiting for notifications... (Ctrl-C to stop)");
    let report = central
        .run_session(selector.as_ref(), &mut LogSink, signal)
        .await?;

    println!(
        "\n{:?} after {} iterations: {} samples, {} undecoded, {} rate changes",
        report.exit,
        report.stats.iterations,
        report.stats.decoded,
        report.stats.undecoded,
        report.stats.writes
    );

    Ok(())
}
