//! Relay gesture codes from a motion sensor to a game loop
//!
//! The sensor notifies a single gesture byte. The latest gesture is kept in
//! a watch channel that a consumer polls at its own frame rate.
//!
//! Run with: cargo run --example gesture_relay

use std::sync::Arc;
use std::time::Duration;

use ble_central_session::ble::ACC_GYRO_MAG_CHAR_UUID;
use ble_central_session::{
    shutdown_channel, AddressType, BtleplugStack, Central, DecodedSample, Gesture,
    LatestValueSink, NameSubstring, Result, SampleSchema, SessionConfig,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ble_central_session=info".parse().unwrap()),
        )
        .init();

    let config = SessionConfig::new(ACC_GYRO_MAG_CHAR_UUID)
        .with_target_name("BlueNRG")
        .with_sample_schema(SampleSchema::Gesture)
        .with_address_type(AddressType::Random)
        .with_connect_timeout(Duration::from_secs(15));

    let stack = Arc::new(BtleplugStack::new().await?);
    let central = Central::new(stack, config)?;

    let (mut sink, mut latest) = LatestValueSink::new();
    let (shutdown, signal) = shutdown_channel();
    shutdown.trigger_on_ctrl_c();

    // Stand-in for the game loop: react to each new gesture.
    let consumer = tokio::spawn(async move {
        while latest.changed().await.is_ok() {
            let gesture = latest
                .borrow_and_update()
                .as_ref()
                .and_then(|event| match event.sample() {
                    Some(DecodedSample::Gesture(gesture)) => Some(*gesture),
                    _ => None,
                });
            match gesture {
                Some(Gesture::Idle) | None => {}
                Some(Gesture::Up) => println!("move up"),
                Some(Gesture::Down) => println!("move down"),
                Some(Gesture::PrimaryAction) => println!("fire"),
                Some(Gesture::SecondaryAction) => println!("trade score for a life"),
                Some(Gesture::Other(code)) => println!("unknown gesture {}", code),
            }
        }
    });

    let result = central
        .run_session(&NameSubstring::new("BlueNRG"), &mut sink, signal)
        .await;

    drop(sink);
    let _ = consumer.await;

    let report = result?;
    println!("Relayed {} gestures", report.stats.decoded);
    Ok(())
}
