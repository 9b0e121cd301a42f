//! Basic example: scan, connect to a device and list its GATT database
//!
//! Run with: cargo run --example list_services -- [name-substring]

use std::sync::Arc;

use ble_central_session::ble::advertising::ad_type;
use ble_central_session::{
    BtleplugStack, Central, DeviceSelector, Error, NameSubstring, Result, SessionConfig,
    StrongestSignal,
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

    let selector: Box<dyn DeviceSelector> = match std::env::args().nth(1) {
        Some(name) => Box::new(NameSubstring::new(name)),
        None => Box::new(StrongestSignal::default()),
    };

    let stack = Arc::new(BtleplugStack::new().await?);
    let central = Central::new(stack, SessionConfig::default())?;

    println!("Scanning for {:?}...", central.config().scan_duration);
    let devices = central.scan().await?;

    for (i, device) in devices.iter().enumerate() {
        println!(
            "#{} {} ({}), RSSI={} dB",
            i, device.address, device.address_type, device.rssi
        );
        for (tag, value) in &device.advertised_fields {
            println!("    {} = {:02x?}", ad_type::describe(*tag), &value[..]);
        }
    }

    let Some(device) = selector.select(&devices) else {
        return Err(Error::DeviceNotFound {
            criteria: selector.describe(),
        });
    };

    println!("\nConnecting to {}...", device.display_name());
    let connection = central.connect(&device).await?;

    let result = central.resolve(&connection).await;
    central.disconnect(&connection).await;

    print!("{}", result?);
    Ok(())
}
