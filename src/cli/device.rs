use std::{error::Error, time::Duration};

use tabled::settings::{Panel, Style};
use tabled::{Table, Tabled};
use tokio::sync::mpsc;

use crate::config::SessionConfig;
use crate::drivers::dualshock4::{
    codec::OutputRequest,
    event::Event,
    transport::list_devices,
};
use crate::input::manager::Manager;

/// Time given to the controller to switch to full reporting before output
/// is sent
const SETTLE_TIME: Duration = Duration::from_millis(250);

#[derive(Tabled)]
struct DeviceRow {
    #[tabled(rename = "Path")]
    path: String,
    #[tabled(rename = "Transport")]
    transport: String,
    #[tabled(rename = "Id")]
    id: String,
    #[tabled(rename = "Product")]
    product: String,
    #[tabled(rename = "Serial")]
    serial: String,
}

pub fn handle_list() -> Result<(), Box<dyn Error>> {
    let mut devices = list_devices()?;
    devices.sort_by(|a, b| a.path.cmp(&b.path));
    let count = devices.len();

    let rows: Vec<DeviceRow> = devices
        .into_iter()
        .map(|device| DeviceRow {
            path: device.path,
            transport: device.transport.to_string(),
            id: format!("{:04x}:{:04x}", device.vendor_id, device.product_id),
            product: device.product.unwrap_or_default(),
            serial: device.serial.unwrap_or_default(),
        })
        .collect();

    let mut table = Table::new(rows);
    table
        .with(Style::modern_rounded())
        .with(Panel::header("DualShock 4 Controllers"));
    println!("{table}");
    println!("Found {count} controller(s)");

    Ok(())
}

pub async fn handle_monitor(path: &str, config: SessionConfig) -> Result<(), Box<dyn Error>> {
    let mut manager = Manager::new(config);
    let (tx, mut rx) = mpsc::channel::<Event>(1024);
    manager.attach_path(path, Some(tx))?;

    while let Some(event) = rx.recv().await {
        println!("{event:?}");
    }

    // The event channel only closes when the driver stops
    let snapshot = manager.detach(path).await?;
    println!("{path} stopped after {} reports", snapshot.reports_received);

    Ok(())
}

pub async fn handle_light(
    path: &str,
    config: SessionConfig,
    red: u8,
    green: u8,
    blue: u8,
) -> Result<(), Box<dyn Error>> {
    let mut manager = Manager::new(config);
    manager.attach_path(path, None)?;
    tokio::time::sleep(SETTLE_TIME).await;

    manager.set_output(path, OutputRequest::lightbar(red, green, blue))?;
    tokio::time::sleep(SETTLE_TIME).await;

    let snapshot = manager.detach(path).await?;
    println!("Set light bar of {} to #{red:02x}{green:02x}{blue:02x}", snapshot.id);

    Ok(())
}

pub async fn handle_rumble(
    path: &str,
    config: SessionConfig,
    strong: u8,
    weak: u8,
    duration_ms: u64,
) -> Result<(), Box<dyn Error>> {
    let mut manager = Manager::new(config);
    manager.attach_path(path, None)?;
    tokio::time::sleep(SETTLE_TIME).await;

    manager.set_output(path, OutputRequest::rumble(strong, weak))?;
    tokio::time::sleep(Duration::from_millis(duration_ms)).await;
    manager.set_output(path, OutputRequest::rumble(0, 0))?;
    tokio::time::sleep(SETTLE_TIME).await;

    manager.detach(path).await?;

    Ok(())
}
