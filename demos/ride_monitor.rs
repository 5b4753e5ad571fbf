use std::time::Duration;
use tokio::time::{interval, Instant};
use tracing::{error, info, warn};
use ftms_link::{BikeConfig, ConnectionParams, DeviceEvent, FtmsBike, Result};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    info!("🚴 FTMS Ride Monitor Example");

    // Optional TOML config as the first argument
    let config = match std::env::args().nth(1) {
        Some(path) => {
            info!("Loading configuration from {path}");
            BikeConfig::load(path)?
        }
        None => BikeConfig::default(),
    };

    info!("Searching for FTMS bikes...");
    let bike = match FtmsBike::connect_first_with_params(config, ConnectionParams::default()).await {
        Ok(bike) => {
            info!("✅ Found: {}", bike.device_info().name);
            bike
        }
        Err(e) => {
            error!("❌ Failed to connect to bike: {}", e);
            return Err(e);
        }
    };

    let mut events = bike.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                DeviceEvent::Disconnected => warn!("⚠️  Link lost, reconnecting..."),
                other => info!("Event: {other:?}"),
            }
        }
    });

    bike.start()?;

    if let Some(bridge) = bike.bridge() {
        info!("Virtual device bridge available ({})", bridge.kind());
    }

    info!("Press Ctrl+C to stop monitoring");

    let mut monitor_interval = interval(Duration::from_secs(2));
    let start_time = Instant::now();

    loop {
        tokio::select! {
            _ = monitor_interval.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Stopping session...");
                bike.stop()?;
                tokio::time::sleep(Duration::from_millis(500)).await;
                bike.disconnect()?;
                break;
            }
        }

        let metrics = bike.metrics();
        let elapsed = start_time.elapsed();
        let minutes = elapsed.as_secs() / 60;
        let seconds = elapsed.as_secs() % 60;

        println!("\n📊 Ride Update ({minutes:02}:{seconds:02}) [{}]", metrics.connection);
        println!("┌─────────────────────────────────────────┐");
        println!(
            "│ Speed:      {:6.1} km/h (avg {:5.1})    │",
            metrics.speed.value(),
            metrics.speed.average()
        );
        println!("│ Cadence:    {:6.0} rpm                  │", metrics.cadence.value());
        println!(
            "│ Power:      {:6.0} W (max {:5.0})       │",
            metrics.watts,
            metrics.power.max()
        );
        println!("│ Resistance: {:6.0}                      │", metrics.resistance.value());
        println!("│ Heart rate: {:6.0} bpm                  │", metrics.heart_rate.value());
        println!("│ Distance:   {:8.3} km                 │", metrics.distance_km.value());
        println!("│ Energy:     {:8.1} kcal               │", metrics.kcal.value());
        println!("│ Cranks:     {:8}                    │", metrics.crank_revolutions);
        println!("└─────────────────────────────────────────┘");
    }

    info!("👋 Ride monitor finished");
    Ok(())
}
