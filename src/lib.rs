#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

//! # ftms-link 🚴
//!
//! A Rust library for reading and controlling indoor bikes that implement the
//! Bluetooth Fitness Machine Service (FTMS).
//!
//! The library acts as a BLE central: it connects to the bike, enables
//! Indoor Bike Data notifications, decodes them into live metrics and writes
//! resistance and session commands to the Fitness Machine Control Point.
//! Values the bike does not report (distance, calories, crank timing) are
//! integrated on a fixed 200 ms tick. A [`BridgeHandle`] exposes the same
//! live state to a virtual peripheral that re-presents the bike to training
//! software.
//!
//! ## Connection Lifecycle
//!
//! ```text
//! Disconnected -> Connecting -> ServicesDiscovering -> CharacteristicsSetup -> Ready
//!       ^                                                                       |
//!       +---------------------- link loss / error (reconnects) -----------------+
//! ```
//!
//! Metrics only change and commands are only written while the link is
//! `Ready`. Losing the link reports [`DeviceEvent::Disconnected`] and starts a
//! new connection attempt right away.
//!
//! ## Quick Start
//!
//! ```no_run
//! use ftms_link::{DeviceEvent, FtmsBike};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Discover and connect to an FTMS bike
//!     let bike = FtmsBike::connect_first().await?;
//!     let mut events = bike.subscribe();
//!
//!     while let Ok(event) = events.recv().await {
//!         if event == DeviceEvent::Connected {
//!             break;
//!         }
//!     }
//!
//!     // Start a session and set resistance level 8
//!     bike.start()?;
//!     bike.set_resistance(8)?;
//!
//!     let metrics = bike.metrics();
//!     println!("{:.1} km/h at {:.0} rpm", metrics.speed.value(), metrics.cadence.value());
//!
//!     bike.stop()?;
//!     Ok(())
//! }
//! ```

/// Bluetooth Low Energy scanning and transport
pub mod ble;
/// Virtual device bridge handle
pub mod bridge;
/// Pending command slots
pub mod commands;
/// Rider and behavior configuration
pub mod config;
/// Connection lifecycle state machine
pub mod controller;
/// Main bike control interface
pub mod device;
/// Error types and handling
pub mod error;
/// Live metrics and integration
pub mod metrics;
/// FTMS wire format
pub mod protocol;
/// Transport contract
pub mod transport;
/// Type definitions and data structures
pub mod types;

// Re-export the main types for convenient usage
pub use bridge::BridgeHandle;
pub use commands::{clamp_resistance, PendingCommand, MAX_RESISTANCE, MIN_RESISTANCE};
pub use config::{BikeConfig, HeartRateSource};
pub use controller::ConnectionController;
pub use device::FtmsBike;
pub use error::{FtmsError, Result};
pub use metrics::{Metric, MetricsSnapshot, MetricsState};
pub use protocol::{ControlPointOp, IndoorBikeData, IndoorBikeFlags};
pub use transport::{Transport, TransportEvent};
pub use types::{
    Capabilities, ConnectionParams, ConnectionState, DeviceEvent, DeviceInfo, DeviceKind,
    SessionState,
};

use uuid::Uuid;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Fitness Machine Service (`0x1826`)
pub const FTMS_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_1826_0000_1000_8000_0080_5f9b_34fb);

/// Indoor Bike Data characteristic (`0x2AD2`), notify only
pub const INDOOR_BIKE_DATA_UUID: Uuid =
    Uuid::from_u128(0x0000_2ad2_0000_1000_8000_0080_5f9b_34fb);

/// Fitness Machine Control Point characteristic (`0x2AD9`)
///
/// Commands are written here; the bike answers with indications that this
/// library does not need to wait for.
pub const FTMS_CONTROL_POINT_UUID: Uuid =
    Uuid::from_u128(0x0000_2ad9_0000_1000_8000_0080_5f9b_34fb);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuids_use_bluetooth_base() {
        assert_eq!(
            FTMS_SERVICE_UUID.to_string(),
            "00001826-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            INDOOR_BIKE_DATA_UUID.to_string(),
            "00002ad2-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            FTMS_CONTROL_POINT_UUID.to_string(),
            "00002ad9-0000-1000-8000-00805f9b34fb"
        );
    }
}
