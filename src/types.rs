use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Connection lifecycle state of the controlled bike
///
/// The controller walks these states in order while bringing a link up. Any
/// transport failure or explicit disconnect drops straight back to
/// [`ConnectionState::Disconnected`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No link to the device
    #[default]
    Disconnected,
    /// Connect request issued, waiting for the link
    Connecting,
    /// Link up, enumerating GATT services
    ServicesDiscovering,
    /// FTMS service found, enabling Indoor Bike Data notifications
    CharacteristicsSetup,
    /// Notifications enabled; metrics and commands flow
    Ready,
}

impl ConnectionState {
    /// Whether metrics may be updated and commands applied
    #[must_use]
    pub const fn is_ready(self) -> bool {
        matches!(self, Self::Ready)
    }

    /// Whether the transport link is expected to be up in this state
    #[must_use]
    pub const fn expects_link(self) -> bool {
        matches!(
            self,
            Self::ServicesDiscovering | Self::CharacteristicsSetup | Self::Ready
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::ServicesDiscovering => write!(f, "Discovering Services"),
            Self::CharacteristicsSetup => write!(f, "Setting Up Characteristics"),
            Self::Ready => write!(f, "Ready"),
        }
    }
}

/// Workout session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SessionState {
    /// Workout in progress
    Running,
    /// Workout paused; a later start resumes without clearing totals
    Paused,
    /// Workout stopped; a later start begins a fresh session
    #[default]
    Stopped,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "Running"),
            Self::Paused => write!(f, "Paused"),
            Self::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Lifecycle events published by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceEvent {
    /// A GATT service was reported during discovery
    ServiceDiscovered(Uuid),
    /// Notifications are enabled and the bike is ready
    Connected,
    /// The link was lost or closed
    Disconnected,
    /// A start command was applied
    Started,
    /// A pause command was applied
    Paused,
    /// A stop command was applied
    Stopped,
}

/// Kind of fitness machine behind a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceKind {
    /// Indoor bike
    Bike,
    /// Treadmill
    Treadmill,
    /// Elliptical trainer
    Elliptical,
}

/// Metric capabilities exposed by a [`DeviceKind`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct Capabilities {
    /// Reports and accepts resistance levels
    pub resistance: bool,
    /// Reports crank cadence
    pub cadence: bool,
    /// Reports inclination
    pub inclination: bool,
    /// Reports pace
    pub pace: bool,
}

impl DeviceKind {
    /// Capabilities of this machine kind
    #[must_use]
    pub const fn capabilities(self) -> Capabilities {
        match self {
            Self::Bike => Capabilities {
                resistance: true,
                cadence: true,
                inclination: false,
                pace: false,
            },
            Self::Treadmill => Capabilities {
                resistance: false,
                cadence: false,
                inclination: true,
                pace: true,
            },
            Self::Elliptical => Capabilities {
                resistance: true,
                cadence: true,
                inclination: false,
                pace: false,
            },
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bike => write!(f, "Bike"),
            Self::Treadmill => write!(f, "Treadmill"),
            Self::Elliptical => write!(f, "Elliptical"),
        }
    }
}

/// Device information gathered while scanning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Advertised device name
    pub name: String,
    /// Transport address
    pub address: String,
    /// Signal strength (RSSI)
    pub rssi: i16,
}

impl DeviceInfo {
    /// Create new device info
    #[must_use]
    pub const fn new(name: String, address: String, rssi: i16) -> Self {
        Self {
            name,
            address,
            rssi,
        }
    }
}

/// Connection parameters
#[derive(Debug, Clone)]
pub struct ConnectionParams {
    /// Connection timeout in milliseconds
    pub timeout_ms: u64,
    /// Scan timeout in milliseconds
    pub scan_timeout_ms: u64,
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            scan_timeout_ms: 10_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_state_predicates() {
        assert!(ConnectionState::Ready.is_ready());
        assert!(!ConnectionState::CharacteristicsSetup.is_ready());

        assert!(!ConnectionState::Disconnected.expects_link());
        assert!(!ConnectionState::Connecting.expects_link());
        assert!(ConnectionState::ServicesDiscovering.expects_link());
        assert!(ConnectionState::Ready.expects_link());
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_session_defaults_to_stopped() {
        assert_eq!(SessionState::default(), SessionState::Stopped);
        assert_eq!(SessionState::Paused.to_string(), "Paused");
    }

    #[test]
    fn test_device_kind_capabilities() {
        let bike = DeviceKind::Bike.capabilities();
        assert!(bike.resistance);
        assert!(bike.cadence);
        assert!(!bike.inclination);

        let treadmill = DeviceKind::Treadmill.capabilities();
        assert!(!treadmill.resistance);
        assert!(treadmill.pace);
    }

    #[test]
    fn test_connection_params_default() {
        let params = ConnectionParams::default();
        assert_eq!(params.timeout_ms, 30_000);
        assert_eq!(params.scan_timeout_ms, 10_000);
    }
}
