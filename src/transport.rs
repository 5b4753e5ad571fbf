//! Transport contract between the connection controller and a BLE stack.
//!
//! The controller issues requests through [`Transport`] and never waits on
//! them; outcomes come back later as [`TransportEvent`]s on the controller's
//! event loop.

use bytes::Bytes;
use uuid::Uuid;

use crate::types::DeviceInfo;

/// Callbacks delivered by a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Scanning found a candidate device
    DeviceDiscovered(DeviceInfo),
    /// The link to the device is up
    Connected,
    /// The link went down
    Disconnected,
    /// A service was found during discovery
    ServiceDiscovered(Uuid),
    /// Service discovery completed
    DiscoveryFinished(Vec<Uuid>),
    /// A service's characteristics were enumerated
    CharacteristicsDiscovered {
        /// Service that was enumerated
        service: Uuid,
        /// Characteristics it contains
        characteristics: Vec<Uuid>,
    },
    /// A client characteristic configuration write was acknowledged
    DescriptorWritten {
        /// Characteristic whose notifications were enabled
        characteristic: Uuid,
    },
    /// A notification arrived
    CharacteristicChanged {
        /// Source characteristic
        characteristic: Uuid,
        /// Raw payload
        value: Bytes,
    },
    /// A characteristic write was acknowledged
    CharacteristicWritten {
        /// Written characteristic
        characteristic: Uuid,
        /// Written payload
        value: Bytes,
    },
    /// The controller-level stack reported an error
    Error(String),
    /// A service object reported an error
    ServiceError(String),
}

/// Requests a BLE central stack must support
///
/// Every method only starts the operation; the result is reported through a
/// [`TransportEvent`].
pub trait Transport: Send {
    /// Connect to `device`; answers with `Connected` or `Error`
    fn connect(&mut self, device: &DeviceInfo);

    /// Discover services; answers with `ServiceDiscovered`* then `DiscoveryFinished`
    fn discover_services(&mut self);

    /// Enumerate a service; answers with `CharacteristicsDiscovered` or `ServiceError`
    fn discover_characteristics(&mut self, service: Uuid);

    /// Write the CCCD of `characteristic`; answers with `DescriptorWritten`
    fn enable_notifications(&mut self, service: Uuid, characteristic: Uuid);

    /// Write a characteristic without awaiting the result
    fn write_characteristic(&mut self, service: Uuid, characteristic: Uuid, value: Bytes);

    /// Whether the link is currently up
    fn is_link_up(&self) -> bool;

    /// Close the link
    fn disconnect(&mut self);
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use crate::{FTMS_CONTROL_POINT_UUID, FTMS_SERVICE_UUID, INDOOR_BIKE_DATA_UUID};
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    };
    use tokio::sync::mpsc;

    /// Request recorded by [`MockTransport`]
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Call {
        Connect(String),
        DiscoverServices,
        DiscoverCharacteristics(Uuid),
        EnableNotifications(Uuid),
        Write(Uuid, Vec<u8>),
        Disconnect,
    }

    /// Records requests; optionally answers them like a well-behaved FTMS bike
    #[derive(Clone)]
    pub struct MockTransport {
        pub calls: Arc<Mutex<Vec<Call>>>,
        pub link_up: Arc<AtomicBool>,
        responder: Option<mpsc::UnboundedSender<TransportEvent>>,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self {
                calls: Arc::new(Mutex::new(Vec::new())),
                link_up: Arc::new(AtomicBool::new(false)),
                responder: None,
            }
        }

        pub fn auto_responding(events: mpsc::UnboundedSender<TransportEvent>) -> Self {
            Self {
                responder: Some(events),
                ..Self::new()
            }
        }

        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        pub fn count(&self, call: &Call) -> usize {
            self.calls().iter().filter(|c| *c == call).count()
        }

        pub fn writes(&self) -> Vec<Vec<u8>> {
            self.calls()
                .into_iter()
                .filter_map(|c| match c {
                    Call::Write(_, value) => Some(value),
                    _ => None,
                })
                .collect()
        }

        pub fn set_link_up(&self, up: bool) {
            self.link_up.store(up, Ordering::SeqCst);
        }

        fn record(&self, call: Call) {
            self.calls.lock().unwrap().push(call);
        }

        fn respond(&self, event: TransportEvent) {
            if let Some(tx) = &self.responder {
                let _ = tx.send(event);
            }
        }
    }

    impl Transport for MockTransport {
        fn connect(&mut self, device: &DeviceInfo) {
            self.record(Call::Connect(device.address.clone()));
            if self.responder.is_some() {
                self.set_link_up(true);
                self.respond(TransportEvent::Connected);
            }
        }

        fn discover_services(&mut self) {
            self.record(Call::DiscoverServices);
            self.respond(TransportEvent::ServiceDiscovered(FTMS_SERVICE_UUID));
            self.respond(TransportEvent::DiscoveryFinished(vec![FTMS_SERVICE_UUID]));
        }

        fn discover_characteristics(&mut self, service: Uuid) {
            self.record(Call::DiscoverCharacteristics(service));
            self.respond(TransportEvent::CharacteristicsDiscovered {
                service,
                characteristics: vec![INDOOR_BIKE_DATA_UUID, FTMS_CONTROL_POINT_UUID],
            });
        }

        fn enable_notifications(&mut self, _service: Uuid, characteristic: Uuid) {
            self.record(Call::EnableNotifications(characteristic));
            self.respond(TransportEvent::DescriptorWritten { characteristic });
        }

        fn write_characteristic(&mut self, _service: Uuid, characteristic: Uuid, value: Bytes) {
            self.record(Call::Write(characteristic, value.to_vec()));
        }

        fn is_link_up(&self) -> bool {
            self.link_up.load(Ordering::SeqCst)
        }

        fn disconnect(&mut self) {
            self.record(Call::Disconnect);
            self.set_link_up(false);
        }
    }
}
