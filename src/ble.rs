use btleplug::{
    api::{
        Central, CentralEvent, Characteristic, Manager as _, Peripheral as _,
        PeripheralProperties, ScanFilter, WriteType,
    },
    platform::{Adapter, Manager, Peripheral},
};
use bytes::Bytes;
use futures::stream::StreamExt;
use std::{
    future::Future,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    sync::{mpsc, Mutex},
    task::JoinHandle,
    time::timeout,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    error::{FtmsError, Result},
    transport::{Transport, TransportEvent},
    types::{ConnectionParams, DeviceInfo},
    FTMS_SERVICE_UUID,
};

type PeripheralSlot = Arc<Mutex<Option<Peripheral>>>;

/// BLE manager for FTMS device discovery
pub struct BleManager {
    adapter: Adapter,
}

impl BleManager {
    /// Create a new BLE manager on the first adapter
    ///
    /// # Errors
    ///
    /// Returns [`FtmsError::Ble`] if the Bluetooth stack cannot be initialized,
    /// or [`FtmsError::DeviceNotFound`] if there is no adapter.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(FtmsError::DeviceNotFound)?;

        Ok(Self { adapter })
    }

    /// Adapter used for scanning and connections
    #[must_use]
    pub const fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    /// Scan for devices advertising the Fitness Machine service
    ///
    /// Devices are returned strongest signal first.
    ///
    /// # Errors
    ///
    /// Returns [`FtmsError::Ble`] if scanning fails.
    pub async fn scan_for_devices(&self, params: &ConnectionParams) -> Result<Vec<DeviceInfo>> {
        info!("Starting scan for FTMS devices...");

        let scan_filter = ScanFilter {
            services: vec![FTMS_SERVICE_UUID],
        };
        self.adapter.start_scan(scan_filter).await?;

        tokio::time::sleep(Duration::from_millis(params.scan_timeout_ms)).await;

        self.adapter.stop_scan().await?;

        let mut devices = Vec::new();
        for peripheral in self.adapter.peripherals().await? {
            if let Ok(Some(properties)) = peripheral.properties().await {
                if is_ftms_device(&properties) {
                    let device_info = device_info_from_properties(&properties);
                    info!("Found FTMS device: {}", device_info.name);
                    devices.push(device_info);
                }
            }
        }

        devices.sort_by(|a, b| b.rssi.cmp(&a.rssi));

        info!("Scan completed. Found {} FTMS device(s)", devices.len());
        Ok(devices)
    }

    /// Create a transport on this manager's adapter
    ///
    /// # Errors
    ///
    /// Returns [`FtmsError::Ble`] if adapter events cannot be watched.
    pub async fn transport(
        &self,
        events: mpsc::UnboundedSender<TransportEvent>,
        params: ConnectionParams,
    ) -> Result<BtleTransport> {
        BtleTransport::new(self.adapter.clone(), events, params).await
    }
}

/// Whether advertised properties describe a fitness machine
fn is_ftms_device(properties: &PeripheralProperties) -> bool {
    properties.services.contains(&FTMS_SERVICE_UUID)
        || properties.service_data.contains_key(&FTMS_SERVICE_UUID)
}

/// Extract device information from BLE properties
fn device_info_from_properties(properties: &PeripheralProperties) -> DeviceInfo {
    let name = properties
        .local_name
        .clone()
        .unwrap_or_else(|| "Unknown FTMS".to_string());

    DeviceInfo::new(
        name,
        properties.address.to_string(),
        properties.rssi.unwrap_or(0),
    )
}

/// [`Transport`] backed by btleplug
///
/// Each request runs on its own tokio task and reports back through the
/// event channel. Dropping the transport aborts every task and closes the
/// link.
pub struct BtleTransport {
    adapter: Adapter,
    peripheral: PeripheralSlot,
    events: mpsc::UnboundedSender<TransportEvent>,
    params: ConnectionParams,
    link_up: Arc<AtomicBool>,
    watcher: JoinHandle<()>,
    tasks: Vec<JoinHandle<()>>,
    forwarder: Option<JoinHandle<()>>,
}

impl BtleTransport {
    /// Create a transport on `adapter`
    ///
    /// # Errors
    ///
    /// Returns [`FtmsError::Ble`] if adapter events cannot be watched.
    pub async fn new(
        adapter: Adapter,
        events: mpsc::UnboundedSender<TransportEvent>,
        params: ConnectionParams,
    ) -> Result<Self> {
        let peripheral: PeripheralSlot = Arc::new(Mutex::new(None));
        let link_up = Arc::new(AtomicBool::new(false));

        let adapter_events = adapter.events().await?;
        let watcher = tokio::spawn(watch_disconnects(
            adapter_events,
            peripheral.clone(),
            link_up.clone(),
            events.clone(),
        ));

        Ok(Self {
            adapter,
            peripheral,
            events,
            params,
            link_up,
            watcher,
            tasks: Vec::new(),
            forwarder: None,
        })
    }

    fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.retain(|handle| !handle.is_finished());
        self.tasks.push(tokio::spawn(task));
    }

    fn stop_tasks(&mut self) {
        for handle in self.tasks.drain(..) {
            handle.abort();
        }
        if let Some(handle) = self.forwarder.take() {
            handle.abort();
        }
    }
}

/// Store `task` in `slot`, aborting the task it replaces
fn replace_task(slot: &mut Option<JoinHandle<()>>, task: JoinHandle<()>) {
    if let Some(previous) = slot.replace(task) {
        previous.abort();
    }
}

impl Transport for BtleTransport {
    fn connect(&mut self, device: &DeviceInfo) {
        let adapter = self.adapter.clone();
        let slot = self.peripheral.clone();
        let link_up = self.link_up.clone();
        let events = self.events.clone();
        let address = device.address.clone();
        let timeout_ms = self.params.timeout_ms;

        // a forwarder from the previous link must not outlive it
        if let Some(handle) = self.forwarder.take() {
            handle.abort();
        }

        self.spawn(async move {
            match connect_peripheral(&adapter, &address, timeout_ms).await {
                Ok(peripheral) => {
                    *slot.lock().await = Some(peripheral);
                    link_up.store(true, Ordering::SeqCst);
                    let _ = events.send(TransportEvent::Connected);
                }
                Err(e) => {
                    let _ = events.send(TransportEvent::Error(e.to_string()));
                }
            }
        });
    }

    fn discover_services(&mut self) {
        let slot = self.peripheral.clone();
        let events = self.events.clone();

        self.spawn(async move {
            let Some(peripheral) = slot.lock().await.clone() else {
                let _ = events.send(TransportEvent::Error("not connected".to_string()));
                return;
            };

            if let Err(e) = peripheral.discover_services().await {
                let _ = events.send(TransportEvent::Error(e.to_string()));
                return;
            }

            let services: Vec<Uuid> = peripheral.services().iter().map(|s| s.uuid).collect();
            for service in &services {
                let _ = events.send(TransportEvent::ServiceDiscovered(*service));
            }
            let _ = events.send(TransportEvent::DiscoveryFinished(services));
        });
    }

    fn discover_characteristics(&mut self, service: Uuid) {
        let slot = self.peripheral.clone();
        let events = self.events.clone();

        self.spawn(async move {
            let Some(peripheral) = slot.lock().await.clone() else {
                let _ = events.send(TransportEvent::Error("not connected".to_string()));
                return;
            };

            let event = peripheral
                .services()
                .into_iter()
                .find(|s| s.uuid == service)
                .map_or_else(
                    || TransportEvent::ServiceError(format!("service {service} not found")),
                    |s| TransportEvent::CharacteristicsDiscovered {
                        service,
                        characteristics: s.characteristics.iter().map(|c| c.uuid).collect(),
                    },
                );
            let _ = events.send(event);
        });
    }

    fn enable_notifications(&mut self, service: Uuid, characteristic: Uuid) {
        let slot = self.peripheral.clone();
        let events = self.events.clone();

        let task = tokio::spawn(async move {
            let Some(peripheral) = slot.lock().await.clone() else {
                let _ = events.send(TransportEvent::Error("not connected".to_string()));
                return;
            };

            let Some(target) = find_characteristic(&peripheral, service, characteristic) else {
                let _ = events.send(TransportEvent::ServiceError(format!(
                    "characteristic {characteristic} not found"
                )));
                return;
            };

            // open the stream before subscribing so the first packet is not lost
            let notifications = match peripheral.notifications().await {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = events.send(TransportEvent::ServiceError(e.to_string()));
                    return;
                }
            };

            if let Err(e) = peripheral.subscribe(&target).await {
                let _ = events.send(TransportEvent::ServiceError(e.to_string()));
                return;
            }
            let _ = events.send(TransportEvent::DescriptorWritten { characteristic });

            handle_notifications(notifications, characteristic, events).await;
        });
        replace_task(&mut self.forwarder, task);
    }

    fn write_characteristic(&mut self, service: Uuid, characteristic: Uuid, value: Bytes) {
        let slot = self.peripheral.clone();
        let events = self.events.clone();

        self.spawn(async move {
            let Some(peripheral) = slot.lock().await.clone() else {
                debug!("Dropping write to {characteristic}: not connected");
                return;
            };
            let Some(target) = find_characteristic(&peripheral, service, characteristic) else {
                warn!("Characteristic {characteristic} not found; write dropped");
                return;
            };

            match peripheral
                .write(&target, &value, WriteType::WithResponse)
                .await
            {
                Ok(()) => {
                    let _ = events.send(TransportEvent::CharacteristicWritten {
                        characteristic,
                        value,
                    });
                }
                Err(e) => warn!("Failed to write {characteristic}: {e}"),
            }
        });
    }

    fn is_link_up(&self) -> bool {
        self.link_up.load(Ordering::SeqCst)
    }

    fn disconnect(&mut self) {
        self.link_up.store(false, Ordering::SeqCst);
        self.stop_tasks();

        let slot = self.peripheral.clone();
        self.spawn(async move {
            let value = slot.lock().await.take();
            if let Some(peripheral) = value {
                if let Err(e) = peripheral.disconnect().await {
                    debug!("Disconnect failed: {e}");
                }
            }
        });
    }
}

impl Drop for BtleTransport {
    fn drop(&mut self) {
        self.watcher.abort();
        self.stop_tasks();

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let slot = self.peripheral.clone();
        runtime.spawn(async move {
            let value = slot.lock().await.take();
            if let Some(peripheral) = value {
                let _ = peripheral.disconnect().await;
            }
        });
    }
}

async fn connect_peripheral(adapter: &Adapter, address: &str, timeout_ms: u64) -> Result<Peripheral> {
    info!("Connecting to device: {address}");

    let peripheral = adapter
        .peripherals()
        .await?
        .into_iter()
        .find(|p| p.address().to_string() == address)
        .ok_or(FtmsError::DeviceNotFound)?;

    timeout(Duration::from_millis(timeout_ms), peripheral.connect())
        .await
        .map_err(|_| FtmsError::Timeout { timeout_ms })?
        .map_err(|e| FtmsError::ConnectionFailed(e.to_string()))?;

    info!("Successfully connected to {address}");
    Ok(peripheral)
}

fn find_characteristic(
    peripheral: &Peripheral,
    service: Uuid,
    characteristic: Uuid,
) -> Option<Characteristic> {
    peripheral
        .characteristics()
        .into_iter()
        .find(|c| c.uuid == characteristic && c.service_uuid == service)
}

/// Forward notifications of `characteristic` until the stream or the receiver closes
async fn handle_notifications<S>(
    mut notifications: S,
    characteristic: Uuid,
    events: mpsc::UnboundedSender<TransportEvent>,
) where
    S: futures::Stream<Item = btleplug::api::ValueNotification> + Unpin,
{
    while let Some(data) = notifications.next().await {
        if data.uuid != characteristic {
            continue;
        }
        let event = TransportEvent::CharacteristicChanged {
            characteristic: data.uuid,
            value: Bytes::from(data.value),
        };
        if events.send(event).is_err() {
            break;
        }
    }
}

/// Report link loss of the connected peripheral
async fn watch_disconnects<S>(
    mut adapter_events: S,
    slot: PeripheralSlot,
    link_up: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<TransportEvent>,
) where
    S: futures::Stream<Item = CentralEvent> + Unpin,
{
    while let Some(event) = adapter_events.next().await {
        let CentralEvent::DeviceDisconnected(id) = event else {
            continue;
        };

        let ours = slot
            .lock()
            .await
            .as_ref()
            .is_some_and(|peripheral| peripheral.id() == id);
        if ours && link_up.swap(false, Ordering::SeqCst) {
            warn!("Device disconnected");
            if events.send(TransportEvent::Disconnected).is_err() {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use btleplug::api::{BDAddr, ValueNotification};

    fn properties(name: Option<&str>, services: Vec<Uuid>) -> PeripheralProperties {
        let mut properties = PeripheralProperties::default();
        properties.address = BDAddr::from([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
        properties.local_name = name.map(str::to_string);
        properties.rssi = Some(-61);
        properties.services = services;
        properties
    }

    #[test]
    fn test_ftms_device_detection() {
        assert!(is_ftms_device(&properties(Some("Bike"), vec![FTMS_SERVICE_UUID])));
        assert!(!is_ftms_device(&properties(Some("Speaker"), vec![])));
    }

    #[test]
    fn test_device_info_from_properties() {
        let props = properties(Some("Domyos Bike"), vec![FTMS_SERVICE_UUID]);
        let info = device_info_from_properties(&props);

        assert_eq!(info.name, "Domyos Bike");
        assert_eq!(info.address, props.address.to_string());
        assert_eq!(info.rssi, -61);

        let unnamed = device_info_from_properties(&properties(None, vec![]));
        assert_eq!(unnamed.name, "Unknown FTMS");
    }

    #[tokio::test]
    async fn test_notifications_forwarded_for_target_only() {
        let target = crate::INDOOR_BIKE_DATA_UUID;
        let other = crate::FTMS_CONTROL_POINT_UUID;
        let stream = futures::stream::iter(vec![
            ValueNotification {
                uuid: other,
                value: vec![0x80, 0x00, 0x01],
            },
            ValueNotification {
                uuid: target,
                value: vec![0x00, 0x00, 0xC4, 0x09],
            },
        ]);
        let (tx, mut rx) = mpsc::unbounded_channel();

        handle_notifications(stream, target, tx).await;

        assert_eq!(
            rx.recv().await,
            Some(TransportEvent::CharacteristicChanged {
                characteristic: target,
                value: Bytes::from_static(&[0x00, 0x00, 0xC4, 0x09]),
            })
        );
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_replaced_forwarder_is_aborted() {
        let (first_tx, first_rx) = tokio::sync::oneshot::channel::<()>();
        let (second_tx, mut second_rx) = tokio::sync::oneshot::channel::<()>();
        let mut slot = None;

        replace_task(
            &mut slot,
            tokio::spawn(async move {
                let _held = first_tx;
                futures::future::pending::<()>().await;
            }),
        );
        replace_task(
            &mut slot,
            tokio::spawn(async move {
                let _held = second_tx;
                futures::future::pending::<()>().await;
            }),
        );

        // aborting drops the task's future and with it the sender
        assert!(first_rx.await.is_err());
        assert!(second_rx.try_recv().is_err());
        assert!(slot.as_ref().is_some_and(|handle| !handle.is_finished()));

        if let Some(handle) = slot.take() {
            handle.abort();
        }
        assert!(second_rx.await.is_err());
    }
}
