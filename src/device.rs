use crate::{
    ble::BleManager,
    bridge::BridgeHandle,
    commands::PendingCommand,
    config::BikeConfig,
    controller::ConnectionController,
    error::{FtmsError, Result},
    metrics::MetricsSnapshot,
    transport::{Transport, TransportEvent},
    types::{ConnectionParams, ConnectionState, DeviceEvent, DeviceInfo},
};
use std::time::Duration;
use tokio::{
    sync::{broadcast, mpsc, watch},
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tracing::info;

/// Period of the integration and command dispatch tick
pub const TICK_INTERVAL: Duration = Duration::from_millis(200);

/// Request sent from API handles to the controller task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ControlRequest {
    Command(PendingCommand),
    ExternalHeartRate(u8),
    Disconnect,
}

/// Main interface for an FTMS indoor bike
///
/// `FtmsBike` owns a background task that runs the connection lifecycle,
/// decodes Indoor Bike Data notifications, integrates the metrics the bike
/// does not report and writes queued commands to the control point. The
/// task reconnects on its own whenever the link drops.
///
/// Commands are queued and applied on the next tick once the bike is ready,
/// so the command methods never wait on the device.
///
/// # Examples
///
/// ## Basic Usage
///
/// ```no_run
/// use ftms_link::FtmsBike;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let bike = FtmsBike::connect_first().await?;
///
///     bike.start()?;
///     bike.set_resistance(8)?;
///
///     let metrics = bike.metrics();
///     println!("Speed: {:.1} km/h", metrics.speed.value());
///
///     bike.stop()?;
///     Ok(())
/// }
/// ```
///
/// ## Custom Configuration
///
/// ```no_run
/// use ftms_link::{BikeConfig, ConnectionParams, FtmsBike, HeartRateSource};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = BikeConfig {
///         body_weight_kg: 82.0,
///         heart_rate_source: HeartRateSource::External,
///         ..Default::default()
///     };
///     let params = ConnectionParams {
///         scan_timeout_ms: 15000,
///         ..Default::default()
///     };
///
///     let bike = FtmsBike::connect_first_with_params(config, params).await?;
///     bike.set_external_heart_rate(128)?;
///     Ok(())
/// }
/// ```
pub struct FtmsBike {
    device_info: DeviceInfo,
    config: BikeConfig,
    requests: mpsc::UnboundedSender<ControlRequest>,
    events: broadcast::Sender<DeviceEvent>,
    metrics: watch::Receiver<MetricsSnapshot>,
    task: JoinHandle<()>,
}

impl FtmsBike {
    /// Connect to the first FTMS bike found with default settings
    ///
    /// # Errors
    ///
    /// Returns [`FtmsError::DeviceNotFound`] if no FTMS device is found
    /// during the scan, or [`FtmsError::Ble`] if the Bluetooth stack fails.
    pub async fn connect_first() -> Result<Self> {
        Self::connect_first_with_params(BikeConfig::default(), ConnectionParams::default()).await
    }

    /// Connect to the first FTMS bike found with custom settings
    ///
    /// When several devices answer the scan the strongest signal wins.
    ///
    /// # Errors
    ///
    /// Returns [`FtmsError::DeviceNotFound`] if no FTMS device is found
    /// during the scan, or [`FtmsError::Ble`] if the Bluetooth stack fails.
    pub async fn connect_first_with_params(
        config: BikeConfig,
        params: ConnectionParams,
    ) -> Result<Self> {
        let ble_manager = BleManager::new().await?;
        let device_info = ble_manager
            .scan_for_devices(&params)
            .await?
            .into_iter()
            .next()
            .ok_or(FtmsError::DeviceNotFound)?;

        Self::connect_to_device(&ble_manager, device_info, config, params).await
    }

    /// Drive a specific device
    ///
    /// Returns as soon as the controller task is running; the link comes up
    /// in the background and is reported through [`subscribe`](Self::subscribe).
    ///
    /// # Errors
    ///
    /// Returns [`FtmsError::InvalidParameters`] if `config` is out of range,
    /// or [`FtmsError::Ble`] if the transport cannot be created.
    pub async fn connect_to_device(
        ble_manager: &BleManager,
        device_info: DeviceInfo,
        config: BikeConfig,
        params: ConnectionParams,
    ) -> Result<Self> {
        config.validate()?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let transport = ble_manager.transport(events_tx, params).await?;

        Ok(Self::spawn(transport, events_rx, device_info, config))
    }

    /// Run the controller over any transport
    ///
    /// `transport_events` must receive every event `transport` reports.
    /// Must be called from within a tokio runtime.
    pub fn spawn<T>(
        transport: T,
        transport_events: mpsc::UnboundedReceiver<TransportEvent>,
        device_info: DeviceInfo,
        config: BikeConfig,
    ) -> Self
    where
        T: Transport + 'static,
    {
        let controller = ConnectionController::new(transport, config.clone());
        let events = controller.event_sender();
        let (metrics_tx, metrics) = watch::channel(controller.snapshot());
        let (requests, requests_rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(run(
            controller,
            transport_events,
            requests_rx,
            metrics_tx,
            device_info.clone(),
        ));

        Self {
            device_info,
            config,
            requests,
            events,
            metrics,
            task,
        }
    }

    /// Get device information
    #[must_use]
    pub const fn device_info(&self) -> &DeviceInfo {
        &self.device_info
    }

    /// Get the active configuration
    #[must_use]
    pub const fn config(&self) -> &BikeConfig {
        &self.config
    }

    /// Latest published metrics
    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.borrow().clone()
    }

    /// Watch metric updates
    #[must_use]
    pub fn metrics_watch(&self) -> watch::Receiver<MetricsSnapshot> {
        self.metrics.clone()
    }

    /// Current connection state
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.metrics.borrow().connection
    }

    /// Subscribe to lifecycle events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.events.subscribe()
    }

    /// Whether the controller task is still running
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Handle for a virtual device bridge
    ///
    /// Returns `None` when `virtual_device_enabled` is off.
    #[must_use]
    pub fn bridge(&self) -> Option<BridgeHandle> {
        self.config
            .virtual_device_enabled
            .then(|| BridgeHandle::new(self.metrics.clone(), self.requests.clone()))
    }

    /// Request a resistance level
    ///
    /// The level is clamped to the bike's range when it is applied.
    ///
    /// # Errors
    ///
    /// Returns [`FtmsError::Shutdown`] if the controller task has stopped.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use ftms_link::FtmsBike;
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let bike = FtmsBike::connect_first().await?;
    /// bike.set_resistance(25)?; // applied as 15
    /// # Ok(())
    /// # }
    /// ```
    pub fn set_resistance(&self, level: i16) -> Result<()> {
        self.send(ControlRequest::Command(PendingCommand::SetResistance(level)))
    }

    /// Start a session, or resume a paused one
    ///
    /// Starting from a stopped session zeroes distance and energy.
    ///
    /// # Errors
    ///
    /// Returns [`FtmsError::Shutdown`] if the controller task has stopped.
    pub fn start(&self) -> Result<()> {
        self.send(ControlRequest::Command(PendingCommand::Start))
    }

    /// Pause the session
    ///
    /// # Errors
    ///
    /// Returns [`FtmsError::Shutdown`] if the controller task has stopped.
    pub fn pause(&self) -> Result<()> {
        self.send(ControlRequest::Command(PendingCommand::Pause))
    }

    /// Stop the session
    ///
    /// # Errors
    ///
    /// Returns [`FtmsError::Shutdown`] if the controller task has stopped.
    pub fn stop(&self) -> Result<()> {
        self.send(ControlRequest::Command(PendingCommand::Stop))
    }

    /// Feed a heart rate from an external sensor
    ///
    /// Only used when the configured heart rate source is external.
    ///
    /// # Errors
    ///
    /// Returns [`FtmsError::Shutdown`] if the controller task has stopped.
    pub fn set_external_heart_rate(&self, bpm: u8) -> Result<()> {
        self.send(ControlRequest::ExternalHeartRate(bpm))
    }

    /// Disconnect and stop the controller task
    ///
    /// # Errors
    ///
    /// Returns [`FtmsError::Shutdown`] if the controller task has already stopped.
    pub fn disconnect(&self) -> Result<()> {
        self.send(ControlRequest::Disconnect)
    }

    fn send(&self, request: ControlRequest) -> Result<()> {
        self.requests.send(request).map_err(|_| FtmsError::Shutdown)
    }
}

impl Drop for FtmsBike {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run<T: Transport>(
    mut controller: ConnectionController<T>,
    mut transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    mut requests: mpsc::UnboundedReceiver<ControlRequest>,
    metrics: watch::Sender<MetricsSnapshot>,
    device_info: DeviceInfo,
) {
    controller.handle_event(
        TransportEvent::DeviceDiscovered(device_info),
        Instant::now().into_std(),
    );
    metrics.send_replace(controller.snapshot());

    let mut ticker = tokio::time::interval(TICK_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            now = ticker.tick() => controller.tick(now.into_std()),
            Some(event) = transport_events.recv() => {
                controller.handle_event(event, Instant::now().into_std());
            }
            request = requests.recv() => match request {
                Some(ControlRequest::Command(command)) => controller.request(command),
                Some(ControlRequest::ExternalHeartRate(bpm)) => controller.set_external_heart_rate(bpm),
                Some(ControlRequest::Disconnect) | None => {
                    controller.disconnect();
                    metrics.send_replace(controller.snapshot());
                    break;
                }
            },
        }

        metrics.send_replace(controller.snapshot());
    }

    info!("Disconnected from bike");
}
