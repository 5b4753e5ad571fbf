use std::time::Instant;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    commands::{CommandQueue, PendingCommand, SessionCommand},
    config::{BikeConfig, HeartRateSource},
    metrics::{MetricsSnapshot, MetricsState},
    protocol::{ControlPointOp, IndoorBikeData},
    transport::{Transport, TransportEvent},
    types::{ConnectionState, DeviceEvent, DeviceInfo, DeviceKind, SessionState},
    FTMS_CONTROL_POINT_UUID, FTMS_SERVICE_UUID, INDOOR_BIKE_DATA_UUID,
};

/// Capacity of the lifecycle event channel
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Transport-level identity and cached characteristic references
#[derive(Debug, Clone, Default)]
pub struct DeviceHandle {
    /// Device being driven
    pub device: Option<DeviceInfo>,
    /// Indoor Bike Data characteristic, once validated
    pub bike_data: Option<Uuid>,
    /// Fitness Machine Control Point, if the bike offers one
    pub control_point: Option<Uuid>,
    /// When the last Indoor Bike Data notification arrived
    pub last_notification: Option<Instant>,
    /// When the last tick ran in `Ready`; empty until the first one after (re)connecting
    pub last_tick: Option<Instant>,
}

/// Drives one FTMS bike through its connection lifecycle
///
/// The controller is purely event-driven: [`handle_event`](Self::handle_event)
/// consumes transport callbacks and [`tick`](Self::tick) runs the periodic
/// integration and command dispatch. Both take `&mut self`, so the caller's
/// event loop serializes them and the metrics need no locking.
pub struct ConnectionController<T: Transport> {
    transport: T,
    config: BikeConfig,
    kind: DeviceKind,
    state: ConnectionState,
    session: SessionState,
    handle: DeviceHandle,
    metrics: MetricsState,
    commands: CommandQueue,
    events: broadcast::Sender<DeviceEvent>,
    reconnect_attempts: u32,
}

impl<T: Transport> ConnectionController<T> {
    /// Create a controller around a transport
    pub fn new(transport: T, config: BikeConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            transport,
            config,
            kind: DeviceKind::Bike,
            state: ConnectionState::Disconnected,
            session: SessionState::Stopped,
            handle: DeviceHandle::default(),
            metrics: MetricsState::new(),
            commands: CommandQueue::new(),
            events,
            reconnect_attempts: 0,
        }
    }

    /// Subscribe to lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.events.subscribe()
    }

    /// Sender side of the lifecycle event channel
    #[must_use]
    pub fn event_sender(&self) -> broadcast::Sender<DeviceEvent> {
        self.events.clone()
    }

    /// Current connection state
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Current session state
    #[must_use]
    pub const fn session(&self) -> SessionState {
        self.session
    }

    /// Kind of machine being driven
    #[must_use]
    pub const fn kind(&self) -> DeviceKind {
        self.kind
    }

    /// Live metrics
    #[must_use]
    pub const fn metrics(&self) -> &MetricsState {
        &self.metrics
    }

    /// Transport handle and cached references
    #[must_use]
    pub const fn handle(&self) -> &DeviceHandle {
        &self.handle
    }

    /// Commands waiting for the next ready tick
    #[must_use]
    pub const fn pending(&self) -> &CommandQueue {
        &self.commands
    }

    /// Underlying transport
    #[must_use]
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Active configuration
    #[must_use]
    pub const fn config(&self) -> &BikeConfig {
        &self.config
    }

    /// Copy of the current metrics for observers
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot(self.kind, self.state, self.session)
    }

    /// Record a command; it is applied on the first tick in `Ready`
    pub fn request(&mut self, command: PendingCommand) {
        debug!("Queued {command:?}");
        self.commands.push(command);
    }

    /// Feed a heart rate from an external sensor
    ///
    /// Ignored unless the configured source is external and the bike is ready.
    pub fn set_external_heart_rate(&mut self, bpm: u8) {
        if self.config.heart_rate_source != HeartRateSource::External {
            debug!("Ignoring external heart rate {bpm}: source is {}", self.config.heart_rate_source);
            return;
        }
        if self.state.is_ready() {
            self.metrics.set_heart_rate(bpm);
        }
    }

    /// Process one transport callback
    pub fn handle_event(&mut self, event: TransportEvent, now: Instant) {
        match event {
            TransportEvent::DeviceDiscovered(device) => self.on_device_discovered(device),
            TransportEvent::Connected => self.on_connected(),
            TransportEvent::Disconnected => self.fail("transport disconnected"),
            TransportEvent::ServiceDiscovered(service) => {
                debug!("Service discovered: {service}");
                self.emit(DeviceEvent::ServiceDiscovered(service));
            }
            TransportEvent::DiscoveryFinished(services) => self.on_discovery_finished(&services),
            TransportEvent::CharacteristicsDiscovered {
                service,
                characteristics,
            } => self.on_characteristics_discovered(service, &characteristics),
            TransportEvent::DescriptorWritten { characteristic } => {
                self.on_descriptor_written(characteristic);
            }
            TransportEvent::CharacteristicChanged {
                characteristic,
                value,
            } => self.on_notification(characteristic, &value, now),
            TransportEvent::CharacteristicWritten {
                characteristic,
                value,
            } => debug!("Characteristic {characteristic} written: {:02X?}", &value[..]),
            TransportEvent::Error(reason) => {
                warn!("Controller error: {reason}");
                self.fail("controller error");
            }
            TransportEvent::ServiceError(reason) => {
                warn!("Service error: {reason}");
                self.fail("service error");
            }
        }
    }

    /// Periodic tick: detect link loss, integrate metrics, apply commands
    pub fn tick(&mut self, now: Instant) {
        if self.state.expects_link() && !self.transport.is_link_up() {
            self.fail("link down on tick");
            return;
        }

        if !self.state.is_ready() {
            return;
        }

        if let Some(last) = self.handle.last_tick {
            let dt = now.saturating_duration_since(last);
            self.metrics.integrate(dt, self.config.body_weight_kg);
        }
        self.handle.last_tick = Some(now);

        self.apply_commands();
    }

    /// Close the link without reconnecting
    pub fn disconnect(&mut self) {
        info!("Disconnecting");
        let was_connected = self.state != ConnectionState::Disconnected;

        self.state = ConnectionState::Disconnected;
        self.clear_link_cache();
        self.transport.disconnect();

        if was_connected {
            self.emit(DeviceEvent::Disconnected);
        }
    }

    fn on_device_discovered(&mut self, device: DeviceInfo) {
        if self.state != ConnectionState::Disconnected {
            debug!("Ignoring {} while {}", device.name, self.state);
            return;
        }

        info!("Found FTMS device: {} ({})", device.name, device.address);
        self.reconnect_attempts = 0;
        self.connect(&device);
        self.handle.device = Some(device);
    }

    fn on_connected(&mut self) {
        if self.state != ConnectionState::Connecting {
            debug!("Ignoring connected callback while {}", self.state);
            return;
        }

        info!("Controller connected. Searching services...");
        self.state = ConnectionState::ServicesDiscovering;
        self.transport.discover_services();
    }

    fn on_discovery_finished(&mut self, services: &[Uuid]) {
        if self.state != ConnectionState::ServicesDiscovering {
            return;
        }

        if services.contains(&FTMS_SERVICE_UUID) {
            debug!("Service scan done; enumerating FTMS service");
            self.transport.discover_characteristics(FTMS_SERVICE_UUID);
        } else {
            warn!("Device does not offer the FTMS service");
            self.fail("FTMS service missing");
        }
    }

    fn on_characteristics_discovered(&mut self, service: Uuid, characteristics: &[Uuid]) {
        if self.state != ConnectionState::ServicesDiscovering || service != FTMS_SERVICE_UUID {
            return;
        }

        if !characteristics.contains(&INDOOR_BIKE_DATA_UUID) {
            warn!("FTMS service has no Indoor Bike Data characteristic");
            self.fail("Indoor Bike Data missing");
            return;
        }

        self.handle.bike_data = Some(INDOOR_BIKE_DATA_UUID);
        self.handle.control_point = characteristics
            .contains(&FTMS_CONTROL_POINT_UUID)
            .then_some(FTMS_CONTROL_POINT_UUID);

        self.state = ConnectionState::CharacteristicsSetup;
        self.transport
            .enable_notifications(FTMS_SERVICE_UUID, INDOOR_BIKE_DATA_UUID);
    }

    fn on_descriptor_written(&mut self, characteristic: Uuid) {
        if self.state != ConnectionState::CharacteristicsSetup
            || self.handle.bike_data != Some(characteristic)
        {
            return;
        }

        self.state = ConnectionState::Ready;
        self.reconnect_attempts = 0;
        self.handle.last_tick = None;
        self.metrics.begin_connection();

        info!("Indoor Bike Data notifications enabled; bike ready");
        self.emit(DeviceEvent::Connected);

        if self.handle.control_point.is_some() {
            self.write_control(ControlPointOp::RequestControl);
        }
    }

    fn on_notification(&mut self, characteristic: Uuid, value: &[u8], now: Instant) {
        if !self.state.is_ready() {
            debug!("Discarding notification while {}", self.state);
            return;
        }
        if self.handle.bike_data != Some(characteristic) {
            return;
        }

        self.handle.last_notification = Some(now);
        debug!(" << {:02X?}", value);

        match IndoorBikeData::decode(value) {
            Ok(data) => {
                if data.truncated {
                    debug!("Indoor Bike Data truncated after {} bytes", value.len());
                }
                let touched = self.metrics.apply(&data, self.config.heart_rate_source);
                debug!(
                    "Speed {:.2} km/h, cadence {:.1} rpm, power {} W, touched {:?}",
                    self.metrics.speed().value(),
                    self.metrics.cadence().value(),
                    self.metrics.power().value(),
                    touched
                );
            }
            Err(e) => debug!("Discarding notification: {e}"),
        }
    }

    fn apply_commands(&mut self) {
        let drained = self.commands.drain();

        if let Some(level) = drained.resistance {
            self.write_resistance(level);
        }
        for command in drained.session {
            self.apply_session(command);
        }
    }

    fn write_resistance(&mut self, level: u8) {
        if !self.config.write_resistance {
            debug!("Resistance writes disabled; dropping level {level}");
            return;
        }
        if (f64::from(level) - self.metrics.resistance().value()).abs() < f64::EPSILON {
            debug!("Resistance already at {level}");
            return;
        }

        debug!("Writing resistance {level}");
        self.write_control(ControlPointOp::SetTargetResistance(level));
    }

    fn apply_session(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Start => {
                match self.session {
                    SessionState::Stopped => {
                        info!("Starting new session");
                        self.metrics.reset();
                    }
                    SessionState::Paused => info!("Resuming session"),
                    SessionState::Running => debug!("Start while already running"),
                }
                self.session = SessionState::Running;
                self.write_control(ControlPointOp::StartOrResume);
                self.emit(DeviceEvent::Started);
            }
            SessionCommand::Pause => {
                if self.session != SessionState::Running {
                    debug!("Ignoring pause while {}", self.session);
                    return;
                }
                info!("Pausing session");
                self.session = SessionState::Paused;
                self.write_control(ControlPointOp::Pause);
                self.emit(DeviceEvent::Paused);
            }
            SessionCommand::Stop => {
                info!("Stopping session");
                self.session = SessionState::Stopped;
                self.write_control(ControlPointOp::Stop);
                self.emit(DeviceEvent::Stopped);
            }
        }
    }

    fn write_control(&mut self, op: ControlPointOp) {
        match self.handle.control_point {
            Some(control_point) => {
                let data = op.to_bytes();
                debug!(" >> {:02X?} // {op:?}", &data[..]);
                self.transport
                    .write_characteristic(FTMS_SERVICE_UUID, control_point, data);
            }
            None => debug!("No control point; {op:?} not written"),
        }
    }

    fn connect(&mut self, device: &DeviceInfo) {
        self.state = ConnectionState::Connecting;
        self.transport.connect(device);
    }

    fn fail(&mut self, reason: &str) {
        if self.state == ConnectionState::Disconnected {
            debug!("Ignoring {reason} while disconnected");
            return;
        }

        warn!("Connection lost ({reason}) while {}", self.state);
        self.state = ConnectionState::Disconnected;
        self.clear_link_cache();
        self.emit(DeviceEvent::Disconnected);
        self.reconnect();
    }

    fn reconnect(&mut self) {
        let Some(device) = self.handle.device.clone() else {
            return;
        };

        if let Some(max) = self.config.max_reconnect_attempts {
            if self.reconnect_attempts >= max {
                error!("Giving up on {} after {max} reconnect attempts", device.name);
                return;
            }
        }

        self.reconnect_attempts += 1;
        info!("Trying to connect back to {} again...", device.name);
        self.connect(&device);
    }

    fn clear_link_cache(&mut self) {
        self.handle.bike_data = None;
        self.handle.control_point = None;
        self.handle.last_tick = None;
    }

    fn emit(&self, event: DeviceEvent) {
        // no subscribers is not an error
        let _ = self.events.send(event);
    }
}
