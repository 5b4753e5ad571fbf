//! Read side and resistance entry point for a virtual peripheral.
//!
//! A virtual device re-advertises the bike to training software. It pulls
//! the live values from a [`BridgeHandle`] and forwards the resistance
//! changes that software asks for, which are queued exactly like requests
//! made through [`FtmsBike`](crate::FtmsBike).

use tokio::sync::{mpsc, watch};

use crate::{
    commands::PendingCommand,
    device::ControlRequest,
    error::{FtmsError, Result},
    metrics::MetricsSnapshot,
    types::{Capabilities, DeviceKind},
};

/// Cloneable view of a running bike for a virtual device
#[derive(Debug, Clone)]
pub struct BridgeHandle {
    metrics: watch::Receiver<MetricsSnapshot>,
    requests: mpsc::UnboundedSender<ControlRequest>,
}

impl BridgeHandle {
    pub(crate) const fn new(
        metrics: watch::Receiver<MetricsSnapshot>,
        requests: mpsc::UnboundedSender<ControlRequest>,
    ) -> Self {
        Self { metrics, requests }
    }

    /// Latest published metrics
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        self.metrics.borrow().clone()
    }

    /// Kind of machine behind the bridge
    #[must_use]
    pub fn kind(&self) -> DeviceKind {
        self.metrics.borrow().kind
    }

    /// What the machine can report and accept
    #[must_use]
    pub fn capabilities(&self) -> Capabilities {
        self.kind().capabilities()
    }

    /// Whether the bike link is ready
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.metrics.borrow().connection.is_ready()
    }

    /// Current speed in km/h
    #[must_use]
    pub fn speed_kmh(&self) -> f64 {
        self.metrics.borrow().speed.value()
    }

    /// Current cadence in rpm
    #[must_use]
    pub fn cadence_rpm(&self) -> f64 {
        self.metrics.borrow().cadence.value()
    }

    /// Effective power in watts; zero while the cranks are still
    #[must_use]
    pub fn power_watts(&self) -> f64 {
        self.metrics.borrow().watts
    }

    /// Current resistance level
    #[must_use]
    pub fn resistance_level(&self) -> f64 {
        self.metrics.borrow().resistance.value()
    }

    /// Current heart rate in bpm
    #[must_use]
    pub fn heart_rate_bpm(&self) -> f64 {
        self.metrics.borrow().heart_rate.value()
    }

    /// Cumulative distance in km
    #[must_use]
    pub fn distance_km(&self) -> f64 {
        self.metrics.borrow().distance_km.value()
    }

    /// Cumulative energy in kcal
    #[must_use]
    pub fn kcal(&self) -> f64 {
        self.metrics.borrow().kcal.value()
    }

    /// Cumulative energy in joules
    #[must_use]
    pub fn joules(&self) -> f64 {
        self.metrics.borrow().joules.value()
    }

    /// Crank revolution count and last event time (1/1024 s)
    #[must_use]
    pub fn crank(&self) -> (u32, u16) {
        let metrics = self.metrics.borrow();
        (metrics.crank_revolutions, metrics.crank_event_time)
    }

    /// Forward a resistance change requested by training software
    ///
    /// # Errors
    ///
    /// Returns [`FtmsError::Shutdown`] if the controller task has stopped.
    pub fn request_resistance(&self, level: i16) -> Result<()> {
        self.requests
            .send(ControlRequest::Command(PendingCommand::SetResistance(level)))
            .map_err(|_| FtmsError::Shutdown)
    }

    /// Wait for the next metrics update
    ///
    /// # Errors
    ///
    /// Returns [`FtmsError::Shutdown`] once the controller task has stopped.
    pub async fn changed(&mut self) -> Result<()> {
        self.metrics.changed().await.map_err(|_| FtmsError::Shutdown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{metrics::Metric, types::ConnectionState};
    use tokio_test::{assert_err, assert_ok};

    fn bridge() -> (
        BridgeHandle,
        watch::Sender<MetricsSnapshot>,
        mpsc::UnboundedReceiver<ControlRequest>,
    ) {
        let (metrics_tx, metrics_rx) = watch::channel(MetricsSnapshot::default());
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        (BridgeHandle::new(metrics_rx, requests_tx), metrics_tx, requests_rx)
    }

    #[test]
    fn test_accessors_follow_published_metrics() {
        let (handle, metrics_tx, _requests) = bridge();
        assert!(!handle.is_ready());
        assert_eq!(handle.kind(), DeviceKind::Bike);
        assert!(handle.capabilities().resistance);

        let mut speed = Metric::default();
        speed.update(27.5);
        let mut distance = Metric::default();
        distance.update(3.2);
        metrics_tx.send_replace(MetricsSnapshot {
            connection: ConnectionState::Ready,
            speed,
            distance_km: distance,
            watts: 180.0,
            crank_revolutions: 42,
            crank_event_time: 683,
            ..MetricsSnapshot::default()
        });

        assert!(handle.is_ready());
        assert!((handle.speed_kmh() - 27.5).abs() < 1e-9);
        assert!((handle.distance_km() - 3.2).abs() < 1e-9);
        assert!((handle.power_watts() - 180.0).abs() < 1e-9);
        assert_eq!(handle.crank(), (42, 683));
    }

    #[test]
    fn test_resistance_requests_are_forwarded() {
        let (handle, _metrics, mut requests) = bridge();

        assert_ok!(handle.request_resistance(30));
        assert_eq!(
            requests.try_recv().unwrap(),
            ControlRequest::Command(PendingCommand::SetResistance(30))
        );

        drop(requests);
        assert_err!(handle.request_resistance(3));
    }

    #[tokio::test]
    async fn test_changed_reports_shutdown() {
        let (mut handle, metrics_tx, _requests) = bridge();

        metrics_tx.send_replace(MetricsSnapshot::default());
        assert_ok!(handle.changed().await);

        drop(metrics_tx);
        assert_err!(handle.changed().await);
    }
}
