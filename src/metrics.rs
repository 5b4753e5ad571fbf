use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{
    config::HeartRateSource,
    protocol::{FieldSet, IndoorBikeData},
    types::{ConnectionState, DeviceKind, SessionState},
};

/// Crank event time ticks per second (cycling cadence profile convention)
pub const CRANK_EVENT_TICKS_PER_SECOND: f64 = 1024.0;

/// Running statistics for one quantity
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Metric {
    current: f64,
    sum: f64,
    count: u64,
    max: f64,
}

impl Metric {
    /// Record a new current value
    pub fn update(&mut self, value: f64) {
        self.current = value;
        self.sum += value;
        self.count += 1;
        if self.count == 1 || value > self.max {
            self.max = value;
        }
    }

    /// Add `delta` to the current value and record the result
    pub fn accumulate(&mut self, delta: f64) {
        self.update(self.current + delta);
    }

    /// Current value
    #[must_use]
    pub const fn value(&self) -> f64 {
        self.current
    }

    /// Mean of every recorded value, or 0 before the first one
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn average(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }

    /// Largest recorded value
    #[must_use]
    pub const fn max(&self) -> f64 {
        self.max
    }

    /// Number of recorded values
    #[must_use]
    pub const fn count(&self) -> u64 {
        self.count
    }
}

/// Crank event time advance for one revolution at `cadence_rpm`, in 1/1024 s
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn crank_event_increment(cadence_rpm: f64) -> u16 {
    let ticks = (CRANK_EVENT_TICKS_PER_SECOND / (cadence_rpm / 60.0)).round();
    // wraps like the 16-bit counter it feeds
    (ticks as u64 % 65_536) as u16
}

/// Live performance metrics of one bike
///
/// Decoded packets set the instantaneous values; [`integrate`](Self::integrate)
/// fills in what the bike does not report. The controller is the only writer.
#[derive(Debug, Clone, Default)]
pub struct MetricsState {
    speed: Metric,
    cadence: Metric,
    resistance: Metric,
    power: Metric,
    heart_rate: Metric,
    distance_km: Metric,
    kcal: Metric,
    joules: Metric,
    crank_revolutions: u32,
    crank_event_time: u16,
    elapsed: Duration,
    reported: FieldSet,
}

impl MetricsState {
    /// Create an all-zero metrics set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a decoded packet, returning the fields it changed
    ///
    /// Fields the packet does not carry keep their previous values. Average
    /// speed, cadence and power never replace the current values.
    pub fn apply(&mut self, data: &IndoorBikeData, heart_rate_source: HeartRateSource) -> FieldSet {
        let mut touched = data.touched();

        if let Some(speed) = data.speed_kmh {
            self.speed.update(speed);
        }
        if let Some(cadence) = data.cadence_rpm {
            self.cadence.update(cadence);
        }
        if let Some(meters) = data.total_distance_m {
            self.distance_km.update(f64::from(meters) / 1000.0);
            self.reported.insert(FieldSet::DISTANCE);
        }
        if let Some(level) = data.resistance_level {
            self.resistance.update(f64::from(level));
        }
        if let Some(watts) = data.power_watts {
            self.power.update(f64::from(watts));
        }
        if let Some(kcal) = data.energy_kcal {
            self.kcal.update(f64::from(kcal));
            self.reported.insert(FieldSet::ENERGY);
        }
        match (data.heart_rate_bpm, heart_rate_source) {
            (Some(bpm), HeartRateSource::Device) => self.heart_rate.update(f64::from(bpm)),
            (Some(_), HeartRateSource::External) => {
                touched.remove(FieldSet::HEART_RATE);
            }
            (None, _) => {}
        }

        touched
    }

    /// Record a heart rate from a source other than the bike
    pub fn set_heart_rate(&mut self, bpm: u8) {
        self.heart_rate.update(f64::from(bpm));
    }

    /// Advance the derived metrics by one tick of length `dt`
    ///
    /// Distance and calories are only integrated when the bike has not
    /// reported its own cumulative values on this connection.
    pub fn integrate(&mut self, dt: Duration, body_weight_kg: f64) {
        let dt_ms = dt.as_secs_f64() * 1000.0;
        let watts = self.watts();
        let speed = self.speed.value();

        if !self.reported.contains(FieldSet::DISTANCE) {
            self.distance_km.accumulate(speed / 3_600_000.0 * dt_ms);
        }

        if !self.reported.contains(FieldSet::ENERGY) && dt_ms > 0.0 {
            // MET-style burn rate per minute, scaled to the elapsed fraction of a minute
            let per_minute = (0.048 * watts + 1.19) * body_weight_kg * 3.5 / 200.0;
            self.kcal.accumulate(per_minute / (60_000.0 / dt_ms));
        }

        if speed > 0.0 {
            self.joules.accumulate(watts * dt.as_secs_f64());
            self.elapsed += dt;
        }

        let cadence = self.cadence.value();
        if cadence > 0.0 {
            self.crank_revolutions = self.crank_revolutions.saturating_add(1);
            self.crank_event_time = self
                .crank_event_time
                .wrapping_add(crank_event_increment(cadence));
        }
    }

    /// Zero every metric for a fresh session
    ///
    /// Which cumulative fields the bike reports is a property of the
    /// connection, not the session, so it survives the reset.
    pub fn reset(&mut self) {
        let reported = self.reported;
        *self = Self {
            reported,
            ..Self::default()
        };
    }

    /// Forget which cumulative fields the bike reports; called per connection
    pub fn begin_connection(&mut self) {
        self.reported = FieldSet::empty();
    }

    /// Power that counts toward energy: zero while the cranks are still
    #[must_use]
    pub fn watts(&self) -> f64 {
        if self.cadence.value() <= 0.0 {
            0.0
        } else {
            self.power.value()
        }
    }

    /// Speed in km/h
    #[must_use]
    pub const fn speed(&self) -> &Metric {
        &self.speed
    }

    /// Cadence in rpm
    #[must_use]
    pub const fn cadence(&self) -> &Metric {
        &self.cadence
    }

    /// Resistance level
    #[must_use]
    pub const fn resistance(&self) -> &Metric {
        &self.resistance
    }

    /// Reported instantaneous power in watts
    #[must_use]
    pub const fn power(&self) -> &Metric {
        &self.power
    }

    /// Heart rate in bpm
    #[must_use]
    pub const fn heart_rate(&self) -> &Metric {
        &self.heart_rate
    }

    /// Cumulative distance in km
    #[must_use]
    pub const fn distance_km(&self) -> &Metric {
        &self.distance_km
    }

    /// Cumulative energy in kcal
    #[must_use]
    pub const fn kcal(&self) -> &Metric {
        &self.kcal
    }

    /// Cumulative energy in joules
    #[must_use]
    pub const fn joules(&self) -> &Metric {
        &self.joules
    }

    /// Crank revolution count
    #[must_use]
    pub const fn crank_revolutions(&self) -> u32 {
        self.crank_revolutions
    }

    /// Last crank event time in 1/1024 s, wrapping at 65536
    #[must_use]
    pub const fn crank_event_time(&self) -> u16 {
        self.crank_event_time
    }

    /// Time spent moving
    #[must_use]
    pub const fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Copy of the current values for observers
    #[must_use]
    pub fn snapshot(
        &self,
        kind: DeviceKind,
        connection: ConnectionState,
        session: SessionState,
    ) -> MetricsSnapshot {
        MetricsSnapshot {
            kind,
            connection,
            session,
            speed: self.speed,
            cadence: self.cadence,
            resistance: self.resistance,
            power: self.power,
            watts: self.watts(),
            heart_rate: self.heart_rate,
            distance_km: self.distance_km,
            kcal: self.kcal,
            joules: self.joules,
            crank_revolutions: self.crank_revolutions,
            crank_event_time: self.crank_event_time,
            elapsed: self.elapsed,
        }
    }
}

/// Read-only copy of [`MetricsState`] published to observers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Machine kind
    pub kind: DeviceKind,
    /// Connection state when the snapshot was taken
    pub connection: ConnectionState,
    /// Session state when the snapshot was taken
    pub session: SessionState,
    /// Speed in km/h
    pub speed: Metric,
    /// Cadence in rpm
    pub cadence: Metric,
    /// Resistance level
    pub resistance: Metric,
    /// Reported power in watts
    pub power: Metric,
    /// Effective power in watts (zero while not pedalling)
    pub watts: f64,
    /// Heart rate in bpm
    pub heart_rate: Metric,
    /// Distance in km
    pub distance_km: Metric,
    /// Energy in kcal
    pub kcal: Metric,
    /// Energy in joules
    pub joules: Metric,
    /// Crank revolution count
    pub crank_revolutions: u32,
    /// Last crank event time in 1/1024 s
    pub crank_event_time: u16,
    /// Time spent moving
    pub elapsed: Duration,
}

impl Default for MetricsSnapshot {
    fn default() -> Self {
        MetricsState::default().snapshot(
            DeviceKind::Bike,
            ConnectionState::Disconnected,
            SessionState::Stopped,
        )
    }
}
