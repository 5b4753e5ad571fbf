use crate::error::{FtmsError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

/// Minimum Indoor Bike Data payload: the flags word
pub const FLAGS_SIZE: usize = 2;

/// Indoor Bike Data flag bits (Bluetooth SIG FTMS, characteristic 0x2AD2)
///
/// Each bit gates one field following the flags word. Bit 0 is inverted: when
/// it is *clear* the instantaneous speed field is present.
pub const FLAG_MORE_DATA: u16 = 1 << 0;
/// Average speed present
pub const FLAG_AVERAGE_SPEED: u16 = 1 << 1;
/// Instantaneous cadence present
pub const FLAG_INSTANT_CADENCE: u16 = 1 << 2;
/// Average cadence present
pub const FLAG_AVERAGE_CADENCE: u16 = 1 << 3;
/// Total distance present
pub const FLAG_TOTAL_DISTANCE: u16 = 1 << 4;
/// Resistance level present
pub const FLAG_RESISTANCE_LEVEL: u16 = 1 << 5;
/// Instantaneous power present
pub const FLAG_INSTANT_POWER: u16 = 1 << 6;
/// Average power present
pub const FLAG_AVERAGE_POWER: u16 = 1 << 7;
/// Expended energy present
pub const FLAG_EXPENDED_ENERGY: u16 = 1 << 8;
/// Heart rate present
pub const FLAG_HEART_RATE: u16 = 1 << 9;
/// Metabolic equivalent present
pub const FLAG_METABOLIC_EQUIVALENT: u16 = 1 << 10;
/// Elapsed time present
pub const FLAG_ELAPSED_TIME: u16 = 1 << 11;
/// Remaining time present
pub const FLAG_REMAINING_TIME: u16 = 1 << 12;

/// Decoded Indoor Bike Data flags word
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct IndoorBikeFlags {
    /// More data follows in another packet; instantaneous speed is absent
    pub more_data: bool,
    /// Average speed field present
    pub average_speed: bool,
    /// Instantaneous cadence field present
    pub instant_cadence: bool,
    /// Average cadence field present
    pub average_cadence: bool,
    /// Total distance field present
    pub total_distance: bool,
    /// Resistance level field present
    pub resistance_level: bool,
    /// Instantaneous power field present
    pub instant_power: bool,
    /// Average power field present
    pub average_power: bool,
    /// Expended energy fields present
    pub expended_energy: bool,
    /// Heart rate field present
    pub heart_rate: bool,
    /// Metabolic equivalent field present (not decoded)
    pub metabolic_equivalent: bool,
    /// Elapsed time field present (not decoded)
    pub elapsed_time: bool,
    /// Remaining time field present (not decoded)
    pub remaining_time: bool,
}

impl IndoorBikeFlags {
    /// Split a raw flags word into named bits
    #[must_use]
    pub const fn from_bits(bits: u16) -> Self {
        Self {
            more_data: bits & FLAG_MORE_DATA != 0,
            average_speed: bits & FLAG_AVERAGE_SPEED != 0,
            instant_cadence: bits & FLAG_INSTANT_CADENCE != 0,
            average_cadence: bits & FLAG_AVERAGE_CADENCE != 0,
            total_distance: bits & FLAG_TOTAL_DISTANCE != 0,
            resistance_level: bits & FLAG_RESISTANCE_LEVEL != 0,
            instant_power: bits & FLAG_INSTANT_POWER != 0,
            average_power: bits & FLAG_AVERAGE_POWER != 0,
            expended_energy: bits & FLAG_EXPENDED_ENERGY != 0,
            heart_rate: bits & FLAG_HEART_RATE != 0,
            metabolic_equivalent: bits & FLAG_METABOLIC_EQUIVALENT != 0,
            elapsed_time: bits & FLAG_ELAPSED_TIME != 0,
            remaining_time: bits & FLAG_REMAINING_TIME != 0,
        }
    }

    /// Instantaneous speed is present when the more-data bit is clear
    #[must_use]
    pub const fn instant_speed(&self) -> bool {
        !self.more_data
    }
}

impl From<u16> for IndoorBikeFlags {
    fn from(bits: u16) -> Self {
        Self::from_bits(bits)
    }
}

/// Set of metric fields touched by one packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FieldSet(u16);

impl FieldSet {
    /// Instantaneous speed
    pub const SPEED: Self = Self(1 << 0);
    /// Instantaneous cadence
    pub const CADENCE: Self = Self(1 << 1);
    /// Total distance
    pub const DISTANCE: Self = Self(1 << 2);
    /// Resistance level
    pub const RESISTANCE: Self = Self(1 << 3);
    /// Instantaneous power
    pub const POWER: Self = Self(1 << 4);
    /// Expended energy
    pub const ENERGY: Self = Self(1 << 5);
    /// Heart rate
    pub const HEART_RATE: Self = Self(1 << 6);

    /// Empty set
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Whether every field of `other` is in this set
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Add the fields of `other`
    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    /// Drop the fields of `other`
    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    /// Whether no field is set
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for FieldSet {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Partial metric update decoded from one Indoor Bike Data notification
///
/// A `None` field was either absent from the flags word or cut off by a short
/// payload; consumers must leave the matching metric untouched.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct IndoorBikeData {
    /// Flags word the packet carried
    pub flags: IndoorBikeFlags,
    /// Instantaneous speed in km/h
    pub speed_kmh: Option<f64>,
    /// Average speed in km/h
    pub average_speed_kmh: Option<f64>,
    /// Instantaneous cadence in rpm
    pub cadence_rpm: Option<f64>,
    /// Average cadence in rpm
    pub average_cadence_rpm: Option<f64>,
    /// Total distance in meters
    pub total_distance_m: Option<u32>,
    /// Resistance level, raw device units
    pub resistance_level: Option<i16>,
    /// Instantaneous power in watts
    pub power_watts: Option<i16>,
    /// Average power in watts
    pub average_power_watts: Option<i16>,
    /// Total expended energy in kcal
    pub energy_kcal: Option<u16>,
    /// Heart rate in bpm
    pub heart_rate_bpm: Option<u8>,
    /// The payload ended before every flagged field was read
    pub truncated: bool,
}

/// Reads flag-gated fields until the payload runs out, then yields nothing
struct FieldReader<'a> {
    buf: &'a [u8],
    truncated: bool,
}

impl<'a> FieldReader<'a> {
    const fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            truncated: false,
        }
    }

    fn take(&mut self, len: usize) -> Option<&'a [u8]> {
        if self.truncated || self.buf.len() < len {
            self.truncated = true;
            return None;
        }
        let (field, rest) = self.buf.split_at(len);
        self.buf = rest;
        Some(field)
    }

    fn u8(&mut self) -> Option<u8> {
        self.take(1).map(|mut b| b.get_u8())
    }

    fn u16(&mut self) -> Option<u16> {
        self.take(2).map(|mut b| b.get_u16_le())
    }

    fn i16(&mut self) -> Option<i16> {
        self.take(2).map(|mut b| b.get_i16_le())
    }

    #[allow(clippy::cast_possible_truncation)]
    fn u24(&mut self) -> Option<u32> {
        self.take(3).map(|mut b| b.get_uint_le(3) as u32)
    }
}

impl IndoorBikeData {
    /// Decode one Indoor Bike Data notification
    ///
    /// Fields are consumed strictly in flag order. A payload shorter than its
    /// flags promise is decoded up to the last complete field and marked
    /// [`truncated`](Self::truncated); that is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`FtmsError::ParseError`] if the payload is shorter than the
    /// 2-byte flags word.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < FLAGS_SIZE {
            return Err(FtmsError::ParseError(format!(
                "Indoor Bike Data too short: {} bytes, expected at least {FLAGS_SIZE}",
                data.len()
            )));
        }

        let mut buf = data;
        let flags = IndoorBikeFlags::from_bits(buf.get_u16_le());
        let mut fields = FieldReader::new(buf);
        let mut out = Self {
            flags,
            ..Self::default()
        };

        if flags.instant_speed() {
            out.speed_kmh = fields.u16().map(|v| f64::from(v) / 100.0);
        }
        if flags.average_speed {
            out.average_speed_kmh = fields.u16().map(|v| f64::from(v) / 100.0);
        }
        if flags.instant_cadence {
            out.cadence_rpm = fields.u16().map(|v| f64::from(v) / 2.0);
        }
        if flags.average_cadence {
            out.average_cadence_rpm = fields.u16().map(|v| f64::from(v) / 2.0);
        }
        if flags.total_distance {
            out.total_distance_m = fields.u24();
        }
        if flags.resistance_level {
            out.resistance_level = fields.i16();
        }
        if flags.instant_power {
            out.power_watts = fields.i16();
        }
        if flags.average_power {
            out.average_power_watts = fields.i16();
        }
        if flags.expended_energy {
            out.energy_kcal = fields.u16();
            // energy per hour (u16) and per minute (u8) are not tracked
            let _ = fields.take(3);
        }
        if flags.heart_rate {
            out.heart_rate_bpm = fields.u8();
        }

        out.truncated = fields.truncated;
        Ok(out)
    }

    /// Metric fields this packet carries a value for
    #[must_use]
    pub fn touched(&self) -> FieldSet {
        let mut set = FieldSet::empty();
        if self.speed_kmh.is_some() {
            set.insert(FieldSet::SPEED);
        }
        if self.cadence_rpm.is_some() {
            set.insert(FieldSet::CADENCE);
        }
        if self.total_distance_m.is_some() {
            set.insert(FieldSet::DISTANCE);
        }
        if self.resistance_level.is_some() {
            set.insert(FieldSet::RESISTANCE);
        }
        if self.power_watts.is_some() {
            set.insert(FieldSet::POWER);
        }
        if self.energy_kcal.is_some() {
            set.insert(FieldSet::ENERGY);
        }
        if self.heart_rate_bpm.is_some() {
            set.insert(FieldSet::HEART_RATE);
        }
        set
    }
}

/// Fitness Machine Control Point op codes
pub const OP_REQUEST_CONTROL: u8 = 0x00;
/// Set target resistance level (u8, 0.1 resolution)
pub const OP_SET_TARGET_RESISTANCE: u8 = 0x04;
/// Start or resume the workout
pub const OP_START_OR_RESUME: u8 = 0x07;
/// Stop or pause the workout
pub const OP_STOP_OR_PAUSE: u8 = 0x08;

/// Stop/pause parameter: stop
pub const STOP_PARAM_STOP: u8 = 0x01;
/// Stop/pause parameter: pause
pub const STOP_PARAM_PAUSE: u8 = 0x02;

/// Write to the Fitness Machine Control Point (0x2AD9)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlPointOp {
    /// Take control of the machine; required before other writes
    RequestControl,
    /// Set the target resistance level (whole levels)
    SetTargetResistance(u8),
    /// Start or resume the workout
    StartOrResume,
    /// Stop the workout
    Stop,
    /// Pause the workout
    Pause,
}

impl ControlPointOp {
    /// Op code byte
    #[must_use]
    pub const fn op_code(self) -> u8 {
        match self {
            Self::RequestControl => OP_REQUEST_CONTROL,
            Self::SetTargetResistance(_) => OP_SET_TARGET_RESISTANCE,
            Self::StartOrResume => OP_START_OR_RESUME,
            Self::Stop | Self::Pause => OP_STOP_OR_PAUSE,
        }
    }

    /// Serialize the write payload
    #[must_use]
    pub fn to_bytes(self) -> Bytes {
        let mut buf = BytesMut::with_capacity(2);
        buf.put_u8(self.op_code());

        match self {
            Self::SetTargetResistance(level) => buf.put_u8(level.saturating_mul(10)),
            Self::Stop => buf.put_u8(STOP_PARAM_STOP),
            Self::Pause => buf.put_u8(STOP_PARAM_PAUSE),
            Self::RequestControl | Self::StartOrResume => {}
        }

        buf.freeze()
    }
}
