//! Sensor sample decoding.
//!
//! Each notifying characteristic carries a fixed-size little-endian record.
//! A payload is decoded only when its length matches the schema exactly;
//! anything else is handed on untouched.

use bytes::Buf;

/// Three signed 16-bit axis readings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Axes {
    /// X axis.
    pub x: i16,
    /// Y axis.
    pub y: i16,
    /// Z axis.
    pub z: i16,
}

impl Axes {
    fn read(buf: &mut &[u8]) -> Self {
        Self {
            x: buf.get_i16_le(),
            y: buf.get_i16_le(),
            z: buf.get_i16_le(),
        }
    }
}

impl std::fmt::Display for Axes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "x: {}, y: {}, z: {}", self.x, self.y, self.z)
    }
}

/// A gesture code reported by the motion firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Gesture {
    /// No movement.
    Idle,
    /// Downward movement.
    Down,
    /// Upward movement.
    Up,
    /// Primary button action.
    PrimaryAction,
    /// Secondary button action.
    SecondaryAction,
    /// Unrecognised code.
    Other(u8),
}

impl From<u8> for Gesture {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Down,
            2 => Self::Up,
            3 => Self::PrimaryAction,
            4 => Self::SecondaryAction,
            other => Self::Other(other),
        }
    }
}

impl From<Gesture> for u8 {
    fn from(gesture: Gesture) -> Self {
        match gesture {
            Gesture::Idle => 0,
            Gesture::Down => 1,
            Gesture::Up => 2,
            Gesture::PrimaryAction => 3,
            Gesture::SecondaryAction => 4,
            Gesture::Other(other) => other,
        }
    }
}

/// Environmental record: timestamp, pressure and temperature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Environmental {
    /// Firmware tick counter.
    pub tick: u16,
    /// Pressure in hundredths of a hectopascal.
    pub pressure_raw: i32,
    /// Temperature in tenths of a degree Celsius.
    pub temperature_raw: i16,
}

impl Environmental {
    /// Pressure in hPa.
    pub fn pressure_hpa(&self) -> f64 {
        f64::from(self.pressure_raw) / 100.0
    }

    /// Temperature in degrees Celsius.
    pub fn temperature_celsius(&self) -> f64 {
        f64::from(self.temperature_raw) / 10.0
    }
}

/// Motion record: timestamp and three 3-axis sensors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Motion {
    /// Firmware tick counter.
    pub tick: u16,
    /// Accelerometer reading.
    pub accelerometer: Axes,
    /// Gyroscope reading.
    pub gyroscope: Axes,
    /// Magnetometer reading.
    pub magnetometer: Axes,
}

/// A payload decoded according to its [`SampleSchema`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DecodedSample {
    /// Three LE i16 accelerometer axes.
    Accelerometer(Axes),
    /// A single gesture byte.
    Gesture(Gesture),
    /// An environmental record.
    Environmental(Environmental),
    /// A motion record.
    Motion(Motion),
}

impl std::fmt::Display for DecodedSample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Accelerometer(axes) => write!(f, "{}", axes),
            Self::Gesture(gesture) => write!(f, "gesture {:?}", gesture),
            Self::Environmental(env) => write!(
                f,
                "tick {}: {:.2} hPa, {:.1} °C",
                env.tick,
                env.pressure_hpa(),
                env.temperature_celsius()
            ),
            Self::Motion(motion) => write!(
                f,
                "tick {}: acc [{}] gyro [{}] mag [{}]",
                motion.tick, motion.accelerometer, motion.gyroscope, motion.magnetometer
            ),
        }
    }
}

/// Payload layout of a notifying characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum SampleSchema {
    /// 6 bytes: x, y, z as LE i16.
    #[default]
    Accelerometer,
    /// 1 byte gesture code.
    Gesture,
    /// 8 bytes: LE u16 tick, LE i32 pressure, LE i16 temperature.
    Environmental,
    /// 20 bytes: LE u16 tick, then accelerometer, gyroscope, magnetometer axes.
    Motion,
}

impl SampleSchema {
    /// Exact payload size of this schema in bytes.
    pub const fn size(self) -> usize {
        match self {
            Self::Accelerometer => 6,
            Self::Gesture => 1,
            Self::Environmental => 8,
            Self::Motion => 20,
        }
    }

    /// Decode a payload.
    ///
    /// Returns `None` unless `payload` is exactly [`size`](Self::size) bytes.
    pub fn decode(self, payload: &[u8]) -> Option<DecodedSample> {
        if payload.len() != self.size() {
            return None;
        }

        let mut buf = payload;
        let sample = match self {
            Self::Accelerometer => DecodedSample::Accelerometer(Axes::read(&mut buf)),
            Self::Gesture => DecodedSample::Gesture(Gesture::from(buf.get_u8())),
            Self::Environmental => DecodedSample::Environmental(Environmental {
                tick: buf.get_u16_le(),
                pressure_raw: buf.get_i32_le(),
                temperature_raw: buf.get_i16_le(),
            }),
            Self::Motion => DecodedSample::Motion(Motion {
                tick: buf.get_u16_le(),
                accelerometer: Axes::read(&mut buf),
                gyroscope: Axes::read(&mut buf),
                magnetometer: Axes::read(&mut buf),
            }),
        };
        Some(sample)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_accelerometer() {
        let payload = [0x01, 0x00, 0xFE, 0xFF, 0x2C, 0x01];
        assert_eq!(
            SampleSchema::Accelerometer.decode(&payload),
            Some(DecodedSample::Accelerometer(Axes { x: 1, y: -2, z: 300 }))
        );
        assert_eq!(SampleSchema::Accelerometer.decode(&payload[..5]), None);
    }

    #[test]
    fn test_gesture() {
        assert_eq!(
            SampleSchema::Gesture.decode(&[2]),
            Some(DecodedSample::Gesture(Gesture::Up))
        );
        assert_eq!(
            SampleSchema::Gesture.decode(&[9]),
            Some(DecodedSample::Gesture(Gesture::Other(9)))
        );
        assert_eq!(SampleSchema::Gesture.decode(&[]), None);

        for code in 0..=255u8 {
            assert_eq!(u8::from(Gesture::from(code)), code);
        }
    }

    #[test]
    fn test_environmental() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&0x1234u16.to_le_bytes());
        payload.extend_from_slice(&101_325i32.to_le_bytes());
        payload.extend_from_slice(&(-125i16).to_le_bytes());

        let Some(DecodedSample::Environmental(env)) = SampleSchema::Environmental.decode(&payload)
        else {
            panic!("environmental payload did not decode");
        };
        assert_eq!(env.tick, 0x1234);
        assert!((env.pressure_hpa() - 1013.25).abs() < 1e-9);
        assert!((env.temperature_celsius() + 12.5).abs() < 1e-9);
    }

    #[test]
    fn test_motion() {
        let mut payload = vec![0x10, 0x00];
        for value in 1i16..=9 {
            payload.extend_from_slice(&(value * -10).to_le_bytes());
        }

        let Some(DecodedSample::Motion(motion)) = SampleSchema::Motion.decode(&payload) else {
            panic!("motion payload did not decode");
        };
        assert_eq!(motion.tick, 16);
        assert_eq!(motion.accelerometer, Axes { x: -10, y: -20, z: -30 });
        assert_eq!(motion.magnetometer, Axes { x: -70, y: -80, z: -90 });
    }

    #[test]
    fn test_display() {
        let sample = DecodedSample::Accelerometer(Axes { x: 1, y: -2, z: 300 });
        assert_eq!(sample.to_string(), "x: 1, y: -2, z: 300");
    }

    proptest! {
        #[test]
        fn prop_decodes_only_exact_length(payload in proptest::collection::vec(any::<u8>(), 0..32)) {
            for schema in [
                SampleSchema::Accelerometer,
                SampleSchema::Gesture,
                SampleSchema::Environmental,
                SampleSchema::Motion,
            ] {
                prop_assert_eq!(schema.decode(&payload).is_some(), payload.len() == schema.size());
            }
        }
    }
}
