//! Configuration commands written to the sensor.

use std::fmt;

/// On-device sample-rate presets.
///
/// The code is written to the configuration characteristic as a 2-byte
/// little-endian value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SampleRate {
    /// One sample per second.
    OneSecond,
    /// One sample every ten seconds.
    TenSeconds,
    /// One sample every twenty seconds.
    TwentySeconds,
}

impl SampleRate {
    /// All presets from fastest to slowest.
    pub const ALL: [SampleRate; 3] = [Self::OneSecond, Self::TenSeconds, Self::TwentySeconds];

    /// The rate code understood by the firmware.
    pub const fn code(self) -> u16 {
        match self {
            Self::OneSecond => 0x0010,
            Self::TenSeconds => 0x005A,
            Self::TwentySeconds => 0x00B4,
        }
    }

    /// Look up a preset by its rate code.
    pub fn from_code(code: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|rate| rate.code() == code)
    }

    /// The payload to write.
    pub const fn payload(self) -> [u8; 2] {
        self.code().to_le_bytes()
    }
}

impl fmt::Display for SampleRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OneSecond => write!(f, "1s"),
            Self::TenSeconds => write!(f, "10s"),
            Self::TwentySeconds => write!(f, "20s"),
        }
    }
}
