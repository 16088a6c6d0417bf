use std::fmt;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

/// Length in bytes of an SRS client GUID.
pub const GUID_LENGTH: usize = 22;

/// Frequencies at or below this threshold are treated as untuned.
pub const MINIMUM_FREQUENCY_HZ: f64 = 8_000_000.0;

/// Unit identifier advertised for the external AWACS pseudo-client.
pub const EXTERNAL_AWACS_UNIT_ID: u32 = 100_000_002;

/// Unit label advertised for the external AWACS pseudo-client.
pub const EXTERNAL_AWACS_UNIT: &str = "External AWACS";

/// Opaque 22-character client identifier, stable for the lifetime of the
/// process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Guid(String);

impl Guid {
    /// Generates a fresh GUID: 128 random bits rendered as 22 base64-url
    /// characters, the format SRS clients advertise on the wire.
    pub fn random() -> Self {
        const ALPHABET: &[u8; 64] =
            b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";
        let bytes = Uuid::new_v4().into_bytes();
        let mut out = String::with_capacity(GUID_LENGTH);
        for chunk in bytes.chunks(3) {
            let b0 = u32::from(chunk[0]);
            let b1 = u32::from(chunk.get(1).copied().unwrap_or(0));
            let b2 = u32::from(chunk.get(2).copied().unwrap_or(0));
            let triple = (b0 << 16) | (b1 << 8) | b2;
            let sextets = [triple >> 18, triple >> 12, triple >> 6, triple];
            for &sextet in &sextets[..chunk.len() + 1] {
                out.push(ALPHABET[(sextet & 0x3F) as usize] as char);
            }
        }
        Self(out)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Guid {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for Guid {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// Team affiliation governing peer visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Coalition {
    #[default]
    Spectator,
    Red,
    Blue,
}

impl Coalition {
    pub fn is_spectator(self) -> bool {
        self == Coalition::Spectator
    }
}

impl Serialize for Coalition {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i32(match self {
            Coalition::Spectator => 0,
            Coalition::Red => 1,
            Coalition::Blue => 2,
        })
    }
}

impl<'de> Deserialize<'de> for Coalition {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match i32::deserialize(deserializer)? {
            0 => Ok(Coalition::Spectator),
            1 => Ok(Coalition::Red),
            2 => Ok(Coalition::Blue),
            other => Err(de::Error::custom(format!("unknown coalition {}", other))),
        }
    }
}

/// Radio modulation, carried as a byte on both the data and voice planes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Modulation {
    Am,
    Fm,
    Intercom,
    #[default]
    Disabled,
    HaveQuick,
    Satcom,
    Mids,
}

impl Modulation {
    pub fn to_byte(self) -> u8 {
        match self {
            Modulation::Am => 0,
            Modulation::Fm => 1,
            Modulation::Intercom => 2,
            Modulation::Disabled => 3,
            Modulation::HaveQuick => 4,
            Modulation::Satcom => 5,
            Modulation::Mids => 6,
        }
    }

    /// Bytes outside the known range map to [`Modulation::Disabled`], which
    /// never matches a tuned local radio.
    pub fn from_byte(value: u8) -> Self {
        match value {
            0 => Modulation::Am,
            1 => Modulation::Fm,
            2 => Modulation::Intercom,
            4 => Modulation::HaveQuick,
            5 => Modulation::Satcom,
            6 => Modulation::Mids,
            _ => Modulation::Disabled,
        }
    }
}

impl Serialize for Modulation {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.to_byte())
    }
}

impl<'de> Deserialize<'de> for Modulation {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Modulation::from_byte(u8::deserialize(deserializer)?))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Radio {
    #[serde(rename = "freq", default)]
    pub frequency: f64,
    #[serde(rename = "modulation", default)]
    pub modulation: Modulation,
    #[serde(rename = "enc", default)]
    pub is_encrypted: bool,
    #[serde(rename = "encKey", default)]
    pub encryption_key: u8,
    #[serde(rename = "guardFreqIsOn", default)]
    pub is_guard: bool,
}

impl Radio {
    /// A radio is tuned when its frequency is above the 8 MHz floor.
    pub fn is_tuned(&self) -> bool {
        self.frequency > MINIMUM_FREQUENCY_HZ
    }

    /// Two radios match when both are tuned and their frequency, modulation
    /// and encryption state/key are equal.
    pub fn matches(&self, other: &Radio) -> bool {
        self.is_tuned()
            && other.is_tuned()
            && self.frequency == other.frequency
            && self.modulation == other.modulation
            && self.is_encrypted == other.is_encrypted
            && (!self.is_encrypted || self.encryption_key == other.encryption_key)
    }

    /// Encryption byte as carried in voice packet frequency records: the key
    /// index when encrypted, zero otherwise.
    pub fn encryption_byte(&self) -> u8 {
        if self.is_encrypted {
            self.encryption_key
        } else {
            0
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Iff {
    pub control: i32,
    pub mode1: i32,
    pub mode3: i32,
    pub mode4: bool,
    pub mic: i32,
    pub status: i32,
}

impl Default for Iff {
    fn default() -> Self {
        Self {
            control: 0,
            mode1: -1,
            mode3: -1,
            mode4: false,
            mic: -1,
            status: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ambient {
    #[serde(rename = "vol")]
    pub volume: f32,
    #[serde(rename = "abType")]
    pub ambient_type: String,
}

impl Default for Ambient {
    fn default() -> Self {
        Self {
            volume: 1.0,
            ambient_type: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Position {
    #[serde(rename = "lat", default)]
    pub latitude: f64,
    #[serde(rename = "lng", default)]
    pub longitude: f64,
    #[serde(rename = "alt", default)]
    pub altitude: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RadioInfo {
    #[serde(rename = "unitId", default)]
    pub unit_id: u32,
    #[serde(rename = "unit", default)]
    pub unit: String,
    #[serde(rename = "radios", default)]
    pub radios: Vec<Radio>,
    #[serde(rename = "iff", default)]
    pub iff: Iff,
    #[serde(rename = "ambient", default)]
    pub ambient: Ambient,
}

impl RadioInfo {
    /// True when at least one radio pair across the two sequences matches.
    pub fn is_on_frequency(&self, other: &RadioInfo) -> bool {
        self.radios
            .iter()
            .any(|radio| other.radios.iter().any(|o| radio.matches(o)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientInfo {
    #[serde(rename = "ClientGuid")]
    pub guid: Guid,
    #[serde(rename = "Name", default)]
    pub name: String,
    #[serde(rename = "Coalition", default)]
    pub coalition: Coalition,
    #[serde(rename = "RadioInfo", default)]
    pub radio_info: RadioInfo,
    #[serde(rename = "LatLngPosition", default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
}
