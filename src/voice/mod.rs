//! Binary codec for SRS voice packets carried over UDP.
//!
//! Layout (all integers little-endian): three u16 lengths (total, header,
//! payload), the Opus payload, a variable run of 10-byte frequency records
//! (f64 Hz, modulation byte, encryption byte), unit ID (u32), packet ID
//! (u64), hop count, then the origin and sender GUIDs (22 bytes each, sender
//! trailing). The header length covers everything except the payload and the
//! trailing sender GUID, so `total == header + payload + 22` and `total`
//! equals the datagram length.

use crate::error::VoiceError;
use crate::types::{Guid, GUID_LENGTH};

/// Bytes taken by the three u16 length fields.
const LENGTH_SEGMENT_LENGTH: usize = 6;
/// Bytes per frequency record: f64 frequency + modulation + encryption.
const FREQUENCY_SEGMENT_LENGTH: usize = 10;
/// Bytes of the fixed header tail: unit ID + packet ID + hop count + origin GUID.
const FIXED_SEGMENT_LENGTH: usize = 4 + 8 + 1 + GUID_LENGTH;

/// Smallest well-formed voice packet: one frequency record, empty payload.
pub const MINIMUM_PACKET_LENGTH: usize =
    LENGTH_SEGMENT_LENGTH + FREQUENCY_SEGMENT_LENGTH + FIXED_SEGMENT_LENGTH + GUID_LENGTH;

/// One radio-frequency record inside a voice packet.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frequency {
    pub frequency: f64,
    pub modulation: u8,
    pub encryption: u8,
}

/// A decoded SRS voice packet.
#[derive(Debug, Clone, PartialEq)]
pub struct VoicePacket {
    /// Opus-encoded audio.
    pub audio: Vec<u8>,
    /// Frequencies this packet is transmitted on.
    pub frequencies: Vec<Frequency>,
    pub unit_id: u32,
    pub packet_id: u64,
    pub hops: u8,
    /// GUID of the client that originated the transmission.
    pub origin: Guid,
    /// GUID of the client that sent this packet (differs from origin when
    /// retransmitted).
    pub sender: Guid,
}

/// Outcome of inspecting a raw UDP datagram exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatagramKind {
    /// Too short to be a voice packet; treated as a keepalive ping.
    Ping,
    /// Large enough and carries a total length matching the datagram.
    Voice,
    /// Large enough but the total-length header disagrees with the datagram.
    Invalid,
}

/// Routes a datagram to exactly one of ping, voice or drop.
pub fn classify_datagram(datagram: &[u8]) -> DatagramKind {
    if datagram.len() < MINIMUM_PACKET_LENGTH {
        return DatagramKind::Ping;
    }
    let total = u16::from_le_bytes([datagram[0], datagram[1]]) as usize;
    if total == datagram.len() {
        DatagramKind::Voice
    } else {
        DatagramKind::Invalid
    }
}

impl VoicePacket {
    /// Serializes the packet into its wire form.
    pub fn encode(&self) -> Result<Vec<u8>, VoiceError> {
        for (label, guid) in [("sender", &self.sender), ("origin", &self.origin)] {
            if guid.as_bytes().len() != GUID_LENGTH {
                return Err(VoiceError::MalformedPacket(format!(
                    "{} GUID must be {} bytes, got {}",
                    label,
                    GUID_LENGTH,
                    guid.as_bytes().len()
                )));
            }
        }

        let header_length = LENGTH_SEGMENT_LENGTH
            + self.frequencies.len() * FREQUENCY_SEGMENT_LENGTH
            + FIXED_SEGMENT_LENGTH;
        let total_length = header_length + self.audio.len() + GUID_LENGTH;
        if total_length > usize::from(u16::MAX) {
            return Err(VoiceError::MalformedPacket(format!(
                "packet length {} exceeds u16 range",
                total_length
            )));
        }

        let mut buf = Vec::with_capacity(total_length);
        buf.extend_from_slice(&(total_length as u16).to_le_bytes());
        buf.extend_from_slice(&(header_length as u16).to_le_bytes());
        buf.extend_from_slice(&(self.audio.len() as u16).to_le_bytes());
        buf.extend_from_slice(&self.audio);
        for record in &self.frequencies {
            buf.extend_from_slice(&record.frequency.to_le_bytes());
            buf.push(record.modulation);
            buf.push(record.encryption);
        }
        buf.extend_from_slice(&self.unit_id.to_le_bytes());
        buf.extend_from_slice(&self.packet_id.to_le_bytes());
        buf.push(self.hops);
        buf.extend_from_slice(self.origin.as_bytes());
        buf.extend_from_slice(self.sender.as_bytes());
        Ok(buf)
    }

    /// Parses a datagram previously classified as voice. Any length
    /// inconsistency yields [`VoiceError::MalformedPacket`].
    pub fn decode(datagram: &[u8]) -> Result<VoicePacket, VoiceError> {
        if datagram.len() < MINIMUM_PACKET_LENGTH {
            return Err(VoiceError::MalformedPacket(format!(
                "datagram of {} bytes is below the minimum of {}",
                datagram.len(),
                MINIMUM_PACKET_LENGTH
            )));
        }

        let total_length = u16::from_le_bytes([datagram[0], datagram[1]]) as usize;
        let header_length = u16::from_le_bytes([datagram[2], datagram[3]]) as usize;
        let payload_length = u16::from_le_bytes([datagram[4], datagram[5]]) as usize;

        if total_length != datagram.len() {
            return Err(VoiceError::MalformedPacket(format!(
                "total length {} does not match datagram length {}",
                total_length,
                datagram.len()
            )));
        }
        if header_length + payload_length + GUID_LENGTH != total_length {
            return Err(VoiceError::MalformedPacket(format!(
                "header {} + payload {} + GUID do not add up to total {}",
                header_length, payload_length, total_length
            )));
        }

        let frequency_section = header_length
            .checked_sub(LENGTH_SEGMENT_LENGTH + FIXED_SEGMENT_LENGTH)
            .ok_or_else(|| {
                VoiceError::MalformedPacket(format!("header length {} too small", header_length))
            })?;
        if frequency_section % FREQUENCY_SEGMENT_LENGTH != 0 {
            return Err(VoiceError::MalformedPacket(format!(
                "frequency section of {} bytes is not a whole number of records",
                frequency_section
            )));
        }

        let audio_start = LENGTH_SEGMENT_LENGTH;
        let frequencies_start = audio_start + payload_length;
        let fixed_start = frequencies_start + frequency_section;

        let audio = datagram[audio_start..frequencies_start].to_vec();

        let mut frequencies = Vec::with_capacity(frequency_section / FREQUENCY_SEGMENT_LENGTH);
        for record in datagram[frequencies_start..fixed_start].chunks(FREQUENCY_SEGMENT_LENGTH) {
            frequencies.push(Frequency {
                frequency: f64::from_le_bytes(record[..8].try_into().expect("8-byte slice")),
                modulation: record[8],
                encryption: record[9],
            });
        }

        let unit_id = u32::from_le_bytes(
            datagram[fixed_start..fixed_start + 4]
                .try_into()
                .expect("4-byte slice"),
        );
        let packet_id = u64::from_le_bytes(
            datagram[fixed_start + 4..fixed_start + 12]
                .try_into()
                .expect("8-byte slice"),
        );
        let hops = datagram[fixed_start + 12];

        let origin_start = fixed_start + 13;
        let origin = guid_from_bytes(&datagram[origin_start..origin_start + GUID_LENGTH])?;
        let sender = guid_from_bytes(&datagram[total_length - GUID_LENGTH..])?;

        Ok(VoicePacket {
            audio,
            frequencies,
            unit_id,
            packet_id,
            hops,
            origin,
            sender,
        })
    }
}

fn guid_from_bytes(bytes: &[u8]) -> Result<Guid, VoiceError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|_| VoiceError::MalformedPacket("GUID is not valid UTF-8".to_owned()))?;
    Ok(Guid::from(text))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_packet() -> VoicePacket {
        VoicePacket {
            audio: vec![0xDE, 0xAD, 0xBE, 0xEF],
            frequencies: vec![
                Frequency {
                    frequency: 251_000_000.0,
                    modulation: 0,
                    encryption: 0,
                },
                Frequency {
                    frequency: 30_000_000.0,
                    modulation: 1,
                    encryption: 2,
                },
            ],
            unit_id: 100_000_002,
            packet_id: 7,
            hops: 0,
            origin: Guid::from("aaaaaaaaaaaaaaaaaaaaaa"),
            sender: Guid::from("bbbbbbbbbbbbbbbbbbbbbb"),
        }
    }

    #[test]
    fn encode_decode_round_trip() {
        let packet = sample_packet();
        let wire = packet.encode().expect("encode");
        assert_eq!(wire.len(), u16::from_le_bytes([wire[0], wire[1]]) as usize);
        let decoded = VoicePacket::decode(&wire).expect("decode");
        assert_eq!(decoded, packet);
    }

    #[test]
    fn encode_rejects_bad_guid_length() {
        let mut packet = sample_packet();
        packet.sender = Guid::from("short");
        assert!(matches!(
            packet.encode(),
            Err(VoiceError::MalformedPacket(_))
        ));
    }

    #[test]
    fn decode_rejects_total_length_mismatch() {
        let mut wire = sample_packet().encode().expect("encode");
        wire.push(0);
        assert!(matches!(
            VoicePacket::decode(&wire),
            Err(VoiceError::MalformedPacket(_))
        ));
    }

    #[test]
    fn decode_rejects_non_integral_frequency_section() {
        let mut wire = sample_packet().encode().expect("encode");
        // Shift one byte from the payload into the header so the frequency
        // section is no longer a multiple of the record size.
        let header = u16::from_le_bytes([wire[2], wire[3]]) + 1;
        let payload = u16::from_le_bytes([wire[4], wire[5]]) - 1;
        wire[2..4].copy_from_slice(&header.to_le_bytes());
        wire[4..6].copy_from_slice(&payload.to_le_bytes());
        assert!(matches!(
            VoicePacket::decode(&wire),
            Err(VoiceError::MalformedPacket(_))
        ));
    }

    #[test]
    fn small_datagrams_classify_as_ping() {
        let guid = Guid::random();
        assert_eq!(classify_datagram(guid.as_bytes()), DatagramKind::Ping);
        assert_eq!(classify_datagram(&[]), DatagramKind::Ping);
    }

    #[test]
    fn voice_datagrams_classify_as_voice() {
        let wire = sample_packet().encode().expect("encode");
        assert_eq!(classify_datagram(&wire), DatagramKind::Voice);
    }

    #[test]
    fn large_datagrams_with_bad_length_classify_as_invalid() {
        let mut wire = sample_packet().encode().expect("encode");
        wire.push(0);
        assert_eq!(classify_datagram(&wire), DatagramKind::Invalid);
    }
}
