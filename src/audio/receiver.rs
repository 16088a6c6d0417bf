use tokio::sync::RwLock;
use tokio::time::{Duration, Instant};

use crate::types::{Guid, Radio, MINIMUM_FREQUENCY_HZ};
use crate::voice::{Frequency, VoicePacket};

use super::FRAME_LENGTH;

/// Extra time past the nominal end of a frame before an incoming
/// transmission is considered over.
pub(super) const RECEIVE_GRACE: Duration = Duration::from_millis(200);

/// Tracks the transmission currently heard on one configured radio and
/// buffers its decoded PCM until the deadline lapses.
pub(super) struct Receiver {
    radio: Radio,
    state: RwLock<ReceiverState>,
}

struct ReceiverState {
    origin: Option<Guid>,
    packet_id: u64,
    deadline: Instant,
    buffer: Vec<f32>,
}

impl Receiver {
    pub fn new(radio: Radio) -> Self {
        Self {
            radio,
            state: RwLock::new(ReceiverState {
                origin: None,
                packet_id: 0,
                deadline: Instant::now(),
                buffer: Vec::new(),
            }),
        }
    }

    /// True when any of the packet's frequency records matches this radio.
    pub fn matches(&self, packet: &VoicePacket) -> bool {
        packet.frequencies.iter().any(|record| self.matches_record(record))
    }

    fn matches_record(&self, record: &Frequency) -> bool {
        self.radio.is_tuned()
            && record.frequency > MINIMUM_FREQUENCY_HZ
            && record.frequency == self.radio.frequency
            && record.modulation == self.radio.modulation.to_byte()
            && record.encryption == self.radio.encryption_byte()
    }

    /// Accepts a packet when it starts a new transmission or advances the
    /// current one; stale duplicates for the same origin are ignored.
    /// Returns whether the packet was accepted.
    pub async fn accept(&self, packet: &VoicePacket, pcm: &[f32], now: Instant) -> bool {
        let mut state = self.state.write().await;
        let same_origin = state.origin.as_ref() == Some(&packet.origin);
        if same_origin && packet.packet_id <= state.packet_id {
            return false;
        }
        state.origin = Some(packet.origin.clone());
        state.packet_id = packet.packet_id;
        state.deadline = now + FRAME_LENGTH + RECEIVE_GRACE;
        state.buffer.extend_from_slice(pcm);
        true
    }

    /// True while the deadline of the current transmission is in the future.
    pub async fn is_receiving(&self, now: Instant) -> bool {
        now < self.state.read().await.deadline
    }

    pub async fn deadline(&self) -> Instant {
        self.state.read().await.deadline
    }

    /// Drains the buffered PCM once the transmission has ended.
    pub async fn take_completed(&self, now: Instant) -> Option<Vec<f32>> {
        let mut state = self.state.write().await;
        if now < state.deadline || state.buffer.is_empty() {
            return None;
        }
        state.origin = None;
        Some(std::mem::take(&mut state.buffer))
    }
}
