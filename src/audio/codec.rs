//! Seam for the delegated Opus codec. The enclosing bot supplies
//! implementations wrapping its encoder and decoder instances; this crate
//! only moves frames through them.

use crate::error::VoiceError;

/// Encodes one fixed-length F32LE PCM frame into an Opus packet.
pub trait FrameEncoder: Send {
    fn encode_frame(&mut self, pcm: &[f32]) -> Result<Vec<u8>, VoiceError>;
}

/// Decodes one Opus packet into F32LE PCM samples.
pub trait FrameDecoder: Send {
    fn decode_frame(&mut self, opus: &[u8]) -> Result<Vec<f32>, VoiceError>;
}
