//! Client-side implementation of the SimpleRadio-Standalone (SRS) protocol
//! for an external AWACS bot.
//!
//! Two cooperating planes share one GUID and configuration: the
//! [`data::DataClient`] keeps a [`state::PeerDirectory`] consistent over a
//! newline-delimited JSON TCP connection and authenticates as an external
//! AWACS, while the [`audio::AudioClient`] moves Opus-framed voice over UDP,
//! consulting that directory to decide which inbound packets to accept.
//!
//! Construct both clients from one [`types::Guid`], one shared
//! [`state::PeerDirectory`] and one [`config::ClientOptions`], then drive
//! each `run` under a shared `CancellationToken` and `TaskTracker`; cancel
//! the token and wait on the tracker for a clean shutdown. Each `run` closes
//! its connection on the way out, even while callers retain the client
//! handles. The Opus codec is supplied by the caller through the
//! [`audio::codec`] traits.

pub mod audio;
pub mod config;
pub mod data;
pub mod error;
pub mod state;
pub mod types;
pub mod voice;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
