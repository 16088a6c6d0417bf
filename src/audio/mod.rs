//! UDP voice plane: keepalive pings, inbound demultiplexing, duplex
//! encode/decode pipelines and half-duplex transmission against the SRS
//! server.

pub mod codec;
mod receiver;
mod transmit;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::time::{interval, Duration, Instant};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::ClientOptions;
use crate::error::{ClientError, VoiceError};
use crate::state::PeerDirectory;
use crate::types::{Guid, Radio, EXTERNAL_AWACS_UNIT_ID};
use crate::voice::{classify_datagram, DatagramKind, Frequency, VoicePacket};

use codec::{FrameDecoder, FrameEncoder};
use receiver::Receiver;

/// PCM sample rate of the codec pipeline, mono F32LE.
pub const SAMPLE_RATE: usize = 16_000;
/// Duration of one encoded frame, i.e. one outbound voice packet.
pub const FRAME_LENGTH: Duration = Duration::from_millis(40);
/// Samples per frame at [`SAMPLE_RATE`].
pub const FRAME_SAMPLES: usize = SAMPLE_RATE * 40 / 1000;

const PING_INTERVAL: Duration = Duration::from_secs(5);
const PING_CHANNEL_DEPTH: usize = 16;
/// Bound on buffered inbound voice datagrams, a few seconds of traffic per
/// radio. Overflow drops the incoming datagram and logs it.
const VOICE_CHANNEL_DEPTH: usize = 1024;
const MIXED_CHANNEL_DEPTH: usize = 16;
const TRANSMISSION_CHANNEL_DEPTH: usize = 3;
const MAX_DATAGRAM_SIZE: usize = 1500;

/// F32LE PCM buffer.
pub type Audio = Vec<f32>;

/// SRS audio client receiving and transmitting on a set of configured
/// radios. Construct with [`AudioClient::connect`], then drive with
/// [`AudioClient::run`].
pub struct AudioClient {
    guid: Guid,
    radios: Vec<Radio>,
    /// UDP connection, handed to `run` so the socket is released when the
    /// loops wind down rather than living as long as the client handle.
    connection: std::sync::Mutex<Option<Arc<UdpSocket>>>,
    directory: Arc<PeerDirectory>,
    receivers: Vec<Receiver>,
    /// Incremented for each voice packet transmitted.
    packet_number: AtomicU64,
    /// Serializes outgoing transmissions.
    busy: Mutex<()>,
    mute: bool,
    last_ping: RwLock<Instant>,
    tx_tx: mpsc::Sender<Audio>,
    tx_rx: std::sync::Mutex<Option<mpsc::Receiver<Audio>>>,
    rx_tx: mpsc::Sender<Audio>,
    rx_rx: std::sync::Mutex<Option<mpsc::Receiver<Audio>>>,
    encoder: std::sync::Mutex<Option<Box<dyn FrameEncoder>>>,
    decoder: std::sync::Mutex<Option<Box<dyn FrameDecoder>>>,
}

impl AudioClient {
    /// Resolves and dials the SRS server over UDP. The encoder and decoder
    /// wrap the delegated Opus codec.
    pub async fn connect(
        guid: Guid,
        directory: Arc<PeerDirectory>,
        options: &ClientOptions,
        encoder: Box<dyn FrameEncoder>,
        decoder: Box<dyn FrameDecoder>,
    ) -> Result<Self, ClientError> {
        options.validate()?;
        info!("connecting to SRS server at {} over UDP", options.address);
        let connection = UdpSocket::bind("0.0.0.0:0").await?;
        connection.connect(&options.address).await?;

        let (tx_tx, tx_rx) = mpsc::channel(1);
        let (rx_tx, rx_rx) = mpsc::channel(1);
        let receivers = options.radios.iter().cloned().map(Receiver::new).collect();

        Ok(Self {
            guid,
            radios: options.radios.clone(),
            connection: std::sync::Mutex::new(Some(Arc::new(connection))),
            directory,
            receivers,
            packet_number: AtomicU64::new(1),
            busy: Mutex::new(()),
            mute: options.mute,
            last_ping: RwLock::new(Instant::now()),
            tx_tx,
            tx_rx: std::sync::Mutex::new(Some(tx_rx)),
            rx_tx,
            rx_rx: std::sync::Mutex::new(Some(rx_rx)),
            encoder: std::sync::Mutex::new(Some(encoder)),
            decoder: std::sync::Mutex::new(Some(decoder)),
        })
    }

    /// Frequencies this client receives and transmits on, in Hz.
    pub fn frequencies(&self) -> Vec<f64> {
        self.radios.iter().map(|radio| radio.frequency).collect()
    }

    /// Time the most recent keepalive ping was received from the server.
    pub async fn last_ping(&self) -> Instant {
        *self.last_ping.read().await
    }

    /// Queues PCM for transmission. Awaits until the encoder accepts the
    /// buffer, applying backpressure to the caller.
    pub async fn transmit(&self, audio: Audio) {
        if self.tx_tx.send(audio).await.is_err() {
            warn!("transmit queue is closed, dropping audio");
        }
    }

    /// The stream of PCM mixed from accepted inbound voice, yielded to the
    /// first caller.
    pub fn receive(&self) -> Option<mpsc::Receiver<Audio>> {
        self.rx_rx.lock().ok().and_then(|mut slot| slot.take())
    }

    /// Runs all audio loops until the token is canceled. Should be called
    /// exactly once.
    pub async fn run(
        self: Arc<Self>,
        token: CancellationToken,
        tracker: TaskTracker,
    ) -> Result<(), ClientError> {
        let tx_rx = self.tx_rx.lock().ok().and_then(|mut slot| slot.take());
        let encoder = self.encoder.lock().ok().and_then(|mut slot| slot.take());
        let decoder = self.decoder.lock().ok().and_then(|mut slot| slot.take());
        let connection = self.connection.lock().ok().and_then(|mut slot| slot.take());
        let (Some(tx_rx), Some(encoder), Some(decoder), Some(connection)) =
            (tx_rx, encoder, decoder, connection)
        else {
            tracker.close();
            return Err(ClientError::Protocol(
                "audio client run called twice".to_owned(),
            ));
        };

        let (ping_tx, ping_rx) = mpsc::channel::<Vec<u8>>(PING_CHANNEL_DEPTH);
        let (voice_tx, voice_rx) = mpsc::channel::<Vec<u8>>(VOICE_CHANNEL_DEPTH);
        let (mixed_tx, mixed_rx) = mpsc::channel::<Audio>(MIXED_CHANNEL_DEPTH);
        let (packets_tx, packets_rx) = mpsc::channel::<Vec<VoicePacket>>(TRANSMISSION_CHANNEL_DEPTH);

        tracker.spawn(Arc::clone(&self).send_pings(token.clone(), Arc::clone(&connection)));
        tracker.spawn(Arc::clone(&self).receive_pings(token.clone(), ping_rx));
        tracker.spawn(Arc::clone(&self).receive_udp(
            token.clone(),
            Arc::clone(&connection),
            ping_tx,
            voice_tx,
        ));
        tracker.spawn(Arc::clone(&self).decode_voice(token.clone(), voice_rx, mixed_tx, decoder));
        tracker.spawn(Arc::clone(&self).publish_audio(token.clone(), mixed_rx));
        tracker.spawn(Arc::clone(&self).encode_voice(token.clone(), tx_rx, packets_tx, encoder));
        tracker.spawn(Arc::clone(&self).transmit_packets(
            token.clone(),
            Arc::clone(&connection),
            packets_rx,
        ));
        tracker.close();

        token.cancelled().await;
        // The loops drop their socket handles as they exit; releasing ours
        // here closes the UDP connection at quiescence.
        drop(connection);
        info!("SRS audio client stopped");
        Ok(())
    }

    /// Keepalive sender. The server will not deliver voice to this client
    /// until it has observed at least one ping, so the first one goes out
    /// immediately.
    async fn send_pings(self: Arc<Self>, token: CancellationToken, connection: Arc<UdpSocket>) {
        let mut ticker = interval(PING_INTERVAL);
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("stopping ping sender due to cancellation");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(err) = connection.send(self.guid.as_bytes()).await {
                        error!("failed to send ping: {}", err);
                    }
                }
            }
        }
    }

    /// Updates the liveness clock for each inbound ping. The payload is
    /// not meaningful.
    async fn receive_pings(
        self: Arc<Self>,
        token: CancellationToken,
        mut ping_rx: mpsc::Receiver<Vec<u8>>,
    ) {
        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                maybe = ping_rx.recv() => {
                    let Some(datagram) = maybe else { return };
                    debug!("received {} byte ping from SRS server", datagram.len());
                    *self.last_ping.write().await = Instant::now();
                }
            }
        }
    }

    /// Single UDP reader: classifies each datagram exactly once and fans it
    /// out to the ping or voice pipeline.
    async fn receive_udp(
        self: Arc<Self>,
        token: CancellationToken,
        connection: Arc<UdpSocket>,
        ping_tx: mpsc::Sender<Vec<u8>>,
        voice_tx: mpsc::Sender<Vec<u8>>,
    ) {
        let mut buf = [0u8; MAX_DATAGRAM_SIZE];
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("stopping UDP reader due to cancellation");
                    return;
                }
                result = connection.recv(&mut buf) => {
                    match result {
                        Ok(len) => {
                            let datagram = buf[..len].to_vec();
                            match classify_datagram(&datagram) {
                                DatagramKind::Ping => {
                                    let _ = ping_tx.try_send(datagram);
                                }
                                DatagramKind::Voice => {
                                    if voice_tx.try_send(datagram).is_err() {
                                        warn!("voice channel full, dropping {} byte datagram", len);
                                    }
                                }
                                DatagramKind::Invalid => {
                                    debug!("dropping {} byte datagram with inconsistent length header", len);
                                }
                            }
                        }
                        Err(err) => error!("UDP receive error: {}", err),
                    }
                }
            }
        }
    }

    /// Decodes voice datagrams, filters them against the peer directory and
    /// updates per-radio receiver state; completed PCM windows are handed to
    /// the publisher.
    async fn decode_voice(
        self: Arc<Self>,
        token: CancellationToken,
        mut voice_rx: mpsc::Receiver<Vec<u8>>,
        mixed_tx: mpsc::Sender<Audio>,
        mut decoder: Box<dyn FrameDecoder>,
    ) {
        let mut sweep = interval(FRAME_LENGTH);
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("stopping voice decoder due to cancellation");
                    return;
                }
                _ = sweep.tick() => {
                    let now = Instant::now();
                    for receiver in &self.receivers {
                        if let Some(window) = receiver.take_completed(now).await {
                            if mixed_tx.send(window).await.is_err() {
                                return;
                            }
                        }
                    }
                }
                maybe = voice_rx.recv() => {
                    let Some(datagram) = maybe else { return };
                    let packet = match VoicePacket::decode(&datagram) {
                        Ok(packet) => packet,
                        Err(err) => {
                            debug!("dropping malformed voice packet: {}", err);
                            continue;
                        }
                    };
                    if packet.sender == self.guid {
                        continue;
                    }
                    if !self.directory.contains(&packet.origin).await {
                        debug!("dropping voice packet from unknown origin {}", packet.origin);
                        continue;
                    }
                    let matching: Vec<&Receiver> = self
                        .receivers
                        .iter()
                        .filter(|receiver| receiver.matches(&packet))
                        .collect();
                    if matching.is_empty() {
                        continue;
                    }
                    let pcm = match decoder.decode_frame(&packet.audio) {
                        Ok(pcm) => pcm,
                        Err(err) => {
                            warn!("failed to decode voice frame: {}", err);
                            continue;
                        }
                    };
                    let now = Instant::now();
                    for receiver in matching {
                        receiver.accept(&packet, &pcm, now).await;
                    }
                }
            }
        }
    }

    /// Forwards completed PCM windows to the external receive stream.
    async fn publish_audio(
        self: Arc<Self>,
        token: CancellationToken,
        mut mixed_rx: mpsc::Receiver<Audio>,
    ) {
        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                maybe = mixed_rx.recv() => {
                    let Some(window) = maybe else { return };
                    if self.rx_tx.send(window).await.is_err() {
                        return;
                    }
                }
            }
        }
    }

    /// Segments queued PCM into frames and encodes each into a voice packet.
    async fn encode_voice(
        self: Arc<Self>,
        token: CancellationToken,
        mut tx_rx: mpsc::Receiver<Audio>,
        packets_tx: mpsc::Sender<Vec<VoicePacket>>,
        mut encoder: Box<dyn FrameEncoder>,
    ) {
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("stopping voice encoder due to cancellation");
                    return;
                }
                maybe = tx_rx.recv() => {
                    let Some(audio) = maybe else { return };
                    let packets = match self.build_packets(&audio, encoder.as_mut()) {
                        Ok(packets) => packets,
                        Err(err) => {
                            warn!("failed to encode transmission: {}", err);
                            continue;
                        }
                    };
                    if packets.is_empty() {
                        continue;
                    }
                    if packets_tx.send(packets).await.is_err() {
                        return;
                    }
                }
            }
        }
    }

    /// Builds one numbered voice packet per frame of the given PCM buffer,
    /// advertising all configured radios. The trailing partial frame is
    /// padded with silence.
    fn build_packets(
        &self,
        audio: &[f32],
        encoder: &mut dyn FrameEncoder,
    ) -> Result<Vec<VoicePacket>, VoiceError> {
        let frequencies: Vec<Frequency> = self
            .radios
            .iter()
            .map(|radio| Frequency {
                frequency: radio.frequency,
                modulation: radio.modulation.to_byte(),
                encryption: radio.encryption_byte(),
            })
            .collect();

        let mut packets = Vec::with_capacity(audio.len().div_ceil(FRAME_SAMPLES));
        for chunk in audio.chunks(FRAME_SAMPLES) {
            let opus = if chunk.len() == FRAME_SAMPLES {
                encoder.encode_frame(chunk)?
            } else {
                let mut padded = chunk.to_vec();
                padded.resize(FRAME_SAMPLES, 0.0);
                encoder.encode_frame(&padded)?
            };
            packets.push(VoicePacket {
                audio: opus,
                frequencies: frequencies.clone(),
                unit_id: EXTERNAL_AWACS_UNIT_ID,
                packet_id: self.packet_number.fetch_add(1, Ordering::Relaxed),
                hops: 0,
                origin: self.guid.clone(),
                sender: self.guid.clone(),
            });
        }
        Ok(packets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ClientInfo, Coalition, Modulation, RadioInfo};
    use tokio::time::timeout;

    struct NullCodec;

    impl FrameEncoder for NullCodec {
        fn encode_frame(&mut self, _pcm: &[f32]) -> Result<Vec<u8>, VoiceError> {
            Ok(vec![0x11; 32])
        }
    }

    impl FrameDecoder for NullCodec {
        fn decode_frame(&mut self, _opus: &[u8]) -> Result<Vec<f32>, VoiceError> {
            Ok(vec![0.25; FRAME_SAMPLES])
        }
    }

    fn peer_info(guid: &str, frequency: f64) -> ClientInfo {
        ClientInfo {
            guid: Guid::from(guid),
            name: "Viper".to_owned(),
            coalition: Coalition::Blue,
            radio_info: RadioInfo {
                radios: vec![Radio {
                    frequency,
                    modulation: Modulation::Am,
                    ..Default::default()
                }],
                ..Default::default()
            },
            position: None,
        }
    }

    fn voice_packet(origin: &str, packet_id: u64) -> VoicePacket {
        VoicePacket {
            audio: vec![0x22; 32],
            frequencies: vec![Frequency {
                frequency: 251_000_000.0,
                modulation: 0,
                encryption: 0,
            }],
            unit_id: 42,
            packet_id,
            hops: 0,
            origin: Guid::from(origin),
            sender: Guid::from(origin),
        }
    }

    struct Harness {
        client: Arc<AudioClient>,
        directory: Arc<PeerDirectory>,
        server: UdpSocket,
        client_addr: std::net::SocketAddr,
        rx: mpsc::Receiver<Audio>,
        token: CancellationToken,
        tracker: TaskTracker,
    }

    async fn start() -> Harness {
        let server = UdpSocket::bind("127.0.0.1:0").await.expect("bind server");
        let mut options = ClientOptions::default();
        options.address = server.local_addr().expect("addr").to_string();

        let directory = Arc::new(PeerDirectory::new());
        let client = Arc::new(
            AudioClient::connect(
                Guid::from("selfselfselfselfselfse"),
                Arc::clone(&directory),
                &options,
                Box::new(NullCodec),
                Box::new(NullCodec),
            )
            .await
            .expect("connect"),
        );
        let rx = client.receive().expect("receive stream");

        let token = CancellationToken::new();
        let tracker = TaskTracker::new();
        tokio::spawn(Arc::clone(&client).run(token.clone(), tracker.clone()));

        // The first keepalive ping reveals the client's address.
        let mut buf = [0u8; MAX_DATAGRAM_SIZE];
        let (len, client_addr) = timeout(Duration::from_secs(2), server.recv_from(&mut buf))
            .await
            .expect("ping deadline")
            .expect("ping");
        assert_eq!(len, crate::types::GUID_LENGTH);

        Harness {
            client,
            directory,
            server,
            client_addr,
            rx,
            token,
            tracker,
        }
    }

    async fn sync_peer(harness: &Harness, guid: &str, frequency: f64) {
        let me = peer_info("selfselfselfselfselfse", 251_000_000.0);
        harness
            .directory
            .sync_peer(&me, peer_info(guid, frequency))
            .await;
    }

    /// Receives datagrams at the fake server until one classifies as voice.
    async fn next_voice_datagram(server: &UdpSocket) -> Vec<u8> {
        let mut buf = [0u8; MAX_DATAGRAM_SIZE];
        loop {
            let (len, _) = server.recv_from(&mut buf).await.expect("recv");
            if classify_datagram(&buf[..len]) == DatagramKind::Voice {
                return buf[..len].to_vec();
            }
        }
    }

    #[tokio::test]
    async fn loopback_packets_are_suppressed() {
        let mut harness = start().await;
        sync_peer(&harness, "aaaaaaaaaaaaaaaaaaaaaa", 251_000_000.0).await;

        let own = voice_packet("selfselfselfselfselfse", 1);
        let wire = own.encode().expect("encode");
        harness
            .server
            .send_to(&wire, harness.client_addr)
            .await
            .expect("send");

        let received = timeout(Duration::from_millis(500), harness.rx.recv()).await;
        assert!(received.is_err(), "own packets must not surface");
        harness.token.cancel();
    }

    #[tokio::test]
    async fn unknown_origins_are_suppressed() {
        let mut harness = start().await;

        let wire = voice_packet("aaaaaaaaaaaaaaaaaaaaaa", 1)
            .encode()
            .expect("encode");
        harness
            .server
            .send_to(&wire, harness.client_addr)
            .await
            .expect("send");

        let received = timeout(Duration::from_millis(500), harness.rx.recv()).await;
        assert!(received.is_err(), "unknown peers must not surface");
        harness.token.cancel();
    }

    #[tokio::test]
    async fn known_peer_voice_surfaces_after_transmission_ends() {
        let mut harness = start().await;
        sync_peer(&harness, "aaaaaaaaaaaaaaaaaaaaaa", 251_000_000.0).await;

        for packet_id in 1..=2 {
            let wire = voice_packet("aaaaaaaaaaaaaaaaaaaaaa", packet_id)
                .encode()
                .expect("encode");
            harness
                .server
                .send_to(&wire, harness.client_addr)
                .await
                .expect("send");
        }

        let window = timeout(Duration::from_secs(2), harness.rx.recv())
            .await
            .expect("window deadline")
            .expect("window");
        assert_eq!(window.len(), 2 * FRAME_SAMPLES);
        assert!(window.iter().all(|&sample| sample == 0.25));
        harness.token.cancel();
    }

    #[tokio::test]
    async fn last_ping_advances_on_inbound_ping() {
        let harness = start().await;
        let before = harness.client.last_ping().await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        harness
            .server
            .send_to(b"pingpingpingpingpingpi", harness.client_addr)
            .await
            .expect("send");
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(harness.client.last_ping().await > before);
        harness.token.cancel();
    }

    #[tokio::test]
    async fn transmission_is_paced_across_frames() {
        let harness = start().await;

        harness.client.transmit(vec![0.1; 5 * FRAME_SAMPLES]).await;

        let first = timeout(Duration::from_secs(2), next_voice_datagram(&harness.server))
            .await
            .expect("first packet");
        let first_at = Instant::now();
        for _ in 0..4 {
            timeout(Duration::from_secs(2), next_voice_datagram(&harness.server))
                .await
                .expect("packet");
        }
        let elapsed = Instant::now() - first_at;

        let decoded = VoicePacket::decode(&first).expect("decode");
        assert_eq!(decoded.packet_id, 1);
        assert_eq!(decoded.sender, Guid::from("selfselfselfselfselfse"));
        // Batch send duration is at least (n - 1) * frame / 2.
        assert!(
            elapsed >= Duration::from_millis(80),
            "batch sent too fast: {:?}",
            elapsed
        );
        harness.token.cancel();
    }

    #[tokio::test]
    async fn transmission_waits_for_clear_channel() {
        let harness = start().await;
        sync_peer(&harness, "aaaaaaaaaaaaaaaaaaaaaa", 251_000_000.0).await;

        let inbound_at = Instant::now();
        let wire = voice_packet("aaaaaaaaaaaaaaaaaaaaaa", 1)
            .encode()
            .expect("encode");
        harness
            .server
            .send_to(&wire, harness.client_addr)
            .await
            .expect("send");
        tokio::time::sleep(Duration::from_millis(50)).await;

        harness.client.transmit(vec![0.1; FRAME_SAMPLES]).await;
        timeout(Duration::from_secs(3), next_voice_datagram(&harness.server))
            .await
            .expect("voice packet");
        let elapsed = Instant::now() - inbound_at;

        // Deadline (frame + 200 ms grace) plus the 250 ms clear-channel
        // grace must pass before the first write.
        assert!(
            elapsed >= Duration::from_millis(450),
            "transmitted during an incoming transmission: {:?}",
            elapsed
        );
        harness.token.cancel();
    }

    #[tokio::test]
    async fn run_quiesces_after_cancellation() {
        let harness = start().await;

        harness.token.cancel();
        timeout(Duration::from_secs(2), harness.tracker.wait())
            .await
            .expect("all audio tasks drain after cancellation");
    }

    #[tokio::test]
    async fn build_packets_numbers_frames_and_advertises_radios() {
        let server = UdpSocket::bind("127.0.0.1:0").await.expect("bind");
        let mut options = ClientOptions::default();
        options.address = server.local_addr().expect("addr").to_string();
        options.radios.push(Radio {
            frequency: 30_000_000.0,
            modulation: Modulation::Fm,
            ..Default::default()
        });

        let client = AudioClient::connect(
            Guid::from("selfselfselfselfselfse"),
            Arc::new(PeerDirectory::new()),
            &options,
            Box::new(NullCodec),
            Box::new(NullCodec),
        )
        .await
        .expect("connect");

        let mut encoder = NullCodec;
        let packets = client
            .build_packets(&vec![0.1; 2 * FRAME_SAMPLES + 1], &mut encoder)
            .expect("packets");

        assert_eq!(packets.len(), 3, "trailing partial frame is padded");
        for (index, packet) in packets.iter().enumerate() {
            assert_eq!(packet.packet_id, index as u64 + 1);
            assert_eq!(packet.hops, 0);
            assert_eq!(packet.origin, packet.sender);
            assert_eq!(packet.frequencies.len(), 2);
            assert_eq!(packet.frequencies[1].modulation, Modulation::Fm.to_byte());
        }

        // The counter continues across transmissions.
        let more = client
            .build_packets(&vec![0.1; FRAME_SAMPLES], &mut encoder)
            .expect("packets");
        assert_eq!(more[0].packet_id, 4);
    }
}
