use std::sync::Arc;

use log::{error, info};
use rand::Rng;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::{sleep, sleep_until, Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::voice::VoicePacket;

use super::{AudioClient, FRAME_LENGTH};

/// Extra wait beyond the latest receiver deadline before an outgoing
/// transmission may start.
const CLEAR_CHANNEL_GRACE: Duration = Duration::from_millis(250);

impl AudioClient {
    /// Consumes encoded packet batches and writes them to the server, one
    /// transmission at a time.
    pub(super) async fn transmit_packets(
        self: Arc<Self>,
        token: CancellationToken,
        connection: Arc<UdpSocket>,
        mut packets_rx: mpsc::Receiver<Vec<VoicePacket>>,
    ) {
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("stopping SRS audio transmitter due to cancellation");
                    return;
                }
                maybe = packets_rx.recv() => {
                    let Some(packets) = maybe else { return };
                    self.tx(&connection, packets).await;
                    // Pause between transmissions to sound more natural.
                    let pause = {
                        let mut rng = rand::rng();
                        Duration::from_millis(rng.random_range(500..1000))
                    };
                    tokio::select! {
                        _ = token.cancelled() => return,
                        _ = sleep(pause) => {}
                    }
                }
            }
        }
    }

    async fn tx(&self, connection: &UdpSocket, packets: Vec<VoicePacket>) {
        let _busy = self.busy.lock().await;
        self.wait_for_clear_channel().await;
        if !self.mute {
            self.write_packets(connection, &packets).await;
        }
    }

    /// Advisory half-duplex: while any local receiver believes a peer
    /// transmission is in progress, sleep past its deadline plus grace and
    /// re-check, since further packets may extend the deadline.
    async fn wait_for_clear_channel(&self) {
        loop {
            let now = Instant::now();
            let mut receiving = false;
            let mut deadline = now;
            for receiver in &self.receivers {
                if receiver.is_receiving(now).await {
                    receiving = true;
                    let candidate = receiver.deadline().await;
                    if candidate > deadline {
                        deadline = candidate;
                    }
                }
            }
            if !receiving {
                return;
            }
            let resume = deadline + CLEAR_CHANNEL_GRACE;
            info!(
                "delaying outgoing transmission {:?} to avoid interrupting an incoming transmission",
                resume - now
            );
            sleep_until(resume).await;
        }
    }

    async fn write_packets(&self, connection: &UdpSocket, packets: &[VoicePacket]) {
        let start = Instant::now();
        for (i, packet) in packets.iter().enumerate() {
            // Tight timing: hold packet i until half a frame before its
            // playout slot. Writing too fast makes the server skip older
            // packets, too slow makes the transmission stutter.
            sleep_until(start + FRAME_LENGTH * i as u32 - FRAME_LENGTH / 2).await;
            let datagram = match packet.encode() {
                Ok(datagram) => datagram,
                Err(err) => {
                    error!("failed to encode voice packet: {}", err);
                    continue;
                }
            };
            if let Err(err) = connection.send(&datagram).await {
                error!("failed to transmit voice packet: {}", err);
            }
        }
    }
}
