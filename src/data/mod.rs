//! TCP data plane: newline-delimited JSON synchronizing the peer directory
//! and authenticating this client as an external AWACS.

pub mod message;

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, trace, warn};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio::time::Instant;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::ClientOptions;
use crate::error::ClientError;
use crate::state::PeerDirectory;
use crate::types::{
    Ambient, ClientInfo, Guid, Iff, Position, RadioInfo, EXTERNAL_AWACS_UNIT,
    EXTERNAL_AWACS_UNIT_ID,
};

use message::{Message, MsgType};

const MESSAGE_CHANNEL_DEPTH: usize = 64;

/// SRS data client. Construct with [`DataClient::connect`], then drive with
/// [`DataClient::run`].
pub struct DataClient {
    reader: Mutex<Option<FramedRead<OwnedReadHalf, LinesCodec>>>,
    /// Write half of the connection. Emptied by `run` on the way out so the
    /// socket closes even while callers still hold the client handle.
    writer: Mutex<Option<FramedWrite<OwnedWriteHalf, LinesCodec>>>,
    /// What players see in the SRS client list and the in-game overlay when
    /// this client transmits.
    client_info: ClientInfo,
    external_awacs_mode_password: String,
    protocol_version: String,
    directory: Arc<PeerDirectory>,
    /// Most recent time any message arrived. A stale value means we have
    /// likely been disconnected from the server.
    last_received: RwLock<Instant>,
}

impl DataClient {
    /// Resolves and dials the SRS server over TCP.
    pub async fn connect(
        guid: Guid,
        directory: Arc<PeerDirectory>,
        options: &ClientOptions,
    ) -> Result<Self, ClientError> {
        options.validate()?;
        info!("connecting to SRS server at {} over TCP", options.address);
        let stream = TcpStream::connect(&options.address).await?;
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();

        let client_info = ClientInfo {
            guid,
            name: options.client_name.clone(),
            coalition: options.coalition,
            radio_info: RadioInfo {
                unit_id: EXTERNAL_AWACS_UNIT_ID,
                unit: EXTERNAL_AWACS_UNIT.to_owned(),
                radios: options.radios.clone(),
                iff: Iff::default(),
                ambient: Ambient::default(),
            },
            position: Some(Position::default()),
        };

        Ok(Self {
            reader: Mutex::new(Some(FramedRead::new(read_half, LinesCodec::new()))),
            writer: Mutex::new(Some(FramedWrite::new(write_half, LinesCodec::new()))),
            client_info,
            external_awacs_mode_password: options.external_awacs_mode_password.clone(),
            protocol_version: options.protocol_version.clone(),
            directory,
            last_received: RwLock::new(Instant::now()),
        })
    }

    /// Name of this client as it appears in the SRS client list.
    pub fn name(&self) -> &str {
        &self.client_info.name
    }

    /// Most recent time any data-plane message was received.
    pub async fn last_received(&self) -> Instant {
        *self.last_received.read().await
    }

    /// True when a stored peer with the given display name shares a
    /// frequency with us.
    pub async fn is_on_frequency(&self, name: &str) -> bool {
        self.directory
            .is_name_on_frequency(name, &self.client_info.radio_info)
            .await
    }

    /// Number of stored peers sharing a frequency with us.
    pub async fn clients_on_frequency(&self) -> usize {
        self.directory
            .clients_on_frequency(&self.client_info.radio_info)
            .await
    }

    /// Runs the data client until the token is canceled or a fatal I/O error
    /// occurs. Should be called exactly once; `ready` fires once the reader
    /// is attached, before the handshake.
    pub async fn run(
        self: Arc<Self>,
        token: CancellationToken,
        tracker: TaskTracker,
        ready: oneshot::Sender<()>,
    ) -> Result<(), ClientError> {
        info!("SRS data client starting");

        let reader = self.reader.lock().await.take();
        let Some(mut reader) = reader else {
            tracker.close();
            return Err(ClientError::Protocol(
                "data client run called twice".to_owned(),
            ));
        };

        let (message_tx, mut message_rx) = mpsc::channel::<Message>(MESSAGE_CHANNEL_DEPTH);
        let (error_tx, mut error_rx) = mpsc::channel::<std::io::Error>(1);

        let reader_token = token.clone();
        tracker.spawn(async move {
            loop {
                tokio::select! {
                    _ = reader_token.cancelled() => {
                        info!("stopping SRS data reader due to cancellation");
                        return;
                    }
                    next = reader.next() => match next {
                        Some(Ok(line)) => match serde_json::from_str::<Message>(&line) {
                            Ok(message) => {
                                if message_tx.send(message).await.is_err() {
                                    return;
                                }
                            }
                            Err(err) => warn!("failed to parse message {:?}: {}", line, err),
                        },
                        Some(Err(err)) => {
                            error!("error reading from SRS server: {}", err);
                            let _ = error_tx
                                .send(std::io::Error::new(std::io::ErrorKind::Other, err))
                                .await;
                            return;
                        }
                        None => trace!("EOF received from SRS server"),
                    }
                }
            }
        });

        tracker.close();

        let _ = ready.send(());
        info!("SRS data client ready");

        let result: Result<(), ClientError> = async {
            info!("sending initial sync message");
            self.sync().await?;

            info!("connecting to external AWACS mode");
            self.connect_external_awacs_mode().await?;

            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        info!("stopping SRS data client due to cancellation");
                        return Ok(());
                    }
                    Some(err) = error_rx.recv() => {
                        return Err(ClientError::Transport(err));
                    }
                    maybe = message_rx.recv() => {
                        let Some(message) = maybe else { return Ok(()) };
                        *self.last_received.write().await = Instant::now();
                        self.handle_message(message).await;
                    }
                }
            }
        }
        .await;

        // Deferred close: drop the write half so the connection goes down
        // with us; the reader task releases the read half as it exits.
        if self.writer.lock().await.take().is_some() {
            debug!("closed TCP connection to SRS server");
        }
        result
    }

    /// Routes one message to its handler.
    async fn handle_message(&self, message: Message) {
        match message.msg_type {
            MsgType::Ping
            | MsgType::ServerSettings
            | MsgType::VersionMismatch
            | MsgType::ExternalAwacsModeDisconnect => {
                debug!("received {:?} message", message.msg_type);
            }
            MsgType::Sync => {
                let clients = message.clients.unwrap_or_default();
                info!("synchronizing {} clients", clients.len());
                self.directory.sync_peers(&self.client_info, clients).await;
            }
            MsgType::Update | MsgType::RadioUpdate => {
                if let Some(client) = message.client {
                    self.directory.sync_peer(&self.client_info, client).await;
                }
            }
            MsgType::ClientDisconnect => {
                if let Some(client) = message.client {
                    self.directory.remove(&client.guid).await;
                }
            }
            MsgType::ExternalAwacsModePassword => {
                let same_coalition = message
                    .client
                    .as_ref()
                    .is_some_and(|client| client.coalition == self.client_info.coalition);
                if same_coalition {
                    debug!("external AWACS mode accepted, re-advertising radios");
                    if let Err(err) = self.update_radios().await {
                        error!("failed to update radios: {}", err);
                    }
                }
            }
            MsgType::Unknown(value) => {
                warn!("received unrecognized message type {}", value);
            }
        }
    }

    /// Serializes the message as JSON followed by a newline and writes it to
    /// the TCP stream.
    pub async fn send(&self, message: Message) -> Result<(), ClientError> {
        if message.version.is_empty() {
            return Err(ClientError::InvalidMessage(
                "message version is required".to_owned(),
            ));
        }
        let line = serde_json::to_string(&message)?;
        let mut slot = self.writer.lock().await;
        let Some(writer) = slot.as_mut() else {
            return Err(ClientError::Transport(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "connection to SRS server is closed",
            )));
        };
        writer.send(line).await.map_err(|err| match err {
            LinesCodecError::Io(err) => ClientError::Transport(err),
            other => ClientError::Protocol(other.to_string()),
        })
    }

    fn new_message(&self, msg_type: MsgType) -> Message {
        Message::new(self.protocol_version.as_str(), msg_type)
    }

    fn new_message_with_client(&self, msg_type: MsgType) -> Message {
        let mut message = self.new_message(msg_type);
        message.client = Some(self.client_info.clone());
        message
    }

    /// Advertises this client's information to the server.
    async fn sync(&self) -> Result<(), ClientError> {
        self.send(self.new_message_with_client(MsgType::Sync)).await
    }

    /// Re-advertises this client's radios.
    async fn update_radios(&self) -> Result<(), ClientError> {
        self.send(self.new_message_with_client(MsgType::RadioUpdate))
            .await
    }

    /// Authenticates as an external AWACS with the configured password.
    async fn connect_external_awacs_mode(&self) -> Result<(), ClientError> {
        let mut message = self.new_message_with_client(MsgType::ExternalAwacsModePassword);
        message.external_awacs_mode_password = Some(self.external_awacs_mode_password.clone());
        self.send(message).await
    }
}
