use std::collections::HashMap;

use log::debug;
use tokio::sync::RwLock;

use crate::types::{ClientInfo, Guid, RadioInfo};

/// Directory of the other SRS clients deemed relevant: same or spectator
/// coalition, sharing at least one tuned frequency with us. Written by the
/// data-plane router, read concurrently by the audio receive path.
pub struct PeerDirectory {
    peers: RwLock<HashMap<Guid, ClientInfo>>,
}

impl PeerDirectory {
    pub fn new() -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
        }
    }

    /// Applies the single-peer rule: store the peer when it is coalition
    /// compatible and on frequency with us, drop it otherwise. Our own GUID
    /// is never stored.
    pub async fn sync_peer(&self, local: &ClientInfo, other: ClientInfo) {
        if other.guid == local.guid {
            return;
        }
        if other.radio_info.radios.is_empty() {
            return;
        }

        let tuned: Vec<String> = other
            .radio_info
            .radios
            .iter()
            .filter(|radio| radio.is_tuned())
            .map(|radio| format!("{:.3}", radio.frequency / 1_000_000.0))
            .collect();
        debug!(
            "synced with SRS client {:?} (unit {}, [{}] MHz)",
            other.name,
            other.radio_info.unit_id,
            tuned.join(", ")
        );

        let same_coalition =
            other.coalition == local.coalition || other.coalition.is_spectator();
        let on_frequency = local.radio_info.is_on_frequency(&other.radio_info);

        let mut peers = self.peers.write().await;
        if same_coalition && on_frequency {
            peers.insert(other.guid.clone(), other);
        } else {
            peers.remove(&other.guid);
        }
    }

    /// Applies [`Self::sync_peer`] to each entry of a sync batch.
    pub async fn sync_peers(&self, local: &ClientInfo, others: Vec<ClientInfo>) {
        for other in others {
            self.sync_peer(local, other).await;
        }
    }

    pub async fn remove(&self, guid: &Guid) {
        self.peers.write().await.remove(guid);
    }

    pub async fn contains(&self, guid: &Guid) -> bool {
        self.peers.read().await.contains_key(guid)
    }

    /// True when a stored peer has the given display name and shares a
    /// frequency with the given local radios.
    pub async fn is_name_on_frequency(&self, name: &str, local: &RadioInfo) -> bool {
        self.peers
            .read()
            .await
            .values()
            .any(|peer| peer.name == name && local.is_on_frequency(&peer.radio_info))
    }

    /// Number of stored peers sharing a frequency with the given local radios.
    pub async fn clients_on_frequency(&self, local: &RadioInfo) -> usize {
        self.peers
            .read()
            .await
            .values()
            .filter(|peer| local.is_on_frequency(&peer.radio_info))
            .count()
    }

    pub async fn len(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.peers.read().await.is_empty()
    }
}

impl Default for PeerDirectory {
    fn default() -> Self {
        Self::new()
    }
}
