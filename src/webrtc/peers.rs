//! Peer table: last-known address per discovered peer.
//!
//! Mutated only by the discovery receive loop; read by anyone via immutable
//! snapshots. Entries are never expired individually, only cleared when
//! discovery stops.

use std::collections::HashMap;

use tokio::sync::RwLock;

use super::types::now_millis;

/// A discovered peer and where it was last heard from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    pub peer_id: String,
    pub address: String,
    pub last_seen: i64,
}

/// Concurrent map from peer id to last-known address.
#[derive(Debug, Default)]
pub struct PeerTable {
    peers: RwLock<HashMap<String, PeerRecord>>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or refresh a peer. Returns true if the peer was not known before.
    pub async fn upsert(&self, peer_id: &str, address: &str) -> bool {
        let mut peers = self.peers.write().await;
        let is_new = !peers.contains_key(peer_id);
        peers.insert(
            peer_id.to_string(),
            PeerRecord {
                peer_id: peer_id.to_string(),
                address: address.to_string(),
                last_seen: now_millis(),
            },
        );
        is_new
    }

    /// Immutable copy of the current entries. Never blocks on network I/O.
    pub async fn snapshot(&self) -> Vec<PeerRecord> {
        self.peers.read().await.values().cloned().collect()
    }

    pub async fn get(&self, peer_id: &str) -> Option<PeerRecord> {
        self.peers.read().await.get(peer_id).cloned()
    }

    pub async fn clear(&self) {
        self.peers.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.peers.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upsert_reports_new_vs_refresh() {
        let table = PeerTable::new();
        assert!(table.upsert("pixel7_ab12", "192.168.1.10").await);
        assert!(!table.upsert("pixel7_ab12", "192.168.1.10").await);
        assert_eq!(table.len().await, 1);
    }

    #[tokio::test]
    async fn refresh_updates_address() {
        let table = PeerTable::new();
        table.upsert("n1", "192.168.1.10").await;
        table.upsert("n1", "192.168.1.99").await;

        let rec = table.get("n1").await.unwrap();
        assert_eq!(rec.address, "192.168.1.99");
    }

    #[tokio::test]
    async fn snapshot_is_a_copy() {
        let table = PeerTable::new();
        table.upsert("n1", "192.168.1.10").await;

        let snap = table.snapshot().await;
        table.clear().await;

        // The snapshot survives a clear of the table.
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].peer_id, "n1");
        assert!(table.is_empty().await);
    }

    #[tokio::test]
    async fn clear_empties_the_table() {
        let table = PeerTable::new();
        table.upsert("n1", "1.1.1.1").await;
        table.upsert("n2", "1.1.1.2").await;
        table.clear().await;
        assert!(table.snapshot().await.is_empty());
    }
}
