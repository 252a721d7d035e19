//! Client registry.
//!
//! Insertion-ordered set of `(session, descriptor)` pairs. Mutation is
//! serialized behind an `RwLock`; iteration always goes through
//! [`Registry::snapshot`] so it is safe against concurrent joins and
//! evictions. Locks are held briefly and never across delivery awaits.

use std::sync::Arc;

use tokio::sync::RwLock;

use brainhub_core::{ClientDescriptor, distance};

use crate::session::{Session, SessionId};

/// One registered client.
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    /// Delivery capability for this client.
    pub session: Arc<Session>,
    /// The client's immutable descriptor.
    pub descriptor: ClientDescriptor,
}

/// Insertion-ordered client registry.
#[derive(Debug, Default)]
pub struct Registry {
    entries: RwLock<Vec<RegistryEntry>>,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry. Returns the new registry size.
    pub async fn insert(&self, entry: RegistryEntry) -> usize {
        let mut entries = self.entries.write().await;
        entries.push(entry);
        entries.len()
    }

    /// Remove the entry owned by `session_id`. Idempotent: the first caller
    /// gets the removed entry, later callers get `None`.
    pub async fn remove_by_session(&self, session_id: SessionId) -> Option<RegistryEntry> {
        let mut entries = self.entries.write().await;
        let index = entries
            .iter()
            .position(|entry| entry.session.id() == session_id)?;
        Some(entries.remove(index))
    }

    /// Immutable copy of the registry, insertion order.
    pub async fn snapshot(&self) -> Vec<RegistryEntry> {
        self.entries.read().await.clone()
    }

    /// Current registry size.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the registry is empty.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Entry nearest to `probe` by vector distance, excluding the probe's
    /// own session. Ties break toward insertion order; non-finite distances
    /// are filtered out. `None` when no other entry qualifies.
    pub async fn find_nearest(
        &self,
        probe: &ClientDescriptor,
        exclude: SessionId,
    ) -> Option<(RegistryEntry, f64)> {
        let entries = self.entries.read().await;
        let mut best: Option<(RegistryEntry, f64)> = None;
        for entry in entries.iter() {
            if entry.session.id() == exclude {
                continue;
            }
            let d = distance(&probe.vector, &entry.descriptor.vector);
            if !d.is_finite() {
                continue;
            }
            // Strict comparison keeps the earliest-inserted entry on ties.
            if best.as_ref().is_none_or(|(_, current)| d < *current) {
                best = Some((entry.clone(), d));
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{DEFAULT_DELIVERY_TIMEOUT, Session};

    fn entry(id: &str, vector: Vec<f64>) -> RegistryEntry {
        // Delivery is not exercised here, so the receiver can drop.
        let (session, _rx) = Session::channel(4, DEFAULT_DELIVERY_TIMEOUT);
        RegistryEntry {
            session,
            descriptor: ClientDescriptor {
                id: id.into(),
                joined_at: "t".into(),
                vector,
            },
        }
    }

    #[tokio::test]
    async fn insert_remove_snapshot() {
        let registry = Registry::new();
        let a = entry("a", vec![0.0]);
        let a_session = a.session.id();
        assert_eq!(registry.insert(a).await, 1);
        assert_eq!(registry.insert(entry("b", vec![1.0])).await, 2);

        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].descriptor.id, "a");

        assert!(registry.remove_by_session(a_session).await.is_some());
        // Removal is idempotent.
        assert!(registry.remove_by_session(a_session).await.is_none());
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn nearest_excludes_probe_session() {
        let registry = Registry::new();
        let a = entry("a", vec![0.0, 0.0]);
        let a_session = a.session.id();
        registry.insert(a).await;

        let probe = ClientDescriptor {
            id: "a".into(),
            joined_at: "t".into(),
            vector: vec![0.0, 0.0],
        };
        assert!(registry.find_nearest(&probe, a_session).await.is_none());
    }

    #[tokio::test]
    async fn nearest_picks_minimum_distance() {
        let registry = Registry::new();
        registry.insert(entry("far", vec![10.0, 0.0])).await;
        registry.insert(entry("near", vec![1.0, 0.0])).await;
        let probe_entry = entry("probe", vec![0.0, 0.0]);
        let probe_session = probe_entry.session.id();
        let probe = probe_entry.descriptor.clone();
        registry.insert(probe_entry).await;

        let (nearest, d) = registry.find_nearest(&probe, probe_session).await.unwrap();
        assert_eq!(nearest.descriptor.id, "near");
        assert_eq!(d, 1.0);
    }

    #[tokio::test]
    async fn nearest_tie_breaks_by_insertion_order() {
        let registry = Registry::new();
        registry.insert(entry("first", vec![1.0])).await;
        registry.insert(entry("second", vec![1.0])).await;
        let probe_entry = entry("probe", vec![0.0]);
        let probe_session = probe_entry.session.id();
        let probe = probe_entry.descriptor.clone();
        registry.insert(probe_entry).await;

        let (nearest, _) = registry.find_nearest(&probe, probe_session).await.unwrap();
        assert_eq!(nearest.descriptor.id, "first");
    }

    #[tokio::test]
    async fn nearest_filters_non_finite() {
        let registry = Registry::new();
        // Empty vector → infinite distance → filtered.
        registry.insert(entry("void", vec![])).await;
        let probe_entry = entry("probe", vec![0.0]);
        let probe_session = probe_entry.session.id();
        let probe = probe_entry.descriptor.clone();
        registry.insert(probe_entry).await;

        assert!(registry.find_nearest(&probe, probe_session).await.is_none());
    }
}
