//! Consumer-side view of a cache node

use super::key::CacheKey;
use crate::errors::SyncError;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    /// Never fetched, or skipped
    Idle,
    /// First fetch in flight, no value yet
    Loading,
    Ready,
    Error,
}

/// Snapshot of a node's state at the time it was read
///
/// A node in `Error` may still carry the last good value; a `Ready` node
/// with `is_refreshing` set is being revalidated in the background.
#[derive(Debug, Clone)]
pub struct Node<V> {
    pub key: Option<CacheKey>,
    pub status: NodeStatus,
    pub value: Option<V>,
    pub error: Option<SyncError>,
    pub is_refreshing: bool,
    pub is_stale: bool,
    pub last_fetched_at: Option<DateTime<Utc>>,
}

impl<V> Node<V> {
    pub fn idle(key: Option<CacheKey>) -> Self {
        Self {
            key,
            status: NodeStatus::Idle,
            value: None,
            error: None,
            is_refreshing: false,
            is_stale: false,
            last_fetched_at: None,
        }
    }

    pub fn ready(key: Option<CacheKey>, value: V) -> Self {
        Self {
            status: NodeStatus::Ready,
            value: Some(value),
            ..Self::idle(key)
        }
    }

    pub fn failed(key: Option<CacheKey>, error: SyncError) -> Self {
        Self {
            status: NodeStatus::Error,
            error: Some(error),
            ..Self::idle(key)
        }
    }

    pub fn is_idle(&self) -> bool {
        self.status == NodeStatus::Idle
    }

    pub fn is_loading(&self) -> bool {
        self.status == NodeStatus::Loading
    }

    pub fn is_ready(&self) -> bool {
        self.status == NodeStatus::Ready
    }

    pub fn has_error(&self) -> bool {
        self.status == NodeStatus::Error
    }

    pub fn value(&self) -> Option<&V> {
        self.value.as_ref()
    }

    pub fn map<W>(self, f: impl FnOnce(V) -> W) -> Node<W> {
        Node {
            key: self.key,
            status: self.status,
            value: self.value.map(f),
            error: self.error,
            is_refreshing: self.is_refreshing,
            is_stale: self.is_stale,
            last_fetched_at: self.last_fetched_at,
        }
    }
}
