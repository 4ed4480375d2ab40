//! Per-session counters

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters updated by the session loops
#[derive(Debug)]
pub struct SessionStats {
    started_at: DateTime<Utc>,
    datagrams_received: AtomicU64,
    bytes_received: AtomicU64,
    partial_frames: AtomicU64,
    heartbeats_received: AtomicU64,
}

impl SessionStats {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            datagrams_received: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            partial_frames: AtomicU64::new(0),
            heartbeats_received: AtomicU64::new(0),
        }
    }

    pub fn record_datagram(&self, len: usize, whole_frames: bool) {
        self.datagrams_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(len as u64, Ordering::Relaxed);
        if !whole_frames {
            self.partial_frames.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_heartbeat(&self) {
        self.heartbeats_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            started_at: self.started_at,
            datagrams_received: self.datagrams_received.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            partial_frames: self.partial_frames.load(Ordering::Relaxed),
            heartbeats_received: self.heartbeats_received.load(Ordering::Relaxed),
        }
    }
}

impl Default for SessionStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of [`SessionStats`]
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub started_at: DateTime<Utc>,
    pub datagrams_received: u64,
    pub bytes_received: u64,
    /// Datagrams whose length was not a whole number of audio frames
    pub partial_frames: u64,
    pub heartbeats_received: u64,
}
