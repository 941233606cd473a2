//! In-memory statistics window
//!
//! Counters, bounded latency buffers and per-key access counts accumulated
//! between two persistence cycles. The window is plain data; locking is the
//! owner's job (see [`StatisticsEngine`](super::StatisticsEngine)).

use std::cmp::Ordering;
use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// Kind of recorded operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Hit,
    Miss,
    Set,
    Delete,
    Error,
}

// =============================================================================
// Latency Buffer
// =============================================================================

/// FIFO of latency samples in milliseconds, oldest evicted first
#[derive(Debug, Clone)]
pub struct LatencyBuffer {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl LatencyBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity.min(4096)),
            capacity,
        }
    }

    pub fn push(&mut self, latency_ms: f64) {
        if self.capacity == 0 {
            return;
        }
        while self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(latency_ms);
    }

    /// Put `older` samples in front of ours, keeping the newest `capacity`
    pub fn prepend(&mut self, older: LatencyBuffer) {
        let mut merged = older.samples;
        merged.extend(self.samples.drain(..));
        while merged.len() > self.capacity {
            merged.pop_front();
        }
        self.samples = merged;
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Samples in arrival order
    pub fn samples(&self) -> Vec<f64> {
        self.samples.iter().copied().collect()
    }
}

// =============================================================================
// Key Access
// =============================================================================

/// Access counters for one key
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyAccess {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub last_access: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl KeyAccess {
    fn new(at: DateTime<Utc>) -> Self {
        Self {
            hits: 0,
            misses: 0,
            sets: 0,
            deletes: 0,
            last_access: at,
            metadata: None,
        }
    }

    pub fn total(&self) -> u64 {
        self.hits + self.misses + self.sets + self.deletes
    }

    fn absorb(&mut self, older: KeyAccess) {
        self.hits += older.hits;
        self.misses += older.misses;
        self.sets += older.sets;
        self.deletes += older.deletes;
        self.last_access = self.last_access.max(older.last_access);
        if self.metadata.is_none() {
            self.metadata = older.metadata;
        }
    }
}

// =============================================================================
// Window
// =============================================================================

/// Statistics accumulated since the last successful persistence
#[derive(Debug, Clone)]
pub struct StatWindow {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub errors: u64,

    /// Hits and misses
    pub latencies: LatencyBuffer,
    pub hit_latencies: LatencyBuffer,
    pub miss_latencies: LatencyBuffer,
    pub set_latencies: LatencyBuffer,
    pub delete_latencies: LatencyBuffer,

    pub key_access: HashMap<String, KeyAccess>,
    max_key_tracking: usize,

    pub start_time: DateTime<Utc>,
    pub last_reset: DateTime<Utc>,
}

impl StatWindow {
    pub fn new(max_latencies: usize, max_key_tracking: usize) -> Self {
        let now = Utc::now();
        Self {
            hits: 0,
            misses: 0,
            sets: 0,
            deletes: 0,
            errors: 0,
            latencies: LatencyBuffer::new(max_latencies),
            hit_latencies: LatencyBuffer::new(max_latencies),
            miss_latencies: LatencyBuffer::new(max_latencies),
            set_latencies: LatencyBuffer::new(max_latencies),
            delete_latencies: LatencyBuffer::new(max_latencies),
            key_access: HashMap::new(),
            max_key_tracking,
            start_time: now,
            last_reset: now,
        }
    }

    /// Record one operation
    pub fn record(
        &mut self,
        op: Operation,
        latency_ms: f64,
        key: Option<&str>,
        metadata: Option<Value>,
        track_keys: bool,
    ) {
        match op {
            Operation::Hit => {
                self.hits += 1;
                self.latencies.push(latency_ms);
                self.hit_latencies.push(latency_ms);
            }
            Operation::Miss => {
                self.misses += 1;
                self.latencies.push(latency_ms);
                self.miss_latencies.push(latency_ms);
            }
            Operation::Set => {
                self.sets += 1;
                self.set_latencies.push(latency_ms);
            }
            Operation::Delete => {
                self.deletes += 1;
                self.delete_latencies.push(latency_ms);
            }
            Operation::Error => {
                self.errors += 1;
                return;
            }
        }

        if let (true, Some(key)) = (track_keys, key) {
            self.track_key(op, key, metadata);
        }
    }

    fn track_key(&mut self, op: Operation, key: &str, metadata: Option<Value>) {
        let now = Utc::now();
        let access = self
            .key_access
            .entry(key.to_string())
            .or_insert_with(|| KeyAccess::new(now));

        match op {
            Operation::Hit => access.hits += 1,
            Operation::Miss => access.misses += 1,
            Operation::Set => access.sets += 1,
            Operation::Delete => access.deletes += 1,
            Operation::Error => {}
        }
        access.last_access = now;
        if metadata.is_some() {
            access.metadata = metadata;
        }

        if self.key_access.len() > self.max_key_tracking {
            self.enforce_key_cap();
        }
    }

    /// Keep only the top `max_key_tracking` keys by total access.
    /// Ties keep the more recently accessed key.
    fn enforce_key_cap(&mut self) {
        let excess = self.key_access.len().saturating_sub(self.max_key_tracking);
        match excess {
            0 => {}
            // A single new key: drop the coldest entry in one pass
            1 => {
                let coldest = self
                    .key_access
                    .iter()
                    .max_by(|a, b| hotter_first(a.1, b.1))
                    .map(|(key, _)| key.clone());
                if let Some(key) = coldest {
                    self.key_access.remove(&key);
                }
            }
            _ if self.max_key_tracking == 0 => self.key_access.clear(),
            _ => {
                let mut ranked: Vec<(String, KeyAccess)> = self.key_access.drain().collect();
                ranked.select_nth_unstable_by(self.max_key_tracking, |a, b| {
                    hotter_first(&a.1, &b.1)
                });
                ranked.truncate(self.max_key_tracking);
                self.key_access = ranked.into_iter().collect();
            }
        }
    }

    /// Total operations of any kind
    pub fn operations(&self) -> u64 {
        self.hits + self.misses + self.sets + self.deletes + self.errors
    }

    pub fn is_empty(&self) -> bool {
        self.operations() == 0 && self.key_access.is_empty()
    }

    /// Swap in a fresh window and return the old one
    pub fn take(&mut self) -> StatWindow {
        let fresh = StatWindow::new(self.latencies.capacity(), self.max_key_tracking);
        std::mem::replace(self, fresh)
    }

    /// Fold an older, unpersisted window back into this one
    pub fn absorb(&mut self, older: StatWindow) {
        self.hits += older.hits;
        self.misses += older.misses;
        self.sets += older.sets;
        self.deletes += older.deletes;
        self.errors += older.errors;

        self.latencies.prepend(older.latencies);
        self.hit_latencies.prepend(older.hit_latencies);
        self.miss_latencies.prepend(older.miss_latencies);
        self.set_latencies.prepend(older.set_latencies);
        self.delete_latencies.prepend(older.delete_latencies);

        for (key, access) in older.key_access {
            match self.key_access.get_mut(&key) {
                Some(current) => current.absorb(access),
                None => {
                    self.key_access.insert(key, access);
                }
            }
        }
        self.enforce_key_cap();

        self.start_time = self.start_time.min(older.start_time);
        self.last_reset = older.last_reset;
    }
}

/// Orders higher totals first, then more recent access
fn hotter_first(a: &KeyAccess, b: &KeyAccess) -> Ordering {
    b.total()
        .cmp(&a.total())
        .then(b.last_access.cmp(&a.last_access))
}

// =============================================================================
// Tests
// =============================================================================
