// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Remote event idempotency.
//!
//! Workers re-deliver events when the uplink flaps. The host keeps a bounded
//! LRU of `(team_run_id, source_node_id, source_event_id)` keys stamped with
//! the time they were first seen. At capacity the least recently touched key
//! is evicted. The TTL counts from first sight and is not extended by repeats.

use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::debug;

use crate::domain::clock::{Clock, SystemClock};
use crate::domain::node_config::IdempotencyConfig;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteEventKey {
    pub team_run_id: String,
    pub source_node_id: String,
    pub source_event_id: String,
}

impl RemoteEventKey {
    pub fn new(
        team_run_id: impl Into<String>,
        source_node_id: impl Into<String>,
        source_event_id: impl Into<String>,
    ) -> Self {
        Self {
            team_run_id: team_run_id.into(),
            source_node_id: source_node_id.into(),
            source_event_id: source_event_id.into(),
        }
    }
}

pub struct RemoteEventIdempotencyPolicy {
    seen: Mutex<LruCache<RemoteEventKey, i64>>,
    ttl_ms: i64,
    clock: Arc<dyn Clock>,
}

impl RemoteEventIdempotencyPolicy {
    pub fn new(ttl_ms: i64, max_entries: usize) -> Self {
        let capacity = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            seen: Mutex::new(LruCache::new(capacity)),
            ttl_ms,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn from_config(config: &IdempotencyConfig) -> Self {
        Self::new(config.ttl_ms, config.max_entries)
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// `false` the first time a key is seen within the TTL window, `true` for
    /// every repeat inside it.
    pub fn should_drop_duplicate(&self, key: &RemoteEventKey) -> bool {
        let now = self.clock.now_ms();
        let mut seen = self.seen.lock();

        if let Some(&first_seen) = seen.get(key) {
            if now - first_seen < self.ttl_ms {
                debug!(
                    team_run_id = %key.team_run_id,
                    source_node_id = %key.source_node_id,
                    source_event_id = %key.source_event_id,
                    "Duplicate remote event"
                );
                return true;
            }
        }

        seen.put(key.clone(), now);
        false
    }

    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.lock().is_empty()
    }
}

impl Default for RemoteEventIdempotencyPolicy {
    fn default() -> Self {
        Self::from_config(&IdempotencyConfig::default())
    }
}
