use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::mem;
use std::sync::{Mutex, PoisonError};

use time::{Duration, OffsetDateTime};

use crate::principal::{PrincipalEntry, PrincipalName};

/// Pre-authentication timestamp seen by the KDC.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReplayCacheRecord {
    /// Lookup key of the client principal (`name@realm`).
    pub principal: String,
    pub ctime: OffsetDateTime,
    pub cusec: u32,
}

impl ReplayCacheRecord {
    pub fn new(principal: &PrincipalName, realm: &str, ctime: OffsetDateTime, cusec: u32) -> Self {
        Self {
            principal: PrincipalEntry::lookup_key(principal, realm),
            ctime,
            cusec,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayVerdict {
    /// First time the record is seen within the retention window. It is recorded now.
    Fresh,
    Replay,
}

/// Cache of recently verified pre-authentication timestamps.
///
/// RFC (https://www.rfc-editor.org/rfc/rfc4120#section-3.1.2):
/// > ...the KDC may also store the timestamp in a replay cache and reject the request
/// > if it has already been seen.
pub trait ReplayCache: Send + Sync + fmt::Debug {
    /// Atomically checks whether the record has been seen within the retention window and records it.
    fn check_and_record(&self, record: ReplayCacheRecord, now: OffsetDateTime) -> ReplayVerdict;
}

/// [ReplayCache] guarded by a single lock.
///
/// Records are indexed by their expiration time, so each check only evicts what has already expired.
#[derive(Debug)]
pub struct InMemoryReplayCache {
    retention: Duration,
    records: Mutex<Records>,
}

#[derive(Debug, Default)]
struct Records {
    seen: HashMap<ReplayCacheRecord, OffsetDateTime>,
    by_expiry: BTreeMap<OffsetDateTime, Vec<ReplayCacheRecord>>,
}

impl Records {
    fn evict_expired(&mut self, now: OffsetDateTime) {
        let alive = self.by_expiry.split_off(&now);
        let expired = mem::replace(&mut self.by_expiry, alive);

        for record in expired.into_values().flatten() {
            self.seen.remove(&record);
        }
    }
}

impl InMemoryReplayCache {
    pub fn new(retention: Duration) -> Self {
        Self {
            retention,
            records: Mutex::new(Records::default()),
        }
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ReplayCache for InMemoryReplayCache {
    fn check_and_record(&self, record: ReplayCacheRecord, now: OffsetDateTime) -> ReplayVerdict {
        // The map stays consistent even if a previous holder panicked.
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);

        records.evict_expired(now);

        if records.seen.contains_key(&record) {
            return ReplayVerdict::Replay;
        }

        // A retention too large to be represented keeps the record forever.
        if let Some(expires_at) = now.checked_add(self.retention) {
            records.by_expiry.entry(expires_at).or_default().push(record.clone());
        }
        records.seen.insert(record, now);

        ReplayVerdict::Fresh
    }
}
