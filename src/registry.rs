//! In-memory directory of client-visible filters.

use std::{collections::HashMap, time::Duration};

use tokio::time::Instant;

use parking_lot::Mutex;

use crate::{
    VirtualFilterError,
    query::LogQuery,
    types::{DelegateInfo, FilterId, FilterKind},
};

/// One client-visible filter: its kind, delegate binding, query, and the
/// last time the client polled it.
#[derive(Clone, Debug)]
pub struct FilterRecord {
    /// What the filter streams.
    pub kind: FilterKind,
    /// The upstream filter this record is bound to. Never changes.
    pub delegate: DelegateInfo,
    /// The log query, present only for log filters.
    pub query: Option<LogQuery>,
    last_poll_at: Instant,
}

impl FilterRecord {
    /// Creates a record bound to the given delegate.
    #[must_use]
    pub fn new(kind: FilterKind, delegate: DelegateInfo, query: Option<LogQuery>) -> Self {
        Self { kind, delegate, query, last_poll_at: Instant::now() }
    }

    /// Time since the client last polled this filter.
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        self.last_poll_at.elapsed()
    }

    /// True if `node_url` is the delegate node this record is bound to.
    #[must_use]
    pub fn is_delegate_node(&self, node_url: &str) -> bool {
        self.delegate.node_url == node_url
    }
}

/// Mutex-guarded directory of filter records, keyed by client-visible id.
///
/// All operations are O(1) under the lock. A record returned by
/// [`FilterRegistry::get`] is a snapshot: the registry may drop the live
/// record concurrently, and callers must tolerate it vanishing.
#[derive(Debug, Default)]
pub struct FilterRegistry {
    filters: Mutex<HashMap<FilterId, FilterRecord>>,
}

impl FilterRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a record under a freshly issued id.
    ///
    /// # Errors
    ///
    /// Returns [`VirtualFilterError::Internal`] if the id is already present.
    /// Ids carry 128 bits of entropy, so a collision is an invariant
    /// violation rather than an expected outcome.
    pub fn add(&self, id: FilterId, record: FilterRecord) -> Result<(), VirtualFilterError> {
        let mut filters = self.filters.lock();
        if filters.contains_key(&id) {
            return Err(VirtualFilterError::internal(format!("duplicate filter id {id}")));
        }
        filters.insert(id, record);
        Ok(())
    }

    /// Snapshot of the record under `id`, if present.
    #[must_use]
    pub fn get(&self, id: FilterId) -> Option<FilterRecord> {
        self.filters.lock().get(&id).cloned()
    }

    /// Atomically removes and returns the record under `id`.
    #[must_use]
    pub fn remove(&self, id: FilterId) -> Option<FilterRecord> {
        self.filters.lock().remove(&id)
    }

    /// Refreshes the record's last-poll time. No-op if the record is gone.
    pub fn touch(&self, id: FilterId) {
        if let Some(record) = self.filters.lock().get_mut(&id) {
            record.last_poll_at = Instant::now();
        }
    }

    /// Atomically removes every record idle for at least `ttl`, calling
    /// `visitor` for each expired record before removal.
    ///
    /// The visitor runs under the registry lock and must not block; cascade
    /// work (delegate uninstalls) belongs after this call returns.
    pub fn reap_older_than(
        &self,
        ttl: Duration,
        mut visitor: impl FnMut(FilterId, &FilterRecord),
    ) -> usize {
        let mut filters = self.filters.lock();

        let expired: Vec<FilterId> = filters
            .iter()
            .filter(|(_, record)| record.idle_for() >= ttl)
            .map(|(id, _)| *id)
            .collect();

        for id in &expired {
            if let Some(record) = filters.get(id) {
                visitor(*id, record);
            }
            filters.remove(id);
        }

        expired.len()
    }

    /// Number of live records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.filters.lock().len()
    }

    /// True if no records are live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log_record(node_url: &str) -> FilterRecord {
        FilterRecord::new(
            FilterKind::Log,
            DelegateInfo::new(FilterId::random(), node_url),
            Some(LogQuery::new()),
        )
    }

    #[test]
    fn duplicate_ids_are_an_internal_error() {
        let registry = FilterRegistry::new();
        let id = FilterId::random();

        registry.add(id, log_record("http://n1:8545")).unwrap();
        let err = registry.add(id, log_record("http://n1:8545")).unwrap_err();

        assert!(matches!(err, VirtualFilterError::Internal(_)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn remove_is_atomic_and_idempotent() {
        let registry = FilterRegistry::new();
        let id = FilterId::random();
        registry.add(id, log_record("http://n1:8545")).unwrap();

        assert!(registry.remove(id).is_some());
        assert!(registry.remove(id).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn touch_keeps_a_record_out_of_the_reaper() {
        let registry = FilterRegistry::new();
        let stale = FilterId::random();
        let fresh = FilterId::random();
        registry.add(stale, log_record("http://n1:8545")).unwrap();
        registry.add(fresh, log_record("http://n1:8545")).unwrap();

        std::thread::sleep(Duration::from_millis(30));
        registry.touch(fresh);

        let mut reaped = Vec::new();
        let count =
            registry.reap_older_than(Duration::from_millis(20), |id, _| reaped.push(id));

        assert_eq!(count, 1);
        assert_eq!(reaped, vec![stale]);
        assert!(registry.get(stale).is_none());
        assert!(registry.get(fresh).is_some());
    }

    #[test]
    fn reap_visits_records_before_removal() {
        let registry = FilterRegistry::new();
        let id = FilterId::random();
        let record = log_record("http://n1:8545");
        let delegate = record.delegate.clone();
        registry.add(id, record).unwrap();

        std::thread::sleep(Duration::from_millis(10));

        let mut seen = None;
        registry.reap_older_than(Duration::ZERO, |_, record| {
            seen = Some(record.delegate.clone());
        });

        assert_eq!(seen, Some(delegate));
    }
}
