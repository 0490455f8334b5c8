//! Per-upstream-node proxy state: delegate filters, client cursors, and the
//! stub lifecycle.

use std::{
    collections::{HashMap, VecDeque},
    fmt,
    sync::Arc,
    time::Duration,
};

use alloy::rpc::types::Log;
use backon::{BackoffBuilder, ExponentialBuilder};
use parking_lot::Mutex;
use tokio::{sync::watch, time::Instant};
use tracing::{debug, trace, warn};

use crate::{
    VirtualFilterError,
    config::VirtualFilterConfig,
    ingest::{LogIngestor, LogStore},
    proxy::poll,
    query::LogQuery,
    types::{FilterId, LogBatch},
    upstream::FilterRpc,
};

/// Lifecycle of a proxy stub.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StubState {
    /// Created, no poll task yet.
    Idle,
    /// Poll task driving the delegate filters.
    Polling,
    /// Tearing down after the upstream dropped its filters; cursors are
    /// being invalidated.
    Closing,
    /// Fully torn down. Lookups against a closed stub fail with
    /// filter-not-found.
    Closed,
}

/// Per-client consumption state within a stub.
#[derive(Clone, Debug)]
struct FilterCursor {
    query: LogQuery,
    pending: VecDeque<Log>,
    last_seen_seq: u64,
}

impl FilterCursor {
    fn new(query: LogQuery) -> Self {
        Self { query, pending: VecDeque::new(), last_seen_seq: 0 }
    }
}

#[derive(Debug)]
struct StubInner {
    cursors: HashMap<FilterId, FilterCursor>,
    last_polled_at: Instant,
    state: StubState,
    seq: u64,
    poll_task_running: bool,
}

/// Result of one poll pass.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum PollOutcome {
    /// The stub has no cursors left (or was already closed) and the poll
    /// task should exit.
    Closed,
    /// Upstream was polled; pending buffers are up to date.
    Polled,
}

/// Proxy for one upstream node: owns the delegate filters installed there
/// and fans their change streams out to client cursors.
///
/// One upstream filter is maintained per client log filter, keyed by the
/// upstream filter id. Cursor mutations are serialized by the stub's mutex;
/// the poll task and client-facing calls contend only briefly (drain into a
/// local buffer, release, return).
pub struct ProxyStub<C, S> {
    node_url: String,
    client: Arc<C>,
    ingestor: LogIngestor<S>,
    polling_interval: Duration,
    max_polling_delay: Duration,
    close_tx: watch::Sender<bool>,
    inner: Mutex<StubInner>,
}

impl<C, S> fmt::Debug for ProxyStub<C, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyStub")
            .field("node_url", &self.node_url)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl<C, S> ProxyStub<C, S> {
    /// URL of the upstream node this stub proxies.
    #[must_use]
    pub fn node_url(&self) -> &str {
        &self.node_url
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> StubState {
        self.inner.lock().state
    }

    /// True once the stub has fully torn down.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self.state(), StubState::Closing | StubState::Closed)
    }

    /// Number of live cursors.
    #[must_use]
    pub fn cursor_count(&self) -> usize {
        self.inner.lock().cursors.len()
    }

    pub(crate) fn client(&self) -> &Arc<C> {
        &self.client
    }

    pub(crate) fn polling_interval(&self) -> Duration {
        self.polling_interval
    }

    pub(crate) fn max_polling_delay(&self) -> Duration {
        self.max_polling_delay
    }

    pub(crate) fn since_last_poll(&self) -> Duration {
        self.inner.lock().last_polled_at.elapsed()
    }

    pub(crate) fn subscribe_close(&self) -> watch::Receiver<bool> {
        self.close_tx.subscribe()
    }

    /// Exponential delay schedule for upstream failures, starting at the
    /// polling interval and capped at the maximum polling delay.
    pub(crate) fn backoff_schedule(&self) -> backon::ExponentialBackoff {
        ExponentialBuilder::default()
            .with_min_delay(self.polling_interval)
            .with_max_delay(self.max_polling_delay)
            .without_max_times()
            .build()
    }

    fn signal_close(&self) {
        let _ = self.close_tx.send(true);
    }
}

impl<C: FilterRpc, S: LogStore> ProxyStub<C, S> {
    /// Creates an idle stub for `client`'s node.
    #[must_use]
    pub fn new(client: Arc<C>, ingestor: LogIngestor<S>, config: &VirtualFilterConfig) -> Arc<Self> {
        let (close_tx, _) = watch::channel(false);
        Arc::new(Self {
            node_url: client.node_url().to_string(),
            client,
            ingestor,
            polling_interval: config.polling_interval,
            max_polling_delay: config.max_polling_delay,
            close_tx,
            inner: Mutex::new(StubInner {
                cursors: HashMap::new(),
                last_polled_at: Instant::now(),
                state: StubState::Idle,
                seq: 0,
                poll_task_running: false,
            }),
        })
    }

    /// Installs a delegate log filter upstream, registers a cursor for it,
    /// and makes sure the poll task is running.
    ///
    /// # Errors
    ///
    /// Propagates the upstream installation failure.
    pub async fn new_filter(
        self: Arc<Self>,
        query: &LogQuery,
    ) -> Result<FilterId, VirtualFilterError> {
        let fid = self.client.new_log_filter(query).await?;

        {
            let mut inner = self.inner.lock();
            let reopening = matches!(inner.state, StubState::Closing | StubState::Closed);
            inner.cursors.insert(fid, FilterCursor::new(query.clone()));
            inner.state = StubState::Polling;
            if reopening {
                // Clear a latched close signal before respawning the task.
                let _ = self.close_tx.send(false);
            }
        }

        debug!(node = %self.node_url, filter_id = %fid, "Installed delegate log filter");
        self.ensure_polling();
        Ok(fid)
    }

    /// Removes the cursor for `id` and uninstalls its upstream filter.
    /// Closes the stub when the last cursor goes away. Returns whether
    /// anything was removed.
    pub async fn uninstall_filter(&self, id: FilterId) -> bool {
        let removed = self.inner.lock().cursors.remove(&id).is_some();
        if !removed {
            return false;
        }

        if let Err(error) = self.client.uninstall_filter(id).await {
            warn!(
                node = %self.node_url,
                filter_id = %id,
                error = %error,
                "Failed to uninstall upstream filter"
            );
        }

        let now_empty = self.inner.lock().cursors.is_empty();
        if now_empty {
            self.close();
        }
        removed
    }

    /// Drains and returns the cursor's pending logs, in upstream delivery
    /// order.
    ///
    /// Triggers an on-demand poll when the cursor is empty and the last
    /// upstream poll is older than the polling interval.
    ///
    /// # Errors
    ///
    /// [`VirtualFilterError::FilterNotFound`] if the cursor (or the whole
    /// stub) is gone; upstream errors from an on-demand poll are proxied.
    pub async fn get_filter_changes(&self, id: FilterId) -> Result<Vec<Log>, VirtualFilterError> {
        let needs_poll = {
            let inner = self.inner.lock();
            if matches!(inner.state, StubState::Closing | StubState::Closed) {
                return Err(VirtualFilterError::FilterNotFound);
            }
            let cursor =
                inner.cursors.get(&id).ok_or(VirtualFilterError::FilterNotFound)?;
            cursor.pending.is_empty()
                && inner.last_polled_at.elapsed() >= self.polling_interval
        };

        if needs_poll {
            self.poll_once().await?;
        }

        let mut inner = self.inner.lock();
        let seq = inner.seq;
        let cursor = inner.cursors.get_mut(&id).ok_or(VirtualFilterError::FilterNotFound)?;
        trace!(
            filter_id = %id,
            drained = cursor.pending.len(),
            from_seq = cursor.last_seen_seq,
            to_seq = seq,
            "Draining cursor"
        );
        cursor.last_seen_seq = seq;
        Ok(cursor.pending.drain(..).collect())
    }

    /// The query the cursor was installed with.
    #[must_use]
    pub fn get_filter_context(&self, id: FilterId) -> Option<LogQuery> {
        self.inner.lock().cursors.get(&id).map(|cursor| cursor.query.clone())
    }

    /// Polls every delegate filter once, appending returned logs to their
    /// cursors and handing the combined batch to the ingestor.
    ///
    /// In the one-filter-per-cursor model the upstream already filtered by
    /// query, so appends are unconditional.
    ///
    /// # Errors
    ///
    /// An upstream filter-not-found invalidates the whole stub before the
    /// error is returned; other upstream errors leave cursors untouched for
    /// the caller to back off and retry.
    pub(crate) async fn poll_once(&self) -> Result<PollOutcome, VirtualFilterError> {
        let ids: Vec<FilterId> = {
            let mut inner = self.inner.lock();
            if matches!(inner.state, StubState::Closing | StubState::Closed) {
                return Ok(PollOutcome::Closed);
            }
            if inner.cursors.is_empty() {
                inner.state = StubState::Closed;
                drop(inner);
                self.signal_close();
                return Ok(PollOutcome::Closed);
            }
            // Mark the attempt up front so the interval (and any backoff)
            // is measured from the start of this poll.
            inner.last_polled_at = Instant::now();
            inner.cursors.keys().copied().collect()
        };

        let mut batch_logs: Vec<Log> = Vec::new();
        for id in ids {
            let changes = match self.client.get_filter_changes(id).await {
                Ok(changes) => changes,
                Err(error) if error.is_filter_not_found() => {
                    self.close_with_invalidate();
                    return Err(error);
                }
                Err(error) => return Err(error),
            };

            let logs = changes.into_logs();
            if logs.is_empty() {
                continue;
            }

            {
                let mut inner = self.inner.lock();
                inner.seq += 1;
                // The cursor may have been uninstalled while we were
                // suspended on the upstream call; drop its logs then.
                if let Some(cursor) = inner.cursors.get_mut(&id) {
                    cursor.pending.extend(logs.iter().cloned());
                }
            }
            batch_logs.extend(logs);
        }

        if !batch_logs.is_empty() {
            self.ingestor.spawn_ingest(LogBatch::from_logs(batch_logs));
        }

        Ok(PollOutcome::Polled)
    }

    /// Transitions the stub to closed and stops the poll task.
    pub(crate) fn close(&self) {
        {
            let mut inner = self.inner.lock();
            if inner.state == StubState::Closed {
                return;
            }
            inner.state = StubState::Closed;
        }
        debug!(node = %self.node_url, "Proxy stub closed");
        self.signal_close();
    }

    /// Invalidates every cursor and closes the stub. Used when the upstream
    /// reports its filters gone: dependent client filters must fail with
    /// filter-not-found from here on.
    pub(crate) fn close_with_invalidate(&self) {
        let dropped = {
            let mut inner = self.inner.lock();
            inner.state = StubState::Closing;
            let dropped = inner.cursors.len();
            inner.cursors.clear();
            inner.state = StubState::Closed;
            dropped
        };
        warn!(
            node = %self.node_url,
            invalidated_cursors = dropped,
            "Upstream dropped delegate filters, invalidating stub"
        );
        self.signal_close();
    }

    /// Spawns the poll task if it is not already running.
    pub(crate) fn ensure_polling(self: Arc<Self>) {
        {
            let mut inner = self.inner.lock();
            if inner.poll_task_running {
                return;
            }
            inner.poll_task_running = true;
        }
        tokio::spawn(poll::run(self));
    }

    /// Called by the poll task on exit; respawns if new cursors raced in.
    pub(crate) fn on_poll_task_exit(self: Arc<Self>) {
        let respawn = {
            let mut inner = self.inner.lock();
            inner.poll_task_running = false;
            inner.state == StubState::Polling && !inner.cursors.is_empty()
        };
        if respawn {
            self.ensure_polling();
        }
    }
}
