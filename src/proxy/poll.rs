//! The dedicated polling task driving one proxy stub.

use std::sync::Arc;

use tokio::time::sleep;
use tracing::{debug, warn};

use crate::{
    ingest::LogStore,
    proxy::stub::{PollOutcome, ProxyStub},
    upstream::FilterRpc,
};

/// Runs the stub's poll loop until the stub closes.
///
/// Each pass sleeps until the polling interval has elapsed since the last
/// attempt, polls every delegate filter, and fans results out to cursors.
/// Upstream failures back off exponentially up to the configured cap; an
/// upstream filter-not-found invalidates the stub and ends the task. The
/// close signal cancels the task at its next suspension point.
pub(crate) async fn run<C: FilterRpc, S: LogStore>(stub: Arc<ProxyStub<C, S>>) {
    let mut close_rx = stub.subscribe_close();
    let mut backoff = stub.backoff_schedule();
    let mut delay = stub.polling_interval();

    debug!(node = %stub.node_url(), "Poll task started");

    loop {
        let wait = delay.saturating_sub(stub.since_last_poll());
        tokio::select! {
            changed = close_rx.changed() => {
                if changed.is_err() || *close_rx.borrow() {
                    break;
                }
                continue;
            }
            () = sleep(wait) => {}
        }

        match stub.poll_once().await {
            Ok(PollOutcome::Closed) => break,
            Ok(PollOutcome::Polled) => {
                delay = stub.polling_interval();
                backoff = stub.backoff_schedule();
            }
            Err(error) if error.is_filter_not_found() => {
                // The stub already invalidated its cursors.
                break;
            }
            Err(error) => {
                delay = backoff.next().unwrap_or_else(|| stub.max_polling_delay());
                warn!(
                    node = %stub.node_url(),
                    error = %error,
                    next_poll_in = ?delay,
                    "Upstream poll failed, backing off"
                );
            }
        }
    }

    debug!(node = %stub.node_url(), "Poll task exited");
    stub.on_poll_task_exit();
}
