pub mod dispatcher;
pub mod event;
pub mod outcome;
pub mod scheduler;
pub mod worker;

use std::time::Duration;

use tokio::sync::watch;

/// Sleep for `delay` unless shutdown is signalled first. Returns `true` when
/// the caller should stop.
pub(crate) async fn sleep_or_shutdown(shutdown: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    if *shutdown.borrow() {
        return true;
    }
    tokio::select! {
        _ = tokio::time::sleep(delay) => false,
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
    }
}
