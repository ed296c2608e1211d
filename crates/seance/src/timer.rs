//! The liveness timer: a single re-armable deadline driving the
//! suspicion / ping / expiry protocol.
//!
//! The timer owns no session state. Arming points write the next
//! deadline into a watch channel; a spawned task sleeps until the
//! deadline (or until it is replaced) and fires the observer through a
//! weak reference, so a session with no live handles is torn down
//! rather than kept alive by its own timer.

use std::sync::Weak;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{self, Instant};

/// Receives timer expirations.
pub(crate) trait TimerObserver: Send + Sync {
    fn on_deadline(&self);
}

/// Handle used to arm and disarm the timer task.
#[derive(Debug)]
pub(crate) struct LivenessTimer {
    deadline: watch::Sender<Option<Instant>>,
}

impl LivenessTimer {
    /// Create the handle and the receiver half for [`spawn`].
    pub(crate) fn new() -> (Self, watch::Receiver<Option<Instant>>) {
        let (tx, rx) = watch::channel(None);
        (Self { deadline: tx }, rx)
    }

    /// Arm (or re-arm) the timer to fire `after` from now.
    pub(crate) fn schedule(&self, after: Duration) {
        let _ = self.deadline.send(Some(Instant::now() + after));
    }

    /// Disarm the timer. A concurrent expiry may still be in flight;
    /// observers must tolerate spurious calls.
    pub(crate) fn deschedule(&self) {
        let _ = self.deadline.send(None);
    }
}

/// Spawn the timer task. It exits when the [`LivenessTimer`] handle is
/// dropped or the observer is gone.
pub(crate) fn spawn<T: TimerObserver + 'static>(
    rx: watch::Receiver<Option<Instant>>,
    observer: Weak<T>,
) {
    tokio::spawn(run(rx, observer));
}

async fn run<T: TimerObserver>(mut rx: watch::Receiver<Option<Instant>>, observer: Weak<T>) {
    loop {
        let deadline = *rx.borrow_and_update();
        match deadline {
            Some(at) => {
                tokio::select! {
                    changed = rx.changed() => {
                        if changed.is_err() {
                            return;
                        }
                    }
                    _ = time::sleep_until(at) => {
                        let Some(observer) = observer.upgrade() else {
                            return;
                        };
                        observer.on_deadline();
                        drop(observer);
                        // The handler may have re-armed. If it did not,
                        // park until the next schedule rather than
                        // refiring on the stale deadline.
                        match rx.has_changed() {
                            Ok(true) => {}
                            Ok(false) => {
                                if rx.changed().await.is_err() {
                                    return;
                                }
                            }
                            Err(_) => return,
                        }
                    }
                }
            }
            None => {
                if rx.changed().await.is_err() {
                    return;
                }
            }
        }
    }
}
