// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Synchronizer lifecycle: start, stop, processing loop.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::feed::{ChangeFeedSubscriber, Pulled, SubscriptionError};
use crate::metrics;

use super::processor::{EventOutcome, EventProcessor};
use super::{DirectorySynchronizer, SyncError, SyncState, SyncStats};

/// Publish a state change. Repeats are swallowed so metrics count real
/// transitions only.
pub(super) fn publish(state: &watch::Sender<SyncState>, next: SyncState) {
    let changed = state.send_if_modified(|current| {
        if *current == next {
            return false;
        }
        *current = next;
        true
    });
    if changed {
        debug!(state = %next, "Synchronizer state changed");
        metrics::record_state(&next.to_string().to_lowercase(), next.code());
    }
}

impl DirectorySynchronizer {
    /// Open the change feed and spawn the processing loop.
    ///
    /// Fails with [`SubscriptionError::AlreadyStarted`] while a loop is live.
    /// A loop that ended on its own (fatal feed error) is reaped first, so a
    /// supervisor can simply call `start()` again.
    #[tracing::instrument(skip(self), fields(collection = %self.filter.collection))]
    pub async fn start(&mut self) -> Result<(), SyncError> {
        if self.task.as_ref().is_some_and(|task| !task.is_finished()) {
            return Err(SubscriptionError::AlreadyStarted.into());
        }
        if let Some(task) = self.task.take() {
            self.cancel = None;
            if let Err(e) = task.await {
                warn!(error = %e, "Previous processing task ended abnormally");
            }
        }

        publish(&self.state, SyncState::Starting);
        let mut subscriber = ChangeFeedSubscriber::new(self.store.clone(), self.filter.clone());
        let cancel = match subscriber.start().await {
            Ok(cancel) => cancel,
            Err(e) => {
                error!(error = %e, "Failed to open change feed");
                publish(&self.state, SyncState::Stopped);
                return Err(e.into());
            }
        };

        // Running is published before the task exists so the task's own
        // Stopped can never be overwritten.
        publish(&self.state, SyncState::Running);
        let task = tokio::spawn(run_loop(
            subscriber,
            self.processor.clone(),
            self.state.clone(),
            self.stats.clone(),
        ));
        self.cancel = Some(cancel);
        self.task = Some(task);

        info!("Directory synchronizer running");
        Ok(())
    }

    /// Cancel the loop, wait for it, close the feed. No-op when stopped.
    ///
    /// An event already being projected finishes first.
    #[tracing::instrument(skip(self))]
    pub async fn stop(&mut self) -> Result<(), SyncError> {
        let Some(task) = self.task.take() else {
            return Ok(());
        };
        if self.state() != SyncState::Stopped {
            publish(&self.state, SyncState::Stopping);
        }
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }

        let result = match task.await {
            Ok(mut subscriber) => subscriber.stop().await.map_err(SyncError::from),
            Err(e) => Err(SyncError::Task(e.to_string())),
        };
        publish(&self.state, SyncState::Stopped);

        match &result {
            Ok(()) => info!("Directory synchronizer stopped"),
            Err(e) => warn!(error = %e, "Directory synchronizer stopped with errors"),
        }
        result
    }
}

/// Pull, classify, project until cancelled or the feed dies.
async fn run_loop(
    mut subscriber: ChangeFeedSubscriber,
    processor: Arc<EventProcessor>,
    state: Arc<watch::Sender<SyncState>>,
    stats: Arc<SyncStats>,
) -> ChangeFeedSubscriber {
    loop {
        match subscriber.pull().await {
            Pulled::Event(raw) => {
                let outcome = processor.handle(&raw).await;
                stats.record(&outcome);
                if matches!(outcome, EventOutcome::Invalidated) {
                    error!("Change feed invalidated upstream, listener stopping");
                    metrics::record_feed_terminated("invalidated");
                    break;
                }
            }
            Pulled::Cancelled => {
                debug!("Processing loop cancelled");
                return subscriber;
            }
            Pulled::Closed(Some(e)) => {
                error!(error = %e, "Change feed failed, listener stopping");
                metrics::record_feed_terminated("error");
                break;
            }
            Pulled::Closed(None) => {
                error!("Change feed ended upstream, listener stopping");
                metrics::record_feed_terminated("closed");
                break;
            }
        }
    }

    if let Err(e) = subscriber.stop().await {
        warn!(error = %e, "Failed to close change feed after termination");
    }
    publish(&state, SyncState::Stopped);
    subscriber
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_swallows_repeats() {
        let (tx, mut rx) = watch::channel(SyncState::Stopped);
        publish(&tx, SyncState::Stopped);
        assert!(!rx.has_changed().unwrap());

        publish(&tx, SyncState::Running);
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), SyncState::Running);
    }
}
