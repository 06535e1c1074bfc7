// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Change feed subscriber: owns one cursor and a cancellable pull.

use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::store::{ChangeFeed, FeedError, FeedFilter, RecordStore};

use super::event::RawEvent;

#[derive(Error, Debug)]
pub enum SubscriptionError {
    #[error("Subscriber already has an open feed")]
    AlreadyStarted,
    #[error(transparent)]
    Open(#[from] FeedError),
}

#[derive(Error, Debug)]
#[error("Failed to tear down change feed: {0}")]
pub struct TeardownError(#[source] pub FeedError);

/// Result of one [`ChangeFeedSubscriber::pull`].
#[derive(Debug)]
pub enum Pulled {
    Event(RawEvent),
    /// Cancellation was requested; no further events are yielded.
    Cancelled,
    /// The feed ended upstream, with the cause if there was one.
    Closed(Option<FeedError>),
}

pub struct ChangeFeedSubscriber {
    store: Arc<dyn RecordStore>,
    filter: FeedFilter,
    feed: Option<Box<dyn ChangeFeed>>,
    cancel: CancellationToken,
}

impl ChangeFeedSubscriber {
    pub fn new(store: Arc<dyn RecordStore>, filter: FeedFilter) -> Self {
        Self {
            store,
            filter,
            feed: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn filter(&self) -> &FeedFilter {
        &self.filter
    }

    pub fn is_active(&self) -> bool {
        self.feed.is_some()
    }

    /// Open the cursor. Returns the token that cancels pulls on this subscription.
    pub async fn start(&mut self) -> Result<CancellationToken, SubscriptionError> {
        if self.feed.is_some() {
            return Err(SubscriptionError::AlreadyStarted);
        }
        let feed = self.store.watch(&self.filter).await?;
        self.cancel = CancellationToken::new();
        self.feed = Some(feed);
        info!(
            database = %self.filter.database,
            collection = %self.filter.collection,
            "Change feed opened"
        );
        Ok(self.cancel.clone())
    }

    /// Wait for the next event or for cancellation.
    ///
    /// An event already being delivered when cancellation fires is not lost
    /// from the cursor; feeds are cancel-safe.
    pub async fn pull(&mut self) -> Pulled {
        let Some(feed) = self.feed.as_mut() else {
            return Pulled::Closed(None);
        };
        if self.cancel.is_cancelled() {
            return Pulled::Cancelled;
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Pulled::Cancelled,
            next = feed.next_event() => match next {
                Ok(Some(event)) => Pulled::Event(event),
                Ok(None) => Pulled::Closed(None),
                Err(e) => Pulled::Closed(Some(e)),
            },
        }
    }

    /// Cancel and close the cursor. Without an open cursor this is a no-op.
    pub async fn stop(&mut self) -> Result<(), TeardownError> {
        self.cancel.cancel();
        let Some(mut feed) = self.feed.take() else {
            return Ok(());
        };
        feed.close().await.map_err(TeardownError)?;
        debug!("Change feed closed");
        Ok(())
    }
}
