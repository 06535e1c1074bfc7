// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! One event through classify and project.
//!
//! Every failure here is per-event: it is logged, counted and the event is
//! dropped. Nothing is retried or requeued.

use thiserror::Error;
use tracing::{debug, warn};

use crate::classify::{Classifier, Transition, TransitionKind};
use crate::feed::event::{routing_of, DecodeError, RawEvent};
use crate::metrics::{self, ProjectionTimer};
use crate::projector::{CacheProjector, Projection, ProjectionError, SkipReason};

#[derive(Error, Debug)]
pub enum EventError {
    #[error("Undecodable change event: {0}")]
    Decode(#[from] DecodeError),
    #[error("{transition} projection failed: {source}")]
    Projection {
        transition: TransitionKind,
        #[source]
        source: ProjectionError,
    },
}

impl EventError {
    /// Metric label for the drop.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Decode(_) => "decode",
            Self::Projection { source: ProjectionError::Cache(_), .. } => "cache",
            Self::Projection { source: ProjectionError::Store(_), .. } => "store",
        }
    }
}

#[derive(Debug)]
pub enum EventOutcome {
    Applied(TransitionKind),
    Skipped(TransitionKind, SkipReason),
    Ignored(&'static str),
    /// The feed is dead; the loop must stop.
    Invalidated,
    Dropped(EventError),
}

pub struct EventProcessor {
    classifier: Classifier,
    projector: CacheProjector,
}

impl EventProcessor {
    pub fn new(classifier: Classifier, projector: CacheProjector) -> Self {
        Self { classifier, projector }
    }

    pub fn projector(&self) -> &CacheProjector {
        &self.projector
    }

    pub async fn handle(&self, raw: &RawEvent) -> EventOutcome {
        let operation = routing_of(raw).1.unwrap_or("unknown");
        metrics::record_event_received(operation);

        let transition = match self.classifier.classify(raw) {
            Ok(transition) => transition,
            Err(e) => {
                warn!(operation, error = %e, "Dropping undecodable change event");
                metrics::record_event_dropped("decode");
                return EventOutcome::Dropped(e.into());
            }
        };

        let kind = transition.kind();
        match &transition {
            Transition::Invalidated => return EventOutcome::Invalidated,
            Transition::Ignored { id, reason } => {
                debug!(operation, tenant_id = ?id, reason, "Change event ignored");
                metrics::record_projection(kind.as_str(), "skipped", reason);
                return EventOutcome::Ignored(*reason);
            }
            _ => {}
        }

        let tenant_id = transition.tenant_id().map(ToString::to_string).unwrap_or_default();
        let _timer = ProjectionTimer::new(kind.as_str());
        match self.projector.apply(&transition).await {
            Ok(Projection::Applied) => {
                metrics::record_projection(kind.as_str(), "applied", "");
                EventOutcome::Applied(kind)
            }
            Ok(Projection::Skipped(reason)) => {
                debug!(%tenant_id, transition = %kind, reason = reason.as_str(), "Projection skipped");
                metrics::record_projection(kind.as_str(), "skipped", reason.as_str());
                EventOutcome::Skipped(kind, reason)
            }
            Err(source) => {
                let err = EventError::Projection { transition: kind, source };
                warn!(%tenant_id, transition = %kind, error = %err, "Dropping change event");
                metrics::record_event_dropped(err.reason());
                EventOutcome::Dropped(err)
            }
        }
    }
}
