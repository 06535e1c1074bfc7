// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Change feed consumption: wire shape and the cancellable subscriber.

pub mod event;
pub mod subscriber;

pub use event::{ChangeEvent, DecodeError, RawEvent, UpdateDescription};
pub use subscriber::{ChangeFeedSubscriber, Pulled, SubscriptionError, TeardownError};
