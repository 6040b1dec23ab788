//! Conversation threads
//!
//! A thread is either local (created client-side, never sent) or backed by a
//! server conversation. The [`ThreadStore`] owns every thread; the session
//! and the reconciliation routine are its only writers, everything else
//! reads snapshots or subscribes to [`StoreEvent`]s.

mod events;
mod model;
mod store;
pub mod title;

pub use events::*;
pub use model::*;
pub use store::*;
