//! Session data model.
//!
//! A [`SessionRecord`] is what a provider persists. A [`SessionContext`] is the
//! cache-resident snapshot built from a record plus resolved security details,
//! and it carries a [`Count`] shared by every version of the same session.

mod context;
mod record;

pub use context::{Count, Release, SessionContext};
pub use record::{Expiry, SessionRecord};
