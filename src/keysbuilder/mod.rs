//! Key-graph resolution for autoupdate requests.
//!
//! Clients describe what they want to observe as a tree: root objects,
//! their fields, and relation fields that point at further objects. The
//! resolver flattens that tree into the concrete set of datastore keys,
//! refetching relation values as needed because each level's ids come
//! from the previous level's data.
//!
//! ```text
//! request body ──► seed generation ──► fetch relation values ──► next
//!                        ▲                                        │
//!                        └────────── until no relations left ◄────┘
//! ```
//!
//! [`KeysBuilder`] holds the result and can be re-resolved with
//! [`KeysBuilder::update`] when relation values change.

mod builder;
mod request;

pub use builder::KeysBuilder;
pub use request::{Body, FieldDescription, Fields};
