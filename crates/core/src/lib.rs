//! `eventline-core`: event-sourcing data model.
//!
//! Pure types shared by every other crate: event identity and records, streams, the
//! expected-version algorithm and the error taxonomy. No storage or dispatch concerns.

pub mod error;
pub mod event;
pub mod id;
pub mod record;
pub mod stream;
pub mod version;

pub use error::{EventStoreError, EventStoreResult};
pub use event::Event;
pub use id::EventId;
pub use record::{EventRecord, Metadata};
pub use stream::{GLOBAL_STREAM_NAME, Stream};
pub use version::{ExpectedVersion, compute_position};
