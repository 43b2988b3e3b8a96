//! Infrastructure layer: repositories, reads, the client facade, projections and the
//! outbox relay.

pub mod client;
pub mod clock;
pub mod event_store;
pub mod link_by_metadata;
pub mod outbox;
pub mod page;
pub mod projection;
mod runtime;
pub mod specification;

#[cfg(test)]
mod integration_tests;
#[cfg(test)]
mod test_database;

pub use client::{Batches, Client, Read};
pub use clock::{Clock, SystemClock, TickingClock};
pub use event_store::{InMemoryRepository, PostgresRepository, Repository};
pub use link_by_metadata::LinkByMetadata;
pub use page::{Page, PageLink, PageLinks, PagePosition};
pub use projection::Projection;
pub use specification::{Direction, Specification, Start};
