//! Event stream storage boundary.
//!
//! [`Repository`] is the contract every storage backend implements. Two backends ship
//! with the crate: [`InMemoryRepository`] for tests and single-process use, and
//! [`PostgresRepository`] for durable storage. The [`lint`] suite (feature `lint`)
//! checks a backend against the contract.

pub mod in_memory;
#[cfg(any(test, feature = "lint"))]
pub mod lint;
pub mod postgres;
pub mod repository;

pub use in_memory::InMemoryRepository;
pub use postgres::PostgresRepository;
pub use repository::Repository;
