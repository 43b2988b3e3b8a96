//! Outbox relay daemon: configuration and wiring.

pub mod config;
