//! Core traits and types for the Chronicle event-sourcing library.
//!
//! This crate provides the persistence abstractions:
//!
//! - [`event`] - Domain event contracts (`DomainEvent`, `EventSet`)
//! - [`transcoder`] - Structured payload <-> bytes codec with a registry of
//!   type adapters
//! - [`compressor`] / [`cipher`] - Optional byte-level transforms for stored
//!   state
//! - [`mapper`] - Composition of the three into `DomainEvent` <->
//!   `StoredEvent` conversion
//! - [`recorder`] - The recorder hierarchy (aggregate / application /
//!   tracking / process) and its reference in-memory implementation
//! - [`store`] - The typed `EventStore` over a mapper and a recorder
//! - [`subscription`] - Ordered live-tailing subscriptions
//! - [`runner`] - Driving projections over a subscription with a durable
//!   cursor
//! - [`env`] - Environment-style configuration
//!
//! Most users should depend on the `chronicle` crate, which re-exports these
//! types together with the database-backed recorder crates.

pub mod cipher;
pub mod compressor;
pub mod env;
pub mod event;
pub mod mapper;
pub mod recorder;
pub mod runner;
pub mod store;
pub mod subscription;
pub mod transcoder;
