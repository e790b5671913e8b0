//! Store seam between the engine and its collaborators.
//!
//! Three contracts: `ObservationStore` (read-only, populated by external
//! collectors), `LinkStore` (append-only, dedup-on-conflict), and
//! `ProfileStore` (versioned channel profiles, vocabulary, cycle cursor).
//! Each has an in-memory implementation for tests and single-process runs
//! and a Postgres implementation for deployment. Engine code only ever
//! sees the traits: `cargo test` needs no network, no database, no Docker.

pub mod links;
pub mod observations;
pub mod postgres;
pub mod profiles;

pub use links::{LinkStore, MemoryLinkStore, UpsertOutcome};
pub use observations::{MemoryObservationStore, ObservationStore};
pub use postgres::{migrate, PgLinkStore, PgObservationStore, PgProfileStore};
pub use profiles::{MemoryProfileStore, ProfileStore};
