//! Outbound adapters implementing domain ports for external infrastructure.
//!
//! - **persistence**: PostgreSQL transactions via SQLx
//!
//! Adapters translate between driver types and domain types. They contain no
//! business logic.

pub mod persistence;
