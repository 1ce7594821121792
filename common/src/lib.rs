//! Shared data model for the FidoNet testing fabric.
//!
//! This crate has no async runtime dependency — it is pure data types and
//! small pieces of logic (phone normalization, prefix matching, API key
//! hashing) reused by both `server` and `daemon`, and by `emsi` for the
//! `Address` type carried in parsed EMSI data.

pub mod address;
pub mod auth;
pub mod dial;
pub mod dto;
pub mod phone;
pub mod protocol_details;
pub mod queue_entry;

pub use address::{address_list_contains, Address};
pub use auth::{constant_time_eq, hash_api_key, verify_api_key};
pub use dial::{DialFailureReason, DialResult};
pub use protocol_details::ProtocolDetails;
pub use queue_entry::{
    CallerConfig, CallerStatus, CallerStatusKind, PrefixMode, QueueEntry, QueueKey, QueueStatus,
};
