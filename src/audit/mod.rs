//! Tamper-evident audit trail
//!
//! Hash-chained entries over pluggable append-only storage, with a
//! serialized writer and a read-only query/verification service.

pub mod entry;
pub mod query;
pub mod store;
pub mod writer;

pub use entry::{seal_batch, AuditAction, AuditDraft, AuditEntry, GENESIS_HASH};
pub use query::{AuditFilter, AuditQueryService, ChainVerification};
pub use store::{AuditStore, FileAuditStore, InMemoryAuditStore};
pub use writer::AuditWriter;
