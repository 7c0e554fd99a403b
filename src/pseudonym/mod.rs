//! Subject pseudonymization
//!
//! Deterministic per-subject pseudonyms and date-shift offsets, with optional
//! escrow for policies that authorize re-identification.

pub mod escrow;
pub mod generator;

pub use escrow::{EscrowStore, InMemoryEscrowStore};
pub use generator::{PseudonymBinding, PseudonymGenerator};
