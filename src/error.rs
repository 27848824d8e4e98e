//! Typed failure results for table operations.
//!
//! Lookup misses are reported as `None` by the individual tables; the only
//! operation with a dedicated error is inserting a duplicate key into a
//! unique-key hash-backed table. Misuse conditions (dropping a non-empty
//! table) are diagnosed through the `log` facade instead of return values.

use thiserror::Error;

/// Failure to insert into a unique-key hash-backed table.
///
/// The tree- and list-backed unique tables alias the resident entry when a
/// duplicate is inserted; the hash-backed tables refuse instead, leaving
/// the resident entry and its use-count untouched.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum InsertError {
    /// The table already holds an entry under this key.
    #[error("operation not supported: the table already holds this key")]
    DuplicateKey,
}
