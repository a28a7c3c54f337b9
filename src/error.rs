//! Error taxonomy, one enum per failure domain.
//!
//! Propagation policy:
//! - `SchemaError` is fatal and surfaces during setup, before any
//!   encode/decode is attempted.
//! - `EncodeError` means the supplied instance does not conform to its type.
//! - `DecodeError` is recoverable per example: it is expected when decoding
//!   model-generated sequences, and callers substitute a placeholder instead
//!   of aborting the batch.
//! - `PadError` signals an encoder/schema defect or malformed model arrays,
//!   not a normal data condition.

use thiserror::Error;

/// Malformed or unresolvable schema declarations.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// Bad descriptor document: invalid JSON, unknown `base` tag, wrong
    /// field shapes. Carries the JSON path of the offending node.
    #[error("malformed schema document at {path}: {message}")]
    Parse { path: String, message: String },

    #[error("duplicate type name `{0}`")]
    DuplicateName(String),

    #[error("`{context}` references unregistered type `{reference}`")]
    Unresolved { context: String, reference: String },

    #[error("enum `{0}` declares no options")]
    EmptyEnum(String),

    #[error("schema document declares no types")]
    Empty,
}

/// The instance handed to `encode` does not conform to the schema.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("at `{at}`: expected {expected}, got {got}")]
    Mismatch {
        at: String,
        expected: &'static str,
        got: &'static str,
    },

    #[error("`{tag}` is not an option of enum `{name}`")]
    UnknownOption { name: String, tag: String },
}

/// Decode failure. Deliberately a single variant: decode is lenient about
/// output values, so the only way it can fail is running out of tokens.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// A structurally required step (enum, presence, base) had no token left.
    #[error("token sequence exhausted before the structure was complete")]
    SequenceExhausted,
}

/// Batch arities or dimensions cannot be reconciled into rectangular form.
#[derive(Debug, Error)]
pub enum PadError {
    #[error("ragged batch cannot be made rectangular: {0}")]
    Shape(String),

    #[error("choice index {got} out of range for state `{state}` (arity {arity})")]
    Arity {
        state: String,
        got: usize,
        arity: usize,
    },

    #[error("state id {0} outside the schema state table")]
    StateOutOfRange(i64),
}
