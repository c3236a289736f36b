use thiserror::Error;

use crate::decoration::DecorationKind;
use crate::host::NodeRef;
use crate::pool::RecordId;

/// The host markup did not contain something the engine needs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractionError {
    #[error("row {row:?} has no {field} element")]
    MissingField { row: NodeRef, field: &'static str },
    #[error("node {0:?} is no longer part of the host tree")]
    Detached(NodeRef),
    #[error("unexpected markup in row {row:?}: {detail}")]
    Unexpected { row: NodeRef, detail: String },
}

/// Decoration pool invariant violations.
///
/// These are programming errors. The row view turns them into a panic at the point of
/// detection instead of letting a corrupted pool keep running.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("record {0:?} was already swept")]
    StaleRecord(RecordId),
    #[error("record {0:?} is not claimed")]
    NotClaimed(RecordId),
    #[error("a {0:?} decoration is already claimed in this row group")]
    SingletonClaimed(DecorationKind),
    #[error("expected a {expected:?} record, found {found:?}")]
    KindMismatch {
        expected: DecorationKind,
        found: DecorationKind,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RowViewError {
    #[error("row view was destroyed")]
    Destroyed,
    #[error("node {0:?} is not a row")]
    NotARow(NodeRef),
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
}
