//! Transform classification.
//!
//! Given the graph of a query and the graph of its rewrite, name the
//! rewrite technique from the structural diff alone.

pub mod classifier;
pub mod diff;
pub mod signature;

pub use classifier::{
    Classification, ClassificationFlag, Confidence, NO_CHANGE, TransformLabel, UNCLASSIFIED,
    classify, classify_diff,
};
pub use diff::{CteSplit, Delta, GraphDiff};
pub use signature::{Change, DiffPredicate, TransformSignature};
