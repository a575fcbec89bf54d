//! Admissibility gates for pathology fixes.
//!
//! A pathology is admissible for a query only when every blocker gate
//! passes; failed high and medium gates lower its confidence instead.

pub mod catalog;
pub mod evaluator;
pub mod predicate;

pub use catalog::{Candidates, FailAction, Gate, GateKind, Pathology, Severity};
pub use evaluator::{
    CostBasis, GateVerdict, Outcome, PathologyVerdict, Target, evaluate, evaluate_pathology,
};
pub use predicate::{Flag, NodeMetric, Predicate, Quantifier};
