//! Contradiction handling for the Noema belief graph.
//!
//! - [`ContradictionEngine`] finds existing beliefs that conflict with a new
//!   one, links them with `CONTRADICTS` edges and invalidates superseded facts.
//! - [`Classifier`] is the judging collaborator; [`HeuristicClassifier`] works
//!   offline, [`StructuredClassifier`] wraps a model completion backend.
//! - [`AlertStore`] keeps the resulting alerts and broadcasts them.

pub mod alerts;
pub mod classifier;
pub mod engine;
pub mod error;
pub mod heuristic;

pub use alerts::AlertStore;
pub use classifier::{
    Classifier, CompletionBackend, ContradictionJudgment, StructuredClassifier,
};
pub use engine::{build_alert, ContradictedItem, ContradictionEngine, ContradictionMatch};
pub use error::{ClassifierError, ContradictionError, Result};
pub use heuristic::HeuristicClassifier;
