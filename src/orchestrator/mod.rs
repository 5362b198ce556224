//! Application-level orchestration.
//!
//! This module owns the calculation lifecycle (prepare, run, collect,
//! record). CLI and library callers drive calculations through
//! [`generate_ml_tree`] and [`reconcile`] and receive [`JobEvent`]s while
//! the external tool runs.
//!
//! [`JobEvent`]: crate::model::JobEvent

mod controller;
pub mod post_process;
pub mod prepare;
pub mod record;

pub use controller::{generate_ml_tree, reconcile, MlTreeRequest, ReconcileRequest, RunSummary};
pub use post_process::Collected;
pub use prepare::{prepare_calc, CarriedTree, PreparedRun};
pub use record::{read_record, record, RUN_RECORD_FILE};
