//! Drive external phylogenetics tools (RAxML-NG, GeneRax) as managed jobs:
//! assemble their inputs, run them with a live log, and collect results
//! into a stable output directory with run provenance.

pub mod assemble;
pub mod cli;
pub mod config;
pub mod dataset;
pub mod engine;
pub mod error;
pub mod model;
pub mod orchestrator;
mod text_summary;
pub mod tree;

pub use error::{JobError, Result};
