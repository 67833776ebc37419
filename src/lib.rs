//! Sequential multi-stage investment planning for electric vehicle depots.
//!
//! A plan is a sequence of stage years. For each stage, a scenario is built from a template and
//! the outcome of the previous stage, an external optimiser sizes the depot's assets and the
//! results are read back before moving on to the next stage.
#![warn(missing_docs)]
pub mod cli;
pub mod config;
pub mod error;
pub mod fleet;
pub mod id;
pub mod input;
pub mod log;
pub mod optimizer;
pub mod output;
pub mod pathway;
pub mod results;
pub mod scenario;
pub mod settings;
pub mod simulation;

#[cfg(test)]
mod fixture;
