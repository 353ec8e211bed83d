//! `cohort-grouping`: strategy-pipeline grouping engine.
//!
//! Pure engine crate: receives a pre-loaded user pool and an ordered list of
//! strategies, returns the resulting groups plus summary data. Collaborator
//! seams (user source, group sink) are traits; only the CSV user source lives
//! here.

pub mod classifier;
pub mod config;
pub mod error;
pub mod group;
pub mod model;
pub mod report;
pub mod rules;
pub mod sink;
pub mod source;
pub mod strategy;
pub mod summary;

pub use classifier::{Classifier, PipelineContext, PipelineStep};
pub use config::PipelineConfig;
pub use error::GroupingError;
pub use group::Group;
pub use model::{Classification, User};
pub use strategy::{Strategy, StrategyKind, StrategyRun};
