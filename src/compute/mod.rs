//! Evaluation strategies that drain a graph's dirty set.
pub mod config;
pub mod evaluator;
pub mod parallel;
pub mod serial;
pub mod task;

pub use config::{EvaluatorConfig, Strategy};
pub use evaluator::Evaluator;
pub use parallel::ParallelEvaluator;
pub use serial::SerialEvaluator;
pub use task::NodeCall;
