//! Analyzer pool and classification capability.
//!
//! This crate provides:
//! - The `Classifier` capability trait and its call context
//! - A bounded slot pool that enforces timeouts and cooperative cancellation
//! - An HTTP client for an external moderation service

pub mod classifier;
pub mod error;
pub mod http;
pub mod pool;

pub use classifier::{AnalysisContext, Classifier, ProgressReporter};
pub use error::{AnalyzerError, AnalyzerResult, ClassifyError};
pub use http::{HttpClassifier, HttpClassifierConfig};
pub use pool::{AnalyzerPool, PoolConfig, Slot};
