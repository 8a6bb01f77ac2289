//! deepcheck - deepfake analysis dispatcher
//!
//! Accepts analysis requests for uploaded media, routes them to an external
//! detection provider or a heuristic fallback depending on the caller's
//! quota, records one analysis per request, and returns a normalized
//! result.

pub mod config;
pub mod detection;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod server;
pub mod store;

pub use dispatch::{AnalysisRequest, AnalysisResponse, Dispatcher};
pub use error::{DispatchError, DispatchResult, FailureResponse};
