//! Detection outcomes.
//!
//! A dispatch ends in exactly one [`Detection`]: either the provider's
//! answer or a fallback result. All response and record shaping hangs off
//! this type so the branches never duplicate it.

pub mod fallback;
pub mod provider;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

pub use fallback::FallbackResult;
pub use provider::{
    provider_from_config, DetectionProvider, ProviderError, ProviderRequest, ProviderResponse,
    ProviderResult, ProviderVerdict, RealityDefenderProvider,
};

/// Method tag stored on every analysis record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    RealityDefender,
    FallbackHeuristic,
    FallbackApiError,
}

impl DetectionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionMethod::RealityDefender => "reality_defender",
            DetectionMethod::FallbackHeuristic => "fallback_heuristic",
            DetectionMethod::FallbackApiError => "fallback_api_error",
        }
    }

    /// The coarser method reported to the caller: both fallback variants
    /// collapse to `"fallback"`.
    pub fn response_method(&self) -> &'static str {
        match self {
            DetectionMethod::RealityDefender => "reality_defender",
            DetectionMethod::FallbackHeuristic | DetectionMethod::FallbackApiError => "fallback",
        }
    }
}

impl fmt::Display for DetectionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why the fallback generator ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackReason {
    /// Caller has no provider quota left (or no quota row at all).
    QuotaExhausted,
    /// The provider call failed.
    ProviderFailed,
}

/// Outcome of one dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum Detection {
    Provider(ProviderResponse),
    Fallback {
        result: FallbackResult,
        reason: FallbackReason,
    },
}

impl Detection {
    /// Run the fallback generator with the thread-local RNG.
    pub fn fallback(reason: FallbackReason) -> Self {
        Detection::Fallback {
            result: fallback::generate(&mut rand::thread_rng()),
            reason,
        }
    }

    pub fn method(&self) -> DetectionMethod {
        match self {
            Detection::Provider(_) => DetectionMethod::RealityDefender,
            Detection::Fallback {
                reason: FallbackReason::QuotaExhausted,
                ..
            } => DetectionMethod::FallbackHeuristic,
            Detection::Fallback {
                reason: FallbackReason::ProviderFailed,
                ..
            } => DetectionMethod::FallbackApiError,
        }
    }

    pub fn confidence(&self) -> f64 {
        match self {
            Detection::Provider(response) => response.verdict.confidence,
            Detection::Fallback { result, .. } => result.confidence,
        }
    }

    pub fn is_deepfake(&self) -> bool {
        match self {
            Detection::Provider(response) => response.verdict.is_deepfake(),
            Detection::Fallback { result, .. } => result.is_deepfake,
        }
    }

    /// The `result` object returned to the caller.
    pub fn summary(&self) -> DetectionSummary {
        match self {
            Detection::Provider(response) => DetectionSummary {
                confidence: response.verdict.confidence,
                is_deepfake: response.verdict.is_deepfake(),
                prediction: response.verdict.prediction.clone(),
                detailed_analysis: response.verdict.detailed_analysis.clone(),
                analysis_method: None,
                note: None,
            },
            Detection::Fallback { result, .. } => DetectionSummary {
                confidence: result.confidence,
                is_deepfake: result.is_deepfake,
                prediction: result.prediction.clone(),
                detailed_analysis: None,
                analysis_method: Some(result.analysis_method.clone()),
                note: Some(result.note.clone()),
            },
        }
    }

    /// The opaque payload persisted as the record's raw result.
    pub fn raw_payload(&self) -> Value {
        match self {
            Detection::Provider(response) => response.raw.clone(),
            Detection::Fallback { result, .. } => {
                serde_json::to_value(result).unwrap_or(Value::Null)
            }
        }
    }
}

/// Normalized detection result as seen by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionSummary {
    pub confidence: f64,
    pub is_deepfake: bool,
    pub prediction: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detailed_analysis: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis_method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}
