//! Multi-Model Consensus Engine
//!
//! Fans one prompt out to every configured model in parallel, each call
//! individually time-boxed, then aggregates the answers:
//!
//! - a model votes only if its confidence meets its own threshold
//! - unanimity among voters decides `alters_behavior`; any split rejects
//! - veto dimensions are OR-reduced over voters
//! - category is the plurality among voters
//!
//! # Modules
//!
//! - [`aggregate`]: pure vote aggregation over collected answers

pub mod aggregate;

pub use aggregate::{aggregate, ModelAnswer};

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::analyzer::{MAX_OUTPUT_TOKENS, SYSTEM_PROMPT};
use crate::collaborator::{LanguageModel, PromptRequest};
use crate::defense::parse_verdict;
use crate::domain::{AnalysisVerdict, ConsensusVerdict, ModelError, ModelResult};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// One participating model.
#[derive(Clone)]
pub struct ModelSpec {
    pub model: Arc<dyn LanguageModel>,
    /// Lower runs first in reports; thresholds must not decrease with priority.
    pub priority: u32,
    /// Minimum reported confidence for this model's answer to vote.
    pub required_confidence: f64,
}

impl fmt::Debug for ModelSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelSpec")
            .field("model", &self.model.model_id())
            .field("priority", &self.priority)
            .field("required_confidence", &self.required_confidence)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// Per-model call budget.
    #[serde(with = "duration_secs")]
    pub per_model_timeout: Duration,
    /// Models that must answer, and must qualify, for a usable consensus.
    pub min_models: usize,
    pub max_prompt_bytes: usize,
    pub max_output_tokens: u32,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            per_model_timeout: Duration::from_secs(30),
            min_models: 2,
            max_prompt_bytes: 50_000,
            max_output_tokens: MAX_OUTPUT_TOKENS,
        }
    }
}

/// Threshold for the model at `index` under the default ladder.
pub fn default_threshold(index: usize) -> f64 {
    (0.80 + 0.05 * index as f64).min(1.0)
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConsensusError {
    #[error("need at least {required} models for consensus, have {configured}")]
    TooFewModels { configured: usize, required: usize },

    #[error("invalid confidence thresholds: {0}")]
    InvalidThresholds(String),

    #[error("prompt cannot be empty")]
    EmptyPrompt,

    #[error("prompt exceeds maximum size: {size} > {max} bytes")]
    PromptTooLarge { size: usize, max: usize },

    #[error("insufficient models succeeded: {succeeded}/{required} ({})", .failures.join("; "))]
    InsufficientSuccesses {
        succeeded: usize,
        required: usize,
        failures: Vec<String>,
    },

    #[error("consensus analysis cancelled")]
    Cancelled,
}

pub type ConsensusResult<T> = std::result::Result<T, ConsensusError>;

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ConsensusEngine {
    models: Vec<ModelSpec>,
    config: ConsensusConfig,
}

impl ConsensusEngine {
    /// Build an engine over `models`, ordered by priority.
    pub fn new(mut models: Vec<ModelSpec>, config: ConsensusConfig) -> ConsensusResult<Self> {
        let required = config.min_models.max(2);
        if models.len() < required {
            return Err(ConsensusError::TooFewModels {
                configured: models.len(),
                required,
            });
        }
        models.sort_by_key(|m| m.priority);

        for spec in &models {
            if !(0.0..=1.0).contains(&spec.required_confidence) {
                return Err(ConsensusError::InvalidThresholds(format!(
                    "{} has threshold {} outside [0, 1]",
                    spec.model.model_id(),
                    spec.required_confidence
                )));
            }
        }
        for pair in models.windows(2) {
            if pair[1].required_confidence < pair[0].required_confidence {
                return Err(ConsensusError::InvalidThresholds(format!(
                    "{} ({}) is stricter than lower-priority {} ({})",
                    pair[0].model.model_id(),
                    pair[0].required_confidence,
                    pair[1].model.model_id(),
                    pair[1].required_confidence
                )));
            }
        }

        Ok(Self { models, config })
    }

    /// Build an engine with the 0.80, 0.85, 0.90... threshold ladder.
    pub fn with_default_thresholds(
        models: Vec<Arc<dyn LanguageModel>>,
        config: ConsensusConfig,
    ) -> ConsensusResult<Self> {
        let specs = models
            .into_iter()
            .enumerate()
            .map(|(i, model)| ModelSpec {
                model,
                priority: i as u32,
                required_confidence: default_threshold(i),
            })
            .collect();
        Self::new(specs, config)
    }

    pub fn models(&self) -> &[ModelSpec] {
        &self.models
    }

    pub fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    /// Ask every model about `prompt` and aggregate the answers.
    ///
    /// Waits for every launched call (each bounded by the per-model timeout)
    /// before aggregating. Cancelling `cancel` aborts every call in flight.
    #[instrument(skip_all, fields(models = self.models.len(), prompt_bytes = prompt.len()))]
    pub async fn analyze_with_consensus(
        &self,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> ConsensusResult<ConsensusVerdict> {
        if prompt.trim().is_empty() {
            return Err(ConsensusError::EmptyPrompt);
        }
        if prompt.len() > self.config.max_prompt_bytes {
            return Err(ConsensusError::PromptTooLarge {
                size: prompt.len(),
                max: self.config.max_prompt_bytes,
            });
        }

        let request = Arc::new(PromptRequest {
            system: SYSTEM_PROMPT.to_string(),
            prompt: prompt.to_string(),
            max_output_tokens: self.config.max_output_tokens,
            temperature: 0.0,
        });
        let timeout = self.config.per_model_timeout;

        let mut join_set = JoinSet::new();
        for (idx, spec) in self.models.iter().enumerate() {
            let model = Arc::clone(&spec.model);
            let request = Arc::clone(&request);
            join_set.spawn(async move {
                let outcome = match tokio::time::timeout(timeout, model.generate(&request)).await {
                    Ok(Ok(raw)) => Ok(parse_verdict(&raw)),
                    Ok(Err(err)) => Err(err),
                    Err(_) => Err(ModelError::Timeout(timeout)),
                };
                (idx, outcome)
            });
        }

        let mut slots: Vec<Option<ModelResult<AnalysisVerdict>>> =
            (0..self.models.len()).map(|_| None).collect();
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    join_set.abort_all();
                    return Err(ConsensusError::Cancelled);
                }
                joined = join_set.join_next() => match joined {
                    None => break,
                    Some(Ok((idx, outcome))) => slots[idx] = Some(outcome),
                    Some(Err(err)) => warn!(error = %err, "consensus model task failed"),
                },
            }
        }

        let mut answers = Vec::with_capacity(self.models.len());
        let mut failures = Vec::new();
        for (spec, slot) in self.models.iter().zip(slots) {
            let id = spec.model.model_id().to_string();
            match slot {
                Some(Ok(verdict)) => {
                    debug!(model = %id, confidence = verdict.confidence, "model answered");
                    answers.push(ModelAnswer {
                        model: id,
                        required_confidence: spec.required_confidence,
                        verdict,
                    });
                }
                Some(Err(err)) => {
                    warn!(model = %id, error = %err, "model call failed");
                    failures.push(format!("{id}: {err}"));
                }
                None => failures.push(format!("{id}: task did not complete")),
            }
        }

        if answers.len() < self.config.min_models {
            return Err(ConsensusError::InsufficientSuccesses {
                succeeded: answers.len(),
                required: self.config.min_models,
                failures,
            });
        }

        Ok(aggregate(&answers, self.config.min_models))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Category;
    use crate::fakes::ScriptedModel;

    fn benign(id: &str) -> Arc<dyn LanguageModel> {
        Arc::new(ScriptedModel::answering(
            id,
            &AnalysisVerdict::benign(Category::Typo, "Fixes a typo in docs"),
        ))
    }

    #[test]
    fn test_needs_two_models() {
        let err = ConsensusEngine::with_default_thresholds(vec![benign("a")], ConsensusConfig::default())
            .unwrap_err();
        assert_eq!(
            err,
            ConsensusError::TooFewModels {
                configured: 1,
                required: 2
            }
        );
    }

    #[test]
    fn test_default_threshold_ladder() {
        let engine = ConsensusEngine::with_default_thresholds(
            vec![benign("a"), benign("b"), benign("c")],
            ConsensusConfig::default(),
        )
        .unwrap();
        let thresholds: Vec<f64> = engine.models().iter().map(|m| m.required_confidence).collect();
        assert!((thresholds[0] - 0.80).abs() < 1e-9);
        assert!((thresholds[1] - 0.85).abs() < 1e-9);
        assert!((thresholds[2] - 0.90).abs() < 1e-9);
        assert_eq!(default_threshold(10), 1.0);
    }

    #[test]
    fn test_decreasing_thresholds_rejected() {
        let specs = vec![
            ModelSpec {
                model: benign("a"),
                priority: 0,
                required_confidence: 0.9,
            },
            ModelSpec {
                model: benign("b"),
                priority: 1,
                required_confidence: 0.8,
            },
        ];
        let err = ConsensusEngine::new(specs, ConsensusConfig::default()).unwrap_err();
        assert!(matches!(err, ConsensusError::InvalidThresholds(_)));
    }

    #[tokio::test]
    async fn test_prompt_bounds() {
        let engine = ConsensusEngine::with_default_thresholds(
            vec![benign("a"), benign("b")],
            ConsensusConfig::default(),
        )
        .unwrap();
        let cancel = CancellationToken::new();
        assert_eq!(
            engine.analyze_with_consensus("  ", &cancel).await.unwrap_err(),
            ConsensusError::EmptyPrompt
        );
        let big = "x".repeat(50_001);
        assert!(matches!(
            engine.analyze_with_consensus(&big, &cancel).await.unwrap_err(),
            ConsensusError::PromptTooLarge { size: 50_001, .. }
        ));
    }
}
