//! Single-Model Analyzer
//!
//! One AI judgment over a whole change: sanitise, short-circuit on threats,
//! render the prompt, call the model with bounded output and greedy
//! sampling, and parse the answer. Unusable answers become the
//! fail-closed verdict.

pub mod prompt;

pub use prompt::{render_prompt, PromptContext, SYSTEM_PROMPT};

use std::sync::Arc;

use tracing::{debug, instrument};

use crate::collaborator::{LanguageModel, PromptRequest};
use crate::defense::{self, detect_threats, parse_verdict, sanitize_context, sanitize_files};
use crate::domain::{AnalysisVerdict, ChangeRequest, FileDelta, ModelResult};
use crate::obs;

/// Output budget for one verdict; the JSON answer is a few hundred tokens.
pub const MAX_OUTPUT_TOKENS: u32 = 500;

pub struct SingleModelAnalyzer {
    model: Arc<dyn LanguageModel>,
    max_output_tokens: u32,
    temperature: f32,
}

impl SingleModelAnalyzer {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self {
            model,
            max_output_tokens: MAX_OUTPUT_TOKENS,
            temperature: 0.0,
        }
    }

    pub fn model_id(&self) -> &str {
        self.model.model_id()
    }

    /// Analyse `files` of `change`.
    ///
    /// `Err` only when the model could not be reached; every other failure
    /// is folded into a fail-closed verdict.
    #[instrument(skip_all, fields(change = %change.id, model = %self.model.model_id()))]
    pub async fn analyze(&self, files: &[FileDelta], change: &ChangeRequest) -> ModelResult<AnalysisVerdict> {
        let context = sanitize_context(change);
        let sanitized = sanitize_files(files);

        if detect_threats(&context, &sanitized) {
            obs::emit_threat_detected(&defense::threat_details(&context, &sanitized));
            return Ok(AnalysisVerdict::threat_detected());
        }

        let prompt = render_prompt(
            &PromptContext {
                id: &change.id,
                author: &change.author.login,
                association: change.author_association,
                sanitized: &context,
            },
            &sanitized,
        );
        let request = PromptRequest {
            system: SYSTEM_PROMPT.to_string(),
            prompt,
            max_output_tokens: self.max_output_tokens,
            temperature: self.temperature,
        };

        let raw = self.model.generate(&request).await?;
        let verdict = parse_verdict(&raw);
        debug!(
            category = ?verdict.category,
            flagged = ?verdict.flagged_dimensions(),
            "model verdict parsed"
        );
        Ok(verdict)
    }
}
