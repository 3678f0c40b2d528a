//! autoapprove core library
//!
//! Decides whether a pull request is trivial and safe enough to approve
//! without a human: deterministic gates first, AI judgment last, and a
//! defense layer around every model call.
//!
//! Hosting platforms and language models are reached only through the
//! traits in [`collaborator`]; production clients live in sibling crates.

pub mod analyzer;
pub mod collaborator;
pub mod config;
pub mod consensus;
pub mod defense;
pub mod domain;
pub mod engine;
pub mod fakes;
pub mod obs;
pub mod retry;
pub mod runner;
pub mod telemetry;
pub mod validator;

pub use analyzer::{SingleModelAnalyzer, MAX_OUTPUT_TOKENS};

pub use collaborator::{HostingApi, LanguageModel, PromptRequest};

pub use config::{ActionConfig, AppConfig, ConfigError, EngineConfig, ModelsConfig, ServiceConfig};

pub use consensus::{ConsensusConfig, ConsensusEngine, ConsensusError, ModelSpec};

pub use domain::{
    AnalysisVerdict, Author, AuthorAssociation, Category, ChangeId, ChangeRequest, ChangeState,
    CheckConclusion, CheckRun, CheckRunStatus, CombinedStatus, CommentKind, CommentRecord,
    CommitStatus, ConsensusVerdict, Decision, EngineError, EngineResult, FileDelta, HostingError,
    HostingResult, ModelError, ModelResult, RepoPermission, ReviewRecord, ReviewState,
    StatusState, ValidationError, VetoFlags,
};

pub use engine::DecisionEngine;

pub use obs::{
    emit_action_failed, emit_action_step, emit_consensus_finished, emit_evaluation_finished,
    emit_evaluation_started, emit_gate_passed, emit_gate_rejected, emit_model_excluded,
    emit_model_result, emit_threat_detected, EvaluationSpan,
};

pub use retry::{RetryPolicy, Retryable};

pub use runner::{
    ActionOptions, ActionReport, ActionRunner, InFlightPermit, InFlightRegistry, ReviewError,
    ReviewOutcome, Reviewer, StepOutcome,
};

pub use telemetry::init_tracing;

/// Crate version, reported by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
