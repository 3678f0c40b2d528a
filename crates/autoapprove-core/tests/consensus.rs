//! Multi-model consensus: fan-out, timeouts, cancellation and aggregation.

use std::sync::Arc;
use std::time::Duration;

use autoapprove_core::consensus::ModelSpec;
use autoapprove_core::fakes::ScriptedModel;
use autoapprove_core::{
    AnalysisVerdict, Category, ConsensusConfig, ConsensusEngine, ConsensusError, LanguageModel,
    ModelError,
};
use tokio_util::sync::CancellationToken;

const PROMPT: &str = "Pull request: acme/widgets#7\nFile: src/lib.rs\n-let a = 1;\n+let a = 2;";

fn verdict(alters: bool, confidence: f64) -> AnalysisVerdict {
    let mut v = AnalysisVerdict::benign(Category::Refactor, "Renames a local constant");
    v.alters_behavior = alters;
    v.confidence = confidence;
    v
}

fn model(id: &str, v: &AnalysisVerdict) -> Arc<ScriptedModel> {
    Arc::new(ScriptedModel::answering(id, v))
}

fn engine(models: &[Arc<ScriptedModel>]) -> ConsensusEngine {
    engine_with(models, ConsensusConfig::default())
}

fn engine_with(models: &[Arc<ScriptedModel>], config: ConsensusConfig) -> ConsensusEngine {
    let models: Vec<Arc<dyn LanguageModel>> = models
        .iter()
        .map(|m| m.clone() as Arc<dyn LanguageModel>)
        .collect();
    ConsensusEngine::with_default_thresholds(models, config).unwrap()
}

#[tokio::test]
async fn test_unanimous_no_change_approves() {
    let models = [model("a", &verdict(false, 0.9)), model("b", &verdict(false, 0.95))];
    let result = engine(&models)
        .analyze_with_consensus(PROMPT, &CancellationToken::new())
        .await
        .unwrap();

    assert!(result.agreement);
    assert!(result.approved);
    assert_eq!(result.reason, "All models agree: change does not alter behavior");
    assert_eq!(result.models_used, 2);
    assert_eq!(result.qualifying_models, 2);
    assert!((result.confidence - 0.925).abs() < 1e-9);
    assert_eq!(result.model_results.len(), 2);

    let request = models[0].last_request().unwrap();
    assert_eq!(request.temperature, 0.0);
    assert_eq!(request.prompt, PROMPT);
}

#[tokio::test]
async fn test_split_vote_is_disagreement() {
    let models = [
        model("a", &verdict(false, 0.9)),
        model("b", &verdict(true, 0.95)),
        model("c", &verdict(false, 0.95)),
    ];
    let result = engine(&models)
        .analyze_with_consensus(PROMPT, &CancellationToken::new())
        .await
        .unwrap();

    assert!(!result.agreement);
    assert!(!result.approved);
    assert_eq!(result.reason, "Models disagree: 1/3 say alters behavior");
    assert!(result
        .disagreements
        .iter()
        .any(|d| d.starts_with("alters_behavior: flagged by b")));
}

#[tokio::test]
async fn test_low_confidence_models_do_not_vote() {
    // Second model needs 0.85 and reports 0.84.
    let models = [model("a", &verdict(false, 0.99)), model("b", &verdict(false, 0.84))];
    let result = engine(&models)
        .analyze_with_consensus(PROMPT, &CancellationToken::new())
        .await
        .unwrap();

    assert!(!result.approved);
    assert_eq!(result.qualifying_models, 1);
    assert_eq!(result.reason, "Insufficient high-confidence results: 1/2 models");
}

#[tokio::test]
async fn test_unparseable_answer_counts_but_never_qualifies() {
    let models = [
        model("a", &verdict(false, 0.99)),
        Arc::new(ScriptedModel::replying("b", "Looks good to me!")),
    ];
    let result = engine(&models)
        .analyze_with_consensus(PROMPT, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.models_used, 2);
    assert_eq!(result.qualifying_models, 1);
    assert!(!result.approved);
}

#[tokio::test]
async fn test_failed_models_reported() {
    let models = [
        model("a", &verdict(false, 0.99)),
        Arc::new(ScriptedModel::failing("b", ModelError::EmptyResponse)),
    ];
    let err = engine(&models)
        .analyze_with_consensus(PROMPT, &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        ConsensusError::InsufficientSuccesses {
            succeeded,
            required,
            failures,
        } => {
            assert_eq!((succeeded, required), (1, 2));
            assert_eq!(failures, vec!["b: model returned an empty response"]);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_hung_model_is_timed_out() {
    let models = [
        model("a", &verdict(false, 0.99)),
        model("b", &verdict(false, 0.99)),
        Arc::new(
            ScriptedModel::answering("slow", &verdict(false, 0.99))
                .with_delay(Duration::from_secs(600)),
        ),
    ];
    let config = ConsensusConfig {
        per_model_timeout: Duration::from_secs(5),
        ..ConsensusConfig::default()
    };

    let started = tokio::time::Instant::now();
    let result = engine_with(&models, config)
        .analyze_with_consensus(PROMPT, &CancellationToken::new())
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(result.models_used, 2);
    assert!(result.approved);
    assert!(!result.model_results.contains_key("slow"));
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_aborts_in_flight_calls() {
    let models = [
        Arc::new(
            ScriptedModel::answering("a", &verdict(false, 0.99)).with_delay(Duration::from_secs(20)),
        ),
        Arc::new(
            ScriptedModel::answering("b", &verdict(false, 0.99)).with_delay(Duration::from_secs(20)),
        ),
    ];
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(2)).await;
        trigger.cancel();
    });

    let err = engine(&models)
        .analyze_with_consensus(PROMPT, &cancel)
        .await
        .unwrap_err();
    assert_eq!(err, ConsensusError::Cancelled);
}

#[tokio::test]
async fn test_prompt_bounds() {
    let models = [model("a", &verdict(false, 0.99)), model("b", &verdict(false, 0.99))];
    let engine = engine(&models);
    let cancel = CancellationToken::new();

    assert_eq!(
        engine.analyze_with_consensus("  \n", &cancel).await.unwrap_err(),
        ConsensusError::EmptyPrompt
    );
    let huge = "x".repeat(50_001);
    assert!(matches!(
        engine.analyze_with_consensus(&huge, &cancel).await.unwrap_err(),
        ConsensusError::PromptTooLarge { size: 50_001, max: 50_000 }
    ));
    assert_eq!(models[0].calls(), 0);
}

#[test]
fn test_models_sorted_by_priority() {
    let a: Arc<dyn LanguageModel> = model("a", &verdict(false, 1.0));
    let b: Arc<dyn LanguageModel> = model("b", &verdict(false, 1.0));
    let engine = ConsensusEngine::new(
        vec![
            ModelSpec {
                model: b,
                priority: 2,
                required_confidence: 0.9,
            },
            ModelSpec {
                model: a,
                priority: 1,
                required_confidence: 0.8,
            },
        ],
        ConsensusConfig::default(),
    )
    .unwrap();

    let ids: Vec<&str> = engine.models().iter().map(|m| m.model.model_id()).collect();
    assert_eq!(ids, vec!["a", "b"]);
}
