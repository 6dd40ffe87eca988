//! End-to-end orchestrator tests: resume idempotence, monotonic state,
//! manifest completeness, overwrite policy and cost accumulation, all
//! driven through deterministic in-process backends.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;

use bookforge::backend::mock::{MockImageBackend, MockLlmBackend};
use bookforge::backend::retry::RetryPolicy;
use bookforge::backend::{ImageBackend, LlmBackend, TokenUsage};
use bookforge::error::BackendError;
use bookforge::manifest::ArtifactRole;
use bookforge::pipeline::{ExistingRunPolicy, Pipeline, RunOptions};
use bookforge::state::RunState;
use bookforge::{BookConfig, PipelineError, Stage};

fn mock_config() -> BookConfig {
    BookConfig::from_yaml(
        "id: book-1\ntitle: T\nauthor: A\ntopic: X\nllm_backend: mock\nimage_backend: mock\n",
    )
    .expect("valid test config")
}

fn options(root: &std::path::Path) -> RunOptions {
    RunOptions {
        output_root: root.to_path_buf(),
        retry: RetryPolicy::immediate(1),
        ..RunOptions::default()
    }
}

/// Image backend that fails a configurable number of times before
/// delegating to the mock, for interrupt-and-resume scenarios.
struct FlakyImageBackend {
    failures_remaining: AtomicU32,
    inner: MockImageBackend,
}

impl FlakyImageBackend {
    fn failing(times: u32) -> Self {
        Self {
            failures_remaining: AtomicU32::new(times),
            inner: MockImageBackend::new(),
        }
    }
}

#[async_trait]
impl ImageBackend for FlakyImageBackend {
    async fn generate(&self, prompt: &str, size: (u32, u32)) -> Result<Vec<u8>, BackendError> {
        let remaining = self.failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(BackendError::Connection {
                backend: self.name(),
                url: "http://localhost:7860".into(),
                reason: "connection refused".into(),
            });
        }
        self.inner.generate(prompt, size).await
    }

    fn name(&self) -> String {
        "flaky-image".to_string()
    }
}

/// Text backend with a hosted-model name and a scripted usage profile, so
/// cost assertions can exercise a non-zero rate.
struct PricedLlmBackend {
    usage: Mutex<TokenUsage>,
    per_call: TokenUsage,
}

impl PricedLlmBackend {
    fn new(per_call: TokenUsage) -> Self {
        Self {
            usage: Mutex::new(TokenUsage::default()),
            per_call,
        }
    }
}

#[async_trait]
impl LlmBackend for PricedLlmBackend {
    async fn generate(&self, _prompt: &str, _system: &str) -> Result<String, BackendError> {
        self.usage
            .lock()
            .unwrap()
            .add(self.per_call.input_tokens, self.per_call.output_tokens);
        Ok("1. Only Chapter".to_string())
    }

    fn usage(&self) -> TokenUsage {
        *self.usage.lock().unwrap()
    }

    fn name(&self) -> String {
        "claude/claude-3-5-sonnet-20241022".to_string()
    }
}

#[tokio::test]
async fn fresh_run_completes_with_full_manifest() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let llm = Arc::new(MockLlmBackend::new());
    let image = Arc::new(MockImageBackend::new());

    let mut pipeline =
        Pipeline::with_backends(mock_config(), options(dir.path()), llm.clone(), image.clone());
    let manifest = pipeline.run().await?;

    // manifest completeness: exactly the four roles, all present on disk
    assert_eq!(manifest.files.len(), 4);
    for role in [
        ArtifactRole::Manuscript,
        ArtifactRole::CoverImage,
        ArtifactRole::InteriorPdf,
        ArtifactRole::CoverPdf,
    ] {
        let path = &manifest.files[&role];
        assert!(path.exists(), "missing {role:?} at {}", path.display());
    }
    assert!(manifest.ai_generated);
    assert_eq!(manifest.book_id, "book-1");
    assert!(manifest.quality_check.chapter_count >= 1);

    let state = RunState::load(&pipeline.paths().run_state())?;
    assert!(state.content_done && state.cover_done && state.assembly_done && state.completed);

    // mock outline (1 call) + five chapters
    assert_eq!(llm.call_count(), 6);
    assert_eq!(image.call_count(), 1);
    Ok(())
}

#[tokio::test]
async fn interrupted_run_resumes_without_reinvoking_completed_stages() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let llm = Arc::new(MockLlmBackend::new());
    let image = Arc::new(FlakyImageBackend::failing(u32::MAX));

    // run 1: content succeeds, cover exhausts its retries
    let mut pipeline =
        Pipeline::with_backends(mock_config(), options(dir.path()), llm.clone(), image);
    let err = pipeline.run().await.unwrap_err();
    match &err {
        PipelineError::Stage { stage, .. } => assert_eq!(*stage, Stage::Cover),
        other => panic!("expected cover-stage failure, got {other}"),
    }

    let text_calls_after_failure = llm.call_count();
    assert!(pipeline.paths().manuscript().exists());

    let state = RunState::load(&pipeline.paths().run_state())?;
    assert!(state.content_done);
    assert!(!state.cover_done && !state.completed);
    let failure = state.error.as_ref().expect("failure recorded");
    assert_eq!(failure.stage, Stage::Cover);
    assert!(failure.message.contains("connection refused"));

    // run 2: resumed with a healthy image backend; the text backend must not
    // be called again
    let image = Arc::new(MockImageBackend::new());
    let mut pipeline = Pipeline::with_backends(
        mock_config(),
        RunOptions {
            resume: true,
            ..options(dir.path())
        },
        llm.clone(),
        image.clone(),
    );
    let manifest = pipeline.run().await?;

    assert_eq!(llm.call_count(), text_calls_after_failure);
    assert_eq!(image.call_count(), 1);
    assert_eq!(manifest.files.len(), 4);

    let state = RunState::load(&pipeline.paths().run_state())?;
    assert!(state.completed);
    assert!(state.error.is_none());
    Ok(())
}

#[tokio::test]
async fn stage_flags_are_monotonic_across_resumes() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let llm = Arc::new(MockLlmBackend::new());

    let mut observed_content_done = false;

    // repeatedly resume against an image backend that fails once per run,
    // reading persisted state between attempts
    for attempt in 0..3u32 {
        let image = Arc::new(FlakyImageBackend::failing(if attempt < 2 { u32::MAX } else { 0 }));
        let mut pipeline = Pipeline::with_backends(
            mock_config(),
            RunOptions {
                resume: attempt > 0,
                ..options(dir.path())
            },
            llm.clone(),
            image,
        );
        let _ = pipeline.run().await;

        let state = RunState::load(&pipeline.paths().run_state())?;
        if observed_content_done {
            assert!(state.content_done, "content flag regressed on attempt {attempt}");
        }
        observed_content_done |= state.content_done;
    }

    assert!(observed_content_done);
    Ok(())
}

#[tokio::test]
async fn completed_run_resume_is_a_noop() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let llm = Arc::new(MockLlmBackend::new());
    let image = Arc::new(MockImageBackend::new());

    let mut pipeline =
        Pipeline::with_backends(mock_config(), options(dir.path()), llm.clone(), image.clone());
    let first = pipeline.run().await?;
    let (text_calls, image_calls) = (llm.call_count(), image.call_count());

    let mut pipeline = Pipeline::with_backends(
        mock_config(),
        RunOptions {
            resume: true,
            ..options(dir.path())
        },
        llm.clone(),
        image.clone(),
    );
    let second = pipeline.run().await?;

    // no backend was touched and the manifest is the persisted one
    assert_eq!(llm.call_count(), text_calls);
    assert_eq!(image.call_count(), image_calls);
    assert_eq!(second.created_at, first.created_at);
    assert_eq!(second.files, first.files);
    Ok(())
}

#[tokio::test]
async fn existing_run_policy_controls_overwrite() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let llm = Arc::new(MockLlmBackend::new());
    let image = Arc::new(MockImageBackend::new());

    let mut pipeline =
        Pipeline::with_backends(mock_config(), options(dir.path()), llm.clone(), image.clone());
    pipeline.run().await?;
    let calls_after_first = llm.call_count();

    // keep-existing: a second non-resume run is rejected untouched
    let mut pipeline = Pipeline::with_backends(
        mock_config(),
        RunOptions {
            on_existing: ExistingRunPolicy::Reject,
            ..options(dir.path())
        },
        llm.clone(),
        image.clone(),
    );
    let err = pipeline.run().await.unwrap_err();
    assert!(matches!(err, PipelineError::AlreadyCompleted(ref id) if id == "book-1"));
    assert_eq!(llm.call_count(), calls_after_first);

    // default policy: overwrite and regenerate everything
    let mut pipeline =
        Pipeline::with_backends(mock_config(), options(dir.path()), llm.clone(), image.clone());
    pipeline.run().await?;
    assert!(llm.call_count() > calls_after_first);
    Ok(())
}

#[tokio::test]
async fn cost_summary_matches_rate_and_accumulates_across_runs() -> Result<()> {
    let dir = tempfile::tempdir()?;

    // 1M input + 2M output per call, one outline call plus one chapter call:
    // totals 2M input, 4M output on the sonnet rate ($3/M in, $15/M out)
    let per_call = TokenUsage::new(1_000_000, 2_000_000);

    let llm = Arc::new(PricedLlmBackend::new(per_call));
    let image = Arc::new(MockImageBackend::new());
    let mut pipeline =
        Pipeline::with_backends(mock_config(), options(dir.path()), llm, image.clone());
    let manifest = pipeline.run().await?;

    let expected_first = 2.0 * 3.0 + 4.0 * 15.0;
    assert!((manifest.cost.total_cost_usd - expected_first).abs() < 1e-6);

    // a second book contributes to the shared cumulative file
    let mut config = mock_config();
    config.id = "book-2".to_string();
    let llm = Arc::new(PricedLlmBackend::new(TokenUsage::new(1_000_000, 0)));
    let mut pipeline = Pipeline::with_backends(config, options(dir.path()), llm, image);
    let second = pipeline.run().await?;

    let expected_second = 2.0 * 3.0;
    assert!((second.cost.total_cost_usd - expected_second).abs() < 1e-6);

    let cumulative =
        bookforge::cost::CumulativeCosts::load(&pipeline.paths().cumulative_costs())?;
    assert_eq!(cumulative.runs.len(), 2);
    assert!(
        (cumulative.cumulative_cost_usd - (expected_first + expected_second)).abs() < 1e-6
    );
    Ok(())
}

#[tokio::test]
async fn invalid_config_rejected_before_any_state_exists() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config_path = dir.path().join("book.yaml");
    std::fs::write(&config_path, "book:\n  id: book-1\n  author: A\n  topic: X\n")?;

    let err = bookforge::load_config(&config_path).unwrap_err();
    assert!(matches!(
        err,
        bookforge::ConfigError::MissingField(ref fields) if fields == "title"
    ));

    // nothing was created: the output root does not even exist
    assert!(!dir.path().join("output").exists());
    Ok(())
}

#[tokio::test]
async fn unknown_backend_tag_rejected_at_startup() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut config = mock_config();
    config.llm_backend = "gpt4".to_string();

    let err = Pipeline::new(config, options(dir.path())).unwrap_err();
    assert!(matches!(err, bookforge::ConfigError::UnknownBackend { .. }));
    assert!(!dir.path().join("book-1").exists());
    Ok(())
}

#[tokio::test]
async fn state_file_always_parses_after_every_persist() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let llm = Arc::new(MockLlmBackend::new());

    // fail, resume, fail again, then succeed; after every run the state
    // file must parse cleanly
    for (attempt, failures) in [(0u32, u32::MAX), (1, u32::MAX), (2, 0)] {
        let image = Arc::new(FlakyImageBackend::failing(failures));
        let mut pipeline = Pipeline::with_backends(
            mock_config(),
            RunOptions {
                resume: attempt > 0,
                ..options(dir.path())
            },
            llm.clone(),
            image,
        );
        let _ = pipeline.run().await;

        let state = RunState::load(&pipeline.paths().run_state())?;
        assert!(state.content_done, "state readable and consistent after attempt {attempt}");
    }
    Ok(())
}
