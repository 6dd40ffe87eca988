//! Pipeline orchestrator
//!
//! The stateful core of the system. Owns the run's persisted state, decides
//! which stages still need to run, executes them in fixed order
//! (content, cover, assembly), persists progress after each one, and
//! assembles the manifest once everything is complete.
//!
//! Resume semantics: re-invoking a run is safe and convergent. A stage is
//! skipped only when its completion flag is set AND its output artifact is
//! still on disk, so a state file claiming completion after an artifact was
//! deleted re-executes the stage instead of producing a hollow manifest.
//! Stage flags are monotonic, and a completed run resumed again is a no-op
//! that returns the persisted manifest without touching any backend.
//!
//! Exactly one orchestrator may own a run namespace at a time; concurrent
//! invocations against the same book id are unsupported.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::assembler::{artifact_map, PdfAssembler};
use crate::backend::{
    create_image_backend, create_llm_backend, ImageBackend, LlmBackend, RetryPolicy,
};
use crate::config::BookConfig;
use crate::content::ContentGenerator;
use crate::cost::{CostTracker, CumulativeCosts};
use crate::cover::CoverDesigner;
use crate::error::{ConfigError, PipelineError, StageError, StorageError};
use crate::manifest::Manifest;
use crate::quality::QualityChecker;
use crate::state::{RunPaths, RunState, Stage, StageFailureRecord};

/// What to do when a run is started without `resume` but a completed run
/// already exists under the same id.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExistingRunPolicy {
    /// Start fresh, overwriting the prior state (the default).
    #[default]
    Overwrite,
    /// Refuse to clobber the completed run.
    Reject,
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Reuse persisted run state, skipping completed stages.
    pub resume: bool,
    /// Substitute deterministic mock backends for both capabilities.
    pub mock: bool,
    /// Directory holding the per-run namespaces and the cumulative cost file.
    pub output_root: PathBuf,
    pub on_existing: ExistingRunPolicy,
    pub retry: RetryPolicy,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            resume: false,
            mock: false,
            output_root: PathBuf::from("output"),
            on_existing: ExistingRunPolicy::default(),
            retry: RetryPolicy::default(),
        }
    }
}

pub struct Pipeline {
    config: BookConfig,
    options: RunOptions,
    paths: RunPaths,
    llm: Arc<dyn LlmBackend>,
    image: Arc<dyn ImageBackend>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .field("options", &self.options)
            .field("paths", &self.paths)
            .field("llm", &"Arc<dyn LlmBackend>")
            .field("image", &"Arc<dyn ImageBackend>")
            .finish()
    }
}

impl Pipeline {
    /// Build a pipeline with backends resolved from the configuration tags.
    /// Unknown tags and missing credentials fail here, before any stage and
    /// before the run namespace exists.
    pub fn new(config: BookConfig, options: RunOptions) -> Result<Self, ConfigError> {
        config.validate()?;

        let (llm_tag, image_tag) = if options.mock {
            ("mock", "mock")
        } else {
            (config.llm_backend.as_str(), config.image_backend.as_str())
        };
        let llm = create_llm_backend(llm_tag)?;
        let image = create_image_backend(image_tag)?;

        let paths = RunPaths::new(&options.output_root, &config.id);
        Ok(Self {
            config,
            options,
            paths,
            llm,
            image,
        })
    }

    /// Build with explicit backend instances. Test seam, and the hook for
    /// callers embedding their own adapters.
    pub fn with_backends(
        config: BookConfig,
        options: RunOptions,
        llm: Arc<dyn LlmBackend>,
        image: Arc<dyn ImageBackend>,
    ) -> Self {
        let paths = RunPaths::new(&options.output_root, &config.id);
        Self {
            config,
            options,
            paths,
            llm,
            image,
        }
    }

    pub fn paths(&self) -> &RunPaths {
        &self.paths
    }

    /// Execute the run to completion, resuming or starting fresh per the
    /// options, and return the manifest.
    pub async fn run(&mut self) -> Result<Manifest, PipelineError> {
        self.paths.ensure_run_dir()?;
        let state_path = self.paths.run_state();

        let mut state = if self.options.resume {
            RunState::load(&state_path)?
        } else {
            let prior_completed = match RunState::load(&state_path) {
                Ok(prior) => prior.completed,
                // an unreadable prior state file carries no completed run to
                // protect; fresh mode overwrites it
                Err(StorageError::Corrupt { .. }) => false,
                Err(other) => return Err(other.into()),
            };
            if prior_completed && self.options.on_existing == ExistingRunPolicy::Reject {
                return Err(PipelineError::AlreadyCompleted(self.config.id.clone()));
            }
            RunState::default()
        };

        if state.completed {
            info!(book_id = %self.config.id, "run already completed; returning existing manifest");
            return Ok(Manifest::load(&self.paths.manifest())?);
        }

        if self.options.resume {
            info!(book_id = %self.config.id, "resuming from persisted state");
        } else {
            info!(book_id = %self.config.id, "starting fresh run");
        }
        state.save(&state_path)?;

        for stage in Stage::ALL {
            if self.stage_satisfied(&state, stage) {
                info!(%stage, "stage already complete, skipping");
                continue;
            }

            info!(%stage, "executing stage");
            match self.execute_stage(stage, &mut state).await {
                Ok(()) => {
                    state.mark_done(stage);
                    state.error = None;
                    state.save(&state_path)?;
                }
                Err(source) => {
                    state.error = Some(StageFailureRecord {
                        stage,
                        message: source.to_string(),
                    });
                    // best effort: the failure itself is what we surface
                    if let Err(persist_err) = state.save(&state_path) {
                        warn!(error = %persist_err, "could not persist failure record");
                    }
                    return Err(PipelineError::Stage { stage, source });
                }
            }
        }

        self.finalize(&mut state)
    }

    /// A stage can be skipped only when its flag is set and its artifact
    /// survived on disk.
    fn stage_satisfied(&self, state: &RunState, stage: Stage) -> bool {
        if !state.stage_done(stage) {
            return false;
        }
        match stage {
            Stage::Content => self.paths.manuscript().exists(),
            Stage::Cover => self.paths.cover_image().exists(),
            Stage::Assembly => {
                self.paths.interior_pdf().exists() && self.paths.cover_pdf().exists()
            }
        }
    }

    async fn execute_stage(&self, stage: Stage, state: &mut RunState) -> Result<(), StageError> {
        match stage {
            Stage::Content => {
                let generator =
                    ContentGenerator::new(self.llm.clone(), self.options.retry.clone());
                let before = self.llm.usage();
                let manuscript = generator.generate_book(&self.config).await?;
                let delta = self.llm.usage() - before;

                let path = self.paths.manuscript();
                std::fs::write(&path, &manuscript).map_err(|source| StorageError::Write {
                    path: path.clone(),
                    source,
                })?;
                state.record_usage(&self.llm.name(), delta);
                info!(path = %path.display(), "manuscript written");
                Ok(())
            }
            Stage::Cover => {
                let designer = CoverDesigner::new(self.image.clone(), self.options.retry.clone());
                let png = designer.generate_cover(&self.config).await?;

                let path = self.paths.cover_image();
                std::fs::write(&path, &png).map_err(|source| StorageError::Write {
                    path: path.clone(),
                    source,
                })?;
                info!(path = %path.display(), "cover image written");
                Ok(())
            }
            Stage::Assembly => {
                let manuscript_path = self.paths.manuscript();
                let manuscript = std::fs::read_to_string(&manuscript_path).map_err(|source| {
                    StorageError::Read {
                        path: manuscript_path.clone(),
                        source,
                    }
                })?;
                let cover_path = self.paths.cover_image();
                let cover_png =
                    std::fs::read(&cover_path).map_err(|source| StorageError::Read {
                        path: cover_path.clone(),
                        source,
                    })?;

                PdfAssembler::build_interior(&self.config, &manuscript, &self.paths)?;
                PdfAssembler::build_cover(&cover_png, &self.paths)?;
                Ok(())
            }
        }
    }

    /// Quality check, cost finalization, manifest assembly, completion mark.
    fn finalize(&self, state: &mut RunState) -> Result<Manifest, PipelineError> {
        let manuscript_path = self.paths.manuscript();
        let manuscript =
            std::fs::read_to_string(&manuscript_path).map_err(|source| StorageError::Read {
                path: manuscript_path.clone(),
                source,
            })?;

        let quality = QualityChecker::default().check(&manuscript);
        if quality.passed {
            info!("quality check passed");
        } else {
            for warning in &quality.warnings {
                warn!(%warning, "quality check warning");
            }
        }

        let ledger = CostTracker::from_usage(&state.usage);
        let summary = ledger.summary();

        let cumulative_path = self.paths.cumulative_costs();
        let mut cumulative = CumulativeCosts::load(&cumulative_path)?;
        cumulative.append(&self.config.id, &summary, Utc::now());
        cumulative.save(&cumulative_path)?;

        let manifest = Manifest::new(&self.config, artifact_map(&self.paths), quality, summary);
        manifest.save(&self.paths.manifest())?;

        state.completed = true;
        state.save(&self.paths.run_state())?;

        info!(
            book_id = %self.config.id,
            manifest = %self.paths.manifest().display(),
            total_cost_usd = manifest.cost.total_cost_usd,
            "run completed"
        );
        Ok(manifest)
    }
}
