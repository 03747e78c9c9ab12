use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{PipelineDefinition, PipelineState, RetryExhausted, RetryPolicy, StageDefinition};
use crate::config::Config;
use crate::error::{GenerationError, PipelineError, PipelineResult, StorageError};
use crate::generation::Generator;
use crate::storage::{
    HistoryNode, PipelineRun, RunStatus, SqliteStorage, StageCheckpoint, Storage,
};
use crate::timeline::{TimelineHandle, TimelineRegistry};

/// Output of one completed stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageOutput {
    pub name: String,
    pub offset: u32,
    pub node_id: String,
    pub text: String,
}

/// Informational result of a completed run.
///
/// The authoritative record is the timeline store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub run_id: String,
    pub timeline_id: String,
    pub outputs: Vec<StageOutput>,
}

impl RunReport {
    /// Text produced by the named stage
    pub fn output(&self, stage_name: &str) -> Option<&str> {
        self.outputs
            .iter()
            .find(|o| o.name == stage_name)
            .map(|o| o.text.as_str())
    }
}

impl From<&StageCheckpoint> for StageOutput {
    fn from(checkpoint: &StageCheckpoint) -> Self {
        Self {
            name: checkpoint.stage_name.clone(),
            offset: checkpoint.offset,
            node_id: checkpoint.node_id.clone(),
            text: checkpoint.output.clone(),
        }
    }
}

/// Trigger-time limits and timeline selection
#[derive(Debug, Clone)]
pub struct TriggerSettings {
    /// Use this key for every run instead of a fresh one per run.
    pub shared_timeline_id: Option<String>,
    /// Maximum seed length in characters.
    pub max_input_chars: usize,
}

impl Default for TriggerSettings {
    fn default() -> Self {
        Self {
            shared_timeline_id: None,
            max_input_chars: 2000,
        }
    }
}

/// Durable step executor.
///
/// Drives each run through its stages strictly in order. Every stage is
/// checkpointed twice: once when its output exists (`generated`) and once
/// when the timeline store has acknowledged its node (`persisted`). A
/// resumed run skips persisted stages, re-persists generated ones without
/// calling the generator, and continues from there.
#[derive(Clone)]
pub struct Orchestrator {
    storage: SqliteStorage,
    timelines: TimelineRegistry,
    generator: Arc<dyn Generator>,
    definition: Arc<PipelineDefinition>,
    retry: RetryPolicy,
    settings: TriggerSettings,
    active_runs: Arc<Mutex<HashSet<String>>>,
}

/// Releases a run claim on drop.
struct RunClaim {
    run_id: String,
    active_runs: Arc<Mutex<HashSet<String>>>,
}

impl Drop for RunClaim {
    fn drop(&mut self) {
        self.active_runs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.run_id);
    }
}

impl Orchestrator {
    /// Create an orchestrator with default trigger settings
    pub fn new(
        storage: SqliteStorage,
        timelines: TimelineRegistry,
        generator: Arc<dyn Generator>,
        definition: PipelineDefinition,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            storage,
            timelines,
            generator,
            definition: Arc::new(definition),
            retry,
            settings: TriggerSettings::default(),
            active_runs: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Create an orchestrator from application configuration
    pub fn from_config(
        storage: SqliteStorage,
        timelines: TimelineRegistry,
        generator: Arc<dyn Generator>,
        config: &Config,
    ) -> PipelineResult<Self> {
        let definition = PipelineDefinition::from_offsets(&config.pipeline.offsets)?;
        let retry = RetryPolicy::from_config(&config.request);

        Ok(
            Self::new(storage, timelines, generator, definition, retry).with_settings(
                TriggerSettings {
                    shared_timeline_id: config.pipeline.shared_timeline_id.clone(),
                    max_input_chars: config.pipeline.max_input_chars,
                },
            ),
        )
    }

    /// Replace the trigger settings
    pub fn with_settings(mut self, settings: TriggerSettings) -> Self {
        self.settings = settings;
        self
    }

    /// The stage list this orchestrator runs
    pub fn definition(&self) -> &PipelineDefinition {
        &self.definition
    }

    /// The timeline registry runs write into
    pub fn timelines(&self) -> &TimelineRegistry {
        &self.timelines
    }

    /// Timeline key used when a caller does not name one
    pub fn shared_timeline_id(&self) -> Option<&str> {
        self.settings.shared_timeline_id.as_deref()
    }

    /// Create a run and record its divergence (stage 0) before returning.
    ///
    /// Failures here are trigger-time failures and leave no usable run.
    /// The remaining stages are driven by [`Orchestrator::execute`].
    pub async fn start(
        &self,
        seed_input: &str,
        timeline_id: Option<&str>,
    ) -> PipelineResult<PipelineRun> {
        self.validate_seed(seed_input)?;

        let timeline_id = timeline_id
            .map(str::to_string)
            .or_else(|| self.settings.shared_timeline_id.clone())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let mut run = PipelineRun::new(&timeline_id, seed_input);
        self.storage.create_run(&run).await?;

        let _claim = self.claim(&run.id)?;
        let timeline = self.timelines.handle(&run.timeline_id);

        let state = PipelineState::Pending.on_success(self.definition.len());
        run.transition(state.run_status());
        self.record_progress(&run).await;

        if let Err(e) = self.complete_stage(&run, 0, None, None, &timeline).await {
            self.abort(&mut run, &e).await;
            return Err(e);
        }

        info!(
            run_id = %run.id,
            timeline_id = %run.timeline_id,
            stages = self.definition.len(),
            "Pipeline run started"
        );

        Ok(run)
    }

    /// Run a pipeline to completion: [`start`](Self::start) then
    /// [`execute`](Self::execute).
    pub async fn run(
        &self,
        seed_input: &str,
        timeline_id: Option<&str>,
    ) -> PipelineResult<RunReport> {
        let run = self.start(seed_input, timeline_id).await?;
        self.execute(&run.id).await
    }

    /// Drive a run forward from its last checkpoint until it completes or
    /// a stage fails permanently.
    ///
    /// Used both for the first execution and to resume an interrupted or
    /// aborted run.
    pub async fn execute(&self, run_id: &str) -> PipelineResult<RunReport> {
        let _claim = self.claim(run_id)?;
        let start = Instant::now();

        let mut run = self
            .storage
            .get_run(run_id)
            .await?
            .ok_or_else(|| PipelineError::RunNotFound {
                run_id: run_id.to_string(),
            })?;

        if run.status == RunStatus::Completed {
            return Err(PipelineError::AlreadyCompleted {
                run_id: run_id.to_string(),
            });
        }

        let mut checkpoints: HashMap<u32, StageCheckpoint> = self
            .storage
            .get_checkpoints(run_id)
            .await?
            .into_iter()
            .map(|cp| (cp.stage_index, cp))
            .collect();

        let timeline = self.timelines.handle(&run.timeline_id);
        let stage_count = self.definition.len();

        debug!(
            run_id = %run.id,
            checkpoints = checkpoints.len(),
            status = %run.status,
            "Executing pipeline run"
        );

        run.error = None;
        let mut state = PipelineState::Pending.on_success(stage_count);
        let mut previous: Option<StageCheckpoint> = None;
        let mut outputs = Vec::with_capacity(stage_count);

        while let PipelineState::Stage(index) = state {
            run.current_stage = index as u32;
            run.transition(state.run_status());
            self.record_progress(&run).await;

            let existing = checkpoints.remove(&(index as u32));
            match self
                .complete_stage(&run, index, previous.as_ref(), existing, &timeline)
                .await
            {
                Ok(checkpoint) => {
                    outputs.push(StageOutput::from(&checkpoint));
                    previous = Some(checkpoint);
                    state = state.on_success(stage_count);
                }
                Err(e) => {
                    state = state.on_failure();
                    run.transition(state.run_status());
                    self.abort(&mut run, &e).await;
                    return Err(e);
                }
            }
        }

        run.transition(state.run_status());
        self.storage.finish_run(&run).await?;

        info!(
            run_id = %run.id,
            timeline_id = %run.timeline_id,
            stages = outputs.len(),
            latency_ms = start.elapsed().as_millis(),
            "Pipeline run completed"
        );

        Ok(RunReport {
            run_id: run.id,
            timeline_id: run.timeline_id,
            outputs,
        })
    }

    /// Execute a run on a background task, logging its outcome.
    pub fn spawn(&self, run_id: String) -> JoinHandle<()> {
        let orchestrator = self.clone();
        tokio::spawn(async move {
            match orchestrator.execute(&run_id).await {
                Ok(report) => debug!(
                    run_id = %report.run_id,
                    stages = report.outputs.len(),
                    "Background run finished"
                ),
                Err(e) => warn!(run_id = %run_id, error = %e, "Background run did not complete"),
            }
        })
    }

    /// Spawn every run left pending or running by a previous process.
    pub async fn resume_unfinished(&self) -> PipelineResult<Vec<String>> {
        let runs = self.storage.list_unfinished_runs().await?;
        let ids: Vec<String> = runs.into_iter().map(|r| r.id).collect();

        for id in &ids {
            info!(run_id = %id, "Resuming interrupted run");
            self.spawn(id.clone());
        }

        Ok(ids)
    }

    /// Current status record of a run
    pub async fn status(&self, run_id: &str) -> PipelineResult<PipelineRun> {
        self.storage
            .get_run(run_id)
            .await?
            .ok_or_else(|| PipelineError::RunNotFound {
                run_id: run_id.to_string(),
            })
    }

    /// Whether this process is currently driving the run
    pub fn is_active(&self, run_id: &str) -> bool {
        self.active_runs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(run_id)
    }

    /// Blank input is rejected; anything else is stored exactly as given.
    fn validate_seed(&self, seed_input: &str) -> PipelineResult<()> {
        if seed_input.trim().is_empty() {
            return Err(PipelineError::InvalidInput {
                field: "userInput".to_string(),
                reason: "cannot be empty".to_string(),
            });
        }

        let chars = seed_input.chars().count();
        if chars > self.settings.max_input_chars {
            return Err(PipelineError::InvalidInput {
                field: "userInput".to_string(),
                reason: format!(
                    "must be at most {} characters, got {}",
                    self.settings.max_input_chars, chars
                ),
            });
        }

        Ok(())
    }

    fn claim(&self, run_id: &str) -> PipelineResult<RunClaim> {
        let mut active = self
            .active_runs
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if !active.insert(run_id.to_string()) {
            return Err(PipelineError::RunInProgress {
                run_id: run_id.to_string(),
            });
        }

        Ok(RunClaim {
            run_id: run_id.to_string(),
            active_runs: self.active_runs.clone(),
        })
    }

    /// Bring one stage to `persisted`, reusing whatever the checkpoint
    /// already holds.
    async fn complete_stage(
        &self,
        run: &PipelineRun,
        index: usize,
        previous: Option<&StageCheckpoint>,
        existing: Option<StageCheckpoint>,
        timeline: &TimelineHandle,
    ) -> PipelineResult<StageCheckpoint> {
        let stage = self
            .definition
            .stage(index)
            .ok_or_else(|| PipelineError::InvalidDefinition {
                message: format!("no stage at index {}", index),
            })?;

        let mut checkpoint = match existing {
            Some(checkpoint) if checkpoint.is_complete() => {
                debug!(run_id = %run.id, stage = %stage.name, "Stage already checkpointed, skipping");
                return Ok(checkpoint);
            }
            Some(checkpoint) => {
                debug!(run_id = %run.id, stage = %stage.name, "Reusing generated stage output");
                checkpoint
            }
            None => {
                let output = match previous {
                    None if stage.prompt.is_none() => run.seed_input.clone(),
                    Some(prev) => self.generate_stage(run, stage, prev).await?,
                    None => {
                        return Err(PipelineError::InvalidDefinition {
                            message: format!("stage {} has no preceding stage", stage.name),
                        });
                    }
                };

                let checkpoint = StageCheckpoint::generated(
                    &run.id,
                    index as u32,
                    &stage.name,
                    stage.offset,
                    output,
                );
                self.save_checkpoint(stage, &checkpoint).await?;
                checkpoint
            }
        };

        let node = checkpoint.to_node(previous.map(|p| p.node_id.as_str()));
        self.persist_node(stage, timeline, node).await?;

        checkpoint.mark_persisted();
        self.save_checkpoint(stage, &checkpoint).await?;

        info!(
            run_id = %run.id,
            timeline_id = %run.timeline_id,
            stage = %stage.name,
            offset = stage.offset,
            node_id = %checkpoint.node_id,
            "Stage checkpointed"
        );

        Ok(checkpoint)
    }

    async fn generate_stage(
        &self,
        run: &PipelineRun,
        stage: &StageDefinition,
        previous: &StageCheckpoint,
    ) -> PipelineResult<String> {
        let messages = stage
            .render(previous.offset, &previous.output)
            .ok_or_else(|| PipelineError::InvalidDefinition {
                message: format!("stage {} has no prompt", stage.name),
            })?;

        debug!(run_id = %run.id, stage = %stage.name, "Generating stage output");

        let generator = &self.generator;
        let messages = &messages;
        let label = format!("generate {}", stage.name);

        self.retry
            .run(
                &label,
                move || async move {
                    let text = generator.generate(messages).await?;
                    let text = text.trim();
                    if text.is_empty() {
                        return Err(GenerationError::EmptyResponse);
                    }
                    Ok(text.to_string())
                },
                GenerationError::is_transient,
            )
            .await
            .map_err(|e| stage_failed(stage, e))
    }

    async fn persist_node(
        &self,
        stage: &StageDefinition,
        timeline: &TimelineHandle,
        node: HistoryNode,
    ) -> PipelineResult<()> {
        let label = format!("persist {}", stage.name);
        let node = &node;

        self.retry
            .run(
                &label,
                move || timeline.add(node.clone()),
                StorageError::is_transient,
            )
            .await
            .map(|_| ())
            .map_err(|e| stage_failed(stage, e))
    }

    async fn save_checkpoint(
        &self,
        stage: &StageDefinition,
        checkpoint: &StageCheckpoint,
    ) -> PipelineResult<()> {
        let label = format!("checkpoint {}", stage.name);
        let storage = &self.storage;

        self.retry
            .run(
                &label,
                move || storage.save_checkpoint(checkpoint),
                StorageError::is_transient,
            )
            .await
            .map_err(|e| stage_failed(stage, e))
    }

    async fn record_progress(&self, run: &PipelineRun) {
        if let Err(e) = self.storage.update_run(run).await {
            warn!(run_id = %run.id, error = %e, "Failed to record run progress");
        }
    }

    async fn abort(&self, run: &mut PipelineRun, cause: &PipelineError) {
        run.error = Some(cause.to_string());
        run.transition(RunStatus::Aborted);

        error!(
            run_id = %run.id,
            timeline_id = %run.timeline_id,
            stage = run.current_stage,
            error = %cause,
            "Pipeline run aborted"
        );

        if let Err(e) = self.storage.update_run(run).await {
            warn!(run_id = %run.id, error = %e, "Failed to record run abort");
        }
    }
}

fn stage_failed<E: std::fmt::Display>(
    stage: &StageDefinition,
    exhausted: RetryExhausted<E>,
) -> PipelineError {
    PipelineError::StageFailed {
        stage: stage.name.clone(),
        attempts: exhausted.attempts,
        message: exhausted.error.to_string(),
    }
}
