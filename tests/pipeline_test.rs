//! Integration tests for the stage pipeline
//!
//! Drives full runs against real storage with a scripted generator,
//! including restarts against an on-disk database.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;

use butterfly_timeline::config::DatabaseConfig;
use butterfly_timeline::error::{GenerationError, GenerationResult, PipelineError};
use butterfly_timeline::generation::{Generator, Message};
use butterfly_timeline::pipeline::{
    Orchestrator, PipelineDefinition, RetryPolicy, TriggerSettings,
};
use butterfly_timeline::storage::{RunStatus, SqliteStorage, Storage};
use butterfly_timeline::timeline::TimelineRegistry;
use butterfly_timeline::tree::build_forest;

const OFFSETS: &[u32] = &[0, 1, 10, 50, 100, 250];

/// Generator that records every prompt and fails permanently from a given call on.
#[derive(Default)]
struct ScriptedGenerator {
    prompts: Mutex<Vec<Vec<Message>>>,
    calls: AtomicUsize,
    fail_from_call: Option<usize>,
}

impl ScriptedGenerator {
    fn failing_from(call: usize) -> Self {
        Self {
            fail_from_call: Some(call),
            ..Self::default()
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn user_prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap()
            .iter()
            .map(|messages| messages[1].content.clone())
            .collect()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(&self, messages: &[Message]) -> GenerationResult<String> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.prompts.lock().unwrap().push(messages.to_vec());

        if self.fail_from_call.is_some_and(|from| call >= from) {
            return Err(GenerationError::Api {
                status: 400,
                message: "rejected".to_string(),
            });
        }
        Ok(format!("Generated event number {}.", call))
    }
}

fn orchestrator(storage: &SqliteStorage, generator: Arc<ScriptedGenerator>) -> Orchestrator {
    Orchestrator::new(
        storage.clone(),
        TimelineRegistry::new(storage.clone()),
        generator,
        PipelineDefinition::from_offsets(OFFSETS).unwrap(),
        RetryPolicy::immediate(2),
    )
}

#[tokio::test]
async fn test_full_run_produces_linked_timeline() {
    let storage = SqliteStorage::new_in_memory().await.unwrap();
    let generator = Arc::new(ScriptedGenerator::default());
    let orch = orchestrator(&storage, generator.clone());

    let report = orch.run("The Library of Alexandria survives", None).await.unwrap();

    assert_eq!(generator.calls(), 5);
    assert_eq!(report.outputs.len(), 6);

    let nodes = storage.list_nodes(&report.timeline_id).await.unwrap();
    assert_eq!(nodes.len(), 6);
    assert_eq!(
        nodes.iter().map(|n| n.offset).collect::<Vec<_>>(),
        OFFSETS.to_vec()
    );
    assert_eq!(nodes[0].description, "The Library of Alexandria survives");

    // Each stage's prompt embeds exactly the previous stored description.
    let prompts = generator.user_prompts();
    assert_eq!(
        prompts[0],
        "The change is: The Library of Alexandria survives"
    );
    for k in 1..5 {
        assert_eq!(
            prompts[k],
            format!(
                "Previous event (Year {}): {}",
                nodes[k].offset, nodes[k].description
            )
        );
    }

    let forest = build_forest(nodes);
    assert_eq!(forest.len(), 1);
    assert_eq!(forest[0].depth(), 6);
}

#[tokio::test]
async fn test_permanent_failure_leaves_partial_timeline() {
    let storage = SqliteStorage::new_in_memory().await.unwrap();
    let generator = Arc::new(ScriptedGenerator::failing_from(3));
    let orch = orchestrator(&storage, generator.clone());

    let run = orch.start("seed", None).await.unwrap();
    let err = orch.execute(&run.id).await.unwrap_err();

    assert!(matches!(err, PipelineError::StageFailed { ref stage, .. } if stage == "year-50"));
    assert_eq!(generator.calls(), 3);

    let nodes = storage.list_nodes(&run.timeline_id).await.unwrap();
    assert_eq!(nodes.len(), 3);

    let status = orch.status(&run.id).await.unwrap();
    assert_eq!(status.status, RunStatus::Aborted);
    assert_eq!(status.current_stage, 3);
}

#[tokio::test]
async fn test_resume_after_restart_does_not_repeat_work() {
    let dir = tempfile::tempdir().unwrap();
    let config = DatabaseConfig {
        path: dir.path().join("timeline.db"),
        max_connections: 2,
    };

    let (run_id, timeline_id) = {
        let storage = SqliteStorage::new(&config).await.unwrap();
        let generator = Arc::new(ScriptedGenerator::failing_from(2));
        let orch = orchestrator(&storage, generator);

        let run = orch.start("seed", None).await.unwrap();
        assert!(orch.execute(&run.id).await.is_err());
        storage.close().await;
        (run.id, run.timeline_id)
    };

    let storage = SqliteStorage::new(&config).await.unwrap();
    let before = storage.list_nodes(&timeline_id).await.unwrap();
    assert_eq!(before.len(), 2);

    let generator = Arc::new(ScriptedGenerator::default());
    let orch = orchestrator(&storage, generator.clone());
    let report = orch.execute(&run_id).await.unwrap();

    assert_eq!(generator.calls(), 4);
    assert_eq!(
        generator.user_prompts()[0],
        format!("Previous event (Year 1): {}", before[1].description)
    );

    let nodes = storage.list_nodes(&timeline_id).await.unwrap();
    assert_eq!(nodes.len(), 6);
    assert_eq!(nodes[..2].to_vec(), before);
    assert_eq!(report.outputs.len(), 6);
    assert!(storage.get_checkpoints(&run_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_interrupted_runs_resume_on_startup() {
    let dir = tempfile::tempdir().unwrap();
    let config = DatabaseConfig {
        path: dir.path().join("timeline.db"),
        max_connections: 2,
    };

    let run_id = {
        let storage = SqliteStorage::new(&config).await.unwrap();
        let orch = orchestrator(&storage, Arc::new(ScriptedGenerator::default()));
        // Only stage 0 runs; the process "stops" before the rest.
        let run = orch.start("seed", None).await.unwrap();
        storage.close().await;
        run.id
    };

    let storage = SqliteStorage::new(&config).await.unwrap();
    let generator = Arc::new(ScriptedGenerator::default());
    let orch = orchestrator(&storage, generator.clone());

    let resumed = orch.resume_unfinished().await.unwrap();
    assert_eq!(resumed, vec![run_id.clone()]);

    let mut status = orch.status(&run_id).await.unwrap().status;
    for _ in 0..200 {
        if status == RunStatus::Completed {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        status = orch.status(&run_id).await.unwrap().status;
    }

    assert_eq!(status, RunStatus::Completed);
    assert_eq!(generator.calls(), 5);
}

#[tokio::test]
async fn test_concurrent_runs_on_shared_timeline() {
    let storage = SqliteStorage::new_in_memory().await.unwrap();
    let generator = Arc::new(ScriptedGenerator::default());
    let orch = orchestrator(&storage, generator.clone()).with_settings(TriggerSettings {
        shared_timeline_id: Some("world".to_string()),
        max_input_chars: 2000,
    });

    let (a, b, c) = tokio::join!(
        orch.run("first", None),
        orch.run("second", None),
        orch.run("third", None)
    );
    for report in [a, b, c] {
        assert_eq!(report.unwrap().timeline_id, "world");
    }

    let nodes = storage.list_nodes("world").await.unwrap();
    assert_eq!(nodes.len(), 18);

    let forest = build_forest(nodes);
    assert_eq!(forest.len(), 3);
    assert!(forest.iter().all(|tree| tree.depth() == 6));
    assert_eq!(generator.calls(), 15);
}
