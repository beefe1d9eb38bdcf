//! Sequences the stages and owns the suspend point before execution.
//!
//! ```text
//! START --draft--> DRAFTED --approve--> EXECUTED --compose--> ANSWERED
//!                     \
//!                      --reject--> CANCELLED
//! ```
//!
//! Every transition is checkpointed under the session's thread id, and
//! `resume` continues from the stored checkpoint alone.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::services::storage::{CheckpointRecord, CheckpointStore, CorruptRecord};

use super::composer::AnswerComposer;
use super::drafter::QueryDrafter;
use super::executor::QueryExecutor;
use super::state::{PipelineError, RequestState, Stage, StepUpdate};

/// The reviewer's verdict on a drafted query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Reject,
}

impl Decision {
    fn verb(&self) -> &'static str {
        match self {
            Decision::Approve => "approve",
            Decision::Reject => "reject",
        }
    }
}

/// Where a run stopped and what it wrote on the way
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub thread_id: String,
    pub stage: Stage,
    pub state: RequestState,
    pub updates: Vec<StepUpdate>,
}

/// A decoded checkpoint
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub thread_id: String,
    pub stage: Stage,
    pub state: RequestState,
    pub saved_at: DateTime<Utc>,
}

pub struct Pipeline {
    drafter: QueryDrafter,
    executor: QueryExecutor,
    composer: AnswerComposer,
    store: Arc<dyn CheckpointStore>,
}

/// Checkpoint step of a stage. `Cancelled` has none: rejecting deletes the
/// thread instead of saving it.
fn step_of(stage: Stage) -> Option<u32> {
    match stage {
        Stage::Start => Some(0),
        Stage::Drafted => Some(1),
        Stage::Executed => Some(2),
        Stage::Answered => Some(3),
        Stage::Cancelled => None,
    }
}

impl Pipeline {
    pub fn new(
        drafter: QueryDrafter,
        executor: QueryExecutor,
        composer: AnswerComposer,
        store: Arc<dyn CheckpointStore>,
    ) -> Self {
        Self {
            drafter,
            executor,
            composer,
            store,
        }
    }

    pub fn drafter(&self) -> &QueryDrafter {
        &self.drafter
    }

    /// Submit a question and run until the approval point.
    ///
    /// Any earlier session on `thread_id` is discarded first.
    pub async fn start(&self, thread_id: &str, question: &str) -> Result<RunReport, PipelineError> {
        match self.store.latest(thread_id).await {
            Ok(Some(previous)) => {
                if !Stage::parse(&previous.stage).is_some_and(|stage| stage.is_terminal()) {
                    tracing::warn!(
                        thread_id,
                        stage = %previous.stage,
                        "discarding unfinished session for a new question"
                    );
                }
                self.store.delete_thread(thread_id).await?;
            }
            Ok(None) => {}
            Err(e) if e.is::<CorruptRecord>() => {
                tracing::warn!(thread_id, "discarding unreadable session: {:#}", e);
                self.store.delete_thread(thread_id).await?;
            }
            Err(e) => return Err(e.into()),
        }

        let mut state = RequestState::new(question);
        self.checkpoint(thread_id, Stage::Start, &state).await?;

        let query = self.drafter.draft(&mut state).await?;
        self.checkpoint(thread_id, Stage::Drafted, &state).await?;
        tracing::info!(thread_id, "session suspended for approval");

        Ok(RunReport {
            thread_id: thread_id.to_string(),
            stage: Stage::Drafted,
            state,
            updates: vec![StepUpdate::Drafted { query }],
        })
    }

    /// Continue a stored session with the reviewer's decision.
    ///
    /// A session already past execution only re-runs the composer.
    pub async fn resume(&self, thread_id: &str, decision: Decision) -> Result<RunReport, PipelineError> {
        let snapshot = self
            .snapshot(thread_id)
            .await?
            .ok_or_else(|| PipelineError::SessionNotFound(thread_id.to_string()))?;
        let mut state = snapshot.state;
        let mut updates = Vec::new();

        match (snapshot.stage, decision) {
            (Stage::Drafted, Decision::Reject) => {
                self.store.delete_thread(thread_id).await?;
                tracing::info!(thread_id, "session cancelled by reviewer");
                return Ok(RunReport {
                    thread_id: thread_id.to_string(),
                    stage: Stage::Cancelled,
                    state,
                    updates: vec![StepUpdate::Cancelled],
                });
            }
            (Stage::Drafted, Decision::Approve) => {
                let result = self.executor.execute(&mut state).await?;
                self.checkpoint(thread_id, Stage::Executed, &state).await?;
                updates.push(StepUpdate::Executed { result });
            }
            (Stage::Executed, Decision::Approve) => {
                tracing::info!(thread_id, "resuming after execution; composing answer only");
            }
            (stage, decision) => {
                return Err(PipelineError::InvalidTransition {
                    stage,
                    action: decision.verb(),
                });
            }
        }

        let answer = self.composer.compose(&mut state).await?;
        self.checkpoint(thread_id, Stage::Answered, &state).await?;
        updates.push(StepUpdate::Answered { answer });

        Ok(RunReport {
            thread_id: thread_id.to_string(),
            stage: Stage::Answered,
            state,
            updates,
        })
    }

    /// The latest checkpoint of `thread_id`, if any
    pub async fn snapshot(&self, thread_id: &str) -> Result<Option<SessionSnapshot>, PipelineError> {
        match self.store.latest(thread_id).await.map_err(store_error)? {
            Some(record) => Ok(Some(decode(record)?)),
            None => Ok(None),
        }
    }

    /// Every checkpoint of `thread_id`, oldest first
    pub async fn history(&self, thread_id: &str) -> Result<Vec<SessionSnapshot>, PipelineError> {
        self.store
            .history(thread_id)
            .await
            .map_err(store_error)?
            .into_iter()
            .map(decode)
            .collect()
    }

    async fn checkpoint(&self, thread_id: &str, stage: Stage, state: &RequestState) -> Result<(), PipelineError> {
        let step = step_of(stage).ok_or(PipelineError::InvalidTransition {
            stage,
            action: "checkpoint",
        })?;
        let value = serde_json::to_value(state).map_err(anyhow::Error::from)?;
        let record = CheckpointRecord::new(thread_id, step, stage.as_str(), value);
        self.store.save(record).await?;
        tracing::debug!(thread_id, stage = %stage, "checkpoint saved");
        Ok(())
    }
}

/// Unreadable records become `CorruptCheckpoint`, whichever store found them
fn store_error(e: anyhow::Error) -> PipelineError {
    match e.downcast::<CorruptRecord>() {
        Ok(corrupt) => PipelineError::CorruptCheckpoint {
            thread_id: corrupt.thread_id,
            message: corrupt.message,
        },
        Err(e) => PipelineError::Backend(e),
    }
}

fn decode(record: CheckpointRecord) -> Result<SessionSnapshot, PipelineError> {
    let corrupt = |message: String| PipelineError::CorruptCheckpoint {
        thread_id: record.thread_id.clone(),
        message,
    };

    let stage = Stage::parse(&record.stage)
        .ok_or_else(|| corrupt(format!("unknown stage `{}`", record.stage)))?;
    let state: RequestState =
        serde_json::from_value(record.state.clone()).map_err(|e| corrupt(e.to_string()))?;

    Ok(SessionSnapshot {
        thread_id: record.thread_id.clone(),
        stage,
        state,
        saved_at: record.created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::{StubBackend, StubModel, employees_schema};
    use crate::services::prompts::{DEFAULT_TEMPLATE_NAME, PromptTemplate};
    use crate::services::storage::{InMemoryCheckpointStore, SqliteCheckpointStore};
    use serde_json::json;

    const QUESTION: &str = "How many employees are there?";
    const QUERY: &str = "SELECT COUNT(*) FROM employees";

    fn pipeline(
        model: Arc<StubModel>,
        backend: Arc<StubBackend>,
        store: Arc<dyn CheckpointStore>,
    ) -> Pipeline {
        Pipeline::new(
            QueryDrafter::new(
                model.clone(),
                PromptTemplate::resolve(DEFAULT_TEMPLATE_NAME).unwrap(),
                employees_schema(),
            ),
            QueryExecutor::new(backend),
            AnswerComposer::new(model),
            store,
        )
    }

    fn counting_model() -> Arc<StubModel> {
        Arc::new(
            StubModel::new()
                .structured(json!({ "query": QUERY }))
                .text("There are 8 employees."),
        )
    }

    #[test]
    fn test_drafted_session_has_only_query() {
        smol::block_on(async {
            let store = Arc::new(InMemoryCheckpointStore::new());
            let backend = Arc::new(StubBackend::returning("[(8,)]"));
            let pipeline = pipeline(counting_model(), backend.clone(), store);

            let report = pipeline.start("1", QUESTION).await.unwrap();

            assert_eq!(report.stage, Stage::Drafted);
            assert_eq!(report.state.query(), Some(QUERY));
            assert!(report.state.result().is_none());
            assert!(report.state.answer().is_none());
            assert!(backend.executed().is_empty());

            let stored = pipeline.snapshot("1").await.unwrap().unwrap();
            assert_eq!(stored.stage, Stage::Drafted);
            assert_eq!(stored.state, report.state);
        });
    }

    #[test]
    fn test_approved_session_runs_to_answer() {
        smol::block_on(async {
            let model = counting_model();
            let backend = Arc::new(StubBackend::returning("[(8,)]"));
            let pipeline = pipeline(
                model.clone(),
                backend.clone(),
                Arc::new(InMemoryCheckpointStore::new()),
            );

            pipeline.start("1", QUESTION).await.unwrap();
            let report = pipeline.resume("1", Decision::Approve).await.unwrap();

            assert_eq!(report.stage, Stage::Answered);
            assert_eq!(report.state.answer(), Some("There are 8 employees."));
            assert_eq!(
                report.updates,
                vec![
                    StepUpdate::Executed {
                        result: "[(8,)]".to_string()
                    },
                    StepUpdate::Answered {
                        answer: "There are 8 employees.".to_string()
                    },
                ]
            );
            assert_eq!(backend.executed(), vec![QUERY]);

            let prompts = model.text_prompts();
            assert_eq!(prompts.len(), 1);
            assert!(prompts[0].contains(QUESTION));
            assert!(prompts[0].contains(QUERY));
            assert!(prompts[0].contains("[(8,)]"));
        });
    }

    #[test]
    fn test_fields_are_written_in_order() {
        smol::block_on(async {
            let pipeline = pipeline(
                counting_model(),
                Arc::new(StubBackend::returning("[(8,)]")),
                Arc::new(InMemoryCheckpointStore::new()),
            );

            pipeline.start("1", QUESTION).await.unwrap();
            pipeline.resume("1", Decision::Approve).await.unwrap();

            let history = pipeline.history("1").await.unwrap();
            let stages: Vec<Stage> = history.iter().map(|s| s.stage).collect();
            assert_eq!(
                stages,
                vec![Stage::Start, Stage::Drafted, Stage::Executed, Stage::Answered]
            );

            let written: Vec<(bool, bool, bool)> = history
                .iter()
                .map(|s| {
                    (
                        s.state.query().is_some(),
                        s.state.result().is_some(),
                        s.state.answer().is_some(),
                    )
                })
                .collect();
            assert_eq!(
                written,
                vec![
                    (false, false, false),
                    (true, false, false),
                    (true, true, false),
                    (true, true, true),
                ]
            );

            // Earlier values are carried forward unchanged
            for snapshot in &history {
                assert_eq!(snapshot.state.question(), QUESTION);
                if let Some(query) = snapshot.state.query() {
                    assert_eq!(query, QUERY);
                }
            }
        });
    }

    #[test]
    fn test_rejected_session_never_touches_data_store() {
        smol::block_on(async {
            let model = counting_model();
            let backend = Arc::new(StubBackend::returning("[(8,)]"));
            let pipeline = pipeline(
                model.clone(),
                backend.clone(),
                Arc::new(InMemoryCheckpointStore::new()),
            );

            pipeline.start("1", QUESTION).await.unwrap();
            let report = pipeline.resume("1", Decision::Reject).await.unwrap();

            assert_eq!(report.stage, Stage::Cancelled);
            assert_eq!(report.updates, vec![StepUpdate::Cancelled]);
            assert!(report.state.result().is_none());
            assert!(report.state.answer().is_none());
            assert!(backend.executed().is_empty());
            assert!(model.text_prompts().is_empty());

            assert!(pipeline.snapshot("1").await.unwrap().is_none());
            assert!(matches!(
                pipeline.resume("1", Decision::Approve).await,
                Err(PipelineError::SessionNotFound(_))
            ));
        });
    }

    #[test]
    fn test_execution_error_still_gets_answered() {
        smol::block_on(async {
            let model = Arc::new(
                StubModel::new()
                    .structured(json!({ "query": "SELECT COUNT(*) FROM ghosts" }))
                    .text("The query failed because there is no ghosts table."),
            );
            let backend = Arc::new(StubBackend::failing("no such table: ghosts"));
            let pipeline = pipeline(
                model.clone(),
                backend,
                Arc::new(InMemoryCheckpointStore::new()),
            );

            pipeline.start("1", "How many ghosts are there?").await.unwrap();
            let report = pipeline.resume("1", Decision::Approve).await.unwrap();

            assert_eq!(report.stage, Stage::Answered);
            assert_eq!(report.state.result(), Some("Error: no such table: ghosts"));
            assert!(model.text_prompts()[0].contains("no such table: ghosts"));
            assert_eq!(
                report.state.answer(),
                Some("The query failed because there is no ghosts table.")
            );
        });
    }

    #[test]
    fn test_resume_at_executed_only_composes() {
        smol::block_on(async {
            let store: Arc<dyn CheckpointStore> = Arc::new(InMemoryCheckpointStore::new());
            let model = counting_model();
            let backend = Arc::new(StubBackend::returning("[(8,)]"));
            let pipeline = pipeline(model.clone(), backend.clone(), store.clone());

            let mut state = RequestState::new(QUESTION);
            state.record_query(QUERY.to_string()).unwrap();
            state.record_result("[(8,)]".to_string()).unwrap();
            store
                .save(CheckpointRecord::new(
                    "1",
                    step_of(Stage::Executed).unwrap(),
                    Stage::Executed.as_str(),
                    serde_json::to_value(&state).unwrap(),
                ))
                .await
                .unwrap();

            let report = pipeline.resume("1", Decision::Approve).await.unwrap();

            assert_eq!(report.stage, Stage::Answered);
            assert_eq!(
                report.updates,
                vec![StepUpdate::Answered {
                    answer: "There are 8 employees.".to_string()
                }]
            );
            assert!(model.structured_prompts().is_empty());
            assert!(backend.executed().is_empty());
            assert_eq!(model.text_prompts().len(), 1);
        });
    }

    #[test]
    fn test_invalid_transitions() {
        smol::block_on(async {
            let store: Arc<dyn CheckpointStore> = Arc::new(InMemoryCheckpointStore::new());
            let pipeline = pipeline(
                counting_model(),
                Arc::new(StubBackend::returning("[(8,)]")),
                store.clone(),
            );

            pipeline.start("1", QUESTION).await.unwrap();
            pipeline.resume("1", Decision::Approve).await.unwrap();

            assert!(matches!(
                pipeline.resume("1", Decision::Approve).await,
                Err(PipelineError::InvalidTransition {
                    stage: Stage::Answered,
                    action: "approve"
                })
            ));

            let mut state = RequestState::new(QUESTION);
            state.record_query(QUERY.to_string()).unwrap();
            state.record_result("[(8,)]".to_string()).unwrap();
            store
                .save(CheckpointRecord::new(
                    "2",
                    step_of(Stage::Executed).unwrap(),
                    Stage::Executed.as_str(),
                    serde_json::to_value(&state).unwrap(),
                ))
                .await
                .unwrap();
            assert!(matches!(
                pipeline.resume("2", Decision::Reject).await,
                Err(PipelineError::InvalidTransition {
                    stage: Stage::Executed,
                    action: "reject"
                })
            ));
        });
    }

    #[test]
    fn test_new_question_replaces_pending_session() {
        smol::block_on(async {
            let pipeline = pipeline(
                counting_model(),
                Arc::new(StubBackend::returning("[(8,)]")),
                Arc::new(InMemoryCheckpointStore::new()),
            );

            pipeline.start("1", "first question").await.unwrap();
            pipeline.start("1", QUESTION).await.unwrap();

            let history = pipeline.history("1").await.unwrap();
            assert_eq!(history.len(), 2);
            assert!(history.iter().all(|s| s.state.question() == QUESTION));
        });
    }

    #[test]
    fn test_sessions_are_isolated_by_thread() {
        smol::block_on(async {
            let backend = Arc::new(StubBackend::returning("[(8,)]"));
            let pipeline = pipeline(
                counting_model(),
                backend.clone(),
                Arc::new(InMemoryCheckpointStore::new()),
            );

            pipeline.start("alice", QUESTION).await.unwrap();
            pipeline.start("bob", "Who is the newest hire?").await.unwrap();
            pipeline.resume("bob", Decision::Reject).await.unwrap();

            let alice = pipeline.snapshot("alice").await.unwrap().unwrap();
            assert_eq!(alice.stage, Stage::Drafted);
            assert!(pipeline.snapshot("bob").await.unwrap().is_none());
            assert!(backend.executed().is_empty());
        });
    }

    #[test]
    fn test_resume_survives_restart() {
        smol::block_on(async {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("checkpoints.db");

            {
                let store = Arc::new(SqliteCheckpointStore::open(&path).await.unwrap());
                let first = pipeline(
                    counting_model(),
                    Arc::new(StubBackend::returning("[(8,)]")),
                    store.clone(),
                );
                first.start("1", QUESTION).await.unwrap();
                store.close().await;
            }

            let backend = Arc::new(StubBackend::returning("[(8,)]"));
            let model = counting_model();
            let second = pipeline(
                model.clone(),
                backend.clone(),
                Arc::new(SqliteCheckpointStore::open(&path).await.unwrap()),
            );

            let report = second.resume("1", Decision::Approve).await.unwrap();

            assert_eq!(report.stage, Stage::Answered);
            assert_eq!(backend.executed(), vec![QUERY]);
            assert!(model.structured_prompts().is_empty());
        });
    }

    #[test]
    fn test_cancelled_stage_has_no_step() {
        assert_eq!(step_of(Stage::Cancelled), None);
        assert_eq!(step_of(Stage::Answered), Some(3));
    }

    #[test]
    fn test_unreadable_sqlite_row_is_corrupt_checkpoint() {
        smol::block_on(async {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("checkpoints.db");
            let store = Arc::new(SqliteCheckpointStore::open(&path).await.unwrap());
            store
                .save(CheckpointRecord::new("1", 1, "drafted", json!({"question": "q"})))
                .await
                .unwrap();
            store.close().await;

            let pool = sqlx::SqlitePool::connect(&format!("sqlite:{}", path.display()))
                .await
                .unwrap();
            sqlx::query("UPDATE checkpoints SET id = 'not-a-uuid', state_json = '{bad'")
                .execute(&pool)
                .await
                .unwrap();
            pool.close().await;

            let backend = Arc::new(StubBackend::returning("[(8,)]"));
            let pipeline = pipeline(
                counting_model(),
                backend.clone(),
                Arc::new(SqliteCheckpointStore::open(&path).await.unwrap()),
            );

            assert!(matches!(
                pipeline.resume("1", Decision::Approve).await,
                Err(PipelineError::CorruptCheckpoint { ref thread_id, .. }) if thread_id == "1"
            ));
            assert!(matches!(
                pipeline.history("1").await,
                Err(PipelineError::CorruptCheckpoint { .. })
            ));
            assert!(backend.executed().is_empty());

            // A new question replaces the unreadable session
            let report = pipeline.start("1", QUESTION).await.unwrap();
            assert_eq!(report.stage, Stage::Drafted);
            assert_eq!(pipeline.history("1").await.unwrap().len(), 2);
        });
    }

    #[test]
    fn test_corrupt_checkpoint_is_reported() {
        smol::block_on(async {
            let store: Arc<dyn CheckpointStore> = Arc::new(InMemoryCheckpointStore::new());
            store
                .save(CheckpointRecord::new("1", 1, "paused", json!({"question": "q"})))
                .await
                .unwrap();
            let pipeline = pipeline(
                counting_model(),
                Arc::new(StubBackend::returning("")),
                store,
            );

            assert!(matches!(
                pipeline.resume("1", Decision::Approve).await,
                Err(PipelineError::CorruptCheckpoint { .. })
            ));
        });
    }
}
