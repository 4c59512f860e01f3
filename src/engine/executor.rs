//! Phase graph executor.
//!
//! Drives an execution one phase at a time. Each call to [`PhaseGraphExecutor::advance`]
//! runs an explicit loop over `step`: select the next eligible phase, mark it
//! running, run its task body, record the outcome, repeat. The loop stops when
//! the execution completes, fails, or has nothing it can run.
//!
//! Every state transition is written through to the store before the next
//! scheduling decision and before any event about it is published.

use super::execution::{AdvanceOutcome, Execution, ExecutionStatus};
use super::task::{TaskContext, TaskRegistry};
use crate::errors::{ConfigError, EngineError};
use crate::events::{EventKind, EventSink, emit};
use crate::phase::{PhaseRun, PhaseStatus};
use crate::projects::ProjectRepository;
use crate::store::StateStore;
use crate::workflow::WorkflowRegistry;
use chrono::Utc;
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

const EXECUTIONS: &str = "executions";

type ExecutionMap = BTreeMap<String, Execution>;

/// Result of one scheduling step.
enum Step {
    Continue,
    Stop(AdvanceOutcome),
}

struct Inner {
    workflows: Arc<WorkflowRegistry>,
    projects: Arc<dyn ProjectRepository>,
    tasks: TaskRegistry,
    store: Arc<dyn StateStore>,
    events: Arc<dyn EventSink>,
    executions: Mutex<ExecutionMap>,
}

/// Creates and drives executions. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct PhaseGraphExecutor {
    inner: Arc<Inner>,
}

impl PhaseGraphExecutor {
    /// Create an executor and restore persisted executions.
    ///
    /// Executions persisted as running with a phase still marked running were
    /// interrupted mid-task; that phase is reset to pending so [`resume_all`]
    /// can pick it up again.
    ///
    /// [`resume_all`]: PhaseGraphExecutor::resume_all
    pub fn new(
        workflows: Arc<WorkflowRegistry>,
        projects: Arc<dyn ProjectRepository>,
        tasks: TaskRegistry,
        store: Arc<dyn StateStore>,
        events: Arc<dyn EventSink>,
    ) -> Result<Self, EngineError> {
        let mut executions: ExecutionMap = store.load_or_default(EXECUTIONS)?;

        let mut recovered = 0;
        for execution in executions.values_mut() {
            if execution.recover_interrupted() {
                tracing::warn!(execution_id = %execution.id, "reset interrupted phase to pending");
                recovered += 1;
            }
        }
        if recovered > 0 {
            store.save_typed(EXECUTIONS, &executions)?;
        }

        tracing::debug!(count = executions.len(), recovered, "restored executions");
        Ok(Self {
            inner: Arc::new(Inner {
                workflows,
                projects,
                tasks,
                store,
                events,
                executions: Mutex::new(executions),
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, ExecutionMap> {
        self.inner
            .executions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    /// Write the whole collection. Failures are logged; the in-memory
    /// transition stands.
    fn persist(&self, executions: &ExecutionMap) {
        if let Err(e) = self.inner.store.save_typed(EXECUTIONS, executions) {
            tracing::error!(error = %e, "failed to persist executions");
        }
    }

    /// Create a running execution for `workflow_id` without driving it.
    pub fn create(
        &self,
        workflow_id: &str,
        mut context: Map<String, Value>,
    ) -> Result<Execution, EngineError> {
        let workflow = self.inner.workflows.get_workflow(workflow_id).ok_or_else(|| {
            ConfigError::WorkflowNotFound {
                id: workflow_id.to_string(),
            }
        })?;

        if let Some(phase) = workflow
            .phases
            .iter()
            .find(|p| !self.inner.tasks.contains(&p.task_type))
        {
            return Err(ConfigError::UnknownTaskType {
                phase: phase.name.clone(),
                task_type: phase.task_type.clone(),
            }
            .into());
        }

        if let Some(project_id) = workflow.project_id.as_deref() {
            let project =
                self.inner
                    .projects
                    .get(project_id)
                    .ok_or_else(|| ConfigError::ProjectNotFound {
                        id: project_id.to_string(),
                    })?;
            context
                .entry("projectId")
                .or_insert_with(|| json!(project.id));
            context
                .entry("projectName")
                .or_insert_with(|| json!(project.name));
            if let Some(url) = &project.repo_url {
                context.entry("repoUrl").or_insert_with(|| json!(url));
            }
        }

        let execution = Execution {
            id: Uuid::new_v4().to_string(),
            workflow_id: workflow.id.clone(),
            status: ExecutionStatus::Running,
            phases: workflow.phases.into_iter().map(PhaseRun::pending).collect(),
            context,
            started_at: Utc::now(),
            completed_at: None,
            error: None,
            current_phase: None,
        };

        let mut executions = self.lock();
        executions.insert(execution.id.clone(), execution.clone());
        if let Err(e) = self.inner.store.save_typed(EXECUTIONS, &*executions) {
            executions.remove(&execution.id);
            return Err(e.into());
        }
        drop(executions);

        tracing::info!(
            execution_id = %execution.id,
            workflow_id = %execution.workflow_id,
            phases = execution.phases.len(),
            "execution created"
        );
        Ok(execution)
    }

    /// Create an execution and drive it in the background.
    ///
    /// Returns the initial snapshot immediately. Must be called from within a
    /// tokio runtime for the drive loop to be scheduled; otherwise the
    /// execution stays pending until someone calls [`advance`].
    ///
    /// [`advance`]: PhaseGraphExecutor::advance
    pub fn start(
        &self,
        workflow_id: &str,
        context: Map<String, Value>,
    ) -> Result<Execution, EngineError> {
        let execution = self.create(workflow_id, context)?;

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let this = self.clone();
                let id = execution.id.clone();
                handle.spawn(async move {
                    if let Err(e) = this.advance(&id).await {
                        tracing::error!(execution_id = %id, error = %e, "advance failed");
                    }
                });
            }
            Err(_) => {
                tracing::warn!(execution_id = %execution.id, "no runtime; execution not scheduled");
            }
        }

        Ok(execution)
    }

    /// Create an execution and drive it until it stops.
    pub async fn run(
        &self,
        workflow_id: &str,
        context: Map<String, Value>,
    ) -> Result<(Execution, AdvanceOutcome), EngineError> {
        let created = self.create(workflow_id, context)?;
        let outcome = self.advance(&created.id).await?;
        let execution = self
            .get_execution(&created.id)
            .ok_or(EngineError::ExecutionNotFound { id: created.id })?;
        Ok((execution, outcome))
    }

    /// Run phases until the execution completes, fails, or cannot proceed.
    ///
    /// Each step runs the first pending phase, in definition order, whose
    /// dependencies have all completed. A pending phase with unfinished
    /// dependencies is skipped rather than stopping the run, so declaration
    /// order never changes the result. [`AdvanceOutcome::Blocked`] is
    /// returned only when pending phases remain and none of them is eligible.
    ///
    /// A no-op returning [`AdvanceOutcome::Idle`] if the execution is terminal or
    /// another caller is already running one of its phases.
    pub async fn advance(&self, execution_id: &str) -> Result<AdvanceOutcome, EngineError> {
        loop {
            match self.step(execution_id).await? {
                Step::Continue => continue,
                Step::Stop(outcome) => return Ok(outcome),
            }
        }
    }

    async fn step(&self, execution_id: &str) -> Result<Step, EngineError> {
        let not_found = || EngineError::ExecutionNotFound {
            id: execution_id.to_string(),
        };

        let (index, ctx) = {
            let mut executions = self.lock();
            let execution = executions.get_mut(execution_id).ok_or_else(not_found)?;

            if execution.status != ExecutionStatus::Running || execution.running_phase().is_some() {
                return Ok(Step::Stop(AdvanceOutcome::Idle));
            }

            let completed: HashSet<String> = execution
                .phases
                .iter()
                .filter(|p| p.status == PhaseStatus::Completed)
                .map(|p| p.name().to_string())
                .collect();
            let pending: Vec<usize> = execution
                .phases
                .iter()
                .enumerate()
                .filter(|(_, p)| p.status == PhaseStatus::Pending)
                .map(|(i, _)| i)
                .collect();

            let Some(&first_pending) = pending.first() else {
                execution.status = ExecutionStatus::Completed;
                execution.completed_at = Some(Utc::now());
                let payload = json!({
                    "executionId": execution.id,
                    "workflowId": execution.workflow_id,
                    "projectId": execution.project_id(),
                });
                self.persist(&executions);
                drop(executions);

                tracing::info!(execution_id = %execution_id, "execution completed");
                emit(&*self.inner.events, EventKind::WorkflowCompleted, payload);
                return Ok(Step::Stop(AdvanceOutcome::Completed));
            };

            let eligible = pending.iter().copied().find(|&i| {
                execution.phases[i]
                    .definition
                    .dependencies
                    .iter()
                    .all(|dep| completed.contains(dep.as_str()))
            });

            let Some(index) = eligible else {
                let blocked = &execution.phases[first_pending];
                let waiting_on: Vec<String> = blocked
                    .definition
                    .dependencies
                    .iter()
                    .filter(|dep| !completed.contains(dep.as_str()))
                    .cloned()
                    .collect();
                tracing::debug!(
                    execution_id = %execution_id,
                    phase = %blocked.name(),
                    ?waiting_on,
                    "execution blocked"
                );
                return Ok(Step::Stop(AdvanceOutcome::Blocked {
                    phase: blocked.name().to_string(),
                    waiting_on,
                }));
            };

            let phase = &mut execution.phases[index];
            phase.mark_running();
            let definition = phase.definition.clone();
            execution.current_phase = Some(index);
            let ctx = TaskContext {
                execution_id: execution.id.clone(),
                workflow_id: execution.workflow_id.clone(),
                phase: definition,
                context: execution.context.clone(),
            };
            self.persist(&executions);
            (index, ctx)
        };

        tracing::info!(
            execution_id = %execution_id,
            phase = %ctx.phase.name,
            task_type = %ctx.phase.task_type,
            "running phase"
        );
        let result = match self.inner.tasks.get(&ctx.phase.task_type) {
            Some(body) => body.run(&ctx).await,
            None => Err(anyhow::anyhow!("unknown task type '{}'", ctx.phase.task_type)),
        };

        let mut executions = self.lock();
        let execution = executions.get_mut(execution_id).ok_or_else(not_found)?;
        let name = ctx.phase.name;

        match result {
            Ok(output) => {
                execution.phases[index].mark_completed(output.clone());
                let mut payload = json!({
                    "executionId": execution.id,
                    "workflowId": execution.workflow_id,
                    "projectId": execution.project_id(),
                    "phase": name,
                });
                if let Some(output) = output {
                    payload["output"] = output;
                }
                self.persist(&executions);
                drop(executions);

                tracing::info!(execution_id = %execution_id, phase = %name, "phase completed");
                emit(&*self.inner.events, EventKind::PhaseCompleted, payload);
                Ok(Step::Continue)
            }
            Err(e) => {
                let error = format!("{e:#}");
                execution.phases[index].mark_failed(&error);
                execution.status = ExecutionStatus::Failed;
                execution.completed_at = Some(Utc::now());
                execution.error = Some(format!("Phase {name} failed: {error}"));
                let payload = json!({
                    "executionId": execution.id,
                    "workflowId": execution.workflow_id,
                    "projectId": execution.project_id(),
                    "phase": name,
                    "error": error,
                });
                self.persist(&executions);
                drop(executions);

                tracing::error!(execution_id = %execution_id, phase = %name, error = %error, "phase failed");
                emit(&*self.inner.events, EventKind::WorkflowFailed, payload);
                Ok(Step::Stop(AdvanceOutcome::Failed { phase: name, error }))
            }
        }
    }

    /// Advance every execution still marked running. Used after a restart.
    pub async fn resume_all(&self) -> Vec<(String, Result<AdvanceOutcome, EngineError>)> {
        let ids: Vec<String> = self
            .lock()
            .values()
            .filter(|e| e.status == ExecutionStatus::Running)
            .map(|e| e.id.clone())
            .collect();

        let results = futures::future::join_all(ids.iter().map(|id| self.advance(id))).await;
        ids.into_iter().zip(results).collect()
    }

    pub fn get_execution(&self, id: &str) -> Option<Execution> {
        self.lock().get(id).cloned()
    }

    /// All executions, oldest first.
    pub fn all_executions(&self) -> Vec<Execution> {
        let mut all: Vec<Execution> = self.lock().values().cloned().collect();
        all.sort_by(|a, b| a.started_at.cmp(&b.started_at).then(a.id.cmp(&b.id)));
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::task::{NoopTask, TaskBody};
    use crate::errors::EventError;
    use crate::events::{Event, EventBus};
    use crate::phase::PhaseDefinition;
    use crate::projects::{Project, StoredProjectRepository};
    use crate::store::{JsonFileStore, MemoryStore};
    use crate::workflow::WorkflowSpec;
    use async_trait::async_trait;
    use std::time::Duration;
    use tempfile::tempdir;
    use tokio::sync::Notify;

    /// Records the order phases ran in.
    struct RecordingTask(Arc<Mutex<Vec<String>>>);

    #[async_trait]
    impl TaskBody for RecordingTask {
        async fn run(&self, ctx: &TaskContext) -> anyhow::Result<Option<Value>> {
            self.0.lock().unwrap().push(ctx.phase.name.clone());
            Ok(Some(json!({ "ran": ctx.phase.name })))
        }
    }

    struct FailingTask;

    #[async_trait]
    impl TaskBody for FailingTask {
        async fn run(&self, _ctx: &TaskContext) -> anyhow::Result<Option<Value>> {
            anyhow::bail!("boom")
        }
    }

    /// Blocks until released.
    struct GateTask {
        entered: Arc<Notify>,
        release: Arc<Notify>,
    }

    #[async_trait]
    impl TaskBody for GateTask {
        async fn run(&self, _ctx: &TaskContext) -> anyhow::Result<Option<Value>> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(None)
        }
    }

    /// Captures events along with the persisted status of the execution at
    /// the moment each event was published.
    struct CapturingSink {
        store: Arc<dyn StateStore>,
        seen: Mutex<Vec<(EventKind, Value, Option<String>)>>,
    }

    impl EventSink for CapturingSink {
        fn publish(&self, event: &Event) -> Result<(), EventError> {
            let persisted: ExecutionMap = self.store.load_or_default(EXECUTIONS).unwrap();
            let status = event.payload["executionId"]
                .as_str()
                .and_then(|id| persisted.get(id))
                .map(|e| e.status.to_string());
            self.seen
                .lock()
                .unwrap()
                .push((event.kind, event.payload.clone(), status));
            Ok(())
        }
    }

    struct Harness {
        executor: PhaseGraphExecutor,
        workflows: Arc<WorkflowRegistry>,
        projects: Arc<StoredProjectRepository>,
        store: Arc<dyn StateStore>,
        sink: Arc<CapturingSink>,
        ran: Arc<Mutex<Vec<String>>>,
    }

    fn harness_with(store: Arc<dyn StateStore>, extra: impl FnOnce(&mut TaskRegistry)) -> Harness {
        let ran = Arc::new(Mutex::new(Vec::new()));
        let mut tasks = TaskRegistry::new();
        tasks.register("noop", NoopTask);
        tasks.register("record", RecordingTask(Arc::clone(&ran)));
        tasks.register("fail", FailingTask);
        extra(&mut tasks);

        let workflows = Arc::new(WorkflowRegistry::load(Arc::clone(&store)).unwrap());
        let projects = Arc::new(StoredProjectRepository::load(Arc::clone(&store)).unwrap());
        let sink = Arc::new(CapturingSink {
            store: Arc::clone(&store),
            seen: Mutex::new(Vec::new()),
        });
        let executor = PhaseGraphExecutor::new(
            Arc::clone(&workflows),
            projects.clone(),
            tasks,
            Arc::clone(&store),
            sink.clone(),
        )
        .unwrap();

        Harness {
            executor,
            workflows,
            projects,
            store,
            sink,
            ran,
        }
    }

    fn harness() -> Harness {
        harness_with(Arc::new(MemoryStore::new()), |_| {})
    }

    fn phase(name: &str, task_type: &str, deps: &[&str]) -> PhaseDefinition {
        PhaseDefinition::new(name, task_type, 0, deps.iter().map(|d| d.to_string()).collect())
    }

    fn workflow(h: &Harness, phases: Vec<PhaseDefinition>) -> String {
        h.workflows
            .create_workflow(WorkflowSpec::new("test", phases))
            .unwrap()
            .id
    }

    fn event_kinds(h: &Harness) -> Vec<EventKind> {
        h.sink.seen.lock().unwrap().iter().map(|(k, _, _)| *k).collect()
    }

    #[tokio::test]
    async fn test_fan_out_runs_dependents_after_root() {
        let h = harness();
        let wf = workflow(
            &h,
            vec![
                phase("A", "record", &[]),
                phase("B", "record", &["A"]),
                phase("C", "record", &["A"]),
            ],
        );

        let (execution, outcome) = h.executor.run(&wf, Map::new()).await.unwrap();

        assert_eq!(outcome, AdvanceOutcome::Completed);
        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert!(execution.completed_at.is_some());
        assert_eq!(*h.ran.lock().unwrap(), vec!["A", "B", "C"]);
        assert!(execution.phases.iter().all(|p| p.status == PhaseStatus::Completed));
        assert_eq!(execution.phase("B").unwrap().output, Some(json!({"ran": "B"})));
        assert_eq!(
            event_kinds(&h),
            vec![
                EventKind::PhaseCompleted,
                EventKind::PhaseCompleted,
                EventKind::PhaseCompleted,
                EventKind::WorkflowCompleted,
            ]
        );
    }

    #[tokio::test]
    async fn test_completes_regardless_of_declaration_order() {
        let h = harness();
        let phases = vec![
            phase("Deploy", "record", &["Test"]),
            phase("Test", "record", &["Build"]),
            phase("Docs", "record", &[]),
            phase("Build", "record", &[]),
        ];
        let expected = crate::workflow::PhaseGraph::build(&phases)
            .unwrap()
            .topological_order()
            .unwrap();
        let wf = workflow(&h, phases);

        let (execution, outcome) = h.executor.run(&wf, Map::new()).await.unwrap();

        assert_eq!(outcome, AdvanceOutcome::Completed);
        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert_eq!(*h.ran.lock().unwrap(), expected);
    }

    #[tokio::test]
    async fn test_failure_stops_execution() {
        let h = harness();
        let wf = workflow(
            &h,
            vec![
                phase("A", "record", &[]),
                phase("B", "fail", &["A"]),
                phase("C", "record", &["B"]),
            ],
        );

        let (execution, outcome) = h.executor.run(&wf, Map::new()).await.unwrap();

        assert_eq!(
            outcome,
            AdvanceOutcome::Failed {
                phase: "B".into(),
                error: "boom".into()
            }
        );
        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert_eq!(execution.error.as_deref(), Some("Phase B failed: boom"));
        assert_eq!(execution.phase("A").unwrap().status, PhaseStatus::Completed);
        assert_eq!(execution.phase("B").unwrap().status, PhaseStatus::Failed);
        assert_eq!(execution.phase("B").unwrap().error.as_deref(), Some("boom"));
        assert_eq!(execution.phase("C").unwrap().status, PhaseStatus::Pending);

        let seen = h.sink.seen.lock().unwrap();
        let (kind, payload, _) = seen.last().unwrap();
        assert_eq!(*kind, EventKind::WorkflowFailed);
        assert_eq!(payload["phase"], "B");
        assert_eq!(payload["error"], "boom");
        assert_eq!(payload["executionId"], execution.id.as_str());
    }

    #[tokio::test]
    async fn test_events_published_after_persist() {
        let h = harness();
        let wf = workflow(&h, vec![phase("A", "noop", &[])]);

        h.executor.run(&wf, Map::new()).await.unwrap();

        let seen = h.sink.seen.lock().unwrap();
        let completed = seen
            .iter()
            .find(|(k, _, _)| *k == EventKind::WorkflowCompleted)
            .unwrap();
        assert_eq!(completed.2.as_deref(), Some("completed"));
    }

    #[tokio::test]
    async fn test_advance_terminal_execution_is_idle() {
        let h = harness();
        let wf = workflow(&h, vec![phase("A", "noop", &[])]);
        let (execution, _) = h.executor.run(&wf, Map::new()).await.unwrap();
        let events_before = event_kinds(&h).len();

        let outcome = h.executor.advance(&execution.id).await.unwrap();

        assert_eq!(outcome, AdvanceOutcome::Idle);
        assert_eq!(event_kinds(&h).len(), events_before);
    }

    #[tokio::test]
    async fn test_advance_unknown_execution() {
        let h = harness();
        let err = h.executor.advance("missing").await.unwrap_err();
        assert!(matches!(err, EngineError::ExecutionNotFound { ref id } if id == "missing"));
    }

    #[tokio::test]
    async fn test_empty_workflow_completes_immediately() {
        let h = harness();
        let wf = workflow(&h, vec![]);
        let (execution, outcome) = h.executor.run(&wf, Map::new()).await.unwrap();
        assert_eq!(outcome, AdvanceOutcome::Completed);
        assert_eq!(execution.status, ExecutionStatus::Completed);
    }

    #[tokio::test]
    async fn test_start_validates_configuration() {
        let h = harness();
        let err = h.executor.start("missing", Map::new()).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Config(ConfigError::WorkflowNotFound { .. })
        ));

        let wf = workflow(&h, vec![phase("A", "teleport", &[])]);
        let err = h.executor.start(&wf, Map::new()).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Config(ConfigError::UnknownTaskType { ref task_type, .. }) if task_type == "teleport"
        ));

        let spec = WorkflowSpec::new("p", vec![phase("A", "noop", &[])]).with_project("ghost");
        let wf = h.workflows.create_workflow(spec).unwrap().id;
        let err = h.executor.start(&wf, Map::new()).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Config(ConfigError::ProjectNotFound { .. })
        ));
        assert!(h.executor.all_executions().is_empty());
    }

    #[tokio::test]
    async fn test_project_fields_seeded_into_context() {
        let h = harness();
        h.projects.upsert(Project::new("p1", "Depla")).unwrap();
        let spec = WorkflowSpec::new("p", vec![phase("A", "noop", &[])]).with_project("p1");
        let wf = h.workflows.create_workflow(spec).unwrap().id;

        let mut context = Map::new();
        context.insert("projectName".into(), json!("Override"));
        let (execution, _) = h.executor.run(&wf, context).await.unwrap();

        assert_eq!(execution.context["projectId"], "p1");
        assert_eq!(execution.context["projectName"], "Override");
        let seen = h.sink.seen.lock().unwrap();
        assert!(seen.iter().all(|(_, payload, _)| payload["projectId"] == "p1"));
    }

    #[tokio::test]
    async fn test_start_drives_in_background() {
        let h = harness();
        let wf = workflow(&h, vec![phase("A", "record", &[]), phase("B", "record", &["A"])]);

        let snapshot = h.executor.start(&wf, Map::new()).unwrap();
        assert_eq!(snapshot.status, ExecutionStatus::Running);

        let mut status = ExecutionStatus::Running;
        for _ in 0..100 {
            status = h.executor.get_execution(&snapshot.id).unwrap().status;
            if status.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(status, ExecutionStatus::Completed);
        assert_eq!(*h.ran.lock().unwrap(), vec!["A", "B"]);
    }

    #[tokio::test]
    async fn test_concurrent_advance_is_idle_while_phase_runs() {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let (e, r) = (Arc::clone(&entered), Arc::clone(&release));
        let h = harness_with(Arc::new(MemoryStore::new()), move |tasks| {
            tasks.register(
                "gate",
                GateTask {
                    entered: e,
                    release: r,
                },
            );
        });
        let wf = workflow(&h, vec![phase("A", "gate", &[])]);
        let execution = h.executor.create(&wf, Map::new()).unwrap();

        let executor = h.executor.clone();
        let id = execution.id.clone();
        let first = tokio::spawn(async move { executor.advance(&id).await });

        entered.notified().await;
        let snapshot = h.executor.get_execution(&execution.id).unwrap();
        assert_eq!(snapshot.phases[0].status, PhaseStatus::Running);
        assert_eq!(snapshot.current_phase, Some(0));
        assert_eq!(
            h.executor.advance(&execution.id).await.unwrap(),
            AdvanceOutcome::Idle
        );

        release.notify_one();
        assert_eq!(first.await.unwrap().unwrap(), AdvanceOutcome::Completed);
    }

    #[tokio::test]
    async fn test_blocked_on_unresolved_dependency() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
        let b = PhaseRun::pending(phase("B", "noop", &["Ghost"]));
        let execution = Execution {
            id: "e1".into(),
            workflow_id: "wf".into(),
            status: ExecutionStatus::Running,
            phases: vec![b],
            context: Map::new(),
            started_at: Utc::now(),
            completed_at: None,
            error: None,
            current_phase: None,
        };
        let mut map = ExecutionMap::new();
        map.insert("e1".into(), execution);
        store.save_typed(EXECUTIONS, &map).unwrap();

        let h = harness_with(store, |_| {});
        let outcome = h.executor.advance("e1").await.unwrap();

        assert_eq!(
            outcome,
            AdvanceOutcome::Blocked {
                phase: "B".into(),
                waiting_on: vec!["Ghost".into()]
            }
        );
        assert_eq!(
            h.executor.get_execution("e1").unwrap().status,
            ExecutionStatus::Running
        );
        assert!(event_kinds(&h).is_empty());
    }

    #[tokio::test]
    async fn test_blocked_phase_does_not_hold_back_later_eligible_phase() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
        let execution = Execution {
            id: "e1".into(),
            workflow_id: "wf".into(),
            status: ExecutionStatus::Running,
            phases: vec![
                PhaseRun::pending(phase("B", "record", &["Ghost"])),
                PhaseRun::pending(phase("C", "record", &[])),
            ],
            context: Map::new(),
            started_at: Utc::now(),
            completed_at: None,
            error: None,
            current_phase: None,
        };
        let mut map = ExecutionMap::new();
        map.insert("e1".into(), execution);
        store.save_typed(EXECUTIONS, &map).unwrap();

        let h = harness_with(store, |_| {});
        let outcome = h.executor.advance("e1").await.unwrap();

        assert_eq!(*h.ran.lock().unwrap(), vec!["C"]);
        assert_eq!(
            outcome,
            AdvanceOutcome::Blocked {
                phase: "B".into(),
                waiting_on: vec!["Ghost".into()]
            }
        );
        let execution = h.executor.get_execution("e1").unwrap();
        assert_eq!(execution.phase("C").unwrap().status, PhaseStatus::Completed);
        assert_eq!(execution.phase("B").unwrap().status, PhaseStatus::Pending);
    }

    #[tokio::test]
    async fn test_restart_recovers_interrupted_execution() {
        let dir = tempdir().unwrap();
        let execution_id = {
            let store: Arc<dyn StateStore> = Arc::new(JsonFileStore::open(dir.path()).unwrap());
            let h = harness_with(store, |_| {});
            let wf = workflow(&h, vec![phase("A", "record", &[]), phase("B", "record", &["A"])]);
            let execution = h.executor.create(&wf, Map::new()).unwrap();

            // Simulate a crash while A was running.
            let mut persisted: ExecutionMap = h.store.load_or_default(EXECUTIONS).unwrap();
            persisted
                .get_mut(&execution.id)
                .unwrap()
                .phases[0]
                .mark_running();
            h.store.save_typed(EXECUTIONS, &persisted).unwrap();
            execution.id
        };

        let store: Arc<dyn StateStore> = Arc::new(JsonFileStore::open(dir.path()).unwrap());
        let h = harness_with(store, |_| {});
        let restored = h.executor.get_execution(&execution_id).unwrap();
        assert_eq!(restored.phases[0].status, PhaseStatus::Pending);

        let results = h.executor.resume_all().await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, execution_id);
        assert_eq!(*results[0].1.as_ref().unwrap(), AdvanceOutcome::Completed);
        assert_eq!(*h.ran.lock().unwrap(), vec!["A", "B"]);
    }

    #[tokio::test]
    async fn test_failing_subscriber_does_not_affect_state() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
        let workflows = Arc::new(WorkflowRegistry::load(Arc::clone(&store)).unwrap());
        let projects = Arc::new(StoredProjectRepository::load(Arc::clone(&store)).unwrap());
        let bus = Arc::new(EventBus::new());
        bus.subscribe(EventKind::PhaseCompleted, |_| anyhow::bail!("subscriber broke"));

        let mut tasks = TaskRegistry::new();
        tasks.register("noop", NoopTask);
        let executor =
            PhaseGraphExecutor::new(Arc::clone(&workflows), projects, tasks, store, bus).unwrap();
        let wf = workflows
            .create_workflow(WorkflowSpec::new("w", vec![phase("A", "noop", &[])]))
            .unwrap();

        let (execution, outcome) = executor.run(&wf.id, Map::new()).await.unwrap();
        assert_eq!(outcome, AdvanceOutcome::Completed);
        assert_eq!(execution.status, ExecutionStatus::Completed);
    }

    #[tokio::test]
    async fn test_all_executions_oldest_first() {
        let h = harness();
        let wf = workflow(&h, vec![phase("A", "noop", &[])]);
        let first = h.executor.create(&wf, Map::new()).unwrap();
        let second = h.executor.create(&wf, Map::new()).unwrap();

        let all = h.executor.all_executions();
        assert_eq!(all.len(), 2);
        assert!(all[0].started_at <= all[1].started_at);
        assert!(all.iter().any(|e| e.id == first.id));
        assert!(all.iter().any(|e| e.id == second.id));
    }
}
