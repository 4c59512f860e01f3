//! Translates GitHub webhook deliveries into events and queued work.

use super::github::{MergeProcessor, MergeRequest, PrAnalysisProcessor, PrRef, PullRequestApi};
use crate::errors::EngineError;
use crate::events::{EventKind, EventSink, emit};
use crate::queue::{DrainOutcome, DurableQueue, QueueOptions, QueuePayload};
use crate::store::StateStore;
use anyhow::Context;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;

pub const ANALYSIS_QUEUE: &str = "pr-analysis";
pub const MERGE_QUEUE: &str = "merge";

#[derive(Debug, Deserialize)]
struct Owner {
    login: String,
}

#[derive(Debug, Deserialize)]
struct Repository {
    name: String,
    full_name: String,
    owner: Owner,
}

#[derive(Debug, Deserialize)]
struct Head {
    #[serde(rename = "ref")]
    ref_name: String,
}

#[derive(Debug, Deserialize)]
struct PullRequest {
    number: u64,
    title: String,
    body: Option<String>,
    head: Head,
}

#[derive(Debug, Deserialize)]
struct PullRequestEvent {
    action: String,
    repository: Repository,
    pull_request: PullRequest,
}

#[derive(Debug, Deserialize)]
struct CreateEvent {
    #[serde(rename = "ref")]
    ref_name: String,
    ref_type: String,
    repository: Repository,
}

/// What a webhook delivery resulted in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// Event or action the integration does not handle.
    Ignored,
    /// A pull request was announced and queued for analysis under `key`.
    PullRequestQueued { event: EventKind, key: String },
    BranchCreated { branch: String },
}

/// GitHub integration: the analysis and merge queues plus webhook handling.
pub struct GitHubIntegration {
    events: Arc<dyn EventSink>,
    analysis_queue: Arc<DurableQueue<PrRef>>,
    merge_queue: Arc<DurableQueue<MergeRequest>>,
}

impl GitHubIntegration {
    /// Open both queues from the store, wired to `api`.
    pub fn open(
        store: Arc<dyn StateStore>,
        api: Arc<dyn PullRequestApi>,
        events: Arc<dyn EventSink>,
        options: QueueOptions,
    ) -> Result<Self, EngineError> {
        let merge_queue = Arc::new(DurableQueue::<MergeRequest>::open(
            MERGE_QUEUE,
            Arc::clone(&store),
            Arc::new(MergeProcessor::new(Arc::clone(&api))),
            Arc::clone(&events),
            options,
        )?);
        let analysis_queue = Arc::new(DurableQueue::<PrRef>::open(
            ANALYSIS_QUEUE,
            store,
            Arc::new(PrAnalysisProcessor::new(api, Arc::clone(&merge_queue))),
            Arc::clone(&events),
            options,
        )?);

        Ok(Self {
            events,
            analysis_queue,
            merge_queue,
        })
    }

    pub fn analysis_queue(&self) -> &DurableQueue<PrRef> {
        &self.analysis_queue
    }

    pub fn merge_queue(&self) -> &DurableQueue<MergeRequest> {
        &self.merge_queue
    }

    /// Handle one delivery. `event` is the `X-GitHub-Event` header value.
    pub fn handle_webhook(&self, event: &str, payload: &Value) -> anyhow::Result<WebhookOutcome> {
        match event {
            "pull_request" => self.handle_pull_request(payload),
            "create" => self.handle_create(payload),
            other => {
                tracing::debug!(event = %other, "ignoring webhook");
                Ok(WebhookOutcome::Ignored)
            }
        }
    }

    fn handle_pull_request(&self, payload: &Value) -> anyhow::Result<WebhookOutcome> {
        let delivery: PullRequestEvent = serde_json::from_value(payload.clone())
            .context("Malformed pull_request webhook payload")?;

        let kind = match delivery.action.as_str() {
            "opened" => EventKind::PrCreated,
            "synchronize" => EventKind::PrUpdated,
            _ => return Ok(WebhookOutcome::Ignored),
        };

        let repo = &delivery.repository;
        let pr = &delivery.pull_request;
        tracing::info!(
            repo = %repo.full_name,
            pr = pr.number,
            action = %delivery.action,
            "pull request webhook"
        );

        emit(
            &*self.events,
            kind,
            json!({
                "repoName": repo.full_name,
                "prNumber": pr.number,
                "title": pr.title,
                "body": pr.body,
                "branch": pr.head.ref_name,
            }),
        );

        let item = PrRef::new(&repo.owner.login, &repo.name, pr.number);
        let key = item.natural_key();
        self.analysis_queue.enqueue(item)?;

        Ok(WebhookOutcome::PullRequestQueued { event: kind, key })
    }

    fn handle_create(&self, payload: &Value) -> anyhow::Result<WebhookOutcome> {
        let delivery: CreateEvent = serde_json::from_value(payload.clone())
            .context("Malformed create webhook payload")?;
        if delivery.ref_type != "branch" {
            return Ok(WebhookOutcome::Ignored);
        }

        tracing::info!(
            repo = %delivery.repository.full_name,
            branch = %delivery.ref_name,
            "branch created"
        );
        emit(
            &*self.events,
            EventKind::BranchCreated,
            json!({
                "repoName": delivery.repository.full_name,
                "branchName": delivery.ref_name,
            }),
        );
        Ok(WebhookOutcome::BranchCreated {
            branch: delivery.ref_name,
        })
    }

    /// Drain the analysis queue, then the merge queue it feeds.
    pub async fn process_queues(&self) -> Vec<DrainOutcome> {
        let mut outcomes = self.analysis_queue.drain_all().await;
        outcomes.extend(self.merge_queue.drain_all().await);
        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::EventError;
    use crate::events::Event;
    use crate::integrations::github::{MergeResult, PullRequestDetails};
    use crate::queue::QueueItemStatus;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Serves canned PR details; PR number 404 does not exist.
    #[derive(Default)]
    struct FakeApi {
        merged: Mutex<Vec<(u64, String)>>,
    }

    #[async_trait]
    impl PullRequestApi for FakeApi {
        async fn get_pull_request(
            &self,
            _owner: &str,
            _repo: &str,
            number: u64,
        ) -> anyhow::Result<PullRequestDetails> {
            if number == 404 {
                anyhow::bail!("Failed to get PR details for #{number}");
            }
            Ok(PullRequestDetails {
                number,
                title: if number == 1 {
                    "chore: auto-merge bump".into()
                } else {
                    "feat: thing".into()
                },
                body: None,
                changed_files: 2,
                additions: 10,
                deletions: 3,
            })
        }

        async fn merge_pull_request(
            &self,
            _owner: &str,
            _repo: &str,
            number: u64,
            merge_method: &str,
        ) -> anyhow::Result<MergeResult> {
            self.merged
                .lock()
                .unwrap()
                .push((number, merge_method.to_string()));
            Ok(MergeResult {
                sha: Some("abc123".into()),
                merged: true,
                message: "Pull Request successfully merged".into(),
            })
        }
    }

    #[derive(Default)]
    struct Events(Mutex<Vec<(EventKind, Value)>>);

    impl EventSink for Events {
        fn publish(&self, event: &Event) -> Result<(), EventError> {
            self.0
                .lock()
                .unwrap()
                .push((event.kind, event.payload.clone()));
            Ok(())
        }
    }

    fn integration() -> (GitHubIntegration, Arc<FakeApi>, Arc<Events>) {
        let api = Arc::new(FakeApi::default());
        let events = Arc::new(Events::default());
        let integration = GitHubIntegration::open(
            Arc::new(MemoryStore::new()),
            api.clone(),
            events.clone(),
            QueueOptions::default(),
        )
        .unwrap();
        (integration, api, events)
    }

    fn pr_payload(action: &str, number: u64) -> Value {
        json!({
            "action": action,
            "repository": {
                "name": "depla",
                "full_name": "acme/depla",
                "owner": { "login": "acme" }
            },
            "pull_request": {
                "number": number,
                "title": "Add queue",
                "body": null,
                "head": { "ref": "feature/queue" }
            }
        })
    }

    #[test]
    fn test_pr_opened_emits_and_enqueues() {
        let (integration, _, events) = integration();

        let outcome = integration
            .handle_webhook("pull_request", &pr_payload("opened", 7))
            .unwrap();

        assert_eq!(
            outcome,
            WebhookOutcome::PullRequestQueued {
                event: EventKind::PrCreated,
                key: "acme/depla#7".into()
            }
        );
        assert_eq!(integration.analysis_queue().len(), 1);
        let events = events.0.lock().unwrap();
        assert_eq!(events[0].0, EventKind::PrCreated);
        assert_eq!(events[0].1["repoName"], "acme/depla");
        assert_eq!(events[0].1["branch"], "feature/queue");
    }

    #[test]
    fn test_pr_synchronize_merges_into_existing_item() {
        let (integration, _, events) = integration();
        integration
            .handle_webhook("pull_request", &pr_payload("opened", 7))
            .unwrap();
        integration
            .handle_webhook("pull_request", &pr_payload("synchronize", 7))
            .unwrap();

        assert_eq!(integration.analysis_queue().len(), 1);
        let kinds: Vec<_> = events.0.lock().unwrap().iter().map(|(k, _)| *k).collect();
        assert_eq!(kinds, vec![EventKind::PrCreated, EventKind::PrUpdated]);
    }

    #[test]
    fn test_other_actions_and_events_ignored() {
        let (integration, _, events) = integration();
        assert_eq!(
            integration
                .handle_webhook("pull_request", &pr_payload("closed", 7))
                .unwrap(),
            WebhookOutcome::Ignored
        );
        assert_eq!(
            integration.handle_webhook("push", &json!({})).unwrap(),
            WebhookOutcome::Ignored
        );
        let tag = json!({
            "ref": "v1.0.0",
            "ref_type": "tag",
            "repository": { "name": "depla", "full_name": "acme/depla", "owner": { "login": "acme" } }
        });
        assert_eq!(
            integration.handle_webhook("create", &tag).unwrap(),
            WebhookOutcome::Ignored
        );
        assert!(events.0.lock().unwrap().is_empty());
        assert!(integration.analysis_queue().is_empty());
    }

    #[test]
    fn test_branch_created() {
        let (integration, _, events) = integration();
        let payload = json!({
            "ref": "feature/x",
            "ref_type": "branch",
            "repository": { "name": "depla", "full_name": "acme/depla", "owner": { "login": "acme" } }
        });

        let outcome = integration.handle_webhook("create", &payload).unwrap();

        assert_eq!(
            outcome,
            WebhookOutcome::BranchCreated {
                branch: "feature/x".into()
            }
        );
        let events = events.0.lock().unwrap();
        assert_eq!(events[0].0, EventKind::BranchCreated);
        assert_eq!(events[0].1["branchName"], "feature/x");
    }

    #[test]
    fn test_malformed_payload_is_error() {
        let (integration, _, _) = integration();
        assert!(integration
            .handle_webhook("pull_request", &json!({"action": "opened"}))
            .is_err());
    }

    #[tokio::test]
    async fn test_auto_merge_flows_through_both_queues() {
        let (integration, api, _) = integration();
        // PR 1 asks for auto-merge in its title; PR 2 does not; PR 404 is missing.
        for number in [1, 2, 404] {
            integration
                .analysis_queue()
                .enqueue(PrRef::new("acme", "depla", number))
                .unwrap();
        }
        let mut forced = PrRef::new("acme", "depla", 3);
        forced.auto_merge = Some(true);
        integration.analysis_queue().enqueue(forced).unwrap();

        let outcomes = integration.process_queues().await;

        assert_eq!(outcomes.len(), 6);
        assert!(integration.analysis_queue().is_empty());
        assert!(integration.merge_queue().is_empty());
        assert_eq!(
            *api.merged.lock().unwrap(),
            vec![(1, "merge".to_string()), (3, "merge".to_string())]
        );

        let history = integration.analysis_queue().history();
        let failed: Vec<_> = history
            .iter()
            .filter(|i| i.status == QueueItemStatus::Failed)
            .collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].payload.pull_number, 404);
        let analysis = history[0].result.as_ref().unwrap();
        assert_eq!(analysis["shouldAutoMerge"], true);
    }
}
