//! External integrations that feed the work queues.

pub mod github;
pub mod webhook;

pub use github::{GitHubClient, MergeRequest, PrRef, PullRequestApi};
pub use webhook::{GitHubIntegration, WebhookOutcome};
