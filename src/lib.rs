pub mod app;
pub mod config;
pub mod engine;
pub mod errors;
pub mod events;
pub mod integrations;
pub mod logging;
pub mod phase;
pub mod projects;
pub mod queue;
pub mod store;
pub mod templates;
pub mod workflow;
