pub mod analysts;
pub mod commands;
pub mod depends;
pub mod health;
pub mod jobs;
pub mod metrics;
pub mod rpc;
pub mod tasks;
