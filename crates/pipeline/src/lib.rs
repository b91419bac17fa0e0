//! Run orchestration: availability gate, then upload, inject, submit,
//! poll and download for every iteration of a work item.

pub mod orchestrator;

pub use orchestrator::{Orchestrator, RunError, RunRequest, RunTiming};
