//! Workflow-graph model and parameter engine for ComfyUI job submission.
//!
//! Everything in this crate is either pure or touches only the local
//! filesystem: graph parsing, node-role classification, parameter
//! extraction and injection, output naming, and the small key-value
//! store used for prompt history.

pub mod error;
pub mod extract;
pub mod graph;
pub mod inject;
pub mod library;
pub mod naming;
pub mod params;
pub mod progress;
pub mod roles;
pub mod store;
pub mod work_item;
