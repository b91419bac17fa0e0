//! ComfyUI REST client and job lifecycle.
//!
//! Provides the HTTP API wrapper, fixed-backoff retry, the availability
//! gate with Home Assistant power-on, job submission and polling, and
//! artifact download for ComfyUI image-generation servers.

pub mod api;
pub mod artifacts;
pub mod availability;
pub mod jobs;
pub mod retry;
pub mod switch;
