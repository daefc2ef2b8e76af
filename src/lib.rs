//! paratrans - Streaming paragraph translation through a local ollama
//!
//! Paragraphs are translated one at a time, in order, with retry, timeouts
//! and cooperative cancellation. Progress, per-paragraph status and partial
//! output are pushed to an event sink as they happen.

pub mod cancel;
pub mod cli;
pub mod config;
pub mod error;
pub mod events;
pub mod extract;
pub mod job;
pub mod languages;
pub mod service;
pub mod stdio;
pub mod translate;
