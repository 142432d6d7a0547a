#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::struct_field_names,
    clippy::must_use_candidate,
    clippy::new_without_default,
    clippy::return_self_not_must_use
)]

//! Adjutant: the contextual response pipeline and action-approval workflow
//! of a personal AI assistant.
//!
//! The pipeline takes a raw user message, defends it against prompt
//! manipulation, assembles a bounded multi-source context, drives an
//! iterative generation loop that can fetch external information
//! mid-response, extracts structured action proposals from the output, and
//! manages those proposals through an approval/execution state machine with
//! idempotency and audit guarantees.

pub mod actions;
pub mod config;
pub mod context;
pub mod error;
pub mod gateway;
pub mod llm;
pub mod lookup;
pub mod pipeline;
pub mod prompt;
pub mod roles;
pub mod security;
pub mod sources;

pub use config::{Config, ConfigHandle};
pub use error::{AdjutantError, Result};
pub use pipeline::{ChatEvent, ChatRequest, Message, Pipeline, PipelineParams};
