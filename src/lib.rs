//! Turns source documents into structured study notes.
//!
//! A document goes through a fixed sequence of stages (see [`pipeline`]).
//! Stages that depend on AI generation degrade to rule-based templates and
//! finally to a minimal reorganisation of the raw text, so a readable
//! document comes out of every run whose input can be read at all.

pub mod anthropic;
pub mod artifacts;
pub mod cli;
pub mod config;
pub mod error;
pub mod exercises;
pub mod extraction;
pub mod generation;
pub mod jobs;
pub mod logging;
pub mod model;
pub mod notes;
pub mod patterns;
pub mod pipeline;
pub mod state_machine;
pub mod ui;
