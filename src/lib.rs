// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Verdant: closed-set plant identification
//!
//! Compares photos against a small, user-curated set of reference profiles
//! using a local vision model that may only answer from that set.

pub mod capture;
pub mod classifier;
pub mod config;
pub mod error;
pub mod geo;
pub mod history;
pub mod ollama;
pub mod orchestrator;
pub mod profiles;

pub use config::AppConfig;
pub use error::{CaptureError, ClassificationError, Result, VerdantError};
pub use orchestrator::{AnalysisRecord, BatchOrchestrator, ResultSink, RunOptions};
