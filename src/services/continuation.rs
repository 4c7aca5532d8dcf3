//! Self-continuation of the loader.
//!
//! A loader invocation handles a bounded number of batches. When more remain
//! it asks a [`ContinuationTrigger`] to start exactly one follow-up run.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

/// Errors starting a continuation.
#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("Failed to locate executable: {0}")]
    Executable(std::io::Error),

    #[error("Failed to spawn continuation: {0}")]
    Spawn(std::io::Error),

    #[error("Failed to encode payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Opaque payload handed to the continued invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContinuationPayload {
    pub trigger: String,
}

impl ContinuationPayload {
    /// Payload of an automatic continuation.
    pub fn auto() -> Self {
        Self {
            trigger: "auto".to_string(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Whether this invocation was started by a previous loader run.
    pub fn is_auto(&self) -> bool {
        self.trigger == "auto"
    }
}

/// Starts a new loader invocation.
#[async_trait]
pub trait ContinuationTrigger: Send + Sync {
    async fn trigger(&self, payload: &ContinuationPayload) -> Result<(), TriggerError>;
}

/// Re-runs the current executable's `load` command as a detached child.
#[derive(Debug, Clone, Default)]
pub struct ProcessTrigger {
    /// Arguments placed before `load`, e.g. `--config path`.
    global_args: Vec<String>,
    /// Executable to run; defaults to the current one.
    program: Option<PathBuf>,
}

impl ProcessTrigger {
    pub fn new(global_args: Vec<String>) -> Self {
        Self {
            global_args,
            program: None,
        }
    }

    pub fn with_program(mut self, program: PathBuf) -> Self {
        self.program = Some(program);
        self
    }

    /// Full argument list for the continued invocation.
    pub fn args(&self, payload: &ContinuationPayload) -> Result<Vec<String>, TriggerError> {
        let mut args = self.global_args.clone();
        args.push("load".to_string());
        args.push("--payload".to_string());
        args.push(payload.to_json()?);
        Ok(args)
    }
}

#[async_trait]
impl ContinuationTrigger for ProcessTrigger {
    async fn trigger(&self, payload: &ContinuationPayload) -> Result<(), TriggerError> {
        let program = match &self.program {
            Some(p) => p.clone(),
            None => std::env::current_exe().map_err(TriggerError::Executable)?,
        };
        let child = tokio::process::Command::new(&program)
            .args(self.args(payload)?)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(TriggerError::Spawn)?;

        // Not awaited: the child outlives this invocation.
        info!(pid = child.id(), program = %program.display(), "Started continuation");
        Ok(())
    }
}
