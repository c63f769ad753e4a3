//! Run command implementation.
//!
//! Replays a script of invocations against a processor over an in-memory
//! store and prints every push as one JSON line on stdout.

use objsync_server::{
    CommandProcessor, Hooks, Invocation, ProcessorConfig, RecordingTransport, RetryConfig,
    ShallowSetMerger, SyncError,
};
use objsync_store::InMemoryStore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

/// Errors that stop a script run.
#[derive(Error, Debug)]
pub enum ScriptError {
    /// Reading the script or writing output failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The script is not valid JSON or a step has an unexpected shape.
    #[error("invalid script: {0}")]
    Json(#[from] serde_json::Error),

    /// A step is neither a message nor a disconnect.
    #[error("step {index}: {reason}")]
    InvalidStep {
        /// Zero-based step index.
        index: usize,
        /// What is wrong with it.
        reason: &'static str,
    },
}

/// Engine settings taken from the command line.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Connection page size.
    pub page_size: usize,
    /// Append attempt budget.
    pub retries: u32,
    /// Log length that triggers a merge.
    pub merge_threshold: Option<usize>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            page_size: objsync_server::DEFAULT_PAGE_SIZE,
            retries: 3,
            merge_threshold: None,
        }
    }
}

/// One scripted invocation.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct Step {
    #[serde(default)]
    socket: Option<String>,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    message: Option<Value>,
    #[serde(default)]
    disconnect: bool,
}

/// One line of output.
#[derive(Debug, Serialize)]
struct PushLine<'a> {
    socket: &'a str,
    message: Value,
}

/// Counters for a finished run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Steps executed.
    pub steps: usize,
    /// Pushes printed.
    pub pushes: usize,
    /// Steps the processor rejected.
    pub rejected: usize,
}

/// Runs the script at `path`, writing pushes to stdout.
pub fn run(path: &Path, options: &RunOptions) -> Result<(), Box<dyn std::error::Error>> {
    let script = std::fs::read(path)?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let summary = run_script(&script, options, &mut out)?;

    info!(
        steps = summary.steps,
        pushes = summary.pushes,
        rejected = summary.rejected,
        "script complete"
    );
    Ok(())
}

/// Runs a script held in memory, writing pushes to `out`.
pub fn run_script(
    script: &[u8],
    options: &RunOptions,
    out: &mut dyn Write,
) -> Result<RunSummary, ScriptError> {
    let steps: Vec<Step> = serde_json::from_slice(script)?;
    for (index, step) in steps.iter().enumerate() {
        match (&step.message, step.disconnect) {
            (Some(_), true) => {
                return Err(ScriptError::InvalidStep {
                    index,
                    reason: "a step cannot both send a message and disconnect",
                })
            }
            (None, false) => {
                return Err(ScriptError::InvalidStep {
                    index,
                    reason: "a step needs a message or \"disconnect\": true",
                })
            }
            _ => {}
        }
    }

    let transport = Arc::new(RecordingTransport::new());
    let processor = CommandProcessor::new(
        Arc::new(InMemoryStore::new()),
        transport.clone(),
        hooks(options),
        config(options),
    );

    let mut summary = RunSummary::default();
    for (index, step) in steps.into_iter().enumerate() {
        let socket = step
            .socket
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let invocation = match step.message {
            Some(message) => Invocation::message(socket.as_str(), message.to_string()),
            None => Invocation::disconnect(socket.as_str()),
        };
        let invocation = match step.user {
            Some(user) => invocation.with_user_id(user),
            None => invocation,
        };

        if let Err(err) = processor.handle(&invocation) {
            summary.rejected += 1;
            log_rejected(index, &socket, &err);
        }
        summary.steps += 1;

        for delivery in transport.take() {
            let line = PushLine {
                socket: &delivery.socket_id,
                message: serde_json::from_slice(&delivery.data)?,
            };
            serde_json::to_writer(&mut *out, &line)?;
            writeln!(out)?;
            summary.pushes += 1;
        }
    }

    out.flush()?;
    Ok(summary)
}

fn hooks(options: &RunOptions) -> Hooks {
    if options.merge_threshold.is_some() {
        Hooks::default().with_merger(ShallowSetMerger)
    } else {
        Hooks::default()
    }
}

fn config(options: &RunOptions) -> ProcessorConfig {
    let config = ProcessorConfig::new()
        .with_page_size(options.page_size)
        .with_retry(RetryConfig::new(options.retries));
    match options.merge_threshold {
        Some(threshold) => config.with_auto_merge(threshold),
        None => config,
    }
}

fn log_rejected(index: usize, socket: &str, err: &SyncError) {
    warn!(step = index, socket_id = socket, error = %err, "step rejected");
}
