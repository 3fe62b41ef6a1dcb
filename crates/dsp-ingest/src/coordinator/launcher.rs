use anyhow::Context;
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::{FutureExt, SinkExt, StreamExt};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tracing::{debug, warn};

use super::partition::WorkChunk;
use super::protocol::{decode_line, encode_line, Assignment, ProtocolError, WorkerMessage};

/// How a worker ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerExit {
    Success,
    Failed { code: Option<i32> },
    /// Exit status could not be collected
    Lost(String),
}

impl WorkerExit {
    pub fn is_success(&self) -> bool {
        matches!(self, WorkerExit::Success)
    }
}

/// Coordinator's end of a running worker
pub struct WorkerHandle {
    /// Takes the single assignment; dropping it closes the worker's input
    pub outbound: mpsc::Sender<Assignment>,
    pub inbound: BoxStream<'static, Result<WorkerMessage, ProtocolError>>,
    pub exit: BoxFuture<'static, WorkerExit>,
}

#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    async fn launch(&self, chunk: &WorkChunk) -> anyhow::Result<WorkerHandle>;
}

/// Runs each worker as a child process talking over stdin/stdout
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<String>,
    quiet: bool,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            quiet: false,
        }
    }

    /// This executable's hidden `worker` subcommand
    pub fn current_exe() -> anyhow::Result<Self> {
        let program = std::env::current_exe().context("Failed to resolve current executable")?;
        Ok(Self::new(program).arg("worker"))
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Discard worker stderr, used while the dashboard owns the terminal
    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }
}

#[async_trait]
impl WorkerLauncher for ProcessLauncher {
    async fn launch(&self, chunk: &WorkChunk) -> anyhow::Result<WorkerHandle> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env("DSP_WORKER_INDEX", chunk.index.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(if self.quiet {
                Stdio::null()
            } else {
                Stdio::inherit()
            })
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn worker for chunk {}", chunk.index))?;

        let stdin = child.stdin.take().context("Worker stdin was not captured")?;
        let stdout = child.stdout.take().context("Worker stdout was not captured")?;
        debug!(chunk = chunk.index, pid = ?child.id(), "Spawned worker process");

        let inbound = FramedRead::new(stdout, LinesCodec::new())
            .map(|line| {
                line.map_err(ProtocolError::from)
                    .and_then(|line| decode_line::<WorkerMessage>(&line))
            })
            .boxed();

        let (outbound, mut assignments) = mpsc::channel::<Assignment>(1);
        let index = chunk.index;
        tokio::spawn(async move {
            let mut writer = FramedWrite::new(stdin, LinesCodec::new());
            while let Some(assignment) = assignments.recv().await {
                let sent = match encode_line(&assignment) {
                    Ok(line) => writer.send(line).await.map_err(ProtocolError::from),
                    Err(e) => Err(e),
                };
                if let Err(e) = sent {
                    warn!(chunk = index, error = %e, "Failed to write assignment");
                    break;
                }
            }
        });

        let exit = async move {
            match child.wait().await {
                Ok(status) if status.success() => WorkerExit::Success,
                Ok(status) => WorkerExit::Failed {
                    code: status.code(),
                },
                Err(e) => WorkerExit::Lost(e.to_string()),
            }
        }
        .boxed();

        Ok(WorkerHandle {
            outbound,
            inbound,
            exit,
        })
    }
}
