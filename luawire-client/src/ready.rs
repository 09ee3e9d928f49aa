//! Readiness signals consulted when the host refuses a connection.

use crate::error::ClientError;
use std::future::Future;
use std::time::Duration;

/// Something that completes once the host process is expected to be
/// listening. Only consulted after a refused connect.
pub trait ReadySignal {
    fn wait_ready(&self) -> impl Future<Output = Result<(), ClientError>> + Send;
}

/// Retries straight away.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoWait;

impl ReadySignal for NoWait {
    async fn wait_ready(&self) -> Result<(), ClientError> {
        Ok(())
    }
}

/// Waits a fixed amount of time.
#[derive(Debug, Clone, Copy)]
pub struct DelaySignal(pub Duration);

impl ReadySignal for DelaySignal {
    async fn wait_ready(&self) -> Result<(), ClientError> {
        tokio::time::sleep(self.0).await;
        Ok(())
    }
}

/// Runs an external command and treats a zero exit status as "ready",
/// e.g. `waitfor VlcStarted` on Windows.
#[derive(Debug, Clone)]
pub struct CommandSignal {
    program: String,
    args: Vec<String>,
}

impl CommandSignal {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Splits a command line on whitespace. Returns `None` if it is empty.
    pub fn parse(command_line: &str) -> Option<Self> {
        let mut parts = command_line.split_whitespace();
        let program = parts.next()?;
        Some(Self {
            program: program.to_string(),
            args: parts.map(str::to_string).collect(),
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

impl ReadySignal for CommandSignal {
    async fn wait_ready(&self) -> Result<(), ClientError> {
        tracing::info!("Waiting for ready signal from `{}`", self.program);
        let status = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|e| ClientError::Ready(format!("failed to run `{}`: {}", self.program, e)))?;

        if status.success() {
            Ok(())
        } else {
            Err(ClientError::Ready(format!(
                "`{}` exited with {}",
                self.program, status
            )))
        }
    }
}

/// One of the built-in signals, picked at runtime from configuration.
#[derive(Debug, Clone)]
pub enum AnySignal {
    NoWait(NoWait),
    Delay(DelaySignal),
    Command(CommandSignal),
}

impl AnySignal {
    /// A command line wins over a delay; with neither the retry is
    /// immediate.
    pub fn from_settings(command: Option<&str>, delay: Option<Duration>) -> Self {
        if let Some(signal) = command.and_then(CommandSignal::parse) {
            return AnySignal::Command(signal);
        }
        match delay {
            Some(delay) if !delay.is_zero() => AnySignal::Delay(DelaySignal(delay)),
            _ => AnySignal::NoWait(NoWait),
        }
    }
}

impl Default for AnySignal {
    fn default() -> Self {
        AnySignal::NoWait(NoWait)
    }
}

impl std::fmt::Display for AnySignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnySignal::NoWait(_) => write!(f, "none"),
            AnySignal::Delay(d) => write!(f, "delay {:?}", d.0),
            AnySignal::Command(c) => {
                write!(f, "`{}", c.program)?;
                for arg in &c.args {
                    write!(f, " {}", arg)?;
                }
                write!(f, "`")
            }
        }
    }
}

impl ReadySignal for AnySignal {
    async fn wait_ready(&self) -> Result<(), ClientError> {
        match self {
            AnySignal::NoWait(s) => s.wait_ready().await,
            AnySignal::Delay(s) => s.wait_ready().await,
            AnySignal::Command(s) => s.wait_ready().await,
        }
    }
}
