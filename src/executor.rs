use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::io::{self, IsTerminal};
use tracing::debug;

use crate::errors::ExecError;
use crate::pty;
use crate::runner::{Input, Outcome, ProcessRunner};

/// How a command is attached to the caller's terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ExecMode {
    /// Stream when stdin is a terminal, capture otherwise
    #[default]
    Auto,
    /// Live passthrough on a pseudo-terminal
    Stream,
    /// Buffer combined output and print it afterwards
    Capture,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedMode {
    Stream,
    Capture,
}

impl ExecMode {
    /// Settle `Auto`; the predicate is consulted at most once.
    pub fn resolve<F>(self, stdin_is_terminal: F) -> ResolvedMode
    where
        F: FnOnce() -> bool,
    {
        match self {
            ExecMode::Stream => ResolvedMode::Stream,
            ExecMode::Capture => ResolvedMode::Capture,
            ExecMode::Auto => {
                if stdin_is_terminal() {
                    ResolvedMode::Stream
                } else {
                    ResolvedMode::Capture
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunOnce {
    pub mode: ResolvedMode,
    pub outcome: Outcome,
}

impl RunOnce {
    /// Combined output in capture mode; `None` when it was streamed live.
    pub fn captured(&self) -> Option<&str> {
        match self.mode {
            ResolvedMode::Capture => Some(&self.outcome.combined),
            ResolvedMode::Stream => None,
        }
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.outcome.exit_code
    }

    pub fn success(&self) -> bool {
        self.outcome.success
    }
}

fn stdin_is_terminal() -> bool {
    io::stdin().is_terminal()
}

pub struct StreamExecutor {
    runner: ProcessRunner,
    is_terminal: fn() -> bool,
}

impl StreamExecutor {
    pub fn new(runner: ProcessRunner) -> Self {
        Self::with_terminal_probe(runner, stdin_is_terminal)
    }

    /// Use `probe` instead of inspecting the real stdin when resolving `Auto`.
    pub fn with_terminal_probe(runner: ProcessRunner, probe: fn() -> bool) -> Self {
        Self {
            runner,
            is_terminal: probe,
        }
    }

    pub fn runner(&self) -> &ProcessRunner {
        &self.runner
    }

    /// Run one command to completion in the requested mode.
    ///
    /// A non-zero exit is a normal result; only a pseudo-terminal that cannot
    /// be set up is an error, and there is no silent fallback to capture.
    pub fn run_once(
        &self,
        program: &str,
        args: &[String],
        mode: ExecMode,
    ) -> Result<RunOnce, ExecError> {
        if program.trim().is_empty() {
            return Err(ExecError::missing_value());
        }
        let resolved = mode.resolve(self.is_terminal);
        debug!(program, ?mode, ?resolved, "execution mode selected");

        let outcome = match resolved {
            ResolvedMode::Stream => pty::run_attached(program, args, self.runner.working_dir())?,
            ResolvedMode::Capture => self.runner.run(program, args, Input::Inherit),
        };
        Ok(RunOnce {
            mode: resolved,
            outcome,
        })
    }
}
