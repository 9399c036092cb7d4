use anyhow::{anyhow, Result};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

use crate::exit_status;

/// What the child sees on its standard input.
#[derive(Debug, Clone)]
pub enum Input {
    Inherit,
    Null,
    Data(Vec<u8>),
}

/// Result of one process invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub exit_code: Option<i32>, // None when the process never started
    pub precise: bool,          // false when the code is a generic substitute
    pub stdout: String,
    pub stderr: String,
    pub combined: String, // stdout and stderr in arrival order
    pub success: bool,
}

impl Outcome {
    pub(crate) fn spawn_failure(message: String) -> Self {
        Self {
            exit_code: None,
            precise: false,
            stdout: String::new(),
            stderr: message.clone(),
            combined: message,
            success: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    working_dir: Option<PathBuf>,
}

impl ProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: Some(dir.into()),
        }
    }

    pub fn working_dir(&self) -> Option<&Path> {
        self.working_dir.as_deref()
    }

    /// Spawn `program`, drain both output streams, and wait for it to exit.
    ///
    /// Never fails: spawn errors and non-zero exits are reported through the
    /// returned `Outcome`.
    pub fn run(&self, program: &str, args: &[String], input: Input) -> Outcome {
        debug!(program, ?args, "spawning process");

        let mut command = Command::new(program);
        command
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        match &input {
            Input::Inherit => command.stdin(Stdio::inherit()),
            Input::Null => command.stdin(Stdio::null()),
            Input::Data(_) => command.stdin(Stdio::piped()),
        };
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(err) => {
                warn!(program, error = %err, "failed to start process");
                return Outcome::spawn_failure(format!("failed to start '{}': {}", program, err));
            }
        };

        let combined = Arc::new(Mutex::new(Vec::new()));
        let stdin_handle = match (input, child.stdin.take()) {
            (Input::Data(data), Some(mut stdin)) => Some(thread::spawn(move || -> Result<()> {
                // A child that exits without reading closes the pipe early.
                match stdin.write_all(&data) {
                    Err(err) if err.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
                    other => Ok(other?),
                }
            })),
            _ => None,
        };
        let stdout_handle = child
            .stdout
            .take()
            .map(|reader| spawn_drain(reader, Arc::clone(&combined)));
        let stderr_handle = child
            .stderr
            .take()
            .map(|reader| spawn_drain(reader, Arc::clone(&combined)));

        let status = child.wait();

        let mut drain_errors = Vec::new();
        let stdout_bytes = join_drain(stdout_handle, "stdout", &mut drain_errors);
        let stderr_bytes = join_drain(stderr_handle, "stderr", &mut drain_errors);
        if let Some(handle) = stdin_handle {
            match handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(err)) => drain_errors.push(format!("stdin: {}", err)),
                Err(_) => drain_errors.push("stdin: writer thread panicked".to_string()),
            }
        }

        let combined_bytes = combined
            .lock()
            .map(|buf| buf.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone());

        let mut outcome = Outcome {
            exit_code: None,
            precise: false,
            stdout: String::from_utf8_lossy(&stdout_bytes).to_string(),
            stderr: String::from_utf8_lossy(&stderr_bytes).to_string(),
            combined: String::from_utf8_lossy(&combined_bytes).to_string(),
            success: false,
        };

        match status {
            Ok(status) => {
                let (code, precise) = exit_status::exit_code(&status);
                outcome.exit_code = Some(code);
                outcome.precise = precise;
                outcome.success = status.success() && drain_errors.is_empty();
            }
            Err(err) => drain_errors.push(format!("wait: {}", err)),
        }

        if !drain_errors.is_empty() {
            warn!(program, errors = ?drain_errors, "process streams were not fully read");
            if !outcome.stderr.is_empty() && !outcome.stderr.ends_with('\n') {
                outcome.stderr.push('\n');
            }
            outcome.stderr.push_str(&drain_errors.join("\n"));
            outcome.success = false;
        }

        debug!(program, code = ?outcome.exit_code, success = outcome.success, "process finished");
        outcome
    }
}

fn spawn_drain<R>(mut reader: R, combined: Arc<Mutex<Vec<u8>>>) -> JoinHandle<Result<Vec<u8>>>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || -> Result<Vec<u8>> {
        let mut buffer = [0u8; 4096];
        let mut collected = Vec::new();
        loop {
            let bytes_read = reader.read(&mut buffer)?;
            if bytes_read == 0 {
                break;
            }
            collected.extend_from_slice(&buffer[..bytes_read]);
            combined
                .lock()
                .map_err(|_| anyhow!("output buffer poisoned"))?
                .extend_from_slice(&buffer[..bytes_read]);
        }
        Ok(collected)
    })
}

fn join_drain(
    handle: Option<JoinHandle<Result<Vec<u8>>>>,
    label: &str,
    errors: &mut Vec<String>,
) -> Vec<u8> {
    let Some(handle) = handle else {
        return Vec::new();
    };
    match handle.join() {
        Ok(Ok(bytes)) => bytes,
        Ok(Err(err)) => {
            errors.push(format!("{}: {}", label, err));
            Vec::new()
        }
        Err(_) => {
            errors.push(format!("{}: reader thread panicked", label));
            Vec::new()
        }
    }
}
