/// Directive commands: the entrypoint and cleanup declared by the watched
/// file, run as child processes with their output routed into the log.
use std::fmt;
use std::io::BufReader;
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::thread;

use crate::error::BoxError;
use crate::loader::Invocable;
use crate::output::{self, Stream, Tail};

/// Placeholder replaced by the watched file's path.
pub const FILE_PLACEHOLDER: &str = "{file}";

/// A program and its arguments, parsed from a directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

/// The last stderr line of a failed command.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct StderrTail(String);

impl StderrTail {
    fn from_tail(tail: &Tail) -> Option<Self> {
        tail.last().map(|line| StderrTail(line.to_string()))
    }
}

/// Errors produced while running a directive command.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("failed to spawn `{command}`")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed waiting on `{command}`")]
    Wait {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{command}` exited with {status}")]
    Exited {
        command: String,
        status: ExitStatus,
        #[source]
        stderr: Option<StderrTail>,
    },
}

impl CommandSpec {
    /// Split a directive value on whitespace, expanding `{file}` in every word.
    ///
    /// Returns `None` when the value holds no words.
    pub fn parse(raw: &str, file: &Path) -> Option<Self> {
        let file = file.to_string_lossy();
        let mut words = raw
            .split_whitespace()
            .map(|word| word.replace(FILE_PLACEHOLDER, &file));
        let program = words.next()?;
        Some(Self {
            program,
            args: words.collect(),
        })
    }

    /// Run the command to completion.
    ///
    /// Stdout and stderr are forwarded line by line while the child runs; a
    /// non-zero exit carries the last stderr line as its cause.
    pub fn run(&self) -> Result<(), CommandError> {
        let command = self.to_string();
        tracing::debug!(%command, "starting command");

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| CommandError::Spawn {
                command: command.clone(),
                source,
            })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let stderr_tail = thread::scope(|scope| {
            let stderr_reader = scope.spawn(move || {
                stderr
                    .map(|pipe| output::forward_lines(BufReader::new(pipe), Stream::Stderr))
                    .unwrap_or_default()
            });
            if let Some(pipe) = stdout {
                output::forward_lines(BufReader::new(pipe), Stream::Stdout);
            }
            stderr_reader.join().unwrap_or_default()
        });

        let status = child.wait().map_err(|source| CommandError::Wait {
            command: command.clone(),
            source,
        })?;
        tracing::debug!(%command, %status, "command finished");

        if status.success() {
            Ok(())
        } else {
            Err(CommandError::Exited {
                command,
                status,
                stderr: StderrTail::from_tail(&stderr_tail),
            })
        }
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

impl Invocable for CommandSpec {
    fn invoke(&self) -> Result<(), BoxError> {
        self.run().map_err(BoxError::from)
    }
}
