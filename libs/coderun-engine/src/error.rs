use coderun_common::types::ExecutionErrorKind;
use std::io;
use std::path::PathBuf;

/// Why an execution did not produce a clean zero exit.
///
/// The `Display` text is what lands in `CodeExecutionResult::error`.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("unsupported language")]
    UnsupportedLanguage { language_id: String },

    #[error(
        "no public class, interface, enum or record found; {language} source files \
         are named after their public entry type"
    )]
    MissingEntryType { language: String },

    #[error(
        "Command '{command}' was not found. Make sure it is installed and that \
         `command -v {command}` resolves it in a login shell; if it does not, add its \
         directory to PATH in your shell profile (~/.profile, ~/.bashrc or ~/.zshrc)."
    )]
    ExecutableNotFound { command: String },

    #[error("command exited with status {code}: {command}")]
    NonZeroExit { code: i32, command: String },

    #[error("command terminated by a signal: {command}")]
    Terminated { command: String },

    #[error("failed to run {command}: {source}")]
    Spawn { command: String, source: io::Error },

    #[error("execution timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("source exceeds maximum size of {limit} bytes")]
    SourceTooLarge { limit: usize },

    #[error("failed to {action} {}: {source}", .path.display())]
    Filesystem {
        action: &'static str,
        path: PathBuf,
        source: io::Error,
    },
}

impl ExecutionError {
    pub fn kind(&self) -> ExecutionErrorKind {
        match self {
            ExecutionError::UnsupportedLanguage { .. } => ExecutionErrorKind::UnsupportedLanguage,
            ExecutionError::MissingEntryType { .. } => ExecutionErrorKind::MissingEntryType,
            ExecutionError::ExecutableNotFound { .. } => ExecutionErrorKind::ExecutableNotFound,
            // Killed by a signal or lost while waiting: the program still
            // did not finish cleanly, so callers see a failed run.
            ExecutionError::NonZeroExit { .. }
            | ExecutionError::Terminated { .. }
            | ExecutionError::Spawn { .. } => ExecutionErrorKind::NonZeroExit,
            ExecutionError::Timeout { .. } => ExecutionErrorKind::Timeout,
            ExecutionError::SourceTooLarge { .. } | ExecutionError::Filesystem { .. } => {
                ExecutionErrorKind::FilesystemError
            }
        }
    }

    /// Failures caught before any process was spawned
    pub fn is_pre_spawn(&self) -> bool {
        matches!(
            self,
            ExecutionError::UnsupportedLanguage { .. }
                | ExecutionError::MissingEntryType { .. }
                | ExecutionError::SourceTooLarge { .. }
                | ExecutionError::Filesystem { .. }
        )
    }

    pub(crate) fn filesystem(action: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        ExecutionError::Filesystem {
            action,
            path: path.into(),
            source,
        }
    }
}

/// Classify a step that exited with a non-zero status.
///
/// Exit 127 together with the shell's "not found" wording for the step's own
/// program means the toolchain vanished after detection; anything else is the
/// program's own failure.
pub fn classify_exit(code: Option<i32>, program: &str, command: &str, stderr: &str) -> ExecutionError {
    match code {
        Some(127) if reports_missing_executable(stderr, program) => {
            ExecutionError::ExecutableNotFound {
                command: program.to_string(),
            }
        }
        Some(code) => ExecutionError::NonZeroExit {
            code,
            command: command.to_string(),
        },
        None => ExecutionError::Terminated {
            command: command.to_string(),
        },
    }
}

/// Classify a failure to spawn the login shell itself
pub fn classify_spawn(shell: &str, command: &str, source: io::Error) -> ExecutionError {
    if source.kind() == io::ErrorKind::NotFound {
        ExecutionError::ExecutableNotFound {
            command: shell.to_string(),
        }
    } else {
        ExecutionError::Spawn {
            command: command.to_string(),
            source,
        }
    }
}

fn reports_missing_executable(stderr: &str, program: &str) -> bool {
    // sh/dash/bash: "exec: prog: not found", bash: "prog: command not found",
    // zsh: "command not found: prog", fish: "Unknown command: prog"
    let patterns = [
        format!("exec: {}: not found", program),
        format!("{}: command not found", program),
        format!("command not found: {}", program),
        format!("{}: No such file or directory", program),
        format!("Unknown command: {}", program),
    ];
    patterns.iter().any(|pattern| stderr.contains(pattern.as_str()))
}

/// Failure of the detection pass as a whole
#[derive(Debug, thiserror::Error)]
pub enum DetectError {
    #[error("no usable shell: failed to run {}: {source}", .shell.display())]
    ShellUnavailable { shell: PathBuf, source: io::Error },
}
