use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// A snippet submitted by the caller
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRequest {
    pub language_id: String,
    pub source_text: String,
}

impl ExecutionRequest {
    pub fn new(language_id: impl Into<String>, source_text: impl Into<String>) -> Self {
        Self {
            language_id: language_id.into(),
            source_text: source_text.into(),
        }
    }
}

/// A toolchain found on the host during one detection pass.
///
/// The resolved path is only meaningful for the environment the pass ran in;
/// nothing tracks it going stale afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectedLanguage {
    pub id: String,
    pub display_name: String,
    pub resolved_executable_path: PathBuf,
}

/// Classification of a failed execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionErrorKind {
    UnsupportedLanguage,
    MissingEntryType,
    ExecutableNotFound,
    NonZeroExit,
    Timeout,
    FilesystemError,
}

impl fmt::Display for ExecutionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecutionErrorKind::UnsupportedLanguage => "unsupported_language",
            ExecutionErrorKind::MissingEntryType => "missing_entry_type",
            ExecutionErrorKind::ExecutableNotFound => "executable_not_found",
            ExecutionErrorKind::NonZeroExit => "non_zero_exit",
            ExecutionErrorKind::Timeout => "timeout",
            ExecutionErrorKind::FilesystemError => "filesystem_error",
        };
        write!(f, "{}", name)
    }
}

/// Terminal record of one `execute` call.
///
/// `error` is `None` exactly when every step of the pipeline exited with
/// status zero. `stdout`/`stderr` keep whatever was captured, including on
/// failure and timeout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeExecutionResult {
    pub stdout: String,
    pub stderr: String,
    pub error: Option<String>,
    pub executed_command: Option<String>,
    pub error_kind: Option<ExecutionErrorKind>,
    pub execution_time_ms: u64,
}

impl CodeExecutionResult {
    /// Result for a failure detected before anything was spawned
    pub fn rejected(kind: ExecutionErrorKind, message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            error_kind: Some(kind),
            ..Default::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejected_result_has_no_output() {
        let result = CodeExecutionResult::rejected(
            ExecutionErrorKind::UnsupportedLanguage,
            "unsupported language",
        );
        assert!(!result.is_success());
        assert_eq!(result.error.as_deref(), Some("unsupported language"));
        assert_eq!(result.error_kind, Some(ExecutionErrorKind::UnsupportedLanguage));
        assert!(result.stdout.is_empty());
        assert!(result.executed_command.is_none());
    }

    #[test]
    fn test_result_serializes_camel_case() {
        let result = CodeExecutionResult {
            stdout: "hi\n".to_string(),
            executed_command: Some("python3 main.py".to_string()),
            ..Default::default()
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["stdout"], "hi\n");
        assert_eq!(json["executedCommand"], "python3 main.py");
        assert!(json["error"].is_null());
        assert!(json["errorKind"].is_null());
    }

    #[test]
    fn test_error_kind_display_matches_serde() {
        let kind = ExecutionErrorKind::ExecutableNotFound;
        let json = serde_json::to_string(&kind).unwrap();
        assert_eq!(json, format!("\"{}\"", kind));
    }
}
