/// Toolchain Detector
///
/// Resolves each registered language's probe command through the user's
/// login shell (`command -v`) and reports the ones that resolve. A missing
/// toolchain is simply left out; only a shell that cannot be started at all
/// fails the pass. Nothing is cached between calls.

use crate::error::DetectError;
use crate::shell::{parse_probe_output, LoginShell};
use coderun_common::config::EngineConfig;
use coderun_common::registry::Registry;
use coderun_common::types::DetectedLanguage;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

enum Probe {
    Found(PathBuf),
    Missing,
    SpawnFailed(io::Error),
}

#[derive(Debug, Clone)]
pub struct Detector {
    registry: Arc<Registry>,
    shell: LoginShell,
    probe_timeout: Duration,
}

impl Detector {
    pub fn new(config: &EngineConfig) -> Self {
        Self::with_registry(config, Arc::new(Registry::builtin()))
    }

    pub fn with_registry(config: &EngineConfig, registry: Arc<Registry>) -> Self {
        Self {
            registry,
            shell: LoginShell::resolve(config),
            probe_timeout: config.detect_timeout(),
        }
    }

    pub fn with_shell(mut self, shell: LoginShell) -> Self {
        self.shell = shell;
        self
    }

    /// Probe every registered language, returning usable ones in registry order
    #[instrument(skip(self), fields(shell = %self.shell.path().display()))]
    pub async fn detect(&self) -> Result<Vec<DetectedLanguage>, DetectError> {
        let languages = self.registry.languages();
        let mut probes = JoinSet::new();

        for (index, spec) in languages.iter().enumerate() {
            let shell = self.shell.clone();
            let command = spec.detect_command;
            let timeout = self.probe_timeout;
            probes.spawn(async move { (index, probe(&shell, command, timeout).await) });
        }

        let mut outcomes = Vec::with_capacity(languages.len());
        while let Some(joined) = probes.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => warn!(error = %e, "Toolchain probe task failed"),
            }
        }
        outcomes.sort_by_key(|(index, _)| *index);

        let mut detected = Vec::new();
        let mut spawn_failures = Vec::new();

        for (index, outcome) in outcomes {
            let spec = &languages[index];
            match outcome {
                Probe::Found(path) => {
                    debug!(language = spec.id, path = %path.display(), "Toolchain found");
                    detected.push(DetectedLanguage {
                        id: spec.id.to_string(),
                        display_name: spec.display_name.to_string(),
                        resolved_executable_path: path,
                    });
                }
                Probe::Missing => {
                    debug!(language = spec.id, command = spec.detect_command, "Toolchain not found");
                }
                Probe::SpawnFailed(e) => {
                    warn!(language = spec.id, error = %e, "Toolchain probe could not start");
                    spawn_failures.push(e);
                }
            }
        }

        // Every probe failed to even start: the shell itself is unusable.
        if !languages.is_empty() && spawn_failures.len() == languages.len() {
            if let Some(source) = spawn_failures.into_iter().next() {
                return Err(DetectError::ShellUnavailable {
                    shell: self.shell.path().to_path_buf(),
                    source,
                });
            }
        }

        info!(
            found = detected.len(),
            registered = languages.len(),
            "Toolchain detection complete"
        );
        Ok(detected)
    }
}

async fn probe(shell: &LoginShell, command: &str, timeout: Duration) -> Probe {
    let mut probe = shell.probe(command);
    probe
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let child = match probe.spawn() {
        Ok(child) => child,
        Err(e) => return Probe::SpawnFailed(e),
    };

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) if output.status.success() => {
            match parse_probe_output(&String::from_utf8_lossy(&output.stdout)) {
                Some(path) => Probe::Found(path),
                None => Probe::Missing,
            }
        }
        Ok(Ok(_)) => Probe::Missing,
        Ok(Err(e)) => {
            debug!(command, error = %e, "Toolchain probe failed");
            Probe::Missing
        }
        Err(_) => {
            warn!(command, timeout_ms = timeout.as_millis() as u64, "Toolchain probe timed out");
            Probe::Missing
        }
    }
}
