/// Execution Engine - Local Snippet Execution
///
/// **Core Responsibility:**
/// Run one source snippet with the host toolchain and capture what it printed.
///
/// **Per-call lifecycle:**
/// 1. Resolve the language (case-insensitive); unknown ids touch nothing
/// 2. Derive the file name (entry-type languages fail fast without a public type)
/// 3. Lease the scratch directory and write the source verbatim
/// 4. Run the pipeline steps through the login shell under one deadline
/// 5. Classify the outcome, keeping partial stdout/stderr
/// 6. Delete every tracked artifact, on every exit path
///
/// Each step runs in its own process group. When the step ends, times out or
/// the future is dropped, the whole group is killed, so nothing a snippet
/// started in the background outlives the call.
///
/// `execute` never returns an error: every failure is folded into
/// `CodeExecutionResult::error`.

use crate::error::{classify_exit, classify_spawn, ExecutionError};
use crate::scratch::{ScratchDir, ScratchLease};
use crate::shell::LoginShell;
use coderun_common::config::EngineConfig;
use coderun_common::registry::{entry_type_name, CommandStep, Invocation, LanguageSpec, Pipeline, Registry};
use coderun_common::types::{CodeExecutionResult, ExecutionRequest};
use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Removes an execution's files when dropped.
///
/// `cleanup()` is called on the normal path; `Drop` covers cancellation of
/// the `execute` future and unwinding.
struct ArtifactGuard {
    files: Vec<PathBuf>,
    run_dir: Option<PathBuf>,
    done: bool,
}

impl ArtifactGuard {
    fn new() -> Self {
        Self {
            files: Vec::new(),
            run_dir: None,
            done: false,
        }
    }

    fn track(&mut self, path: PathBuf) {
        if !self.files.contains(&path) {
            self.files.push(path);
        }
    }

    fn track_dir(&mut self, path: PathBuf) {
        self.run_dir = Some(path);
    }

    fn cleanup(&mut self) {
        if self.done {
            return;
        }
        self.done = true;

        for file in &self.files {
            match fs::remove_file(file) {
                Ok(()) => debug!(path = %file.display(), "Removed artifact"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %file.display(), error = %e, "Failed to remove artifact"),
            }
        }

        if let Some(dir) = &self.run_dir {
            match fs::remove_dir_all(dir) {
                Ok(()) => debug!(path = %dir.display(), "Removed run directory"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %dir.display(), error = %e, "Failed to remove run directory"),
            }
        }
    }
}

impl Drop for ArtifactGuard {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// SIGKILLs a step's process group when dropped.
///
/// The child leads its own group (`process_group(0)`), so the group id is
/// its pid. Background processes and anything an interpreter forked stay in
/// that group after the leader exits.
struct ProcessGroup {
    pgid: Option<Pid>,
}

impl ProcessGroup {
    fn of(child: &tokio::process::Child) -> Self {
        Self {
            pgid: child.id().map(|id| Pid::from_raw(id as i32)),
        }
    }

    fn kill(&mut self) {
        let Some(pgid) = self.pgid.take() else { return };
        match killpg(pgid, Signal::SIGKILL) {
            Ok(()) => debug!(pgid = pgid.as_raw(), "Killed process group"),
            // Every member already exited
            Err(Errno::ESRCH) => {}
            Err(e) => warn!(pgid = pgid.as_raw(), error = %e, "Failed to kill process group"),
        }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

/// Files of one execution, all named from its unique id
#[derive(Debug, Clone)]
struct ExecutionArtifacts {
    execution_id: Uuid,
    source_file_path: PathBuf,
    compiled_artifact_paths: Vec<PathBuf>,
    /// Per-execution directory for entry-type-named languages
    run_directory: Option<PathBuf>,
    working_directory: PathBuf,
}

/// What the pipeline produced, successful or not
struct PipelineOutput {
    stdout: String,
    stderr: String,
    error: Option<ExecutionError>,
}

type Sink = Arc<Mutex<Vec<u8>>>;

#[derive(Debug, Clone)]
pub struct Engine {
    registry: Arc<Registry>,
    config: EngineConfig,
    shell: LoginShell,
    scratch: ScratchDir,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_registry(config, Arc::new(Registry::builtin()))
    }

    pub fn with_registry(config: EngineConfig, registry: Arc<Registry>) -> Self {
        let shell = LoginShell::resolve(&config);
        let scratch = ScratchDir::new(config.scratch_dir.clone());
        Self {
            registry,
            config,
            shell,
            scratch,
        }
    }

    pub fn with_shell(mut self, shell: LoginShell) -> Self {
        self.shell = shell;
        self
    }

    /// Share an existing scratch handle (and its lease count)
    pub fn with_scratch(mut self, scratch: ScratchDir) -> Self {
        self.scratch = scratch;
        self
    }

    pub fn scratch(&self) -> &ScratchDir {
        &self.scratch
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub async fn run(&self, request: &ExecutionRequest) -> CodeExecutionResult {
        self.execute(&request.language_id, &request.source_text).await
    }

    /// Execute a snippet and report its output; never fails
    #[instrument(skip(self, source_text), fields(language = %language_id, source_size = source_text.len()))]
    pub async fn execute(&self, language_id: &str, source_text: &str) -> CodeExecutionResult {
        let start = Instant::now();
        let execution_id = Uuid::new_v4();

        let mut result = match self.execute_inner(execution_id, language_id, source_text).await {
            Ok(result) => result,
            Err(e) => {
                info!(
                    execution_id = %execution_id,
                    kind = %e.kind(),
                    error = %e,
                    "Execution rejected before spawn"
                );
                CodeExecutionResult::rejected(e.kind(), e.to_string())
            }
        };
        result.execution_time_ms = start.elapsed().as_millis() as u64;

        match &result.error_kind {
            None => info!(
                execution_id = %execution_id,
                execution_ms = result.execution_time_ms,
                "Execution completed"
            ),
            Some(kind) => info!(
                execution_id = %execution_id,
                kind = %kind,
                execution_ms = result.execution_time_ms,
                "Execution failed"
            ),
        }

        result
    }

    /// Pre-spawn failures come back as `Err`; everything after the first
    /// spawn is folded into the returned result.
    async fn execute_inner(
        &self,
        execution_id: Uuid,
        language_id: &str,
        source_text: &str,
    ) -> Result<CodeExecutionResult, ExecutionError> {
        let spec = self
            .registry
            .get(language_id)
            .ok_or_else(|| ExecutionError::UnsupportedLanguage {
                language_id: language_id.to_string(),
            })?;

        if source_text.len() > self.config.max_source_bytes {
            return Err(ExecutionError::SourceTooLarge {
                limit: self.config.max_source_bytes,
            });
        }

        let entry_type = if spec.requires_entry_type() {
            let name = entry_type_name(source_text).ok_or_else(|| ExecutionError::MissingEntryType {
                language: spec.display_name.to_string(),
            })?;
            Some(name)
        } else {
            None
        };

        let lease = self
            .scratch
            .lease()
            .map_err(|e| ExecutionError::filesystem("create scratch directory", self.scratch.path(), e))?;

        // Declared after the lease so files are removed before it is released.
        let mut guard = ArtifactGuard::new();
        let mut artifacts = self
            .materialize(&lease, &mut guard, spec, execution_id, entry_type.as_deref(), source_text)
            .await?;

        let id = execution_id.to_string();
        let invocation = Invocation {
            source_path: &artifacts.source_file_path,
            artifact_dir: artifacts.run_directory.as_deref().unwrap_or(lease.path()),
            execution_id: &id,
            entry_type: entry_type.as_deref(),
        };
        let pipeline = (spec.build_pipeline)(&invocation);
        for artifact in &pipeline.artifacts {
            guard.track(artifact.clone());
        }
        artifacts.compiled_artifact_paths = pipeline.artifacts.clone();

        let executed_command = pipeline.display_command();
        debug!(
            execution_id = %artifacts.execution_id,
            source = %artifacts.source_file_path.display(),
            working_dir = %artifacts.working_directory.display(),
            compiled = ?artifacts.compiled_artifact_paths,
            command = %executed_command,
            steps = pipeline.steps.len(),
            "Running pipeline"
        );

        let output = self.run_pipeline(&pipeline, lease.path()).await;

        guard.cleanup();
        drop(lease);

        let (error, error_kind) = match output.error {
            None => (None, None),
            Some(e) => {
                let kind = e.kind();
                (Some(e.to_string()), Some(kind))
            }
        };

        Ok(CodeExecutionResult {
            stdout: output.stdout,
            stderr: output.stderr,
            error,
            executed_command: Some(executed_command),
            error_kind,
            execution_time_ms: 0,
        })
    }

    /// Write the source file, tracking every path before it is created
    async fn materialize(
        &self,
        lease: &ScratchLease,
        guard: &mut ArtifactGuard,
        spec: &LanguageSpec,
        execution_id: Uuid,
        entry_type: Option<&str>,
        source_text: &str,
    ) -> Result<ExecutionArtifacts, ExecutionError> {
        let id = execution_id.to_string();

        let run_directory = if entry_type.is_some() {
            let dir = lease.path().join(&id);
            guard.track_dir(dir.clone());
            tokio::fs::create_dir(&dir)
                .await
                .map_err(|e| ExecutionError::filesystem("create run directory", &dir, e))?;
            Some(dir)
        } else {
            None
        };

        let parent = run_directory.as_deref().unwrap_or(lease.path());
        let source_file_path = parent.join(spec.source_file_name(&id, entry_type));
        guard.track(source_file_path.clone());

        tokio::fs::write(&source_file_path, source_text)
            .await
            .map_err(|e| ExecutionError::filesystem("write source file", &source_file_path, e))?;

        Ok(ExecutionArtifacts {
            execution_id,
            source_file_path,
            compiled_artifact_paths: Vec::new(),
            run_directory,
            working_directory: lease.path().to_path_buf(),
        })
    }

    /// Run steps in order under a single deadline; the first failure stops it
    async fn run_pipeline(&self, pipeline: &Pipeline, working_dir: &Path) -> PipelineOutput {
        let deadline = tokio::time::Instant::now() + self.config.timeout();
        let mut stdout = String::new();
        let mut stderr = String::new();

        for step in &pipeline.steps {
            let (step_out, step_err, error) = self.run_step(step, working_dir, deadline).await;
            stdout.push_str(&step_out);
            stderr.push_str(&step_err);
            if error.is_some() {
                return PipelineOutput { stdout, stderr, error };
            }
        }

        PipelineOutput {
            stdout,
            stderr,
            error: None,
        }
    }

    async fn run_step(
        &self,
        step: &CommandStep,
        working_dir: &Path,
        deadline: tokio::time::Instant,
    ) -> (String, String, Option<ExecutionError>) {
        let rendered = step.to_string();
        let mut command = self.shell.command(step);
        command
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                let shell = self.shell.path().display().to_string();
                return (String::new(), String::new(), Some(classify_spawn(&shell, &rendered, e)));
            }
        };

        let mut group = ProcessGroup::of(&child);

        let stdout_sink: Sink = Arc::default();
        let stderr_sink: Sink = Arc::default();
        let readers = [
            child.stdout.take().map(|pipe| spawn_reader(pipe, Arc::clone(&stdout_sink))),
            child.stderr.take().map(|pipe| spawn_reader(pipe, Arc::clone(&stderr_sink))),
        ];

        let error = match tokio::time::timeout_at(deadline, child.wait()).await {
            Ok(Ok(status)) if status.success() => None,
            Ok(Ok(status)) => Some(status.code()),
            Ok(Err(e)) => {
                group.kill();
                let error = ExecutionError::Spawn {
                    command: rendered,
                    source: e,
                };
                return self
                    .finish_step(readers, &stdout_sink, &stderr_sink, Some(error))
                    .await;
            }
            Err(_) => {
                warn!(command = %rendered, timeout_ms = self.config.timeout_ms, "Execution timed out, killing process group");
                group.kill();
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "Failed to kill timed-out process");
                }
                return self
                    .finish_step(
                        readers,
                        &stdout_sink,
                        &stderr_sink,
                        Some(ExecutionError::Timeout {
                            timeout_ms: self.config.timeout_ms,
                        }),
                    )
                    .await;
            }
        };

        // Leftover background processes would keep the pipes open
        group.kill();
        let (out, err, _) = self.finish_step(readers, &stdout_sink, &stderr_sink, None).await;
        let error = error.map(|code| classify_exit(code, &step.program_name(), &rendered, &err));
        (out, err, error)
    }

    /// Let output readers drain (bounded by the kill grace period) and
    /// collect what they captured
    async fn finish_step(
        &self,
        readers: [Option<JoinHandle<()>>; 2],
        stdout_sink: &Sink,
        stderr_sink: &Sink,
        error: Option<ExecutionError>,
    ) -> (String, String, Option<ExecutionError>) {
        let grace = self.config.kill_grace();
        for reader in readers.into_iter().flatten() {
            drain(reader, grace).await;
        }
        (take_lossy(stdout_sink), take_lossy(stderr_sink), error)
    }
}

fn spawn_reader<R>(mut pipe: R, sink: Sink) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = [0u8; 8192];
        loop {
            match pipe.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let mut captured = sink.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                    captured.extend_from_slice(&buf[..n]);
                }
            }
        }
    })
}

/// A pipe can stay open after the child exits when a grandchild inherited it
async fn drain(mut reader: JoinHandle<()>, grace: Duration) {
    if tokio::time::timeout(grace, &mut reader).await.is_err() {
        debug!("Output pipe still open after grace period, abandoning reader");
        reader.abort();
    }
}

fn take_lossy(sink: &Sink) -> String {
    let bytes = std::mem::take(&mut *sink.lock().unwrap_or_else(|poisoned| poisoned.into_inner()));
    String::from_utf8_lossy(&bytes).into_owned()
}
