// CLI commands for coderun
use anyhow::{bail, Context, Result};
use coderun_common::config::EngineConfig;
use coderun_common::registry::{FileNaming, Registry};
use coderun_common::types::{CodeExecutionResult, DetectedLanguage};
use coderun_engine::{Detector, Engine};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;

/// Defaults, then the config file, then `CODERUN_*` variables, then flags
pub fn load_config(config_path: Option<&Path>, scratch_dir: Option<PathBuf>) -> Result<EngineConfig> {
    let base = match config_path {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("Failed to load engine config from {}", path.display()))?,
        None => EngineConfig::default(),
    };

    let mut config = base
        .with_env_overrides()
        .context("Invalid CODERUN_* environment variable")?;

    if let Some(dir) = scratch_dir {
        config.scratch_dir = dir;
    }

    Ok(config)
}

/// List usable toolchains
pub async fn detect(config: &EngineConfig, json: bool) -> Result<()> {
    let detected = Detector::new(config)
        .detect()
        .await
        .context("Toolchain detection failed")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&detected)?);
        return Ok(());
    }

    print!("{}", render_detected(&detected));
    Ok(())
}

fn render_detected(detected: &[DetectedLanguage]) -> String {
    if detected.is_empty() {
        return "No languages available: none of the supported toolchains resolve in your login shell.\n\
                Run `coderun languages` to see what each language needs.\n"
            .to_string();
    }

    let mut out = format!("{:<12} {:<12} {}\n", "Id", "Language", "Toolchain");
    out.push_str(&format!("{}\n", "─".repeat(60)));
    for language in detected {
        out.push_str(&format!(
            "{:<12} {:<12} {}\n",
            language.id,
            language.display_name,
            language.resolved_executable_path.display()
        ));
    }
    out.push_str(&format!("\nTotal: {} language(s)\n", detected.len()));
    out
}

/// List every registered language
pub fn list_languages() {
    print!("{}", render_languages(&Registry::builtin()));
}

fn render_languages(registry: &Registry) -> String {
    let mut out = format!("{:<12} {:<12} {:<10} {:<6} {}\n", "Id", "Language", "Toolchain", "Ext", "Source file");
    out.push_str(&format!("{}\n", "─".repeat(60)));
    for spec in registry.languages() {
        let naming = match spec.naming {
            FileNaming::UniqueId => "<id>.ext",
            FileNaming::EntryType => "<PublicType>.ext",
        };
        out.push_str(&format!(
            "{:<12} {:<12} {:<10} {:<6} {}\n",
            spec.id, spec.display_name, spec.detect_command, spec.file_extension, naming
        ));
    }
    out
}

/// Run a snippet; returns whether it succeeded
pub async fn run_snippet(
    mut config: EngineConfig,
    lang: &str,
    file: Option<&Path>,
    timeout_ms: Option<u64>,
    json: bool,
) -> Result<bool> {
    if let Some(ms) = timeout_ms {
        if ms == 0 {
            bail!("--timeout-ms must be greater than zero");
        }
        config.timeout_ms = ms;
    }

    let source = read_source(file).await?;
    let engine = Engine::new(config);
    let result = engine.execute(lang, &source).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_result(&result)?;
    }

    Ok(result.is_success())
}

async fn read_source(file: Option<&Path>) -> Result<String> {
    match file {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("Failed to read source file {}", path.display())),
        None => {
            let mut source = String::new();
            tokio::io::stdin()
                .read_to_string(&mut source)
                .await
                .context("Failed to read source from stdin")?;
            Ok(source)
        }
    }
}

fn print_result(result: &CodeExecutionResult) -> Result<()> {
    let mut stdout = std::io::stdout();
    stdout.write_all(result.stdout.as_bytes())?;
    stdout.flush()?;

    let mut stderr = std::io::stderr();
    stderr.write_all(result.stderr.as_bytes())?;
    if let Some(error) = &result.error {
        if !result.stderr.is_empty() && !result.stderr.ends_with('\n') {
            writeln!(stderr)?;
        }
        writeln!(stderr, "error: {}", error)?;
    }
    stderr.flush()?;
    Ok(())
}

/// Idle sweep of the scratch directory
pub fn sweep(config: &EngineConfig) {
    let engine = Engine::new(config.clone());
    let path = engine.scratch().path().display().to_string();
    if engine.scratch().sweep() {
        println!("Removed scratch directory {}", path);
    } else {
        println!("Nothing to sweep at {}", path);
    }
}
