// Login shell invocation
//
// The shell is only used so the user's profile (and therefore PATH) applies.
// Program and arguments are handed over as positional parameters and
// re-exec'd, so no user-controlled text is ever parsed as shell syntax.

use coderun_common::config::EngineConfig;
use coderun_common::registry::CommandStep;
use std::path::{Path, PathBuf};
use tokio::process::Command;

const POSIX_EXEC: &str = r#"exec "$0" "$@""#;
const POSIX_PROBE: &str = r#"command -v "$0""#;
const FISH_EXEC: &str = "exec $argv";
const FISH_PROBE: &str = "command -v $argv[1]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flavor {
    Posix,
    Fish,
}

/// The user's default shell, run in login mode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginShell {
    path: PathBuf,
    flavor: Flavor,
}

impl LoginShell {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let flavor = match path.file_name().and_then(|name| name.to_str()) {
            Some("fish") => Flavor::Fish,
            _ => Flavor::Posix,
        };
        Self { path, flavor }
    }

    /// Configured shell, else `$SHELL`, else the configured fallback
    pub fn resolve(config: &EngineConfig) -> Self {
        Self::resolve_with(config, std::env::var("SHELL").ok())
    }

    fn resolve_with(config: &EngineConfig, env_shell: Option<String>) -> Self {
        let path = config
            .shell
            .clone()
            .or_else(|| env_shell.filter(|s| !s.trim().is_empty()).map(PathBuf::from))
            .unwrap_or_else(|| config.fallback_shell.clone());
        Self::new(path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `<shell> -l -c 'exec "$0" "$@"' <program> <args...>`
    pub fn command(&self, step: &CommandStep) -> Command {
        let script = match self.flavor {
            Flavor::Posix => POSIX_EXEC,
            Flavor::Fish => FISH_EXEC,
        };
        let mut command = self.base(script);
        command.arg(&step.program).args(&step.args);
        command
    }

    /// `<shell> -l -c 'command -v "$0"' <name>`, the login-shell `which`
    pub fn probe(&self, name: &str) -> Command {
        let script = match self.flavor {
            Flavor::Posix => POSIX_PROBE,
            Flavor::Fish => FISH_PROBE,
        };
        let mut command = self.base(script);
        command.arg(name);
        command
    }

    fn base(&self, script: &str) -> Command {
        let mut command = Command::new(&self.path);
        command.arg("-l").arg("-c").arg(script);
        command
    }
}

/// Last non-empty stdout line of a probe.
///
/// Login profiles may print banners before the answer.
pub fn parse_probe_output(stdout: &str) -> Option<PathBuf> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .last()
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsStr;

    fn args_of(command: &Command) -> Vec<String> {
        command
            .as_std()
            .get_args()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_resolve_precedence() {
        let mut config = EngineConfig::default();
        let shell = LoginShell::resolve_with(&config, None);
        assert_eq!(shell.path(), Path::new("/bin/sh"));

        let shell = LoginShell::resolve_with(&config, Some("/usr/bin/zsh".to_string()));
        assert_eq!(shell.path(), Path::new("/usr/bin/zsh"));

        let shell = LoginShell::resolve_with(&config, Some("  ".to_string()));
        assert_eq!(shell.path(), Path::new("/bin/sh"));

        config.shell = Some(PathBuf::from("/bin/bash"));
        let shell = LoginShell::resolve_with(&config, Some("/usr/bin/zsh".to_string()));
        assert_eq!(shell.path(), Path::new("/bin/bash"));
    }

    #[test]
    fn test_command_passes_argv_untouched() {
        let shell = LoginShell::new("/bin/bash");
        let step = CommandStep::new("python3").arg("/tmp/it's here; rm -rf ~.py");
        let command = shell.command(&step);

        assert_eq!(command.as_std().get_program(), OsStr::new("/bin/bash"));
        assert_eq!(
            args_of(&command),
            vec![
                "-l".to_string(),
                "-c".to_string(),
                POSIX_EXEC.to_string(),
                "python3".to_string(),
                "/tmp/it's here; rm -rf ~.py".to_string(),
            ]
        );
    }

    #[test]
    fn test_fish_uses_argv() {
        let shell = LoginShell::new("/usr/local/bin/fish");
        let args = args_of(&shell.probe("node"));
        assert_eq!(args, vec!["-l", "-c", FISH_PROBE, "node"]);
    }

    #[test]
    fn test_parse_probe_output() {
        assert_eq!(
            parse_probe_output("Welcome!\n/usr/bin/python3\n\n"),
            Some(PathBuf::from("/usr/bin/python3"))
        );
        assert_eq!(parse_probe_output("  \n"), None);
    }

    #[tokio::test]
    async fn test_exec_through_login_shell() {
        let shell = LoginShell::new("/bin/sh");
        let step = CommandStep::new("printf").arg("%s|%s").arg("a b").arg("$HOME");
        let output = shell.command(&step).output().await.unwrap();
        assert!(output.status.success());
        assert_eq!(String::from_utf8_lossy(&output.stdout), "a b|$HOME");
    }
}
