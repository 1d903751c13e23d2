//! Toolchain registry
//!
//! Static table of supported languages: the binary probed during detection
//! and the template that turns a materialized source file into the ordered
//! compile/run steps. Adding a language is one `LanguageSpec` entry here;
//! detector and engine only ever go through [`Registry`].

use lazy_static::lazy_static;
use regex::Regex;
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};

lazy_static! {
    // public [abstract|final|...] class|interface|enum|record <Name>
    static ref ENTRY_TYPE_PATTERN: Regex = Regex::new(
        r"\bpublic\s+(?:(?:abstract|final|static|sealed|strictfp)\s+)*(?:class|interface|enum|record)\s+([A-Za-z_$][A-Za-z0-9_$]*)"
    )
    .expect("entry type pattern is valid");
}

/// How the source file for an execution is named
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileNaming {
    /// `<execution id>.<ext>` directly in the scratch directory
    UniqueId,
    /// `<EntryType>.<ext>` inside a per-execution directory, for toolchains
    /// that require the file name to match the public type it declares
    EntryType,
}

/// Everything a template needs to build the command steps
#[derive(Debug, Clone, Copy)]
pub struct Invocation<'a> {
    pub source_path: &'a Path,
    /// Directory compiled outputs are written to
    pub artifact_dir: &'a Path,
    pub execution_id: &'a str,
    pub entry_type: Option<&'a str>,
}

/// One process to run: a program and its argument vector.
///
/// Arguments are never interpreted by a shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandStep {
    pub program: OsString,
    pub args: Vec<OsString>,
}

impl CommandStep {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn program_name(&self) -> String {
        self.program.to_string_lossy().into_owned()
    }
}

impl fmt::Display for CommandStep {
    /// Renders the step as a POSIX shell line with single-quote escaping
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", shell_quote(&self.program.to_string_lossy()))?;
        for arg in &self.args {
            write!(f, " {}", shell_quote(&arg.to_string_lossy()))?;
        }
        Ok(())
    }
}

/// Ordered steps plus every intermediate file the steps produce
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pipeline {
    pub steps: Vec<CommandStep>,
    pub artifacts: Vec<PathBuf>,
}

impl Pipeline {
    /// Human-readable `compile && run` form of the pipeline
    pub fn display_command(&self) -> String {
        self.steps
            .iter()
            .map(|step| step.to_string())
            .collect::<Vec<_>>()
            .join(" && ")
    }
}

#[derive(Clone)]
pub struct LanguageSpec {
    pub id: &'static str,
    pub display_name: &'static str,
    pub detect_command: &'static str,
    pub file_extension: &'static str,
    pub naming: FileNaming,
    pub build_pipeline: fn(&Invocation<'_>) -> Pipeline,
}

impl fmt::Debug for LanguageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LanguageSpec")
            .field("id", &self.id)
            .field("detect_command", &self.detect_command)
            .field("file_extension", &self.file_extension)
            .field("naming", &self.naming)
            .finish()
    }
}

impl LanguageSpec {
    /// File name for the materialized source
    pub fn source_file_name(&self, execution_id: &str, entry_type: Option<&str>) -> String {
        match (self.naming, entry_type) {
            (FileNaming::EntryType, Some(name)) => format!("{}.{}", name, self.file_extension),
            _ => format!("{}.{}", execution_id, self.file_extension),
        }
    }

    pub fn requires_entry_type(&self) -> bool {
        self.naming == FileNaming::EntryType
    }
}

/// Best-effort scan for the first declared public type.
///
/// This is a pattern match, not a parse: a declaration inside a comment or
/// string literal is found too, and with several public types the first one
/// wins.
pub fn entry_type_name(source: &str) -> Option<String> {
    ENTRY_TYPE_PATTERN
        .captures(source)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Path of the native binary a compile step writes
pub fn compiled_binary_path(invocation: &Invocation<'_>) -> PathBuf {
    let name = if cfg!(windows) {
        format!("{}.exe", invocation.execution_id)
    } else {
        invocation.execution_id.to_string()
    };
    invocation.artifact_dir.join(name)
}

/// Single-quote a word for display in a POSIX shell line
pub fn shell_quote(word: &str) -> String {
    let is_plain = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:+,@%".contains(c));
    if is_plain {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

fn interpreted(program: &str, invocation: &Invocation<'_>) -> Pipeline {
    Pipeline {
        steps: vec![CommandStep::new(program).arg(invocation.source_path)],
        artifacts: Vec::new(),
    }
}

fn native(compiler: &str, invocation: &Invocation<'_>) -> Pipeline {
    let binary = compiled_binary_path(invocation);
    Pipeline {
        steps: vec![
            CommandStep::new(compiler)
                .arg(invocation.source_path)
                .arg("-o")
                .arg(&binary),
            CommandStep::new(&binary),
        ],
        artifacts: vec![binary],
    }
}

fn python(inv: &Invocation<'_>) -> Pipeline {
    interpreted("python3", inv)
}

fn javascript(inv: &Invocation<'_>) -> Pipeline {
    interpreted("node", inv)
}

fn typescript(inv: &Invocation<'_>) -> Pipeline {
    interpreted("ts-node", inv)
}

fn ruby(inv: &Invocation<'_>) -> Pipeline {
    interpreted("ruby", inv)
}

fn php(inv: &Invocation<'_>) -> Pipeline {
    interpreted("php", inv)
}

fn perl(inv: &Invocation<'_>) -> Pipeline {
    interpreted("perl", inv)
}

fn lua(inv: &Invocation<'_>) -> Pipeline {
    interpreted("lua", inv)
}

fn bash(inv: &Invocation<'_>) -> Pipeline {
    interpreted("bash", inv)
}

fn go(inv: &Invocation<'_>) -> Pipeline {
    Pipeline {
        steps: vec![CommandStep::new("go").arg("run").arg(inv.source_path)],
        artifacts: Vec::new(),
    }
}

fn c(inv: &Invocation<'_>) -> Pipeline {
    native("gcc", inv)
}

fn cpp(inv: &Invocation<'_>) -> Pipeline {
    native("g++", inv)
}

fn rust(inv: &Invocation<'_>) -> Pipeline {
    native("rustc", inv)
}

fn java(inv: &Invocation<'_>) -> Pipeline {
    // Only reached with an entry type; the engine fails fast otherwise.
    let class = inv.entry_type.unwrap_or("Main");
    Pipeline {
        steps: vec![
            CommandStep::new("javac")
                .arg("-d")
                .arg(inv.artifact_dir)
                .arg(inv.source_path),
            CommandStep::new("java")
                .arg("-cp")
                .arg(inv.artifact_dir)
                .arg(class),
        ],
        artifacts: vec![inv.artifact_dir.join(format!("{}.class", class))],
    }
}

fn spec(
    id: &'static str,
    display_name: &'static str,
    detect_command: &'static str,
    file_extension: &'static str,
    build_pipeline: fn(&Invocation<'_>) -> Pipeline,
) -> LanguageSpec {
    LanguageSpec {
        id,
        display_name,
        detect_command,
        file_extension,
        naming: FileNaming::UniqueId,
        build_pipeline,
    }
}

fn builtin_languages() -> Vec<LanguageSpec> {
    vec![
        spec("python", "Python", "python3", "py", python),
        spec("javascript", "JavaScript", "node", "js", javascript),
        spec("typescript", "TypeScript", "ts-node", "ts", typescript),
        spec("ruby", "Ruby", "ruby", "rb", ruby),
        spec("php", "PHP", "php", "php", php),
        spec("perl", "Perl", "perl", "pl", perl),
        spec("lua", "Lua", "lua", "lua", lua),
        spec("bash", "Bash", "bash", "sh", bash),
        spec("go", "Go", "go", "go", go),
        spec("c", "C", "gcc", "c", c),
        spec("cpp", "C++", "g++", "cpp", cpp),
        spec("rust", "Rust", "rustc", "rs", rust),
        LanguageSpec {
            id: "java",
            display_name: "Java",
            detect_command: "javac",
            file_extension: "java",
            naming: FileNaming::EntryType,
            build_pipeline: java,
        },
    ]
}

/// The set of languages the detector probes and the engine can run
#[derive(Debug, Clone)]
pub struct Registry {
    languages: Vec<LanguageSpec>,
}

impl Registry {
    pub fn builtin() -> Self {
        Self {
            languages: builtin_languages(),
        }
    }

    pub fn empty() -> Self {
        Self {
            languages: Vec::new(),
        }
    }

    /// Add a language, replacing any entry with the same id
    pub fn with_language(mut self, spec: LanguageSpec) -> Self {
        self.languages
            .retain(|existing| !existing.id.eq_ignore_ascii_case(spec.id));
        self.languages.push(spec);
        self
    }

    /// Case-insensitive lookup by language id
    pub fn get(&self, id: &str) -> Option<&LanguageSpec> {
        self.languages
            .iter()
            .find(|spec| spec.id.eq_ignore_ascii_case(id.trim()))
    }

    pub fn languages(&self) -> &[LanguageSpec] {
        &self.languages
    }

    pub fn ids(&self) -> Vec<&'static str> {
        self.languages.iter().map(|spec| spec.id).collect()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::builtin()
    }
}
