use std::ffi::OsString;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::config::ResolvedConfig;
use crate::error::BuscoError;

/// One blocking call of an external program.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub tool: String,
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub stdout: Option<PathBuf>,
}

impl ToolInvocation {
    /// Start an invocation of the dependency section `tool`, using the
    /// executable the configuration resolved for it.
    pub fn new(config: &ResolvedConfig, tool: &str) -> Result<Self, BuscoError> {
        let program = config
            .tool(tool)
            .and_then(|settings| settings.path.clone())
            .ok_or_else(|| BuscoError::MissingTool(tool.to_string()))?;
        Ok(Self {
            tool: tool.to_string(),
            program,
            args: Vec::new(),
            stdout: None,
        })
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.as_os_str())
    }

    pub fn stdout_to(mut self, path: &Path) -> Self {
        self.stdout = Some(path.to_path_buf());
        self
    }

    pub fn command_line(&self) -> String {
        std::iter::once(self.program.to_string_lossy())
            .chain(self.args.iter().map(|arg| arg.to_string_lossy()))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

pub trait ToolRunner {
    fn run(&self, invocation: &ToolInvocation) -> Result<(), BuscoError>;

    fn version(&self, _program: &Path) -> Option<String> {
        None
    }
}

impl<T: ToolRunner + ?Sized> ToolRunner for &T {
    fn run(&self, invocation: &ToolInvocation) -> Result<(), BuscoError> {
        (**self).run(invocation)
    }

    fn version(&self, program: &Path) -> Option<String> {
        (**self).version(program)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemToolRunner;

impl SystemToolRunner {
    pub fn new() -> Self {
        Self
    }
}

impl ToolRunner for SystemToolRunner {
    fn run(&self, invocation: &ToolInvocation) -> Result<(), BuscoError> {
        debug!(tool = %invocation.tool, command = %invocation.command_line(), "running tool");
        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args);
        match &invocation.stdout {
            Some(path) => {
                let file = File::create(path).map_err(|err| {
                    BuscoError::Filesystem(format!("create {}: {err}", path.display()))
                })?;
                cmd.stdout(Stdio::from(file));
            }
            None => {
                cmd.stdout(Stdio::null());
            }
        }
        let output = cmd.output().map_err(|err| BuscoError::ToolFailed {
            tool: invocation.tool.clone(),
            message: err.to_string(),
        })?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let message = if stderr.is_empty() {
            format!("command failed ({}): {}", output.status, invocation.command_line())
        } else {
            stderr
        };
        Err(BuscoError::ToolFailed {
            tool: invocation.tool.clone(),
            message,
        })
    }

    fn version(&self, program: &Path) -> Option<String> {
        tool_version(program)
    }
}

/// First line of `<tool> --version` (or `-h` for tools that only print a
/// banner) that looks like it carries a version number.
pub fn tool_version(program: &Path) -> Option<String> {
    for flag in ["--version", "-h"] {
        let Ok(output) = Command::new(program).arg(flag).output() else {
            continue;
        };
        let text = format!(
            "{}\n{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        if let Some(version) = extract_version(&text) {
            return Some(version);
        }
    }
    None
}

fn version_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b[vV]?(\d+(?:\.\d+)+[A-Za-z0-9]*)\b").expect("valid regex"))
}

pub fn extract_version(text: &str) -> Option<String> {
    text.lines()
        .filter_map(|line| version_regex().captures(line))
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .next()
}

fn parameter_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^--?([A-Za-z][\w-]*)=(\S+)$").expect("valid regex"))
}

/// Split `"--key=value --other=value"` into flag/value pairs. Anything that
/// does not follow that shape drops the whole string with a warning.
pub fn parse_extra_parameters(tool: &str, raw: &str) -> Vec<(String, String)> {
    let trimmed = raw.trim().trim_matches(|ch| ch == '"' || ch == '\'').trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    let mut pairs = Vec::new();
    for token in trimmed.split_whitespace() {
        match parameter_regex().captures(token) {
            Some(caps) => pairs.push((caps[1].to_string(), caps[2].to_string())),
            None => {
                warn!(
                    tool,
                    parameters = raw,
                    "additional parameters are not formatted as \"--param1=value1 --param2=value2\"; proceeding without them"
                );
                return Vec::new();
            }
        }
    }
    pairs
}

/// Render parsed parameters back into command-line arguments.
pub fn parameter_args(pairs: &[(String, String)]) -> Vec<String> {
    pairs
        .iter()
        .flat_map(|(key, value)| {
            let dashes = if key.len() == 1 { "-" } else { "--" };
            [format!("{dashes}{key}"), value.clone()]
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_extra_parameters() {
        let pairs = parse_extra_parameters("metaeuk", "\"--max-intron=130000 -s=6\"");
        assert_eq!(
            pairs,
            vec![
                ("max-intron".to_string(), "130000".to_string()),
                ("s".to_string(), "6".to_string())
            ]
        );
        assert_eq!(
            parameter_args(&pairs),
            vec!["--max-intron", "130000", "-s", "6"]
        );
    }

    #[test]
    fn malformed_parameters_are_dropped() {
        assert!(parse_extra_parameters("augustus", "--gff3 on").is_empty());
        assert!(parse_extra_parameters("augustus", "   ").is_empty());
    }

    #[test]
    fn extracts_versions_from_banners() {
        let banner = "# hmmsearch :: search profile(s) against a sequence database\n# HMMER 3.3.2 (Nov 2020); http://hmmer.org/\n";
        assert_eq!(extract_version(banner).as_deref(), Some("3.3.2"));
        assert_eq!(extract_version("Prodigal V2.6.3: February, 2016").as_deref(), Some("2.6.3"));
        assert_eq!(extract_version("no digits here"), None);
    }
}
