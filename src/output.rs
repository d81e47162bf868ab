use std::fmt::Write as _;
use std::io::{self, Write};

use serde::Serialize;

use crate::dispatch::{RunOutcome, RunStatus};
use crate::domain::TargetStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Human,
    Json,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_outcome(outcome: &RunOutcome) -> io::Result<()> {
        Self::print_json(outcome)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

pub struct HumanOutput;

impl HumanOutput {
    pub fn print_outcome(outcome: &RunOutcome) -> io::Result<()> {
        let mut stdout = io::stdout();
        stdout.write_all(Self::render(outcome, true).as_bytes())
    }

    pub fn render(outcome: &RunOutcome, color: bool) -> String {
        let paint = |code: &'static str| if color { code } else { "" };
        let green = paint("\x1b[32m");
        let yellow = paint("\x1b[33m");
        let cyan = paint("\x1b[36m");
        let red = paint("\x1b[31m");
        let reset = paint("\x1b[0m");

        let mut out = String::new();
        let headline = match outcome.status {
            RunStatus::Done => format!("{green}BUSCO run finished{reset}"),
            RunStatus::DoneWithFailures => {
                format!("{yellow}BUSCO run finished with failed targets{reset}")
            }
            RunStatus::Failed => format!("{red}BUSCO run failed{reset}"),
        };
        let _ = writeln!(out, "{cyan}[{}]{reset} {headline}", outcome.mode);

        for result in &outcome.results {
            match result.status {
                TargetStatus::Success => {
                    let _ = writeln!(
                        out,
                        "{green}  ok      {} ({}){reset}",
                        result.target,
                        result.lineage.as_deref().unwrap_or("-")
                    );
                    if let Some(summary) = &result.summary {
                        let _ = writeln!(out, "          {summary}");
                    }
                    if let Some(path) = &result.artifacts {
                        let _ = writeln!(out, "          results: {path}");
                    }
                }
                TargetStatus::Failed => {
                    let _ = writeln!(out, "{red}  failed  {}{reset}", result.target);
                    if let Some(error) = &result.error {
                        let _ = writeln!(out, "          {error}");
                    }
                }
                TargetStatus::Skipped => {
                    let _ = writeln!(out, "{yellow}  skipped {}{reset}", result.target);
                }
            }
        }

        if let Some(error) = &outcome.finalization_error {
            let _ = writeln!(out, "{yellow}warning: {error}{reset}");
        }
        out
    }
}
