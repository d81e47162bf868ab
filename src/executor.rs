use std::fs;
use std::path::{Path, PathBuf};

use tracing::{error, info, warn};

use crate::config::ResolvedConfig;
use crate::dispatch::RunStage;
use crate::domain::{TargetArtifacts, TargetResult, TargetStatus};
use crate::error::BuscoError;
use crate::lineage::{Harmonizer, PlacementProbe};

/// Per-target analysis, shared by both executors.
pub trait TargetRunner {
    fn run(&self, target: &Path, config: &ResolvedConfig) -> Result<TargetArtifacts, BuscoError>;
}

impl<T: TargetRunner + ?Sized> TargetRunner for &T {
    fn run(&self, target: &Path, config: &ResolvedConfig) -> Result<TargetArtifacts, BuscoError> {
        (**self).run(target, config)
    }
}

pub trait Executor {
    fn execute(&self, config: &ResolvedConfig) -> Result<Vec<TargetResult>, BuscoError>;
}

fn target_error(target: &Path, err: BuscoError) -> BuscoError {
    let stage = match err {
        BuscoError::TargetExecution { .. } => return err,
        BuscoError::LineageDetection(_) => RunStage::ResolveLineage.to_string(),
        _ => "analysis".to_string(),
    };
    BuscoError::TargetExecution {
        target: target.display().to_string(),
        stage,
        message: err.to_string(),
    }
}

pub struct SingleExecutor<T> {
    runner: T,
}

impl<T: TargetRunner> SingleExecutor<T> {
    pub fn new(runner: T) -> Self {
        Self { runner }
    }
}

impl<T: TargetRunner> Executor for SingleExecutor<T> {
    fn execute(&self, config: &ResolvedConfig) -> Result<Vec<TargetResult>, BuscoError> {
        let input = config.input();
        if !input.is_file() {
            return Err(BuscoError::InvalidInput(format!(
                "{} is not a file; use --batch_mode for a folder of inputs",
                input.display()
            )));
        }
        let artifacts = self
            .runner
            .run(input, config)
            .map_err(|err| target_error(input, err))?;
        Ok(vec![TargetResult::success(
            &input.display().to_string(),
            artifacts,
        )])
    }
}

pub struct BatchExecutor<T> {
    runner: T,
}

impl<T: TargetRunner> BatchExecutor<T> {
    pub fn new(runner: T) -> Self {
        Self { runner }
    }
}

/// Regular, non-hidden files of `input`, sorted by name.
pub fn batch_targets(input: &Path) -> Result<Vec<PathBuf>, BuscoError> {
    if !input.is_dir() {
        return Err(BuscoError::InvalidInput(format!(
            "{} is not a folder; batch mode expects a folder of inputs",
            input.display()
        )));
    }
    let mut targets = fs::read_dir(input)
        .map_err(|err| BuscoError::Filesystem(format!("read {}: {err}", input.display())))?
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| {
            path.file_name()
                .is_some_and(|name| !name.to_string_lossy().starts_with('.'))
        })
        .collect::<Vec<_>>();
    targets.sort();
    if targets.is_empty() {
        return Err(BuscoError::InvalidInput(format!(
            "{} contains no input files",
            input.display()
        )));
    }
    Ok(targets)
}

impl<T: TargetRunner> Executor for BatchExecutor<T> {
    fn execute(&self, config: &ResolvedConfig) -> Result<Vec<TargetResult>, BuscoError> {
        let targets = batch_targets(config.input())?;
        info!(targets = targets.len(), "running in batch mode");

        let mut results = Vec::with_capacity(targets.len());
        let mut aborted = false;
        for target in &targets {
            let name = target.display().to_string();
            if aborted {
                results.push(TargetResult::skipped(&name));
                continue;
            }
            let target_config = config.for_target(target);
            match self.runner.run(target, &target_config) {
                Ok(artifacts) => {
                    info!(target = %name, summary = %artifacts.summary, "target finished");
                    results.push(TargetResult::success(&name, artifacts));
                }
                Err(err) => {
                    let err = target_error(target, err);
                    error!(target = %name, error = %err, "target failed");
                    results.push(TargetResult::failed(&name, &err));
                    if config.fail_fast() {
                        warn!("fail-fast is set; skipping remaining targets");
                        aborted = true;
                    }
                }
            }
        }

        let failed = results
            .iter()
            .filter(|result| result.status == TargetStatus::Failed)
            .count();
        info!(
            total = results.len(),
            failed,
            "batch finished"
        );
        Ok(results)
    }
}

/// Picks the lineage for each target on its own before running it.
pub struct HarmonizedRunner<'a, P, T> {
    harmonizer: &'a Harmonizer<P>,
    runner: T,
}

impl<'a, P: PlacementProbe, T: TargetRunner> HarmonizedRunner<'a, P, T> {
    pub fn new(harmonizer: &'a Harmonizer<P>, runner: T) -> Self {
        Self { harmonizer, runner }
    }
}

impl<P: PlacementProbe, T: TargetRunner> TargetRunner for HarmonizedRunner<'_, P, T> {
    fn run(&self, target: &Path, config: &ResolvedConfig) -> Result<TargetArtifacts, BuscoError> {
        let config = self.harmonizer.harmonize(config)?;
        self.runner.run(target, &config)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn batch_targets_skip_hidden_and_folders() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(temp.path().join("b.fna"), ">b\nACGT\n").unwrap();
        fs::write(temp.path().join("a.fna"), ">a\nACGT\n").unwrap();
        fs::write(temp.path().join(".DS_Store"), "").unwrap();
        fs::create_dir(temp.path().join("nested")).unwrap();

        let targets = batch_targets(temp.path()).unwrap();
        let names = targets
            .iter()
            .map(|path| path.file_name().unwrap().to_string_lossy().to_string())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["a.fna", "b.fna"]);
    }

    #[test]
    fn empty_batch_folder_is_rejected() {
        let temp = tempfile::tempdir().unwrap();
        assert_matches!(batch_targets(temp.path()), Err(BuscoError::InvalidInput(_)));
    }

    #[test]
    fn foreign_errors_become_target_errors() {
        let err = target_error(
            Path::new("a.fna"),
            BuscoError::MissingTool("hmmsearch".to_string()),
        );
        assert_matches!(err, BuscoError::TargetExecution { ref stage, .. } if stage == "analysis");
    }

    #[test]
    fn lineage_failures_keep_their_stage() {
        let err = target_error(
            Path::new("a.fna"),
            BuscoError::LineageDetection("every placement probe failed".to_string()),
        );
        assert_matches!(err, BuscoError::TargetExecution { ref stage, ref message, .. }
            if stage == "lineage resolution" && message.contains("placement"));
    }
}
