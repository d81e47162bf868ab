use std::fmt;

use miette::Diagnostic;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::ResolvedConfig;
use crate::domain::{RunMode, TargetResult, TargetStatus};
use crate::error::BuscoError;
use crate::executor::{BatchExecutor, Executor, HarmonizedRunner, SingleExecutor, TargetRunner};
use crate::layout::prepare_output_root;
use crate::lineage::{Harmonizer, PlacementProbe};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    Init,
    ResolveLineage,
    SelectMode,
    Execute,
    Finalize,
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunStage::Init => "init",
            RunStage::ResolveLineage => "lineage resolution",
            RunStage::SelectMode => "mode selection",
            RunStage::Execute => "execution",
            RunStage::Finalize => "finalization",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Done,
    DoneWithFailures,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunOutcome {
    pub mode: RunMode,
    pub status: RunStatus,
    pub results: Vec<TargetResult>,
    pub finalization_error: Option<String>,
}

impl RunOutcome {
    pub fn failed_targets(&self) -> impl Iterator<Item = &TargetResult> {
        self.results
            .iter()
            .filter(|result| result.status == TargetStatus::Failed)
    }
}

/// A run that stopped at `stage`. Finalization problems hang off the
/// primary error and never replace it.
#[derive(Debug, Error, Diagnostic)]
#[error("run failed during {stage}")]
pub struct DispatchFailure {
    pub stage: RunStage,
    #[source]
    #[diagnostic_source]
    pub error: BuscoError,
    #[related]
    pub finalization: Vec<BuscoError>,
}

/// Whether INIT took ownership of the output folder. A refused or failed
/// INIT leaves an existing folder exactly as an earlier run left it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputState {
    Prepared,
    Untouched,
}

/// The action every dispatch ends with, whichever way it exits.
pub trait Finalize {
    fn finalize(&mut self, config: &ResolvedConfig, output: OutputState) -> Result<(), BuscoError>;
}

impl<F> Finalize for F
where
    F: FnMut(&ResolvedConfig, OutputState) -> Result<(), BuscoError>,
{
    fn finalize(&mut self, config: &ResolvedConfig, output: OutputState) -> Result<(), BuscoError> {
        self(config, output)
    }
}

/// Holds the finalizer from INIT on. It runs once: through [`finish`] on
/// ordinary exits, or on drop when the run unwinds.
///
/// [`finish`]: FinalizeGuard::finish
pub struct FinalizeGuard<'a, F: Finalize> {
    finalizer: Option<F>,
    config: &'a ResolvedConfig,
    output: OutputState,
}

impl<'a, F: Finalize> FinalizeGuard<'a, F> {
    pub fn new(finalizer: F, config: &'a ResolvedConfig) -> Self {
        Self {
            finalizer: Some(finalizer),
            config,
            output: OutputState::Untouched,
        }
    }

    pub fn output_prepared(&mut self) {
        self.output = OutputState::Prepared;
    }

    pub fn finish(mut self) -> Result<(), BuscoError> {
        match self.finalizer.take() {
            Some(mut finalizer) => finalizer.finalize(self.config, self.output),
            None => Ok(()),
        }
    }
}

impl<F: Finalize> Drop for FinalizeGuard<'_, F> {
    fn drop(&mut self) {
        if let Some(mut finalizer) = self.finalizer.take() {
            if let Err(err) = finalizer.finalize(self.config, self.output) {
                error!(error = %err, "finalization failed");
            }
        }
    }
}

pub struct Dispatcher<P, T> {
    harmonizer: Harmonizer<P>,
    runner: T,
}

impl<P: PlacementProbe, T: TargetRunner> Dispatcher<P, T> {
    pub fn new(probe: P, runner: T) -> Self {
        Self {
            harmonizer: Harmonizer::new(probe),
            runner,
        }
    }

    /// Drive one run to a terminal state. `finalizer` runs exactly once on
    /// every path, including panics inside the executors.
    pub fn dispatch<F: Finalize>(
        &self,
        config: &ResolvedConfig,
        finalizer: F,
    ) -> Result<RunOutcome, DispatchFailure> {
        let mut guard = FinalizeGuard::new(finalizer, config);
        let result = self.run_stages(config, &mut guard);

        // The log file moves during FINALIZE; anything written after it is lost.
        let status = match &result {
            Ok((mode, results)) => {
                let failed = results
                    .iter()
                    .filter(|result| result.status == TargetStatus::Failed)
                    .count();
                let status = match failed {
                    0 => RunStatus::Done,
                    _ if config.fail_fast() => RunStatus::Failed,
                    _ => RunStatus::DoneWithFailures,
                };
                info!(%mode, ?status, targets = results.len(), failed, "run finished");
                status
            }
            Err((stage, error)) => {
                error!(%stage, error = %error, "run failed");
                RunStatus::Failed
            }
        };

        debug!(stage = %RunStage::Finalize, "entering stage");
        let finalization = guard.finish();

        match result {
            Ok((mode, results)) => {
                let finalization_error = match finalization {
                    Ok(()) => None,
                    Err(err) => {
                        warn!(error = %err, "run finished but its log could not be relocated");
                        Some(err.to_string())
                    }
                };
                Ok(RunOutcome {
                    mode,
                    status,
                    results,
                    finalization_error,
                })
            }
            Err((stage, error)) => Err(DispatchFailure {
                stage,
                error,
                finalization: finalization.err().into_iter().collect(),
            }),
        }
    }

    fn run_stages<F: Finalize>(
        &self,
        config: &ResolvedConfig,
        guard: &mut FinalizeGuard<'_, F>,
    ) -> Result<(RunMode, Vec<TargetResult>), (RunStage, BuscoError)> {
        debug!(stage = %RunStage::Init, "entering stage");
        prepare_output_root(&config.output_root(), config.force(), config.restart())
            .map_err(|err| (RunStage::Init, err))?;
        guard.output_prepared();

        // A batch input is a folder; each member gets its own lineage later.
        let config = if config.batch_mode() {
            config.clone()
        } else {
            debug!(stage = %RunStage::ResolveLineage, "entering stage");
            self.harmonizer
                .harmonize(config)
                .map_err(|err| (RunStage::ResolveLineage, err))?
        };

        debug!(stage = %RunStage::SelectMode, "entering stage");
        let mode = if config.batch_mode() {
            RunMode::Batch
        } else {
            RunMode::Single
        };
        info!(%mode, "selected run mode");

        debug!(stage = %RunStage::Execute, "entering stage");
        let results = match mode {
            RunMode::Single => SingleExecutor::new(&self.runner).execute(&config),
            RunMode::Batch => {
                BatchExecutor::new(HarmonizedRunner::new(&self.harmonizer, &self.runner))
                    .execute(&config)
            }
        }
        .map_err(|err| (RunStage::Execute, err))?;
        Ok((mode, results))
    }
}
