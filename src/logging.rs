use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{Level, info};
use tracing_subscriber::filter::filter_fn;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

use crate::config::ResolvedConfig;
use crate::dispatch::{Finalize, OutputState};
use crate::error::BuscoError;

pub const RELOCATED_LOG_NAME: &str = "busco.log";

/// The process-wide subscriber: console on stderr plus a plain-text log file
/// that is moved into the output folder when the run ends.
pub struct RunLog {
    path: PathBuf,
    quiet: Arc<AtomicBool>,
}

impl RunLog {
    pub fn init(dir: &Path) -> Result<Self, BuscoError> {
        let name = format!("busco_{}.log", chrono::Local::now().format("%Y%m%d_%H%M%S"));
        let path = dir.join(name);
        let file = File::create(&path)
            .map_err(|err| BuscoError::Logging(format!("create {}: {err}", path.display())))?;

        let quiet = Arc::new(AtomicBool::new(false));
        let console_quiet = Arc::clone(&quiet);
        let console = fmt::layer()
            .with_target(false)
            .with_writer(io::stderr)
            .with_filter(filter_fn(move |meta| {
                !console_quiet.load(Ordering::Relaxed) || *meta.level() == Level::ERROR
            }));
        let file_layer = fmt::layer()
            .with_target(false)
            .with_ansi(false)
            .with_writer(Mutex::new(file));
        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console)
            .with(file_layer)
            .try_init()
            .map_err(|err| BuscoError::Logging(err.to_string()))?;

        Ok(Self { path, quiet })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Console shows errors only; the file keeps everything.
    pub fn set_quiet(&self, quiet: bool) {
        self.quiet.store(quiet, Ordering::Relaxed);
    }

    pub fn relocator(&self) -> LogRelocator {
        LogRelocator::new(self.path.clone())
    }
}

/// Moves the run log to `<output_root>/logs/busco.log`. A log already there
/// (from an earlier restarted invocation) is appended to. When the run never
/// prepared the output folder the log stays where it was written.
#[derive(Debug, Clone)]
pub struct LogRelocator {
    source: PathBuf,
}

impl LogRelocator {
    pub fn new(source: PathBuf) -> Self {
        Self { source }
    }

    pub fn destination(config: &ResolvedConfig) -> PathBuf {
        config.output_root().join("logs").join(RELOCATED_LOG_NAME)
    }
}

impl Finalize for LogRelocator {
    fn finalize(&mut self, config: &ResolvedConfig, output: OutputState) -> Result<(), BuscoError> {
        if output == OutputState::Untouched {
            info!(path = %self.source.display(), "output folder was not prepared; log kept in place");
            return Ok(());
        }
        let destination = Self::destination(config);
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).map_err(|err| {
                BuscoError::Finalization(format!("create {}: {err}", parent.display()))
            })?;
        }
        info!(path = %destination.display(), "moving log file");

        if destination.exists() {
            let mut input = File::open(&self.source).map_err(|err| {
                BuscoError::Finalization(format!("open {}: {err}", self.source.display()))
            })?;
            let mut output = OpenOptions::new()
                .append(true)
                .open(&destination)
                .map_err(|err| {
                    BuscoError::Finalization(format!("open {}: {err}", destination.display()))
                })?;
            io::copy(&mut input, &mut output)
                .map_err(|err| BuscoError::Finalization(err.to_string()))?;
            return fs::remove_file(&self.source)
                .map_err(|err| BuscoError::Finalization(err.to_string()));
        }

        if fs::rename(&self.source, &destination).is_ok() {
            return Ok(());
        }
        // different filesystems
        fs::copy(&self.source, &destination).map_err(|err| {
            BuscoError::Finalization(format!(
                "copy {} to {}: {err}",
                self.source.display(),
                destination.display()
            ))
        })?;
        fs::remove_file(&self.source).map_err(|err| BuscoError::Finalization(err.to_string()))
    }
}
