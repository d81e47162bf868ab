use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use miette::IntoDiagnostic;

use busco_runner::config::{ConfigLoader, PathLocator};
use busco_runner::dispatch::{DispatchFailure, Dispatcher, RunStatus};
use busco_runner::error::BuscoError;
use busco_runner::lineage::PipelineProbe;
use busco_runner::logging::RunLog;
use busco_runner::output::{HumanOutput, JsonOutput, OutputMode};
use busco_runner::pipeline::PipelineRunner;
use busco_runner::schema::keys;
use busco_runner::settings::{RawSettings, SettingsOrigin, Value};
use busco_runner::sources::EnvironmentSource;
use busco_runner::tools::SystemToolRunner;

#[derive(Parser)]
#[command(name = "busco")]
#[command(about = "Assess genome, transcriptome or proteome completeness with single-copy orthologs")]
#[command(version)]
struct Cli {
    /// Input sequence file, or a folder of inputs with --batch_mode
    #[arg(short = 'i', long = "in")]
    input: Option<String>,

    /// Name of the output folder for this run
    #[arg(short = 'o', long)]
    out: Option<String>,

    /// genome (geno), transcriptome (tran) or proteins (prot)
    #[arg(short = 'm', long)]
    mode: Option<String>,

    /// Lineage dataset name or path
    #[arg(short = 'l', long = "lineage_dataset")]
    lineage_dataset: Option<String>,

    #[arg(long = "out_path", alias = "out-path")]
    out_path: Option<String>,

    #[arg(short = 'c', long)]
    cpu: Option<i64>,

    #[arg(short = 'f', long)]
    force: bool,

    #[arg(short = 'r', long)]
    restart: bool,

    #[arg(short = 'q', long)]
    quiet: bool,

    #[arg(long = "download_path")]
    download_path: Option<String>,

    #[arg(long = "datasets_version")]
    datasets_version: Option<String>,

    #[arg(long)]
    offline: bool,

    #[arg(long = "download_base_url")]
    download_base_url: Option<String>,

    #[arg(long = "auto-lineage")]
    auto_lineage: bool,

    #[arg(long = "auto-lineage-prok")]
    auto_lineage_prok: bool,

    #[arg(long = "auto-lineage-euk")]
    auto_lineage_euk: bool,

    #[arg(long = "update-data")]
    update_data: bool,

    #[arg(short = 'e', long)]
    evalue: Option<f64>,

    #[arg(long)]
    limit: Option<i64>,

    #[arg(long = "augustus", alias = "use_augustus")]
    use_augustus: bool,

    #[arg(long = "augustus_parameters", allow_hyphen_values = true)]
    augustus_parameters: Option<String>,

    #[arg(long = "augustus_species")]
    augustus_species: Option<String>,

    #[arg(long)]
    long: bool,

    #[arg(long = "metaeuk_parameters", allow_hyphen_values = true)]
    metaeuk_parameters: Option<String>,

    #[arg(long = "metaeuk_rerun_parameters", allow_hyphen_values = true)]
    metaeuk_rerun_parameters: Option<String>,

    #[arg(long = "batch_mode")]
    batch_mode: bool,

    /// Compress hmmer_output/ and prediction/ into hmmer_output.zip and prediction.zip
    #[arg(long)]
    tar: bool,

    /// Stop a batch at the first failed input
    #[arg(long = "fail_fast")]
    fail_fast: bool,

    /// Config file with a top-level section and one section per tool
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print the run outcome as JSON
    #[arg(long)]
    json: bool,
}

impl Cli {
    /// Only options given on the command line; absent flags leave lower
    /// precedence sources in charge.
    fn settings(&self) -> RawSettings {
        let mut raw = RawSettings::new(SettingsOrigin::CommandLine);
        let texts = [
            (keys::INPUT, &self.input),
            (keys::OUT, &self.out),
            (keys::MODE, &self.mode),
            (keys::LINEAGE_DATASET, &self.lineage_dataset),
            (keys::OUT_PATH, &self.out_path),
            (keys::DOWNLOAD_PATH, &self.download_path),
            (keys::DATASETS_VERSION, &self.datasets_version),
            (keys::DOWNLOAD_BASE_URL, &self.download_base_url),
            (keys::AUGUSTUS_PARAMETERS, &self.augustus_parameters),
            (keys::AUGUSTUS_SPECIES, &self.augustus_species),
            (keys::METAEUK_PARAMETERS, &self.metaeuk_parameters),
            (keys::METAEUK_RERUN_PARAMETERS, &self.metaeuk_rerun_parameters),
        ];
        for (key, value) in texts {
            if let Some(value) = value {
                raw.set(key, value.as_str());
            }
        }
        let flags = [
            (keys::FORCE, self.force),
            (keys::RESTART, self.restart),
            (keys::QUIET, self.quiet),
            (keys::OFFLINE, self.offline),
            (keys::AUTO_LINEAGE, self.auto_lineage),
            (keys::AUTO_LINEAGE_PROK, self.auto_lineage_prok),
            (keys::AUTO_LINEAGE_EUK, self.auto_lineage_euk),
            (keys::UPDATE_DATA, self.update_data),
            (keys::USE_AUGUSTUS, self.use_augustus),
            (keys::LONG, self.long),
            (keys::BATCH_MODE, self.batch_mode),
            (keys::TAR, self.tar),
            (keys::FAIL_FAST, self.fail_fast),
        ];
        for (key, set) in flags {
            if set {
                raw.set(key, true);
            }
        }
        if let Some(cpu) = self.cpu {
            raw.set(keys::CPU, cpu);
        }
        if let Some(limit) = self.limit {
            raw.set(keys::LIMIT, limit);
        }
        if let Some(evalue) = self.evalue {
            raw.set(keys::EVALUE, Value::Float(evalue));
        }
        raw
    }
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(report) => {
            eprintln!("{report:?}");
            if let Some(failure) = report.downcast_ref::<DispatchFailure>() {
                return ExitCode::from(map_exit_code(&failure.error));
            }
            if let Some(busco) = report.downcast_ref::<BuscoError>() {
                return ExitCode::from(map_exit_code(busco));
            }
            ExitCode::from(1)
        }
    }
}

fn map_exit_code(error: &BuscoError) -> u8 {
    match error {
        err if err.is_config_error() => 2,
        BuscoError::LineageDetection(_) => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<ExitCode> {
    let cli = Cli::parse();
    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Human
    };

    let log = RunLog::init(Path::new("."))?;
    log.set_quiet(cli.quiet);

    let loader = ConfigLoader::new(PathLocator, EnvironmentSource::discover());
    let config = loader.load(&cli.settings(), cli.config.as_deref())?;
    log.set_quiet(config.quiet());

    let tools = SystemToolRunner::new();
    let dispatcher = Dispatcher::new(PipelineProbe::new(tools), PipelineRunner::new(tools));
    let outcome = dispatcher.dispatch(&config, log.relocator())?;

    match output_mode {
        OutputMode::Json => JsonOutput::print_outcome(&outcome).into_diagnostic()?,
        OutputMode::Human => HumanOutput::print_outcome(&outcome).into_diagnostic()?,
    }

    Ok(match outcome.status {
        RunStatus::Failed => ExitCode::from(1),
        RunStatus::Done | RunStatus::DoneWithFailures => ExitCode::SUCCESS,
    })
}
