//! Per-target analysis: gene prediction, profile search and summary, each
//! stage checkpointed so a restarted run can skip what already completed.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::config::ResolvedConfig;
use crate::dataset::LineageDataset;
use crate::domain::{AnalysisMode, Domain, TargetArtifacts};
use crate::error::BuscoError;
use crate::executor::TargetRunner;
use crate::fs_util;
use crate::layout::RunLayout;
use crate::schema::keys;
use crate::summary::{self, AnalysisSummary, BuscoRecord, Cutoffs};
use crate::tools::{ToolInvocation, ToolRunner, parameter_args, parse_extra_parameters};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Setup,
    GenePrediction,
    HmmSearch,
    MetaeukRerun,
    Summary,
    Archive,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Setup => "setup",
            Stage::GenePrediction => "gene_prediction",
            Stage::HmmSearch => "hmmsearch",
            Stage::MetaeukRerun => "metaeuk_rerun",
            Stage::Summary => "summary",
            Stage::Archive => "archive",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn at_stage(target: &Path, stage: Stage) -> impl FnOnce(BuscoError) -> BuscoError {
    let target = target.display().to_string();
    move |err| match err {
        already @ BuscoError::TargetExecution { .. } => already,
        err => BuscoError::TargetExecution {
            target,
            stage: stage.to_string(),
            message: err.to_string(),
        },
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenePredictor {
    Prodigal,
    Metaeuk,
    Augustus,
}

impl GenePredictor {
    pub fn for_domain(domain: Domain, use_augustus: bool) -> Self {
        match domain {
            Domain::Prokaryota | Domain::Viruses => GenePredictor::Prodigal,
            Domain::Eukaryota if use_augustus => GenePredictor::Augustus,
            Domain::Eukaryota => GenePredictor::Metaeuk,
        }
    }

    pub fn tool(&self) -> &'static str {
        match self {
            GenePredictor::Prodigal => keys::PRODIGAL,
            GenePredictor::Metaeuk => keys::METAEUK,
            GenePredictor::Augustus => keys::AUGUSTUS,
        }
    }

    pub fn protein_output(&self, layout: &RunLayout) -> PathBuf {
        let dir = layout.prediction_dir().into_std_path_buf();
        match self {
            GenePredictor::Prodigal => dir.join("predicted.faa"),
            GenePredictor::Metaeuk => dir.join("metaeuk.fas"),
            GenePredictor::Augustus => dir.join("augustus.faa"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    pub lineage: String,
    pub run_dir: PathBuf,
    pub summary: AnalysisSummary,
}

/// Runs the analysis stages through a [`ToolRunner`].
#[derive(Debug, Clone)]
pub struct PipelineRunner<R> {
    tools: R,
}

impl<R: ToolRunner> PipelineRunner<R> {
    pub fn new(tools: R) -> Self {
        Self { tools }
    }

    pub fn tools(&self) -> &R {
        &self.tools
    }

    /// Analyse `target` against the configured lineage, writing below
    /// `output_root`.
    pub fn analyse(
        &self,
        target: &Path,
        config: &ResolvedConfig,
        output_root: &Path,
    ) -> Result<AnalysisOutcome, BuscoError> {
        if !target.is_file() {
            return Err(at_stage(target, Stage::Setup)(BuscoError::InvalidInput(format!(
                "{} is not a file",
                target.display()
            ))));
        }
        let dataset = LineageDataset::open(config).map_err(at_stage(target, Stage::Setup))?;
        let layout = RunLayout::new(output_root, &dataset.name)
            .and_then(|layout| layout.ensure().map(|_| layout))
            .map_err(at_stage(target, Stage::Setup))?;

        info!(
            target = %target.display(),
            lineage = %dataset.name,
            domain = %dataset.domain,
            "***** Running analysis *****"
        );

        let mut resume = config.restart();
        let mut versions = BTreeMap::new();

        let predictor = config
            .mode()
            .needs_gene_prediction()
            .then(|| GenePredictor::for_domain(dataset.domain, config.use_augustus()));
        let proteins = match predictor {
            Some(predictor) => {
                self.record_version(config, predictor.tool(), &mut versions);
                let output = predictor.protein_output(&layout);
                let stage = Stage::GenePrediction;
                if resume && layout.is_complete(stage.name()) && output.exists() {
                    info!(tool = predictor.tool(), "skipping gene prediction as it has already completed");
                } else {
                    resume = false;
                    layout
                        .clear_checkpoint(stage.name())
                        .and_then(|_| self.predict_genes(predictor, target, config, &dataset, &layout))
                        .and_then(|_| layout.mark_complete(stage.name()))
                        .map_err(at_stage(target, stage))?;
                }
                output
            }
            None => target.to_path_buf(),
        };

        self.record_version(config, keys::HMMSEARCH, &mut versions);
        let hmmer_dir = layout.hmmer_dir().into_std_path_buf();
        let stage = Stage::HmmSearch;
        if resume && layout.is_complete(stage.name()) && hmmer_dir.exists() {
            info!("skipping hmmsearch as it has already completed");
        } else {
            resume = false;
            layout
                .clear_checkpoint(stage.name())
                .and_then(|_| {
                    self.search_profiles(&proteins, config, &dataset, &dataset.busco_ids, &hmmer_dir)
                })
                .and_then(|_| layout.mark_complete(stage.name()))
                .map_err(at_stage(target, stage))?;
        }

        let cutoffs = dataset.cutoffs().map_err(at_stage(target, Stage::Summary))?;
        let mut records = classify_results(&hmmer_dir, &dataset.busco_ids, &cutoffs, config.limit());

        if predictor == Some(GenePredictor::Metaeuk) {
            let incomplete = records
                .iter()
                .filter(|record| record.status.is_incomplete())
                .map(|record| record.id.clone())
                .collect::<Vec<_>>();
            if !incomplete.is_empty() {
                let stage = Stage::MetaeukRerun;
                if resume && layout.is_complete(stage.name()) {
                    info!("skipping the metaeuk rerun as it has already completed");
                } else {
                    layout
                        .clear_checkpoint(stage.name())
                        .and_then(|_| self.rerun_metaeuk(target, config, &dataset, &layout, &incomplete))
                        .and_then(|_| layout.mark_complete(stage.name()))
                        .map_err(at_stage(target, stage))?;
                }
                let rerun_dir = layout.rerun_hmmer_dir().into_std_path_buf();
                let rerun = classify_results(&rerun_dir, &incomplete, &cutoffs, config.limit());
                summary::merge_rerun(&mut records, rerun);
            }
        }

        let summary = self
            .summarise(config, &dataset, &layout, &records, versions)
            .map_err(at_stage(target, Stage::Summary))?;
        info!(lineage = %dataset.name, "{}", summary.one_line());

        Ok(AnalysisOutcome {
            lineage: dataset.name,
            run_dir: layout.run_dir().to_path_buf().into_std_path_buf(),
            summary,
        })
    }

    fn record_version(
        &self,
        config: &ResolvedConfig,
        tool: &str,
        versions: &mut BTreeMap<String, String>,
    ) {
        if let Some(version) = config
            .tool(tool)
            .and_then(|settings| settings.path.as_deref())
            .and_then(|path| self.tools.version(path))
        {
            versions.insert(tool.to_string(), version);
        }
    }

    fn predict_genes(
        &self,
        predictor: GenePredictor,
        target: &Path,
        config: &ResolvedConfig,
        dataset: &LineageDataset,
        layout: &RunLayout,
    ) -> Result<(), BuscoError> {
        let prediction_dir = layout.prediction_dir().into_std_path_buf();
        info!(tool = predictor.tool(), "***** Run {} on input to predict and extract genes *****", predictor.tool());
        match predictor {
            GenePredictor::Prodigal => {
                let procedure = match config.mode() {
                    AnalysisMode::Genome => "single",
                    _ => "meta",
                };
                let invocation = ToolInvocation::new(config, keys::PRODIGAL)?
                    .arg("-i")
                    .path_arg(target)
                    .arg("-a")
                    .path_arg(&predictor.protein_output(layout))
                    .arg("-d")
                    .path_arg(&prediction_dir.join("predicted.fna"))
                    .arg("-o")
                    .path_arg(&prediction_dir.join("predicted.gff"))
                    .args(["-f", "gff", "-p", procedure]);
                self.tools.run(&invocation)
            }
            GenePredictor::Metaeuk => {
                let refseq = reference_proteins(dataset, &prediction_dir)?;
                self.run_metaeuk(config, target, &refseq, &prediction_dir, keys::METAEUK_PARAMETERS)
            }
            GenePredictor::Augustus => {
                let species = config
                    .text(keys::AUGUSTUS_SPECIES)
                    .map(str::to_string)
                    .or_else(|| dataset.species.clone())
                    .ok_or_else(|| {
                        BuscoError::InvalidDataset(format!(
                            "{} names no augustus species; pass --augustus_species",
                            dataset.name
                        ))
                    })?;
                if config.flag(keys::LONG) {
                    warn!("augustus self-training (--long) is not available; using the pre-trained species parameters");
                }
                let extra = config
                    .text(keys::AUGUSTUS_PARAMETERS)
                    .map(|raw| parse_extra_parameters(keys::AUGUSTUS, raw))
                    .unwrap_or_default();
                let gff = prediction_dir.join("augustus.gff");
                let invocation = ToolInvocation::new(config, keys::AUGUSTUS)?
                    .arg(format!("--species={species}"))
                    .args(["--protein=on", "--codingseq=off"])
                    .args(
                        extra
                            .iter()
                            .map(|(key, value)| format!("--{key}={value}")),
                    )
                    .path_arg(target)
                    .stdout_to(&gff);
                self.tools.run(&invocation)?;
                let content = fs::read_to_string(&gff)
                    .map_err(|err| BuscoError::Filesystem(format!("read {}: {err}", gff.display())))?;
                let fasta = augustus_proteins(&content)
                    .into_iter()
                    .map(|(gene, sequence)| format!(">{gene}\n{sequence}\n"))
                    .collect::<String>();
                fs::write(predictor.protein_output(layout), fasta)
                    .map_err(|err| BuscoError::Filesystem(err.to_string()))
            }
        }
    }

    /// `easy-predict` writing `<out_dir>/metaeuk.fas`, with the extra
    /// parameters stored under `parameters`.
    fn run_metaeuk(
        &self,
        config: &ResolvedConfig,
        target: &Path,
        refseq: &Path,
        out_dir: &Path,
        parameters: &str,
    ) -> Result<(), BuscoError> {
        let scratch = tempfile::Builder::new()
            .prefix("metaeuk_tmp")
            .tempdir_in(out_dir)
            .map_err(|err| BuscoError::Filesystem(err.to_string()))?;
        let extra = config
            .text(parameters)
            .map(|raw| parse_extra_parameters(keys::METAEUK, raw))
            .unwrap_or_default();
        let invocation = ToolInvocation::new(config, keys::METAEUK)?
            .arg("easy-predict")
            .arg("--threads")
            .arg(config.cpu().to_string())
            .path_arg(target)
            .path_arg(refseq)
            .path_arg(&out_dir.join("metaeuk"))
            .path_arg(scratch.path())
            .args(parameter_args(&extra));
        self.tools.run(&invocation)
    }

    fn rerun_metaeuk(
        &self,
        target: &Path,
        config: &ResolvedConfig,
        dataset: &LineageDataset,
        layout: &RunLayout,
        incomplete: &[String],
    ) -> Result<(), BuscoError> {
        let prediction_dir = layout.prediction_dir().into_std_path_buf();
        let rerun_prediction = layout.rerun_prediction_dir().into_std_path_buf();
        let rerun_hmmer = layout.rerun_hmmer_dir().into_std_path_buf();
        for dir in [&rerun_prediction, &rerun_hmmer] {
            fs::create_dir_all(dir).map_err(|err| {
                BuscoError::Filesystem(format!("create {}: {err}", dir.display()))
            })?;
        }

        let refseq = reference_proteins(dataset, &prediction_dir)?;
        let content = fs::read_to_string(&refseq)
            .map_err(|err| BuscoError::Filesystem(format!("read {}: {err}", refseq.display())))?;
        let (subset, unmatched) = reference_subset(&content, incomplete);
        if !unmatched.is_empty() {
            warn!(buscos = %unmatched.join(", "), "no reference sequences for these BUSCOs");
        }
        if subset.is_empty() {
            info!("nothing to rerun metaeuk with; keeping the first pass");
            return Ok(());
        }
        let rerun_refseq = prediction_dir.join("refseq_db_rerun.faa");
        fs::write(&rerun_refseq, subset).map_err(|err| {
            BuscoError::Filesystem(format!("write {}: {err}", rerun_refseq.display()))
        })?;

        info!(
            buscos = incomplete.len(),
            "***** Rerun metaeuk for missing and fragmented BUSCOs *****"
        );
        self.run_metaeuk(
            config,
            target,
            &rerun_refseq,
            &rerun_prediction,
            keys::METAEUK_RERUN_PARAMETERS,
        )?;
        let proteins = rerun_prediction.join("metaeuk.fas");
        let found = fs::read_to_string(&proteins)
            .map(|content| content.contains('>'))
            .unwrap_or(false);
        if !found {
            info!("metaeuk rerun did not find any genes");
            return Ok(());
        }
        self.search_profiles(&proteins, config, dataset, incomplete, &rerun_hmmer)
    }

    fn search_profiles(
        &self,
        proteins: &Path,
        config: &ResolvedConfig,
        dataset: &LineageDataset,
        busco_ids: &[String],
        out_dir: &Path,
    ) -> Result<(), BuscoError> {
        info!(
            profiles = busco_ids.len(),
            "***** Run HMMER on gene sequences *****"
        );
        fs::create_dir_all(out_dir).map_err(|err| BuscoError::Filesystem(err.to_string()))?;
        for busco_id in busco_ids {
            let invocation = ToolInvocation::new(config, keys::HMMSEARCH)?
                .arg("--domtblout")
                .path_arg(&out_dir.join(format!("{busco_id}.out")))
                .arg("--cpu")
                .arg(config.cpu().to_string())
                .arg("-E")
                .arg(config.evalue().to_string())
                .path_arg(&dataset.hmm_path(busco_id))
                .path_arg(proteins);
            self.tools.run(&invocation)?;
        }
        Ok(())
    }

    fn summarise(
        &self,
        config: &ResolvedConfig,
        dataset: &LineageDataset,
        layout: &RunLayout,
        records: &[BuscoRecord],
        versions: BTreeMap<String, String>,
    ) -> Result<AnalysisSummary, BuscoError> {
        let result = AnalysisSummary::from_records(
            &dataset.name,
            &config.mode().to_string(),
            records,
            versions,
        );
        summary::write_outputs(layout, &result, records)?;
        Ok(result)
    }
}

fn reference_proteins(dataset: &LineageDataset, prediction_dir: &Path) -> Result<PathBuf, BuscoError> {
    let refseq = prediction_dir.join("refseq_db.faa");
    if !refseq.exists() {
        fs_util::gunzip(&dataset.refseq_db_path(), &refseq)?;
    }
    Ok(refseq)
}

/// Classify every BUSCO from its `<id>.out` table in `dir`; absent tables
/// count as no hits.
fn classify_results(dir: &Path, busco_ids: &[String], cutoffs: &Cutoffs, limit: usize) -> Vec<BuscoRecord> {
    busco_ids
        .iter()
        .map(|busco_id| {
            let hits = fs::read_to_string(dir.join(format!("{busco_id}.out")))
                .map(|content| summary::parse_domtblout(&content))
                .unwrap_or_default();
            cutoffs.classify(busco_id, &hits, limit)
        })
        .collect()
}

/// Reference proteins of `busco_ids`, whose headers read `<busco_id>` or
/// `<busco_id>_<suffix>`, plus the ids that have none.
pub fn reference_subset(fasta: &str, busco_ids: &[String]) -> (String, Vec<String>) {
    let owner = |header: &str| {
        let id = header.split_whitespace().next().unwrap_or_default();
        busco_ids
            .iter()
            .find(|busco_id| {
                id.strip_prefix(busco_id.as_str())
                    .is_some_and(|rest| rest.is_empty() || rest.starts_with('_'))
            })
            .cloned()
    };

    let mut subset = String::new();
    let mut found = BTreeSet::new();
    let mut keep = false;
    for line in fasta.lines() {
        if let Some(header) = line.strip_prefix('>') {
            let busco_id = owner(header);
            keep = busco_id.is_some();
            found.extend(busco_id);
        }
        if keep {
            subset.push_str(line);
            subset.push('\n');
        }
    }
    let unmatched = busco_ids
        .iter()
        .filter(|busco_id| !found.contains(*busco_id))
        .cloned()
        .collect();
    (subset, unmatched)
}

impl<R: ToolRunner> TargetRunner for PipelineRunner<R> {
    fn run(&self, target: &Path, config: &ResolvedConfig) -> Result<TargetArtifacts, BuscoError> {
        let outcome = self.analyse(target, config, &config.output_root())?;
        if config.tar() {
            for dir in ["hmmer_output", "prediction"] {
                let path = outcome.run_dir.join(dir);
                if path.is_dir() {
                    fs_util::archive_dir(&path).map_err(at_stage(target, Stage::Archive))?;
                }
            }
        }
        Ok(TargetArtifacts {
            run_dir: outcome.run_dir.display().to_string(),
            lineage: outcome.lineage,
            summary: outcome.summary.one_line(),
        })
    }
}

/// Protein sequences embedded in augustus GFF output as
/// `# protein sequence = [...]` comment blocks, keyed by gene id.
pub fn augustus_proteins(gff: &str) -> Vec<(String, String)> {
    let mut proteins = Vec::new();
    let mut gene = None::<String>;
    let mut sequence = None::<String>;
    for line in gff.lines() {
        let Some(comment) = line.strip_prefix("# ") else {
            continue;
        };
        if let Some(id) = comment.strip_prefix("start gene ") {
            gene = Some(id.trim().to_string());
            continue;
        }
        let chunk = match (sequence.is_some(), comment.strip_prefix("protein sequence = [")) {
            (false, Some(rest)) => {
                sequence = Some(String::new());
                rest
            }
            (true, _) => comment,
            (false, None) => continue,
        };
        let (chunk, done) = match chunk.split_once(']') {
            Some((head, _)) => (head, true),
            None => (chunk, false),
        };
        if let Some(seq) = sequence.as_mut() {
            seq.push_str(chunk.trim());
        }
        if done {
            if let (Some(id), Some(seq)) = (gene.clone(), sequence.take()) {
                proteins.push((id, seq));
            }
        }
    }
    proteins
}
