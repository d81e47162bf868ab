use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::BuscoError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisMode {
    Genome,
    Transcriptome,
    Proteins,
}

impl AnalysisMode {
    pub fn needs_gene_prediction(&self) -> bool {
        !matches!(self, AnalysisMode::Proteins)
    }
}

impl fmt::Display for AnalysisMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnalysisMode::Genome => write!(f, "genome"),
            AnalysisMode::Transcriptome => write!(f, "transcriptome"),
            AnalysisMode::Proteins => write!(f, "proteins"),
        }
    }
}

impl FromStr for AnalysisMode {
    type Err = BuscoError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "genome" | "geno" => Ok(AnalysisMode::Genome),
            "transcriptome" | "tran" => Ok(AnalysisMode::Transcriptome),
            "proteins" | "prot" => Ok(AnalysisMode::Proteins),
            _ => Err(BuscoError::validation(format!("mode: unknown mode `{value}`"))),
        }
    }
}

/// Domain recorded in a lineage dataset's `dataset.cfg`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    Prokaryota,
    Eukaryota,
    Viruses,
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Domain::Prokaryota => write!(f, "prokaryota"),
            Domain::Eukaryota => write!(f, "eukaryota"),
            Domain::Viruses => write!(f, "viruses"),
        }
    }
}

impl FromStr for Domain {
    type Err = BuscoError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "prokaryota" | "bacteria" | "archaea" => Ok(Domain::Prokaryota),
            "eukaryota" => Ok(Domain::Eukaryota),
            "viruses" | "virus" => Ok(Domain::Viruses),
            _ => Err(BuscoError::InvalidDataset(format!("unknown domain `{value}`"))),
        }
    }
}

/// Breadth of an automatic lineage search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LineageScope {
    All,
    Prokaryota,
    Eukaryota,
}

impl LineageScope {
    pub fn kingdoms(&self) -> &'static [Kingdom] {
        match self {
            LineageScope::All => &[Kingdom::Bacteria, Kingdom::Archaea, Kingdom::Eukaryota],
            LineageScope::Prokaryota => &[Kingdom::Bacteria, Kingdom::Archaea],
            LineageScope::Eukaryota => &[Kingdom::Eukaryota],
        }
    }
}

/// Root lineages probed during harmonization. Declaration order is the tie
/// break priority: bacteria, then archaea, then eukaryota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Kingdom {
    Bacteria,
    Archaea,
    Eukaryota,
}

impl Kingdom {
    pub fn root_lineage(&self) -> &'static str {
        match self {
            Kingdom::Bacteria => "bacteria",
            Kingdom::Archaea => "archaea",
            Kingdom::Eukaryota => "eukaryota",
        }
    }

    pub fn domain(&self) -> Domain {
        match self {
            Kingdom::Bacteria | Kingdom::Archaea => Domain::Prokaryota,
            Kingdom::Eukaryota => Domain::Eukaryota,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineageCandidate {
    pub name: String,
    pub kingdom: Kingdom,
    pub score: Option<f64>,
}

impl LineageCandidate {
    pub fn new(kingdom: Kingdom, datasets_version: &str) -> Self {
        Self {
            name: format!("{}_{datasets_version}", kingdom.root_lineage()),
            kingdom,
            score: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Single,
    Batch,
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunMode::Single => write!(f, "single"),
            RunMode::Batch => write!(f, "batch"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetStatus {
    Success,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetResult {
    pub target: String,
    pub status: TargetStatus,
    pub error: Option<String>,
    pub artifacts: Option<String>,
    pub lineage: Option<String>,
    pub summary: Option<String>,
}

impl TargetResult {
    pub fn success(target: &str, artifacts: TargetArtifacts) -> Self {
        Self {
            target: target.to_string(),
            status: TargetStatus::Success,
            error: None,
            artifacts: Some(artifacts.run_dir),
            lineage: Some(artifacts.lineage),
            summary: Some(artifacts.summary),
        }
    }

    pub fn failed(target: &str, error: &BuscoError) -> Self {
        Self {
            target: target.to_string(),
            status: TargetStatus::Failed,
            error: Some(error.to_string()),
            artifacts: None,
            lineage: None,
            summary: None,
        }
    }

    pub fn skipped(target: &str) -> Self {
        Self {
            target: target.to_string(),
            status: TargetStatus::Skipped,
            error: None,
            artifacts: None,
            lineage: None,
            summary: None,
        }
    }
}

/// What a successful per-target run leaves behind.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetArtifacts {
    pub run_dir: String,
    pub lineage: String,
    pub summary: String,
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_mode_aliases() {
        assert_eq!("geno".parse::<AnalysisMode>().unwrap(), AnalysisMode::Genome);
        assert_eq!("Proteins".parse::<AnalysisMode>().unwrap(), AnalysisMode::Proteins);
        let err = "reads".parse::<AnalysisMode>().unwrap_err();
        assert_matches!(err, BuscoError::ConfigValidation { .. });
    }

    #[test]
    fn parse_domain() {
        assert_eq!("eukaryota".parse::<Domain>().unwrap(), Domain::Eukaryota);
        assert_eq!("bacteria".parse::<Domain>().unwrap(), Domain::Prokaryota);
        assert_matches!("plants".parse::<Domain>(), Err(BuscoError::InvalidDataset(_)));
    }

    #[test]
    fn candidate_names_follow_dataset_version() {
        let candidate = LineageCandidate::new(Kingdom::Archaea, "odb10");
        assert_eq!(candidate.name, "archaea_odb10");
        assert_eq!(candidate.kingdom.domain(), Domain::Prokaryota);
    }

    #[test]
    fn kingdom_priority_order() {
        let mut kingdoms = vec![Kingdom::Eukaryota, Kingdom::Archaea, Kingdom::Bacteria];
        kingdoms.sort();
        assert_eq!(
            kingdoms,
            vec![Kingdom::Bacteria, Kingdom::Archaea, Kingdom::Eukaryota]
        );
        assert_eq!(LineageScope::Prokaryota.kingdoms().len(), 2);
    }
}
