use std::fs;
use std::path::{Path, PathBuf};

use crate::config::ResolvedConfig;
use crate::domain::Domain;
use crate::error::BuscoError;
use crate::summary::{self, Cutoffs};

/// A lineage dataset directory as laid out by the BUSCO data server.
#[derive(Debug, Clone, PartialEq)]
pub struct LineageDataset {
    pub name: String,
    pub root: PathBuf,
    pub domain: Domain,
    pub species: Option<String>,
    pub busco_ids: Vec<String>,
}

impl LineageDataset {
    /// Resolve the configured lineage: an existing directory is used as is,
    /// a bare name is looked up under `<download_path>/lineages`.
    pub fn locate(config: &ResolvedConfig) -> Result<PathBuf, BuscoError> {
        let lineage = config
            .lineage()
            .ok_or_else(|| BuscoError::InvalidDataset("no lineage dataset selected".to_string()))?;
        let direct = PathBuf::from(lineage);
        if direct.is_dir() {
            return Ok(direct);
        }
        Ok(config.download_path().join("lineages").join(lineage))
    }

    pub fn open(config: &ResolvedConfig) -> Result<Self, BuscoError> {
        Self::open_path(&Self::locate(config)?)
    }

    pub fn open_path(root: &Path) -> Result<Self, BuscoError> {
        if !root.is_dir() {
            return Err(BuscoError::InvalidDataset(format!(
                "{} does not exist; datasets must be downloaded beforehand",
                root.display()
            )));
        }
        let cfg_path = root.join("dataset.cfg");
        let cfg = fs::read_to_string(&cfg_path).map_err(|err| {
            BuscoError::InvalidDataset(format!("read {}: {err}", cfg_path.display()))
        })?;

        let mut name = None;
        let mut domain = None;
        let mut species = None;
        for line in cfg.lines() {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim();
            match key.trim() {
                "name" => name = Some(value.to_string()),
                "domain" => domain = Some(value.parse::<Domain>()?),
                "species" => species = Some(value.to_string()),
                _ => {}
            }
        }
        let domain = domain.ok_or_else(|| {
            BuscoError::InvalidDataset(format!("{} declares no domain", cfg_path.display()))
        })?;
        let name = name.unwrap_or_else(|| {
            root.file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_default()
        });

        let hmms = root.join("hmms");
        let mut busco_ids = fs::read_dir(&hmms)
            .map_err(|err| BuscoError::InvalidDataset(format!("read {}: {err}", hmms.display())))?
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "hmm"))
            .filter_map(|path| path.file_stem().map(|stem| stem.to_string_lossy().to_string()))
            .collect::<Vec<_>>();
        busco_ids.sort();
        if busco_ids.is_empty() {
            return Err(BuscoError::InvalidDataset(format!(
                "{} contains no HMM profiles",
                hmms.display()
            )));
        }

        Ok(Self {
            name,
            root: root.to_path_buf(),
            domain,
            species,
            busco_ids,
        })
    }

    pub fn hmm_path(&self, busco_id: &str) -> PathBuf {
        self.root.join("hmms").join(format!("{busco_id}.hmm"))
    }

    pub fn scores_cutoff_path(&self) -> PathBuf {
        self.root.join("scores_cutoff")
    }

    pub fn lengths_cutoff_path(&self) -> PathBuf {
        self.root.join("lengths_cutoff")
    }

    /// Score and length thresholds; BUSCOs absent from either file are judged
    /// without that threshold.
    pub fn cutoffs(&self) -> Result<Cutoffs, BuscoError> {
        Ok(Cutoffs {
            scores: summary::load_score_cutoffs(&self.scores_cutoff_path())?,
            lengths: summary::load_length_cutoffs(&self.lengths_cutoff_path())?,
        })
    }

    pub fn refseq_db_path(&self) -> PathBuf {
        self.root.join("refseq_db.faa.gz")
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn opens_dataset_directory() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path().join("bacteria_odb10");
        fs::create_dir_all(root.join("hmms")).unwrap();
        fs::write(root.join("dataset.cfg"), "name=bacteria_odb10\ndomain=prokaryota\n").unwrap();
        fs::write(root.join("hmms").join("2at2.hmm"), "").unwrap();
        fs::write(root.join("hmms").join("1at2.hmm"), "").unwrap();
        fs::write(root.join("hmms").join("README"), "").unwrap();

        let dataset = LineageDataset::open_path(&root).unwrap();
        assert_eq!(dataset.name, "bacteria_odb10");
        assert_eq!(dataset.domain, Domain::Prokaryota);
        assert_eq!(dataset.busco_ids, vec!["1at2", "2at2"]);
    }

    #[test]
    fn reads_score_and_length_cutoffs() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path().join("fungi_odb10");
        fs::create_dir_all(root.join("hmms")).unwrap();
        fs::write(root.join("dataset.cfg"), "domain=eukaryota\n").unwrap();
        fs::write(root.join("hmms").join("1at4751.hmm"), "").unwrap();
        fs::write(root.join("scores_cutoff"), "1at4751\t512.3\n").unwrap();
        fs::write(root.join("lengths_cutoff"), "1at4751\t4\t25.0\t410.0\n").unwrap();

        let cutoffs = LineageDataset::open_path(&root).unwrap().cutoffs().unwrap();
        assert_eq!(cutoffs.scores["1at4751"], 512.3);
        assert_eq!(cutoffs.lengths["1at4751"].length, 410.0);
        assert_eq!(cutoffs.lengths["1at4751"].sigma, 25.0);
    }

    #[test]
    fn missing_dataset_is_reported() {
        let temp = tempfile::tempdir().unwrap();
        let err = LineageDataset::open_path(&temp.path().join("nope")).unwrap_err();
        assert_matches!(err, BuscoError::InvalidDataset(_));
    }
}
