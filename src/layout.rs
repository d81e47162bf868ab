use std::fs;
use std::path::Path;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::info;

use crate::error::BuscoError;

/// Folder structure of one lineage run for one target.
#[derive(Debug, Clone)]
pub struct RunLayout {
    run_dir: Utf8PathBuf,
}

impl RunLayout {
    pub fn new(output_root: &Path, lineage: &str) -> Result<Self, BuscoError> {
        let root = utf8(output_root)?;
        Ok(Self {
            run_dir: root.join(format!("run_{lineage}")),
        })
    }

    pub fn run_dir(&self) -> &Utf8Path {
        &self.run_dir
    }

    pub fn prediction_dir(&self) -> Utf8PathBuf {
        self.run_dir.join("prediction")
    }

    pub fn hmmer_dir(&self) -> Utf8PathBuf {
        self.run_dir.join("hmmer_output")
    }

    /// Second metaeuk pass over the BUSCOs the first pass left incomplete.
    pub fn rerun_prediction_dir(&self) -> Utf8PathBuf {
        self.prediction_dir().join("rerun_results")
    }

    pub fn rerun_hmmer_dir(&self) -> Utf8PathBuf {
        self.hmmer_dir().join("rerun_results")
    }

    pub fn checkpoint_dir(&self) -> Utf8PathBuf {
        self.run_dir.join("checkpoints")
    }

    pub fn checkpoint_path(&self, stage: &str) -> Utf8PathBuf {
        self.checkpoint_dir().join(format!("{stage}.done"))
    }

    pub fn short_summary_txt(&self) -> Utf8PathBuf {
        self.run_dir.join("short_summary.txt")
    }

    pub fn short_summary_json(&self) -> Utf8PathBuf {
        self.run_dir.join("short_summary.json")
    }

    pub fn full_table(&self) -> Utf8PathBuf {
        self.run_dir.join("full_table.tsv")
    }

    pub fn ensure(&self) -> Result<(), BuscoError> {
        for dir in [
            self.run_dir.clone(),
            self.prediction_dir(),
            self.hmmer_dir(),
            self.checkpoint_dir(),
        ] {
            create_dir(&dir)?;
        }
        Ok(())
    }

    pub fn is_complete(&self, stage: &str) -> bool {
        self.checkpoint_path(stage).as_std_path().exists()
    }

    pub fn mark_complete(&self, stage: &str) -> Result<(), BuscoError> {
        let path = self.checkpoint_path(stage);
        write_bytes_atomic(&path, chrono::Local::now().to_rfc3339().as_bytes())
    }

    pub fn clear_checkpoint(&self, stage: &str) -> Result<(), BuscoError> {
        let path = self.checkpoint_path(stage);
        if path.as_std_path().exists() {
            fs::remove_file(path.as_std_path())
                .map_err(|err| BuscoError::Filesystem(format!("remove {path}: {err}")))?;
        }
        Ok(())
    }
}

/// Check and create the output root of a run before any work starts. An
/// existing root is an error unless the run is forced (wiped) or restarted
/// (kept as is).
pub fn prepare_output_root(root: &Path, force: bool, restart: bool) -> Result<(), BuscoError> {
    if root.exists() {
        if restart {
            info!(root = %root.display(), "restarting run in existing output folder");
        } else if force {
            info!(root = %root.display(), "removing existing output folder");
            fs::remove_dir_all(root)
                .map_err(|err| BuscoError::Filesystem(format!("remove {}: {err}", root.display())))?;
        } else {
            return Err(BuscoError::OutputExists(root.display().to_string()));
        }
    }
    fs::create_dir_all(root)
        .map_err(|err| BuscoError::Filesystem(format!("create {}: {err}", root.display())))
}

pub fn utf8(path: &Path) -> Result<Utf8PathBuf, BuscoError> {
    Utf8PathBuf::from_path_buf(path.to_path_buf())
        .map_err(|path| BuscoError::Filesystem(format!("non UTF-8 path: {}", path.display())))
}

fn create_dir(dir: &Utf8Path) -> Result<(), BuscoError> {
    fs::create_dir_all(dir.as_std_path())
        .map_err(|err| BuscoError::Filesystem(format!("create {dir}: {err}")))
}

pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), BuscoError> {
    if let Some(parent) = path.parent() {
        create_dir(parent)?;
    }
    let tmp_path = path.with_extension("tmp");
    fs::write(tmp_path.as_std_path(), content)
        .map_err(|err| BuscoError::Filesystem(format!("write {tmp_path}: {err}")))?;
    fs::rename(tmp_path.as_std_path(), path.as_std_path())
        .map_err(|err| BuscoError::Filesystem(format!("rename {tmp_path}: {err}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn layout_paths() {
        let layout = RunLayout::new(Path::new("/results/sample"), "bacteria_odb10").unwrap();
        assert!(layout.run_dir().ends_with("sample/run_bacteria_odb10"));
        assert!(layout.hmmer_dir().ends_with("run_bacteria_odb10/hmmer_output"));
        assert!(layout.checkpoint_path("hmmsearch").ends_with("checkpoints/hmmsearch.done"));
        assert!(layout.rerun_hmmer_dir().ends_with("hmmer_output/rerun_results"));
    }

    #[test]
    fn checkpoints_round_trip() {
        let temp = tempfile::tempdir().unwrap();
        let layout = RunLayout::new(temp.path(), "eukaryota_odb10").unwrap();
        layout.ensure().unwrap();
        assert!(!layout.is_complete("gene_prediction"));
        layout.mark_complete("gene_prediction").unwrap();
        assert!(layout.is_complete("gene_prediction"));
        layout.clear_checkpoint("gene_prediction").unwrap();
        assert!(!layout.is_complete("gene_prediction"));
    }

    #[test]
    fn existing_root_needs_force_or_restart() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path().join("run1");
        std::fs::create_dir_all(root.join("old")).unwrap();

        let err = prepare_output_root(&root, false, false).unwrap_err();
        assert_matches!(err, BuscoError::OutputExists(_));

        prepare_output_root(&root, false, true).unwrap();
        assert!(root.join("old").exists());

        prepare_output_root(&root, true, false).unwrap();
        assert!(root.exists());
        assert!(!root.join("old").exists());
    }
}
