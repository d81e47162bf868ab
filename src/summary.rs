use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use serde::Serialize;

use crate::error::BuscoError;
use crate::layout::{RunLayout, write_bytes_atomic};

#[derive(Debug, Clone, PartialEq)]
pub struct Hit {
    pub target: String,
    pub score: f64,
    /// Profile positions covered, summed over the domain lines of the target.
    pub length: f64,
}

fn column<T: std::str::FromStr>(columns: &[&str], index: usize) -> Option<T> {
    columns.get(index).and_then(|value| value.parse().ok())
}

/// Hits of one `hmmsearch --domtblout` file, one per target sequence with its
/// full-sequence score, best first.
pub fn parse_domtblout(content: &str) -> Vec<Hit> {
    let mut targets = BTreeMap::<String, (f64, f64)>::new();
    for line in content.lines() {
        if line.starts_with('#') || line.trim().is_empty() {
            continue;
        }
        let columns = line.split_whitespace().collect::<Vec<_>>();
        let Some(score) = column::<f64>(&columns, 7) else {
            continue;
        };
        let aligned = match (column::<u64>(&columns, 15), column::<u64>(&columns, 16)) {
            (Some(from), Some(to)) => to.saturating_sub(from) as f64,
            _ => 0.0,
        };
        let entry = targets
            .entry(columns[0].to_string())
            .or_insert((score, 0.0));
        entry.0 = entry.0.max(score);
        entry.1 += aligned;
    }
    let mut hits = targets
        .into_iter()
        .map(|(target, (score, length))| Hit {
            target,
            score,
            length,
        })
        .collect::<Vec<_>>();
    hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.target.cmp(&b.target)));
    hits
}

fn read_table(path: &Path) -> Result<Option<String>, BuscoError> {
    if !path.exists() {
        return Ok(None);
    }
    fs::read_to_string(path)
        .map(Some)
        .map_err(|err| BuscoError::InvalidDataset(format!("read {}: {err}", path.display())))
}

/// `scores_cutoff` lines are `<busco_id>\t<score>`.
pub fn load_score_cutoffs(path: &Path) -> Result<BTreeMap<String, f64>, BuscoError> {
    let mut cutoffs = BTreeMap::new();
    for line in read_table(path)?.unwrap_or_default().lines() {
        let mut parts = line.split_whitespace();
        if let (Some(id), Some(score)) = (parts.next(), parts.next()) {
            if let Ok(score) = score.parse::<f64>() {
                cutoffs.insert(id.to_string(), score);
            }
        }
    }
    Ok(cutoffs)
}

/// Expected profile coverage of a BUSCO and its spread.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LengthCutoff {
    pub sigma: f64,
    pub length: f64,
}

impl LengthCutoff {
    /// More than two sigma shorter than expected. Longer matches still count
    /// as complete.
    pub fn is_fragment(&self, aligned: f64) -> bool {
        (self.length - aligned) / self.sigma > 2.0
    }
}

/// `lengths_cutoff` lines are `<busco_id> <count> <sigma> <length>`.
pub fn load_length_cutoffs(path: &Path) -> Result<BTreeMap<String, LengthCutoff>, BuscoError> {
    let mut cutoffs = BTreeMap::new();
    for line in read_table(path)?.unwrap_or_default().lines() {
        let columns = line.split_whitespace().collect::<Vec<_>>();
        if columns.is_empty() {
            continue;
        }
        let (Some(sigma), Some(length)) = (column::<f64>(&columns, 2), column::<f64>(&columns, 3))
        else {
            return Err(BuscoError::InvalidDataset(format!(
                "{}: malformed line `{line}`",
                path.display()
            )));
        };
        // some profiles ship a zero sigma
        let sigma = if sigma == 0.0 { 1.0 } else { sigma };
        cutoffs.insert(columns[0].to_string(), LengthCutoff { sigma, length });
    }
    Ok(cutoffs)
}

/// Score and length thresholds of a lineage, keyed by BUSCO id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Cutoffs {
    pub scores: BTreeMap<String, f64>,
    pub lengths: BTreeMap<String, LengthCutoff>,
}

impl Cutoffs {
    pub fn classify(&self, id: &str, hits: &[Hit], limit: usize) -> BuscoRecord {
        let score = self.scores.get(id).copied().unwrap_or(0.0);
        classify(id, hits, score, self.lengths.get(id), limit)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BuscoStatus {
    Complete,
    Duplicated,
    Fragmented,
    Missing,
}

impl BuscoStatus {
    fn rank(self) -> u8 {
        match self {
            BuscoStatus::Complete | BuscoStatus::Duplicated => 2,
            BuscoStatus::Fragmented => 1,
            BuscoStatus::Missing => 0,
        }
    }

    pub fn is_incomplete(self) -> bool {
        matches!(self, BuscoStatus::Fragmented | BuscoStatus::Missing)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuscoRecord {
    pub id: String,
    pub status: BuscoStatus,
    pub hits: Vec<String>,
    pub best_score: Option<f64>,
    pub best_length: Option<f64>,
}

/// Sort the hits at or above `cutoff` into complete and fragmentary matches.
/// Up to `limit` complete hits make the BUSCO single-copy or duplicated;
/// failing that, the best fragment makes it fragmented; no hit leaves it
/// missing.
pub fn classify(
    id: &str,
    hits: &[Hit],
    cutoff: f64,
    length: Option<&LengthCutoff>,
    limit: usize,
) -> BuscoRecord {
    let (fragments, mut complete): (Vec<&Hit>, Vec<&Hit>) = hits
        .iter()
        .filter(|hit| hit.score >= cutoff)
        .partition(|hit| length.is_some_and(|length| length.is_fragment(hit.length)));
    complete.sort_by(|a, b| b.score.total_cmp(&a.score));
    complete.truncate(limit.max(1));

    let (status, kept) = match complete.len() {
        0 => match fragments.into_iter().max_by(|a, b| a.score.total_cmp(&b.score)) {
            Some(best) => (BuscoStatus::Fragmented, vec![best]),
            None => (BuscoStatus::Missing, Vec::new()),
        },
        1 => (BuscoStatus::Complete, complete),
        _ => (BuscoStatus::Duplicated, complete),
    };
    BuscoRecord {
        id: id.to_string(),
        status,
        hits: kept.iter().map(|hit| hit.target.clone()).collect(),
        best_score: kept.first().map(|hit| hit.score),
        best_length: kept.first().map(|hit| hit.length),
    }
}

/// Fold the records of a second search into the first pass. A record is
/// only replaced by one that ranks higher.
pub fn merge_rerun(records: &mut [BuscoRecord], rerun: Vec<BuscoRecord>) {
    for candidate in rerun {
        if let Some(record) = records.iter_mut().find(|record| record.id == candidate.id) {
            if candidate.status.rank() > record.status.rank() {
                *record = candidate;
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisSummary {
    pub lineage: String,
    pub mode: String,
    pub total: usize,
    pub single: usize,
    pub duplicated: usize,
    pub fragmented: usize,
    pub missing: usize,
    pub tool_versions: BTreeMap<String, String>,
}

impl AnalysisSummary {
    pub fn from_records(
        lineage: &str,
        mode: &str,
        records: &[BuscoRecord],
        tool_versions: BTreeMap<String, String>,
    ) -> Self {
        let count = |status| records.iter().filter(|r| r.status == status).count();
        Self {
            lineage: lineage.to_string(),
            mode: mode.to_string(),
            total: records.len(),
            single: count(BuscoStatus::Complete),
            duplicated: count(BuscoStatus::Duplicated),
            fragmented: count(BuscoStatus::Fragmented),
            missing: count(BuscoStatus::Missing),
            tool_versions,
        }
    }

    /// Share of BUSCOs found complete, single or duplicated.
    pub fn completeness(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (self.single + self.duplicated) as f64 / self.total as f64
    }

    pub fn one_line(&self) -> String {
        let pct = |n: usize| {
            if self.total == 0 {
                0.0
            } else {
                100.0 * n as f64 / self.total as f64
            }
        };
        format!(
            "C:{:.1}%[S:{:.1}%,D:{:.1}%],F:{:.1}%,M:{:.1}%,n:{}",
            pct(self.single + self.duplicated),
            pct(self.single),
            pct(self.duplicated),
            pct(self.fragmented),
            pct(self.missing),
            self.total
        )
    }

    fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# Summarized benchmarking in BUSCO notation");
        let _ = writeln!(out, "# The lineage dataset is: {}", self.lineage);
        let _ = writeln!(out, "# Mode: {}", self.mode);
        for (tool, version) in &self.tool_versions {
            let _ = writeln!(out, "# {tool}: {version}");
        }
        let _ = writeln!(out);
        let _ = writeln!(out, "\t{}", self.one_line());
        let _ = writeln!(out, "\t{}\tComplete BUSCOs (C)", self.single + self.duplicated);
        let _ = writeln!(out, "\t{}\tComplete and single-copy BUSCOs (S)", self.single);
        let _ = writeln!(out, "\t{}\tComplete and duplicated BUSCOs (D)", self.duplicated);
        let _ = writeln!(out, "\t{}\tFragmented BUSCOs (F)", self.fragmented);
        let _ = writeln!(out, "\t{}\tMissing BUSCOs (M)", self.missing);
        let _ = writeln!(out, "\t{}\tTotal BUSCO groups searched", self.total);
        out
    }
}

pub fn write_outputs(
    layout: &RunLayout,
    summary: &AnalysisSummary,
    records: &[BuscoRecord],
) -> Result<(), BuscoError> {
    write_bytes_atomic(&layout.short_summary_txt(), summary.render_text().as_bytes())?;

    let json = serde_json::to_vec_pretty(summary)
        .map_err(|err| BuscoError::Filesystem(err.to_string()))?;
    write_bytes_atomic(&layout.short_summary_json(), &json)?;

    let mut table = String::from("# Busco id\tStatus\tSequence\tScore\tLength\n");
    for record in records {
        let score = record
            .best_score
            .map(|score| format!("{score:.1}"))
            .unwrap_or_default();
        let length = record
            .best_length
            .map(|length| format!("{length:.0}"))
            .unwrap_or_default();
        if record.hits.is_empty() {
            let _ = writeln!(table, "{}\t{:?}\t\t\t", record.id, record.status);
        }
        for hit in &record.hits {
            let _ = writeln!(
                table,
                "{}\t{:?}\t{hit}\t{score}\t{length}",
                record.id, record.status
            );
        }
    }
    write_bytes_atomic(&layout.full_table(), table.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOMTBL: &str = "\
# target name  accession  tlen query name accession qlen E-value score bias
contig_1_12  -  310  1at2  -  300  1.2e-80  270.4  0.1  1  2  1e-80  1e-80  270.0  0.1  11  200  5  190  1  195  0.98  -
contig_1_12  -  310  1at2  -  300  1.2e-80  270.4  0.1  2  2  1e-80  1e-80  20.0  0.1  200  290  191  290  191  300  0.97  -
contig_9_3   -  290  1at2  -  300  4.0e-20  80.2   0.1  1  1  1e-20  1e-20  80.0  0.1  1  61  1  60  1  65  0.90  -
";

    fn hit(target: &str, score: f64, length: f64) -> Hit {
        Hit {
            target: target.to_string(),
            score,
            length,
        }
    }

    #[test]
    fn parse_keeps_best_score_and_sums_coverage() {
        let hits = parse_domtblout(DOMTBL);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0], hit("contig_1_12", 270.4, 279.0));
        assert_eq!(hits[1], hit("contig_9_3", 80.2, 60.0));
    }

    #[test]
    fn classification_respects_cutoff_and_limit() {
        let hits = parse_domtblout(DOMTBL);
        assert_eq!(classify("1at2", &hits, 100.0, None, 3).status, BuscoStatus::Complete);
        assert_eq!(classify("1at2", &hits, 50.0, None, 3).status, BuscoStatus::Duplicated);
        assert_eq!(classify("1at2", &hits, 50.0, None, 1).status, BuscoStatus::Complete);
        assert_eq!(classify("1at2", &hits, 500.0, None, 3).status, BuscoStatus::Missing);
    }

    #[test]
    fn short_matches_are_fragments() {
        let cutoff = LengthCutoff {
            sigma: 20.0,
            length: 280.0,
        };
        let hits = parse_domtblout(DOMTBL);

        // the 60-long match is a fragment, so only one complete copy remains
        let record = classify("1at2", &hits, 50.0, Some(&cutoff), 3);
        assert_eq!(record.status, BuscoStatus::Complete);
        assert_eq!(record.hits, vec!["contig_1_12"]);

        let fragments = [hit("a", 90.0, 100.0), hit("b", 150.0, 120.0)];
        let record = classify("1at2", &fragments, 50.0, Some(&cutoff), 3);
        assert_eq!(record.status, BuscoStatus::Fragmented);
        assert_eq!(record.hits, vec!["b"]);
        assert_eq!(record.best_length, Some(120.0));
    }

    #[test]
    fn very_large_matches_count_as_complete() {
        let cutoff = LengthCutoff {
            sigma: 10.0,
            length: 100.0,
        };
        assert!(!cutoff.is_fragment(400.0));
        assert!(!cutoff.is_fragment(80.0));
        assert!(cutoff.is_fragment(79.0));
        let record = classify("1at2", &[hit("a", 90.0, 400.0)], 50.0, Some(&cutoff), 3);
        assert_eq!(record.status, BuscoStatus::Complete);
    }

    #[test]
    fn length_cutoffs_replace_zero_sigma() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("lengths_cutoff");
        fs::write(&path, "1at2\t7\t12.5\t280.0\n2at2\t3\t0.0\t95.0\n\n").unwrap();
        let cutoffs = load_length_cutoffs(&path).unwrap();
        assert_eq!(cutoffs["1at2"], LengthCutoff { sigma: 12.5, length: 280.0 });
        assert_eq!(cutoffs["2at2"].sigma, 1.0);
        assert!(load_length_cutoffs(&temp.path().join("absent")).unwrap().is_empty());

        fs::write(&path, "1at2\t7\n").unwrap();
        assert!(load_length_cutoffs(&path).is_err());
    }

    #[test]
    fn rerun_only_upgrades_records() {
        let mut records = vec![
            classify("a", &[hit("x", 10.0, 0.0)], 0.0, None, 3),
            classify("b", &[], 0.0, None, 3),
            classify("c", &[], 0.0, None, 3),
        ];
        let rerun = vec![
            classify("b", &[hit("y", 12.0, 0.0)], 0.0, None, 3),
            classify("c", &[], 0.0, None, 3),
            classify("a", &[], 0.0, None, 3),
        ];
        merge_rerun(&mut records, rerun);
        let statuses = records.iter().map(|r| r.status).collect::<Vec<_>>();
        assert_eq!(
            statuses,
            vec![BuscoStatus::Complete, BuscoStatus::Complete, BuscoStatus::Missing]
        );
        assert_eq!(records[1].hits, vec!["y"]);
    }

    #[test]
    fn one_line_summary() {
        let cutoff = LengthCutoff {
            sigma: 1.0,
            length: 100.0,
        };
        let records = vec![
            classify("a", &[hit("x", 1.0, 100.0)], 0.0, Some(&cutoff), 3),
            classify("b", &[], 0.0, None, 3),
            classify("c", &[hit("y", 1.0, 10.0)], 0.0, Some(&cutoff), 3),
            classify("d", &[], 0.0, None, 3),
        ];
        let summary = AnalysisSummary::from_records("bacteria_odb10", "genome", &records, BTreeMap::new());
        assert_eq!(summary.one_line(), "C:25.0%[S:25.0%,D:0.0%],F:25.0%,M:50.0%,n:4");
        assert_eq!(summary.completeness(), 0.25);
        assert!(summary.render_text().contains("\t1\tFragmented BUSCOs (F)"));
    }
}
