use tracing::{info, warn};

use crate::config::ResolvedConfig;
use crate::domain::LineageCandidate;
use crate::error::BuscoError;
use crate::pipeline::PipelineRunner;
use crate::tools::ToolRunner;

/// Scores how well the input fits a candidate lineage. Identical inputs must
/// give identical scores.
pub trait PlacementProbe {
    fn probe(
        &self,
        candidate: &LineageCandidate,
        config: &ResolvedConfig,
    ) -> Result<f64, BuscoError>;
}

impl<P: PlacementProbe + ?Sized> PlacementProbe for &P {
    fn probe(
        &self,
        candidate: &LineageCandidate,
        config: &ResolvedConfig,
    ) -> Result<f64, BuscoError> {
        (**self).probe(candidate, config)
    }
}

/// Runs the full analysis of the input against a root lineage and uses the
/// fraction of complete BUSCOs as the score. Probe runs live under
/// `<output_root>/auto_lineage`.
#[derive(Debug, Clone)]
pub struct PipelineProbe<R> {
    pipeline: PipelineRunner<R>,
}

impl<R: ToolRunner> PipelineProbe<R> {
    pub fn new(tools: R) -> Self {
        Self {
            pipeline: PipelineRunner::new(tools),
        }
    }
}

impl<R: ToolRunner> PlacementProbe for PipelineProbe<R> {
    fn probe(
        &self,
        candidate: &LineageCandidate,
        config: &ResolvedConfig,
    ) -> Result<f64, BuscoError> {
        let probe_config = config.with_lineage(&candidate.name);
        let root = config.output_root().join("auto_lineage");
        let outcome = self
            .pipeline
            .analyse(config.input(), &probe_config, &root)?;
        Ok(outcome.summary.completeness())
    }
}

/// Highest score wins; equal scores go to the kingdom that sorts first.
pub fn select_winner(candidates: &[LineageCandidate]) -> Option<&LineageCandidate> {
    let mut best: Option<(&LineageCandidate, f64)> = None;
    for candidate in candidates {
        let Some(score) = candidate.score else {
            continue;
        };
        best = match best {
            Some((current, top))
                if top > score || (top == score && current.kingdom <= candidate.kingdom) =>
            {
                Some((current, top))
            }
            _ => Some((candidate, score)),
        };
    }
    best.map(|(candidate, _)| candidate)
}

pub struct Harmonizer<P> {
    probe: P,
}

impl<P: PlacementProbe> Harmonizer<P> {
    pub fn new(probe: P) -> Self {
        Self { probe }
    }

    /// Replace an automatic lineage request with the best-placed root
    /// lineage. Configurations that already name a lineage come back as is.
    pub fn harmonize(&self, config: &ResolvedConfig) -> Result<ResolvedConfig, BuscoError> {
        let Some(scope) = config.auto_lineage() else {
            return Ok(config.clone());
        };

        let mut candidates = scope
            .kingdoms()
            .iter()
            .map(|kingdom| LineageCandidate::new(*kingdom, config.datasets_version()))
            .collect::<Vec<_>>();
        candidates.sort_by_key(|candidate| candidate.kingdom);
        info!(
            ?scope,
            candidates = candidates.len(),
            "***** Starting automatic lineage selection *****"
        );

        let mut failures = Vec::new();
        for candidate in &mut candidates {
            match self.probe.probe(candidate, config) {
                Ok(score) if score.is_finite() => {
                    info!(lineage = %candidate.name, score, "placement probe finished");
                    candidate.score = Some(score);
                }
                Ok(score) => {
                    warn!(lineage = %candidate.name, score, "placement probe returned no usable score");
                    failures.push(format!("{}: score {score}", candidate.name));
                }
                Err(err) => {
                    warn!(lineage = %candidate.name, error = %err, "placement probe failed");
                    failures.push(format!("{}: {err}", candidate.name));
                }
            }
        }

        let winner = select_winner(&candidates).ok_or_else(|| {
            BuscoError::LineageDetection(format!(
                "every placement probe failed ({})",
                failures.join("; ")
            ))
        })?;
        info!(lineage = %winner.name, "selected lineage");
        Ok(config.with_lineage(&winner.name))
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::Kingdom;

    use super::*;

    fn scored(kingdom: Kingdom, score: Option<f64>) -> LineageCandidate {
        LineageCandidate {
            score,
            ..LineageCandidate::new(kingdom, "odb10")
        }
    }

    #[test]
    fn highest_score_wins() {
        let candidates = vec![
            scored(Kingdom::Bacteria, Some(0.6)),
            scored(Kingdom::Archaea, Some(0.8)),
        ];
        assert_eq!(select_winner(&candidates).unwrap().name, "archaea_odb10");
    }

    #[test]
    fn ties_follow_kingdom_priority_in_any_order() {
        let forward = vec![
            scored(Kingdom::Bacteria, Some(0.5)),
            scored(Kingdom::Eukaryota, Some(0.5)),
        ];
        let reverse = vec![
            scored(Kingdom::Eukaryota, Some(0.5)),
            scored(Kingdom::Bacteria, Some(0.5)),
        ];
        assert_eq!(select_winner(&forward).unwrap().kingdom, Kingdom::Bacteria);
        assert_eq!(select_winner(&reverse).unwrap().kingdom, Kingdom::Bacteria);
    }

    #[test]
    fn unscored_candidates_never_win() {
        let candidates = vec![scored(Kingdom::Bacteria, None), scored(Kingdom::Archaea, None)];
        assert!(select_winner(&candidates).is_none());
    }
}
