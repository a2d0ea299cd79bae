//! Quality Gate: does a team cover enough of the opportunity to be worth proposing?
//!
//! Three per-section metrics, each in [0, 1]:
//! - coverage ratio: `Σ w·cov / Σ w`
//! - breadth: share of requirements with `cov ≥ breadth_tau`
//! - critical hit: share of requirements with `w ≥ critical_w` that reach `critical_tau`
//!   (1.0 when a section has no critical requirement)
//!
//! Totals are α-weighted averages over the sections that have requirements.
//! Thresholds are always supplied by the caller or the environment.

use serde::{Deserialize, Serialize};

use crate::formation::error::FormationError;
use crate::formation::model::{CandidateId, CoverageModel, Section, SectionWeights};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityThresholds {
    pub min_cov: f64,
    pub min_breadth: f64,
    pub breadth_tau: f64,
    pub critical_w: f64,
    pub critical_tau: f64,
    pub min_critical_hit: f64,
}

impl QualityThresholds {
    pub fn validate(&self) -> Result<(), FormationError> {
        let fields = [
            ("min_cov", self.min_cov),
            ("min_breadth", self.min_breadth),
            ("breadth_tau", self.breadth_tau),
            ("critical_w", self.critical_w),
            ("critical_tau", self.critical_tau),
            ("min_critical_hit", self.min_critical_hit),
        ];
        for (name, value) in fields {
            if !value.is_finite() || value < 0.0 {
                return Err(FormationError::invalid(format!(
                    "quality threshold '{name}' must be a finite number >= 0, got {value}"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityCheck {
    MinCov,
    MinBreadth,
    MinCriticalHit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionQuality {
    pub section: Section,
    pub requirement_count: usize,
    pub coverage_ratio: f64,
    pub breadth: f64,
    pub critical_count: usize,
    pub critical_hit: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub sections: Vec<SectionQuality>,
    pub cov_total: f64,
    pub breadth_total: f64,
    pub critical_hit_total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub passes: bool,
    pub metrics: QualityMetrics,
    pub failed_checks: Vec<QualityCheck>,
}

/// A team that did not clear the gate. Returned as data, never raised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityGateRejection {
    pub metrics: QualityMetrics,
    pub failed_checks: Vec<QualityCheck>,
}

impl QualityReport {
    pub fn rejection(&self) -> Option<QualityGateRejection> {
        (!self.passes).then(|| QualityGateRejection {
            metrics: self.metrics.clone(),
            failed_checks: self.failed_checks.clone(),
        })
    }
}

/// Evaluates `team` (ids must belong to the model) against `thresholds`.
pub fn evaluate(
    model: &CoverageModel,
    team: &[CandidateId],
    alpha: &SectionWeights,
    thresholds: &QualityThresholds,
) -> Result<QualityReport, FormationError> {
    thresholds.validate()?;
    alpha.validate()?;
    let coverage = model.team_coverage(team)?;
    Ok(evaluate_coverage(model, &coverage, alpha, thresholds))
}

/// Gate arithmetic over an already-computed team coverage vector.
fn evaluate_coverage(
    model: &CoverageModel,
    coverage: &[f64],
    alpha: &SectionWeights,
    thresholds: &QualityThresholds,
) -> QualityReport {
    let sections: Vec<SectionQuality> = Section::ALL
        .into_iter()
        .filter_map(|section| section_quality(model, coverage, section, thresholds))
        .collect();

    let cov_total = weighted_total(&sections, alpha, |s| s.coverage_ratio);
    let breadth_total = weighted_total(&sections, alpha, |s| s.breadth);
    let critical_hit_total = weighted_total(&sections, alpha, |s| s.critical_hit);

    let mut failed_checks = Vec::new();
    if cov_total < thresholds.min_cov {
        failed_checks.push(QualityCheck::MinCov);
    }
    if breadth_total < thresholds.min_breadth {
        failed_checks.push(QualityCheck::MinBreadth);
    }
    if critical_hit_total < thresholds.min_critical_hit {
        failed_checks.push(QualityCheck::MinCriticalHit);
    }

    QualityReport {
        passes: failed_checks.is_empty(),
        metrics: QualityMetrics {
            sections,
            cov_total,
            breadth_total,
            critical_hit_total,
        },
        failed_checks,
    }
}

fn section_quality(
    model: &CoverageModel,
    coverage: &[f64],
    section: Section,
    thresholds: &QualityThresholds,
) -> Option<SectionQuality> {
    let entries: Vec<(f64, f64)> = model
        .slots()
        .iter()
        .zip(coverage)
        .filter(|(slot, _)| slot.section == section)
        .map(|(slot, &c)| (slot.weight, c))
        .collect();
    if entries.is_empty() {
        return None;
    }

    let n = entries.len() as f64;
    let weight_sum: f64 = entries.iter().map(|(w, _)| w).sum();
    let coverage_ratio = if weight_sum > 0.0 {
        entries.iter().map(|(w, c)| w * c).sum::<f64>() / weight_sum
    } else {
        1.0
    };

    let breadth = entries
        .iter()
        .filter(|(_, c)| *c >= thresholds.breadth_tau)
        .count() as f64
        / n;

    let critical: Vec<f64> = entries
        .iter()
        .filter(|(w, _)| *w >= thresholds.critical_w)
        .map(|&(_, c)| c)
        .collect();
    let critical_hit = if critical.is_empty() {
        1.0
    } else {
        critical.iter().filter(|&&c| c >= thresholds.critical_tau).count() as f64
            / critical.len() as f64
    };

    Some(SectionQuality {
        section,
        requirement_count: entries.len(),
        coverage_ratio,
        breadth,
        critical_count: critical.len(),
        critical_hit,
    })
}

/// α-weighted mean; plain mean when every present section has α = 0; 1.0 when no
/// section has requirements.
fn weighted_total(
    sections: &[SectionQuality],
    alpha: &SectionWeights,
    metric: impl Fn(&SectionQuality) -> f64,
) -> f64 {
    if sections.is_empty() {
        return 1.0;
    }
    let alpha_sum: f64 = sections.iter().map(|s| alpha.get(s.section)).sum();
    if alpha_sum > 0.0 {
        sections
            .iter()
            .map(|s| alpha.get(s.section) * metric(s))
            .sum::<f64>()
            / alpha_sum
    } else {
        sections.iter().map(&metric).sum::<f64>() / sections.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::formation::model::tests::disjoint_specialists;
    use crate::formation::model::CoverageMatrix;

    fn thresholds() -> QualityThresholds {
        QualityThresholds {
            min_cov: 0.6,
            min_breadth: 0.5,
            breadth_tau: 0.5,
            critical_w: 0.8,
            critical_tau: 0.7,
            min_critical_hit: 1.0,
        }
    }

    fn specialists_model() -> CoverageModel {
        let (ids, reqs, cov) = disjoint_specialists();
        CoverageModel::new(&ids, &reqs, &cov, 100).unwrap()
    }

    #[test]
    fn test_full_team_passes_everything() {
        let model = specialists_model();
        let report = evaluate(&model, &[1, 2, 3], &SectionWeights::default(), &thresholds())
            .unwrap();
        assert!(report.passes);
        assert!(report.failed_checks.is_empty());
        assert!(report.rejection().is_none());
        assert!((report.metrics.cov_total - 1.0).abs() < 1e-12);
        assert_eq!(report.metrics.sections.len(), 2);
    }

    #[test]
    fn test_section_arithmetic() {
        let model = specialists_model();
        // Weights {0.1, 0.5, 1.0}; members 2 and 3 cover indices 1 and 2.
        let report = evaluate(&model, &[2, 3], &SectionWeights::default(), &thresholds()).unwrap();
        let app = &report.metrics.sections[0];
        assert_eq!(app.section, Section::Application);
        assert_eq!(app.requirement_count, 3);
        assert!((app.coverage_ratio - 1.5 / 1.6).abs() < 1e-12);
        assert!((app.breadth - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(app.critical_count, 1);
        assert_eq!(app.critical_hit, 1.0);
        assert!(report.passes);
    }

    #[test]
    fn test_missing_critical_requirement_fails_gate() {
        let model = specialists_model();
        let report = evaluate(&model, &[1, 2], &SectionWeights::default(), &thresholds()).unwrap();
        assert!(!report.passes);
        assert!(report.failed_checks.contains(&QualityCheck::MinCov));
        assert!(report.failed_checks.contains(&QualityCheck::MinCriticalHit));
        assert!(!report.failed_checks.contains(&QualityCheck::MinBreadth));

        let rejection = report.rejection().unwrap();
        assert_eq!(rejection.failed_checks, report.failed_checks);
        assert_eq!(rejection.metrics.critical_hit_total, 0.0);
    }

    #[test]
    fn test_alpha_weights_totals() {
        let requirements = BTreeMap::from([
            (Section::Application, BTreeMap::from([(0, 1.0)])),
            (Section::Research, BTreeMap::from([(0, 1.0)])),
        ]);
        let coverage: CoverageMatrix = BTreeMap::from([(
            1,
            BTreeMap::from([(Section::Application, BTreeMap::from([(0, 1.0)]))]),
        )]);
        let model = CoverageModel::new(&[1], &requirements, &coverage, 10).unwrap();
        let alpha = SectionWeights {
            application: 1.0,
            research: 0.5,
        };
        let report = evaluate(&model, &[1], &alpha, &thresholds()).unwrap();
        assert!((report.metrics.cov_total - 1.0 / 1.5).abs() < 1e-12);

        let silent = SectionWeights {
            application: 0.0,
            research: 0.0,
        };
        let report = evaluate(&model, &[1], &silent, &thresholds()).unwrap();
        assert!((report.metrics.cov_total - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_empty_sections_are_excluded() {
        let requirements = BTreeMap::from([
            (Section::Application, BTreeMap::from([(0, 1.0)])),
            (Section::Research, BTreeMap::new()),
        ]);
        let coverage: CoverageMatrix = BTreeMap::from([(
            1,
            BTreeMap::from([(Section::Application, BTreeMap::from([(0, 0.9)]))]),
        )]);
        let model = CoverageModel::new(&[1], &requirements, &coverage, 10).unwrap();
        let report = evaluate(&model, &[1], &SectionWeights::default(), &thresholds()).unwrap();
        assert_eq!(report.metrics.sections.len(), 1);
        assert!((report.metrics.cov_total - 0.9).abs() < 1e-12);
    }

    #[test]
    fn test_no_requirements_is_vacuous_pass() {
        let model = CoverageModel::new(&[1], &BTreeMap::new(), &BTreeMap::new(), 10).unwrap();
        let report = evaluate(&model, &[], &SectionWeights::default(), &thresholds()).unwrap();
        assert!(report.passes);
        assert_eq!(report.metrics.breadth_total, 1.0);
    }

    #[test]
    fn test_invalid_thresholds_and_members_rejected() {
        let model = specialists_model();
        let mut bad = thresholds();
        bad.min_cov = f64::NAN;
        assert!(evaluate(&model, &[1], &SectionWeights::default(), &bad).is_err());
        assert!(evaluate(&model, &[99], &SectionWeights::default(), &thresholds()).is_err());
    }

    #[test]
    fn test_report_wire_shape() {
        let model = specialists_model();
        let report = evaluate(&model, &[1], &SectionWeights::default(), &thresholds()).unwrap();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["passes"], false);
        assert_eq!(json["failed_checks"][0], "min_cov");
        assert_eq!(json["metrics"]["sections"][0]["section"], "application");
    }
}
