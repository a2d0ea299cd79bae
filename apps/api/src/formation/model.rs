//! Coverage Model: the validated, immutable inputs of one team-formation request.
//!
//! The wire shape is nested maps (`section → index → value`) exactly as the upstream
//! matcher emits them. Internally everything is flattened into "slots": one slot per
//! (section, requirement index), ordered by section then index. Candidate coverage rows
//! are dense `Vec<f64>` aligned with the slots, so team coverage is a plain elementwise max.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::formation::error::FormationError;

pub type CandidateId = i64;
pub type RequirementIndex = u32;

/// `section → {requirement_index → value}`. Used for weights, per-candidate coverage
/// and team coverage alike.
pub type SectionScores = BTreeMap<Section, BTreeMap<RequirementIndex, f64>>;

/// `candidate_id → section → {requirement_index → score}`.
pub type CoverageMatrix = BTreeMap<CandidateId, SectionScores>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Section {
    Application,
    Research,
}

impl Section {
    pub const ALL: [Section; 2] = [Section::Application, Section::Research];

    pub fn as_str(&self) -> &'static str {
        match self {
            Section::Application => "application",
            Section::Research => "research",
        }
    }
}

/// Per-section multiplier (α) applied to base scores, redundancy penalties and
/// quality totals.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SectionWeights {
    pub application: f64,
    pub research: f64,
}

impl Default for SectionWeights {
    fn default() -> Self {
        Self {
            application: 1.0,
            research: 0.5,
        }
    }
}

impl SectionWeights {
    pub fn get(&self, section: Section) -> f64 {
        match section {
            Section::Application => self.application,
            Section::Research => self.research,
        }
    }

    pub fn validate(&self) -> Result<(), FormationError> {
        for section in Section::ALL {
            let alpha = self.get(section);
            if !alpha.is_finite() || alpha < 0.0 {
                return Err(FormationError::invalid(format!(
                    "section weight for '{}' must be a finite number >= 0, got {alpha}",
                    section.as_str()
                )));
            }
        }
        Ok(())
    }
}

/// One requirement of the opportunity, flattened.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RequirementSlot {
    pub section: Section,
    pub index: RequirementIndex,
    pub weight: f64,
}

/// Which team member achieved the team coverage of a requirement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contributor {
    pub section: Section,
    pub index: RequirementIndex,
    /// `None` when no member covers the requirement at all.
    pub candidate_id: Option<CandidateId>,
    pub coverage: f64,
}

/// A scored candidate team in the shape consumed by the ranker and the response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedTeam {
    pub team: Vec<CandidateId>,
    pub score: f64,
    pub final_coverage: SectionScores,
    #[serde(default)]
    pub member_coverages: BTreeMap<CandidateId, SectionScores>,
}

#[derive(Debug, Clone)]
pub struct CoverageModel {
    candidates: Vec<CandidateId>,
    positions: HashMap<CandidateId, usize>,
    sections: Vec<Section>,
    slots: Vec<RequirementSlot>,
    rows: Vec<Vec<f64>>,
}

impl CoverageModel {
    /// Validates and flattens the request inputs.
    ///
    /// Coverage rows for ids outside the pool are ignored. Pool members without a row
    /// (and indices missing from a row) have coverage 0.0. A coverage entry for a
    /// requirement that has no weight is rejected rather than defaulted.
    pub fn new(
        candidates: &[CandidateId],
        requirements: &SectionScores,
        coverage: &CoverageMatrix,
        max_pool_size: usize,
    ) -> Result<Self, FormationError> {
        if candidates.len() > max_pool_size {
            return Err(FormationError::invalid(format!(
                "candidate pool has {} members, above the hard cap of {max_pool_size}; pre-filter upstream",
                candidates.len()
            )));
        }

        let mut positions = HashMap::with_capacity(candidates.len());
        for (pos, &id) in candidates.iter().enumerate() {
            if positions.insert(id, pos).is_some() {
                return Err(FormationError::invalid(format!(
                    "candidate id {id} appears more than once in candidate_ids"
                )));
            }
        }

        let mut slots = Vec::new();
        let mut slot_of: HashMap<(Section, RequirementIndex), usize> = HashMap::new();
        for (&section, reqs) in requirements {
            for (&index, &weight) in reqs {
                if !weight.is_finite() || weight < 0.0 {
                    return Err(FormationError::invalid(format!(
                        "requirement weight for {}[{index}] must be a finite number >= 0, got {weight}",
                        section.as_str()
                    )));
                }
                slot_of.insert((section, index), slots.len());
                slots.push(RequirementSlot {
                    section,
                    index,
                    weight,
                });
            }
        }

        let mut rows = vec![vec![0.0; slots.len()]; candidates.len()];
        for (id, by_section) in coverage {
            let Some(&pos) = positions.get(id) else {
                continue;
            };
            for (&section, scores) in by_section {
                for (&index, &score) in scores {
                    let slot = *slot_of.get(&(section, index)).ok_or_else(|| {
                        FormationError::invalid(format!(
                            "coverage for candidate {id} references {}[{index}], which has no requirement weight",
                            section.as_str()
                        ))
                    })?;
                    if !score.is_finite() || !(0.0..=1.0).contains(&score) {
                        return Err(FormationError::invalid(format!(
                            "coverage score for candidate {id} at {}[{index}] must be within [0, 1], got {score}",
                            section.as_str()
                        )));
                    }
                    rows[pos][slot] = score;
                }
            }
        }

        Ok(Self {
            candidates: candidates.to_vec(),
            positions,
            sections: requirements.keys().copied().collect(),
            slots,
            rows,
        })
    }

    pub fn candidates(&self) -> &[CandidateId] {
        &self.candidates
    }

    pub fn pool_size(&self) -> usize {
        self.candidates.len()
    }

    pub fn slots(&self) -> &[RequirementSlot] {
        &self.slots
    }

    pub fn contains(&self, id: CandidateId) -> bool {
        self.positions.contains_key(&id)
    }

    pub fn position(&self, id: CandidateId) -> Option<usize> {
        self.positions.get(&id).copied()
    }

    /// Dense coverage row of the candidate at `pos` (pool order).
    pub fn row(&self, pos: usize) -> &[f64] {
        &self.rows[pos]
    }

    /// Coverage of the empty team.
    pub fn empty_coverage(&self) -> Vec<f64> {
        vec![0.0; self.slots.len()]
    }

    /// Raises `acc` to the elementwise max with the candidate at `pos`.
    pub fn absorb(&self, acc: &mut [f64], pos: usize) {
        for (slot, &value) in acc.iter_mut().zip(&self.rows[pos]) {
            if value > *slot {
                *slot = value;
            }
        }
    }

    /// Super-faculty coverage of a team given as candidate ids.
    pub fn team_coverage(&self, team: &[CandidateId]) -> Result<Vec<f64>, FormationError> {
        let mut acc = self.empty_coverage();
        for &id in team {
            let pos = self.position(id).ok_or_else(|| {
                FormationError::invalid(format!("team member {id} is not in the candidate pool"))
            })?;
            self.absorb(&mut acc, pos);
        }
        Ok(acc)
    }

    /// TeamScore: Σ weight × coverage over every requirement.
    pub fn score(&self, coverage: &[f64]) -> f64 {
        self.slots
            .iter()
            .zip(coverage)
            .map(|(slot, &c)| slot.weight * c)
            .sum()
    }

    /// Expands a dense coverage vector back into the wire shape. Every requirement is
    /// present (zeros included), and every section the caller declared is present.
    pub fn to_sections(&self, coverage: &[f64]) -> SectionScores {
        let mut out: SectionScores = self
            .sections
            .iter()
            .map(|&section| (section, BTreeMap::new()))
            .collect();
        for (slot, &value) in self.slots.iter().zip(coverage) {
            out.entry(slot.section)
                .or_default()
                .insert(slot.index, value);
        }
        out
    }

    /// Requirement weights in the wire shape.
    pub fn requirement_weights(&self) -> SectionScores {
        let weights: Vec<f64> = self.slots.iter().map(|s| s.weight).collect();
        self.to_sections(&weights)
    }

    /// Individual coverage of each member, keyed by candidate id.
    pub fn member_coverages(&self, team: &[CandidateId]) -> BTreeMap<CandidateId, SectionScores> {
        team.iter()
            .filter_map(|&id| {
                self.position(id)
                    .map(|pos| (id, self.to_sections(&self.rows[pos])))
            })
            .collect()
    }

    /// Packages a team and its dense coverage, recomputing the score from the coverage
    /// so `score == Σ weight × final_coverage` always holds.
    pub fn ranked_team(&self, team: Vec<CandidateId>, coverage: &[f64]) -> RankedTeam {
        RankedTeam {
            score: self.score(coverage),
            final_coverage: self.to_sections(coverage),
            member_coverages: self.member_coverages(&team),
            team,
        }
    }

    /// For every requirement, the first member (in team order) achieving the team max.
    pub fn contributors(&self, team: &[CandidateId]) -> Vec<Contributor> {
        let positions: Vec<(CandidateId, usize)> = team
            .iter()
            .filter_map(|&id| self.position(id).map(|pos| (id, pos)))
            .collect();

        self.slots
            .iter()
            .enumerate()
            .map(|(slot_idx, slot)| {
                let mut best: Option<(CandidateId, f64)> = None;
                for &(id, pos) in &positions {
                    let value = self.rows[pos][slot_idx];
                    if value > best.map(|(_, b)| b).unwrap_or(0.0) {
                        best = Some((id, value));
                    }
                }
                Contributor {
                    section: slot.section,
                    index: slot.index,
                    candidate_id: best.map(|(id, _)| id),
                    coverage: best.map(|(_, v)| v).unwrap_or(0.0),
                }
            })
            .collect()
    }
}

/// Deduplicates required ids (order preserved) and checks they are all in the pool.
pub fn resolve_required(
    model: &CoverageModel,
    required: &[CandidateId],
) -> Result<Vec<CandidateId>, FormationError> {
    let mut seen = HashSet::new();
    let unique: Vec<CandidateId> = required
        .iter()
        .copied()
        .filter(|id| seen.insert(*id))
        .collect();

    let missing: Vec<CandidateId> = unique
        .iter()
        .copied()
        .filter(|id| !model.contains(*id))
        .collect();
    if !missing.is_empty() {
        return Err(FormationError::invalid(format!(
            "required_ids not present in candidate_ids: {missing:?}"
        )));
    }
    Ok(unique)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// f1 owns requirement 0, f2 owns 1, f3 owns 2, in both sections.
    pub(crate) fn disjoint_specialists() -> (Vec<CandidateId>, SectionScores, CoverageMatrix) {
        let weights = BTreeMap::from([(0, 0.1), (1, 0.5), (2, 1.0)]);
        let requirements = BTreeMap::from([
            (Section::Application, weights.clone()),
            (Section::Research, weights),
        ]);
        let row = |a: f64, b: f64, c: f64| {
            let m = BTreeMap::from([(0, a), (1, b), (2, c)]);
            BTreeMap::from([(Section::Application, m.clone()), (Section::Research, m)])
        };
        let coverage = BTreeMap::from([
            (1, row(1.0, 0.0, 0.0)),
            (2, row(0.0, 1.0, 0.0)),
            (3, row(0.0, 0.0, 1.0)),
        ]);
        (vec![1, 2, 3], requirements, coverage)
    }

    fn build(
        candidates: &[CandidateId],
        requirements: &SectionScores,
        coverage: &CoverageMatrix,
    ) -> Result<CoverageModel, FormationError> {
        CoverageModel::new(candidates, requirements, coverage, 100)
    }

    #[test]
    fn test_slots_are_ordered_by_section_then_index() {
        let (ids, reqs, cov) = disjoint_specialists();
        let model = build(&ids, &reqs, &cov).unwrap();
        let order: Vec<(Section, u32)> = model.slots().iter().map(|s| (s.section, s.index)).collect();
        assert_eq!(order[0], (Section::Application, 0));
        assert_eq!(order[2], (Section::Application, 2));
        assert_eq!(order[3], (Section::Research, 0));
        assert_eq!(order.len(), 6);
    }

    #[test]
    fn test_team_coverage_is_elementwise_max() {
        let (ids, reqs, cov) = disjoint_specialists();
        let model = build(&ids, &reqs, &cov).unwrap();
        let covered = model.team_coverage(&[2, 3]).unwrap();
        let sections = model.to_sections(&covered);
        assert_eq!(
            sections[&Section::Application],
            BTreeMap::from([(0, 0.0), (1, 1.0), (2, 1.0)])
        );
        assert!((model.score(&covered) - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_team_coverage_is_monotonic_in_team_growth() {
        let (ids, reqs, cov) = disjoint_specialists();
        let model = build(&ids, &reqs, &cov).unwrap();
        let teams: [&[CandidateId]; 4] = [&[], &[1], &[1, 3], &[1, 3, 2]];
        for pair in teams.windows(2) {
            let smaller = model.team_coverage(pair[0]).unwrap();
            let larger = model.team_coverage(pair[1]).unwrap();
            for (s, l) in smaller.iter().zip(&larger) {
                assert!(l >= s, "coverage dropped when growing {:?} → {:?}", pair[0], pair[1]);
            }
        }
    }

    #[test]
    fn test_duplicate_candidate_ids_rejected() {
        let (_, reqs, cov) = disjoint_specialists();
        let err = build(&[1, 2, 1], &reqs, &cov).unwrap_err();
        assert!(matches!(err, FormationError::InvalidInput(msg) if msg.contains("more than once")));
    }

    #[test]
    fn test_coverage_without_weight_is_rejected_not_defaulted() {
        let (ids, reqs, mut cov) = disjoint_specialists();
        cov.get_mut(&1)
            .unwrap()
            .get_mut(&Section::Application)
            .unwrap()
            .insert(7, 0.9);
        let err = build(&ids, &reqs, &cov).unwrap_err();
        assert!(matches!(err, FormationError::InvalidInput(msg) if msg.contains("application[7]")));
    }

    #[test]
    fn test_out_of_range_score_rejected() {
        let (ids, reqs, mut cov) = disjoint_specialists();
        cov.get_mut(&2)
            .unwrap()
            .get_mut(&Section::Research)
            .unwrap()
            .insert(1, 1.5);
        assert!(build(&ids, &reqs, &cov).is_err());
    }

    #[test]
    fn test_negative_weight_rejected() {
        let (ids, mut reqs, cov) = disjoint_specialists();
        reqs.get_mut(&Section::Research).unwrap().insert(0, -0.2);
        assert!(build(&ids, &reqs, &cov).is_err());
    }

    #[test]
    fn test_pool_above_hard_cap_rejected() {
        let (ids, reqs, cov) = disjoint_specialists();
        let err = CoverageModel::new(&ids, &reqs, &cov, 2).unwrap_err();
        assert!(matches!(err, FormationError::InvalidInput(msg) if msg.contains("hard cap")));
    }

    #[test]
    fn test_missing_rows_and_foreign_rows() {
        let (_, reqs, mut cov) = disjoint_specialists();
        cov.remove(&3);
        // Row for an id outside the pool is ignored, even if it would not validate.
        cov.insert(
            99,
            BTreeMap::from([(Section::Application, BTreeMap::from([(42, 7.0)]))]),
        );
        let model = build(&[1, 2, 3], &reqs, &cov).unwrap();
        let pos = model.position(3).unwrap();
        assert!(model.row(pos).iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_contributors_name_the_covering_member() {
        let (ids, reqs, cov) = disjoint_specialists();
        let model = build(&ids, &reqs, &cov).unwrap();
        let contributors = model.contributors(&[2, 3]);
        let app2 = contributors
            .iter()
            .find(|c| c.section == Section::Application && c.index == 2)
            .unwrap();
        assert_eq!(app2.candidate_id, Some(3));
        let app0 = contributors
            .iter()
            .find(|c| c.section == Section::Application && c.index == 0)
            .unwrap();
        assert_eq!(app0.candidate_id, None);
        assert_eq!(app0.coverage, 0.0);
    }

    #[test]
    fn test_resolve_required_dedups_and_reports_missing() {
        let (ids, reqs, cov) = disjoint_specialists();
        let model = build(&ids, &reqs, &cov).unwrap();
        assert_eq!(resolve_required(&model, &[2, 1, 2]).unwrap(), vec![2, 1]);
        let err = resolve_required(&model, &[1, 999]).unwrap_err();
        assert!(matches!(err, FormationError::InvalidInput(msg) if msg.contains("999")));
    }

    #[test]
    fn test_section_weights_validation() {
        assert!(SectionWeights::default().validate().is_ok());
        let bad = SectionWeights {
            application: f64::NAN,
            research: 1.0,
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_wire_shape_round_trips_through_json() {
        let json = serde_json::json!({
            "application": {"0": 1.0, "1": 0.5},
            "research": {}
        });
        let parsed: SectionScores = serde_json::from_value(json).unwrap();
        assert_eq!(parsed[&Section::Application][&1], 0.5);
        assert!(parsed[&Section::Research].is_empty());
    }
}
