//! Redundancy penalties and individual base scores for the MILP path.
//!
//! `p(f,g) = Σ_sec α_sec Σ_i exp(−decay_k · w[sec][i]) · min(c[f][sec][i], c[g][sec][i])`
//!
//! Overlap on a low-weight requirement adds nothing to the team, so it is penalised in
//! full. Overlap on a high-weight requirement is backup capacity, so the exponential
//! decay shrinks its penalty as the weight grows. Only pairs with p > 0 are emitted.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::formation::error::FormationError;
use crate::formation::model::{CandidateId, CoverageModel, SectionWeights};

/// Redundancy cost incurred when both `f` and `g` are selected. `f < g`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PairPenalty {
    pub f: CandidateId,
    pub g: CandidateId,
    pub penalty: f64,
}

#[derive(Debug, Clone)]
pub struct RedundancyPenaltyCalculator {
    decay_k: f64,
}

impl RedundancyPenaltyCalculator {
    pub fn new(decay_k: f64) -> Result<Self, FormationError> {
        if !decay_k.is_finite() || decay_k < 0.0 {
            return Err(FormationError::invalid(format!(
                "decay_k must be a finite number >= 0, got {decay_k}"
            )));
        }
        Ok(Self { decay_k })
    }

    /// Sparse pairwise penalties over `candidates` (ids must belong to the model).
    /// O(|candidates|² × |requirements|); shortlist first on large pools.
    pub fn compute_pair_penalties(
        &self,
        model: &CoverageModel,
        candidates: &[CandidateId],
        alpha: &SectionWeights,
    ) -> Result<Vec<PairPenalty>, FormationError> {
        let damping: Vec<f64> = model
            .slots()
            .iter()
            .map(|slot| alpha.get(slot.section) * (-self.decay_k * slot.weight).exp())
            .collect();

        let rows = candidates
            .iter()
            .map(|&id| {
                model.position(id).map(|pos| (id, model.row(pos))).ok_or_else(|| {
                    FormationError::invalid(format!("candidate {id} is not in the candidate pool"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut out = Vec::new();
        for (a, &(id_a, row_a)) in rows.iter().enumerate() {
            for &(id_b, row_b) in &rows[a + 1..] {
                let penalty: f64 = damping
                    .iter()
                    .zip(row_a.iter().zip(row_b))
                    .map(|(d, (ca, cb))| d * ca.min(*cb))
                    .sum();
                if penalty > 0.0 {
                    let (f, g) = if id_a < id_b { (id_a, id_b) } else { (id_b, id_a) };
                    out.push(PairPenalty { f, g, penalty });
                }
            }
        }
        Ok(out)
    }
}

/// Individual, overlap-ignorant coverage: `Σ_sec α_sec Σ_i w·c` per candidate.
pub fn base_scores(model: &CoverageModel, alpha: &SectionWeights) -> BTreeMap<CandidateId, f64> {
    let factors: Vec<f64> = model
        .slots()
        .iter()
        .map(|slot| alpha.get(slot.section) * slot.weight)
        .collect();

    model
        .candidates()
        .iter()
        .enumerate()
        .map(|(pos, &id)| {
            let score: f64 = factors
                .iter()
                .zip(model.row(pos))
                .map(|(f, c)| f * c)
                .sum();
            (id, score)
        })
        .collect()
}

/// Top `top_n` candidates by base score (ties: lower id first). Required members are
/// always kept, on top of the `top_n` slots if they would not have made the cut.
/// Result is in pool order.
pub fn shortlist(
    model: &CoverageModel,
    base: &BTreeMap<CandidateId, f64>,
    top_n: usize,
    required: &[CandidateId],
) -> Vec<CandidateId> {
    let mut ranked: Vec<CandidateId> = model.candidates().to_vec();
    ranked.sort_by(|a, b| {
        let sa = base.get(a).copied().unwrap_or(0.0);
        let sb = base.get(b).copied().unwrap_or(0.0);
        sb.total_cmp(&sa).then_with(|| a.cmp(b))
    });

    let mut keep: HashSet<CandidateId> = ranked.into_iter().take(top_n).collect();
    keep.extend(required.iter().copied());

    model
        .candidates()
        .iter()
        .copied()
        .filter(|id| keep.contains(id))
        .collect()
}

/// Drops self-pairs, ids outside `candidates` and non-positive penalties; orders every
/// pair as (min, max) and merges duplicates by max.
pub fn normalize_pair_penalties(
    penalties: &[PairPenalty],
    candidates: &[CandidateId],
) -> Vec<PairPenalty> {
    let known: HashSet<CandidateId> = candidates.iter().copied().collect();
    let mut merged: BTreeMap<(CandidateId, CandidateId), f64> = BTreeMap::new();
    for p in penalties {
        if p.f == p.g || !known.contains(&p.f) || !known.contains(&p.g) {
            continue;
        }
        if !p.penalty.is_finite() || p.penalty <= 0.0 {
            continue;
        }
        let key = if p.f < p.g { (p.f, p.g) } else { (p.g, p.f) };
        let slot = merged.entry(key).or_insert(0.0);
        *slot = slot.max(p.penalty);
    }
    merged
        .into_iter()
        .map(|((f, g), penalty)| PairPenalty { f, g, penalty })
        .collect()
}

/// Total penalty over the pairs inside `team`; with `average`, divided by the number of
/// member pairs (0.0 for teams of fewer than two).
pub fn team_redundancy(team: &[CandidateId], penalties: &[PairPenalty], average: bool) -> f64 {
    let members: HashSet<CandidateId> = team.iter().copied().collect();
    let mut by_pair: HashMap<(CandidateId, CandidateId), f64> = HashMap::new();
    for p in penalties {
        if members.contains(&p.f) && members.contains(&p.g) && p.f != p.g {
            let key = if p.f < p.g { (p.f, p.g) } else { (p.g, p.f) };
            let slot = by_pair.entry(key).or_insert(0.0);
            *slot = slot.max(p.penalty);
        }
    }
    let total: f64 = by_pair.values().sum();
    if !average {
        return total;
    }
    let n = members.len();
    let pairs = n * n.saturating_sub(1) / 2;
    if pairs == 0 {
        0.0
    } else {
        total / pairs as f64
    }
}
