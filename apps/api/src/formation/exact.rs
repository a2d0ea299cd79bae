//! Exact Team Selector: exhaustive enumeration of candidate subsets.
//!
//! Algorithm:
//! 1. Resolve required members (dedup, must be in pool, |required| ≤ K)
//! 2. Baseline coverage = elementwise max over required members
//! 3. For every combination of `K − |required|` remaining candidates (pool order):
//!    team coverage = baseline ∨ members, score = Σ weight × coverage
//! 4. Keep the top `num_candidates` by (score desc, team ascending)
//!
//! Cost is O(C(n−r, K−r) × |requirements|). The pool is capped by `pool_limit`;
//! larger pools must go through the MILP path or be pre-filtered upstream.

use std::cmp::Ordering;

use itertools::Itertools;
use tracing::debug;

use crate::formation::error::FormationError;
use crate::formation::model::{resolve_required, CandidateId, CoverageModel, RankedTeam};

#[derive(Debug, Clone)]
pub struct ExactTeamSelector {
    pool_limit: usize,
}

struct Scored {
    score: f64,
    team: Vec<CandidateId>,
    coverage: Vec<f64>,
}

fn rank(a: &Scored, b: &Scored) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.team.cmp(&b.team))
}

impl ExactTeamSelector {
    pub fn new(pool_limit: usize) -> Self {
        Self { pool_limit }
    }

    /// Returns the best `num_candidates` teams, best first. Element 0 is the selected team.
    ///
    /// `k` above the pool size is clamped. The returned list is shorter than
    /// `num_candidates` only when fewer distinct teams exist.
    pub fn select(
        &self,
        model: &CoverageModel,
        k: usize,
        required: &[CandidateId],
        num_candidates: usize,
    ) -> Result<Vec<RankedTeam>, FormationError> {
        if num_candidates < 1 {
            return Err(FormationError::invalid("num_candidates must be >= 1"));
        }
        if model.pool_size() > self.pool_limit {
            return Err(FormationError::invalid(format!(
                "exact enumeration is limited to {} candidates, got {}; pre-filter the pool or use the milp strategy",
                self.pool_limit,
                model.pool_size()
            )));
        }

        let required = resolve_required(model, required)?;
        if required.len() > k {
            return Err(FormationError::invalid(format!(
                "K must be >= number of required_ids ({}), got {k}",
                required.len()
            )));
        }
        let k = k.min(model.pool_size());

        let mut baseline = model.empty_coverage();
        for &id in &required {
            if let Some(pos) = model.position(id) {
                model.absorb(&mut baseline, pos);
            }
        }

        let remaining: Vec<usize> = model
            .candidates()
            .iter()
            .enumerate()
            .filter(|(_, id)| !required.contains(*id))
            .map(|(pos, _)| pos)
            .collect();
        let extra = k - required.len();

        debug!(
            pool = model.pool_size(),
            required = required.len(),
            extra,
            num_candidates,
            "Enumerating team combinations"
        );

        let mut best: Vec<Scored> = Vec::with_capacity(num_candidates + 1);
        let mut offer = |combo: &[usize]| {
            let mut coverage = baseline.clone();
            for &pos in combo {
                model.absorb(&mut coverage, pos);
            }
            let score = model.score(&coverage);

            if best.len() == num_candidates {
                if let Some(worst) = best.last() {
                    if score < worst.score {
                        return;
                    }
                }
            }

            let mut team = required.clone();
            team.extend(combo.iter().map(|&pos| model.candidates()[pos]));
            let scored = Scored {
                score,
                team,
                coverage,
            };
            let at = best
                .binary_search_by(|existing| rank(existing, &scored))
                .unwrap_or_else(|i| i);
            if at < num_candidates {
                best.insert(at, scored);
                best.truncate(num_candidates);
            }
        };

        if extra == 0 {
            offer(&[]);
        } else {
            for combo in remaining.iter().copied().combinations(extra) {
                offer(combo.as_slice());
            }
        }

        Ok(best
            .into_iter()
            .map(|s| model.ranked_team(s.team, &s.coverage))
            .collect())
    }
}
