//! MILP team selection for pools too large to enumerate.
//!
//! ```text
//! maximize  Σ_f base[f]·x[f]  −  λ · Σ_(f,g) p[f,g]·y[f,g]
//! s.t.      Σ_f x[f] = K
//!           x[r] = 1                  for every required r
//!           y[f,g] = x[f] ∧ x[g]      (BinaryProgram::and_product)
//! ```
//!
//! The solver backend is a trait object injected at construction. `MicroLpSolver`
//! (pure-Rust branch and bound via `good_lp`) is the default.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use good_lp::{
    constraint, variable, Expression, ProblemVariables, ResolutionError, Solution, SolverModel,
    Variable,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::formation::error::FormationError;
use crate::formation::model::CandidateId;
use crate::formation::program::{BinaryProgram, BinaryVar, Relation};
use crate::formation::redundancy::{normalize_pair_penalties, team_redundancy, PairPenalty};

// ────────────────────────────────────────────────────────────────────────────
// Solver seam
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolveStatus {
    Optimal,
    Infeasible,
    Unbounded,
    /// Backend failure, or an "optimal" assignment that violates the program.
    Error,
}

#[derive(Debug, Clone)]
pub struct SolverOutcome {
    pub status: SolveStatus,
    /// One entry per program variable. Meaningful only when `status` is `Optimal`.
    pub assignment: Vec<bool>,
}

impl SolverOutcome {
    pub fn without_assignment(status: SolveStatus) -> Self {
        Self {
            status,
            assignment: Vec::new(),
        }
    }
}

/// A 0/1 program solver. Implementations maximise `program.objective()`.
pub trait MilpSolver: Send + Sync {
    fn name(&self) -> &'static str;
    fn solve(&self, program: &BinaryProgram) -> SolverOutcome;
}

/// `good_lp` with the `microlp` backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct MicroLpSolver;

impl MilpSolver for MicroLpSolver {
    fn name(&self) -> &'static str {
        "microlp"
    }

    fn solve(&self, program: &BinaryProgram) -> SolverOutcome {
        if program.num_vars() == 0 {
            let status = if program.is_feasible(&[]) {
                SolveStatus::Optimal
            } else {
                SolveStatus::Infeasible
            };
            return SolverOutcome::without_assignment(status);
        }

        let mut vars = ProblemVariables::new();
        let xs: Vec<Variable> = (0..program.num_vars())
            .map(|_| vars.add(variable().binary()))
            .collect();

        let objective = program
            .objective()
            .iter()
            .zip(&xs)
            .fold(Expression::from(0.0), |acc, (&c, &x)| acc + c * x);

        let mut problem = vars
            .maximise(objective)
            .using(good_lp::solvers::microlp::microlp);

        for c in program.constraints() {
            let lhs = c
                .terms
                .iter()
                .fold(Expression::from(0.0), |acc, &(var, coeff)| {
                    acc + coeff * xs[var.index()]
                });
            let rhs = c.rhs;
            problem = match c.relation {
                Relation::Le => problem.with(constraint!(lhs <= rhs)),
                Relation::Ge => problem.with(constraint!(lhs >= rhs)),
                Relation::Eq => problem.with(constraint!(lhs == rhs)),
            };
        }

        match problem.solve() {
            Ok(solution) => SolverOutcome {
                status: SolveStatus::Optimal,
                assignment: xs.iter().map(|&x| solution.value(x) > 0.5).collect(),
            },
            Err(ResolutionError::Infeasible) => {
                SolverOutcome::without_assignment(SolveStatus::Infeasible)
            }
            Err(ResolutionError::Unbounded) => {
                SolverOutcome::without_assignment(SolveStatus::Unbounded)
            }
            Err(e) => {
                warn!("microlp solve failed: {e:?}");
                SolverOutcome::without_assignment(SolveStatus::Error)
            }
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Team selector
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MilpTeam {
    /// Selected members in candidate order.
    pub selected_team: Vec<CandidateId>,
    /// `Σ base − λ·Σ p` recomputed from `selected_team`.
    pub objective: f64,
    pub status: SolveStatus,
}

#[derive(Clone)]
pub struct MilpTeamSelector {
    solver: Arc<dyn MilpSolver>,
}

impl MilpTeamSelector {
    pub fn new(solver: Arc<dyn MilpSolver>) -> Self {
        Self { solver }
    }

    pub fn solver_name(&self) -> &'static str {
        self.solver.name()
    }

    /// Solves the penalised selection problem for one λ.
    ///
    /// Candidates missing from `base_scores` score 0. Penalties naming ids outside
    /// `candidates` are ignored.
    pub fn solve(
        &self,
        candidates: &[CandidateId],
        base_scores: &BTreeMap<CandidateId, f64>,
        pair_penalties: &[PairPenalty],
        k: usize,
        lambda: f64,
        required: &[CandidateId],
    ) -> Result<MilpTeam, FormationError> {
        if !lambda.is_finite() || lambda < 0.0 {
            return Err(FormationError::invalid(format!(
                "lambda must be a finite number >= 0, got {lambda}"
            )));
        }

        let mut positions: HashMap<CandidateId, usize> = HashMap::with_capacity(candidates.len());
        for (pos, &id) in candidates.iter().enumerate() {
            if positions.insert(id, pos).is_some() {
                return Err(FormationError::invalid(format!(
                    "candidate {id} appears more than once in candidate_ids"
                )));
            }
        }

        let mut pinned: Vec<CandidateId> = Vec::new();
        let mut missing: Vec<CandidateId> = Vec::new();
        for &r in required {
            if pinned.contains(&r) || missing.contains(&r) {
                continue;
            }
            if positions.contains_key(&r) {
                pinned.push(r);
            } else {
                missing.push(r);
            }
        }
        if !missing.is_empty() {
            return Err(FormationError::invalid(format!(
                "required_ids not present in candidate_ids: {missing:?}"
            )));
        }

        let k = k.min(candidates.len());
        if pinned.len() > k {
            return Err(FormationError::invalid(format!(
                "K must be >= number of required_ids ({} > {k})",
                pinned.len()
            )));
        }

        let scores = candidates
            .iter()
            .map(|id| {
                let s = base_scores.get(id).copied().unwrap_or(0.0);
                if s.is_finite() {
                    Ok(s)
                } else {
                    Err(FormationError::invalid(format!(
                        "base score for candidate {id} is not finite"
                    )))
                }
            })
            .collect::<Result<Vec<f64>, _>>()?;

        let penalties = normalize_pair_penalties(pair_penalties, candidates);

        let mut program = BinaryProgram::new();
        let xs: Vec<BinaryVar> = candidates
            .iter()
            .zip(&scores)
            .map(|(id, &s)| program.add_var(format!("x_{id}"), s))
            .collect();

        program.add_constraint(
            xs.iter().map(|&x| (x, 1.0)).collect(),
            Relation::Eq,
            k as f64,
        );
        for r in &pinned {
            program.fix(xs[positions[r]], true);
        }
        if lambda > 0.0 {
            for p in &penalties {
                let (xf, xg) = (xs[positions[&p.f]], xs[positions[&p.g]]);
                program.and_product(xf, xg, format!("y_{}_{}", p.f, p.g), -lambda * p.penalty);
            }
        }

        debug!(
            solver = self.solver.name(),
            vars = program.num_vars(),
            constraints = program.constraints().len(),
            k,
            lambda,
            "solving team MILP"
        );

        let outcome = self.solver.solve(&program);
        if outcome.status != SolveStatus::Optimal {
            return Err(FormationError::SolverInfeasible {
                status: outcome.status,
            });
        }
        if !program.is_feasible(&outcome.assignment) {
            warn!(
                solver = self.solver.name(),
                "solver reported optimal but the assignment violates the program"
            );
            return Err(FormationError::SolverInfeasible {
                status: SolveStatus::Error,
            });
        }

        let selected_team: Vec<CandidateId> = candidates
            .iter()
            .zip(&xs)
            .filter(|(_, x)| outcome.assignment[x.index()])
            .map(|(&id, _)| id)
            .collect();

        Ok(MilpTeam {
            objective: objective(&selected_team, base_scores, &penalties, lambda),
            selected_team,
            status: outcome.status,
        })
    }
}

/// `Σ base[f] − λ · Σ p[f,g]` over the members of `team`.
pub fn objective(
    team: &[CandidateId],
    base_scores: &BTreeMap<CandidateId, f64>,
    penalties: &[PairPenalty],
    lambda: f64,
) -> f64 {
    let base: f64 = team
        .iter()
        .map(|id| base_scores.get(id).copied().unwrap_or(0.0))
        .sum();
    base - lambda * team_redundancy(team, penalties, false)
}
