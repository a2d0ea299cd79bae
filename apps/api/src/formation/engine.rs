//! Team Formation Engine: one request in, one recommended team (plus alternatives) out.
//!
//! # Flow
//! 1. Validate and flatten the request into a `CoverageModel` (fail fast).
//! 2. Route: exact enumeration for small pools, penalised MILP over a shortlist with a
//!    λ sweep otherwise (`strategy = auto`).
//! 3. Quality gate and contributors for every alternative.
//! 4. The judge picks among the alternatives that pass the gate (all of them when none
//!    does). Its first pick is the returned team.
//!
//! Steps 1-3 are CPU-bound and run inside `tokio::task::spawn_blocking`. Only the judge
//! call is awaited on the executor.

use std::sync::Arc;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::errors::AppError;
use crate::formation::error::FormationError;
use crate::formation::exact::ExactTeamSelector;
use crate::formation::milp::{MilpSolver, MilpTeamSelector, SolveStatus};
use crate::formation::model::{
    resolve_required, CandidateId, Contributor, CoverageMatrix, CoverageModel, RankedTeam,
    SectionScores, SectionWeights,
};
use crate::formation::quality::{
    evaluate, QualityGateRejection, QualityMetrics, QualityReport, QualityThresholds,
};
use crate::formation::ranker::{CandidateRanker, RankerSelection, TeamJudge};
use crate::formation::redundancy::{
    base_scores, shortlist, team_redundancy, RedundancyPenaltyCalculator,
};

// ────────────────────────────────────────────────────────────────────────────
// Settings
// ────────────────────────────────────────────────────────────────────────────

/// Service-level limits and defaults. Request fields override the defaults, never the
/// limits.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub exact_pool_limit: usize,
    pub max_pool_size: usize,
    pub max_team_size: usize,
    pub shortlist_size: usize,
    pub lambda_grid: Vec<f64>,
    pub decay_k: f64,
    pub alpha: SectionWeights,
    pub quality: Option<QualityThresholds>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            exact_pool_limit: 20,
            max_pool_size: 200,
            max_team_size: 6,
            shortlist_size: 20,
            lambda_grid: vec![0.0, 0.5, 1.0, 2.0, 4.0],
            decay_k: 5.0,
            alpha: SectionWeights::default(),
            quality: None,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Request / Response types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    #[default]
    Auto,
    Exact,
    Milp,
}

fn default_num_candidates() -> i64 {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct FormationRequest {
    #[serde(default)]
    pub opportunity_id: Option<Uuid>,
    pub candidate_ids: Vec<CandidateId>,
    pub requirements: SectionScores,
    #[serde(default)]
    pub coverage: CoverageMatrix,
    /// K. Signed so that negative values are reported as invalid input.
    pub team_size: i64,
    #[serde(default)]
    pub required_ids: Vec<CandidateId>,
    #[serde(default = "default_num_candidates")]
    pub num_candidates: i64,
    #[serde(default)]
    pub strategy: Strategy,
    #[serde(default)]
    pub desired_team_count: Option<i64>,
    #[serde(default)]
    pub lambda_grid: Option<Vec<f64>>,
    #[serde(default)]
    pub alpha: Option<SectionWeights>,
    #[serde(default)]
    pub decay_k: Option<f64>,
    #[serde(default)]
    pub shortlist_size: Option<usize>,
    #[serde(default)]
    pub quality: Option<QualityThresholds>,
}

/// Quality gate result for the recommended team.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "gate", rename_all = "snake_case")]
pub enum QualityOutcome {
    NotConfigured,
    Passed { metrics: QualityMetrics },
    Rejected(QualityGateRejection),
}

impl From<QualityReport> for QualityOutcome {
    fn from(report: QualityReport) -> Self {
        match report.rejection() {
            Some(rejection) => QualityOutcome::Rejected(rejection),
            None => QualityOutcome::Passed {
                metrics: report.metrics,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LambdaTrial {
    pub lambda: f64,
    pub status: SolveStatus,
    pub team: Vec<CandidateId>,
    pub objective: Option<f64>,
    pub team_score: Option<f64>,
    /// Pair-averaged redundancy of `team`.
    pub redundancy: Option<f64>,
    pub quality_passes: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MilpTrace {
    pub solver: String,
    pub shortlist: Vec<CandidateId>,
    pub pair_count: usize,
    pub chosen_lambda: f64,
    pub accepted_by_gate: bool,
    pub trials: Vec<LambdaTrial>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FormationResponse {
    pub opportunity_id: Uuid,
    /// Resolved strategy: `exact` or `milp`.
    pub strategy: Strategy,
    /// First pick of the judge. `team`, `final_coverage`, `team_score`, `contributors`
    /// and `quality` all describe this team.
    pub team: Vec<CandidateId>,
    pub final_coverage: SectionScores,
    pub team_score: f64,
    pub alternatives: Vec<RankedTeam>,
    pub contributors: Vec<Contributor>,
    pub quality: QualityOutcome,
    /// `indices` point into `alternatives`.
    pub selection: RankerSelection,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub milp: Option<MilpTrace>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QualityRequest {
    /// Pool the coverage is validated against; defaults to `team`.
    #[serde(default)]
    pub candidate_ids: Option<Vec<CandidateId>>,
    pub team: Vec<CandidateId>,
    pub requirements: SectionScores,
    #[serde(default)]
    pub coverage: CoverageMatrix,
    #[serde(default)]
    pub alpha: Option<SectionWeights>,
    #[serde(default)]
    pub quality: Option<QualityThresholds>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QualityResponse {
    pub team: Vec<CandidateId>,
    pub team_score: f64,
    pub final_coverage: SectionScores,
    pub contributors: Vec<Contributor>,
    pub report: QualityReport,
    pub rejection: Option<QualityGateRejection>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TeamAssessment {
    pub contributors: Vec<Contributor>,
    pub quality: QualityOutcome,
}

/// Everything computed before the judge is consulted.
#[derive(Debug, Clone)]
pub struct FormationPlan {
    pub opportunity_id: Uuid,
    pub strategy: Strategy,
    pub desired_team_count: usize,
    pub requirement_weights: SectionScores,
    /// Best deterministic team; always `alternatives[0]`.
    pub recommended: RankedTeam,
    pub alternatives: Vec<RankedTeam>,
    /// One per alternative, same order.
    pub assessments: Vec<TeamAssessment>,
    pub milp: Option<MilpTrace>,
}

impl FormationPlan {
    /// Indices of the alternatives offered to the judge: those passing the gate, or all
    /// of them when none passes (or no gate is configured).
    pub fn eligible(&self) -> Vec<usize> {
        let passing: Vec<usize> = self
            .assessments
            .iter()
            .enumerate()
            .filter(|(_, a)| matches!(a.quality, QualityOutcome::Passed { .. }))
            .map(|(i, _)| i)
            .collect();
        if passing.is_empty() {
            (0..self.alternatives.len()).collect()
        } else {
            passing
        }
    }
}

/// Validated request parameters.
struct Params {
    /// Already clamped to the pool size.
    k: usize,
    required: Vec<CandidateId>,
    /// Alternatives to produce: `max(num_candidates, desired_team_count)`.
    candidate_pool: usize,
    desired_team_count: usize,
    lambda_grid: Vec<f64>,
    alpha: SectionWeights,
    decay_k: f64,
    shortlist_size: usize,
    thresholds: Option<QualityThresholds>,
}

// ────────────────────────────────────────────────────────────────────────────
// Engine
// ────────────────────────────────────────────────────────────────────────────

pub struct TeamFormationEngine {
    settings: EngineSettings,
    exact: ExactTeamSelector,
    milp: MilpTeamSelector,
    ranker: CandidateRanker,
}

impl TeamFormationEngine {
    pub fn new(
        settings: EngineSettings,
        solver: Arc<dyn MilpSolver>,
        judge: Arc<dyn TeamJudge>,
    ) -> Self {
        Self {
            exact: ExactTeamSelector::new(settings.exact_pool_limit),
            milp: MilpTeamSelector::new(solver),
            ranker: CandidateRanker::new(judge),
            settings,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Full formation: CPU-bound planning on the blocking pool, then the judge.
    pub async fn form_team(
        self: &Arc<Self>,
        request: FormationRequest,
    ) -> Result<FormationResponse, AppError> {
        let engine = Arc::clone(self);
        let plan = tokio::task::spawn_blocking(move || engine.plan(&request))
            .await
            .map_err(|e| {
                AppError::Internal(anyhow!("spawn_blocking failed in team formation: {e}"))
            })??;

        let eligible = plan.eligible();
        let offered: Vec<RankedTeam> = eligible
            .iter()
            .map(|&i| plan.alternatives[i].clone())
            .collect();
        let mut selection = self
            .ranker
            .select(
                plan.opportunity_id,
                &offered,
                plan.desired_team_count,
                &plan.requirement_weights,
            )
            .await?;
        selection.indices = selection.indices.iter().map(|&i| eligible[i]).collect();

        let chosen = selection.indices.first().copied().unwrap_or(0);
        let (team, assessment) = plan
            .alternatives
            .get(chosen)
            .cloned()
            .zip(plan.assessments.get(chosen).cloned())
            .ok_or_else(|| AppError::Internal(anyhow!("no candidate team at index {chosen}")))?;

        info!(
            opportunity_id = %plan.opportunity_id,
            strategy = ?plan.strategy,
            team = ?team.team,
            score = team.score,
            recommended = ?plan.recommended.team,
            selection_source = ?selection.source,
            "Team formed"
        );

        Ok(FormationResponse {
            opportunity_id: plan.opportunity_id,
            strategy: plan.strategy,
            team: team.team,
            final_coverage: team.final_coverage,
            team_score: team.score,
            alternatives: plan.alternatives,
            contributors: assessment.contributors,
            quality: assessment.quality,
            selection,
            milp: plan.milp,
            generated_at: Utc::now(),
        })
    }

    /// Quality gate for a caller-supplied team.
    pub async fn check_quality(
        self: &Arc<Self>,
        request: QualityRequest,
    ) -> Result<QualityResponse, AppError> {
        let engine = Arc::clone(self);
        let response = tokio::task::spawn_blocking(move || engine.evaluate_quality(&request))
            .await
            .map_err(|e| {
                AppError::Internal(anyhow!("spawn_blocking failed in quality check: {e}"))
            })??;
        Ok(response)
    }

    /// Synchronous part of `form_team`: validation, selection and quality gate.
    pub fn plan(&self, request: &FormationRequest) -> Result<FormationPlan, FormationError> {
        let model = CoverageModel::new(
            &request.candidate_ids,
            &request.requirements,
            &request.coverage,
            self.settings.max_pool_size,
        )?;
        let params = self.validate(request, &model)?;

        let strategy = match request.strategy {
            Strategy::Auto if model.pool_size() <= self.settings.exact_pool_limit => {
                Strategy::Exact
            }
            Strategy::Auto => Strategy::Milp,
            explicit => explicit,
        };
        debug!(
            pool = model.pool_size(),
            requirements = model.slots().len(),
            k = params.k,
            ?strategy,
            "Planning team formation"
        );

        let (recommended, alternatives, milp) = match strategy {
            Strategy::Milp => {
                let (recommended, alternatives, trace) = self.sweep(&model, &params)?;
                (recommended, alternatives, Some(trace))
            }
            _ => {
                let alternatives =
                    self.exact
                        .select(&model, params.k, &params.required, params.candidate_pool)?;
                let recommended = alternatives.first().cloned().ok_or_else(|| {
                    FormationError::invalid("exact enumeration produced no team")
                })?;
                (recommended, alternatives, None)
            }
        };

        let assessments = alternatives
            .iter()
            .map(|team| assess(&model, &team.team, &params))
            .collect::<Result<Vec<_>, _>>()?;
        if let Some(TeamAssessment {
            quality: QualityOutcome::Rejected(rejection),
            ..
        }) = assessments.first()
        {
            info!(
                failed = ?rejection.failed_checks,
                "Recommended team did not pass the quality gate"
            );
        }

        Ok(FormationPlan {
            opportunity_id: request.opportunity_id.unwrap_or_else(Uuid::new_v4),
            strategy,
            desired_team_count: params.desired_team_count,
            requirement_weights: model.requirement_weights(),
            recommended,
            alternatives,
            assessments,
            milp,
        })
    }

    /// Synchronous part of `check_quality`.
    pub fn evaluate_quality(
        &self,
        request: &QualityRequest,
    ) -> Result<QualityResponse, FormationError> {
        let thresholds = request
            .quality
            .or(self.settings.quality)
            .ok_or_else(|| {
                FormationError::invalid(
                    "quality thresholds must be supplied in the request or configured via QUALITY_* variables",
                )
            })?;
        let alpha = request.alpha.unwrap_or(self.settings.alpha);

        let pool = request.candidate_ids.as_deref().unwrap_or(&request.team);
        let model = CoverageModel::new(
            pool,
            &request.requirements,
            &request.coverage,
            self.settings.max_pool_size,
        )?;
        let report = evaluate(&model, &request.team, &alpha, &thresholds)?;
        let coverage = model.team_coverage(&request.team)?;

        Ok(QualityResponse {
            team: request.team.clone(),
            team_score: model.score(&coverage),
            final_coverage: model.to_sections(&coverage),
            contributors: model.contributors(&request.team),
            rejection: report.rejection(),
            report,
        })
    }

    fn validate(
        &self,
        request: &FormationRequest,
        model: &CoverageModel,
    ) -> Result<Params, FormationError> {
        if request.team_size < 0 {
            return Err(FormationError::invalid(format!(
                "team_size (K) must be >= 0, got {}",
                request.team_size
            )));
        }
        let k = usize::try_from(request.team_size)
            .unwrap_or(usize::MAX)
            .min(model.pool_size());
        if k > self.settings.max_team_size {
            return Err(FormationError::invalid(format!(
                "team_size (K) must be <= {}, got {} on a pool of {}",
                self.settings.max_team_size,
                request.team_size,
                model.pool_size()
            )));
        }
        if request.num_candidates < 1 {
            return Err(FormationError::invalid(format!(
                "num_candidates must be >= 1, got {}",
                request.num_candidates
            )));
        }
        let desired = request.desired_team_count.unwrap_or(1);
        if desired < 1 {
            return Err(FormationError::invalid(format!(
                "desired_team_count must be >= 1, got {desired}"
            )));
        }

        let required = resolve_required(model, &request.required_ids)?;
        if required.len() > k {
            return Err(FormationError::invalid(format!(
                "K must be >= number of required_ids ({} > {k})",
                required.len()
            )));
        }

        let alpha = request.alpha.unwrap_or(self.settings.alpha);
        alpha.validate()?;

        let decay_k = request.decay_k.unwrap_or(self.settings.decay_k);
        if !decay_k.is_finite() || decay_k < 0.0 {
            return Err(FormationError::invalid(format!(
                "decay_k must be a finite number >= 0, got {decay_k}"
            )));
        }

        let lambda_grid = request
            .lambda_grid
            .clone()
            .unwrap_or_else(|| self.settings.lambda_grid.clone());
        if lambda_grid.is_empty() {
            return Err(FormationError::invalid("lambda_grid must not be empty"));
        }
        if let Some(bad) = lambda_grid.iter().find(|l| !l.is_finite() || **l < 0.0) {
            return Err(FormationError::invalid(format!(
                "lambda_grid values must be finite numbers >= 0, got {bad}"
            )));
        }

        let shortlist_size = request.shortlist_size.unwrap_or(self.settings.shortlist_size);
        if shortlist_size == 0 {
            return Err(FormationError::invalid("shortlist_size must be >= 1"));
        }

        let thresholds = request.quality.or(self.settings.quality);
        if let Some(t) = &thresholds {
            t.validate()?;
        }

        Ok(Params {
            k,
            required,
            candidate_pool: (request.num_candidates as usize).max(desired as usize),
            desired_team_count: desired as usize,
            lambda_grid,
            alpha,
            decay_k,
            shortlist_size,
            thresholds,
        })
    }

    /// MILP over a base-score shortlist for every λ in the grid.
    ///
    /// The first λ whose team passes the quality gate wins. Without a passing λ (or
    /// without a gate) the highest-TeamScore trial wins, ties to the lower λ.
    fn sweep(
        &self,
        model: &CoverageModel,
        params: &Params,
    ) -> Result<(RankedTeam, Vec<RankedTeam>, MilpTrace), FormationError> {
        let base = base_scores(model, &params.alpha);
        let pool = shortlist(
            model,
            &base,
            params.shortlist_size.max(params.k),
            &params.required,
        );
        let penalties = RedundancyPenaltyCalculator::new(params.decay_k)?
            .compute_pair_penalties(model, &pool, &params.alpha)?;

        let mut trials: Vec<LambdaTrial> = Vec::with_capacity(params.lambda_grid.len());
        let mut teams: Vec<Option<RankedTeam>> = Vec::with_capacity(params.lambda_grid.len());
        let mut last_status = SolveStatus::Error;

        for &lambda in &params.lambda_grid {
            match self
                .milp
                .solve(&pool, &base, &penalties, params.k, lambda, &params.required)
            {
                Ok(solved) => {
                    let coverage = model.team_coverage(&solved.selected_team)?;
                    let ranked = model.ranked_team(solved.selected_team.clone(), &coverage);
                    let quality_passes = params
                        .thresholds
                        .as_ref()
                        .map(|t| {
                            evaluate(model, &solved.selected_team, &params.alpha, t)
                                .map(|report| report.passes)
                        })
                        .transpose()?;
                    debug!(
                        lambda,
                        team = ?solved.selected_team,
                        objective = solved.objective,
                        score = ranked.score,
                        ?quality_passes,
                        "MILP trial"
                    );
                    trials.push(LambdaTrial {
                        lambda,
                        status: solved.status,
                        redundancy: Some(team_redundancy(&solved.selected_team, &penalties, true)),
                        team: solved.selected_team,
                        objective: Some(solved.objective),
                        team_score: Some(ranked.score),
                        quality_passes,
                    });
                    teams.push(Some(ranked));
                }
                Err(FormationError::SolverInfeasible { status }) => {
                    warn!(lambda, ?status, "MILP trial failed, skipping lambda");
                    last_status = status;
                    trials.push(LambdaTrial {
                        lambda,
                        status,
                        team: Vec::new(),
                        objective: None,
                        team_score: None,
                        redundancy: None,
                        quality_passes: None,
                    });
                    teams.push(None);
                }
                Err(other) => return Err(other),
            }
        }

        let gate_pick = trials
            .iter()
            .position(|t| t.quality_passes == Some(true));
        let chosen = match gate_pick {
            Some(i) => i,
            None => {
                let mut best: Option<usize> = None;
                for (i, team) in teams.iter().enumerate() {
                    if let Some(team) = team {
                        let better = best
                            .and_then(|b| teams[b].as_ref())
                            .map_or(true, |current| team.score > current.score);
                        if better {
                            best = Some(i);
                        }
                    }
                }
                best.ok_or(FormationError::SolverInfeasible {
                    status: last_status,
                })?
            }
        };
        let recommended = teams[chosen].clone().ok_or(FormationError::SolverInfeasible {
            status: last_status,
        })?;

        let mut others: Vec<RankedTeam> = Vec::new();
        for team in teams.into_iter().flatten() {
            if team.team != recommended.team && !others.iter().any(|o| o.team == team.team) {
                others.push(team);
            }
        }
        others.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.team.cmp(&b.team)));

        let mut alternatives = vec![recommended.clone()];
        alternatives.extend(others);
        alternatives.truncate(params.candidate_pool);

        let trace = MilpTrace {
            solver: self.milp.solver_name().to_string(),
            shortlist: pool,
            pair_count: penalties.len(),
            chosen_lambda: params.lambda_grid[chosen],
            accepted_by_gate: gate_pick.is_some(),
            trials,
        };
        Ok((recommended, alternatives, trace))
    }
}

fn assess(
    model: &CoverageModel,
    team: &[CandidateId],
    params: &Params,
) -> Result<TeamAssessment, FormationError> {
    let quality = match &params.thresholds {
        Some(thresholds) => evaluate(model, team, &params.alpha, thresholds)?.into(),
        None => QualityOutcome::NotConfigured,
    };
    Ok(TeamAssessment {
        contributors: model.contributors(team),
        quality,
    })
}
