//! Candidate Ranker: picks the final teams out of the scored alternatives.
//!
//! An external judge (usually an LLM) gets a report of the alternatives and returns
//! the indices it prefers. Its answer is sanitised and padded; if the judge fails in
//! any way the ranker falls back to the deterministic order (score desc, idx asc).
//! `select` only errors on `desired_count == 0`.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::formation::error::FormationError;
use crate::formation::model::{CandidateId, RankedTeam, SectionScores};
use crate::llm_client::LlmError;

// ────────────────────────────────────────────────────────────────────────────
// Judge protocol
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeCandidate {
    pub idx: usize,
    pub team: Vec<CandidateId>,
    pub score: f64,
    pub final_coverage: SectionScores,
    pub member_coverages: BTreeMap<CandidateId, SectionScores>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeRequest {
    pub opportunity_id: Uuid,
    pub desired_team_count: usize,
    pub requirement_weights: SectionScores,
    pub candidates: Vec<JudgeCandidate>,
}

impl JudgeRequest {
    pub fn new(
        opportunity_id: Uuid,
        desired_team_count: usize,
        requirement_weights: &SectionScores,
        candidates: &[RankedTeam],
    ) -> Self {
        Self {
            opportunity_id,
            desired_team_count,
            requirement_weights: requirement_weights.clone(),
            candidates: candidates
                .iter()
                .enumerate()
                .map(|(idx, c)| JudgeCandidate {
                    idx,
                    team: c.team.clone(),
                    score: c.score,
                    final_coverage: c.final_coverage.clone(),
                    member_coverages: c.member_coverages.clone(),
                })
                .collect(),
        }
    }

    /// Indices ordered by (score desc, idx asc).
    pub fn deterministic_order(&self) -> Vec<usize> {
        let scores: Vec<f64> = self.candidates.iter().map(|c| c.score).collect();
        deterministic_order(&scores)
    }
}

/// Raw judge answer. Indices are signed so out-of-range values survive parsing and
/// can be dropped during validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JudgeVerdict {
    #[serde(default)]
    pub selected_candidate_indices: Vec<i64>,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Error)]
pub enum JudgeError {
    #[error("judge timed out after {0:?}")]
    Timeout(Duration),

    #[error("judge LLM call failed: {0}")]
    Llm(#[from] LlmError),

    #[error("judge output unusable: {0}")]
    Unusable(String),
}

/// The team judge. Implement this to swap backends without touching the ranker.
///
/// Carried by the engine as `Arc<dyn TeamJudge>`.
#[async_trait]
pub trait TeamJudge: Send + Sync {
    fn name(&self) -> &'static str;

    async fn judge(&self, request: &JudgeRequest) -> Result<JudgeVerdict, JudgeError>;
}

// ────────────────────────────────────────────────────────────────────────────
// Ranker
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionSource {
    Judge,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankerSelection {
    pub selected: Vec<RankedTeam>,
    pub indices: Vec<usize>,
    pub reason: String,
    pub source: SelectionSource,
    pub judge: String,
}

#[derive(Clone)]
pub struct CandidateRanker {
    judge: Arc<dyn TeamJudge>,
}

impl CandidateRanker {
    pub fn new(judge: Arc<dyn TeamJudge>) -> Self {
        Self { judge }
    }

    pub async fn select(
        &self,
        opportunity_id: Uuid,
        candidates: &[RankedTeam],
        desired_count: usize,
        requirement_weights: &SectionScores,
    ) -> Result<RankerSelection, FormationError> {
        if desired_count == 0 {
            return Err(FormationError::invalid("desired_team_count must be >= 1"));
        }
        if candidates.is_empty() {
            return Ok(self.selection(
                candidates,
                vec![],
                "no candidate teams to rank".into(),
                SelectionSource::Fallback,
            ));
        }

        let want = desired_count.min(candidates.len());
        let request = JudgeRequest::new(opportunity_id, want, requirement_weights, candidates);
        let fallback_order = request.deterministic_order();

        let verdict = match self.judge.judge(&request).await {
            Ok(v) => v,
            Err(e) => {
                warn!(
                    judge = self.judge.name(),
                    "Team judge failed, using deterministic ranking: {e}"
                );
                return Ok(self.fallback(candidates, &fallback_order, want, &e.to_string()));
            }
        };

        let mut indices = sanitize_indices(&verdict.selected_candidate_indices, candidates.len());
        indices.truncate(want);
        if indices.is_empty() {
            let err = JudgeError::Unusable("no valid candidate indices".into());
            warn!(
                judge = self.judge.name(),
                "Team judge output unusable, using deterministic ranking: {err}"
            );
            return Ok(self.fallback(candidates, &fallback_order, want, &err.to_string()));
        }

        let mut reason = verdict.reason.trim().to_string();
        let picked = indices.len();
        if picked < want {
            let chosen: HashSet<usize> = indices.iter().copied().collect();
            indices.extend(
                fallback_order
                    .iter()
                    .copied()
                    .filter(|i| !chosen.contains(i))
                    .take(want - picked),
            );
            reason = format!(
                "{reason} (padded with {} highest-scoring remaining candidates)",
                want - picked
            )
            .trim()
            .to_string();
        }

        info!(
            judge = self.judge.name(),
            selected = ?indices,
            "Team judge selection accepted"
        );
        Ok(self.selection(candidates, indices, reason, SelectionSource::Judge))
    }

    fn fallback(
        &self,
        candidates: &[RankedTeam],
        order: &[usize],
        want: usize,
        cause: &str,
    ) -> RankerSelection {
        let indices: Vec<usize> = order.iter().copied().take(want).collect();
        let reason = format!("deterministic ranking by team score ({cause})");
        self.selection(candidates, indices, reason, SelectionSource::Fallback)
    }

    fn selection(
        &self,
        candidates: &[RankedTeam],
        indices: Vec<usize>,
        reason: String,
        source: SelectionSource,
    ) -> RankerSelection {
        RankerSelection {
            selected: indices.iter().map(|&i| candidates[i].clone()).collect(),
            indices,
            reason,
            source,
            judge: self.judge.name().to_string(),
        }
    }
}

/// Indices ordered by (score desc, idx asc).
pub fn deterministic_order(scores: &[f64]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]).then(a.cmp(&b)));
    order
}

/// Keeps in-range, non-negative, first-seen indices in judge order.
fn sanitize_indices(raw: &[i64], len: usize) -> Vec<usize> {
    let mut seen = HashSet::new();
    raw.iter()
        .filter_map(|&i| usize::try_from(i).ok())
        .filter(|&i| i < len && seen.insert(i))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    enum Script {
        Verdict(Vec<i64>),
        EchoDesired,
        Fail,
        Hang,
    }

    struct ScriptedJudge(Script);

    #[async_trait]
    impl TeamJudge for ScriptedJudge {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn judge(&self, request: &JudgeRequest) -> Result<JudgeVerdict, JudgeError> {
            match &self.0 {
                Script::Verdict(indices) => Ok(JudgeVerdict {
                    selected_candidate_indices: indices.clone(),
                    reason: "complementary roles".into(),
                }),
                Script::EchoDesired => Ok(JudgeVerdict {
                    selected_candidate_indices: vec![0],
                    reason: format!("asked for {}", request.desired_team_count),
                }),
                Script::Fail => Err(JudgeError::Unusable("malformed JSON".into())),
                Script::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(JudgeVerdict::default())
                }
            }
        }
    }

    fn teams(scores: &[f64]) -> Vec<RankedTeam> {
        scores
            .iter()
            .enumerate()
            .map(|(i, &score)| RankedTeam {
                team: vec![i as CandidateId],
                score,
                final_coverage: BTreeMap::new(),
                member_coverages: BTreeMap::new(),
            })
            .collect()
    }

    fn ranker(script: Script) -> CandidateRanker {
        CandidateRanker::new(Arc::new(ScriptedJudge(script)))
    }

    #[tokio::test]
    async fn test_valid_verdict_is_used() {
        let candidates = teams(&[0.9, 0.8, 0.7]);
        let sel = ranker(Script::Verdict(vec![2, 0]))
            .select(Uuid::nil(), &candidates, 2, &BTreeMap::new())
            .await
            .unwrap();
        assert_eq!(sel.indices, vec![2, 0]);
        assert_eq!(sel.source, SelectionSource::Judge);
        assert_eq!(sel.selected[0].team, vec![2]);
        assert_eq!(sel.reason, "complementary roles");
    }

    #[tokio::test]
    async fn test_invalid_indices_dropped_and_padded() {
        let candidates = teams(&[0.5, 0.9, 0.7, 0.9]);
        let sel = ranker(Script::Verdict(vec![-1, 2, 2, 17]))
            .select(Uuid::nil(), &candidates, 3, &BTreeMap::new())
            .await
            .unwrap();
        // 2 kept; padded with the best remaining by (score desc, idx asc): 1, 3.
        assert_eq!(sel.indices, vec![2, 1, 3]);
        assert_eq!(sel.source, SelectionSource::Judge);
        assert!(sel.reason.contains("padded with 2"));
    }

    #[tokio::test]
    async fn test_excess_picks_truncated() {
        let candidates = teams(&[0.5, 0.4, 0.3]);
        let sel = ranker(Script::Verdict(vec![1, 2, 0]))
            .select(Uuid::nil(), &candidates, 2, &BTreeMap::new())
            .await
            .unwrap();
        assert_eq!(sel.indices, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_judge_is_asked_for_at_most_the_available_teams() {
        let candidates = teams(&[0.5, 0.4]);
        let sel = ranker(Script::EchoDesired)
            .select(Uuid::nil(), &candidates, 5, &BTreeMap::new())
            .await
            .unwrap();
        assert!(sel.reason.starts_with("asked for 2"));
        assert_eq!(sel.indices, vec![0, 1]);
    }

    #[tokio::test]
    async fn test_judge_error_falls_back() {
        let candidates = teams(&[0.2, 0.9, 0.9, 0.1]);
        let sel = ranker(Script::Fail)
            .select(Uuid::nil(), &candidates, 2, &BTreeMap::new())
            .await
            .unwrap();
        assert_eq!(sel.indices, vec![1, 2]);
        assert_eq!(sel.source, SelectionSource::Fallback);
        assert!(sel.reason.contains("malformed JSON"));
    }

    #[tokio::test]
    async fn test_empty_verdict_falls_back() {
        let candidates = teams(&[0.2, 0.9]);
        for script in [Script::Verdict(vec![]), Script::Verdict(vec![5, -3])] {
            let sel = ranker(script)
                .select(Uuid::nil(), &candidates, 5, &BTreeMap::new())
                .await
                .unwrap();
            assert_eq!(sel.indices, vec![1, 0]);
            assert_eq!(sel.source, SelectionSource::Fallback);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_judge_falls_back() {
        use crate::formation::judge::TimeoutJudge;

        let judge = TimeoutJudge::new(ScriptedJudge(Script::Hang), Duration::from_millis(50));
        let candidates = teams(&[0.3, 0.6]);
        let sel = CandidateRanker::new(Arc::new(judge))
            .select(Uuid::nil(), &candidates, 1, &BTreeMap::new())
            .await
            .unwrap();
        assert_eq!(sel.indices, vec![1]);
        assert_eq!(sel.source, SelectionSource::Fallback);
        assert!(sel.reason.contains("timed out"));
    }

    #[tokio::test]
    async fn test_zero_desired_is_the_only_error() {
        let candidates = teams(&[0.3]);
        assert!(ranker(Script::Fail)
            .select(Uuid::nil(), &candidates, 0, &BTreeMap::new())
            .await
            .is_err());

        let sel = ranker(Script::Fail)
            .select(Uuid::nil(), &[], 3, &BTreeMap::new())
            .await
            .unwrap();
        assert!(sel.indices.is_empty());
        assert!(sel.selected.is_empty());
    }

    #[test]
    fn test_request_wire_shape() {
        let candidates = teams(&[0.3, 0.6]);
        let request = JudgeRequest::new(Uuid::nil(), 1, &BTreeMap::new(), &candidates);
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["desired_team_count"], 1);
        assert_eq!(json["candidates"][1]["idx"], 1);
        assert_eq!(json["candidates"][1]["team"][0], 1);
        assert_eq!(request.deterministic_order(), vec![1, 0]);
    }

    #[test]
    fn test_verdict_tolerates_missing_fields() {
        let v: JudgeVerdict =
            serde_json::from_str(r#"{"selected_candidate_indices":[1,-2]}"#).unwrap();
        assert_eq!(v.selected_candidate_indices, vec![1, -2]);
        assert!(v.reason.is_empty());
    }
}
