//! Team judge backends.
//!
//! - `NullJudge`: deterministic ranking, no I/O. Used when no API key is configured.
//! - `TimeoutJudge<J>`: bounds any judge; the inner future is dropped on expiry.
//! - `LlmTeamJudge`: Claude via the shared `LlmClient`.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::formation::prompts::{build_judge_prompt, judge_system};
use crate::formation::ranker::{JudgeError, JudgeRequest, JudgeVerdict, TeamJudge};
use crate::llm_client::LlmClient;

// ────────────────────────────────────────────────────────────────────────────
// NullJudge
// ────────────────────────────────────────────────────────────────────────────

pub struct NullJudge;

#[async_trait]
impl TeamJudge for NullJudge {
    fn name(&self) -> &'static str {
        "null"
    }

    async fn judge(&self, request: &JudgeRequest) -> Result<JudgeVerdict, JudgeError> {
        let selected_candidate_indices = request
            .deterministic_order()
            .into_iter()
            .take(request.desired_team_count)
            .map(|i| i as i64)
            .collect();
        Ok(JudgeVerdict {
            selected_candidate_indices,
            reason: "ranked by team score".to_string(),
        })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// TimeoutJudge
// ────────────────────────────────────────────────────────────────────────────

pub struct TimeoutJudge<J> {
    inner: J,
    timeout: Duration,
}

impl<J: TeamJudge> TimeoutJudge<J> {
    pub fn new(inner: J, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait]
impl<J: TeamJudge> TeamJudge for TimeoutJudge<J> {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn judge(&self, request: &JudgeRequest) -> Result<JudgeVerdict, JudgeError> {
        tokio::time::timeout(self.timeout, self.inner.judge(request))
            .await
            .map_err(|_| JudgeError::Timeout(self.timeout))?
    }
}

// ────────────────────────────────────────────────────────────────────────────
// LlmTeamJudge
// ────────────────────────────────────────────────────────────────────────────

pub struct LlmTeamJudge {
    llm: LlmClient,
}

impl LlmTeamJudge {
    pub fn new(llm: LlmClient) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl TeamJudge for LlmTeamJudge {
    fn name(&self) -> &'static str {
        "llm"
    }

    async fn judge(&self, request: &JudgeRequest) -> Result<JudgeVerdict, JudgeError> {
        let report_json = serde_json::to_string_pretty(request)
            .map_err(|e| JudgeError::Unusable(format!("could not serialise judge report: {e}")))?;
        let prompt = build_judge_prompt(request.desired_team_count, &report_json);

        debug!(
            candidates = request.candidates.len(),
            desired = request.desired_team_count,
            "Calling LLM team judge"
        );

        Ok(self
            .llm
            .call_json::<JudgeVerdict>(&prompt, &judge_system())
            .await?)
    }
}
