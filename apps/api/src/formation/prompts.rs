// LLM prompt constants for the team judge.
// Reuses the JSON-only fragment from llm_client::prompts.

use crate::llm_client::prompts::JSON_ONLY_SYSTEM;

/// System prompt for final team selection.
pub fn judge_system() -> String {
    format!("{JUDGE_SYSTEM_BODY} {JSON_ONLY_SYSTEM}")
}

const JUDGE_SYSTEM_BODY: &str = "You are selecting final recommendations from pre-ranked \
    candidate teams for a funding opportunity. Each team was scored by how well the \
    members jointly cover the opportunity's weighted requirements.";

/// Judge prompt template. Replace `{desired_team_count}` and `{report_json}` before sending.
pub const JUDGE_PROMPT_TEMPLATE: &str = r#"The report below contains:
- opportunity_id
- desired_team_count
- requirement_weights by section and requirement index (importance weights)
- candidates[], each with idx, team (candidate ids), score (weighted coverage),
  final_coverage and member_coverages

Decision objective:
1. Primary: maximize weighted quality using requirement_weights and coverage.
2. Secondary: choose a diverse set of teams (avoid near-duplicates when quality is similar).
3. Use member_coverages to check that each selected team has complementary roles.

Weight handling:
- Prefer teams that cover high-weight requirements strongly.
- Low-weight coverage must not outweigh missing high-weight coverage.

Hard constraints:
- Return only indices that exist in candidates[].idx.
- No duplicates in selected_candidate_indices.
- Select exactly {desired_team_count} indices when possible, otherwise as many valid ones as exist.
- Do not invent candidate ids, scores or indices.

Tie-break policy: higher score, then better coverage spread across sections, then smaller idx.

Return a JSON object with this EXACT schema (no extra fields):
{
  "selected_candidate_indices": [0, 2],
  "reason": "Concise justification referencing score, coverage and complementarity"
}

Report:
{report_json}"#;

pub fn build_judge_prompt(desired_team_count: usize, report_json: &str) -> String {
    JUDGE_PROMPT_TEMPLATE
        .replace("{desired_team_count}", &desired_team_count.to_string())
        .replace("{report_json}", report_json)
}
