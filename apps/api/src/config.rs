use std::str::FromStr;

use anyhow::{bail, Context, Result};

use crate::formation::model::SectionWeights;
use crate::formation::quality::QualityThresholds;
use crate::formation::EngineSettings;

/// Application configuration loaded from environment variables.
/// Every variable has a default except the optional API key and quality thresholds.
#[derive(Debug, Clone)]
pub struct Config {
    /// Absent ⇒ the deterministic `NullJudge` is used.
    pub anthropic_api_key: Option<String>,
    pub judge_timeout_ms: u64,
    pub port: u16,
    pub rust_log: String,
    pub engine: EngineSettings,
}

const QUALITY_VARS: [&str; 6] = [
    "QUALITY_MIN_COV",
    "QUALITY_MIN_BREADTH",
    "QUALITY_BREADTH_TAU",
    "QUALITY_CRITICAL_W",
    "QUALITY_CRITICAL_TAU",
    "QUALITY_MIN_CRITICAL_HIT",
];

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup (the process environment in
    /// production, a map in tests).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = EngineSettings::default();

        let alpha = SectionWeights {
            application: parse_or(&lookup, "ALPHA_APPLICATION", defaults.alpha.application)?,
            research: parse_or(&lookup, "ALPHA_RESEARCH", defaults.alpha.research)?,
        };
        alpha
            .validate()
            .context("ALPHA_APPLICATION / ALPHA_RESEARCH are invalid")?;

        let lambda_grid = match lookup("LAMBDA_GRID") {
            Some(raw) => parse_lambda_grid(&raw)?,
            None => defaults.lambda_grid,
        };

        let decay_k: f64 = parse_or(&lookup, "DECAY_K", defaults.decay_k)?;
        if !decay_k.is_finite() || decay_k < 0.0 {
            bail!("DECAY_K must be a finite number >= 0, got {decay_k}");
        }

        let engine = EngineSettings {
            exact_pool_limit: parse_or(&lookup, "EXACT_POOL_LIMIT", defaults.exact_pool_limit)?,
            max_pool_size: parse_or(&lookup, "MAX_POOL_SIZE", defaults.max_pool_size)?,
            max_team_size: parse_or(&lookup, "MAX_TEAM_SIZE", defaults.max_team_size)?,
            shortlist_size: parse_or(&lookup, "SHORTLIST_SIZE", defaults.shortlist_size)?,
            lambda_grid,
            decay_k,
            alpha,
            quality: parse_quality(&lookup)?,
        };
        if engine.shortlist_size == 0 {
            bail!("SHORTLIST_SIZE must be >= 1");
        }

        Ok(Config {
            anthropic_api_key: lookup("ANTHROPIC_API_KEY").filter(|k| !k.trim().is_empty()),
            judge_timeout_ms: parse_or(&lookup, "JUDGE_TIMEOUT_MS", 20_000)?,
            port: parse_or(&lookup, "PORT", 8080)
                .context("PORT must be a valid port number")?,
            rust_log: lookup("RUST_LOG").unwrap_or_else(|| "info".to_string()),
            engine,
        })
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("Environment variable '{key}' has an invalid value '{raw}'")),
        None => Ok(default),
    }
}

fn parse_lambda_grid(raw: &str) -> Result<Vec<f64>> {
    let grid = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<f64>()
                .with_context(|| format!("LAMBDA_GRID entry '{s}' is not a number"))
        })
        .collect::<Result<Vec<f64>>>()?;
    if grid.is_empty() {
        bail!("LAMBDA_GRID must contain at least one value");
    }
    if let Some(bad) = grid.iter().find(|l| !l.is_finite() || **l < 0.0) {
        bail!("LAMBDA_GRID values must be finite numbers >= 0, got {bad}");
    }
    Ok(grid)
}

/// The QUALITY_* group is all-or-none.
fn parse_quality(lookup: &impl Fn(&str) -> Option<String>) -> Result<Option<QualityThresholds>> {
    let present: Vec<&str> = QUALITY_VARS
        .iter()
        .copied()
        .filter(|&key| lookup(key).is_some())
        .collect();
    if present.is_empty() {
        return Ok(None);
    }
    if present.len() != QUALITY_VARS.len() {
        let missing: Vec<&str> = QUALITY_VARS
            .iter()
            .copied()
            .filter(|key| !present.contains(key))
            .collect();
        bail!("Quality thresholds are partially configured; missing {missing:?}");
    }

    let thresholds = QualityThresholds {
        min_cov: parse_or(lookup, "QUALITY_MIN_COV", 0.0)?,
        min_breadth: parse_or(lookup, "QUALITY_MIN_BREADTH", 0.0)?,
        breadth_tau: parse_or(lookup, "QUALITY_BREADTH_TAU", 0.0)?,
        critical_w: parse_or(lookup, "QUALITY_CRITICAL_W", 0.0)?,
        critical_tau: parse_or(lookup, "QUALITY_CRITICAL_TAU", 0.0)?,
        min_critical_hit: parse_or(lookup, "QUALITY_MIN_CRITICAL_HIT", 0.0)?,
    };
    thresholds
        .validate()
        .context("QUALITY_* thresholds are invalid")?;
    Ok(Some(thresholds))
}
