use anyhow::Context;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::db;

pub const POLICY_SETTINGS_KEY: &str = "records.policy";
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;

/// Process-level configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub workspace: Option<PathBuf>,
    pub log_filter: String,
    pub busy_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace: None,
            log_filter: "info".to_string(),
            busy_timeout: Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS),
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let mut cfg = Config::default();
        if let Some(ws) = non_empty_var("RECORDSD_WORKSPACE") {
            cfg.workspace = Some(PathBuf::from(ws));
        }
        if let Some(filter) = non_empty_var("RECORDSD_LOG") {
            cfg.log_filter = filter;
        }
        if let Some(raw) = non_empty_var("RECORDSD_BUSY_TIMEOUT_MS") {
            let ms: u64 = raw
                .trim()
                .parse()
                .with_context(|| format!("RECORDSD_BUSY_TIMEOUT_MS must be an integer, got {raw:?}"))?;
            cfg.busy_timeout = Duration::from_millis(ms);
        }
        Ok(cfg)
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Workspace policy knobs stored in the settings table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecordsPolicy {
    /// When set, grades must be a multiple of this step (e.g. 0.5).
    pub grade_step: Option<f64>,
    pub pass_threshold: f64,
    pub writes_require_active_cycle: bool,
}

impl Default for RecordsPolicy {
    fn default() -> Self {
        Self {
            grade_step: None,
            pass_threshold: 7.0,
            writes_require_active_cycle: true,
        }
    }
}

impl RecordsPolicy {
    pub fn load(conn: &Connection) -> anyhow::Result<Self> {
        match db::settings_get_json(conn, POLICY_SETTINGS_KEY)? {
            Some(v) => serde_json::from_value(v).context("stored records policy is malformed"),
            None => Ok(RecordsPolicy::default()),
        }
    }

    pub fn save(&self, conn: &Connection) -> anyhow::Result<()> {
        let v = serde_json::to_value(self).context("failed to serialize records policy")?;
        db::settings_set_json(conn, POLICY_SETTINGS_KEY, &v)
    }

    pub fn validate(&self) -> Result<(), String> {
        if let Some(step) = self.grade_step {
            if !step.is_finite() || step <= 0.0 || step > 10.0 {
                return Err("gradeStep must be in (0, 10]".to_string());
            }
        }
        if !self.pass_threshold.is_finite() || !(0.0..=10.0).contains(&self.pass_threshold) {
            return Err("passThreshold must be in [0, 10]".to_string());
        }
        Ok(())
    }
}
