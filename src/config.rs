// src/config.rs
//! Engine configuration resolved from the environment with file fallbacks.
//!
//! Lookup order for each file:
//! 1) explicit env var (must point at an existing file)
//! 2) default path under `config/`
//! 3) built-in defaults

use anyhow::{anyhow, Context, Result};
use std::path::PathBuf;
use tracing::info;

use crate::columns::ColumnAliases;
use crate::features::CoercionPolicy;
use crate::model::ClusterModel;
use crate::scorer::DEFAULT_PARALLEL_MIN_ROWS;

pub const ENV_MODEL_PATH: &str = "BRANCH_RISK_MODEL_PATH";
pub const ENV_COLUMNS_PATH: &str = "BRANCH_RISK_COLUMNS_PATH";
pub const ENV_COERCION: &str = "BRANCH_RISK_COERCION";
pub const ENV_PARALLEL_MIN_ROWS: &str = "BRANCH_RISK_PARALLEL_MIN_ROWS";
pub const ENV_METRICS: &str = "BRANCH_RISK_METRICS";
pub const ENV_DEV_LOG: &str = "BRANCH_RISK_DEV_LOG";

pub const DEFAULT_MODEL_PATH: &str = "config/model.toml";
pub const DEFAULT_COLUMNS_PATH: &str = "config/columns.toml";

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Calibration file; `None` means the built-in model.
    pub model_path: Option<PathBuf>,
    /// Header alias file; `None` means the built-in spreadsheet headers.
    pub columns_path: Option<PathBuf>,
    pub coercion: CoercionPolicy,
    pub parallel_min_rows: usize,
    pub metrics: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model_path: None,
            columns_path: None,
            coercion: CoercionPolicy::Lenient,
            parallel_min_rows: DEFAULT_PARALLEL_MIN_ROWS,
            metrics: false,
        }
    }
}

impl EngineConfig {
    /// Resolve from process env (after `dotenvy` has run, if at all).
    pub fn from_env() -> Result<Self> {
        let model_path = resolve_path(ENV_MODEL_PATH, DEFAULT_MODEL_PATH)?;
        let columns_path = resolve_path(ENV_COLUMNS_PATH, DEFAULT_COLUMNS_PATH)?;

        let coercion = match std::env::var(ENV_COERCION) {
            Ok(v) => v.parse().with_context(|| format!("{ENV_COERCION}={v}"))?,
            Err(_) => CoercionPolicy::default(),
        };

        let parallel_min_rows = match std::env::var(ENV_PARALLEL_MIN_ROWS) {
            Ok(v) => v
                .trim()
                .parse::<usize>()
                .with_context(|| format!("{ENV_PARALLEL_MIN_ROWS}={v}"))?,
            Err(_) => DEFAULT_PARALLEL_MIN_ROWS,
        };

        let metrics = std::env::var(ENV_METRICS).ok().as_deref() == Some("1");

        Ok(Self {
            model_path,
            columns_path,
            coercion,
            parallel_min_rows,
            metrics,
        })
    }

    /// Load the calibration named by this config.
    pub fn load_model(&self) -> Result<ClusterModel> {
        match &self.model_path {
            Some(p) => {
                let model = ClusterModel::load(p)
                    .with_context(|| format!("loading calibration from {}", p.display()))?;
                info!(path = %p.display(), model = %model.fingerprint(), "calibration loaded");
                Ok(model)
            }
            None => {
                let model = ClusterModel::default();
                info!(model = %model.fingerprint(), "using built-in calibration");
                Ok(model)
            }
        }
    }

    pub fn load_aliases(&self) -> ColumnAliases {
        match &self.columns_path {
            Some(p) => ColumnAliases::load_from_file(p),
            None => ColumnAliases::default_seed(),
        }
    }
}

fn resolve_path(env_key: &str, default: &str) -> Result<Option<PathBuf>> {
    if let Ok(p) = std::env::var(env_key) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return Ok(Some(pb));
        }
        return Err(anyhow!("{env_key} points to non-existent path {}", pb.display()));
    }
    let pb = PathBuf::from(default);
    Ok(pb.exists().then_some(pb))
}

/// Dev-only verbose logging: BRANCH_RISK_DEV_LOG=1 AND a dev environment
/// (debug build or SHUTTLE_ENV in {local, development, dev}).
pub(crate) fn dev_logging_enabled() -> bool {
    let on = std::env::var(ENV_DEV_LOG).ok().as_deref() == Some("1");
    if !on {
        return false;
    }
    if cfg!(debug_assertions) {
        return true;
    }
    matches!(
        std::env::var("SHUTTLE_ENV")
            .unwrap_or_default()
            .to_ascii_lowercase()
            .as_str(),
        "local" | "development" | "dev"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{env, fs};

    fn clear_env() {
        for k in [
            ENV_MODEL_PATH,
            ENV_COLUMNS_PATH,
            ENV_COERCION,
            ENV_PARALLEL_MIN_ROWS,
            ENV_METRICS,
        ] {
            env::remove_var(k);
        }
    }

    #[serial_test::serial]
    #[test]
    fn defaults_without_env_or_files() {
        let old = env::current_dir().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        env::set_current_dir(tmp.path()).unwrap();
        clear_env();

        let cfg = EngineConfig::from_env().unwrap();
        assert_eq!(cfg, EngineConfig::default());
        assert_eq!(cfg.load_model().unwrap(), ClusterModel::default());

        env::set_current_dir(&old).unwrap();
    }

    #[serial_test::serial]
    #[test]
    fn env_overrides_and_validation() {
        let old = env::current_dir().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        env::set_current_dir(tmp.path()).unwrap();
        clear_env();

        let model = tmp.path().join("m.toml");
        fs::write(
            &model,
            "[[segments]]\nlabel=\"0_0\"\nintercept=1.0\n\
             [[segments]]\nlabel=\"0_1\"\nintercept=2.0\n\
             [[segments]]\nlabel=\"Main_1\"\nintercept=3.0\n",
        )
        .unwrap();
        env::set_var(ENV_MODEL_PATH, model.display().to_string());
        env::set_var(ENV_COERCION, "strict");
        env::set_var(ENV_PARALLEL_MIN_ROWS, "16");

        let cfg = EngineConfig::from_env().unwrap();
        assert_eq!(cfg.coercion, CoercionPolicy::Strict);
        assert_eq!(cfg.parallel_min_rows, 16);
        let m = cfg.load_model().unwrap();
        assert_eq!(m.segments()[2].intercept, 3.0);

        env::set_var(ENV_COERCION, "sloppy");
        assert!(EngineConfig::from_env().is_err());
        env::remove_var(ENV_COERCION);

        env::set_var(ENV_MODEL_PATH, tmp.path().join("nope.toml").display().to_string());
        assert!(EngineConfig::from_env().is_err());

        clear_env();
        env::set_current_dir(&old).unwrap();
    }
}
