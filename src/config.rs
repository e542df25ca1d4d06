//! Top-level configuration loading: reads the TOML rule document, loads region files, resolves
//! the timezone, and produces a validated, ready-to-run `EngineConfig`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono_tz::Tz;
use tracing::warn;

use crate::errors::{ConfigError, ConfigResult};
use crate::lists::AircraftListSet;
use crate::region::{RegionFile, RegionSet};
use crate::rules::{compile, validate_known_keys, RawConfig, RuleSet};

pub struct EngineConfig {
    pub rules: RuleSet,
    pub lists: AircraftListSet,
    pub regions: RegionSet,
    pub timezone: Tz,
    pub expiry_secs: i64,
}

impl EngineConfig {
    /// Load and validate a full engine configuration from `path`. `known_callbacks` is the set
    /// of handler names the host process has already registered with the dispatcher; any rule
    /// action naming a callback outside this set fails validation.
    pub fn load(path: &Path, known_callbacks: &[&str]) -> Result<Self> {
        let contents = std::fs::read_to_string(path).with_context(|| format!("failed to read {path:?}"))?;

        let generic: toml::Value = toml::from_str(&contents).with_context(|| format!("failed to parse {path:?}"))?;
        validate_known_keys(&generic)?;

        let raw: RawConfig = toml::from_str(&contents).with_context(|| format!("failed to parse {path:?}"))?;

        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        let region_files = load_region_files(&raw.config.kmls, base_dir)?;
        let regions = RegionSet::new(region_files);

        let timezone = resolve_timezone(raw.config.timezone.as_deref())?;
        let expiry_secs = raw.config.expiry_secs.unwrap_or(crate::flight::DEFAULT_EXPIRY_SECS);

        let (rules, lists) = compile(raw, known_callbacks)?;

        Ok(Self { rules, lists, regions, timezone, expiry_secs })
    }
}

fn load_region_files(paths: &[String], base_dir: &Path) -> ConfigResult<Vec<RegionFile>> {
    paths
        .iter()
        .map(|p| {
            let resolved = resolve_relative(p, base_dir);
            RegionFile::load_kml(&resolved)
        })
        .collect()
}

fn resolve_relative(raw: &str, base_dir: &Path) -> PathBuf {
    let p = Path::new(raw);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        base_dir.join(p)
    }
}

/// Resolve the configured IANA timezone name, defaulting to UTC with a startup warning when
/// unset.
fn resolve_timezone(name: Option<&str>) -> ConfigResult<Tz> {
    match name {
        Some(name) => name.parse::<Tz>().map_err(|_| ConfigError::InvalidCondition {
            rule: "config.timezone".to_string(),
            key: "timezone".to_string(),
            reason: format!("unrecognized IANA timezone name {name:?}"),
        }),
        None => {
            warn!("no config.timezone set; min_time/max_time will use UTC");
            Ok(chrono_tz::UTC)
        }
    }
}

/// Atomically persist a derived config snapshot (e.g. for a reload-on-SIGHUP workflow): write to
/// a temp file in the same directory, then rename over the target.
pub fn save_toml(value: &impl serde::Serialize, path: &Path) -> Result<()> {
    let contents = toml::to_string_pretty(value).context("failed to serialize config to TOML")?;
    let tmp_path = path.with_extension("toml.tmp");
    std::fs::write(&tmp_path, &contents).with_context(|| format!("failed to write {tmp_path:?}"))?;
    std::fs::rename(&tmp_path, path).with_context(|| format!("failed to rename {tmp_path:?} to {path:?}"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_explicit_timezone() {
        let tz = resolve_timezone(Some("America/New_York")).unwrap();
        assert_eq!(tz, chrono_tz::America::New_York);
    }

    #[test]
    fn defaults_to_utc_when_unset() {
        let tz = resolve_timezone(None).unwrap();
        assert_eq!(tz, chrono_tz::UTC);
    }

    #[test]
    fn rejects_unknown_timezone() {
        assert!(resolve_timezone(Some("Nowhere/Place")).is_err());
    }

    #[test]
    fn load_parses_minimal_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.toml");
        std::fs::write(
            &path,
            r#"
            [config]
            kmls = []

            [rules.low]
            conditions = { max_alt = 1000 }
            actions = { print = true }
            "#,
        )
        .unwrap();

        let config = EngineConfig::load(&path, &[]).unwrap();
        assert_eq!(config.rules.len(), 1);
        assert!(config.regions.is_empty());
    }
}
