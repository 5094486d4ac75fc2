//! Runtime configuration from the environment, optionally preloaded from an env file.

use crate::client::{Endpoints, RetryPolicy};
use crate::db::store::SchemaSource;
use crate::error::{Error, Result};
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_DATABASE: &str = "xstock.db";
pub const DEFAULT_DATASET_ROOT_URL: &str =
    "https://oedi-data-lake.s3.amazonaws.com/nrel-pds-building-stock/end-use-load-profiles-for-us-building-stock";
pub const DEFAULT_WEATHER_INDEX_URL: &str = "https://raw.githubusercontent.com/NREL/EnergyPlus/develop/weather/master.geojson";
pub const DEFAULT_SCHEDULE_URL: &str = "https://raw.githubusercontent.com/NREL/resstock/develop/files/8760.csv";
pub const DEFAULT_WEATHER_PROVIDER: &str = "TMY3";
pub const DEFAULT_MAX_REQUEST_RETRIES: u32 = 5;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Clone)]
pub struct Config {
    pub database: PathBuf,
    /// Explicit migrations directory; embedded migrations when unset.
    pub schema_dir: Option<PathBuf>,
    pub dataset_root_url: String,
    pub weather_index_url: String,
    pub schedule_url: String,
    /// Geo-index title suffix kept when resolving weather (e.g. "TMY3").
    pub weather_provider: String,
    pub max_request_retries: NonZeroU32,
    pub request_timeout: Duration,
    pub energyplus_exe: PathBuf,
    pub openstudio_exe: PathBuf,
    pub energyplus_idd: Option<PathBuf>,
    pub output_root: PathBuf,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let text = |key: &str, default: &str| var(key).unwrap_or_else(|| default.to_string());
        let path = |key: &str, default: &str| PathBuf::from(text(key, default));

        let max_request_retries = match var("MAX_REQUEST_RETRIES") {
            Some(raw) => raw
                .parse::<NonZeroU32>()
                .map_err(|_| Error::Config(format!("MAX_REQUEST_RETRIES must be a positive integer, got '{}'", raw)))?,
            None => NonZeroU32::new(DEFAULT_MAX_REQUEST_RETRIES)
                .ok_or_else(|| Error::Config("default retry budget is zero".to_string()))?,
        };
        let timeout_secs = match var("REQUEST_TIMEOUT_SECS") {
            Some(raw) => raw
                .parse::<u64>()
                .map_err(|_| Error::Config(format!("REQUEST_TIMEOUT_SECS must be a number of seconds, got '{}'", raw)))?,
            None => DEFAULT_REQUEST_TIMEOUT_SECS,
        };

        Ok(Config {
            database: path("XSTOCK_DATABASE", DEFAULT_DATABASE),
            schema_dir: var("XSTOCK_SCHEMA_DIR").map(PathBuf::from),
            dataset_root_url: text("XSTOCK_DATASET_ROOT_URL", DEFAULT_DATASET_ROOT_URL),
            weather_index_url: text("XSTOCK_WEATHER_INDEX_URL", DEFAULT_WEATHER_INDEX_URL),
            schedule_url: text("XSTOCK_SCHEDULE_URL", DEFAULT_SCHEDULE_URL),
            weather_provider: text("XSTOCK_WEATHER_PROVIDER", DEFAULT_WEATHER_PROVIDER),
            max_request_retries,
            request_timeout: Duration::from_secs(timeout_secs),
            energyplus_exe: path("ENERGYPLUS_EXE", "energyplus"),
            openstudio_exe: path("OPENSTUDIO_EXE", "openstudio"),
            energyplus_idd: var("ENERGYPLUS_IDD").map(PathBuf::from),
            output_root: path("XSTOCK_OUTPUT_ROOT", "."),
        })
    }

    pub fn schema_source(&self) -> SchemaSource {
        match &self.schema_dir {
            Some(dir) => SchemaSource::Directory(dir.clone()),
            None => SchemaSource::Embedded,
        }
    }

    pub fn endpoints(&self) -> Endpoints {
        Endpoints {
            dataset_root_url: self.dataset_root_url.clone(),
            weather_index_url: self.weather_index_url.clone(),
            schedule_url: self.schedule_url.clone(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_request_retries)
    }
}

/// Load `KEY=value` lines into the process environment.
/// Variables already set in the environment keep their value.
pub fn load_env_file(path: &Path) -> Result<()> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("failed to read {}: {}", path.display(), e)))?;
    for (index, line) in content.lines().enumerate() {
        let parsed = parse_env_assignment(line).map_err(|e| Error::Config(format!("{}:{}: {}", path.display(), index + 1, e)))?;
        if let Some((key, value)) = parsed {
            if std::env::var_os(&key).is_none() {
                // Mutating the process environment is unsafe once threads exist; this runs before any are spawned.
                unsafe {
                    std::env::set_var(key, value);
                }
            }
        }
    }
    Ok(())
}

fn parse_env_assignment(line: &str) -> std::result::Result<Option<(String, String)>, String> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }
    let assignment = trimmed.strip_prefix("export ").map(str::trim_start).unwrap_or(trimmed);
    let (key, raw) = assignment.split_once('=').ok_or_else(|| "missing '=' in assignment".to_string())?;
    let key = key.trim();
    if key.is_empty() || key.chars().any(char::is_whitespace) {
        return Err(format!("invalid environment variable name '{}'", key));
    }
    Ok(Some((key.to_string(), parse_env_value(raw.trim())?)))
}

fn parse_env_value(raw: &str) -> std::result::Result<String, String> {
    let Some(quote) = raw.chars().next().filter(|c| *c == '"' || *c == '\'') else {
        return Ok(raw.split('#').next().unwrap_or_default().trim_end().to_string());
    };

    let mut value = String::new();
    let mut chars = raw[1..].chars();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' if quote == '"' => match chars.next() {
                Some('n') => value.push('\n'),
                Some('t') => value.push('\t'),
                Some('r') => value.push('\r'),
                Some(other) => value.push(other),
                None => return Err("unterminated escape sequence".to_string()),
            },
            c if c == quote => {
                let rest = chars.as_str().trim();
                return if rest.is_empty() || rest.starts_with('#') {
                    Ok(value)
                } else {
                    Err("unexpected characters after closing quote".to_string())
                };
            }
            c => value.push(c),
        }
    }
    Err("unterminated quoted value".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.database, PathBuf::from("xstock.db"));
        assert_eq!(cfg.max_request_retries.get(), 5);
        assert_eq!(cfg.request_timeout, Duration::from_secs(300));
        assert_eq!(cfg.weather_provider, "TMY3");
        assert!(matches!(cfg.schema_source(), SchemaSource::Embedded));
        assert!(cfg.energyplus_idd.is_none());
    }

    #[test]
    fn overrides_are_read() {
        let cfg = config(&[
            ("XSTOCK_DATABASE", "/data/x.db"),
            ("XSTOCK_SCHEMA_DIR", "/schema"),
            ("MAX_REQUEST_RETRIES", "2"),
            ("ENERGYPLUS_IDD", " /opt/Energy+.idd "),
        ])
        .unwrap();
        assert_eq!(cfg.database, PathBuf::from("/data/x.db"));
        assert_eq!(cfg.max_request_retries.get(), 2);
        assert_eq!(cfg.energyplus_idd, Some(PathBuf::from("/opt/Energy+.idd")));
        assert!(matches!(cfg.schema_source(), SchemaSource::Directory(ref p) if p == Path::new("/schema")));
    }

    #[test]
    fn zero_or_garbled_retries_are_rejected() {
        assert!(matches!(config(&[("MAX_REQUEST_RETRIES", "0")]), Err(Error::Config(_))));
        assert!(matches!(config(&[("MAX_REQUEST_RETRIES", "many")]), Err(Error::Config(_))));
        assert!(matches!(config(&[("REQUEST_TIMEOUT_SECS", "-1")]), Err(Error::Config(_))));
    }

    #[test]
    fn parses_env_file_lines() {
        assert_eq!(parse_env_assignment("# comment").unwrap(), None);
        assert_eq!(
            parse_env_assignment("export XSTOCK_DATABASE=/tmp/x.db # local").unwrap(),
            Some(("XSTOCK_DATABASE".into(), "/tmp/x.db".into()))
        );
        assert_eq!(
            parse_env_assignment(r#"RUST_LOG="debug\tinfo""#).unwrap(),
            Some(("RUST_LOG".into(), "debug\tinfo".into()))
        );
        assert_eq!(parse_env_assignment("A='#not a comment'").unwrap(), Some(("A".into(), "#not a comment".into())));
        assert!(parse_env_assignment("NO_EQUALS").is_err());
        assert!(parse_env_assignment("A=\"open").is_err());
    }
}
