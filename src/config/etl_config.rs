use anyhow::{Context, Result, anyhow};
use chrono_tz::Tz;
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

/// Config file consulted when `ETL_CONFIG_FILE` is not set. Missing is fine.
pub const DEFAULT_CONFIG_FILE: &str = "src/configs/etl.toml";

/// Every environment override starts with this prefix, e.g. `ETL_INPUT_PATH`.
pub const ENV_PREFIX: &str = "ETL";

pub const DEFAULT_BATCH_SIZE: usize = 10_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EtlConfig {
    pub input_path: PathBuf,
    pub duplicates_path: PathBuf,
    pub report_path: PathBuf,
    // Validator rejects are only archived when this is set
    #[serde(default)]
    pub rejected_path: Option<PathBuf>,
    /// Server-level connection string (key/value or URL form). The target
    /// database is selected separately through `database_name`.
    pub connection_target: String,
    pub database_name: String,
    /// IANA zone the pickup timestamps are recorded in.
    pub civil_time_zone: String,
    pub batch_size: usize,
}

impl EtlConfig {
    /// Loads defaults, then the TOML file named by `ETL_CONFIG_FILE` (or
    /// [`DEFAULT_CONFIG_FILE`]), then `ETL_*` environment variables.
    pub fn load() -> Result<Self> {
        let path = env::var("ETL_CONFIG_FILE").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        let config = Self::from_sources(Some(Path::new(&path)), true)?;
        config.validate()?;
        Ok(config)
    }

    #[allow(dead_code)]
    pub fn from_file(path: &Path) -> Result<Self> {
        Self::from_sources(Some(path), false)
    }

    pub fn from_sources(file: Option<&Path>, with_env: bool) -> Result<Self> {
        let defaults = Self::default();

        let mut builder = Config::builder()
            .set_default("input_path", path_str(&defaults.input_path))?
            .set_default("duplicates_path", path_str(&defaults.duplicates_path))?
            .set_default("report_path", path_str(&defaults.report_path))?
            .set_default("connection_target", defaults.connection_target.clone())?
            .set_default("database_name", defaults.database_name.clone())?
            .set_default("civil_time_zone", defaults.civil_time_zone.clone())?
            .set_default("batch_size", defaults.batch_size as i64)?;

        if let Some(path) = file {
            builder = builder.add_source(
                File::new(&path.to_string_lossy(), FileFormat::Toml).required(false),
            );
        }

        if with_env {
            builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true));
        }

        let config: EtlConfig = builder
            .build()
            .context("Failed to assemble ETL configuration")?
            .try_deserialize()
            .context("Failed to deserialize ETL configuration")?;

        Ok(config)
    }

    pub fn time_zone(&self) -> Result<Tz> {
        self.civil_time_zone
            .parse::<Tz>()
            .map_err(|e| anyhow!("Unknown civil time zone '{}': {}", self.civil_time_zone, e))
    }

    pub fn validate(&self) -> Result<()> {
        for (name, path) in [
            ("input_path", &self.input_path),
            ("duplicates_path", &self.duplicates_path),
            ("report_path", &self.report_path),
        ] {
            if path.as_os_str().is_empty() {
                return Err(anyhow!("{} cannot be empty", name));
            }
        }

        if let Some(rejected) = &self.rejected_path {
            if rejected.as_os_str().is_empty() {
                return Err(anyhow!("rejected_path cannot be empty when set"));
            }
        }

        if self.connection_target.trim().is_empty() {
            return Err(anyhow!("connection_target cannot be empty"));
        }

        self.connection_target
            .parse::<tokio_postgres::Config>()
            .with_context(|| "connection_target is not a valid PostgreSQL connection string")?;

        if !is_plain_identifier(&self.database_name) {
            return Err(anyhow!(
                "database_name '{}' must be 1-63 ASCII letters, digits or underscores and not start with a digit",
                self.database_name
            ));
        }

        if self.batch_size == 0 {
            return Err(anyhow!("batch_size must be greater than zero"));
        }

        self.time_zone()?;

        Ok(())
    }
}

impl Default for EtlConfig {
    fn default() -> Self {
        Self {
            input_path: PathBuf::from("sample-cab-data.csv"),
            duplicates_path: PathBuf::from("duplicates.csv"),
            report_path: PathBuf::from("row-count.txt"),
            rejected_path: None,
            connection_target: "host=localhost user=postgres".to_string(),
            database_name: "ETLApp".to_string(),
            civil_time_zone: "America/New_York".to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

// The name is spliced into CREATE DATABASE, which takes no bind parameters.
fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    name.len() <= 63 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = EtlConfig::default();
        assert_eq!(config.input_path, PathBuf::from("sample-cab-data.csv"));
        assert_eq!(config.duplicates_path, PathBuf::from("duplicates.csv"));
        assert_eq!(config.report_path, PathBuf::from("row-count.txt"));
        assert_eq!(config.database_name, "ETLApp");
        assert_eq!(config.batch_size, 10_000);
        assert!(config.rejected_path.is_none());
        assert_eq!(config.time_zone().unwrap(), chrono_tz::America::New_York);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_sources_without_file_match_defaults() {
        let config = EtlConfig::from_sources(None, false).unwrap();
        let defaults = EtlConfig::default();
        assert_eq!(config.input_path, defaults.input_path);
        assert_eq!(config.connection_target, defaults.connection_target);
        assert_eq!(config.civil_time_zone, defaults.civil_time_zone);
        assert_eq!(config.batch_size, defaults.batch_size);
    }

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
input_path = "data/trips.csv"
rejected_path = "out/rejected.csv"
civil_time_zone = "America/Chicago"
batch_size = 500
"#
        )
        .unwrap();

        let config = EtlConfig::from_sources(Some(file.path()), false).unwrap();
        assert_eq!(config.input_path, PathBuf::from("data/trips.csv"));
        assert_eq!(config.rejected_path, Some(PathBuf::from("out/rejected.csv")));
        assert_eq!(config.time_zone().unwrap(), chrono_tz::America::Chicago);
        assert_eq!(config.batch_size, 500);
        // untouched keys keep their defaults
        assert_eq!(config.report_path, PathBuf::from("row-count.txt"));
    }

    #[test]
    fn test_missing_file_is_not_an_error() {
        let config =
            EtlConfig::from_sources(Some(Path::new("does/not/exist/etl.toml")), false).unwrap();
        assert_eq!(config.database_name, "ETLApp");
    }

    #[test]
    fn test_environment_overrides() {
        unsafe {
            env::set_var("ETL_DUPLICATES_PATH", "/tmp/env-duplicates.csv");
        }

        let config = EtlConfig::from_sources(None, true).unwrap();
        assert_eq!(config.duplicates_path, PathBuf::from("/tmp/env-duplicates.csv"));

        unsafe {
            env::remove_var("ETL_DUPLICATES_PATH");
        }
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = EtlConfig::default();
        config.civil_time_zone = "Mars/Olympus_Mons".to_string();
        assert!(config.validate().is_err());

        let mut config = EtlConfig::default();
        config.batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = EtlConfig::default();
        config.database_name = "ETLApp; DROP DATABASE postgres".to_string();
        assert!(config.validate().is_err());

        let mut config = EtlConfig::default();
        config.input_path = PathBuf::new();
        assert!(config.validate().is_err());

        let mut config = EtlConfig::default();
        config.connection_target = "   ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_plain_identifier() {
        assert!(is_plain_identifier("ETLApp"));
        assert!(is_plain_identifier("_trips_2024"));
        assert!(!is_plain_identifier("2024trips"));
        assert!(!is_plain_identifier("trip-data"));
        assert!(!is_plain_identifier(""));
    }
}
