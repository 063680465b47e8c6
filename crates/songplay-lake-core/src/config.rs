//! Run configuration: input and output roots plus optional credentials.
//!
//! The file format is TOML:
//!
//! ```toml
//! input_root = "data/input"
//! output_root = "data/output"
//! latest_users = false
//!
//! [aws]
//! access_key_id = "..."
//! secret_access_key = "..."
//! ```
//!
//! Every key is optional. The `[aws]` table, when present, must carry both
//! values non-empty. Credentials are handed to the storage collaborators;
//! nothing is exported to the process environment.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use snafu::prelude::*;

use crate::storage::StorageCredentials;

/// Input root used when neither the file nor the caller sets one.
pub const DEFAULT_INPUT_ROOT: &str = "data/input";
/// Output root used when neither the file nor the caller sets one.
pub const DEFAULT_OUTPUT_ROOT: &str = "data/output";

/// Errors loading a configuration file.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ConfigError {
    /// The file could not be read.
    #[snafu(display("Failed to read config file {}: {source}", path.display()))]
    Read {
        /// Config file path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The file is not valid TOML or has unexpected keys.
    #[snafu(display("Failed to parse config file {}: {source}", path.display()))]
    Parse {
        /// Config file path.
        path: PathBuf,
        /// Underlying TOML error.
        source: toml::de::Error,
    },

    /// An `[aws]` value is present but empty.
    #[snafu(display("Config file {}: aws.{key} must not be empty", path.display()))]
    MissingCredential {
        /// Config file path.
        path: PathBuf,
        /// The empty key.
        key: &'static str,
    },
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    input_root: Option<PathBuf>,
    output_root: Option<PathBuf>,
    latest_users: Option<bool>,
    aws: Option<AwsSection>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AwsSection {
    access_key_id: String,
    secret_access_key: String,
}

/// Effective settings of one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Root that the catalog and event patterns are resolved against.
    pub input_root: PathBuf,
    /// Root that tables are written under.
    pub output_root: PathBuf,
    /// Backend credentials, if configured.
    pub credentials: Option<StorageCredentials>,
    /// Also write the `users_latest` table.
    pub latest_users: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            input_root: PathBuf::from(DEFAULT_INPUT_ROOT),
            output_root: PathBuf::from(DEFAULT_OUTPUT_ROOT),
            credentials: None,
            latest_users: false,
        }
    }
}

impl PipelineConfig {
    /// Parse TOML text; `path` is only used in error messages.
    pub fn from_toml_str(path: &Path, text: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(text).context(ParseSnafu { path })?;
        let defaults = Self::default();

        let credentials = match file.aws {
            None => None,
            Some(aws) => {
                ensure!(
                    !aws.access_key_id.trim().is_empty(),
                    MissingCredentialSnafu {
                        path,
                        key: "access_key_id",
                    }
                );
                ensure!(
                    !aws.secret_access_key.trim().is_empty(),
                    MissingCredentialSnafu {
                        path,
                        key: "secret_access_key",
                    }
                );
                Some(StorageCredentials {
                    access_key_id: aws.access_key_id,
                    secret_access_key: aws.secret_access_key,
                })
            }
        };

        Ok(Self {
            input_root: file.input_root.unwrap_or(defaults.input_root),
            output_root: file.output_root.unwrap_or(defaults.output_root),
            credentials,
            latest_users: file.latest_users.unwrap_or(defaults.latest_users),
        })
    }

    /// Read and parse the config file at `path`.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .context(ReadSnafu { path })?;
        Self::from_toml_str(path, &text)
    }
}

impl fmt::Display for PipelineConfig {
    /// TOML-like rendering with credentials redacted.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "input_root = {:?}", self.input_root.display().to_string())?;
        writeln!(f, "output_root = {:?}", self.output_root.display().to_string())?;
        writeln!(f, "latest_users = {}", self.latest_users)?;
        if let Some(creds) = &self.credentials {
            let prefix: String = creds.access_key_id.chars().take(4).collect();
            writeln!(f, "\n[aws]")?;
            writeln!(f, "access_key_id = \"{prefix}***\"")?;
            writeln!(f, "secret_access_key = \"***\"")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    const PATH: &str = "dl.toml";

    #[test]
    fn empty_file_uses_defaults() -> TestResult {
        let config = PipelineConfig::from_toml_str(Path::new(PATH), "")?;
        assert_eq!(config, PipelineConfig::default());
        Ok(())
    }

    #[test]
    fn full_file_is_parsed() -> TestResult {
        let text = r#"
            input_root = "s3in"
            output_root = "lake"
            latest_users = true

            [aws]
            access_key_id = "AKIAEXAMPLE"
            secret_access_key = "hunter2"
        "#;
        let config = PipelineConfig::from_toml_str(Path::new(PATH), text)?;
        assert_eq!(config.input_root, PathBuf::from("s3in"));
        assert_eq!(config.output_root, PathBuf::from("lake"));
        assert!(config.latest_users);

        let creds = config.credentials.as_ref().ok_or("credentials")?;
        assert_eq!(creds.access_key_id, "AKIAEXAMPLE");
        assert_eq!(creds.secret_access_key, "hunter2");
        Ok(())
    }

    #[test]
    fn empty_secret_is_rejected() {
        let text = "[aws]\naccess_key_id = \"AKIA\"\nsecret_access_key = \"\"\n";
        let err = PipelineConfig::from_toml_str(Path::new(PATH), text)
            .expect_err("empty secret");
        assert!(matches!(
            err,
            ConfigError::MissingCredential {
                key: "secret_access_key",
                ..
            }
        ));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = PipelineConfig::from_toml_str(Path::new(PATH), "inptu_root = \"x\"\n")
            .expect_err("typo");
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn display_redacts_credentials() -> TestResult {
        let text = "[aws]\naccess_key_id = \"AKIAEXAMPLE\"\nsecret_access_key = \"hunter2\"\n";
        let config = PipelineConfig::from_toml_str(Path::new(PATH), text)?;

        let shown = config.to_string();
        assert!(shown.contains("AKIA***"));
        assert!(!shown.contains("EXAMPLE"));
        assert!(!shown.contains("hunter2"));
        assert!(!format!("{config:?}").contains("hunter2"));
        Ok(())
    }

    #[tokio::test]
    async fn load_reports_missing_file() {
        let err = PipelineConfig::load(Path::new("/definitely/not/here.toml"))
            .await
            .expect_err("missing file");
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
