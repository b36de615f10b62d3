//! Host-supplied settings for case controllers.
//!
//! Every field has a default so a host can send a partial JSON object and
//! only override what it cares about.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::event::StageId;
use crate::{DEFAULT_JOB_NAME_PREFIX, DEFAULT_MAX_CASE_NAME_LEN, DEFAULT_PARAM_FILE_NAME};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Parameter file name cannot be empty")]
    EmptyParamFileName,
    #[error("Parameter file name must be a single path segment: {0}")]
    InvalidParamFileName(String),
    #[error("Maximum case name length must be at least 1")]
    ZeroNameLength,
    #[error("Job name prefix cannot contain whitespace: {0:?}")]
    InvalidJobPrefix(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NameError {
    #[error("Case name cannot be empty")]
    Empty,
    #[error("Case name is {len} characters long (maximum {max})")]
    TooLong { len: usize, max: usize },
    #[error("Case name contains an invalid character: {0:?}")]
    InvalidCharacter(char),
    #[error("Case name cannot start with '.'")]
    Hidden,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaseConfig {
    /// Name of the parameter document inside every case folder.
    pub param_file_name: String,
    pub max_case_name_len: usize,
    /// Prepended to job names so scheduler listings can be filtered.
    pub job_name_prefix: String,
}

impl Default for CaseConfig {
    fn default() -> Self {
        Self {
            param_file_name: DEFAULT_PARAM_FILE_NAME.to_string(),
            max_case_name_len: DEFAULT_MAX_CASE_NAME_LEN,
            job_name_prefix: DEFAULT_JOB_NAME_PREFIX.to_string(),
        }
    }
}

impl CaseConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let file = self.param_file_name.trim();
        if file.is_empty() {
            return Err(ConfigError::EmptyParamFileName);
        }
        if file.contains('/') || file == "." || file == ".." {
            return Err(ConfigError::InvalidParamFileName(file.to_string()));
        }
        if self.max_case_name_len == 0 {
            return Err(ConfigError::ZeroNameLength);
        }
        if self.job_name_prefix.chars().any(char::is_whitespace) {
            return Err(ConfigError::InvalidJobPrefix(self.job_name_prefix.clone()));
        }
        Ok(())
    }

    /// Case names become folder names on the remote side, so they are limited
    /// to characters every scheduler and file system accepts.
    pub fn validate_case_name(&self, name: &str) -> Result<(), NameError> {
        if name.is_empty() {
            return Err(NameError::Empty);
        }
        let len = name.chars().count();
        if len > self.max_case_name_len {
            return Err(NameError::TooLong {
                len,
                max: self.max_case_name_len,
            });
        }
        if name.starts_with('.') {
            return Err(NameError::Hidden);
        }
        if let Some(bad) = name
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')))
        {
            return Err(NameError::InvalidCharacter(bad));
        }
        Ok(())
    }

    #[must_use]
    pub fn job_name(&self, case_name: &str, stage: &StageId) -> String {
        if self.job_name_prefix.is_empty() {
            format!("{case_name}-{stage}")
        } else {
            format!("{}-{case_name}-{stage}", self.job_name_prefix)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    mod config_tests {
        use super::*;

        #[test]
        fn test_defaults_are_valid() {
            let config = CaseConfig::default();
            assert_eq!(config.param_file_name, ".caseParams");
            assert_eq!(config.max_case_name_len, 64);
            assert!(config.validate().is_ok());
        }

        #[test]
        fn test_partial_json_fills_defaults() {
            let config: CaseConfig =
                serde_json::from_str(r#"{"job_name_prefix":"wind"}"#).unwrap();
            assert_eq!(config.job_name_prefix, "wind");
            assert_eq!(config.param_file_name, DEFAULT_PARAM_FILE_NAME);
        }

        #[test]
        fn test_rejects_nested_param_file() {
            let config = CaseConfig {
                param_file_name: "sub/params".into(),
                ..CaseConfig::default()
            };
            assert_eq!(
                config.validate(),
                Err(ConfigError::InvalidParamFileName("sub/params".into()))
            );
        }

        #[test]
        fn test_rejects_zero_name_length() {
            let config = CaseConfig {
                max_case_name_len: 0,
                ..CaseConfig::default()
            };
            assert_eq!(config.validate(), Err(ConfigError::ZeroNameLength));
        }

        #[test]
        fn test_job_name_includes_prefix_case_and_stage() {
            let config = CaseConfig::default();
            assert_eq!(
                config.job_name("tower", &StageId::new("mesh")),
                "cwe-tower-mesh"
            );
        }
    }

    mod name_tests {
        use super::*;

        #[test]
        fn test_accepts_plain_names() {
            let config = CaseConfig::default();
            assert!(config.validate_case_name("tower_2-v1.0").is_ok());
        }

        #[test]
        fn test_rejects_empty_hidden_and_spaces() {
            let config = CaseConfig::default();
            assert_eq!(config.validate_case_name(""), Err(NameError::Empty));
            assert_eq!(config.validate_case_name(".hidden"), Err(NameError::Hidden));
            assert_eq!(
                config.validate_case_name("two words"),
                Err(NameError::InvalidCharacter(' '))
            );
            assert_eq!(
                config.validate_case_name("a/b"),
                Err(NameError::InvalidCharacter('/'))
            );
        }

        #[test]
        fn test_rejects_long_names() {
            let config = CaseConfig {
                max_case_name_len: 4,
                ..CaseConfig::default()
            };
            assert_eq!(
                config.validate_case_name("abcde"),
                Err(NameError::TooLong { len: 5, max: 4 })
            );
        }
    }

    proptest! {
        #[test]
        fn valid_names_never_contain_separators(name in "[A-Za-z0-9_./ -]{0,80}") {
            let config = CaseConfig::default();
            if config.validate_case_name(&name).is_ok() {
                prop_assert!(!name.contains('/'));
                prop_assert!(!name.contains(' '));
                prop_assert!(!name.is_empty());
                prop_assert!(name.chars().count() <= config.max_case_name_len);
            }
        }
    }
}
