use regex::Regex;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/zb-agent.conf";
pub const DEFAULT_PATTERN: &str = ".";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid pattern {pattern:?} in config")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Settings for one invocation. Built once, never mutated afterwards.
#[derive(Debug, Clone)]
pub struct Config {
    pub pattern: Regex,
    pub exclude_inactive_be: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pattern: Regex::new(DEFAULT_PATTERN).expect("default pattern compiles"),
            exclude_inactive_be: false,
        }
    }
}

impl Config {
    /// Loads `path`, falling back to defaults when the file does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(contents) => Self::parse(&contents),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "config not found, using defaults");
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let mut pattern = DEFAULT_PATTERN.to_string();
        let mut exclude_inactive_be = false;

        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim().to_ascii_lowercase();
            let value = unquote(value.trim());
            // Later lines overwrite earlier ones.
            match key.as_str() {
                "pattern" => pattern = value.to_string(),
                "exclude_inactive_be" => exclude_inactive_be = value == "1",
                other => tracing::debug!(key = other, "ignoring unknown config key"),
            }
        }

        let pattern = Regex::new(&pattern).map_err(|source| ConfigError::Pattern {
            pattern: pattern.clone(),
            source,
        })?;
        Ok(Self {
            pattern,
            exclude_inactive_be,
        })
    }
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_yields_defaults() {
        let tmp = tempdir().unwrap();
        let cfg = Config::load(tmp.path().join("absent.conf")).unwrap();
        assert_eq!(cfg.pattern.as_str(), ".");
        assert!(!cfg.exclude_inactive_be);
    }

    #[test]
    fn empty_file_yields_defaults() {
        let cfg = Config::parse("").unwrap();
        assert_eq!(cfg.pattern.as_str(), DEFAULT_PATTERN);
        assert!(!cfg.exclude_inactive_be);
    }

    #[test]
    fn reads_recognized_keys_and_skips_comments() {
        let cfg = Config::parse(
            "# agent settings\n\
             PATTERN = ^tank/\n\
             \n\
             exclude_inactive_be = 1\n\
             unknown = whatever\n",
        )
        .unwrap();
        assert_eq!(cfg.pattern.as_str(), "^tank/");
        assert!(cfg.exclude_inactive_be);
    }

    #[test]
    fn last_duplicate_wins() {
        let cfg = Config::parse("pattern = ^a\npattern = ^b\n").unwrap();
        assert_eq!(cfg.pattern.as_str(), "^b");
    }

    #[test]
    fn only_one_enables_boot_environment_filter() {
        let cfg = Config::parse("exclude_inactive_be = yes").unwrap();
        assert!(!cfg.exclude_inactive_be);
        let cfg = Config::parse("exclude_inactive_be = \"1\"").unwrap();
        assert!(cfg.exclude_inactive_be);
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        let err = Config::parse("pattern = (unclosed").unwrap_err();
        assert!(matches!(err, ConfigError::Pattern { .. }));
    }

    #[test]
    fn reads_file_from_disk() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("agent.conf");
        std::fs::write(&path, "pattern = data\n").unwrap();
        let cfg = Config::load(&path).unwrap();
        assert!(cfg.pattern.is_match("tank/data/home"));
        assert!(!cfg.pattern.is_match("tank/scratch"));
    }
}
