//! Configuration loading and merging
//!
//! A config file (or standard input, with the path `-`) is loaded first;
//! `-l`/`-r` command line entries are appended afterwards. The merged
//! result must contain at least one bind and one remote.

use std::io::Read;

use tracing::debug;

use super::types::Config;
use super::url::{parse_bind_url, parse_remote_url};
use crate::error::ConfigError;

/// Load configuration from a JSON file, or standard input when `path` is `-`
pub fn load_config(path: &str) -> Result<Config, ConfigError> {
    let contents = if path == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        debug!(path, "loading configuration file");
        std::fs::read_to_string(path)?
    };
    load_config_str(&contents)
}

/// Parse configuration from a JSON string
pub fn load_config_str(json: &str) -> Result<Config, ConfigError> {
    let config: Config =
        serde_json::from_str(json).map_err(|e| ConfigError::ParseError(e.to_string()))?;
    config.validate()?;
    Ok(config)
}

/// Append command line `-l`/`-r` entries to an existing configuration
pub fn merge_cli_entries(
    config: &mut Config,
    listens: &[String],
    remotes: &[String],
) -> Result<(), ConfigError> {
    for raw in listens {
        config.binds.push(parse_bind_url(raw)?);
    }
    for raw in remotes {
        config.remotes.push(parse_remote_url(raw)?);
    }
    if config.binds.is_empty() || config.remotes.is_empty() {
        return Err(ConfigError::EmptyConfig);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_config_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "binds": [ "tcp://127.0.0.1:9500?remote=ex" ],
                "remotes": [ "ex://198.51.100.7:48000" ]
            }}"#
        )
        .unwrap();

        let config = load_config(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.binds.len(), 1);
        assert_eq!(config.remotes.len(), 1);
    }

    #[test]
    fn test_load_config_missing_file() {
        assert!(matches!(
            load_config("/nonexistent/rust-relay.json"),
            Err(ConfigError::IoError(_))
        ));
    }

    #[test]
    fn test_load_config_invalid_json() {
        assert!(matches!(
            load_config_str("not json"),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_merge_appends_cli_entries() {
        let mut config = load_config_str(
            r#"{ "remotes": [ "r://198.51.100.7:48000" ] }"#,
        )
        .unwrap();
        merge_cli_entries(
            &mut config,
            &["tcp://:9500?remote=r".to_string()],
            &[],
        )
        .unwrap();
        assert_eq!(config.binds.len(), 1);
        assert_eq!(config.remotes.len(), 1);
        assert_eq!(config.binds[0].remote.as_deref(), Some("r"));
    }

    #[test]
    fn test_merge_rejects_empty() {
        let mut config = Config::default();
        assert!(matches!(
            merge_cli_entries(&mut config, &[], &[]),
            Err(ConfigError::EmptyConfig)
        ));

        let mut config = Config::default();
        assert!(matches!(
            merge_cli_entries(&mut config, &["tcp://:9500".to_string()], &[]),
            Err(ConfigError::EmptyConfig)
        ));
    }

    #[test]
    fn test_merge_propagates_parse_errors() {
        let mut config = Config::default();
        assert!(merge_cli_entries(
            &mut config,
            &["tcp://:9500?bogus=1".to_string()],
            &[]
        )
        .is_err());
    }
}
