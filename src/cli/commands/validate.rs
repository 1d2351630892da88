//! Mapping file validation
//!
//! Parses each file the way `serve --config` would, but strictly: where the
//! server falls back to the built-in mapping, this command fails.

use std::path::Path;

use serde::Serialize;

use crate::cli::args::{OutputFormat, ValidateArgs};
use crate::config::{ChannelId, read_mapping};
use crate::error::SequencerError;
use crate::output::PinId;

/// Summary of one valid mapping file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    /// File that was checked.
    pub file: String,
    /// Mapped channels, ascending.
    pub channels: Vec<ChannelId>,
    /// Pins driven by more than one channel.
    pub shared_pins: Vec<PinId>,
}

/// Validate mapping files without starting the server.
///
/// # Errors
///
/// Returns a config error for the first file that does not hold a valid,
/// non-empty channel mapping.
pub fn run(args: &ValidateArgs) -> Result<(), SequencerError> {
    for path in &args.files {
        tracing::info!(file = %path.display(), "validating channel mapping");
        let report = validate_file(path)?;

        for pin in &report.shared_pins {
            tracing::warn!(file = %path.display(), pin, "pin is shared by several channels");
        }

        match args.format {
            OutputFormat::Human => {
                println!("{}: ok ({} channels)", report.file, report.channels.len());
            }
            OutputFormat::Json => {
                println!("{}", serde_json::to_string(&report)?);
            }
        }
    }
    Ok(())
}

/// Strictly parses one mapping file.
///
/// # Errors
///
/// Returns the [`ConfigError`](crate::error::ConfigError) describing why
/// the file is unusable.
pub fn validate_file(path: &Path) -> Result<ValidationReport, SequencerError> {
    let mapping = read_mapping(path)?;
    Ok(ValidationReport {
        file: path.display().to_string(),
        channels: mapping.channels(),
        shared_pins: mapping.shared_pins().into_keys().collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ConfigError, ExitCode};

    fn mapping_file(dir: &tempfile::TempDir, contents: &str) -> std::path::PathBuf {
        let path = dir.path().join("mapping.json");
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn valid_file_reports_channels() {
        let dir = tempfile::tempdir().unwrap();
        let path = mapping_file(&dir, r#"{"channel_mapping": {"1": 3, "0": 2}}"#);
        let report = validate_file(&path).unwrap();
        assert_eq!(report.channels, vec![0, 1]);
        assert!(report.shared_pins.is_empty());
    }

    #[test]
    fn shared_pins_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = mapping_file(&dir, r#"{"channel_mapping": {"0": 4, "1": 4, "2": 5}}"#);
        let report = validate_file(&path).unwrap();
        assert_eq!(report.shared_pins, vec![4]);
    }

    #[test]
    fn missing_mapping_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = mapping_file(&dir, r#"{"channels": {}}"#);
        let err = validate_file(&path).unwrap_err();
        assert!(matches!(
            err,
            SequencerError::Config(ConfigError::MissingMapping { .. })
        ));
        assert_eq!(err.exit_code(), ExitCode::CONFIG_ERROR);
    }

    #[test]
    fn unreadable_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = validate_file(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, SequencerError::Config(ConfigError::Read { .. })));
    }

    #[test]
    fn run_stops_at_first_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let bad = mapping_file(&dir, "not json");
        let args = ValidateArgs {
            files: vec![bad],
            format: OutputFormat::Human,
        };
        assert!(run(&args).is_err());
    }
}
