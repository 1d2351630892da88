//! CLI argument definitions
//!
//! All Clap derive structs for `gpio-sequencer` command-line parsing.

use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};

use crate::observability::LogFormat;
use crate::output::{DEFAULT_GPIO_ROOT, OutputMode};

// ============================================================================
// Root CLI
// ============================================================================

/// WebSocket-controlled GPIO trigger server.
#[derive(Parser, Debug)]
#[command(name = "gpio-sequencer", author, version, about)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all non-error output.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Color output control.
    #[arg(
        long,
        default_value = "auto",
        global = true,
        env = "GPIO_SEQUENCER_COLOR"
    )]
    pub color: ColorChoice,

    /// Log output format.
    #[arg(
        long,
        default_value = "human",
        global = true,
        env = "GPIO_SEQUENCER_LOG_FORMAT"
    )]
    pub log_format: LogFormat,
}

// ============================================================================
// Top-Level Commands
// ============================================================================

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the trigger server.
    Serve(ServeArgs),

    /// Check channel mapping files without starting the server.
    Validate(ValidateArgs),

    /// Generate shell completion scripts.
    Completions(CompletionsArgs),

    /// Display version information.
    Version(VersionArgs),
}

// ============================================================================
// Serve Command
// ============================================================================

/// Arguments for `serve`.
#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Interface to listen on.
    #[arg(long, default_value = "0.0.0.0", env = "HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(short, long, default_value_t = 8000, env = "PORT")]
    pub port: u16,

    /// Channel mapping file (JSON). The built-in mapping is used when the
    /// file is absent or invalid.
    #[arg(short, long, env = "GPIO_SEQUENCER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output adapter selection.
    #[arg(long, default_value = "auto", env = "GPIO_SEQUENCER_OUTPUT")]
    pub output: OutputMode,

    /// Root of the GPIO sysfs interface.
    #[arg(long, default_value = DEFAULT_GPIO_ROOT, env = "GPIO_SEQUENCER_GPIO_ROOT")]
    pub gpio_root: PathBuf,

    /// Directory of the built web UI.
    #[arg(long, default_value = "web", env = "GPIO_SEQUENCER_WEB_DIR")]
    pub web_dir: PathBuf,

    /// Pulse every channel once before serving.
    #[arg(long)]
    pub self_test: bool,

    /// Also stop triggered channels from the command handler once the
    /// requested duration elapses (legacy behaviour; cuts retriggered
    /// pulses short).
    #[arg(long, env = "GPIO_SEQUENCER_DEFERRED_STOP")]
    pub deferred_stop: bool,

    /// Expose Prometheus metrics on this port.
    #[arg(long, env = "GPIO_SEQUENCER_METRICS_PORT")]
    pub metrics_port: Option<u16>,
}

// ============================================================================
// Validate Command
// ============================================================================

/// Arguments for `validate`.
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Mapping files to validate.
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Output format.
    #[arg(short, long, default_value = "human")]
    pub format: OutputFormat,
}

// ============================================================================
// Completions / Version
// ============================================================================

/// Arguments for shell completion generation.
#[derive(Args, Debug)]
pub struct CompletionsArgs {
    /// Target shell for completion script.
    pub shell: Shell,
}

/// Arguments for version display.
#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Output format.
    #[arg(short, long, default_value = "human")]
    pub format: OutputFormat,
}

// ============================================================================
// CLI-Local Enums
// ============================================================================

/// Color output choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ColorChoice {
    /// Auto-detect terminal support.
    #[default]
    Auto,
    /// Always use color.
    Always,
    /// Never use color.
    Never,
}

/// Output format for structured output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable output.
    #[default]
    Human,
    /// JSON output.
    Json,
}

/// Shell type for completion generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Shell {
    /// Bash shell.
    Bash,
    /// Zsh shell.
    Zsh,
    /// Fish shell.
    Fish,
    /// `PowerShell`.
    #[value(name = "powershell")]
    PowerShell,
    /// Elvish shell.
    Elvish,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn serve_args(extra: &[&str]) -> ServeArgs {
        let argv = ["gpio-sequencer", "serve"].iter().chain(extra);
        match Cli::try_parse_from(argv).unwrap().command {
            Commands::Serve(args) => args,
            other => panic!("expected serve, got {other:?}"),
        }
    }

    #[test]
    fn test_serve_flags() {
        let args = serve_args(&[
            "--host",
            "127.0.0.1",
            "--port",
            "9000",
            "--config",
            "mapping.json",
            "--output",
            "mock",
            "--self-test",
            "--deferred-stop",
            "--metrics-port",
            "9100",
        ]);
        assert_eq!(args.host, "127.0.0.1");
        assert_eq!(args.port, 9000);
        assert_eq!(args.config, Some(PathBuf::from("mapping.json")));
        assert_eq!(args.output, OutputMode::Mock);
        assert!(args.self_test);
        assert!(args.deferred_stop);
        assert_eq!(args.metrics_port, Some(9100));
    }

    #[test]
    fn test_serve_defaults() {
        let args = serve_args(&[]);
        assert_eq!(args.gpio_root, PathBuf::from(DEFAULT_GPIO_ROOT));
        assert!(!args.self_test);
        assert!(!args.deferred_stop);
    }

    #[test]
    fn test_invalid_output_mode_rejected() {
        let result = Cli::try_parse_from(["gpio-sequencer", "serve", "--output", "spi"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_requires_files() {
        assert!(Cli::try_parse_from(["gpio-sequencer", "validate"]).is_err());
        let cli = Cli::try_parse_from(["gpio-sequencer", "validate", "a.json", "b.json"]).unwrap();
        let Commands::Validate(args) = cli.command else {
            panic!("expected validate");
        };
        assert_eq!(args.files.len(), 2);
        assert_eq!(args.format, OutputFormat::Human);
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "gpio-sequencer",
            "version",
            "-vv",
            "--color",
            "never",
            "--log-format",
            "json",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.color, ColorChoice::Never);
        assert_eq!(cli.log_format, LogFormat::Json);
    }

    #[test]
    fn test_help_output() {
        let err = Cli::try_parse_from(["gpio-sequencer", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }

    #[test]
    fn test_version_output() {
        let err = Cli::try_parse_from(["gpio-sequencer", "--version"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayVersion);
    }

    #[test]
    fn test_completions_shell() {
        let cli = Cli::try_parse_from(["gpio-sequencer", "completions", "powershell"]).unwrap();
        let Commands::Completions(args) = cli.command else {
            panic!("expected completions");
        };
        assert_eq!(args.shell, Shell::PowerShell);
    }

    #[test]
    fn test_cli_debug_assert() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
