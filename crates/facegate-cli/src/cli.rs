use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use facegate_config::Strategy;

#[derive(Debug, Parser)]
#[command(
    name = "facegate",
    version,
    about = "Face enrollment, login and attempt history for facegate deployments"
)]
pub struct Cli {
    /// Emit one JSON object per command instead of human-readable lines
    #[arg(long, global = true)]
    pub json: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn output_mode(&self) -> OutputMode {
        if self.json {
            OutputMode::Json
        } else {
            OutputMode::Human
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Human,
    Json,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Enroll an identity from a set of face images
    Enroll(EnrollArgs),
    /// Attempt a biometric login with one face image
    Login(LoginArgs),
    /// Show recent authentication attempts
    Audit(AuditArgs),
    /// Inspect or remove stored templates
    #[command(subcommand)]
    Templates(TemplatesCommands),
}

/// Settings shared by every command; each flag overrides the environment and
/// the configuration file.
#[derive(Debug, Clone, Default, Args)]
pub struct RuntimeArgs {
    /// Read configuration from this file instead of the default locations
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Template store file
    #[arg(long, value_name = "PATH")]
    pub store: Option<PathBuf>,

    /// Attempt log file (JSON lines)
    #[arg(long = "audit-log", value_name = "PATH")]
    pub audit_log: Option<PathBuf>,

    /// Match tolerance (maximum accepted distance)
    #[arg(long)]
    pub tolerance: Option<f64>,

    /// Feature extraction and matching strategy
    #[arg(long, value_enum)]
    pub strategy: Option<StrategyArg>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StrategyArg {
    Embedding,
    Heuristic,
}

impl From<StrategyArg> for Strategy {
    fn from(value: StrategyArg) -> Self {
        match value {
            StrategyArg::Embedding => Strategy::Embedding,
            StrategyArg::Heuristic => Strategy::Heuristic,
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct EnrollArgs {
    /// Identity the template is bound to
    #[arg(long)]
    pub user: String,

    /// Face images fed to the enrollment session in order
    #[arg(required = true, value_name = "IMAGE")]
    pub images: Vec<PathBuf>,

    #[command(flatten)]
    pub runtime: RuntimeArgs,
}

#[derive(Debug, Clone, Args)]
pub struct LoginArgs {
    /// Probe face image
    #[arg(value_name = "IMAGE")]
    pub image: PathBuf,

    /// Source address recorded with the attempt
    #[arg(long)]
    pub source: Option<String>,

    #[command(flatten)]
    pub runtime: RuntimeArgs,
}

#[derive(Debug, Clone, Args)]
pub struct AuditArgs {
    /// Only attempts attributed to this identity
    #[arg(long)]
    pub user: Option<String>,

    /// Only attempts at or after this RFC 3339 timestamp
    #[arg(long, value_parser = parse_timestamp)]
    pub since: Option<DateTime<Utc>>,

    /// Maximum number of attempts to show
    #[arg(long)]
    pub limit: Option<usize>,

    #[command(flatten)]
    pub runtime: RuntimeArgs,
}

#[derive(Debug, Clone, Subcommand)]
pub enum TemplatesCommands {
    /// List enrolled identities
    List(TemplateListArgs),
    /// Remove an identity's template
    Remove(TemplateRemoveArgs),
}

#[derive(Debug, Clone, Args)]
pub struct TemplateListArgs {
    #[command(flatten)]
    pub runtime: RuntimeArgs,
}

#[derive(Debug, Clone, Args)]
pub struct TemplateRemoveArgs {
    #[arg(long)]
    pub user: String,

    #[command(flatten)]
    pub runtime: RuntimeArgs,
}

pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|err| format!("expected an RFC 3339 timestamp: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_login_with_runtime_overrides() {
        let cli = Cli::try_parse_from([
            "facegate",
            "--json",
            "login",
            "probe.png",
            "--source",
            "10.0.0.4",
            "--strategy",
            "heuristic",
            "--tolerance",
            "0.25",
        ])
        .unwrap();
        assert_eq!(cli.output_mode(), OutputMode::Json);
        match cli.command {
            Commands::Login(args) => {
                assert_eq!(args.image, PathBuf::from("probe.png"));
                assert_eq!(args.source.as_deref(), Some("10.0.0.4"));
                assert_eq!(args.runtime.strategy, Some(StrategyArg::Heuristic));
                assert_eq!(args.runtime.tolerance, Some(0.25));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn enroll_requires_images() {
        assert!(Cli::try_parse_from(["facegate", "enroll", "--user", "alice"]).is_err());
        let cli =
            Cli::try_parse_from(["facegate", "enroll", "--user", "alice", "a.png", "b.png"]).unwrap();
        match cli.command {
            Commands::Enroll(args) => assert_eq!(args.images.len(), 2),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn audit_since_must_be_rfc3339() {
        assert!(Cli::try_parse_from(["facegate", "audit", "--since", "yesterday"]).is_err());
        let cli = Cli::try_parse_from([
            "facegate",
            "-vv",
            "audit",
            "--since",
            "2024-05-01T12:00:00+02:00",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Audit(args) => {
                assert_eq!(args.since.unwrap().to_rfc3339(), "2024-05-01T10:00:00+00:00");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn templates_remove_takes_user() {
        let cli =
            Cli::try_parse_from(["facegate", "templates", "remove", "--user", "bob"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Templates(TemplatesCommands::Remove(TemplateRemoveArgs { ref user, .. })) if user == "bob"
        ));
    }
}
