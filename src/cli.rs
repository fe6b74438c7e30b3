//! Command-line interface for the KEMI script analyzer.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "kemi-pv")]
#[command(about = "Pseudo-variable analysis for Kamailio KEMI Python scripts", long_about = None)]
pub struct Cli {
    /// Log filter, overriding KEMI_PV_LOG (e.g. `debug`, `kemi_analyzer=trace`)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Analyze scripts and print their diagnostics
    Check {
        /// JSON configuration file
        #[arg(long)]
        config: Option<PathBuf>,
        /// Files or directories to analyze
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// List the pseudo-variable occurrences of one file
    Pvs { file: PathBuf },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_arguments() {
        let cli = Cli::parse_from([
            "kemi-pv",
            "check",
            "--config",
            "kemi.json",
            "--log-level",
            "debug",
            "routing",
            "extra.py",
        ]);
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        match cli.command {
            Command::Check { config, paths } => {
                assert_eq!(config, Some(PathBuf::from("kemi.json")));
                assert_eq!(paths, vec![PathBuf::from("routing"), PathBuf::from("extra.py")]);
            }
            Command::Pvs { .. } => panic!("expected check"),
        }
    }

    #[test]
    fn test_check_requires_paths() {
        assert!(Cli::try_parse_from(["kemi-pv", "check"]).is_err());
    }
}
