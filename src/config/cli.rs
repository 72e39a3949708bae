use crate::core::serializer::Format;
use crate::utils::error::Result;
use crate::utils::validation::{validate_path, validate_positive_number, Validate};
use clap::Parser;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Parser)]
#[command(name = "platsim")]
#[command(about = "Build platform descriptions and run them through the simulation engine")]
pub struct CliConfig {
    /// Path to the TOML platform description
    #[arg(short, long, default_value = "platform.toml")]
    pub config: String,

    /// Document format, overrides the [build] section
    #[arg(short, long)]
    pub format: Option<String>,

    /// Where to write the rendered document
    #[arg(short, long)]
    pub output: Option<String>,

    /// Render and print the document without writing or simulating
    #[arg(long)]
    pub dry_run: bool,

    /// Run the platform through the engine after building it
    #[arg(long)]
    pub simulate: bool,

    /// Number of simulations to queue; more than one runs on the worker pool
    #[arg(long, default_value = "1")]
    pub runs: usize,

    /// Worker pool size, overrides PLATSIM_MAX_WORKERS
    #[arg(long)]
    pub max_workers: Option<usize>,

    /// Write collected statistics here (.json or .csv)
    #[arg(long)]
    pub stats_out: Option<String>,

    /// List the component species the engine provides and exit
    #[arg(long)]
    pub schema: bool,

    #[arg(short, long, help = "Enable verbose output")]
    pub verbose: bool,
}

impl CliConfig {
    pub fn format(&self) -> Result<Option<Format>> {
        self.format.as_deref().map(str::parse).transpose()
    }
}

impl Validate for CliConfig {
    fn validate(&self) -> Result<()> {
        validate_path("config", &self.config)?;
        validate_positive_number("runs", self.runs, 1)?;
        if let Some(workers) = self.max_workers {
            validate_positive_number("max_workers", workers, 1)?;
        }
        if let Some(output) = &self.output {
            validate_path("output", output)?;
        }
        if let Some(stats_out) = &self.stats_out {
            validate_path("stats_out", stats_out)?;
        }
        self.format()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CliConfig::parse_from(["platsim"]);
        assert_eq!(config.config, "platform.toml");
        assert_eq!(config.runs, 1);
        assert!(!config.simulate);
        assert!(config.validate().is_ok());
        assert_eq!(config.format().unwrap(), None);
    }

    #[test]
    fn test_flags() {
        let config = CliConfig::parse_from([
            "platsim",
            "--config",
            "soc.toml",
            "--format",
            "xml",
            "--simulate",
            "--runs",
            "3",
            "--max-workers",
            "2",
            "--stats-out",
            "stats.csv",
        ]);
        assert_eq!(config.format().unwrap(), Some(Format::Xml));
        assert_eq!(config.max_workers, Some(2));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_values() {
        assert!(CliConfig::parse_from(["platsim", "--runs", "0"]).validate().is_err());
        assert!(CliConfig::parse_from(["platsim", "--format", "yaml"]).validate().is_err());
    }
}
