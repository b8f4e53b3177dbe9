//! CLI argument parsing for upkeep.

use std::path::PathBuf;

use clap::Parser;

/// upkeep - concurrent package-manager updates under a tabbed terminal UI.
#[derive(Parser, Debug)]
#[command(name = "upkeep", version, about)]
pub struct Cli {
    /// Configuration file (defaults to ~/.config/upkeep/config.toml).
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Key-bindings file (defaults to ~/.config/upkeep/keybindings.toml).
    #[arg(long)]
    pub key_bindings: Option<PathBuf>,

    /// Run only these plugins.
    #[arg(long = "only", value_name = "PLUGIN")]
    pub only: Vec<String>,

    /// Skip these plugins.
    #[arg(long = "skip", value_name = "PLUGIN")]
    pub skip: Vec<String>,

    /// Maximum number of plugins updating at once.
    #[arg(long, default_value = "4")]
    pub max_concurrent: usize,

    /// Keep going when a plugin fails; its dependents still run.
    #[arg(long)]
    pub continue_on_error: bool,

    /// Check only: Download/Execute phases become no-ops.
    #[arg(long)]
    pub dry_run: bool,

    /// Hold each job between phases until released from the UI.
    #[arg(long)]
    pub pause_between_phases: bool,

    /// Run without the TUI, streaming plain output to stdout.
    #[arg(long)]
    pub headless: bool,

    /// List the configured plugins and exit.
    #[arg(long)]
    pub list: bool,
}

impl Cli {
    /// Parse CLI arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults() {
        let cli = Cli::parse_from(["upkeep"]);
        assert_eq!(cli.max_concurrent, 4);
        assert!(!cli.continue_on_error);
        assert!(!cli.dry_run);
        assert!(!cli.pause_between_phases);
        assert!(!cli.headless);
        assert!(!cli.list);
        assert!(cli.only.is_empty());
        assert!(cli.skip.is_empty());
    }

    #[test]
    fn cli_filters() {
        let cli = Cli::parse_from(["upkeep", "--only", "apt", "--only", "snap", "--skip", "conda"]);
        assert_eq!(cli.only, vec!["apt", "snap"]);
        assert_eq!(cli.skip, vec!["conda"]);
    }

    #[test]
    fn cli_run_options() {
        let cli = Cli::parse_from([
            "upkeep",
            "--max-concurrent",
            "8",
            "--continue-on-error",
            "--dry-run",
        ]);
        assert_eq!(cli.max_concurrent, 8);
        assert!(cli.continue_on_error);
        assert!(cli.dry_run);
    }

    #[test]
    fn cli_config_paths() {
        let cli = Cli::parse_from(["upkeep", "--config", "/tmp/c.toml", "--key-bindings", "/tmp/k.toml"]);
        assert_eq!(cli.config.as_deref(), Some(std::path::Path::new("/tmp/c.toml")));
        assert_eq!(
            cli.key_bindings.as_deref(),
            Some(std::path::Path::new("/tmp/k.toml"))
        );
    }
}
