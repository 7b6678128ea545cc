//! Configuration management CLI commands.
//!
//! `config init` writes a default `bundlepatch.ini`, `config show` prints the
//! effective settings.

use std::path::{Path, PathBuf};

use bundlepatch::config::{config_file_path, ConfigFile};
use clap::Subcommand;
use console::style;

use crate::error::CliError;

/// Config subcommands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    /// Write a configuration file with default values
    Init {
        /// Configuration file to write (defaults to the user config directory)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Show the effective configuration
    Show {
        /// Configuration file to read (defaults to the user config directory)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

/// Run a config subcommand.
pub fn run(command: ConfigCommands) -> Result<(), CliError> {
    match command {
        ConfigCommands::Init { config, force } => {
            let path = config.unwrap_or_else(config_file_path);
            run_init(&path, force)?;
            println!("Configuration file: {}", path.display());
            println!();
            println!("Edit this file to point BundlePatch at your content server.");
            Ok(())
        }
        ConfigCommands::Show { config } => {
            let path = config.unwrap_or_else(config_file_path);
            run_show(&path)
        }
    }
}

/// Write defaults to `path` unless it exists and `force` is not set.
fn run_init(path: &Path, force: bool) -> Result<(), CliError> {
    if path.exists() && !force {
        return Err(CliError::Config(format!(
            "'{}' already exists. Use --force to overwrite it.",
            path.display()
        )));
    }
    ConfigFile::default().save_to(path)?;
    Ok(())
}

fn run_show(path: &Path) -> Result<(), CliError> {
    let config = ConfigFile::load_from(path)?;
    let s = &config.settings;

    let source = if path.exists() {
        path.display().to_string()
    } else {
        format!("{} (not found, using defaults)", path.display())
    };
    println!("{} {}", style("Configuration:").bold(), source);
    println!();

    print_section("patch");
    print_value("play_mode", s.play_mode.as_str());
    print_value("packages", &config.packages.join(", "));
    print_value("semantic_patch", &s.semantic_rule.patch.to_string());
    print_value("repair_retry_budget", &s.repair_retry_budget.to_string());
    print_value("state_delay_ms", &s.state_delay.as_millis().to_string());
    print_value("skip_main_download", &s.skip_main_download.to_string());
    println!();

    print_section("server");
    print_value("host", s.default_host.as_deref().unwrap_or_default());
    print_value("fallback_host", s.fallback_host.as_deref().unwrap_or_default());
    print_value(
        "app_config_url",
        &s.app_config_location().unwrap_or_default(),
    );
    print_value(
        "patch_config_url",
        &s.patch_config_location().unwrap_or_default(),
    );
    print_value("timeout_secs", &s.http_timeout.as_secs().to_string());
    println!();

    print_section("download");
    print_value("max_concurrency", &s.max_concurrency.to_string());
    print_value("max_retry", &s.max_retry.to_string());
    print_value("check_disk_space", &s.check_disk_space.to_string());
    println!();

    print_section("paths");
    print_value("installation_dir", &s.installation_dir.display().to_string());
    print_value("sandbox_dir", &s.sandbox_dir.display().to_string());

    Ok(())
}

fn print_section(name: &str) {
    println!("[{}]", style(name).cyan());
}

fn print_value(key: &str, value: &str) {
    if value.is_empty() {
        println!("  {} = {}", key, style("(not set)").dim());
    } else {
        println!("  {} = {}", key, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_init_writes_loadable_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("bundlepatch.ini");

        run_init(&path, false).unwrap();

        let loaded = ConfigFile::load_from(&path).unwrap();
        assert_eq!(loaded.packages, ConfigFile::default().packages);
        assert_eq!(
            loaded.settings.max_concurrency,
            ConfigFile::default().settings.max_concurrency
        );
    }

    #[test]
    fn test_init_refuses_to_overwrite_without_force() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("bundlepatch.ini");
        std::fs::write(&path, "[patch]\npackages = dlc\n").unwrap();

        assert!(matches!(run_init(&path, false), Err(CliError::Config(_))));
        assert_eq!(ConfigFile::load_from(&path).unwrap().packages, vec!["dlc"]);

        run_init(&path, true).unwrap();
        assert_eq!(
            ConfigFile::load_from(&path).unwrap().packages,
            ConfigFile::default().packages
        );
    }

    #[test]
    fn test_show_reports_invalid_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("bundlepatch.ini");
        std::fs::write(&path, "[download]\nmax_concurrency = 0\n").unwrap();

        assert!(matches!(run_show(&path), Err(CliError::Config(_))));
    }
}
