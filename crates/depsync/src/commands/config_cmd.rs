//! Config command handlers. None of these need a daemon connection.

use depsync_config::{Config, ConfigError};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts, OutputFormat};
use crate::error::CliError;
use crate::output;

/// `resolved` is the effective config, or the error that resolving it hit.
pub fn handle(
    args: &ConfigArgs,
    global: &GlobalOpts,
    resolved: Result<Config, CliError>,
) -> Result<(), CliError> {
    let path = global
        .config
        .clone()
        .unwrap_or_else(depsync_config::config_path);

    match args.command {
        ConfigCommand::Path => {
            output::print_output(&path.display().to_string(), global.quiet);
            Ok(())
        }

        ConfigCommand::Show => {
            let config = resolved?;
            let rendered = match global.output {
                OutputFormat::Text => toml::to_string_pretty(&config).map_err(ConfigError::from)?,
                OutputFormat::Json => output::render_json_pretty(&config),
                OutputFormat::Yaml => output::render_yaml(&config),
            };
            output::print_output(rendered.trim_end(), global.quiet);
            Ok(())
        }

        ConfigCommand::Init { force } => {
            if path.exists() && !force {
                return Err(CliError::ConfigExists {
                    path: path.display().to_string(),
                });
            }
            depsync_config::save_config_to(&path, &Config::default())?;
            if !global.quiet {
                eprintln!("Wrote default config to {}", path.display());
            }
            Ok(())
        }
    }
}
