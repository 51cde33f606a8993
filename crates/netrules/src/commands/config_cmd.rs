//! Config subcommand handlers.

use std::path::Path;

use netrules_config::{self as config, Config};

use crate::cli::{ConfigArgs, ConfigCommand, OutputFormat};
use crate::error::CliError;
use crate::output::{self, Ui};

const MASK: &str = "********";

pub fn handle(args: ConfigArgs, path: &Path, ui: &Ui) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Show => {
            let mut cfg = config::load_config_from(path)?;
            if cfg.transport.token.is_some() {
                cfg.transport.token = Some(MASK.into());
            }
            let out = if ui.format == OutputFormat::Table {
                toml::to_string_pretty(&cfg).map_err(|e| CliError::Render(e.to_string()))?
            } else {
                output::render_single(ui.format, &cfg, |_| String::new(), |_| {
                    path.display().to_string()
                })?
            };
            ui.print(&out);
            Ok(())
        }

        ConfigCommand::Path => {
            ui.print(&path.display().to_string());
            Ok(())
        }

        ConfigCommand::Init { force } => {
            if path.exists() && !force {
                return Err(CliError::Validation {
                    field: "config".into(),
                    reason: format!("{} already exists; pass --force to overwrite", path.display()),
                });
            }
            config::save_config_to(&Config::default(), path)?;
            ui.success(&format!("Wrote {}", path.display()));
            Ok(())
        }
    }
}
