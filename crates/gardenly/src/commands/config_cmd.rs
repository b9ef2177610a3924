//! `gardenly config`: inspect the configuration and store credentials.

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::error::CliError;
use crate::output;

use super::Settings;

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Path => {
            let path = global
                .config
                .clone()
                .unwrap_or_else(gardenly_config::config_path);
            output::print_output(&path.display().to_string(), global.quiet);
            Ok(())
        }

        ConfigCommand::Show => {
            let settings = Settings::load(global)?;
            let shown = settings.config.redacted();
            let rendered = output::render_single(&global.output, &shown, |c| {
                c.to_toml().unwrap_or_else(|e| e.to_string())
            })?;
            output::print_output(&rendered, global.quiet);
            Ok(())
        }

        ConfigCommand::SetPassword => {
            let settings = Settings::load(global)?;
            let username = gardenly_config::resolve_username(&settings.config)?;

            let secret = rpassword::prompt_password(format!("Password for {username}: "))?;
            if secret.is_empty() {
                return Err(CliError::Validation {
                    field: "password".into(),
                    reason: "value cannot be empty".into(),
                });
            }

            gardenly_config::store_password(&username, &secret)?;
            if !global.quiet {
                eprintln!("Password stored in the system keyring for {username}");
            }
            Ok(())
        }
    }
}
