//! `gardenly check`: log in once and report the account.

use serde::Serialize;

use crate::cli::GlobalOpts;
use crate::error::CliError;
use crate::output;

use super::{Bridge, Settings};

#[derive(Serialize)]
struct CheckReport {
    base_url: String,
    username: String,
    user_id: String,
}

pub async fn handle(settings: &Settings, global: &GlobalOpts) -> Result<(), CliError> {
    let bridge = Bridge::connect(settings)?;
    let tokens = bridge.session.login(bridge.api.as_ref()).await?;

    let report = CheckReport {
        base_url: bridge.config.url.to_string(),
        username: bridge.session.username().to_owned(),
        user_id: tokens.user_id.clone(),
    };
    let text = output::render_single(&global.output, &report, |r| {
        format!("Connected to {} as {} (user {})", r.base_url, r.username, r.user_id)
    })?;
    output::print_output(&text, global.quiet);
    Ok(())
}
