//! Login replay and shutdown handlers.

use smarthome_config::login_state;
use smarthome_core::{apply_login_state, apply_shutdown};

use crate::cli::{GlobalOpts, ShutdownArgs};
use crate::error::CliError;
use crate::output;
use crate::session::Session;

pub async fn apply_login(session: &Session, global: &GlobalOpts) -> Result<(), CliError> {
    let state = login_state(&session.config)?;
    if state.is_empty() {
        output::print_output("No on_login state configured", global.quiet);
        return Ok(());
    }
    let message = match apply_login_state(session.bridge.as_ref(), &state).await? {
        Some(outcome) => format!(
            "Login state applied: {} actions, {} skipped",
            outcome.applied, outcome.skipped
        ),
        None => "Login state already applied".to_owned(),
    };
    output::print_output(&message, global.quiet);
    Ok(())
}

pub async fn shutdown(session: &Session, args: &ShutdownArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let enabled = args.force || session.config.off_shutdown;
    let message = if apply_shutdown(session.bridge.as_ref(), enabled).await? {
        "Everything switched off"
    } else if enabled {
        "Nothing to switch off"
    } else {
        "off_shutdown is not set; use --force"
    };
    output::print_output(message, global.quiet);
    Ok(())
}
