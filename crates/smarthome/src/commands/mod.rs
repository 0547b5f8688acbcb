//! Command dispatch: CLI args -> bridge calls -> output formatting.

pub mod control;
pub mod discover;
pub mod list;
pub mod login;
pub mod pair;
pub mod util;
pub mod watch;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;
use crate::session::Session;

/// Dispatch a bridge-bound command to the appropriate handler.
pub async fn dispatch(cmd: &Command, session: &Session, global: &GlobalOpts) -> Result<(), CliError> {
    match cmd {
        Command::List(args) => list::devices(session, args, global),
        Command::Groups => list::groups(session, global),
        Command::Switch(args) => control::switch(session, args, global).await,
        Command::Brightness(args) => control::brightness(session, args, global).await,
        Command::Color(args) => control::color(session, args, global).await,
        Command::Temperature(args) => control::temperature(session, args, global).await,
        Command::Position(args) => control::position(session, args, global).await,
        Command::Up(args) => control::up(session, args, global).await,
        Command::Down(args) => control::down(session, args, global).await,
        Command::Scene(args) => control::scene(session, args, global).await,
        Command::Watch(args) => watch::handle(session, args, global).await,
        Command::ApplyLogin => login::apply_login(session, global).await,
        Command::Shutdown(args) => login::shutdown(session, args, global).await,
        // Handled before a session is opened
        Command::Pair(_) | Command::Discover(_) | Command::Completions(_) => Ok(()),
    }
}
