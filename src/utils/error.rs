use thiserror::Error;

use crate::database::models::ChannelSlot;
use crate::database::StoreError;
use crate::tournament::error::EngineError;

/// Failures of the command layer that have nothing to do with the tournament itself.
#[derive(Debug, Error)]
pub enum CommonError {
    #[error("You are not in a guild.")]
    NotInAGuild,
    #[error("Please pick a text channel of this server.")]
    NotAGuildChannel,
    #[error("The {0} channel is not set. Ask a moderator to run /set_channel first.")]
    ChannelNotSet(ChannelSlot),
    #[error("This command can only be used in the {0} channel.")]
    WrongChannel(ChannelSlot),
}

pub const GENERIC_FAILURE: &str =
    "Something went wrong. Please let the bot maintainers know if the issue persists.";
pub const STORE_FAILURE: &str =
    "The tournament database is unavailable right now. Nothing was changed, please try again later.";

/// What to tell the user about a failed command, and whether it is worth a log entry.
///
/// Refused requests are shown verbatim and are not failures. Anything else is.
pub fn describe(error: &anyhow::Error) -> (String, bool) {
    if let Some(error) = error.downcast_ref::<EngineError>() {
        return match error.is_rejection() {
            true => (error.to_string(), false),
            false => (STORE_FAILURE.to_string(), true),
        };
    }
    if let Some(error) = error.downcast_ref::<CommonError>() {
        return (error.to_string(), false);
    }
    if error.downcast_ref::<StoreError>().is_some() {
        return (STORE_FAILURE.to_string(), true);
    }
    (GENERIC_FAILURE.to_string(), true)
}
