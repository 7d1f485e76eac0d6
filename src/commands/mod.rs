pub mod config_commands;
pub mod event_commands;
pub mod score_commands;
pub mod stats_commands;
pub mod team_commands;

/// A way to group commands together.
///
/// Implementors of this trait return the list of their commands from within their own module.
/// Commands are grouped by what they manage rather than by who may run them; every privileged
/// command carries its own permission and channel checks.
///
/// Implementors should not own the commands: they call the functions generated by the
/// `poise::command` macro and return the result, so only the implementor needs to be `pub`.
///
/// For example, a group of configuration commands:
/// ```ignore
/// pub struct ConfigCommands;
///
/// impl CommandsContainer for ConfigCommands {
///     type Data = BotData;
///     type Error = BotError;
///
///     fn get_all() -> Vec<poise::Command<Self::Data, Self::Error>> {
///         vec![set_channel()]
///     }
/// }
/// ```
pub trait CommandsContainer {
    type Data;
    type Error;

    fn get_all() -> Vec<poise::Command<Self::Data, Self::Error>>;
}

/// Checks shared by the privileged commands.
pub mod checks {
    use crate::database::{models::ChannelSlot, ConfigDatabase};
    use crate::utils::error::CommonError;
    use crate::{BotContext, BotError};

    /// Moderation commands must be run in the moderation channel, once one is set.
    pub async fn is_mod_channel(ctx: BotContext<'_>) -> Result<bool, BotError> {
        let guild_id = ctx.guild_id().ok_or(CommonError::NotInAGuild)?;
        match ctx
            .data()
            .database
            .get_channel(&guild_id, ChannelSlot::Moderation)
            .await?
        {
            Some(channel_id) if channel_id != ctx.channel_id() => {
                Err(CommonError::WrongChannel(ChannelSlot::Moderation).into())
            }
            _ => Ok(true),
        }
    }
}
