use poise::serenity_prelude::{self as serenity, Colour, CreateEmbed, Mentionable};
use tracing::{info, instrument};

use super::{checks::is_mod_channel, CommandsContainer};
use crate::database::{models::ChannelSlot, ConfigDatabase};
use crate::log::{discord_log, LogEntry};
use crate::utils::error::CommonError;
use crate::utils::shorthand::BotContextExt;
use crate::{BotContext, BotData, BotError};

/// CommandsContainer for the per-server configuration commands.
pub struct ConfigCommands;

impl CommandsContainer for ConfigCommands {
    type Data = BotData;
    type Error = BotError;

    fn get_all() -> Vec<poise::Command<Self::Data, Self::Error>> {
        vec![set_channel(), show_channels()]
    }
}

/// Bind a channel of this server to one of the bot's channel slots.
///
/// - Moderation: where privileged commands are accepted.
/// - Event: announcements and leaderboards.
/// - Team: section join embeds and team lookups.
/// - Join: event-wide join embeds.
/// - Log: the audit trail of every change.
/// - Game: reserved for game announcements.
///
/// Run it again to move a slot to another channel.
#[poise::command(
    slash_command,
    prefix_command,
    guild_only,
    required_permissions = "ADMINISTRATOR"
)]
#[instrument]
async fn set_channel(
    ctx: BotContext<'_>,
    #[description = "What the channel is used for"] slot: ChannelSlot,
    #[description = "A text channel of this server"] channel: serenity::Channel,
) -> Result<(), BotError> {
    let guild_id = ctx.guild_scope()?;
    let channel = channel.guild().ok_or(CommonError::NotAGuildChannel)?;
    if channel.guild_id != guild_id {
        return Err(CommonError::NotAGuildChannel.into());
    }

    let data = ctx.data();
    data.database
        .set_channel(&guild_id, slot, &channel.id)
        .await?;
    info!("Set the {} channel of guild {} to {}", slot, guild_id, channel.id);

    let entry = LogEntry::info("Channel Set")
        .field("Slot", slot.to_string())
        .field("Channel", channel.mention().to_string())
        .field("Set by", ctx.author().mention().to_string());
    discord_log(
        data.database.as_ref(),
        data.tournament.platform(),
        guild_id,
        &entry,
    )
    .await?;

    ctx.success(
        "Channel Set",
        format!("{} is now the {} channel.", channel.mention(), slot),
    )
    .await
}

/// Show which channel each slot is bound to.
#[poise::command(
    slash_command,
    prefix_command,
    guild_only,
    required_permissions = "ADMINISTRATOR",
    check = "is_mod_channel"
)]
#[instrument]
async fn show_channels(ctx: BotContext<'_>) -> Result<(), BotError> {
    let guild_id = ctx.guild_scope()?;
    let bound = ctx.data().database.get_channels(&guild_id).await?;

    let embed = ChannelSlot::all().into_iter().fold(
        CreateEmbed::new()
            .title("⚙️ Channels")
            .colour(Colour::BLUE),
        |embed, slot| {
            let value = bound
                .iter()
                .find(|(bound_slot, _)| *bound_slot == slot)
                .map(|(_, channel_id)| channel_id.mention().to_string())
                .unwrap_or_else(|| "Not set".to_string());
            embed.field(slot.to_string(), value, true)
        },
    );
    ctx.reply_embed(embed, true).await
}
