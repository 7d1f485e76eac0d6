use poise::serenity_prelude::{self as serenity, Reaction};
use tracing::{debug, info};

use crate::tournament::router::{ReactionEvent, ReactionKind};
use crate::{BotData, BotError};

/// Routes gateway events that are not commands into the tournament core.
pub async fn event_handler(
    _ctx: &serenity::Context,
    event: &serenity::FullEvent,
    framework: poise::FrameworkContext<'_, BotData, BotError>,
    data: &BotData,
) -> Result<(), BotError> {
    match event {
        serenity::FullEvent::Ready { data_about_bot } => {
            info!("Ready as {}", data_about_bot.user.name);
        }
        serenity::FullEvent::ReactionAdd { add_reaction } => {
            if let Some(reaction) = reaction_event(ReactionKind::Add, add_reaction) {
                let outcome = data
                    .tournament
                    .on_reaction(&reaction, framework.bot_id)
                    .await?;
                debug!("Reaction {} on {}: {:?}", reaction.emoji, reaction.message_id, outcome);
            }
        }
        serenity::FullEvent::ReactionRemove { removed_reaction } => {
            if let Some(reaction) = reaction_event(ReactionKind::Remove, removed_reaction) {
                let outcome = data
                    .tournament
                    .on_reaction(&reaction, framework.bot_id)
                    .await?;
                debug!("Reaction {} off {}: {:?}", reaction.emoji, reaction.message_id, outcome);
            }
        }
        serenity::FullEvent::Message { new_message } => {
            let Some(guild_id) = new_message.guild_id else {
                return Ok(());
            };
            if new_message.author.bot {
                return Ok(());
            }
            data.tournament
                .on_team_message(
                    guild_id,
                    new_message.channel_id,
                    new_message.id,
                    new_message.author.id,
                    &new_message.content,
                )
                .await?;
        }
        _ => {}
    }
    Ok(())
}

/// Reactions without a known user cannot change any membership.
fn reaction_event(kind: ReactionKind, reaction: &Reaction) -> Option<ReactionEvent> {
    let user_id = reaction.user_id?;
    Some(ReactionEvent {
        kind,
        guild_id: reaction.guild_id,
        channel_id: reaction.channel_id,
        message_id: reaction.message_id,
        user_id,
        emoji: reaction.emoji.to_string(),
        is_bot: reaction
            .member
            .as_ref()
            .map(|member| member.user.bot)
            .unwrap_or(false),
    })
}
