use poise::serenity_prelude::{self as serenity, Colour, CreateEmbed, Mentionable};
use tracing::{info, instrument};

use super::{checks::is_mod_channel, CommandsContainer};
use crate::database::models::{ChannelSlot, EventStatus};
use crate::tournament::model::{Event, EventId, SectionId};
use crate::tournament::registry::RenderTarget;
use crate::utils::discord::paginate;
use crate::utils::shorthand::BotContextExt;
use crate::{BotContext, BotData, BotError};

const EVENTS_PER_PAGE: usize = 5;

/// CommandsContainer for the commands managing events and their sections.
pub struct EventCommands;

impl CommandsContainer for EventCommands {
    type Data = BotData;
    type Error = BotError;

    fn get_all() -> Vec<poise::Command<Self::Data, Self::Error>> {
        vec![
            create_event(),
            list_events(),
            close_event(),
            end_event(),
            reload_event(),
            create_section(),
            delete_section(),
            create_section_embed(),
            delete_section_embed(),
            list_section_embeds(),
        ]
    }
}

fn status_label(event: &Event) -> &'static str {
    match event.status {
        EventStatus::Open => "🟢 Open",
        EventStatus::Ended => "🏁 Ended",
    }
}

/// Splits events into pages of embeds for the paginated listing.
pub fn event_pages(events: &[Event]) -> Vec<CreateEmbed> {
    events
        .chunks(EVENTS_PER_PAGE)
        .map(|chunk| {
            chunk.iter().fold(
                CreateEmbed::new()
                    .title("🎯 Events")
                    .colour(Colour::BLURPLE),
                |embed, event| {
                    embed.field(
                        format!("{} (ID: {})", event.name, event.id),
                        format!(
                            "Status: {}\nSections: {}/{}\nTeams: {}\nMembers: {}",
                            status_label(event),
                            event.sections.len(),
                            event.max_sections,
                            event.team_count(),
                            event.member_count()
                        ),
                        false,
                    )
                },
            )
        })
        .collect()
}

pub fn message_link(
    guild_id: serenity::GuildId,
    channel_id: serenity::ChannelId,
    message_id: serenity::MessageId,
) -> String {
    format!(
        "https://discord.com/channels/{}/{}/{}",
        guild_id, channel_id, message_id
    )
}

/// Create a new event.
///
/// Its join embed is posted in the join channel when one is set.
#[poise::command(
    slash_command,
    prefix_command,
    guild_only,
    required_permissions = "ADMINISTRATOR",
    check = "is_mod_channel"
)]
#[instrument]
async fn create_event(
    ctx: BotContext<'_>,
    #[description = "Name of the event"] name: String,
    #[description = "Maximum number of sections"] max_sections: i32,
    #[description = "Role granted to every member of a team"] role: Option<serenity::Role>,
    #[description = "Channel dedicated to this event"] channel: Option<serenity::Channel>,
) -> Result<(), BotError> {
    let guild_id = ctx.guild_scope()?;
    ctx.defer().await?;
    let applied = ctx
        .tournament()
        .engine()
        .create_event(
            guild_id,
            &name,
            max_sections,
            role.as_ref().map(|r| r.id),
            channel.as_ref().map(|c| c.id()),
        )
        .await?;
    let event_id = ctx.settle(applied).await;
    info!("{} created event {} ({})", ctx.author().name, name, event_id);

    let mut description = format!(
        "Event **{}** created with ID `{}`.\nMax sections: {}",
        name.trim(),
        event_id,
        max_sections
    );
    if let Some(role) = role {
        description.push_str(&format!("\nRole: {}", role.mention()));
    }
    ctx.success("Event Created", description).await
}

/// List every event of this server.
#[poise::command(slash_command, prefix_command, guild_only)]
#[instrument]
async fn list_events(ctx: BotContext<'_>) -> Result<(), BotError> {
    let guild_id = ctx.guild_scope()?;
    let events = ctx.tournament().engine().events_of(guild_id).await?;
    if events.is_empty() {
        return ctx
            .reply_embed(
                CreateEmbed::new()
                    .title("🎯 Events")
                    .description("There are no events yet. Create one with /create_event.")
                    .colour(Colour::BLURPLE),
                true,
            )
            .await;
    }
    paginate(ctx, event_pages(&events)).await
}

/// Close an event, deleting it together with its sections, teams and scores.
#[poise::command(
    slash_command,
    prefix_command,
    guild_only,
    required_permissions = "ADMINISTRATOR",
    check = "is_mod_channel"
)]
#[instrument]
async fn close_event(
    ctx: BotContext<'_>,
    #[description = "ID of the event"] event_id: EventId,
) -> Result<(), BotError> {
    ctx.guild_event(event_id).await?;
    ctx.defer().await?;
    let applied = ctx.tournament().engine().close_event(event_id).await?;
    let name = ctx.settle(applied).await;
    info!("{} closed event {} ({})", ctx.author().name, name, event_id);
    ctx.success(
        "Event Closed",
        format!("Event **{}** and everything in it was deleted.", name),
    )
    .await
}

/// End an event: announce the winners and reset the scores.
///
/// The teams stay until the event is closed.
#[poise::command(
    slash_command,
    prefix_command,
    guild_only,
    required_permissions = "ADMINISTRATOR",
    check = "is_mod_channel"
)]
#[instrument]
async fn end_event(
    ctx: BotContext<'_>,
    #[description = "ID of the event"] event_id: EventId,
    #[description = "Role to ping with the results"] ping: Option<serenity::Role>,
) -> Result<(), BotError> {
    let event = ctx.guild_event(event_id).await?;
    ctx.defer().await?;
    let applied = ctx
        .tournament()
        .engine()
        .end_event(event_id, ping.map(|role| role.id))
        .await?;
    let standings = ctx.settle(applied).await;
    info!("{} ended event {} ({})", ctx.author().name, event.name, event_id);

    let winners = standings
        .iter()
        .take(3)
        .enumerate()
        .map(|(i, s)| format!("#{} **{}** ({} points)", i + 1, s.team_name, s.score))
        .collect::<Vec<_>>()
        .join("\n");
    ctx.success(
        "Event Ended",
        format!("Event **{}** has ended.\n\n{}", event.name, winners),
    )
    .await
}

/// Reload an event from the database and refresh its embeds.
#[poise::command(
    slash_command,
    prefix_command,
    guild_only,
    required_permissions = "ADMINISTRATOR",
    check = "is_mod_channel"
)]
#[instrument]
async fn reload_event(
    ctx: BotContext<'_>,
    #[description = "ID of the event"] event_id: EventId,
) -> Result<(), BotError> {
    ctx.guild_event(event_id).await?;
    ctx.defer().await?;
    let applied = ctx.tournament().engine().reload_event(event_id).await?;
    let event = ctx.settle(applied).await;
    ctx.success(
        "Event Reloaded",
        format!(
            "Event **{}** reloaded: {} sections, {} teams, {} members.",
            event.name,
            event.sections.len(),
            event.team_count(),
            event.member_count()
        ),
    )
    .await
}

/// Create a section in an event.
#[poise::command(
    slash_command,
    prefix_command,
    guild_only,
    required_permissions = "ADMINISTRATOR",
    check = "is_mod_channel"
)]
#[instrument]
async fn create_section(
    ctx: BotContext<'_>,
    #[description = "ID of the event"] event_id: EventId,
    #[description = "Name of the section"] name: String,
    #[description = "Maximum number of teams"] max_teams: i32,
) -> Result<(), BotError> {
    let event = ctx.guild_event(event_id).await?;
    ctx.defer().await?;
    let applied = ctx
        .tournament()
        .engine()
        .create_section(event_id, &name, max_teams)
        .await?;
    let section_id = ctx.settle(applied).await;
    ctx.success(
        "Section Created",
        format!(
            "Section **{}** created in **{}** with ID `{}`.\nMax teams: {}",
            name.trim(),
            event.name,
            section_id,
            max_teams
        ),
    )
    .await
}

/// Delete a section together with its teams.
#[poise::command(
    slash_command,
    prefix_command,
    guild_only,
    required_permissions = "ADMINISTRATOR",
    check = "is_mod_channel"
)]
#[instrument]
async fn delete_section(
    ctx: BotContext<'_>,
    #[description = "ID of the section"] section_id: SectionId,
) -> Result<(), BotError> {
    let guild_id = ctx.guild_scope()?;
    ctx.tournament()
        .engine()
        .section_in(guild_id, section_id)
        .await?;
    ctx.defer().await?;
    let applied = ctx.tournament().engine().delete_section(section_id).await?;
    let name = ctx.settle(applied).await;
    ctx.success(
        "Section Deleted",
        format!("Section **{}** and its teams were deleted.", name),
    )
    .await
}

/// Post a join embed for a section in the team channel.
#[poise::command(
    slash_command,
    prefix_command,
    guild_only,
    required_permissions = "ADMINISTRATOR",
    check = "is_mod_channel"
)]
#[instrument]
async fn create_section_embed(
    ctx: BotContext<'_>,
    #[description = "ID of the section"] section_id: SectionId,
) -> Result<(), BotError> {
    let guild_id = ctx.guild_scope()?;
    let (event, section) = ctx
        .tournament()
        .engine()
        .section_in(guild_id, section_id)
        .await?;
    ctx.defer().await?;
    let tracked = ctx
        .tournament()
        .publish(
            guild_id,
            RenderTarget::Section {
                event_id: event.id,
                section_id,
            },
            ChannelSlot::Team,
        )
        .await?;
    ctx.success(
        "Section Embed Created",
        format!(
            "Join embed for **{}** posted: {}",
            section.name,
            message_link(guild_id, tracked.channel_id, tracked.message_id)
        ),
    )
    .await
}

/// Delete the join embeds of a section.
#[poise::command(
    slash_command,
    prefix_command,
    guild_only,
    required_permissions = "ADMINISTRATOR",
    check = "is_mod_channel"
)]
#[instrument]
async fn delete_section_embed(
    ctx: BotContext<'_>,
    #[description = "ID of the section"] section_id: SectionId,
) -> Result<(), BotError> {
    let guild_id = ctx.guild_scope()?;
    let (event, section) = ctx
        .tournament()
        .engine()
        .section_in(guild_id, section_id)
        .await?;
    let removed = ctx
        .tournament()
        .withdraw(RenderTarget::Section {
            event_id: event.id,
            section_id,
        })
        .await?;
    let description = match removed {
        0 => format!("Section **{}** has no join embed.", section.name),
        n => format!("Deleted {} join embed(s) of section **{}**.", n, section.name),
    };
    ctx.success("Section Embed Deleted", description).await
}

/// List the join embeds of every section in this server.
#[poise::command(
    slash_command,
    prefix_command,
    guild_only,
    required_permissions = "ADMINISTRATOR",
    check = "is_mod_channel"
)]
#[instrument]
async fn list_section_embeds(ctx: BotContext<'_>) -> Result<(), BotError> {
    let guild_id = ctx.guild_scope()?;
    let events = ctx.tournament().engine().events_of(guild_id).await?;
    let registry = ctx.tournament().projector().registry();

    let mut lines = vec![];
    for event in &events {
        for section in &event.sections {
            let tracked = registry.for_target(RenderTarget::Section {
                event_id: event.id,
                section_id: section.id,
            });
            let status = match tracked.first() {
                Some(message) => format!(
                    "✅ {}",
                    message_link(guild_id, message.channel_id, message.message_id)
                ),
                None => "❌ No embed".to_string(),
            };
            lines.push(format!(
                "**{}** / **{}** (ID: {}): {}",
                event.name, section.name, section.id, status
            ));
        }
    }
    let description = match lines.is_empty() {
        true => "There are no sections yet.".to_string(),
        false => lines.join("\n"),
    };
    ctx.reply_embed(
        CreateEmbed::new()
            .title("📋 Section Embeds")
            .description(description)
            .colour(Colour::BLUE),
        true,
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tournament::model::fixtures;

    #[test]
    fn events_are_paged_by_five() {
        let events: Vec<Event> = (1..=7)
            .map(|id| Event {
                id,
                ..fixtures::event()
            })
            .collect();
        assert_eq!(event_pages(&events).len(), 2);
        assert_eq!(event_pages(&events[..5]).len(), 1);
        assert!(event_pages(&[]).is_empty());
    }

    #[test]
    fn ended_events_are_labelled() {
        let mut event = fixtures::event();
        assert_eq!(status_label(&event), "🟢 Open");
        event.status = EventStatus::Ended;
        assert_eq!(status_label(&event), "🏁 Ended");
    }
}
