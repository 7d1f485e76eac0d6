use poise::serenity_prelude::{self as serenity, Colour, CreateEmbed, Mentionable};
use tracing::{info, instrument};

use super::{checks::is_mod_channel, CommandsContainer};
use crate::tournament::effects::JoinMethod;
use crate::tournament::model::{Event, EventId, JoinScope, SectionId};
use crate::utils::discord::paginate;
use crate::utils::shorthand::BotContextExt;
use crate::{BotContext, BotData, BotError};

const NO_REASON: &str = "No reason provided";

/// CommandsContainer for the commands managing teams and their members.
pub struct TeamCommands;

impl CommandsContainer for TeamCommands {
    type Data = BotData;
    type Error = BotError;

    fn get_all() -> Vec<poise::Command<Self::Data, Self::Error>> {
        vec![
            create_team(),
            join_team(),
            list_teams(),
            delete_team(),
            disqualify_team(),
            disqualify_member(),
        ]
    }
}

/// One page per section, listing its teams with their members.
pub fn team_pages(event: &Event) -> Vec<CreateEmbed> {
    event
        .sections
        .iter()
        .map(|section| {
            let embed = CreateEmbed::new()
                .title(format!("👥 {} / {}", event.name, section.name))
                .description(format!(
                    "Section ID: {}\nTeams: {}/{}",
                    section.id,
                    section.teams.len(),
                    section.max_teams
                ))
                .colour(Colour::BLURPLE);
            section.teams.iter().fold(embed, |embed, team| {
                let members = team
                    .members
                    .iter()
                    .map(|member| match *member == team.leader_id {
                        true => format!("{} (Leader)", member.mention()),
                        false => member.mention().to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join("\n");
                embed.field(
                    format!(
                        "{} {} ({}/{})",
                        team.emoji,
                        team.name,
                        team.members.len(),
                        team.max_members
                    ),
                    members,
                    true,
                )
            })
        })
        .collect()
}

/// Create a team in a section, led by the given member.
#[poise::command(
    slash_command,
    prefix_command,
    guild_only,
    required_permissions = "ADMINISTRATOR",
    check = "is_mod_channel"
)]
#[instrument]
async fn create_team(
    ctx: BotContext<'_>,
    #[description = "ID of the section"] section_id: SectionId,
    #[description = "Name of the team"] name: String,
    #[description = "Leader of the team"] leader: serenity::User,
    #[description = "Maximum number of members, leader included"] max_members: i32,
    #[description = "Emoji used to join the team (picked automatically when left empty)"]
    emoji: Option<String>,
) -> Result<(), BotError> {
    let guild_id = ctx.guild_scope()?;
    ctx.tournament()
        .engine()
        .section_in(guild_id, section_id)
        .await?;
    ctx.defer().await?;
    let applied = ctx
        .tournament()
        .engine()
        .create_team(section_id, &name, leader.id, max_members, emoji.as_deref())
        .await?;
    let team = ctx.settle(applied).await;
    info!(
        "{} created team {} ({}) led by {}",
        ctx.author().name,
        team.name,
        team.id,
        leader.name
    );
    ctx.success(
        "Team Created",
        format!(
            "{} Team **{}** created with ID `{}`.\nLeader: {}\nMax members: {}",
            team.emoji,
            team.name,
            team.id,
            leader.mention(),
            team.max_members
        ),
    )
    .await
}

/// Join a team by name.
///
/// Give an event or a section when the name is used by more than one team.
#[poise::command(slash_command, prefix_command, guild_only)]
#[instrument]
async fn join_team(
    ctx: BotContext<'_>,
    #[description = "Name of the team"] name: String,
    #[description = "ID of the event the team is in"] event_id: Option<EventId>,
    #[description = "ID of the section the team is in"] section_id: Option<SectionId>,
) -> Result<(), BotError> {
    let guild_id = ctx.guild_scope()?;
    let scope = match (section_id, event_id) {
        (Some(section_id), _) => {
            let (event, _) = ctx
                .tournament()
                .engine()
                .section_in(guild_id, section_id)
                .await?;
            JoinScope::Section {
                event_id: event.id,
                section_id,
            }
        }
        (None, Some(event_id)) => JoinScope::Event(ctx.guild_event(event_id).await?.id),
        (None, None) => JoinScope::Guild(guild_id),
    };
    let applied = ctx
        .tournament()
        .engine()
        .join(ctx.author().id, &name, scope, JoinMethod::Command)
        .await?;
    let joined = ctx.settle(applied).await;
    ctx.success(
        "Team Joined",
        format!(
            "You joined **{}** in **{} / {}**.",
            joined.team_name, joined.event_name, joined.section_name
        ),
    )
    .await
}

/// List the teams of an event, one page per section.
#[poise::command(slash_command, prefix_command, guild_only)]
#[instrument]
async fn list_teams(
    ctx: BotContext<'_>,
    #[description = "ID of the event"] event_id: EventId,
) -> Result<(), BotError> {
    let event = ctx.guild_event(event_id).await?;
    if event.sections.is_empty() {
        return ctx
            .reply_embed(
                CreateEmbed::new()
                    .title(format!("👥 {}", event.name))
                    .description("This event has no sections yet.")
                    .colour(Colour::BLURPLE),
                true,
            )
            .await;
    }
    paginate(ctx, team_pages(&event)).await
}

/// Delete a team. Its members lose the event role.
#[poise::command(
    slash_command,
    prefix_command,
    guild_only,
    required_permissions = "ADMINISTRATOR",
    check = "is_mod_channel"
)]
#[instrument]
async fn delete_team(
    ctx: BotContext<'_>,
    #[description = "ID of the event"] event_id: EventId,
    #[description = "Name of the team"] team: String,
) -> Result<(), BotError> {
    ctx.guild_event(event_id).await?;
    ctx.defer().await?;
    let engine = ctx.tournament().engine();
    let target = engine.resolve_team(&team, JoinScope::Event(event_id)).await?;
    let applied = engine.delete_team(event_id, target.team_id).await?;
    let deleted = ctx.settle(applied).await;
    ctx.success(
        "Team Deleted",
        format!(
            "Team **{}** was deleted from **{} / {}**.",
            deleted.team_name, deleted.event_name, deleted.section_name
        ),
    )
    .await
}

/// Disqualify a team, removing every one of its members.
#[poise::command(
    slash_command,
    prefix_command,
    guild_only,
    required_permissions = "ADMINISTRATOR",
    check = "is_mod_channel"
)]
#[instrument]
async fn disqualify_team(
    ctx: BotContext<'_>,
    #[description = "ID of the event"] event_id: EventId,
    #[description = "Name of the team"] team: String,
    #[description = "Reason sent to the members"] reason: Option<String>,
) -> Result<(), BotError> {
    ctx.guild_event(event_id).await?;
    ctx.defer().await?;
    let reason = reason.unwrap_or_else(|| NO_REASON.to_string());
    let engine = ctx.tournament().engine();
    let target = engine.resolve_team(&team, JoinScope::Event(event_id)).await?;
    let applied = engine
        .disqualify_team(event_id, target.team_id, &reason)
        .await?;
    let removed = ctx.settle(applied).await;
    ctx.success(
        "Team Disqualified",
        format!(
            "Team **{}** was disqualified and {} member(s) removed.\nReason: {}",
            target.team_name,
            removed.len(),
            reason
        ),
    )
    .await
}

/// Disqualify a member from every team of an event.
#[poise::command(
    slash_command,
    prefix_command,
    guild_only,
    required_permissions = "ADMINISTRATOR",
    check = "is_mod_channel"
)]
#[instrument]
async fn disqualify_member(
    ctx: BotContext<'_>,
    #[description = "ID of the event"] event_id: EventId,
    #[description = "Member to disqualify"] member: serenity::User,
    #[description = "Reason sent to the member"] reason: Option<String>,
) -> Result<(), BotError> {
    let event = ctx.guild_event(event_id).await?;
    ctx.defer().await?;
    let reason = reason.unwrap_or_else(|| NO_REASON.to_string());
    let applied = ctx
        .tournament()
        .engine()
        .disqualify_member(event_id, member.id, &reason)
        .await?;
    let teams = ctx.settle(applied).await;
    let description = format!(
        "{} was removed from {} of **{}**.\nReason: {}",
        member.mention(),
        teams
            .iter()
            .map(|team| format!("**{}**", team.team_name))
            .collect::<Vec<_>>()
            .join(", "),
        event.name,
        reason
    );
    ctx.success("Member Disqualified", description).await
}
