use poise::CreateReply;
use prettytable::{row, Table};
use tracing::{info, instrument};

use super::{checks::is_mod_channel, CommandsContainer};
use crate::database::models::ChannelSlot;
use crate::tournament::model::{EventId, JoinScope};
use crate::tournament::projector::Standing;
use crate::tournament::registry::RenderTarget;
use crate::utils::shorthand::BotContextExt;
use crate::{BotContext, BotData, BotError};

/// CommandsContainer for the leaderboard commands.
pub struct ScoreCommands;

impl CommandsContainer for ScoreCommands {
    type Data = BotData;
    type Error = BotError;

    fn get_all() -> Vec<poise::Command<Self::Data, Self::Error>> {
        vec![create_leaderboard(), set_score(), add_score(), show_scores()]
    }
}

/// The standings as a plain text table.
pub fn score_table(standings: &[Standing]) -> String {
    let mut table = Table::new();
    table.set_titles(row!["Rank", "Team", "Score"]);
    standings.iter().enumerate().for_each(|(i, standing)| {
        table.add_row(row![i + 1, standing.team_name, standing.score]);
    });
    table.to_string()
}

/// Post a live leaderboard for an event.
///
/// It goes to the event's own channel, or to the event channel of the server.
#[poise::command(
    slash_command,
    prefix_command,
    guild_only,
    required_permissions = "ADMINISTRATOR",
    check = "is_mod_channel"
)]
#[instrument]
async fn create_leaderboard(
    ctx: BotContext<'_>,
    #[description = "ID of the event"] event_id: EventId,
) -> Result<(), BotError> {
    let event = ctx.guild_event(event_id).await?;
    ctx.defer().await?;
    let target = RenderTarget::Leaderboard(event_id);
    let tracked = match event.channel_id {
        Some(channel_id) => ctx.tournament().publish_in(channel_id, target).await?,
        None => {
            ctx.tournament()
                .publish(event.guild_id, target, ChannelSlot::Event)
                .await?
        }
    };
    ctx.success(
        "Leaderboard Created",
        format!(
            "The leaderboard of **{}** is live in <#{}>.",
            event.name, tracked.channel_id
        ),
    )
    .await
}

/// Set the score of a team.
#[poise::command(
    slash_command,
    prefix_command,
    guild_only,
    required_permissions = "ADMINISTRATOR",
    check = "is_mod_channel"
)]
#[instrument]
async fn set_score(
    ctx: BotContext<'_>,
    #[description = "ID of the event"] event_id: EventId,
    #[description = "Name of the team"] team: String,
    #[description = "New score"] score: i64,
) -> Result<(), BotError> {
    ctx.guild_event(event_id).await?;
    let engine = ctx.tournament().engine();
    let target = engine.resolve_team(&team, JoinScope::Event(event_id)).await?;
    let applied = engine.set_score(event_id, target.team_id, score).await?;
    let score = ctx.settle(applied).await;
    info!("{} set the score of {} to {}", ctx.author().name, target.team_name, score);
    ctx.success(
        "Score Set",
        format!("**{}** now has {} points.", target.team_name, score),
    )
    .await
}

/// Add points to a team. Negative points are subtracted.
#[poise::command(
    slash_command,
    prefix_command,
    guild_only,
    required_permissions = "ADMINISTRATOR",
    check = "is_mod_channel"
)]
#[instrument]
async fn add_score(
    ctx: BotContext<'_>,
    #[description = "ID of the event"] event_id: EventId,
    #[description = "Name of the team"] team: String,
    #[description = "Points to add"] points: i64,
) -> Result<(), BotError> {
    ctx.guild_event(event_id).await?;
    let engine = ctx.tournament().engine();
    let target = engine.resolve_team(&team, JoinScope::Event(event_id)).await?;
    let applied = engine.add_score(event_id, target.team_id, points).await?;
    let score = ctx.settle(applied).await;
    info!("{} added {} points to {}", ctx.author().name, points, target.team_name);
    ctx.success(
        "Score Updated",
        format!("**{}** now has {} points.", target.team_name, score),
    )
    .await
}

/// Show the current scores of an event.
#[poise::command(slash_command, prefix_command, guild_only)]
#[instrument]
async fn show_scores(
    ctx: BotContext<'_>,
    #[description = "ID of the event"] event_id: EventId,
) -> Result<(), BotError> {
    ctx.guild_event(event_id).await?;
    let (event, standings) = ctx.tournament().engine().scores(event_id).await?;

    if standings.is_empty() {
        ctx.send(
            CreateReply::default()
                .content(format!("No scores were recorded for {} yet.", event.name))
                .ephemeral(true),
        )
        .await?;
        return Ok(());
    }

    ctx.send(CreateReply::default().content(format!(
        "Scores of {}\n```\n{}\n```",
        event.name,
        score_table(&standings)
    )))
    .await?;
    Ok(())
}
