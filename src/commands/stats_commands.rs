use poise::serenity_prelude::{self as serenity, Colour, CreateEmbed, Mentionable};
use poise::CreateReply;
use prettytable::{row, Table};
use tracing::instrument;

use super::CommandsContainer;
use crate::database::models::{CommandUsage, UserUsage};
use crate::database::StatsDatabase;
use crate::tournament::error::EngineError;
use crate::tournament::model::{Event, EventId, JoinScope, Section, Team, TeamId};
use crate::tournament::projector::{RenderedEmbed, Standing};
use crate::utils::shorthand::BotContextExt;
use crate::{BotContext, BotData, BotError};

const TOP_USERS: i64 = 5;

/// CommandsContainer for the usage statistics commands.
pub struct StatsCommands;

impl CommandsContainer for StatsCommands {
    type Data = BotData;
    type Error = BotError;

    fn get_all() -> Vec<poise::Command<Self::Data, Self::Error>> {
        vec![user_stats(), server_stats(), team_stats(), profile()]
    }
}

fn usage_summary(usage: &[CommandUsage]) -> String {
    match usage.is_empty() {
        true => "No commands used yet.".to_string(),
        false => usage
            .iter()
            .map(|row| format!("`{}`: {}", row.command, row.count))
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

/// The most active users as a plain text table.
pub fn top_users_table(users: &[UserUsage]) -> String {
    let mut table = Table::new();
    table.set_titles(row!["No.", "User ID", "Commands"]);
    users.iter().enumerate().for_each(|(i, user)| {
        table.add_row(row![i + 1, user.user_id, user.total]);
    });
    table.to_string()
}

/// Position of a team in the standings, counting from one.
fn rank_of(standings: &[Standing], team_id: TeamId) -> Option<usize> {
    standings
        .iter()
        .position(|standing| standing.team_id == team_id)
        .map(|i| i + 1)
}

fn rank_label(standings: &[Standing], team_id: TeamId) -> String {
    match rank_of(standings, team_id) {
        Some(rank) => format!("#{} of {}", rank, standings.len()),
        None => "Unranked".to_string(),
    }
}

/// Score, rank and roster of one team.
pub fn team_stats_embed(
    event: &Event,
    section: &Section,
    team: &Team,
    standings: &[Standing],
) -> RenderedEmbed {
    let score = standings
        .iter()
        .find(|standing| standing.team_id == team.id)
        .map(|standing| standing.score.to_string())
        .unwrap_or_else(|| "No score yet".to_string());
    let members = team
        .members
        .iter()
        .map(|member| match *member == team.leader_id {
            true => format!("👑 {}", member.mention()),
            false => member.mention().to_string(),
        })
        .collect::<Vec<_>>()
        .join("\n");

    RenderedEmbed::new(format!("{} {}", team.emoji, team.name), Colour::TEAL)
        .description(format!("{} / {}", event.name, section.name))
        .field("Score", score, true)
        .field("Rank", rank_label(standings, team.id), true)
        .field(
            format!("Members ({}/{})", team.members.len(), team.max_members),
            members,
            false,
        )
}

/// One line per event the user takes part in, with the team and its rank.
pub fn profile_lines(events: &[(Event, Vec<Standing>)], user: serenity::UserId) -> Vec<String> {
    events
        .iter()
        .flat_map(|(event, standings)| {
            event
                .memberships(user)
                .into_iter()
                .map(move |(section, team)| {
                    format!(
                        "**{}** (ID: {}): {} **{}** in {}, {}",
                        event.name,
                        event.id,
                        team.emoji,
                        team.name,
                        section.name,
                        rank_label(standings, team.id)
                    )
                })
        })
        .collect()
}

/// Show the score, rank and members of a team.
#[poise::command(slash_command, prefix_command, guild_only)]
#[instrument]
async fn team_stats(
    ctx: BotContext<'_>,
    #[description = "ID of the event"] event_id: EventId,
    #[description = "Name of the team"] team: String,
) -> Result<(), BotError> {
    ctx.guild_event(event_id).await?;
    let engine = ctx.tournament().engine();
    let target = engine.resolve_team(&team, JoinScope::Event(event_id)).await?;
    let (event, standings) = engine.scores(event_id).await?;
    let (section, team) = event
        .team(target.team_id)
        .ok_or_else(|| EngineError::not_found("Team", &target.team_name))?;
    ctx.reply_embed(team_stats_embed(&event, section, team, &standings).to_embed(), true)
        .await
}

/// Show the events a member takes part in, with their team and its rank.
#[poise::command(slash_command, prefix_command, guild_only)]
#[instrument]
async fn profile(
    ctx: BotContext<'_>,
    #[description = "Member to look up (yourself when left empty)"] user: Option<serenity::User>,
) -> Result<(), BotError> {
    let guild_id = ctx.guild_scope()?;
    let user = user.unwrap_or_else(|| ctx.author().clone());
    let engine = ctx.tournament().engine();
    let mut events = vec![];
    for event in engine.events_of(guild_id).await? {
        if event.team_of(user.id).is_none() {
            continue;
        }
        let (event, standings) = engine.scores(event.id).await?;
        events.push((event, standings));
    }
    let lines = profile_lines(&events, user.id);

    let embed = RenderedEmbed::new(format!("🪪 Profile of {}", user.name), Colour::TEAL)
        .description(user.mention().to_string())
        .field("Events", events.len().to_string(), true)
        .field(
            "Teams",
            match lines.is_empty() {
                true => "Not in any event.".to_string(),
                false => lines.join("\n"),
            },
            false,
        );
    ctx.reply_embed(embed.to_embed(), true).await
}

/// Show how a member uses the bot and which teams they are in.
#[poise::command(slash_command, prefix_command, guild_only)]
#[instrument]
async fn user_stats(
    ctx: BotContext<'_>,
    #[description = "Member to look up (yourself when left empty)"] user: Option<serenity::User>,
) -> Result<(), BotError> {
    let guild_id = ctx.guild_scope()?;
    let user = user.unwrap_or_else(|| ctx.author().clone());
    let usage = ctx
        .data()
        .database
        .get_user_usage(&guild_id, &user.id)
        .await?;
    let events = ctx.tournament().engine().events_of(guild_id).await?;
    let teams = events
        .iter()
        .flat_map(|event| {
            event
                .memberships(user.id)
                .into_iter()
                .map(move |(section, team)| {
                    format!("{} **{}** in {} / {}", team.emoji, team.name, event.name, section.name)
                })
        })
        .collect::<Vec<_>>();

    let embed = CreateEmbed::new()
        .title(format!("📊 Stats of {}", user.name))
        .description(user.mention().to_string())
        .field("Commands", usage_summary(&usage), false)
        .field(
            "Teams",
            match teams.is_empty() {
                true => "Not in any team.".to_string(),
                false => teams.join("\n"),
            },
            false,
        )
        .colour(Colour::TEAL);
    ctx.reply_embed(embed, true).await
}

/// Show the counters of this server and its most active users.
#[poise::command(slash_command, prefix_command, guild_only)]
#[instrument]
async fn server_stats(ctx: BotContext<'_>) -> Result<(), BotError> {
    let guild_id = ctx.guild_scope()?;
    let database = &ctx.data().database;
    let stats = database.get_server_stats(&guild_id).await?;
    let top_users = database.get_top_users(&guild_id, TOP_USERS).await?;

    let counters = stats
        .iter()
        .map(|(stat, count)| format!("{}: {}", stat.label(), count))
        .collect::<Vec<_>>()
        .join("\n");
    let mut content = format!("Server stats\n```\n{}\n```", counters);
    if !top_users.is_empty() {
        content.push_str(&format!(
            "\nMost active users\n```\n{}\n```",
            top_users_table(&top_users)
        ));
    }

    ctx.send(CreateReply::default().content(content).ephemeral(true))
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tournament::model::fixtures;

    fn standing(team_id: TeamId, team_name: &str, score: i64) -> Standing {
        Standing {
            team_id,
            team_name: team_name.to_string(),
            score,
        }
    }

    #[test]
    fn team_stats_show_score_rank_and_leader() {
        let mut event = fixtures::event();
        event.sections[0].teams[1]
            .members
            .push(serenity::UserId::new(5));
        let standings = vec![standing(100, "Red", 12), standing(101, "Blue", 7)];
        let (section, blue) = event.team(101).unwrap();

        let embed = team_stats_embed(&event, section, blue, &standings);
        assert_eq!(embed.title, "🐯 Blue");
        assert_eq!(embed.description, "Cup / A");
        assert_eq!(embed.fields[0], ("Score".to_string(), "7".to_string(), true));
        assert_eq!(embed.fields[1], ("Rank".to_string(), "#2 of 2".to_string(), true));
        assert_eq!(embed.fields[2].0, "Members (2/3)");
        assert_eq!(embed.fields[2].1, "👑 <@1101>\n<@5>");
    }

    #[test]
    fn unscored_teams_are_unranked() {
        let event = fixtures::event();
        let (section, red) = event.team(102).unwrap();
        let embed = team_stats_embed(&event, section, red, &[standing(100, "Red", 3)]);
        assert_eq!(embed.fields[0].1, "No score yet");
        assert_eq!(embed.fields[1].1, "Unranked");
    }

    #[test]
    fn profile_lists_team_and_rank_per_event() {
        let cup = fixtures::event();
        let mut league = fixtures::event();
        league.id = 2;
        league.name = "League".to_string();
        let events = vec![
            (cup, vec![standing(101, "Blue", 9), standing(100, "Red", 4)]),
            (league, vec![]),
        ];

        let lines = profile_lines(&events, serenity::UserId::new(1100));
        assert_eq!(
            lines,
            vec![
                "**Cup** (ID: 1): 🦁 **Red** in A, #2 of 2".to_string(),
                "**League** (ID: 2): 🦁 **Red** in A, Unranked".to_string(),
            ]
        );
        assert!(profile_lines(&events, serenity::UserId::new(5)).is_empty());
    }

    #[test]
    fn empty_usage_is_spelled_out() {
        assert_eq!(usage_summary(&[]), "No commands used yet.");
        let usage = vec![CommandUsage {
            command: "join_team".to_string(),
            count: 3,
        }];
        assert_eq!(usage_summary(&usage), "`join_team`: 3");
    }

    #[test]
    fn top_users_keep_their_order() {
        let users = vec![
            UserUsage {
                user_id: "42".to_string(),
                total: 10,
            },
            UserUsage {
                user_id: "7".to_string(),
                total: 2,
            },
        ];
        let table = top_users_table(&users);
        assert!(table.find("42").unwrap() < table.find("10").unwrap());
        assert!(table.contains("Commands"));
    }
}
