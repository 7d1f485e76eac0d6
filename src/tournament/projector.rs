use std::collections::{HashMap, HashSet};

use poise::serenity_prelude::{ChannelId, Colour, CreateEmbed, CreateEmbedFooter, Mentionable};
use tracing::{debug, warn};

use super::error::EngineError;
use super::model::{normalize_emoji, Event, Section, Team, TeamId};
use super::registry::{MessageRegistry, RenderTarget, TrackedMessage};
use crate::database::models::ScoreRow;
use crate::platform::{Platform, PlatformError};

/// Discord refuses embeds with more fields than this.
const MAX_FIELDS: usize = 25;
const MAX_FIELD_VALUE: usize = 1024;

const MEDALS: [&str; 3] = ["🥇", "🥈", "🥉"];

/// Embed content independent of the Discord builder, so renders can be compared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmbed {
    pub title: String,
    pub description: String,
    pub colour: Colour,
    pub fields: Vec<(String, String, bool)>,
    pub footer: Option<String>,
}

impl RenderedEmbed {
    pub fn new(title: impl Into<String>, colour: Colour) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            colour,
            fields: vec![],
            footer: None,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>, inline: bool) -> Self {
        self.fields.push((name.into(), value.into(), inline));
        self
    }

    pub fn footer(mut self, footer: impl Into<String>) -> Self {
        self.footer = Some(footer.into());
        self
    }

    /// Keeps the embed within Discord's limits, noting how many fields were dropped.
    fn truncated(mut self) -> Self {
        for (_, value, _) in self.fields.iter_mut() {
            if value.chars().count() > MAX_FIELD_VALUE {
                *value = value.chars().take(MAX_FIELD_VALUE - 1).collect::<String>() + "…";
            }
        }
        if self.fields.len() > MAX_FIELDS {
            let hidden = self.fields.len() - (MAX_FIELDS - 1);
            self.fields.truncate(MAX_FIELDS - 1);
            self.fields
                .push(("…".to_string(), format!("{} more not shown", hidden), false));
        }
        self
    }

    pub fn to_embed(&self) -> CreateEmbed {
        let mut embed = CreateEmbed::new()
            .title(&self.title)
            .colour(self.colour)
            .fields(self.fields.clone());
        if !self.description.is_empty() {
            embed = embed.description(&self.description);
        }
        if let Some(footer) = &self.footer {
            embed = embed.footer(CreateEmbedFooter::new(footer));
        }
        embed
    }
}

/// A rendered message together with the reactions it must carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Projection {
    pub embed: RenderedEmbed,
    /// Team emojis in display order, one per team.
    pub emojis: Vec<String>,
    /// Normalized emoji to team, as stored in the message registry.
    pub routes: HashMap<String, TeamId>,
}

impl Projection {
    fn without_reactions(embed: RenderedEmbed) -> Self {
        Self {
            embed: embed.truncated(),
            emojis: vec![],
            routes: HashMap::new(),
        }
    }
}

/// A team's final or current score.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Standing {
    pub team_id: TeamId,
    pub team_name: String,
    pub score: i64,
}

/// Pairs stored scores with team names, dropping scores of teams that no longer exist.
pub fn standings(event: &Event, scores: &[ScoreRow]) -> Vec<Standing> {
    scores
        .iter()
        .filter_map(|row| {
            event.team(row.team_id).map(|(_, team)| Standing {
                team_id: team.id,
                team_name: team.name.clone(),
                score: row.score,
            })
        })
        .collect()
}

fn status_glyph(team: &Team) -> &'static str {
    if team.is_full() {
        "🔴"
    } else {
        "🟢"
    }
}

/// Collects the reaction set of some teams, refusing duplicates.
fn reactions<'a>(
    teams: impl Iterator<Item = &'a Team>,
) -> Result<(Vec<String>, HashMap<String, TeamId>), EngineError> {
    let mut emojis = vec![];
    let mut routes: HashMap<String, TeamId> = HashMap::new();
    for team in teams {
        let key = normalize_emoji(&team.emoji);
        if let Some(owner) = routes.get(&key) {
            if *owner != team.id {
                return Err(EngineError::EmojiCollision {
                    emoji: team.emoji.clone(),
                    team: team.name.clone(),
                });
            }
            continue;
        }
        routes.insert(key, team.id);
        emojis.push(team.emoji.clone());
    }
    Ok((emojis, routes))
}

/// The event-wide join embed.
pub fn render_event(event: &Event) -> Result<Projection, EngineError> {
    let status = if event.is_open() {
        "🟡 Open for Registration"
    } else {
        "🏁 Ended"
    };
    let mut embed = RenderedEmbed::new(format!("🎯 {}", event.name), Colour::DARK_GREEN)
        .description("React with a team's emoji to join it. Remove your reaction to leave.")
        .field("Event ID", event.id.to_string(), true)
        .field(
            "Sections",
            format!("{}/{}", event.sections.len(), event.max_sections),
            true,
        )
        .field("Status", status, true);
    if event.team_count() > 0 && event.is_open() {
        embed.fields[2].1 = "🟢 Active".to_string();
    }

    for section in &event.sections {
        let lines = if section.teams.is_empty() {
            "No teams yet.".to_string()
        } else {
            section
                .teams
                .iter()
                .map(|team| {
                    format!(
                        "{} {} **{}** ({}/{})",
                        status_glyph(team),
                        team.emoji,
                        team.name,
                        team.members.len(),
                        team.max_members
                    )
                })
                .collect::<Vec<_>>()
                .join("\n")
        };
        embed = embed.field(
            format!("📋 {} ({}/{})", section.name, section.teams.len(), section.max_teams),
            lines,
            false,
        );
    }

    let (emojis, routes) = reactions(event.teams().map(|(_, team)| team))?;
    Ok(Projection {
        embed: embed.footer(format!("{} members", event.member_count())).truncated(),
        emojis,
        routes,
    })
}

/// The join embed of one section.
pub fn render_section(event: &Event, section: &Section) -> Result<Projection, EngineError> {
    let mut embed = RenderedEmbed::new(format!("📋 {}", section.name), Colour::BLUE)
        .footer(format!("{} • Section ID: {}", event.name, section.id));
    if section.teams.is_empty() {
        embed = embed.description("No teams created yet.");
    } else {
        embed = embed.description("React with the team emoji to join!");
        for team in &section.teams {
            embed = embed.field(
                format!("{} {}", team.emoji, team.name),
                format!(
                    "**Leader:** {}\n**Members:** {}/{} {}",
                    team.leader_id.mention(),
                    team.members.len(),
                    team.max_members,
                    status_glyph(team)
                ),
                false,
            );
        }
    }

    let (emojis, routes) = reactions(section.teams.iter())?;
    Ok(Projection {
        embed: embed.truncated(),
        emojis,
        routes,
    })
}

pub fn render_leaderboard(event: &Event, standings: &[Standing]) -> Projection {
    let mut embed = RenderedEmbed::new(format!("🏆 Leaderboard - {}", event.name), Colour::GOLD);
    if standings.is_empty() {
        embed = embed.description("No scores recorded yet.");
    }
    for (i, standing) in standings.iter().enumerate() {
        let place = MEDALS
            .get(i)
            .map(|m| m.to_string())
            .unwrap_or_else(|| format!("#{}", i + 1));
        let members = event
            .team(standing.team_id)
            .map(|(_, team)| format!("{}/{}", team.members.len(), team.max_members))
            .unwrap_or_default();
        embed = embed.field(
            format!("{} {}", place, standing.team_name),
            format!("**Score:** {}\n**Members:** {}", standing.score, members),
            false,
        );
    }
    Projection::without_reactions(embed)
}

/// The announcement posted when an event ends.
pub fn render_winners(event: &Event, winners: &[Standing]) -> RenderedEmbed {
    let places = ["1st", "2nd", "3rd"];
    let lines = winners
        .iter()
        .zip(MEDALS.iter().zip(places.iter()))
        .map(|(w, (medal, place))| {
            format!("{} **{} Place:** {} ({} points)", medal, place, w.team_name, w.score)
        })
        .collect::<Vec<_>>()
        .join("\n");
    RenderedEmbed::new(format!("🏆 Event Results - {}", event.name), Colour::GOLD)
        .description(lines)
        .footer("Congratulations to all participants!")
        .truncated()
}

pub fn render_team(event: &Event, section: &Section, team: &Team) -> RenderedEmbed {
    let members = team
        .members
        .iter()
        .map(|m| m.mention().to_string())
        .collect::<Vec<_>>()
        .join("\n");
    RenderedEmbed::new(format!("{} Team: {}", team.emoji, team.name), Colour::DARK_GREEN)
        .field("Event", format!("{} (ID: {})", event.name, event.id), true)
        .field("Section", section.name.clone(), true)
        .field("Leader", team.leader_id.mention().to_string(), true)
        .field(
            format!("Members ({}/{})", team.members.len(), team.max_members),
            members,
            false,
        )
        .truncated()
}

/// What a retired join embed is replaced with.
pub fn render_closed(target: RenderTarget, name: &str) -> RenderedEmbed {
    let what = match target {
        RenderTarget::Event(_) => "event",
        RenderTarget::Section { .. } => "section",
        RenderTarget::Leaderboard(_) => "leaderboard",
    };
    RenderedEmbed::new(format!("🔒 {}", name), Colour::DARKER_GREY)
        .description(format!("This {} is closed.", what))
}

/// Reactions to add and remove to go from the current set to the desired one.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReactionDelta {
    pub add: Vec<String>,
    pub remove: Vec<String>,
}

pub fn reaction_delta(desired: &[String], current: &[String]) -> ReactionDelta {
    let wanted: HashSet<String> = desired.iter().map(|e| normalize_emoji(e)).collect();
    let present: HashSet<String> = current.iter().map(|e| normalize_emoji(e)).collect();
    ReactionDelta {
        add: desired
            .iter()
            .filter(|e| !present.contains(&normalize_emoji(e)))
            .cloned()
            .collect(),
        remove: current
            .iter()
            .filter(|e| !wanted.contains(&normalize_emoji(e)))
            .cloned()
            .collect(),
    }
}

/// Renders tracked messages and keeps their reactions in line with the teams they show.
#[derive(Debug, Default)]
pub struct EmbedProjector {
    registry: MessageRegistry,
}

impl EmbedProjector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registry(&self) -> &MessageRegistry {
        &self.registry
    }

    /// Posts a new message for a target and starts tracking it.
    pub async fn publish<P: Platform>(
        &self,
        platform: &P,
        channel_id: ChannelId,
        target: RenderTarget,
        projection: &Projection,
    ) -> Result<TrackedMessage, PlatformError> {
        let message_id = platform
            .send_embed(channel_id, None, &projection.embed)
            .await?;
        let tracked = TrackedMessage {
            channel_id,
            message_id,
            target,
            emojis: projection.routes.clone(),
        };
        self.registry.track(tracked.clone());
        for emoji in &projection.emojis {
            platform.add_reaction(channel_id, message_id, emoji).await?;
        }
        Ok(tracked)
    }

    /// Edits a tracked message in place and reconciles its reactions.
    pub async fn refresh<P: Platform>(
        &self,
        platform: &P,
        tracked: &TrackedMessage,
        projection: &Projection,
    ) -> Result<(), PlatformError> {
        platform
            .edit_embed(tracked.channel_id, tracked.message_id, &projection.embed)
            .await?;
        self.registry
            .set_emojis(tracked.message_id, projection.routes.clone());
        if tracked.target.accepts_reactions() {
            self.reconcile(platform, tracked, &projection.emojis).await?;
        }
        Ok(())
    }

    /// Applies only the difference between the bot's reactions and the desired set.
    ///
    /// When the current reactions cannot be read, every reaction is cleared and re-added.
    pub async fn reconcile<P: Platform>(
        &self,
        platform: &P,
        tracked: &TrackedMessage,
        desired: &[String],
    ) -> Result<(), PlatformError> {
        let (channel_id, message_id) = (tracked.channel_id, tracked.message_id);
        let delta = match platform.current_reactions(channel_id, message_id).await {
            Ok(current) => reaction_delta(desired, &current),
            Err(e) => {
                warn!(
                    "Could not read reactions of message {}, re-adding all: {}",
                    message_id, e
                );
                platform.clear_reactions(channel_id, message_id).await?;
                ReactionDelta {
                    add: desired.to_vec(),
                    remove: vec![],
                }
            }
        };
        debug!(
            "Reconciling message {}: +{:?} -{:?}",
            message_id, delta.add, delta.remove
        );
        for emoji in &delta.remove {
            platform
                .remove_reaction_emoji(channel_id, message_id, emoji)
                .await?;
        }
        for emoji in &delta.add {
            platform.add_reaction(channel_id, message_id, emoji).await?;
        }
        Ok(())
    }

    /// Clears a message's reactions, marks it closed and stops tracking it.
    pub async fn retire<P: Platform>(
        &self,
        platform: &P,
        tracked: &TrackedMessage,
        name: &str,
    ) -> Result<(), PlatformError> {
        self.registry.forget(tracked.message_id);
        platform
            .clear_reactions(tracked.channel_id, tracked.message_id)
            .await?;
        platform
            .edit_embed(
                tracked.channel_id,
                tracked.message_id,
                &render_closed(tracked.target, name),
            )
            .await
    }

    /// Deletes a tracked message outright.
    pub async fn withdraw<P: Platform>(
        &self,
        platform: &P,
        tracked: &TrackedMessage,
    ) -> Result<(), PlatformError> {
        self.registry.forget(tracked.message_id);
        platform
            .delete_message(tracked.channel_id, tracked.message_id)
            .await
    }
}

#[cfg(test)]
mod tests {
    use poise::serenity_prelude::MessageId;

    use super::super::model::fixtures;
    use super::*;
    use crate::platform::testing::{Call, RecordingPlatform};

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn delta_only_touches_differences() {
        let delta = reaction_delta(&strings(&["🦁", "🐯", "⚔️"]), &strings(&["🐯", "⚔", "🐻"]));
        assert_eq!(delta.add, strings(&["🦁"]));
        assert_eq!(delta.remove, strings(&["🐻"]));
        assert_eq!(
            reaction_delta(&strings(&["🦁"]), &strings(&["🦁"])),
            ReactionDelta::default()
        );
    }

    #[test]
    fn event_embed_lists_every_team_with_its_emoji() {
        let mut event = fixtures::event();
        event.team_mut(100).unwrap().members.push(poise::serenity_prelude::UserId::new(9));
        let projection = render_event(&event).unwrap();

        assert_eq!(projection.embed.title, "🎯 Cup");
        assert_eq!(projection.emojis, strings(&["🦁", "🐯", "🐻"]));
        assert_eq!(projection.routes.get("🐻"), Some(&102));
        let section_a = &projection.embed.fields[3];
        assert!(section_a.1.contains("🔴 🦁 **Red** (2/2)"));
        assert!(section_a.1.contains("🟢 🐯 **Blue** (1/3)"));
    }

    #[test]
    fn duplicate_emojis_are_refused() {
        let mut event = fixtures::event();
        event.team_mut(102).unwrap().emoji = "🦁".to_string();
        assert!(matches!(
            render_event(&event),
            Err(EngineError::EmojiCollision { .. })
        ));
        assert!(render_section(&event, event.section(11).unwrap()).is_ok());
    }

    #[test]
    fn section_embed_shows_leader_and_capacity() {
        let event = fixtures::event();
        let projection = render_section(&event, event.section(10).unwrap()).unwrap();
        assert_eq!(projection.embed.title, "📋 A");
        assert_eq!(projection.embed.fields[0].0, "🦁 Red");
        assert!(projection.embed.fields[0].1.contains("**Members:** 1/2"));
        assert_eq!(projection.emojis.len(), 2);
    }

    #[test]
    fn oversized_embeds_are_truncated() {
        let mut embed = RenderedEmbed::new("t", Colour::BLUE);
        for i in 0..40 {
            embed = embed.field(i.to_string(), "x".repeat(2000), false);
        }
        let embed = embed.truncated();
        assert_eq!(embed.fields.len(), MAX_FIELDS);
        assert!(embed.fields[0].1.chars().count() <= MAX_FIELD_VALUE);
        assert_eq!(embed.fields[24].1, "16 more not shown");
    }

    #[test]
    fn leaderboard_ranks_with_medals() {
        let event = fixtures::event();
        let scores = vec![
            ScoreRow {
                team_id: 101,
                score: 20,
            },
            ScoreRow {
                team_id: 100,
                score: 10,
            },
            ScoreRow {
                team_id: 555,
                score: 5,
            },
        ];
        let standings = standings(&event, &scores);
        assert_eq!(standings.len(), 2);
        let projection = render_leaderboard(&event, &standings);
        assert_eq!(projection.embed.fields[0].0, "🥇 Blue");
        assert_eq!(projection.embed.fields[1].0, "🥈 Red");
        assert!(projection.emojis.is_empty());
    }

    #[tokio::test]
    async fn refresh_reconciles_by_delta() {
        let platform = RecordingPlatform::new();
        let projector = EmbedProjector::new();
        let mut event = fixtures::event();
        let target = RenderTarget::Event(1);

        let projection = render_event(&event).unwrap();
        let tracked = projector
            .publish(&platform, ChannelId::new(3), target, &projection)
            .await
            .unwrap();
        assert_eq!(platform.reactions(tracked.message_id).len(), 3);

        event.sections[1].teams.clear();
        let projection = render_event(&event).unwrap();
        projector
            .refresh(&platform, &tracked, &projection)
            .await
            .unwrap();

        assert_eq!(platform.reactions(tracked.message_id), strings(&["🦁", "🐯"]));
        assert!(platform
            .calls()
            .contains(&Call::RemoveReactionEmoji(tracked.message_id, "🐻".to_string())));
        assert!(!platform
            .calls()
            .contains(&Call::ClearReactions(tracked.message_id)));
        assert!(projector
            .registry()
            .route(tracked.message_id, "🐻")
            .unwrap()
            .team_id
            .is_none());
    }

    #[tokio::test]
    async fn reconcile_falls_back_to_clear_when_reactions_are_unreadable() {
        let platform = RecordingPlatform::new();
        let projector = EmbedProjector::new();
        let tracked = TrackedMessage {
            channel_id: ChannelId::new(3),
            message_id: MessageId::new(40),
            target: RenderTarget::Event(1),
            emojis: HashMap::new(),
        };
        platform.fail_reads(true);
        projector
            .reconcile(&platform, &tracked, &strings(&["🦁"]))
            .await
            .unwrap();
        assert_eq!(
            platform.calls(),
            vec![
                Call::ClearReactions(MessageId::new(40)),
                Call::AddReaction(MessageId::new(40), "🦁".to_string()),
            ]
        );
    }
}
