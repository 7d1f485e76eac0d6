use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};

use crate::tournament::model::{EventId, SectionId, TeamId};

/// Lifecycle of an event. Closing an event deletes it, so there is no closed state on disk.
#[derive(
    Debug, Default, sqlx::Type, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Display,
)]
#[sqlx(type_name = "event_status", rename_all = "snake_case")]
pub enum EventStatus {
    #[strum(to_string = "Open")]
    #[default]
    Open,
    #[strum(to_string = "Ended")]
    Ended,
}

/// The logical channels a guild binds to concrete channels.
#[derive(
    Debug,
    sqlx::Type,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Hash,
    Clone,
    Copy,
    Display,
    EnumIter,
    poise::ChoiceParameter,
)]
#[sqlx(type_name = "channel_slot", rename_all = "snake_case")]
pub enum ChannelSlot {
    /// Where privileged tournament commands are accepted.
    #[name = "Moderation"]
    #[strum(to_string = "Moderation")]
    Moderation,
    /// Announcements and the live leaderboard.
    #[name = "Event"]
    #[strum(to_string = "Event")]
    Event,
    /// Section join embeds and team lookups.
    #[name = "Team"]
    #[strum(to_string = "Team")]
    Team,
    /// Event-wide join embeds.
    #[name = "Join"]
    #[strum(to_string = "Join")]
    Join,
    #[name = "Log"]
    #[strum(to_string = "Log")]
    Log,
    #[name = "Game"]
    #[strum(to_string = "Game")]
    Game,
}

impl ChannelSlot {
    pub fn all() -> Vec<ChannelSlot> {
        ChannelSlot::iter().collect()
    }
}

/// Guild-wide counters shown by the server stats command.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash, Display, EnumString, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum ServerStat {
    EventsCreated,
    TeamsCreated,
    MembersJoined,
}

impl ServerStat {
    pub fn label(&self) -> &'static str {
        match self {
            ServerStat::EventsCreated => "Events Created",
            ServerStat::TeamsCreated => "Teams Created",
            ServerStat::MembersJoined => "Members Joined",
        }
    }

    pub fn all() -> Vec<ServerStat> {
        ServerStat::iter().collect()
    }
}

/// An event row, without its sections.
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct EventRow {
    pub event_id: EventId,
    pub guild_id: String,
    pub name: String,
    pub max_sections: i32,
    pub role_id: Option<String>,
    pub channel_id: Option<String>,
    pub status: EventStatus,
    pub created_at: i64,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct SectionRow {
    pub section_id: SectionId,
    pub event_id: EventId,
    pub name: String,
    pub max_teams: i32,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct TeamRow {
    pub team_id: TeamId,
    pub section_id: SectionId,
    pub name: String,
    pub leader_id: String,
    pub max_members: i32,
    pub emoji: String,
}

/// A relational object that links a Discord user to a team they've joined.
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct TeamMemberRow {
    pub team_id: TeamId,
    pub user_id: String,
}

/// A team's score within an event, as ordered by the store (highest first).
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow, Serialize, Deserialize)]
pub struct ScoreRow {
    pub team_id: TeamId,
    pub score: i64,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct ChannelBinding {
    pub slot: ChannelSlot,
    pub channel_id: String,
}

/// How often a user ran a command in a guild.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow, Serialize, Deserialize)]
pub struct CommandUsage {
    pub command: String,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow, Serialize, Deserialize)]
pub struct UserUsage {
    pub user_id: String,
    pub total: i64,
}
