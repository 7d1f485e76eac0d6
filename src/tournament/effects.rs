use poise::serenity_prelude::{ChannelId, Colour, GuildId, Mentionable, RoleId, UserId};
use strum::Display;

use super::model::{EventId, TeamCandidate};
use super::projector::RenderedEmbed;
use super::registry::RenderTarget;
use crate::database::models::{ChannelSlot, ServerStat};
use crate::log::LogEntry;

/// Work requested by a membership change, carried out once the event lock is released.
///
/// None of these can undo the change they follow. Failures are logged and dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SideEffect {
    GrantRole {
        guild_id: GuildId,
        user_id: UserId,
        role_id: RoleId,
    },
    RevokeRole {
        guild_id: GuildId,
        user_id: UserId,
        role_id: RoleId,
    },
    /// A direct message to a user.
    Notify { user_id: UserId, embed: RenderedEmbed },
    Log { guild_id: GuildId, entry: LogEntry },
    /// Re-render every tracked message of an event.
    Render(EventId),
    /// Remove a user's reaction from every tracked message of an event.
    Unreact {
        event_id: EventId,
        user_id: UserId,
        emoji: String,
    },
    /// Close the messages of one target and stop tracking them.
    Retire { target: RenderTarget, name: String },
    /// Close every message of an event and stop tracking them.
    RetireEvent { event_id: EventId, name: String },
    /// Post a new tracked message in a configured channel.
    Publish {
        guild_id: GuildId,
        target: RenderTarget,
        slot: ChannelSlot,
    },
    /// Post an untracked message, in `channel_id` if given, otherwise in the slot's channel.
    Announce {
        guild_id: GuildId,
        channel_id: Option<ChannelId>,
        slot: ChannelSlot,
        content: Option<String>,
        embed: RenderedEmbed,
    },
    Stat { guild_id: GuildId, stat: ServerStat },
}

/// The result of a committed operation along with the work it left to do.
#[must_use = "side effects are lost unless the result is settled"]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied<T> {
    pub value: T,
    pub effects: Vec<SideEffect>,
}

impl<T> Applied<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            effects: vec![],
        }
    }

    pub fn with(mut self, effect: SideEffect) -> Self {
        self.effects.push(effect);
        self
    }

    pub fn extend(mut self, effects: impl IntoIterator<Item = SideEffect>) -> Self {
        self.effects.extend(effects);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum MembershipChange {
    Joined,
    Left,
    Disqualified,
    Removed,
}

/// How a membership change was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum JoinMethod {
    Command,
    Reaction,
    Admin,
}

fn phrase(change: MembershipChange) -> &'static str {
    match change {
        MembershipChange::Joined => "joined",
        MembershipChange::Left => "left",
        MembershipChange::Disqualified => "been disqualified from",
        MembershipChange::Removed => "been removed from",
    }
}

fn change_colour(change: MembershipChange) -> Colour {
    match change {
        MembershipChange::Joined => Colour::DARK_GREEN,
        _ => Colour::RED,
    }
}

fn title_case(change: MembershipChange) -> String {
    let word = change.to_string();
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => word,
    }
}

/// The direct message a user receives when their membership changes.
pub fn membership_notice(
    change: MembershipChange,
    method: JoinMethod,
    team: &TeamCandidate,
    reason: Option<&str>,
) -> RenderedEmbed {
    let mut description = format!(
        "You have {} **{}**\nSection: **{}**\nEvent: **{}**\nMethod: `{}`",
        phrase(change),
        team.team_name,
        team.section_name,
        team.event_name,
        method
    );
    if let Some(reason) = reason {
        description.push_str(&format!("\nReason: {}", reason));
    }
    RenderedEmbed::new(format!("Team {}", title_case(change)), change_colour(change))
        .description(description)
        .footer("If this wasn't you, contact a moderator.")
}

/// The audit log entry of a membership change.
pub fn membership_log(
    change: MembershipChange,
    method: JoinMethod,
    user_id: UserId,
    team: &TeamCandidate,
    reason: Option<&str>,
) -> LogEntry {
    let entry = LogEntry::info(format!("Team {} ({})", title_case(change), method))
        .field("User", user_id.mention().to_string())
        .field("Team", team.team_name.clone())
        .field("Section", team.section_name.clone())
        .field("Event", format!("{} (ID: {})", team.event_name, team.event_id));
    match reason {
        Some(reason) => entry.field("Reason", reason),
        None => entry,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn red() -> TeamCandidate {
        TeamCandidate {
            event_id: 1,
            event_name: "Cup".to_string(),
            section_id: 10,
            section_name: "A".to_string(),
            team_id: 100,
            team_name: "Red".to_string(),
        }
    }

    #[test]
    fn notice_describes_the_change() {
        let embed = membership_notice(
            MembershipChange::Disqualified,
            JoinMethod::Admin,
            &red(),
            Some("cheating"),
        );
        assert_eq!(embed.title, "Team Disqualified");
        assert!(embed.description.contains("You have been disqualified from **Red**"));
        assert!(embed.description.contains("Method: `admin`"));
        assert!(embed.description.ends_with("Reason: cheating"));
        assert_eq!(embed.colour, Colour::RED);
    }

    #[test]
    fn applied_collects_effects_in_order() {
        let applied = Applied::new(3)
            .with(SideEffect::Render(1))
            .extend([SideEffect::Render(2)]);
        assert_eq!(applied.value, 3);
        assert_eq!(
            applied.effects,
            vec![SideEffect::Render(1), SideEffect::Render(2)]
        );
    }
}
