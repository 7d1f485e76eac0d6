use poise::serenity_prelude::{ChannelId, GuildId, RoleId, UserId};

use crate::database::models::EventStatus;

pub type EventId = i64;
pub type SectionId = i64;
pub type TeamId = i64;

/// A tournament together with everything beneath it.
///
/// This is the unit the cache stores and the unit of mutual exclusion: every read or write of a
/// section, team or member happens while holding the lock of the owning event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub id: EventId,
    pub guild_id: GuildId,
    pub name: String,
    pub max_sections: i32,
    pub role_id: Option<RoleId>,
    pub channel_id: Option<ChannelId>,
    pub status: EventStatus,
    pub sections: Vec<Section>,
}

/// A bracket within an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub id: SectionId,
    pub event_id: EventId,
    pub name: String,
    pub max_teams: i32,
    pub teams: Vec<Team>,
}

/// A team within a section. The leader is always inserted as the first member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Team {
    pub id: TeamId,
    pub section_id: SectionId,
    pub name: String,
    pub leader_id: UserId,
    pub max_members: i32,
    pub emoji: String,
    pub members: Vec<UserId>,
}

/// Where a team name given by a user should be searched for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinScope {
    Guild(GuildId),
    Event(EventId),
    Section {
        event_id: EventId,
        section_id: SectionId,
    },
}

/// One possible match when resolving a team by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeamCandidate {
    pub event_id: EventId,
    pub event_name: String,
    pub section_id: SectionId,
    pub section_name: String,
    pub team_id: TeamId,
    pub team_name: String,
}

impl Event {
    pub fn is_open(&self) -> bool {
        self.status == EventStatus::Open
    }

    pub fn section(&self, section_id: SectionId) -> Option<&Section> {
        self.sections.iter().find(|s| s.id == section_id)
    }

    pub fn section_mut(&mut self, section_id: SectionId) -> Option<&mut Section> {
        self.sections.iter_mut().find(|s| s.id == section_id)
    }

    pub fn section_by_name(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| same_name(&s.name, name))
    }

    /// Every team of the event paired with its section, in display order.
    pub fn teams(&self) -> impl Iterator<Item = (&Section, &Team)> {
        self.sections
            .iter()
            .flat_map(|section| section.teams.iter().map(move |team| (section, team)))
    }

    pub fn team(&self, team_id: TeamId) -> Option<(&Section, &Team)> {
        self.teams().find(|(_, team)| team.id == team_id)
    }

    pub fn team_mut(&mut self, team_id: TeamId) -> Option<&mut Team> {
        self.sections
            .iter_mut()
            .flat_map(|section| section.teams.iter_mut())
            .find(|team| team.id == team_id)
    }

    /// The team the user currently belongs to within this event, if any.
    pub fn team_of(&self, user_id: UserId) -> Option<(&Section, &Team)> {
        self.teams().find(|(_, team)| team.has_member(user_id))
    }

    /// Every team of the event the user belongs to.
    ///
    /// Under the per-event join scope this holds at most one entry, but rows written before the
    /// scope was enforced may still hold more.
    pub fn memberships(&self, user_id: UserId) -> Vec<(&Section, &Team)> {
        self.teams()
            .filter(|(_, team)| team.has_member(user_id))
            .collect()
    }

    pub fn teams_named(&self, name: &str) -> Vec<TeamCandidate> {
        self.teams()
            .filter(|(_, team)| same_name(&team.name, name))
            .map(|(section, team)| self.candidate(section, team))
            .collect()
    }

    pub fn emoji_owner(&self, emoji: &str) -> Option<&Team> {
        self.teams()
            .map(|(_, team)| team)
            .find(|team| same_emoji(&team.emoji, emoji))
    }

    /// Every distinct user holding a membership in this event.
    pub fn members(&self) -> Vec<UserId> {
        let mut members: Vec<UserId> = self
            .teams()
            .flat_map(|(_, team)| team.members.iter().copied())
            .collect();
        members.sort();
        members.dedup();
        members
    }

    pub fn team_count(&self) -> usize {
        self.sections.iter().map(|s| s.teams.len()).sum()
    }

    pub fn member_count(&self) -> usize {
        self.teams().map(|(_, team)| team.members.len()).sum()
    }

    pub fn candidate(&self, section: &Section, team: &Team) -> TeamCandidate {
        TeamCandidate {
            event_id: self.id,
            event_name: self.name.clone(),
            section_id: section.id,
            section_name: section.name.clone(),
            team_id: team.id,
            team_name: team.name.clone(),
        }
    }
}

impl Section {
    pub fn is_full(&self) -> bool {
        self.teams.len() >= self.max_teams.max(0) as usize
    }

    pub fn team_by_name(&self, name: &str) -> Option<&Team> {
        self.teams.iter().find(|t| same_name(&t.name, name))
    }
}

impl Team {
    pub fn has_member(&self, user_id: UserId) -> bool {
        self.members.contains(&user_id)
    }

    pub fn is_full(&self) -> bool {
        self.members.len() >= self.max_members.max(0) as usize
    }
}

/// Names are compared trimmed and case-insensitively everywhere they act as lookup keys.
pub fn same_name(a: &str, b: &str) -> bool {
    a.trim().to_lowercase() == b.trim().to_lowercase()
}

/// Strips the emoji presentation selector, which Discord does not echo back consistently.
pub fn normalize_emoji(emoji: &str) -> String {
    emoji.trim().replace('\u{FE0F}', "")
}

pub fn same_emoji(a: &str, b: &str) -> bool {
    normalize_emoji(a) == normalize_emoji(b)
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn names_match_case_insensitively() {
        assert!(same_name(" Red ", "red"));
        assert!(!same_name("Red", "Reds"));
    }

    #[test]
    fn emoji_comparison_ignores_presentation_selector() {
        assert!(same_emoji("⚔️", "⚔"));
        assert!(!same_emoji("🦁", "🐯"));
    }

    #[test]
    fn teams_named_finds_every_section() {
        let event = event();
        let found = event.teams_named("RED");
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].section_name, "A");
        assert_eq!(found[1].section_name, "B");
    }

    #[test]
    fn team_of_reports_current_membership() {
        let mut event = event();
        let user = UserId::new(5);
        assert!(event.team_of(user).is_none());
        event.team_mut(101).unwrap().members.push(user);
        let (section, team) = event.team_of(user).unwrap();
        assert_eq!(section.name, "A");
        assert_eq!(team.name, "Blue");
        assert_eq!(event.member_count(), 4);
    }

    #[test]
    fn fullness_follows_capacity() {
        let mut event = event();
        let red = event.team_mut(100).unwrap();
        assert!(!red.is_full());
        red.members.push(UserId::new(9));
        assert!(red.is_full());
        assert!(event.section(10).unwrap().is_full());
        assert!(!event.section(11).unwrap().is_full());
    }
}
