use std::sync::Arc;

use dashmap::DashMap;
use poise::serenity_prelude::{ChannelId, GuildId, Mentionable, RoleId, UserId};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

use super::cache::{EntityCache, EventGuard, EventSlot};
use super::effects::{
    membership_log, membership_notice, Applied, JoinMethod, MembershipChange, SideEffect,
};
use super::error::EngineError;
use super::model::{
    same_name, Event, EventId, JoinScope, Section, SectionId, Team, TeamCandidate, TeamId,
};
use super::projector::{render_winners, standings, Standing};
use super::registry::RenderTarget;
use crate::database::models::{ChannelSlot, EventStatus, ServerStat};
use crate::database::{Store, StoreError};
use crate::log::LogEntry;

/// Emojis handed out, in order, to teams created without one.
pub const DEFAULT_TEAM_EMOJIS: [&str; 10] = [
    "🦁", "🐯", "🐻", "🦊", "🐸", "🐼", "🐨", "🦄", "🐙", "🐵",
];

const MAX_NAME_LENGTH: usize = 100;

/// Validates and applies every change to the event graph.
///
/// Each event is a critical section: its slot in the cache is locked for the whole
/// check-then-write of an operation. The store is written first and the cache only after the
/// store acknowledged, so the store never lags behind the cache. Work that talks to Discord is
/// returned as side effects for the caller to run after the lock is gone.
#[derive(Debug)]
pub struct MembershipEngine<DB> {
    store: Arc<DB>,
    cache: EntityCache,
    guild_locks: DashMap<GuildId, Arc<Mutex<()>>>,
}

fn valid_name(kind: &str, name: &str) -> Result<String, EngineError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(EngineError::Invalid(format!("{} name cannot be empty.", kind)));
    }
    if name.chars().count() > MAX_NAME_LENGTH {
        return Err(EngineError::Invalid(format!(
            "{} name cannot be longer than {} characters.",
            kind, MAX_NAME_LENGTH
        )));
    }
    Ok(name.to_string())
}

fn valid_capacity(kind: &str, max: i32) -> Result<(), EngineError> {
    if max < 1 {
        return Err(EngineError::Invalid(format!(
            "The maximum number of {} must be at least 1.",
            kind
        )));
    }
    Ok(())
}

fn valid_emoji(emoji: &str) -> Result<String, EngineError> {
    let emoji = emoji.trim();
    if emoji.is_empty()
        || emoji.contains(char::is_whitespace)
        || emoji.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return Err(EngineError::Invalid(format!("'{}' is not an emoji.", emoji)));
    }
    Ok(emoji.to_string())
}

fn ensure_open(event: &Event) -> Result<(), EngineError> {
    match event.status {
        EventStatus::Open => Ok(()),
        EventStatus::Ended => Err(EngineError::EventEnded(event.name.clone())),
    }
}

/// The role revocation owed to a user who just lost a membership, if they hold no other.
fn revoke_if_unattached(event: &Event, user_id: UserId) -> Option<SideEffect> {
    match event.role_id {
        Some(role_id) if event.team_of(user_id).is_none() => Some(SideEffect::RevokeRole {
            guild_id: event.guild_id,
            user_id,
            role_id,
        }),
        _ => None,
    }
}

fn mentions(users: &[UserId]) -> String {
    if users.is_empty() {
        return "None".to_string();
    }
    users
        .iter()
        .map(|u| u.mention().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn find_team(event: &Event, team_id: TeamId) -> Result<(&Section, &Team), EngineError> {
    event
        .team(team_id)
        .ok_or_else(|| EngineError::not_found("Team", team_id))
}

impl<DB> MembershipEngine<DB>
where
    DB: Store,
{
    pub fn new(store: Arc<DB>) -> Self {
        Self {
            store,
            cache: EntityCache::new(),
            guild_locks: DashMap::new(),
        }
    }

    pub fn store(&self) -> &DB {
        &self.store
    }

    pub fn cache(&self) -> &EntityCache {
        &self.cache
    }

    fn guild_lock(&self, guild_id: GuildId) -> Arc<Mutex<()>> {
        Arc::clone(self.guild_locks.entry(guild_id).or_default().value())
    }

    /// Locks an event's slot, loading the event from the store when the cache misses.
    ///
    /// With `reload` the store is read even on a hit. The returned guard always holds an event.
    async fn lock_slot(
        &self,
        event_id: EventId,
        reload: bool,
    ) -> Result<(EventSlot, OwnedMutexGuard<Option<Event>>), EngineError> {
        loop {
            let slot = self.cache.slot(event_id);
            let mut guard = Arc::clone(&slot).lock_owned().await;
            // The slot was dropped while we waited on it, start over with the current one.
            if !self.cache.is_current(event_id, &slot) {
                continue;
            }
            if guard.is_none() || reload {
                match self.store.load_event(event_id).await? {
                    Some(event) => {
                        debug!("Loaded event {} into the cache", event_id);
                        *guard = Some(event);
                    }
                    None => {
                        guard.take();
                        drop(guard);
                        self.cache.forget(event_id, &slot);
                        return Err(EngineError::not_found("Event", event_id));
                    }
                }
            }
            return Ok((slot, guard));
        }
    }

    async fn lock_event(&self, event_id: EventId) -> Result<EventGuard, EngineError> {
        let (_, guard) = self.lock_slot(event_id, false).await?;
        EntityCache::loaded(guard).ok_or_else(|| EngineError::not_found("Event", event_id))
    }

    /// A snapshot of an event, read through the cache.
    pub async fn event(&self, event_id: EventId) -> Result<Event, EngineError> {
        let event = self.lock_event(event_id).await?;
        Ok((*event).clone())
    }

    /// A snapshot of an event, provided it belongs to the guild.
    pub async fn event_in(&self, guild_id: GuildId, event_id: EventId) -> Result<Event, EngineError> {
        let event = self.event(event_id).await?;
        if event.guild_id != guild_id {
            return Err(EngineError::not_found("Event", event_id));
        }
        Ok(event)
    }

    pub async fn section_event(&self, section_id: SectionId) -> Result<EventId, EngineError> {
        self.store
            .get_section_event(section_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Section", section_id))
    }

    /// The event owning a section, provided it belongs to the guild.
    pub async fn section_in(
        &self,
        guild_id: GuildId,
        section_id: SectionId,
    ) -> Result<(Event, Section), EngineError> {
        let event_id = self.section_event(section_id).await?;
        let event = self.event_in(guild_id, event_id).await?;
        let section = event
            .section(section_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("Section", section_id))?;
        Ok((event, section))
    }

    /// Snapshots of every event of a guild, oldest first.
    pub async fn events_of(&self, guild_id: GuildId) -> Result<Vec<Event>, EngineError> {
        let mut events = vec![];
        for row in self.store.list_events(&guild_id).await? {
            match self.event(row.event_id).await {
                Ok(event) => events.push(event),
                // Closed between the listing and the load.
                Err(EngineError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(events)
    }

    /// Every team named `name` within a scope. Guild-wide searches only look at open events.
    pub async fn candidates(
        &self,
        name: &str,
        scope: JoinScope,
    ) -> Result<Vec<TeamCandidate>, EngineError> {
        match scope {
            JoinScope::Guild(guild_id) => Ok(self
                .events_of(guild_id)
                .await?
                .iter()
                .filter(|event| event.is_open())
                .flat_map(|event| event.teams_named(name))
                .collect()),
            JoinScope::Event(event_id) => Ok(self.event(event_id).await?.teams_named(name)),
            JoinScope::Section {
                event_id,
                section_id,
            } => {
                let event = self.event(event_id).await?;
                let section = event
                    .section(section_id)
                    .ok_or_else(|| EngineError::not_found("Section", section_id))?;
                Ok(section
                    .teams
                    .iter()
                    .filter(|team| same_name(&team.name, name))
                    .map(|team| event.candidate(section, team))
                    .collect())
            }
        }
    }

    /// Resolves a team name to exactly one team, or explains why it cannot.
    pub async fn resolve_team(
        &self,
        name: &str,
        scope: JoinScope,
    ) -> Result<TeamCandidate, EngineError> {
        let mut candidates = self.candidates(name, scope).await?;
        match candidates.len() {
            0 => Err(EngineError::not_found("Team", name.trim())),
            1 => Ok(candidates.remove(0)),
            _ => Err(EngineError::AmbiguousTarget {
                name: name.trim().to_string(),
                candidates,
            }),
        }
    }

    pub async fn create_event(
        &self,
        guild_id: GuildId,
        name: &str,
        max_sections: i32,
        role_id: Option<RoleId>,
        channel_id: Option<ChannelId>,
    ) -> Result<Applied<EventId>, EngineError> {
        let name = valid_name("Event", name)?;
        valid_capacity("sections", max_sections)?;

        let lock = self.guild_lock(guild_id);
        let _guild = lock.lock().await;

        let duplicate = || EngineError::DuplicateName {
            kind: "event",
            name: name.clone(),
        };
        if self.store.get_event_by_name(&guild_id, &name).await?.is_some() {
            return Err(duplicate());
        }
        let event_id = match self
            .store
            .create_event(&guild_id, &name, max_sections, role_id, channel_id)
            .await
        {
            Ok(event_id) => event_id,
            Err(StoreError::Conflict(_)) => return Err(duplicate()),
            Err(e) => return Err(e.into()),
        };

        self.cache
            .put(Event {
                id: event_id,
                guild_id,
                name: name.clone(),
                max_sections,
                role_id,
                channel_id,
                status: EventStatus::Open,
                sections: vec![],
            })
            .await;
        info!("Created event {} ({}) in guild {}", name, event_id, guild_id);

        let entry = LogEntry::info("Event Created")
            .field("Event", format!("{} (ID: {})", name, event_id))
            .field("Max Sections", max_sections.to_string())
            .field(
                "Role",
                role_id.map(|r| r.mention().to_string()).unwrap_or("None".to_string()),
            );
        Ok(Applied::new(event_id)
            .with(SideEffect::Publish {
                guild_id,
                target: RenderTarget::Event(event_id),
                slot: ChannelSlot::Join,
            })
            .with(SideEffect::Log { guild_id, entry })
            .with(SideEffect::Stat {
                guild_id,
                stat: ServerStat::EventsCreated,
            }))
    }

    pub async fn create_section(
        &self,
        event_id: EventId,
        name: &str,
        max_teams: i32,
    ) -> Result<Applied<SectionId>, EngineError> {
        let name = valid_name("Section", name)?;
        valid_capacity("teams", max_teams)?;

        let mut event = self.lock_event(event_id).await?;
        ensure_open(&event)?;
        if event.sections.len() >= event.max_sections.max(0) as usize {
            return Err(EngineError::CapacityExceeded {
                parent: format!("Event '{}'", event.name),
                kind: "sections",
                max: event.max_sections,
            });
        }
        if event.section_by_name(&name).is_some() {
            return Err(EngineError::DuplicateName {
                kind: "section",
                name,
            });
        }

        let section_id = self.store.create_section(event_id, &name, max_teams).await?;
        event.sections.push(Section {
            id: section_id,
            event_id,
            name: name.clone(),
            max_teams,
            teams: vec![],
        });
        let (guild_id, event_name) = (event.guild_id, event.name.clone());
        drop(event);
        info!("Created section {} ({}) in event {}", name, section_id, event_id);

        let entry = LogEntry::info("Section Created")
            .field("Event", format!("{} (ID: {})", event_name, event_id))
            .field("Section", format!("{} (ID: {})", name, section_id))
            .field("Max Teams", max_teams.to_string());
        Ok(Applied::new(section_id)
            .with(SideEffect::Render(event_id))
            .with(SideEffect::Log { guild_id, entry }))
    }

    /// Creates a team with its leader as the first member.
    ///
    /// Without an emoji the first default emoji unused in the event is picked.
    pub async fn create_team(
        &self,
        section_id: SectionId,
        name: &str,
        leader_id: UserId,
        max_members: i32,
        emoji: Option<&str>,
    ) -> Result<Applied<Team>, EngineError> {
        let name = valid_name("Team", name)?;
        valid_capacity("members", max_members)?;
        let emoji = emoji.map(valid_emoji).transpose()?;

        let event_id = self.section_event(section_id).await?;
        let mut event = self.lock_event(event_id).await?;
        ensure_open(&event)?;
        let section = event
            .section(section_id)
            .ok_or_else(|| EngineError::not_found("Section", section_id))?;
        if section.is_full() {
            return Err(EngineError::CapacityExceeded {
                parent: format!("Section '{}'", section.name),
                kind: "teams",
                max: section.max_teams,
            });
        }
        if section.team_by_name(&name).is_some() {
            return Err(EngineError::DuplicateName { kind: "team", name });
        }
        let emoji = match emoji {
            Some(emoji) => {
                if let Some(owner) = event.emoji_owner(&emoji) {
                    return Err(EngineError::EmojiCollision {
                        emoji,
                        team: owner.name.clone(),
                    });
                }
                emoji
            }
            None => DEFAULT_TEAM_EMOJIS
                .iter()
                .find(|emoji| event.emoji_owner(emoji).is_none())
                .map(|emoji| emoji.to_string())
                .ok_or_else(|| {
                    EngineError::Invalid(
                        "Every default emoji is taken in this event, please pick one.".to_string(),
                    )
                })?,
        };
        if let Some((_, team)) = event.team_of(leader_id) {
            return Err(EngineError::LeaderInEvent {
                leader: leader_id,
                team: team.name.clone(),
            });
        }

        let team_id = self
            .store
            .create_team(section_id, &name, &leader_id, max_members, &emoji)
            .await?;
        let team = Team {
            id: team_id,
            section_id,
            name,
            leader_id,
            max_members,
            emoji,
            members: vec![leader_id],
        };
        if let Some(section) = event.section_mut(section_id) {
            section.teams.push(team.clone());
        }
        let (guild_id, role_id) = (event.guild_id, event.role_id);
        let candidate = event
            .section(section_id)
            .map(|section| event.candidate(section, &team));
        drop(event);
        info!("Created team {} ({}) in section {}", team.name, team_id, section_id);

        let mut applied = Applied::new(team.clone());
        if let Some(role_id) = role_id {
            applied = applied.with(SideEffect::GrantRole {
                guild_id,
                user_id: leader_id,
                role_id,
            });
        }
        let mut entry = LogEntry::info("Team Created")
            .field("Team", format!("{} {}", team.emoji, team.name))
            .field("Leader", leader_id.mention().to_string())
            .field("Max Members", max_members.to_string());
        if let Some(candidate) = candidate {
            entry = entry
                .field("Section", candidate.section_name)
                .field("Event", format!("{} (ID: {})", candidate.event_name, event_id));
        }
        Ok(applied
            .with(SideEffect::Render(event_id))
            .with(SideEffect::Log { guild_id, entry })
            .with(SideEffect::Stat {
                guild_id,
                stat: ServerStat::TeamsCreated,
            }))
    }

    /// Joins the single team named `team_name` within `scope`.
    pub async fn join(
        &self,
        user_id: UserId,
        team_name: &str,
        scope: JoinScope,
        method: JoinMethod,
    ) -> Result<Applied<TeamCandidate>, EngineError> {
        let target = self.resolve_team(team_name, scope).await?;
        self.join_team(user_id, target.event_id, target.team_id, method)
            .await
    }

    pub async fn join_team(
        &self,
        user_id: UserId,
        event_id: EventId,
        team_id: TeamId,
        method: JoinMethod,
    ) -> Result<Applied<TeamCandidate>, EngineError> {
        let mut event = self.lock_event(event_id).await?;
        ensure_open(&event)?;
        let (section, team) = find_team(&event, team_id)?;
        if team.has_member(user_id) {
            return Err(EngineError::AlreadyMember {
                team: team.name.clone(),
            });
        }
        if let Some((_, current)) = event.team_of(user_id) {
            return Err(EngineError::AlreadyInEvent {
                team: current.name.clone(),
            });
        }
        if team.is_full() {
            return Err(EngineError::Full {
                team: team.name.clone(),
                max: team.max_members,
            });
        }
        let candidate = event.candidate(section, team);

        self.store.add_member(team_id, &user_id).await?;
        if let Some(team) = event.team_mut(team_id) {
            team.members.push(user_id);
        }
        let (guild_id, role_id) = (event.guild_id, event.role_id);
        drop(event);
        info!("User {} joined team {} of event {}", user_id, team_id, event_id);

        let mut applied = Applied::new(candidate.clone());
        if let Some(role_id) = role_id {
            applied = applied.with(SideEffect::GrantRole {
                guild_id,
                user_id,
                role_id,
            });
        }
        Ok(applied
            .with(SideEffect::Render(event_id))
            .with(SideEffect::Notify {
                user_id,
                embed: membership_notice(MembershipChange::Joined, method, &candidate, None),
            })
            .with(SideEffect::Log {
                guild_id,
                entry: membership_log(MembershipChange::Joined, method, user_id, &candidate, None),
            })
            .with(SideEffect::Stat {
                guild_id,
                stat: ServerStat::MembersJoined,
            }))
    }

    /// Removes a user from a team. Leaving a team one is not in changes nothing.
    pub async fn leave(
        &self,
        user_id: UserId,
        event_id: EventId,
        team_id: TeamId,
        method: JoinMethod,
    ) -> Result<Applied<Option<TeamCandidate>>, EngineError> {
        let mut event = self.lock_event(event_id).await?;
        let (section, team) = find_team(&event, team_id)?;
        if !team.has_member(user_id) {
            return Ok(Applied::new(None));
        }
        let candidate = event.candidate(section, team);

        self.store.remove_member(&[team_id], &user_id).await?;
        if let Some(team) = event.team_mut(team_id) {
            team.members.retain(|member| *member != user_id);
        }
        let revoke = revoke_if_unattached(&event, user_id);
        let guild_id = event.guild_id;
        drop(event);
        info!("User {} left team {} of event {}", user_id, team_id, event_id);

        Ok(Applied::new(Some(candidate.clone()))
            .extend(revoke)
            .with(SideEffect::Render(event_id))
            .with(SideEffect::Notify {
                user_id,
                embed: membership_notice(MembershipChange::Left, method, &candidate, None),
            })
            .with(SideEffect::Log {
                guild_id,
                entry: membership_log(MembershipChange::Left, method, user_id, &candidate, None),
            }))
    }

    /// Removes every member of a team, the leader included. The team itself stays.
    pub async fn disqualify_team(
        &self,
        event_id: EventId,
        team_id: TeamId,
        reason: &str,
    ) -> Result<Applied<Vec<UserId>>, EngineError> {
        let mut event = self.lock_event(event_id).await?;
        let (section, team) = find_team(&event, team_id)?;
        let candidate = event.candidate(section, team);
        let members = team.members.clone();
        let emoji = team.emoji.clone();

        self.store.clear_members(team_id).await?;
        if let Some(team) = event.team_mut(team_id) {
            team.members.clear();
        }
        let mut applied = Applied::new(members.clone());
        for user_id in &members {
            applied = applied
                .extend(revoke_if_unattached(&event, *user_id))
                .with(SideEffect::Notify {
                    user_id: *user_id,
                    embed: membership_notice(
                        MembershipChange::Disqualified,
                        JoinMethod::Admin,
                        &candidate,
                        Some(reason),
                    ),
                })
                .with(SideEffect::Unreact {
                    event_id,
                    user_id: *user_id,
                    emoji: emoji.clone(),
                });
        }
        let guild_id = event.guild_id;
        drop(event);
        info!("Disqualified team {} of event {}: {}", team_id, event_id, reason);

        let entry = LogEntry::info("Team Disqualified")
            .field("Team", candidate.team_name.clone())
            .field("Section", candidate.section_name.clone())
            .field("Event", format!("{} (ID: {})", candidate.event_name, event_id))
            .field("Members", mentions(&members))
            .field("Reason", reason);
        Ok(applied
            .with(SideEffect::Render(event_id))
            .with(SideEffect::Log { guild_id, entry }))
    }

    /// Removes a user from every team of an event.
    pub async fn disqualify_member(
        &self,
        event_id: EventId,
        user_id: UserId,
        reason: &str,
    ) -> Result<Applied<Vec<TeamCandidate>>, EngineError> {
        let mut event = self.lock_event(event_id).await?;
        let memberships: Vec<(TeamCandidate, String)> = event
            .memberships(user_id)
            .into_iter()
            .map(|(section, team)| (event.candidate(section, team), team.emoji.clone()))
            .collect();
        if memberships.is_empty() {
            return Err(EngineError::NotFound(format!(
                "Member {} in event '{}'",
                user_id.mention(),
                event.name
            )));
        }
        let team_ids: Vec<TeamId> = memberships.iter().map(|(c, _)| c.team_id).collect();

        self.store.remove_member(&team_ids, &user_id).await?;
        for team_id in &team_ids {
            if let Some(team) = event.team_mut(*team_id) {
                team.members.retain(|member| *member != user_id);
            }
        }
        let revoke = revoke_if_unattached(&event, user_id);
        let guild_id = event.guild_id;
        drop(event);
        info!("Disqualified user {} from event {}: {}", user_id, event_id, reason);

        let mut applied = Applied::new(memberships.iter().map(|(c, _)| c.clone()).collect())
            .extend(revoke);
        for (candidate, emoji) in &memberships {
            applied = applied
                .with(SideEffect::Notify {
                    user_id,
                    embed: membership_notice(
                        MembershipChange::Disqualified,
                        JoinMethod::Admin,
                        candidate,
                        Some(reason),
                    ),
                })
                .with(SideEffect::Unreact {
                    event_id,
                    user_id,
                    emoji: emoji.clone(),
                })
                .with(SideEffect::Log {
                    guild_id,
                    entry: membership_log(
                        MembershipChange::Disqualified,
                        JoinMethod::Admin,
                        user_id,
                        candidate,
                        Some(reason),
                    ),
                });
        }
        Ok(applied.with(SideEffect::Render(event_id)))
    }

    pub async fn delete_team(
        &self,
        event_id: EventId,
        team_id: TeamId,
    ) -> Result<Applied<TeamCandidate>, EngineError> {
        let mut event = self.lock_event(event_id).await?;
        let (section, team) = find_team(&event, team_id)?;
        let candidate = event.candidate(section, team);
        let members = team.members.clone();

        self.store.delete_team(team_id).await?;
        if let Some(section) = event.section_mut(candidate.section_id) {
            section.teams.retain(|team| team.id != team_id);
        }
        let mut applied = Applied::new(candidate.clone());
        for user_id in &members {
            applied = applied
                .extend(revoke_if_unattached(&event, *user_id))
                .with(SideEffect::Notify {
                    user_id: *user_id,
                    embed: membership_notice(
                        MembershipChange::Removed,
                        JoinMethod::Admin,
                        &candidate,
                        Some("The team was deleted."),
                    ),
                });
        }
        let guild_id = event.guild_id;
        drop(event);
        info!("Deleted team {} of event {}", team_id, event_id);

        let entry = LogEntry::info("Team Deleted")
            .field("Team", candidate.team_name.clone())
            .field("Section", candidate.section_name.clone())
            .field("Event", format!("{} (ID: {})", candidate.event_name, event_id))
            .field("Members", mentions(&members));
        Ok(applied
            .with(SideEffect::Render(event_id))
            .with(SideEffect::Log { guild_id, entry }))
    }

    /// Deletes a section with its teams and members, and retires its join embeds.
    pub async fn delete_section(&self, section_id: SectionId) -> Result<Applied<String>, EngineError> {
        let event_id = self.section_event(section_id).await?;
        let mut event = self.lock_event(event_id).await?;
        let section = event
            .section(section_id)
            .ok_or_else(|| EngineError::not_found("Section", section_id))?;
        let name = section.name.clone();
        let mut members: Vec<UserId> = section
            .teams
            .iter()
            .flat_map(|team| team.members.iter().copied())
            .collect();
        members.sort();
        members.dedup();

        self.store.delete_section(section_id).await?;
        event.sections.retain(|section| section.id != section_id);
        let revokes: Vec<SideEffect> = members
            .iter()
            .filter_map(|user_id| revoke_if_unattached(&event, *user_id))
            .collect();
        let (guild_id, event_name) = (event.guild_id, event.name.clone());
        drop(event);
        info!("Deleted section {} of event {}", section_id, event_id);

        let entry = LogEntry::info("Section Deleted")
            .field("Section", format!("{} (ID: {})", name, section_id))
            .field("Event", format!("{} (ID: {})", event_name, event_id))
            .field("Members", mentions(&members));
        Ok(Applied::new(name.clone())
            .extend(revokes)
            .with(SideEffect::Retire {
                target: RenderTarget::Section {
                    event_id,
                    section_id,
                },
                name,
            })
            .with(SideEffect::Render(event_id))
            .with(SideEffect::Log { guild_id, entry }))
    }

    /// Deletes an event and everything beneath it, from the store first and then the cache.
    ///
    /// Valid from any state. Every remaining member loses the event role.
    pub async fn close_event(&self, event_id: EventId) -> Result<Applied<String>, EngineError> {
        let (slot, mut guard) = self.lock_slot(event_id, false).await?;
        let Some(event) = guard.as_ref() else {
            return Err(EngineError::not_found("Event", event_id));
        };
        let (guild_id, name, role_id) = (event.guild_id, event.name.clone(), event.role_id);
        let members = event.members();

        self.store.delete_event(event_id).await?;
        guard.take();
        self.cache.forget(event_id, &slot);
        drop(guard);
        info!("Closed event {} ({})", name, event_id);

        let revokes = role_id.into_iter().flat_map(|role_id| {
            members.iter().map(move |user_id| SideEffect::RevokeRole {
                guild_id,
                user_id: *user_id,
                role_id,
            })
        });
        let entry = LogEntry::info("Event Closed")
            .field("Event", format!("{} (ID: {})", name, event_id))
            .field("Members", members.len().to_string());
        Ok(Applied::new(name.clone())
            .extend(revokes.collect::<Vec<_>>())
            .with(SideEffect::RetireEvent { event_id, name })
            .with(SideEffect::Log { guild_id, entry }))
    }

    /// Ends an event: freezes its standings, announces the top three and resets its scores.
    ///
    /// The membership graph is left untouched until the event is closed.
    pub async fn end_event(
        &self,
        event_id: EventId,
        ping: Option<RoleId>,
    ) -> Result<Applied<Vec<Standing>>, EngineError> {
        let mut event = self.lock_event(event_id).await?;
        ensure_open(&event)?;
        let scores = self.store.get_scores(event_id).await?;
        let standings = standings(&event, &scores);
        if standings.is_empty() {
            return Err(EngineError::NoScores(event.name.clone()));
        }

        self.store.end_event(event_id).await?;
        event.status = EventStatus::Ended;
        let winners: Vec<Standing> = standings.iter().take(3).cloned().collect();
        let embed = render_winners(&event, &winners);
        let (guild_id, channel_id, name) = (event.guild_id, event.channel_id, event.name.clone());
        drop(event);
        info!("Ended event {} ({})", name, event_id);

        let mut entry = LogEntry::info("Event Ended")
            .field("Event", format!("{} (ID: {})", name, event_id));
        for (i, winner) in winners.iter().enumerate() {
            entry = entry.field(
                format!("#{}", i + 1),
                format!("{} ({} points)", winner.team_name, winner.score),
            );
        }
        Ok(Applied::new(standings)
            .with(SideEffect::Announce {
                guild_id,
                channel_id,
                slot: ChannelSlot::Event,
                content: ping.map(|role| role.mention().to_string()),
                embed,
            })
            .with(SideEffect::Render(event_id))
            .with(SideEffect::Log { guild_id, entry }))
    }

    pub async fn set_score(
        &self,
        event_id: EventId,
        team_id: TeamId,
        score: i64,
    ) -> Result<Applied<i64>, EngineError> {
        self.write_score(event_id, team_id, |_| Some(score)).await
    }

    pub async fn add_score(
        &self,
        event_id: EventId,
        team_id: TeamId,
        points: i64,
    ) -> Result<Applied<i64>, EngineError> {
        self.write_score(event_id, team_id, |current| current.checked_add(points))
            .await
    }

    async fn write_score(
        &self,
        event_id: EventId,
        team_id: TeamId,
        update: impl FnOnce(i64) -> Option<i64>,
    ) -> Result<Applied<i64>, EngineError> {
        let event = self.lock_event(event_id).await?;
        ensure_open(&event)?;
        let (_, team) = find_team(&event, team_id)?;
        let team_name = team.name.clone();
        let current = self
            .store
            .get_scores(event_id)
            .await?
            .into_iter()
            .find(|row| row.team_id == team_id)
            .map(|row| row.score)
            .unwrap_or_default();
        let score = update(current)
            .ok_or_else(|| EngineError::Invalid("That score is out of range.".to_string()))?;

        self.store.set_score(event_id, team_id, score).await?;
        let (guild_id, event_name) = (event.guild_id, event.name.clone());
        drop(event);
        info!("Score of team {} in event {} is now {}", team_id, event_id, score);

        let entry = LogEntry::info("Score Updated")
            .field("Team", team_name)
            .field("Event", format!("{} (ID: {})", event_name, event_id))
            .field("Score", format!("{} → {}", current, score));
        Ok(Applied::new(score)
            .with(SideEffect::Render(event_id))
            .with(SideEffect::Log { guild_id, entry }))
    }

    /// An event with its current standings, highest score first.
    pub async fn scores(&self, event_id: EventId) -> Result<(Event, Vec<Standing>), EngineError> {
        let event = self.event(event_id).await?;
        let scores = self.store.get_scores(event_id).await?;
        let standings = standings(&event, &scores);
        Ok((event, standings))
    }

    /// Replaces the cached copy of an event with a fresh load from the store.
    pub async fn reload_event(&self, event_id: EventId) -> Result<Applied<Event>, EngineError> {
        let (_, guard) = self.lock_slot(event_id, true).await?;
        let event = EntityCache::loaded(guard)
            .map(|event| (*event).clone())
            .ok_or_else(|| EngineError::not_found("Event", event_id))?;
        info!("Reloaded event {} from the store", event_id);
        Ok(Applied::new(event).with(SideEffect::Render(event_id)))
    }
}
