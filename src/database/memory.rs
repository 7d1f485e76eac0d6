use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Mutex;

use poise::serenity_prelude::{ChannelId, GuildId, RoleId, UserId};

use super::models::*;
use super::*;

#[derive(Debug, Default)]
struct Tables {
    events: Vec<EventRow>,
    sections: Vec<SectionRow>,
    teams: Vec<TeamRow>,
    members: Vec<TeamMemberRow>,
    scores: HashMap<(EventId, TeamId), i64>,
    channels: HashMap<(GuildId, ChannelSlot), ChannelId>,
    usage: HashMap<(GuildId, UserId, String), i64>,
    server: HashMap<(GuildId, String), i64>,
}

/// A store kept entirely in memory.
///
/// Every call yields to the scheduler first, so concurrent callers interleave the way they would
/// against a real connection pool. Writes can be made to fail on demand.
#[derive(Debug, Default)]
pub struct MemoryDatabase {
    tables: Mutex<Tables>,
    next_id: AtomicI64,
    fail_writes: AtomicBool,
    writes: AtomicI64,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following write fail with `StoreError::Unavailable`.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of writes acknowledged so far.
    pub fn write_count(&self) -> i64 {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn member_rows(&self, team_id: TeamId) -> Vec<UserId> {
        self.lock()
            .members
            .iter()
            .filter(|m| m.team_id == team_id)
            .filter_map(|m| parse_id(&m.user_id).ok())
            .collect()
    }

    pub fn team_rows(&self) -> usize {
        self.lock().teams.len()
    }

    pub fn event_rows(&self) -> usize {
        self.lock().events.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    async fn read(&self) {
        tokio::task::yield_now().await;
    }

    async fn write(&self) -> Result<(), StoreError> {
        tokio::task::yield_now().await;
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("write refused".to_string()));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn drop_teams(tables: &mut Tables, team_ids: &[TeamId]) {
        tables.members.retain(|m| !team_ids.contains(&m.team_id));
        tables.scores.retain(|(_, team_id), _| !team_ids.contains(team_id));
        tables.teams.retain(|t| !team_ids.contains(&t.team_id));
    }
}

impl TournamentDatabase for MemoryDatabase {
    async fn create_event(
        &self,
        guild_id: &GuildId,
        name: &str,
        max_sections: i32,
        role_id: Option<RoleId>,
        channel_id: Option<ChannelId>,
    ) -> Result<EventId, StoreError> {
        self.write().await?;
        let mut tables = self.lock();
        let guild = guild_id.to_string();
        if tables
            .events
            .iter()
            .any(|e| e.guild_id == guild && e.name.to_lowercase() == name.to_lowercase())
        {
            return Err(StoreError::Conflict(name.to_string()));
        }
        let event_id = self.next_id();
        tables.events.push(EventRow {
            event_id,
            guild_id: guild,
            name: name.to_string(),
            max_sections,
            role_id: role_id.map(|r| r.to_string()),
            channel_id: channel_id.map(|c| c.to_string()),
            status: EventStatus::Open,
            created_at: 0,
        });
        Ok(event_id)
    }

    async fn get_event_by_name(
        &self,
        guild_id: &GuildId,
        name: &str,
    ) -> Result<Option<EventRow>, StoreError> {
        self.read().await;
        let guild = guild_id.to_string();
        Ok(self
            .lock()
            .events
            .iter()
            .find(|e| e.guild_id == guild && e.name.to_lowercase() == name.trim().to_lowercase())
            .cloned())
    }

    async fn list_events(&self, guild_id: &GuildId) -> Result<Vec<EventRow>, StoreError> {
        self.read().await;
        let guild = guild_id.to_string();
        Ok(self
            .lock()
            .events
            .iter()
            .filter(|e| e.guild_id == guild)
            .cloned()
            .collect())
    }

    async fn load_event(&self, event_id: EventId) -> Result<Option<Event>, StoreError> {
        self.read().await;
        let tables = self.lock();
        let Some(row) = tables.events.iter().find(|e| e.event_id == event_id).cloned() else {
            return Ok(None);
        };
        let sections: Vec<SectionRow> = tables
            .sections
            .iter()
            .filter(|s| s.event_id == event_id)
            .cloned()
            .collect();
        let teams: Vec<TeamRow> = tables
            .teams
            .iter()
            .filter(|t| sections.iter().any(|s| s.section_id == t.section_id))
            .cloned()
            .collect();
        let members: Vec<TeamMemberRow> = tables
            .members
            .iter()
            .filter(|m| teams.iter().any(|t| t.team_id == m.team_id))
            .cloned()
            .collect();
        assemble_event(row, sections, teams, members).map(Some)
    }

    async fn get_section_event(
        &self,
        section_id: SectionId,
    ) -> Result<Option<EventId>, StoreError> {
        self.read().await;
        Ok(self
            .lock()
            .sections
            .iter()
            .find(|s| s.section_id == section_id)
            .map(|s| s.event_id))
    }

    async fn delete_event(&self, event_id: EventId) -> Result<(), StoreError> {
        self.write().await?;
        let mut tables = self.lock();
        let section_ids: Vec<SectionId> = tables
            .sections
            .iter()
            .filter(|s| s.event_id == event_id)
            .map(|s| s.section_id)
            .collect();
        let team_ids: Vec<TeamId> = tables
            .teams
            .iter()
            .filter(|t| section_ids.contains(&t.section_id))
            .map(|t| t.team_id)
            .collect();
        Self::drop_teams(&mut tables, &team_ids);
        tables.scores.retain(|(event, _), _| *event != event_id);
        tables.sections.retain(|s| s.event_id != event_id);
        tables.events.retain(|e| e.event_id != event_id);
        Ok(())
    }

    async fn create_section(
        &self,
        event_id: EventId,
        name: &str,
        max_teams: i32,
    ) -> Result<SectionId, StoreError> {
        self.write().await?;
        let section_id = self.next_id();
        self.lock().sections.push(SectionRow {
            section_id,
            event_id,
            name: name.to_string(),
            max_teams,
        });
        Ok(section_id)
    }

    async fn delete_section(&self, section_id: SectionId) -> Result<(), StoreError> {
        self.write().await?;
        let mut tables = self.lock();
        let team_ids: Vec<TeamId> = tables
            .teams
            .iter()
            .filter(|t| t.section_id == section_id)
            .map(|t| t.team_id)
            .collect();
        Self::drop_teams(&mut tables, &team_ids);
        tables.sections.retain(|s| s.section_id != section_id);
        Ok(())
    }

    async fn create_team(
        &self,
        section_id: SectionId,
        name: &str,
        leader_id: &UserId,
        max_members: i32,
        emoji: &str,
    ) -> Result<TeamId, StoreError> {
        self.write().await?;
        let team_id = self.next_id();
        let mut tables = self.lock();
        tables.teams.push(TeamRow {
            team_id,
            section_id,
            name: name.to_string(),
            leader_id: leader_id.to_string(),
            max_members,
            emoji: emoji.to_string(),
        });
        tables.members.push(TeamMemberRow {
            team_id,
            user_id: leader_id.to_string(),
        });
        Ok(team_id)
    }

    async fn delete_team(&self, team_id: TeamId) -> Result<(), StoreError> {
        self.write().await?;
        Self::drop_teams(&mut self.lock(), &[team_id]);
        Ok(())
    }

    async fn add_member(&self, team_id: TeamId, user_id: &UserId) -> Result<(), StoreError> {
        self.write().await?;
        let mut tables = self.lock();
        let user = user_id.to_string();
        if !tables
            .members
            .iter()
            .any(|m| m.team_id == team_id && m.user_id == user)
        {
            tables.members.push(TeamMemberRow {
                team_id,
                user_id: user,
            });
        }
        Ok(())
    }

    async fn remove_member(
        &self,
        team_ids: &[TeamId],
        user_id: &UserId,
    ) -> Result<(), StoreError> {
        self.write().await?;
        let user = user_id.to_string();
        self.lock()
            .members
            .retain(|m| !(team_ids.contains(&m.team_id) && m.user_id == user));
        Ok(())
    }

    async fn clear_members(&self, team_id: TeamId) -> Result<(), StoreError> {
        self.write().await?;
        self.lock().members.retain(|m| m.team_id != team_id);
        Ok(())
    }
}

impl LeaderboardDatabase for MemoryDatabase {
    async fn set_score(
        &self,
        event_id: EventId,
        team_id: TeamId,
        score: i64,
    ) -> Result<(), StoreError> {
        self.write().await?;
        self.lock().scores.insert((event_id, team_id), score);
        Ok(())
    }

    async fn get_scores(&self, event_id: EventId) -> Result<Vec<ScoreRow>, StoreError> {
        self.read().await;
        let mut scores: Vec<ScoreRow> = self
            .lock()
            .scores
            .iter()
            .filter(|((event, _), _)| *event == event_id)
            .map(|((_, team_id), score)| ScoreRow {
                team_id: *team_id,
                score: *score,
            })
            .collect();
        scores.sort_by(|a, b| b.score.cmp(&a.score).then(a.team_id.cmp(&b.team_id)));
        Ok(scores)
    }

    async fn end_event(&self, event_id: EventId) -> Result<(), StoreError> {
        self.write().await?;
        let mut tables = self.lock();
        tables.scores.retain(|(event, _), _| *event != event_id);
        if let Some(event) = tables.events.iter_mut().find(|e| e.event_id == event_id) {
            event.status = EventStatus::Ended;
        }
        Ok(())
    }
}

impl ConfigDatabase for MemoryDatabase {
    async fn set_channel(
        &self,
        guild_id: &GuildId,
        slot: ChannelSlot,
        channel_id: &ChannelId,
    ) -> Result<(), StoreError> {
        self.write().await?;
        self.lock().channels.insert((*guild_id, slot), *channel_id);
        Ok(())
    }

    async fn get_channel(
        &self,
        guild_id: &GuildId,
        slot: ChannelSlot,
    ) -> Result<Option<ChannelId>, StoreError> {
        self.read().await;
        Ok(self.lock().channels.get(&(*guild_id, slot)).copied())
    }

    async fn get_channels(
        &self,
        guild_id: &GuildId,
    ) -> Result<Vec<(ChannelSlot, ChannelId)>, StoreError> {
        self.read().await;
        Ok(self
            .lock()
            .channels
            .iter()
            .filter(|((guild, _), _)| guild == guild_id)
            .map(|((_, slot), channel)| (*slot, *channel))
            .collect())
    }
}

impl StatsDatabase for MemoryDatabase {
    async fn log_command(
        &self,
        guild_id: &GuildId,
        user_id: &UserId,
        command: &str,
    ) -> Result<(), StoreError> {
        self.write().await?;
        *self
            .lock()
            .usage
            .entry((*guild_id, *user_id, command.to_string()))
            .or_default() += 1;
        Ok(())
    }

    async fn get_user_usage(
        &self,
        guild_id: &GuildId,
        user_id: &UserId,
    ) -> Result<Vec<CommandUsage>, StoreError> {
        self.read().await;
        let mut usage: Vec<CommandUsage> = self
            .lock()
            .usage
            .iter()
            .filter(|((guild, user, _), _)| guild == guild_id && user == user_id)
            .map(|((_, _, command), count)| CommandUsage {
                command: command.clone(),
                count: *count,
            })
            .collect();
        usage.sort_by(|a, b| b.count.cmp(&a.count).then(a.command.cmp(&b.command)));
        Ok(usage)
    }

    async fn get_top_users(
        &self,
        guild_id: &GuildId,
        limit: i64,
    ) -> Result<Vec<UserUsage>, StoreError> {
        self.read().await;
        let mut totals: HashMap<UserId, i64> = HashMap::new();
        for ((guild, user, _), count) in self.lock().usage.iter() {
            if guild == guild_id {
                *totals.entry(*user).or_default() += count;
            }
        }
        let mut users: Vec<UserUsage> = totals
            .into_iter()
            .map(|(user, total)| UserUsage {
                user_id: user.to_string(),
                total,
            })
            .collect();
        users.sort_by(|a, b| b.total.cmp(&a.total).then(a.user_id.cmp(&b.user_id)));
        users.truncate(limit.max(0) as usize);
        Ok(users)
    }

    async fn increment_server_stat(
        &self,
        guild_id: &GuildId,
        stat: ServerStat,
    ) -> Result<(), StoreError> {
        self.write().await?;
        *self
            .lock()
            .server
            .entry((*guild_id, stat.to_string()))
            .or_default() += 1;
        Ok(())
    }

    async fn get_server_stats(
        &self,
        guild_id: &GuildId,
    ) -> Result<Vec<(ServerStat, i64)>, StoreError> {
        self.read().await;
        let tables = self.lock();
        Ok(ServerStat::all()
            .into_iter()
            .filter_map(|stat| {
                tables
                    .server
                    .get(&(*guild_id, stat.to_string()))
                    .map(|value| (stat, *value))
            })
            .collect())
    }
}
