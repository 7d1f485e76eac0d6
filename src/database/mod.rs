use std::collections::HashMap;

use models::*;
use poise::serenity_prelude::{ChannelId, GuildId, RoleId, UserId};
use sqlx::{PgPool, Postgres, Transaction};
use thiserror::Error;
use tracing::info;

use crate::tournament::model::{Event, EventId, Section, SectionId, Team, TeamId};

/// An in-memory store used by the test suite.
#[cfg(test)]
pub mod memory;
/// Models for the database.
///
/// These models are specific to the current database design and schema.
/// Most if not all are directly mapped to a table in the database.
pub mod models;

/// Failures of the persistent store.
///
/// These are the only failures that abort a tournament operation: the write did not happen.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(sqlx::Error),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    /// A uniqueness constraint rejected the write.
    #[error("conflicting row: {0}")]
    Conflict(String),
    #[error("corrupt row: {0}")]
    Corrupt(String),
    /// The pool could not hand out a connection.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StoreError::Unavailable(err.to_string())
            }
            err => StoreError::Sqlx(err),
        }
    }
}

/// Unique violations are reported as conflicts so callers can treat them as validation errors.
fn classify(err: sqlx::Error, what: &str) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StoreError::Conflict(what.to_string())
        }
        _ => StoreError::from(err),
    }
}

/// Parses a snowflake stored as text.
pub fn parse_id<T: From<u64>>(raw: &str) -> Result<T, StoreError> {
    raw.trim()
        .parse::<u64>()
        .ok()
        .filter(|id| *id != 0)
        .map(T::from)
        .ok_or_else(|| StoreError::Corrupt(format!("invalid snowflake '{}'", raw)))
}

fn parse_optional_id<T: From<u64>>(raw: &Option<String>) -> Result<Option<T>, StoreError> {
    raw.as_deref().map(parse_id).transpose()
}

/// Builds an event subtree out of its rows. Sections and teams keep their creation order.
pub fn assemble_event(
    row: EventRow,
    sections: Vec<SectionRow>,
    teams: Vec<TeamRow>,
    members: Vec<TeamMemberRow>,
) -> Result<Event, StoreError> {
    let mut members_by_team: HashMap<TeamId, Vec<UserId>> = HashMap::new();
    for member in members {
        members_by_team
            .entry(member.team_id)
            .or_default()
            .push(parse_id(&member.user_id)?);
    }

    let mut teams_by_section: HashMap<SectionId, Vec<Team>> = HashMap::new();
    for team in teams {
        let leader_id: UserId = parse_id(&team.leader_id)?;
        let mut members = members_by_team.remove(&team.team_id).unwrap_or_default();
        // Keep the leader first, as they were inserted first.
        if let Some(pos) = members.iter().position(|m| *m == leader_id) {
            members.swap(0, pos);
        }
        teams_by_section
            .entry(team.section_id)
            .or_default()
            .push(Team {
                id: team.team_id,
                section_id: team.section_id,
                name: team.name,
                leader_id,
                max_members: team.max_members,
                emoji: team.emoji,
                members,
            });
    }

    let sections = sections
        .into_iter()
        .map(|section| Section {
            id: section.section_id,
            event_id: section.event_id,
            name: section.name,
            max_teams: section.max_teams,
            teams: teams_by_section
                .remove(&section.section_id)
                .unwrap_or_default(),
        })
        .collect();

    Ok(Event {
        id: row.event_id,
        guild_id: parse_id(&row.guild_id)?,
        name: row.name,
        max_sections: row.max_sections,
        role_id: parse_optional_id(&row.role_id)?,
        channel_id: parse_optional_id(&row.channel_id)?,
        status: row.status,
        sections,
    })
}

/// The Postgres database used for the tournament system.
#[derive(Debug, Clone)]
pub struct PgDatabase {
    pub pool: PgPool,
}

impl PgDatabase {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url).await?;
        info!("Successfully connected to the database.");

        Ok(PgDatabase { pool })
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

/// Events, sections, teams and their members.
///
/// Every method is a single transaction: either all of its rows are written or none are.
#[allow(async_fn_in_trait)]
pub trait TournamentDatabase {
    /// Creates an event in the database, returning the event id.
    async fn create_event(
        &self,
        guild_id: &GuildId,
        name: &str,
        max_sections: i32,
        role_id: Option<RoleId>,
        channel_id: Option<ChannelId>,
    ) -> Result<EventId, StoreError>;

    /// Retrieves an event of a guild by name, compared case-insensitively.
    async fn get_event_by_name(
        &self,
        guild_id: &GuildId,
        name: &str,
    ) -> Result<Option<EventRow>, StoreError>;

    /// Retrieves all events of a guild, oldest first.
    async fn list_events(&self, guild_id: &GuildId) -> Result<Vec<EventRow>, StoreError>;

    /// Loads an event together with all its sections, teams and members.
    async fn load_event(&self, event_id: EventId) -> Result<Option<Event>, StoreError>;

    /// Finds the event a section belongs to.
    async fn get_section_event(&self, section_id: SectionId)
        -> Result<Option<EventId>, StoreError>;

    /// Deletes an event and every row beneath it.
    async fn delete_event(&self, event_id: EventId) -> Result<(), StoreError>;

    async fn create_section(
        &self,
        event_id: EventId,
        name: &str,
        max_teams: i32,
    ) -> Result<SectionId, StoreError>;

    /// Deletes a section, its teams, their members and their scores.
    async fn delete_section(&self, section_id: SectionId) -> Result<(), StoreError>;

    /// Creates a team and enters its leader as the first member.
    async fn create_team(
        &self,
        section_id: SectionId,
        name: &str,
        leader_id: &UserId,
        max_members: i32,
        emoji: &str,
    ) -> Result<TeamId, StoreError>;

    /// Deletes a team, its members and its score.
    async fn delete_team(&self, team_id: TeamId) -> Result<(), StoreError>;

    async fn add_member(&self, team_id: TeamId, user_id: &UserId) -> Result<(), StoreError>;

    /// Removes a user from every listed team.
    async fn remove_member(&self, team_ids: &[TeamId], user_id: &UserId)
        -> Result<(), StoreError>;

    /// Removes every member of a team, the leader included.
    async fn clear_members(&self, team_id: TeamId) -> Result<(), StoreError>;
}

/// Scores, which live only in the store and never in the entity cache.
#[allow(async_fn_in_trait)]
pub trait LeaderboardDatabase {
    async fn set_score(&self, event_id: EventId, team_id: TeamId, score: i64)
        -> Result<(), StoreError>;

    /// Retrieves the scores of an event, highest first.
    async fn get_scores(&self, event_id: EventId) -> Result<Vec<ScoreRow>, StoreError>;

    /// Marks an event as ended and resets its scores.
    async fn end_event(&self, event_id: EventId) -> Result<(), StoreError>;
}

#[allow(async_fn_in_trait)]
pub trait ConfigDatabase {
    /// Binds a logical channel of a guild to a concrete channel.
    async fn set_channel(
        &self,
        guild_id: &GuildId,
        slot: ChannelSlot,
        channel_id: &ChannelId,
    ) -> Result<(), StoreError>;

    async fn get_channel(
        &self,
        guild_id: &GuildId,
        slot: ChannelSlot,
    ) -> Result<Option<ChannelId>, StoreError>;

    async fn get_channels(
        &self,
        guild_id: &GuildId,
    ) -> Result<Vec<(ChannelSlot, ChannelId)>, StoreError>;
}

#[allow(async_fn_in_trait)]
pub trait StatsDatabase {
    /// Counts one invocation of a command by a user.
    async fn log_command(
        &self,
        guild_id: &GuildId,
        user_id: &UserId,
        command: &str,
    ) -> Result<(), StoreError>;

    async fn get_user_usage(
        &self,
        guild_id: &GuildId,
        user_id: &UserId,
    ) -> Result<Vec<CommandUsage>, StoreError>;

    async fn get_top_users(
        &self,
        guild_id: &GuildId,
        limit: i64,
    ) -> Result<Vec<UserUsage>, StoreError>;

    async fn increment_server_stat(
        &self,
        guild_id: &GuildId,
        stat: ServerStat,
    ) -> Result<(), StoreError>;

    async fn get_server_stats(&self, guild_id: &GuildId)
        -> Result<Vec<(ServerStat, i64)>, StoreError>;
}

/// Everything the bot needs from its persistent store.
pub trait Store: TournamentDatabase + LeaderboardDatabase + ConfigDatabase + StatsDatabase {}

impl<T> Store for T where T: TournamentDatabase + LeaderboardDatabase + ConfigDatabase + StatsDatabase
{}

impl PgDatabase {
    async fn delete_teams_in(
        tx: &mut Transaction<'_, Postgres>,
        team_ids: &[TeamId],
    ) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM team_members WHERE team_id = ANY($1)")
            .bind(team_ids)
            .execute(&mut **tx)
            .await?;
        sqlx::query("DELETE FROM leaderboard WHERE team_id = ANY($1)")
            .bind(team_ids)
            .execute(&mut **tx)
            .await?;
        sqlx::query("DELETE FROM teams WHERE team_id = ANY($1)")
            .bind(team_ids)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    async fn team_ids_of_sections(
        tx: &mut Transaction<'_, Postgres>,
        section_ids: &[SectionId],
    ) -> Result<Vec<TeamId>, StoreError> {
        let ids = sqlx::query_scalar::<_, i64>("SELECT team_id FROM teams WHERE section_id = ANY($1)")
            .bind(section_ids)
            .fetch_all(&mut **tx)
            .await?;
        Ok(ids)
    }
}

impl TournamentDatabase for PgDatabase {
    async fn create_event(
        &self,
        guild_id: &GuildId,
        name: &str,
        max_sections: i32,
        role_id: Option<RoleId>,
        channel_id: Option<ChannelId>,
    ) -> Result<EventId, StoreError> {
        let event_id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO events (guild_id, name, max_sections, role_id, channel_id, status, created_at)
            VALUES ($1, $2, $3, $4, $5, 'open', $6)
            RETURNING event_id
            "#,
        )
        .bind(guild_id.to_string())
        .bind(name)
        .bind(max_sections)
        .bind(role_id.map(|r| r.to_string()))
        .bind(channel_id.map(|c| c.to_string()))
        .bind(chrono::offset::Utc::now().timestamp())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| classify(e, name))?;

        Ok(event_id)
    }

    async fn get_event_by_name(
        &self,
        guild_id: &GuildId,
        name: &str,
    ) -> Result<Option<EventRow>, StoreError> {
        let event = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT * FROM events
            WHERE guild_id = $1 AND LOWER(name) = LOWER($2)
            LIMIT 1
            "#,
        )
        .bind(guild_id.to_string())
        .bind(name.trim())
        .fetch_optional(&self.pool)
        .await?;

        Ok(event)
    }

    async fn list_events(&self, guild_id: &GuildId) -> Result<Vec<EventRow>, StoreError> {
        let events = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT * FROM events
            WHERE guild_id = $1
            ORDER BY event_id ASC
            "#,
        )
        .bind(guild_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        Ok(events)
    }

    async fn load_event(&self, event_id: EventId) -> Result<Option<Event>, StoreError> {
        let Some(row) = sqlx::query_as::<_, EventRow>("SELECT * FROM events WHERE event_id = $1")
            .bind(event_id)
            .fetch_optional(&self.pool)
            .await?
        else {
            return Ok(None);
        };

        let sections = sqlx::query_as::<_, SectionRow>(
            "SELECT * FROM sections WHERE event_id = $1 ORDER BY section_id ASC",
        )
        .bind(event_id)
        .fetch_all(&self.pool)
        .await?;

        let section_ids: Vec<SectionId> = sections.iter().map(|s| s.section_id).collect();
        let teams = sqlx::query_as::<_, TeamRow>(
            "SELECT * FROM teams WHERE section_id = ANY($1) ORDER BY team_id ASC",
        )
        .bind(&section_ids)
        .fetch_all(&self.pool)
        .await?;

        let team_ids: Vec<TeamId> = teams.iter().map(|t| t.team_id).collect();
        let members = sqlx::query_as::<_, TeamMemberRow>(
            r#"
            SELECT team_id, user_id FROM team_members
            WHERE team_id = ANY($1)
            ORDER BY joined_at ASC
            "#,
        )
        .bind(&team_ids)
        .fetch_all(&self.pool)
        .await?;

        assemble_event(row, sections, teams, members).map(Some)
    }

    async fn get_section_event(
        &self,
        section_id: SectionId,
    ) -> Result<Option<EventId>, StoreError> {
        let event_id =
            sqlx::query_scalar::<_, i64>("SELECT event_id FROM sections WHERE section_id = $1")
                .bind(section_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(event_id)
    }

    async fn delete_event(&self, event_id: EventId) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        let section_ids = sqlx::query_scalar::<_, i64>(
            "SELECT section_id FROM sections WHERE event_id = $1",
        )
        .bind(event_id)
        .fetch_all(&mut *tx)
        .await?;
        let team_ids = Self::team_ids_of_sections(&mut tx, &section_ids).await?;
        Self::delete_teams_in(&mut tx, &team_ids).await?;
        sqlx::query("DELETE FROM leaderboard WHERE event_id = $1")
            .bind(event_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM sections WHERE event_id = $1")
            .bind(event_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM events WHERE event_id = $1")
            .bind(event_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn create_section(
        &self,
        event_id: EventId,
        name: &str,
        max_teams: i32,
    ) -> Result<SectionId, StoreError> {
        let section_id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO sections (event_id, name, max_teams)
            VALUES ($1, $2, $3)
            RETURNING section_id
            "#,
        )
        .bind(event_id)
        .bind(name)
        .bind(max_teams)
        .fetch_one(&self.pool)
        .await?;
        Ok(section_id)
    }

    async fn delete_section(&self, section_id: SectionId) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        let team_ids = Self::team_ids_of_sections(&mut tx, &[section_id]).await?;
        Self::delete_teams_in(&mut tx, &team_ids).await?;
        sqlx::query("DELETE FROM sections WHERE section_id = $1")
            .bind(section_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
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
        let mut tx = self.pool.begin().await?;
        let team_id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO teams (section_id, name, leader_id, max_members, emoji)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING team_id
            "#,
        )
        .bind(section_id)
        .bind(name)
        .bind(leader_id.to_string())
        .bind(max_members)
        .bind(emoji)
        .fetch_one(&mut *tx)
        .await?;
        sqlx::query(
            r#"
            INSERT INTO team_members (team_id, user_id, joined_at)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(team_id)
        .bind(leader_id.to_string())
        .bind(chrono::offset::Utc::now().timestamp_millis())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(team_id)
    }

    async fn delete_team(&self, team_id: TeamId) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        Self::delete_teams_in(&mut tx, &[team_id]).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn add_member(&self, team_id: TeamId, user_id: &UserId) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO team_members (team_id, user_id, joined_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (team_id, user_id) DO NOTHING
            "#,
        )
        .bind(team_id)
        .bind(user_id.to_string())
        .bind(chrono::offset::Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove_member(
        &self,
        team_ids: &[TeamId],
        user_id: &UserId,
    ) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM team_members WHERE team_id = ANY($1) AND user_id = $2")
            .bind(team_ids)
            .bind(user_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn clear_members(&self, team_id: TeamId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM team_members WHERE team_id = $1")
            .bind(team_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

impl LeaderboardDatabase for PgDatabase {
    async fn set_score(
        &self,
        event_id: EventId,
        team_id: TeamId,
        score: i64,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO leaderboard (event_id, team_id, score)
            VALUES ($1, $2, $3)
            ON CONFLICT (event_id, team_id)
            DO UPDATE SET score = EXCLUDED.score
            "#,
        )
        .bind(event_id)
        .bind(team_id)
        .bind(score)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_scores(&self, event_id: EventId) -> Result<Vec<ScoreRow>, StoreError> {
        let scores = sqlx::query_as::<_, ScoreRow>(
            r#"
            SELECT team_id, score FROM leaderboard
            WHERE event_id = $1
            ORDER BY score DESC, team_id ASC
            "#,
        )
        .bind(event_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(scores)
    }

    async fn end_event(&self, event_id: EventId) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM leaderboard WHERE event_id = $1")
            .bind(event_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE events SET status = $2 WHERE event_id = $1")
            .bind(event_id)
            .bind(EventStatus::Ended)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}

impl ConfigDatabase for PgDatabase {
    async fn set_channel(
        &self,
        guild_id: &GuildId,
        slot: ChannelSlot,
        channel_id: &ChannelId,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO channel_config (guild_id, slot, channel_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (guild_id, slot)
            DO UPDATE SET channel_id = EXCLUDED.channel_id
            "#,
        )
        .bind(guild_id.to_string())
        .bind(slot)
        .bind(channel_id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_channel(
        &self,
        guild_id: &GuildId,
        slot: ChannelSlot,
    ) -> Result<Option<ChannelId>, StoreError> {
        let channel = sqlx::query_scalar::<_, String>(
            r#"
            SELECT channel_id FROM channel_config
            WHERE guild_id = $1 AND slot = $2
            LIMIT 1
            "#,
        )
        .bind(guild_id.to_string())
        .bind(slot)
        .fetch_optional(&self.pool)
        .await?;
        channel.as_deref().map(parse_id).transpose()
    }

    async fn get_channels(
        &self,
        guild_id: &GuildId,
    ) -> Result<Vec<(ChannelSlot, ChannelId)>, StoreError> {
        sqlx::query_as::<_, ChannelBinding>(
            "SELECT slot, channel_id FROM channel_config WHERE guild_id = $1",
        )
        .bind(guild_id.to_string())
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|binding| Ok((binding.slot, parse_id(&binding.channel_id)?)))
        .collect()
    }
}

impl StatsDatabase for PgDatabase {
    async fn log_command(
        &self,
        guild_id: &GuildId,
        user_id: &UserId,
        command: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO usage_stats (guild_id, user_id, command, count)
            VALUES ($1, $2, $3, 1)
            ON CONFLICT (guild_id, user_id, command)
            DO UPDATE SET count = usage_stats.count + 1
            "#,
        )
        .bind(guild_id.to_string())
        .bind(user_id.to_string())
        .bind(command)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_user_usage(
        &self,
        guild_id: &GuildId,
        user_id: &UserId,
    ) -> Result<Vec<CommandUsage>, StoreError> {
        let usage = sqlx::query_as::<_, CommandUsage>(
            r#"
            SELECT command, count FROM usage_stats
            WHERE guild_id = $1 AND user_id = $2
            ORDER BY count DESC, command ASC
            "#,
        )
        .bind(guild_id.to_string())
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        Ok(usage)
    }

    async fn get_top_users(
        &self,
        guild_id: &GuildId,
        limit: i64,
    ) -> Result<Vec<UserUsage>, StoreError> {
        let users = sqlx::query_as::<_, UserUsage>(
            r#"
            SELECT user_id, SUM(count)::BIGINT AS total FROM usage_stats
            WHERE guild_id = $1
            GROUP BY user_id
            ORDER BY total DESC
            LIMIT $2
            "#,
        )
        .bind(guild_id.to_string())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(users)
    }

    async fn increment_server_stat(
        &self,
        guild_id: &GuildId,
        stat: ServerStat,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO server_stats (guild_id, stat, value)
            VALUES ($1, $2, 1)
            ON CONFLICT (guild_id, stat)
            DO UPDATE SET value = server_stats.value + 1
            "#,
        )
        .bind(guild_id.to_string())
        .bind(stat.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_server_stats(
        &self,
        guild_id: &GuildId,
    ) -> Result<Vec<(ServerStat, i64)>, StoreError> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            "SELECT stat, value FROM server_stats WHERE guild_id = $1",
        )
        .bind(guild_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        // Unknown counters are skipped, missing ones read as zero.
        let counted: HashMap<ServerStat, i64> = rows
            .into_iter()
            .filter_map(|(stat, value)| stat.parse::<ServerStat>().ok().map(|s| (s, value)))
            .collect();
        Ok(ServerStat::all()
            .into_iter()
            .map(|stat| (stat, counted.get(&stat).copied().unwrap_or(0)))
            .collect())
    }
}
