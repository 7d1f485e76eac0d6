use anyhow::anyhow;
use poise::serenity_prelude::{Colour, GuildId};
use tracing::{debug, error, info};

use crate::{
    database::{models::ChannelSlot, ConfigDatabase},
    platform::Platform,
    tournament::projector::RenderedEmbed,
    BotContext, BotError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Info,
    Failure,
}

/// An entry of a guild's audit trail, posted to its log channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub state: State,
    pub title: String,
    pub fields: Vec<(String, String)>,
    /// Unix timestamp of when the logged action happened.
    pub at: i64,
}

impl LogEntry {
    pub fn info(title: impl Into<String>) -> Self {
        Self::new(State::Info, title)
    }

    pub fn failure(title: impl Into<String>) -> Self {
        Self::new(State::Failure, title)
    }

    fn new(state: State, title: impl Into<String>) -> Self {
        Self {
            state,
            title: title.into(),
            fields: vec![],
            at: chrono::offset::Utc::now().timestamp(),
        }
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }

    /// The message content posted alongside the embed.
    pub fn content(&self) -> Option<&'static str> {
        match self.state {
            State::Info => None,
            State::Failure => Some("⚠️ An error occured in a command!"),
        }
    }

    pub fn render(&self) -> RenderedEmbed {
        let (title, colour, stamp) = match self.state {
            State::Info => (format!("ℹ️ {}", self.title), Colour::BLURPLE, "Happened at"),
            State::Failure => (self.title.clone(), Colour::RED, "Seen at"),
        };
        let mut embed = RenderedEmbed::new(title, colour);
        if self.state == State::Failure {
            embed = embed.description("Please check the logs for more information.");
        }
        for (name, value) in &self.fields {
            embed = embed.field(name.clone(), value.clone(), false);
        }
        embed.field(stamp, format!("<t:{}:F>", self.at), false)
    }
}

/// Posts an entry in the guild's designated log channel.
///
/// Guilds without a log channel are skipped silently.
pub async fn discord_log<DB, P>(
    database: &DB,
    platform: &P,
    guild_id: GuildId,
    entry: &LogEntry,
) -> Result<(), BotError>
where
    DB: ConfigDatabase,
    P: Platform,
{
    let Some(log_channel) = database.get_channel(&guild_id, ChannelSlot::Log).await? else {
        debug!("No log channel for guild {}, dropping log {}", guild_id, entry.title);
        return Ok(());
    };

    info!("ℹ️ {}\n\n{:#?}", entry.title, entry.fields);

    platform
        .send_embed(log_channel, entry.content(), &entry.render())
        .await?;

    Ok(())
}

/// Creates an error log message in the current guild's designated log channel.
pub async fn discord_log_error(
    ctx: BotContext<'_>,
    title: &str,
    fields: Vec<(&str, &str)>,
) -> Result<(), BotError> {
    let guild_id = ctx.guild_id().ok_or(anyhow!(
        "Error sending error log: Attempted to perform an error log outside of a guild"
    ))?;

    let entry = fields
        .into_iter()
        .fold(LogEntry::failure(title), |entry, (name, value)| {
            entry.field(name, value)
        });

    error!("{}: {:?}", entry.title, entry.fields);

    let data = ctx.data();
    discord_log(data.database.as_ref(), data.tournament.platform(), guild_id, &entry).await
}
