use poise::serenity_prelude::{Colour, CreateEmbed, GuildId};
use poise::CreateReply;

use crate::tournament::effects::Applied;
use crate::tournament::model::{Event, EventId};
use crate::utils::error::CommonError;
use crate::{BotContext, BotError, BotTournament};

#[allow(async_fn_in_trait)]
pub trait BotContextExt {
    /// The guild the command runs in.
    fn guild_scope(&self) -> Result<GuildId, CommonError>;

    fn tournament(&self) -> &BotTournament;

    /// A snapshot of an event of this guild. Events of other guilds are reported missing.
    async fn guild_event(&self, event_id: EventId) -> Result<Event, BotError>;

    /// Runs the side effects of a committed operation.
    async fn settle<T>(&self, applied: Applied<T>) -> T;

    async fn reply_embed(&self, embed: CreateEmbed, ephemeral: bool) -> Result<(), BotError>;

    /// A short green confirmation.
    async fn success(&self, title: &str, description: impl Into<String>) -> Result<(), BotError>;
}

impl BotContextExt for BotContext<'_> {
    fn guild_scope(&self) -> Result<GuildId, CommonError> {
        self.guild_id().ok_or(CommonError::NotInAGuild)
    }

    fn tournament(&self) -> &BotTournament {
        &self.data().tournament
    }

    async fn guild_event(&self, event_id: EventId) -> Result<Event, BotError> {
        let guild_id = self.guild_scope()?;
        Ok(self.tournament().engine().event_in(guild_id, event_id).await?)
    }

    async fn settle<T>(&self, applied: Applied<T>) -> T {
        self.data().tournament.settle(applied).await
    }

    async fn reply_embed(&self, embed: CreateEmbed, ephemeral: bool) -> Result<(), BotError> {
        self.send(CreateReply::default().embed(embed).ephemeral(ephemeral))
            .await?;
        Ok(())
    }

    async fn success(&self, title: &str, description: impl Into<String>) -> Result<(), BotError> {
        let embed = CreateEmbed::new()
            .title(format!("✅ {}", title))
            .description(description)
            .colour(Colour::DARK_GREEN);
        self.reply_embed(embed, false).await
    }
}
