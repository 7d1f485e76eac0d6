use std::sync::Arc;

use poise::serenity_prelude::{
    self as serenity, ChannelId, CreateMessage, EditMessage, GuildId, Http, MessageId,
    ReactionType, RoleId, UserId,
};
use thiserror::Error;

use crate::tournament::projector::RenderedEmbed;

/// A call to Discord that failed.
///
/// These never undo a tournament change: the store already holds it. They are logged and dropped.
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("discord error: {0}")]
    Serenity(#[from] serenity::Error),
    #[error("invalid emoji '{0}'")]
    InvalidEmoji(String),
    /// The message was deleted outside the bot.
    #[error("message {0} no longer exists")]
    MessageGone(MessageId),
}

/// Discord's JSON error code for Unknown Message.
const UNKNOWN_MESSAGE: isize = 10008;

/// Maps Unknown Message responses on `message_id` to [`PlatformError::MessageGone`].
fn message_error(message_id: MessageId) -> impl FnOnce(serenity::Error) -> PlatformError {
    move |err| match &err {
        serenity::Error::Http(serenity::HttpError::UnsuccessfulRequest(response))
            if response.status_code.as_u16() == 404 || response.error.code == UNKNOWN_MESSAGE =>
        {
            PlatformError::MessageGone(message_id)
        }
        _ => PlatformError::Serenity(err),
    }
}

/// The Discord operations the tournament core needs.
///
/// Kept narrow so the core can be driven without a gateway connection.
#[allow(async_fn_in_trait)]
pub trait Platform {
    async fn send_embed(
        &self,
        channel_id: ChannelId,
        content: Option<&str>,
        embed: &RenderedEmbed,
    ) -> Result<MessageId, PlatformError>;

    async fn edit_embed(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
        embed: &RenderedEmbed,
    ) -> Result<(), PlatformError>;

    async fn delete_message(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
    ) -> Result<(), PlatformError>;

    /// The emojis the bot itself has reacted with on a message.
    async fn current_reactions(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
    ) -> Result<Vec<String>, PlatformError>;

    async fn add_reaction(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
        emoji: &str,
    ) -> Result<(), PlatformError>;

    /// Removes every reaction of one emoji, whoever placed it.
    async fn remove_reaction_emoji(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
        emoji: &str,
    ) -> Result<(), PlatformError>;

    async fn clear_reactions(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
    ) -> Result<(), PlatformError>;

    async fn remove_user_reaction(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
        user_id: UserId,
        emoji: &str,
    ) -> Result<(), PlatformError>;

    async fn grant_role(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        role_id: RoleId,
    ) -> Result<(), PlatformError>;

    async fn revoke_role(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        role_id: RoleId,
    ) -> Result<(), PlatformError>;

    async fn send_dm(&self, user_id: UserId, embed: &RenderedEmbed) -> Result<(), PlatformError>;
}

fn reaction(emoji: &str) -> Result<ReactionType, PlatformError> {
    ReactionType::try_from(emoji.to_string())
        .map_err(|_| PlatformError::InvalidEmoji(emoji.to_string()))
}

/// The platform backed by the bot's HTTP client.
#[derive(Debug, Clone)]
pub struct SerenityPlatform {
    http: Arc<Http>,
}

impl SerenityPlatform {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

impl Platform for SerenityPlatform {
    async fn send_embed(
        &self,
        channel_id: ChannelId,
        content: Option<&str>,
        embed: &RenderedEmbed,
    ) -> Result<MessageId, PlatformError> {
        let message = channel_id
            .send_message(
                self.http.as_ref(),
                CreateMessage::default()
                    .content(content.unwrap_or_default())
                    .embed(embed.to_embed()),
            )
            .await?;
        Ok(message.id)
    }

    async fn edit_embed(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
        embed: &RenderedEmbed,
    ) -> Result<(), PlatformError> {
        channel_id
            .edit_message(
                self.http.as_ref(),
                message_id,
                EditMessage::new().embed(embed.to_embed()),
            )
            .await
            .map_err(message_error(message_id))?;
        Ok(())
    }

    async fn delete_message(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
    ) -> Result<(), PlatformError> {
        channel_id.delete_message(self.http.as_ref(), message_id).await?;
        Ok(())
    }

    async fn current_reactions(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
    ) -> Result<Vec<String>, PlatformError> {
        let message = channel_id.message(self.http.as_ref(), message_id).await?;
        Ok(message
            .reactions
            .iter()
            .filter(|r| r.me)
            .map(|r| r.reaction_type.to_string())
            .collect())
    }

    async fn add_reaction(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
        emoji: &str,
    ) -> Result<(), PlatformError> {
        channel_id
            .create_reaction(self.http.as_ref(), message_id, reaction(emoji)?)
            .await?;
        Ok(())
    }

    async fn remove_reaction_emoji(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
        emoji: &str,
    ) -> Result<(), PlatformError> {
        channel_id
            .delete_reaction_emoji(self.http.as_ref(), message_id, reaction(emoji)?)
            .await?;
        Ok(())
    }

    async fn clear_reactions(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
    ) -> Result<(), PlatformError> {
        channel_id.delete_reactions(self.http.as_ref(), message_id).await?;
        Ok(())
    }

    async fn remove_user_reaction(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
        user_id: UserId,
        emoji: &str,
    ) -> Result<(), PlatformError> {
        channel_id
            .delete_reaction(self.http.as_ref(), message_id, Some(user_id), reaction(emoji)?)
            .await?;
        Ok(())
    }

    async fn grant_role(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        role_id: RoleId,
    ) -> Result<(), PlatformError> {
        self.http
            .add_member_role(guild_id, user_id, role_id, Some("Joined a tournament team"))
            .await?;
        Ok(())
    }

    async fn revoke_role(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        role_id: RoleId,
    ) -> Result<(), PlatformError> {
        self.http
            .remove_member_role(guild_id, user_id, role_id, Some("Left every tournament team"))
            .await?;
        Ok(())
    }

    async fn send_dm(&self, user_id: UserId, embed: &RenderedEmbed) -> Result<(), PlatformError> {
        let channel = user_id.create_dm_channel(self.http.as_ref()).await?;
        channel
            .id
            .send_message(self.http.as_ref(), CreateMessage::default().embed(embed.to_embed()))
            .await?;
        Ok(())
    }
}
