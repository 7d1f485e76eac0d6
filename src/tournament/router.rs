use poise::serenity_prelude::{ChannelId, GuildId, MessageId, UserId};
use tracing::{debug, error, info, warn};

use super::effects::JoinMethod;
use super::error::EngineError;
use super::model::{JoinScope, TeamId};
use super::projector::render_team;
use super::Tournament;
use crate::database::models::ChannelSlot;
use crate::database::{ConfigDatabase, Store};
use crate::platform::Platform;
use crate::BotError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactionKind {
    Add,
    Remove,
}

/// A reaction added to or removed from a message, as delivered by the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactionEvent {
    pub kind: ReactionKind,
    pub guild_id: Option<GuildId>,
    pub channel_id: ChannelId,
    pub message_id: MessageId,
    pub user_id: UserId,
    pub emoji: String,
    pub is_bot: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReactionOutcome {
    /// Not a membership request: an untracked message, a bot, or a leaderboard.
    Ignored,
    Joined(TeamId),
    Left(TeamId),
    /// The reaction re-stated a membership the user already holds and was left alone.
    Kept,
    /// The request was refused and the user's reaction removed.
    Undone,
}

impl<DB, P> Tournament<DB, P>
where
    DB: Store,
    P: Platform,
{
    /// Turns a reaction on a tracked join embed into a join or a leave.
    ///
    /// A refused join is answered by removing the user's reaction.
    pub async fn on_reaction(
        &self,
        reaction: &ReactionEvent,
        bot_id: UserId,
    ) -> Result<ReactionOutcome, BotError> {
        if reaction.is_bot || reaction.user_id == bot_id {
            return Ok(ReactionOutcome::Ignored);
        }
        let Some(route) = self
            .projector()
            .registry()
            .route(reaction.message_id, &reaction.emoji)
        else {
            return Ok(ReactionOutcome::Ignored);
        };
        if !route.message.target.accepts_reactions() {
            return Ok(ReactionOutcome::Ignored);
        }
        let event_id = route.message.target.event_id();

        match (reaction.kind, route.team_id) {
            (ReactionKind::Remove, None) => Ok(ReactionOutcome::Ignored),
            (ReactionKind::Remove, Some(team_id)) => {
                match self
                    .engine()
                    .leave(reaction.user_id, event_id, team_id, JoinMethod::Reaction)
                    .await
                {
                    Ok(applied) => match self.settle(applied).await {
                        Some(_) => Ok(ReactionOutcome::Left(team_id)),
                        None => Ok(ReactionOutcome::Ignored),
                    },
                    Err(e) if e.is_rejection() => {
                        debug!("Leave by reaction refused for {}: {}", reaction.user_id, e);
                        Ok(ReactionOutcome::Ignored)
                    }
                    Err(e) => Err(e.into()),
                }
            }
            (ReactionKind::Add, None) => {
                debug!(
                    "Emoji {} matches no team on message {}",
                    reaction.emoji, reaction.message_id
                );
                self.undo(reaction).await;
                Ok(ReactionOutcome::Undone)
            }
            (ReactionKind::Add, Some(team_id)) => {
                match self
                    .engine()
                    .join_team(reaction.user_id, event_id, team_id, JoinMethod::Reaction)
                    .await
                {
                    Ok(applied) => {
                        self.settle(applied).await;
                        Ok(ReactionOutcome::Joined(team_id))
                    }
                    Err(EngineError::AlreadyMember { .. }) => Ok(ReactionOutcome::Kept),
                    Err(e) => {
                        if e.is_rejection() {
                            debug!("Join by reaction refused for {}: {}", reaction.user_id, e);
                        } else {
                            error!("Join by reaction failed for {}: {}", reaction.user_id, e);
                        }
                        self.undo(reaction).await;
                        Ok(ReactionOutcome::Undone)
                    }
                }
            }
        }
    }

    async fn undo(&self, reaction: &ReactionEvent) {
        if let Err(e) = self
            .platform()
            .remove_user_reaction(
                reaction.channel_id,
                reaction.message_id,
                reaction.user_id,
                &reaction.emoji,
            )
            .await
        {
            warn!(
                "Could not remove the reaction of {} on message {}: {}",
                reaction.user_id, reaction.message_id, e
            );
        }
    }

    /// Answers a team name posted in the team channel with the team's details by DM.
    ///
    /// Returns whether the message was consumed. Only a name matching exactly one team of an
    /// open event is consumed, and the message is then deleted.
    pub async fn on_team_message(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        message_id: MessageId,
        author_id: UserId,
        content: &str,
    ) -> Result<bool, BotError> {
        let name = content.trim();
        if name.is_empty() {
            return Ok(false);
        }
        if self.store().get_channel(&guild_id, ChannelSlot::Team).await? != Some(channel_id) {
            return Ok(false);
        }
        let candidates = self
            .engine()
            .candidates(name, JoinScope::Guild(guild_id))
            .await?;
        let [candidate] = candidates.as_slice() else {
            debug!("'{}' names {} teams, message left alone", name, candidates.len());
            return Ok(false);
        };

        let event = self.engine().event(candidate.event_id).await?;
        let Some((section, team)) = event.team(candidate.team_id) else {
            return Ok(false);
        };
        let embed = render_team(&event, section, team);
        if let Err(e) = self.platform().send_dm(author_id, &embed).await {
            warn!("Could not send team details to {}: {}", author_id, e);
        }
        self.platform().delete_message(channel_id, message_id).await?;
        info!("Sent details of team {} to {}", candidate.team_name, author_id);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use poise::serenity_prelude::RoleId;

    use super::super::model::EventId;
    use super::super::registry::{RenderTarget, TrackedMessage};
    use super::*;
    use crate::database::memory::MemoryDatabase;
    use crate::platform::testing::{Call, RecordingPlatform};

    const BOT: u64 = 999;

    fn guild() -> GuildId {
        GuildId::new(1)
    }

    struct Setup {
        tournament: Tournament<MemoryDatabase, RecordingPlatform>,
        event_id: EventId,
        red: TeamId,
        blue: TeamId,
        join: TrackedMessage,
    }

    /// "Cup" with section A holding Red (🦁, max 2) and Blue (🐯, max 3), and a published
    /// event-wide join embed.
    async fn setup() -> Setup {
        let store = Arc::new(MemoryDatabase::new());
        store
            .set_channel(&guild(), ChannelSlot::Join, &ChannelId::new(500))
            .await
            .unwrap();
        store
            .set_channel(&guild(), ChannelSlot::Team, &ChannelId::new(501))
            .await
            .unwrap();
        let tournament = Tournament::new(store, RecordingPlatform::new());
        let engine = tournament.engine();
        let event_id = tournament
            .settle(
                engine
                    .create_event(guild(), "Cup", 1, Some(RoleId::new(77)), None)
                    .await
                    .unwrap(),
            )
            .await;
        let section_id = tournament
            .settle(engine.create_section(event_id, "A", 2).await.unwrap())
            .await;
        let red = tournament
            .settle(
                engine
                    .create_team(section_id, "Red", UserId::new(10), 2, None)
                    .await
                    .unwrap(),
            )
            .await
            .id;
        let blue = tournament
            .settle(
                engine
                    .create_team(section_id, "Blue", UserId::new(11), 3, None)
                    .await
                    .unwrap(),
            )
            .await
            .id;
        let join = tournament
            .projector()
            .registry()
            .for_target(RenderTarget::Event(event_id))
            .remove(0);
        Setup {
            tournament,
            event_id,
            red,
            blue,
            join,
        }
    }

    fn reaction(kind: ReactionKind, message: &TrackedMessage, user: u64, emoji: &str) -> ReactionEvent {
        ReactionEvent {
            kind,
            guild_id: Some(guild()),
            channel_id: message.channel_id,
            message_id: message.message_id,
            user_id: UserId::new(user),
            emoji: emoji.to_string(),
            is_bot: false,
        }
    }

    fn removed_reactions(platform: &RecordingPlatform) -> Vec<(UserId, String)> {
        platform
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::RemoveUserReaction(_, user, emoji) => Some((user, emoji)),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn reacting_joins_and_unreacting_leaves() {
        let s = setup().await;
        assert_eq!(s.tournament.platform().reactions(s.join.message_id), vec!["🦁", "🐯"]);

        let joined = s
            .tournament
            .on_reaction(&reaction(ReactionKind::Add, &s.join, 1, "🦁"), UserId::new(BOT))
            .await
            .unwrap();
        assert_eq!(joined, ReactionOutcome::Joined(s.red));
        assert!(s
            .tournament
            .platform()
            .grants()
            .contains(&(UserId::new(1), RoleId::new(77))));

        let left = s
            .tournament
            .on_reaction(&reaction(ReactionKind::Remove, &s.join, 1, "🦁"), UserId::new(BOT))
            .await
            .unwrap();
        assert_eq!(left, ReactionOutcome::Left(s.red));
        assert!(s
            .tournament
            .platform()
            .revokes()
            .contains(&(UserId::new(1), RoleId::new(77))));
        let event = s.tournament.engine().event(s.event_id).await.unwrap();
        assert_eq!(event.team(s.red).unwrap().1.members, vec![UserId::new(10)]);
    }

    #[tokio::test]
    async fn refused_joins_remove_the_reaction() {
        let s = setup().await;
        let bot = UserId::new(BOT);
        s.tournament
            .on_reaction(&reaction(ReactionKind::Add, &s.join, 1, "🦁"), bot)
            .await
            .unwrap();

        let full = s
            .tournament
            .on_reaction(&reaction(ReactionKind::Add, &s.join, 2, "🦁"), bot)
            .await
            .unwrap();
        assert_eq!(full, ReactionOutcome::Undone);

        let elsewhere = s
            .tournament
            .on_reaction(&reaction(ReactionKind::Add, &s.join, 1, "🐯"), bot)
            .await
            .unwrap();
        assert_eq!(elsewhere, ReactionOutcome::Undone);

        let stray = s
            .tournament
            .on_reaction(&reaction(ReactionKind::Add, &s.join, 3, "🍕"), bot)
            .await
            .unwrap();
        assert_eq!(stray, ReactionOutcome::Undone);

        assert_eq!(
            removed_reactions(s.tournament.platform()),
            vec![
                (UserId::new(2), "🦁".to_string()),
                (UserId::new(1), "🐯".to_string()),
                (UserId::new(3), "🍕".to_string()),
            ]
        );
        let event = s.tournament.engine().event(s.event_id).await.unwrap();
        assert_eq!(event.team(s.red).unwrap().1.members.len(), 2);
        assert_eq!(event.team(s.blue).unwrap().1.members, vec![UserId::new(11)]);
    }

    #[tokio::test]
    async fn repeated_reactions_keep_the_membership() {
        let s = setup().await;
        let bot = UserId::new(BOT);
        let add = reaction(ReactionKind::Add, &s.join, 1, "🦁");
        s.tournament.on_reaction(&add, bot).await.unwrap();
        let again = s.tournament.on_reaction(&add, bot).await.unwrap();
        assert_eq!(again, ReactionOutcome::Kept);
        assert!(removed_reactions(s.tournament.platform()).is_empty());
    }

    #[tokio::test]
    async fn noise_is_ignored() {
        let s = setup().await;
        let bot = UserId::new(BOT);

        let mut by_bot = reaction(ReactionKind::Add, &s.join, BOT, "🦁");
        assert_eq!(s.tournament.on_reaction(&by_bot, bot).await.unwrap(), ReactionOutcome::Ignored);
        by_bot.user_id = UserId::new(5);
        by_bot.is_bot = true;
        assert_eq!(s.tournament.on_reaction(&by_bot, bot).await.unwrap(), ReactionOutcome::Ignored);

        let mut untracked = reaction(ReactionKind::Add, &s.join, 1, "🦁");
        untracked.message_id = MessageId::new(424242);
        assert_eq!(
            s.tournament.on_reaction(&untracked, bot).await.unwrap(),
            ReactionOutcome::Ignored
        );

        let never_joined = reaction(ReactionKind::Remove, &s.join, 1, "🐯");
        assert_eq!(
            s.tournament.on_reaction(&never_joined, bot).await.unwrap(),
            ReactionOutcome::Ignored
        );
        assert!(removed_reactions(s.tournament.platform()).is_empty());
    }

    #[tokio::test]
    async fn ended_events_refuse_reaction_joins() {
        let s = setup().await;
        let engine = s.tournament.engine();
        s.tournament
            .settle(engine.set_score(s.event_id, s.red, 3).await.unwrap())
            .await;
        s.tournament
            .settle(engine.end_event(s.event_id, None).await.unwrap())
            .await;

        let outcome = s
            .tournament
            .on_reaction(&reaction(ReactionKind::Add, &s.join, 1, "🐯"), UserId::new(BOT))
            .await
            .unwrap();
        assert_eq!(outcome, ReactionOutcome::Undone);
    }

    #[tokio::test]
    async fn team_names_in_the_team_channel_are_answered_by_dm() {
        let s = setup().await;
        let author = UserId::new(4);

        let consumed = s
            .tournament
            .on_team_message(guild(), ChannelId::new(501), MessageId::new(700), author, " blue ")
            .await
            .unwrap();
        assert!(consumed);
        let dms = s.tournament.platform().dms();
        assert_eq!(dms.len(), 1);
        assert_eq!(dms[0].0, author);
        assert_eq!(dms[0].1.title, "🐯 Team: Blue");
        assert!(s
            .tournament
            .platform()
            .calls()
            .contains(&Call::Delete(ChannelId::new(501), MessageId::new(700))));

        let elsewhere = s
            .tournament
            .on_team_message(guild(), ChannelId::new(502), MessageId::new(701), author, "Blue")
            .await
            .unwrap();
        assert!(!elsewhere);
        let unknown = s
            .tournament
            .on_team_message(guild(), ChannelId::new(501), MessageId::new(702), author, "Green")
            .await
            .unwrap();
        assert!(!unknown);
    }
}
