use std::sync::Arc;

use poise::serenity_prelude::{ChannelId, GuildId};
use tracing::{debug, info, warn};

use crate::database::models::ChannelSlot;
use crate::database::{ConfigDatabase, LeaderboardDatabase, StatsDatabase, Store};
use crate::log::discord_log;
use crate::platform::{Platform, PlatformError};
use crate::utils::error::CommonError;
use crate::BotError;

use effects::{Applied, SideEffect};
use engine::MembershipEngine;
use error::EngineError;
use model::{normalize_emoji, Event, EventId};
use projector::{render_event, render_leaderboard, render_section, standings, EmbedProjector, Projection};
use registry::{RenderTarget, TrackedMessage};

/// Per-event in-process copy of the store.
pub mod cache;
/// Deferred work requested by membership changes.
pub mod effects;
/// Validation and application of every change to the event graph.
pub mod engine;
pub mod error;
pub mod model;
/// Rendering of join embeds and leaderboards, and reaction reconciliation.
pub mod projector;
pub mod registry;
/// Routing of reactions and team-channel messages back into the engine.
pub mod router;

/// The tournament core, wired once at startup and shared by commands and event handlers.
#[derive(Debug)]
pub struct Tournament<DB, P> {
    engine: MembershipEngine<DB>,
    projector: EmbedProjector,
    platform: P,
    store: Arc<DB>,
}

impl<DB, P> Tournament<DB, P>
where
    DB: Store,
    P: Platform,
{
    pub fn new(store: Arc<DB>, platform: P) -> Self {
        Self {
            engine: MembershipEngine::new(Arc::clone(&store)),
            projector: EmbedProjector::new(),
            platform,
            store,
        }
    }

    pub fn engine(&self) -> &MembershipEngine<DB> {
        &self.engine
    }

    pub fn projector(&self) -> &EmbedProjector {
        &self.projector
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn store(&self) -> &DB {
        &self.store
    }

    /// Runs the side effects of a committed operation and hands back its value.
    ///
    /// The operation already happened, so a failing effect is logged and skipped.
    pub async fn settle<T>(&self, applied: Applied<T>) -> T {
        for effect in applied.effects {
            let kind = format!("{:?}", effect);
            if let Err(e) = self.run(effect).await {
                warn!("Side effect failed: {}\n{}", e, kind);
            }
        }
        applied.value
    }

    async fn run(&self, effect: SideEffect) -> Result<(), BotError> {
        match effect {
            SideEffect::GrantRole {
                guild_id,
                user_id,
                role_id,
            } => self.platform.grant_role(guild_id, user_id, role_id).await?,
            SideEffect::RevokeRole {
                guild_id,
                user_id,
                role_id,
            } => self.platform.revoke_role(guild_id, user_id, role_id).await?,
            SideEffect::Notify { user_id, embed } => self.platform.send_dm(user_id, &embed).await?,
            SideEffect::Log { guild_id, entry } => {
                discord_log(self.store.as_ref(), &self.platform, guild_id, &entry).await?
            }
            SideEffect::Render(event_id) => self.render(event_id).await?,
            SideEffect::Unreact {
                event_id,
                user_id,
                emoji,
            } => {
                let key = normalize_emoji(&emoji);
                for tracked in self.projector.registry().for_event(event_id) {
                    if tracked.emojis.contains_key(&key) {
                        self.platform
                            .remove_user_reaction(tracked.channel_id, tracked.message_id, user_id, &emoji)
                            .await?;
                    }
                }
            }
            SideEffect::Retire { target, name } => {
                for tracked in self.projector.registry().for_target(target) {
                    self.projector.retire(&self.platform, &tracked, &name).await?;
                }
            }
            SideEffect::RetireEvent { event_id, name } => {
                for tracked in self.projector.registry().for_event(event_id) {
                    self.projector.retire(&self.platform, &tracked, &name).await?;
                }
            }
            SideEffect::Publish {
                guild_id,
                target,
                slot,
            } => match self.store.get_channel(&guild_id, slot).await? {
                Some(channel_id) => {
                    self.publish_in(channel_id, target).await?;
                }
                None => info!(
                    "No {} channel set for guild {}, {:?} was not published",
                    slot, guild_id, target
                ),
            },
            SideEffect::Announce {
                guild_id,
                channel_id,
                slot,
                content,
                embed,
            } => {
                let channel_id = match channel_id {
                    Some(channel_id) => Some(channel_id),
                    None => self.store.get_channel(&guild_id, slot).await?,
                };
                match channel_id {
                    Some(channel_id) => {
                        self.platform
                            .send_embed(channel_id, content.as_deref(), &embed)
                            .await?;
                    }
                    None => info!("No {} channel set for guild {}, announcement dropped", slot, guild_id),
                }
            }
            SideEffect::Stat { guild_id, stat } => {
                self.store.increment_server_stat(&guild_id, stat).await?
            }
        }
        Ok(())
    }

    /// The current rendering of a target, or `None` when what it shows is gone.
    pub async fn project(&self, event: &Event, target: RenderTarget) -> Result<Option<Projection>, BotError> {
        let projection = match target {
            RenderTarget::Event(_) => Some(render_event(event)?),
            RenderTarget::Section { section_id, .. } => match event.section(section_id) {
                Some(section) => Some(render_section(event, section)?),
                None => None,
            },
            RenderTarget::Leaderboard(event_id) => {
                let scores = self.store.get_scores(event_id).await?;
                Some(render_leaderboard(event, &standings(event, &scores)))
            }
        };
        Ok(projection)
    }

    /// Re-renders every tracked message of an event from a fresh snapshot.
    ///
    /// A message that fails does not hold back the others. One deleted by hand is posted again.
    async fn render(&self, event_id: EventId) -> Result<(), BotError> {
        let tracked = self.projector.registry().for_event(event_id);
        if tracked.is_empty() {
            return Ok(());
        }
        let event = match self.engine.event(event_id).await {
            Ok(event) => event,
            Err(EngineError::NotFound(_)) => {
                debug!("Event {} is gone, nothing to render", event_id);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        for message in tracked {
            let projection = match self.project(&event, message.target).await {
                Ok(Some(projection)) => projection,
                Ok(None) => continue,
                Err(e) => {
                    warn!("Could not render {:?}: {}", message.target, e);
                    continue;
                }
            };
            match self
                .projector
                .refresh(&self.platform, &message, &projection)
                .await
            {
                Ok(()) => {}
                Err(PlatformError::MessageGone(message_id)) => {
                    info!(
                        "Message {} of {:?} was deleted, posting it again",
                        message_id, message.target
                    );
                    self.projector.registry().forget(message_id);
                    if let Err(e) = self
                        .projector
                        .publish(&self.platform, message.channel_id, message.target, &projection)
                        .await
                    {
                        warn!("Could not post {:?} again: {}", message.target, e);
                    }
                }
                Err(e) => warn!("Could not refresh message {}: {}", message.message_id, e),
            }
        }
        Ok(())
    }

    /// Posts and tracks a new message for a target in a given channel.
    pub async fn publish_in(
        &self,
        channel_id: ChannelId,
        target: RenderTarget,
    ) -> Result<TrackedMessage, BotError> {
        let event = self.engine.event(target.event_id()).await?;
        let projection = self
            .project(&event, target)
            .await?
            .ok_or_else(|| EngineError::not_found("Section", format!("{:?}", target)))?;
        let tracked = self
            .projector
            .publish(&self.platform, channel_id, target, &projection)
            .await?;
        info!(
            "Published {:?} as message {} in channel {}",
            target, tracked.message_id, channel_id
        );
        Ok(tracked)
    }

    /// Posts and tracks a new message for a target in the guild's channel for `slot`.
    pub async fn publish(
        &self,
        guild_id: GuildId,
        target: RenderTarget,
        slot: ChannelSlot,
    ) -> Result<TrackedMessage, BotError> {
        let channel_id = self
            .store
            .get_channel(&guild_id, slot)
            .await?
            .ok_or(CommonError::ChannelNotSet(slot))?;
        self.publish_in(channel_id, target).await
    }

    /// Deletes every tracked message of a target.
    pub async fn withdraw(&self, target: RenderTarget) -> Result<usize, BotError> {
        let tracked = self.projector.registry().for_target(target);
        for message in &tracked {
            self.projector.withdraw(&self.platform, message).await?;
        }
        Ok(tracked.len())
    }
}

#[cfg(test)]
mod tests {
    use poise::serenity_prelude::{RoleId, UserId};

    use super::effects::JoinMethod;
    use super::*;
    use crate::database::memory::MemoryDatabase;
    use crate::database::models::ServerStat;
    use crate::platform::testing::{Call, RecordingPlatform};

    fn guild() -> GuildId {
        GuildId::new(1)
    }

    async fn tournament() -> Tournament<MemoryDatabase, RecordingPlatform> {
        let store = Arc::new(MemoryDatabase::new());
        for (slot, channel) in [
            (ChannelSlot::Join, 500),
            (ChannelSlot::Team, 501),
            (ChannelSlot::Event, 502),
            (ChannelSlot::Log, 503),
        ] {
            store
                .set_channel(&guild(), slot, &ChannelId::new(channel))
                .await
                .unwrap();
        }
        Tournament::new(store, RecordingPlatform::new())
    }

    #[tokio::test]
    async fn creating_an_event_publishes_its_join_embed() {
        let tournament = tournament().await;
        let applied = tournament
            .engine()
            .create_event(guild(), "Cup", 2, Some(RoleId::new(77)), None)
            .await
            .unwrap();
        let event_id = tournament.settle(applied).await;

        let sent = tournament.platform().sent();
        assert_eq!(sent[0].0, ChannelId::new(500));
        assert_eq!(sent[0].2.title, "🎯 Cup");
        assert_eq!(sent[1].0, ChannelId::new(503));
        let tracked = tournament
            .projector()
            .registry()
            .for_target(RenderTarget::Event(event_id));
        assert_eq!(tracked.len(), 1);

        let stats = tournament.store().get_server_stats(&guild()).await.unwrap();
        assert!(stats.contains(&(ServerStat::EventsCreated, 1)));
    }

    #[tokio::test]
    async fn membership_changes_rerender_and_reconcile_reactions() {
        let tournament = tournament().await;
        let engine = tournament.engine();
        let event_id = tournament
            .settle(engine.create_event(guild(), "Cup", 2, None, None).await.unwrap())
            .await;
        let section_id = tournament
            .settle(engine.create_section(event_id, "A", 3).await.unwrap())
            .await;
        let section = tournament
            .publish(
                guild(),
                RenderTarget::Section {
                    event_id,
                    section_id,
                },
                ChannelSlot::Team,
            )
            .await
            .unwrap();
        assert!(tournament.platform().reactions(section.message_id).is_empty());

        let red = tournament
            .settle(
                engine
                    .create_team(section_id, "Red", UserId::new(10), 3, None)
                    .await
                    .unwrap(),
            )
            .await;
        assert_eq!(tournament.platform().reactions(section.message_id), vec!["🦁"]);
        let routed = tournament
            .projector()
            .registry()
            .route(section.message_id, "🦁")
            .unwrap();
        assert_eq!(routed.team_id, Some(red.id));

        tournament
            .settle(engine.delete_team(event_id, red.id).await.unwrap())
            .await;
        assert!(tournament.platform().reactions(section.message_id).is_empty());
        assert!(tournament
            .platform()
            .calls()
            .contains(&Call::RemoveReactionEmoji(section.message_id, "🦁".to_string())));
    }

    #[tokio::test]
    async fn a_deleted_embed_is_reposted_without_holding_back_the_others() {
        let tournament = tournament().await;
        let engine = tournament.engine();
        let event_id = tournament
            .settle(engine.create_event(guild(), "Cup", 2, None, None).await.unwrap())
            .await;
        let section_id = tournament
            .settle(engine.create_section(event_id, "A", 3).await.unwrap())
            .await;
        let section = tournament
            .publish(
                guild(),
                RenderTarget::Section {
                    event_id,
                    section_id,
                },
                ChannelSlot::Team,
            )
            .await
            .unwrap();
        let registry = tournament.projector().registry();
        let old_join = registry.for_target(RenderTarget::Event(event_id))[0].clone();
        tournament.platform().delete_by_hand(old_join.message_id);

        let red = tournament
            .settle(
                engine
                    .create_team(section_id, "Red", UserId::new(10), 3, None)
                    .await
                    .unwrap(),
            )
            .await;

        assert_eq!(tournament.platform().reactions(section.message_id), vec!["🦁"]);
        assert_eq!(
            registry.route(section.message_id, "🦁").unwrap().team_id,
            Some(red.id)
        );
        assert!(registry.lookup(old_join.message_id).is_none());
        let reposted = registry.for_target(RenderTarget::Event(event_id));
        assert_eq!(reposted.len(), 1);
        assert_ne!(reposted[0].message_id, old_join.message_id);
        assert_eq!(reposted[0].channel_id, ChannelId::new(500));
        assert_eq!(tournament.platform().reactions(reposted[0].message_id), vec!["🦁"]);

        let blue = tournament
            .settle(
                engine
                    .create_team(section_id, "Blue", UserId::new(11), 3, None)
                    .await
                    .unwrap(),
            )
            .await;
        assert_eq!(
            registry.route(reposted[0].message_id, &blue.emoji).unwrap().team_id,
            Some(blue.id)
        );
    }

    #[tokio::test]
    async fn deleting_a_section_retires_its_embed() {
        let tournament = tournament().await;
        let engine = tournament.engine();
        let event_id = tournament
            .settle(engine.create_event(guild(), "Cup", 2, None, None).await.unwrap())
            .await;
        let section_id = tournament
            .settle(engine.create_section(event_id, "A", 3).await.unwrap())
            .await;
        tournament
            .settle(
                engine
                    .create_team(section_id, "Red", UserId::new(10), 3, None)
                    .await
                    .unwrap(),
            )
            .await;
        let target = RenderTarget::Section {
            event_id,
            section_id,
        };
        let section = tournament
            .publish(guild(), target, ChannelSlot::Team)
            .await
            .unwrap();
        assert_eq!(tournament.platform().reactions(section.message_id), vec!["🦁"]);

        tournament
            .settle(engine.delete_section(section_id).await.unwrap())
            .await;
        assert!(tournament.platform().reactions(section.message_id).is_empty());
        assert!(tournament.projector().registry().lookup(section.message_id).is_none());
        let remaining = tournament.projector().registry().for_event(event_id);
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].target, RenderTarget::Event(event_id));
    }

    #[tokio::test]
    async fn failing_side_effects_do_not_undo_a_join() {
        let tournament = tournament().await;
        let engine = tournament.engine();
        let event_id = tournament
            .settle(engine.create_event(guild(), "Cup", 1, None, None).await.unwrap())
            .await;
        let section_id = tournament
            .settle(engine.create_section(event_id, "A", 3).await.unwrap())
            .await;
        let red = tournament
            .settle(
                engine
                    .create_team(section_id, "Red", UserId::new(10), 3, None)
                    .await
                    .unwrap(),
            )
            .await;

        tournament.platform().fail_dms(true);
        let joined = engine
            .join_team(UserId::new(1), event_id, red.id, JoinMethod::Command)
            .await
            .unwrap();
        tournament.settle(joined).await;

        assert!(tournament.platform().dms().is_empty());
        assert_eq!(
            tournament.store().member_rows(red.id),
            vec![UserId::new(10), UserId::new(1)]
        );
    }

    #[tokio::test]
    async fn leaderboards_follow_scores_and_clear_on_end() {
        let tournament = tournament().await;
        let engine = tournament.engine();
        let event_id = tournament
            .settle(engine.create_event(guild(), "Cup", 1, None, None).await.unwrap())
            .await;
        let section_id = tournament
            .settle(engine.create_section(event_id, "A", 3).await.unwrap())
            .await;
        let red = tournament
            .settle(
                engine
                    .create_team(section_id, "Red", UserId::new(10), 3, None)
                    .await
                    .unwrap(),
            )
            .await;
        let board = tournament
            .publish(guild(), RenderTarget::Leaderboard(event_id), ChannelSlot::Event)
            .await
            .unwrap();

        tournament
            .settle(engine.set_score(event_id, red.id, 7).await.unwrap())
            .await;
        let last_edit = |platform: &RecordingPlatform| {
            platform
                .calls()
                .into_iter()
                .rev()
                .find_map(|call| match call {
                    Call::Edit(_, message_id, embed) if message_id == board.message_id => Some(embed),
                    _ => None,
                })
        };
        let embed = last_edit(tournament.platform()).unwrap();
        assert_eq!(embed.fields[0].0, "🥇 Red");

        tournament
            .settle(engine.end_event(event_id, None).await.unwrap())
            .await;
        let embed = last_edit(tournament.platform()).unwrap();
        assert!(embed.fields.is_empty());
        assert!(tournament
            .platform()
            .sent()
            .iter()
            .any(|(channel, _, embed)| *channel == ChannelId::new(502)
                && embed.title == "🏆 Event Results - Cup"));
    }

    #[tokio::test]
    async fn publishing_without_a_channel_is_refused() {
        let tournament = Tournament::new(Arc::new(MemoryDatabase::new()), RecordingPlatform::new());
        let event_id = tournament
            .settle(
                tournament
                    .engine()
                    .create_event(guild(), "Cup", 1, None, None)
                    .await
                    .unwrap(),
            )
            .await;
        assert!(tournament.platform().sent().is_empty());
        let err = tournament
            .publish(guild(), RenderTarget::Event(event_id), ChannelSlot::Join)
            .await
            .unwrap_err();
        assert!(err.downcast_ref::<CommonError>().is_some());
    }
}
