use std::collections::HashMap;

use dashmap::DashMap;
use poise::serenity_prelude::{ChannelId, MessageId};

use super::model::{normalize_emoji, EventId, SectionId, TeamId};

/// What a rendered message displays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderTarget {
    /// The event-wide join embed, listing every team of the event.
    Event(EventId),
    /// A join embed for a single section.
    Section {
        event_id: EventId,
        section_id: SectionId,
    },
    Leaderboard(EventId),
}

impl RenderTarget {
    pub fn event_id(&self) -> EventId {
        match self {
            RenderTarget::Event(event_id) => *event_id,
            RenderTarget::Section { event_id, .. } => *event_id,
            RenderTarget::Leaderboard(event_id) => *event_id,
        }
    }

    /// Whether reactions on this message are membership requests.
    pub fn accepts_reactions(&self) -> bool {
        !matches!(self, RenderTarget::Leaderboard(_))
    }
}

/// A message the bot rendered and keeps up to date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedMessage {
    pub channel_id: ChannelId,
    pub message_id: MessageId,
    pub target: RenderTarget,
    /// Normalized emoji to the team it joins, as of the last render.
    pub emojis: HashMap<String, TeamId>,
}

/// Where an inbound reaction leads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub message: TrackedMessage,
    /// `None` when the emoji belongs to no team on that message.
    pub team_id: Option<TeamId>,
}

/// Rendered message to displayed entity, and back.
///
/// Never persisted. When it is lost the messages are simply re-published.
#[derive(Debug, Default)]
pub struct MessageRegistry {
    by_message: DashMap<MessageId, TrackedMessage>,
    by_target: DashMap<RenderTarget, Vec<MessageId>>,
}

impl MessageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&self, message: TrackedMessage) {
        let message_id = message.message_id;
        let target = message.target;
        self.by_message.insert(message_id, message);
        let mut ids = self.by_target.entry(target).or_default();
        if !ids.contains(&message_id) {
            ids.push(message_id);
        }
    }

    pub fn lookup(&self, message_id: MessageId) -> Option<TrackedMessage> {
        self.by_message.get(&message_id).map(|m| m.value().clone())
    }

    pub fn route(&self, message_id: MessageId, emoji: &str) -> Option<Route> {
        let message = self.lookup(message_id)?;
        let team_id = message.emojis.get(&normalize_emoji(emoji)).copied();
        Some(Route { message, team_id })
    }

    /// Replaces the emoji map of a message after it was re-rendered.
    pub fn set_emojis(&self, message_id: MessageId, emojis: HashMap<String, TeamId>) {
        if let Some(mut message) = self.by_message.get_mut(&message_id) {
            message.emojis = emojis;
        }
    }

    pub fn forget(&self, message_id: MessageId) -> Option<TrackedMessage> {
        let (_, message) = self.by_message.remove(&message_id)?;
        let emptied = match self.by_target.get_mut(&message.target) {
            Some(mut ids) => {
                ids.retain(|id| *id != message_id);
                ids.is_empty()
            }
            None => false,
        };
        if emptied {
            self.by_target.remove_if(&message.target, |_, ids| ids.is_empty());
        }
        Some(message)
    }

    pub fn for_target(&self, target: RenderTarget) -> Vec<TrackedMessage> {
        let ids = self
            .by_target
            .get(&target)
            .map(|ids| ids.value().clone())
            .unwrap_or_default();
        ids.into_iter().filter_map(|id| self.lookup(id)).collect()
    }

    /// Every tracked message showing the event or one of its sections.
    pub fn for_event(&self, event_id: EventId) -> Vec<TrackedMessage> {
        let mut messages: Vec<TrackedMessage> = self
            .by_message
            .iter()
            .filter(|m| m.target.event_id() == event_id)
            .map(|m| m.value().clone())
            .collect();
        messages.sort_by_key(|m| m.message_id);
        messages
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.by_message.len()
    }
}
