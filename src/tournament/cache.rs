use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMappedMutexGuard, OwnedMutexGuard};

use super::model::{Event, EventId, Section, SectionId, Team, TeamId};

/// One cached event behind its own lock. `None` means the event is not loaded.
pub type EventSlot = Arc<Mutex<Option<Event>>>;

/// Exclusive access to a loaded event. Dropping it releases the event.
pub type EventGuard = OwnedMappedMutexGuard<Option<Event>, Event>;

/// In-process projection of the store, one slot per event.
///
/// The cache never writes to the store and never rehydrates on its own: it is filled when an
/// event is created or first touched, and emptied when the event is closed or evicted.
#[derive(Debug, Default)]
pub struct EntityCache {
    slots: DashMap<EventId, EventSlot>,
}

impl EntityCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The slot of an event, created empty if the event was never touched.
    pub fn slot(&self, event_id: EventId) -> EventSlot {
        Arc::clone(self.slots.entry(event_id).or_default().value())
    }

    fn existing(&self, event_id: EventId) -> Option<EventSlot> {
        self.slots.get(&event_id).map(|slot| Arc::clone(slot.value()))
    }

    /// Whether `slot` is still the slot the cache hands out for this event.
    pub fn is_current(&self, event_id: EventId, slot: &EventSlot) -> bool {
        self.slots
            .get(&event_id)
            .map(|current| Arc::ptr_eq(current.value(), slot))
            .unwrap_or(false)
    }

    /// Locks the slot of an event, loaded or not.
    pub async fn lock(&self, event_id: EventId) -> OwnedMutexGuard<Option<Event>> {
        self.slot(event_id).lock_owned().await
    }

    /// Narrows a locked slot to its event, if it holds one.
    pub fn loaded(guard: OwnedMutexGuard<Option<Event>>) -> Option<EventGuard> {
        OwnedMutexGuard::try_map(guard, |event| event.as_mut()).ok()
    }

    /// A copy of the cached event, without touching the store.
    pub async fn get(&self, event_id: EventId) -> Option<Event> {
        let slot = self.existing(event_id)?;
        let guard = slot.lock().await;
        guard.clone()
    }

    pub async fn put(&self, event: Event) {
        let slot = self.slot(event.id);
        *slot.lock().await = Some(event);
    }

    /// Drops an event from the cache and returns what was cached.
    pub async fn remove(&self, event_id: EventId) -> Option<Event> {
        let slot = self.existing(event_id)?;
        let removed = slot.lock().await.take();
        self.forget(event_id, &slot);
        removed
    }

    /// Removes the map entry of an emptied slot.
    ///
    /// Tasks already waiting on the slot find it empty and go back to the store.
    pub fn forget(&self, event_id: EventId, slot: &EventSlot) {
        self.slots
            .remove_if(&event_id, |_, current| Arc::ptr_eq(current, slot));
    }

    pub async fn get_section(&self, event_id: EventId, section_id: SectionId) -> Option<Section> {
        self.get(event_id).await?.section(section_id).cloned()
    }

    pub async fn get_team(&self, event_id: EventId, team_id: TeamId) -> Option<Team> {
        self.get(event_id)
            .await?
            .team(team_id)
            .map(|(_, team)| team.clone())
    }

    pub fn cached_ids(&self) -> Vec<EventId> {
        self.slots.iter().map(|entry| *entry.key()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::super::model::fixtures;
    use super::*;

    #[tokio::test]
    async fn put_get_remove() {
        let cache = EntityCache::new();
        assert!(cache.get(1).await.is_none());

        cache.put(fixtures::event()).await;
        assert_eq!(cache.get(1).await.unwrap().name, "Cup");
        assert_eq!(cache.get_section(1, 11).await.unwrap().name, "B");
        assert_eq!(cache.get_team(1, 101).await.unwrap().name, "Blue");
        assert!(cache.get_team(1, 999).await.is_none());

        assert!(cache.remove(1).await.is_some());
        assert!(cache.get(1).await.is_none());
        assert!(cache.cached_ids().is_empty());
    }

    #[tokio::test]
    async fn loaded_guard_mutates_in_place() {
        let cache = EntityCache::new();
        assert!(EntityCache::loaded(cache.lock(1).await).is_none());

        cache.put(fixtures::event()).await;
        {
            let mut event = EntityCache::loaded(cache.lock(1).await).unwrap();
            event.name = "League".to_string();
        }
        assert_eq!(cache.get(1).await.unwrap().name, "League");
    }
}
