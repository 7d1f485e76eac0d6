use poise::serenity_prelude::UserId;
use thiserror::Error;

use super::model::TeamCandidate;
use crate::database::StoreError;

/// Why the membership engine refused an operation.
///
/// Everything but `Store` is a rejection: the request was invalid and nothing was written.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{0} not found.")]
    NotFound(String),
    #[error("A {kind} named '**{name}**' already exists.")]
    DuplicateName { kind: &'static str, name: String },
    #[error("The emoji {emoji} is already used by team '**{team}**'.")]
    EmojiCollision { emoji: String, team: String },
    #[error("{parent} already holds the maximum of {max} {kind}.")]
    CapacityExceeded {
        parent: String,
        kind: &'static str,
        max: i32,
    },
    #[error("Team '**{team}**' is full (Max members: {max})")]
    Full { team: String, max: i32 },
    #[error("You are already a member of team '**{team}**'.")]
    AlreadyMember { team: String },
    #[error("You are already in team '**{team}**' of this event. Leave it before joining another.")]
    AlreadyInEvent { team: String },
    #[error("<@{leader}> is already in team '**{team}**' of this event and cannot lead another.")]
    LeaderInEvent { leader: UserId, team: String },
    #[error("{}", ambiguous_message(.name, .candidates))]
    AmbiguousTarget {
        name: String,
        candidates: Vec<TeamCandidate>,
    },
    #[error("Event '**{0}**' has ended.")]
    EventEnded(String),
    #[error("Cannot declare winners: no scores were recorded for '**{0}**'.")]
    NoScores(String),
    #[error("{0}")]
    Invalid(String),
    #[error("You do not have permission to do that.")]
    PermissionDenied,
    #[error(transparent)]
    Store(#[from] StoreError),
}

fn ambiguous_message(name: &str, candidates: &[TeamCandidate]) -> String {
    let listing = candidates
        .iter()
        .map(|c| {
            format!(
                "- **{}** in section **{}** of event **{}** (ID: {})",
                c.team_name, c.section_name, c.event_name, c.event_id
            )
        })
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Found multiple teams named '**{}**':\n{}\nPlease specify the event or section.",
        name, listing
    )
}

impl EngineError {
    pub fn is_rejection(&self) -> bool {
        !matches!(self, EngineError::Store(_))
    }

    pub(crate) fn not_found(kind: &str, what: impl std::fmt::Display) -> Self {
        EngineError::NotFound(format!("{} '{}'", kind, what))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_busy_leader_is_named_in_the_third_person() {
        let err = EngineError::LeaderInEvent {
            leader: UserId::new(10),
            team: "Red".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "<@10> is already in team '**Red**' of this event and cannot lead another."
        );
        assert!(err.is_rejection());
    }

    #[test]
    fn ambiguous_target_lists_every_candidate() {
        let candidate = |section: &str, section_id| TeamCandidate {
            event_id: 1,
            event_name: "Cup".to_string(),
            section_id,
            section_name: section.to_string(),
            team_id: section_id * 10,
            team_name: "Red".to_string(),
        };
        let err = EngineError::AmbiguousTarget {
            name: "Red".to_string(),
            candidates: vec![candidate("A", 1), candidate("B", 2)],
        };
        let message = err.to_string();
        assert!(message.contains("section **A**"));
        assert!(message.contains("section **B**"));
        assert!(err.is_rejection());
    }

    #[test]
    fn full_states_the_maximum() {
        let err = EngineError::Full {
            team: "Red".to_string(),
            max: 2,
        };
        assert_eq!(err.to_string(), "Team '**Red**' is full (Max members: 2)");
    }

    #[test]
    fn store_failures_are_not_rejections() {
        let err = EngineError::from(StoreError::Unavailable("down".to_string()));
        assert!(!err.is_rejection());
    }
}
