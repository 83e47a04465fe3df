use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Model,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TranscriptEntry {
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Reassembles streaming transcription fragments into turns. Turn boundaries
/// come from the caller; there is no silence detection here.
#[derive(Debug, Default, Clone)]
pub struct TranscriptAggregator {
    user: String,
    model: String,
}

impl TranscriptAggregator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append_user(&mut self, fragment: &str) {
        self.user.push_str(fragment);
    }

    pub fn append_model(&mut self, fragment: &str) {
        self.model.push_str(fragment);
    }

    pub fn append(&mut self, role: Role, fragment: &str) {
        match role {
            Role::User => self.append_user(fragment),
            Role::Model => self.append_model(fragment),
        }
    }

    /// Text accumulated so far in the current turn.
    #[must_use]
    pub fn pending(&self, role: Role) -> &str {
        match role {
            Role::User => &self.user,
            Role::Model => &self.model,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.user.is_empty() && self.model.is_empty()
    }

    /// Close the turn: one entry per non-empty buffer, user before model.
    pub fn flush_turn(&mut self, now: DateTime<Utc>) -> Vec<TranscriptEntry> {
        let mut entries = Vec::with_capacity(2);
        for (role, buffer) in [(Role::User, &mut self.user), (Role::Model, &mut self.model)] {
            if !buffer.is_empty() {
                entries.push(TranscriptEntry {
                    role,
                    text: std::mem::take(buffer),
                    timestamp: now,
                });
            }
        }
        entries
    }

    pub fn reset(&mut self) {
        self.user.clear();
        self.model.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flush_of_empty_buffers_is_a_no_op() {
        let mut agg = TranscriptAggregator::new();
        assert!(agg.flush_turn(Utc::now()).is_empty());
    }

    #[test]
    fn flush_emits_only_non_empty_channels() {
        let mut agg = TranscriptAggregator::new();
        agg.append_user("hi");
        agg.append_model("");
        let entries = agg.flush_turn(Utc::now());
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].role, Role::User);
        assert_eq!(entries[0].text, "hi");
    }

    #[test]
    fn fragments_concatenate_in_arrival_order() {
        let mut agg = TranscriptAggregator::new();
        agg.append_user("fil");
        agg.append_user("ler");
        let now = Utc::now();
        let entries = agg.flush_turn(now);
        assert_eq!(
            entries,
            vec![TranscriptEntry { role: Role::User, text: "filler".into(), timestamp: now }]
        );
    }

    #[test]
    fn user_is_flushed_before_model_and_buffers_reset() {
        let mut agg = TranscriptAggregator::new();
        agg.append_model("Great ");
        agg.append_user("How was that?");
        agg.append_model("pacing.");
        assert_eq!(agg.pending(Role::Model), "Great pacing.");

        let entries = agg.flush_turn(Utc::now());
        let roles: Vec<Role> = entries.iter().map(|e| e.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Model]);
        assert_eq!(entries[1].text, "Great pacing.");
        assert!(agg.is_empty());
        assert!(agg.flush_turn(Utc::now()).is_empty());
    }

    #[test]
    fn fragments_are_not_deduplicated() {
        let mut agg = TranscriptAggregator::new();
        agg.append(Role::Model, "so ");
        agg.append(Role::Model, "so ");
        assert_eq!(agg.pending(Role::Model), "so so ");
    }
}
