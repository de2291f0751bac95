//! Event page collections: participants, comments and contributions.

use super::Reconcile;
use crate::entities::{Comment, Contribution, EventParticipant};

impl Reconcile for EventParticipant {
    fn merge(mut self, existing: &Self) -> Self {
        if self.profile.is_none() {
            self.profile = existing.profile.clone();
        }
        self
    }
}

impl Reconcile for Comment {
    fn merge(mut self, existing: &Self) -> Self {
        if self.author.is_none() {
            self.author = existing.author.clone();
        }
        self
    }
}

impl Reconcile for Contribution {}
