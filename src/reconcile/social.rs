//! Friendships and pending event requests.

use super::Reconcile;
use crate::entities::{Friendship, FriendshipStatus, PendingRequest};
use crate::store::StoreState;
use crate::types::CounterKey;

impl Reconcile for Friendship {
    /// Incoming requests still awaiting the viewer's answer.
    fn counter_key(&self, state: &StoreState) -> Option<CounterKey> {
        let viewer = state.viewer()?;
        (self.status == FriendshipStatus::Pending && &self.addressee_id == viewer)
            .then_some(CounterKey::IncomingFriendRequests)
    }
}

impl Reconcile for PendingRequest {
    fn counter_key(&self, state: &StoreState) -> Option<CounterKey> {
        let viewer = state.viewer()?;
        (&self.recipient_id == viewer && &self.requester_id != viewer)
            .then_some(CounterKey::PendingRequests)
    }
}
