use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, info};

use kindred_gateway::Identity;
use kindred_types::models::{Channel, Interest, InterestStatus, UserId, UserPair};

use crate::interest::{InterestState, Resolution};

/// Client-side cache shared by resolvers, push handlers and the UI.
///
/// Cloning is cheap; all clones see the same state. Records are replaced
/// whole, keyed by `(from, to)` for interests and by [`UserPair`] for
/// channels. Pair resolutions are keyed by the other user and guarded by a
/// monotonically increasing token so that a slow resolution never
/// overwrites a newer one.
#[derive(Clone, Default)]
pub struct AppState {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    current_user: RwLock<Option<UserId>>,
    interests: RwLock<HashMap<(UserId, UserId), Interest>>,
    channels: RwLock<HashMap<UserPair, Channel>>,
    pairs: RwLock<HashMap<UserId, PairEntry>>,
    tokens: AtomicU64,
}

struct PairEntry {
    token: u64,
    resolution: Resolution,
}

impl AppState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signed_in(user_id: UserId) -> Self {
        let state = Self::new();
        state.set_current_user(Some(user_id));
        state
    }

    // -- Identity --

    pub fn current_user(&self) -> Option<UserId> {
        *self.inner.current_user.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Switching users drops everything cached for the previous one.
    pub fn set_current_user(&self, user_id: Option<UserId>) {
        // Lock order is pairs, then current_user, then records; commit_pair
        // follows it, so no commit lands between the switch and the clear.
        let mut pairs = self.inner.pairs.write().unwrap_or_else(PoisonError::into_inner);
        let mut current = self.inner.current_user.write().unwrap_or_else(PoisonError::into_inner);
        if *current == user_id {
            return;
        }
        *current = user_id;
        drop(current);

        self.inner.interests.write().unwrap_or_else(PoisonError::into_inner).clear();
        self.inner.channels.write().unwrap_or_else(PoisonError::into_inner).clear();
        pairs.clear();
        drop(pairs);

        match user_id {
            Some(id) => info!("Signed in as user {}", id),
            None => info!("Signed out"),
        }
    }

    // -- Pair resolutions --

    /// Take a token before the first fetch of a resolution.
    pub fn issue_token(&self) -> u64 {
        self.inner.tokens.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Store `resolution` for the pair `{current, other}` unless a resolution
    /// with a newer token is already stored or the signed-in user changed.
    ///
    /// On success the interest records the resolution was built from replace
    /// the cached ones; a direction that resolved to no record is forgotten.
    pub fn commit_pair(&self, current: UserId, other: UserId, token: u64, resolution: Resolution) -> bool {
        let mut pairs = self.inner.pairs.write().unwrap_or_else(PoisonError::into_inner);
        if self.current_user() != Some(current) {
            debug!("Dropping resolution for user {}: no longer signed in", current);
            return false;
        }
        if pairs.get(&other).is_some_and(|entry| entry.token >= token) {
            debug!("Dropping stale resolution {} for pair with {}", token, other);
            return false;
        }

        {
            let mut interests = self.inner.interests.write().unwrap_or_else(PoisonError::into_inner);
            sync_record(&mut interests, (current, other), resolution.sent.as_ref());
            sync_record(&mut interests, (other, current), resolution.incoming.as_ref());
        }

        debug!("Pair with {} resolved to {:?}", other, resolution.state);
        pairs.insert(other, PairEntry { token, resolution });
        true
    }

    /// Re-derive the pair with `other` from cached records under a fresh token.
    ///
    /// Only a pair that has been resolved before is re-derived: its records
    /// were fetched in both directions. Any other pair may be missing one
    /// direction from the cache and is left for the next fetch.
    pub fn rederive_pair(&self, other: UserId) -> Option<Resolution> {
        let current = self.current_user()?;
        if self.resolution(other).is_none() {
            debug!("Pair with {} not resolved yet, waiting for a fetch", other);
            return None;
        }
        let token = self.issue_token();
        let resolution = Resolution::new(self.interest(current, other), self.interest(other, current));
        self.commit_pair(current, other, token, resolution.clone())
            .then_some(resolution)
    }

    pub fn resolution(&self, other: UserId) -> Option<Resolution> {
        self.inner
            .pairs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&other)
            .map(|entry| entry.resolution.clone())
    }

    /// `InterestState::None` until the pair has been resolved.
    pub fn interest_state(&self, other: UserId) -> InterestState {
        self.resolution(other).map(|r| r.state).unwrap_or_default()
    }

    // -- Records --

    pub fn interest(&self, from: UserId, to: UserId) -> Option<Interest> {
        self.inner
            .interests
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(from, to))
            .cloned()
    }

    pub fn apply_interest(&self, interest: Interest) {
        self.inner
            .interests
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(interest.key(), interest);
    }

    /// Record an interest the current user just sent.
    pub fn add_sent_interest(&self, interest: Interest) {
        debug!("Added sent interest {} -> {}", interest.from_user_id, interest.to_user_id);
        self.apply_interest(interest);
    }

    pub fn add_channel(&self, channel: Channel) {
        debug!("Added channel {} for {}", channel.id, channel.pair());
        self.inner
            .channels
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(channel.pair(), channel);
    }

    pub fn channel(&self, pair: UserPair) -> Option<Channel> {
        self.inner
            .channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&pair)
            .cloned()
    }

    // -- Listings --

    /// Pending interests addressed to the current user, newest first.
    pub fn incoming_interests(&self) -> Vec<Interest> {
        self.interests_where(|current, i| i.to_user_id == current && i.status == InterestStatus::Pending)
    }

    /// Interests the current user sent that were accepted, newest first.
    pub fn accepted_interests(&self) -> Vec<Interest> {
        self.interests_where(|current, i| i.from_user_id == current && i.status == InterestStatus::Accepted)
    }

    /// Channels of the current user, most recent activity first.
    pub fn channels(&self) -> Vec<Channel> {
        let Some(current) = self.current_user() else {
            return Vec::new();
        };
        let mut channels: Vec<Channel> = self
            .inner
            .channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|c| c.pair().contains(current))
            .cloned()
            .collect();
        channels.sort_by(|a, b| b.last_activity().cmp(&a.last_activity()).then(b.id.cmp(&a.id)));
        channels
    }

    fn interests_where(&self, keep: impl Fn(UserId, &Interest) -> bool) -> Vec<Interest> {
        let Some(current) = self.current_user() else {
            return Vec::new();
        };
        let mut list: Vec<Interest> = self
            .inner
            .interests
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|i| keep(current, i))
            .cloned()
            .collect();
        list.sort_by(|a, b| b.created_on.cmp(&a.created_on).then(b.key().cmp(&a.key())));
        list
    }
}

impl Identity for AppState {
    fn current_user_id(&self) -> Option<UserId> {
        self.current_user()
    }
}

fn sync_record(
    interests: &mut HashMap<(UserId, UserId), Interest>,
    key: (UserId, UserId),
    record: Option<&Interest>,
) {
    match record {
        Some(interest) => {
            interests.insert(key, interest.clone());
        }
        None => {
            interests.remove(&key);
        }
    }
}
