use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use kindred_client::{
    Action, ApiError, Backend, Client, InterestState, MemoryBackend, ResolverError,
};
use kindred_gateway::{ConnectionConfig, MemoryDialer};
use kindred_types::models::{Channel, Interest, InterestStatus, UserId};

const ALICE: UserId = 1;
const BOB: UserId = 2;

fn client(backend: Arc<dyn Backend>, user: UserId) -> Client {
    let (dialer, _accepted) = MemoryDialer::new();
    let client = Client::with_parts(backend, dialer, ConnectionConfig::default());
    client.state().set_current_user(Some(user));
    client
}

#[tokio::test]
async fn no_records_shows_interest() {
    let backend = Arc::new(MemoryBackend::new());
    let alice = client(backend, ALICE);

    assert_eq!(alice.state().interest_state(BOB), InterestState::None);
    let resolution = alice.interests().resolve(BOB).await.unwrap();
    assert_eq!(resolution.state, InterestState::ShowInterest);
    assert!(resolution.status_line().is_none());
    assert_eq!(alice.state().interest_state(BOB), InterestState::ShowInterest);
}

#[tokio::test]
async fn full_proposal_then_messaging() {
    let backend = Arc::new(MemoryBackend::new());
    let alice = client(backend.clone(), ALICE);
    let bob = client(backend.clone(), BOB);

    alice.interests().resolve(BOB).await.unwrap();
    let outcome = alice.interests().show_interest(BOB).await.unwrap();
    assert!(outcome.is_ok());
    assert_eq!(outcome.resolution.state, InterestState::SentPending);
    assert_eq!(
        outcome.resolution.status_line().unwrap().text,
        "You sent an interest"
    );

    assert_eq!(bob.interests().resolve(ALICE).await.unwrap().state, InterestState::RecvPending);
    let outcome = bob.interests().respond(ALICE, true).await.unwrap();
    assert_eq!(outcome.resolution.state, InterestState::RecvAccepted);

    let resolution = alice.interests().resolve(BOB).await.unwrap();
    assert_eq!(resolution.state, InterestState::SentAccepted);
    assert_eq!(alice.state().accepted_interests().len(), 1);

    let from_alice = alice.interests().start_messaging(BOB).await.unwrap();
    let from_bob = bob.interests().start_messaging(ALICE).await.unwrap();
    let again = alice.interests().start_messaging(BOB).await.unwrap();
    assert_eq!(from_alice.id, from_bob.id);
    assert_eq!(from_alice.id, again.id);
    assert_eq!(alice.state().channels().len(), 1);
    assert_eq!(bob.state().channels().len(), 1);
}

#[tokio::test]
async fn declined_response_is_read_only() {
    let backend = Arc::new(MemoryBackend::new());
    backend.save_interest(BOB, ALICE, None).await.unwrap();
    let alice = client(backend.clone(), ALICE);

    alice.interests().resolve(BOB).await.unwrap();
    let outcome = alice.interests().respond(BOB, false).await.unwrap();
    assert_eq!(outcome.resolution.state, InterestState::RecvDeclined);

    let err = alice.interests().respond(BOB, true).await.unwrap_err();
    assert!(matches!(
        err,
        ResolverError::ActionUnavailable {
            action: Action::Accept,
            state: InterestState::RecvDeclined
        }
    ));
}

#[tokio::test]
async fn settled_sent_record_wins_over_incoming() {
    let backend = Arc::new(MemoryBackend::new());
    for (from, to, status) in [(ALICE, BOB, InterestStatus::Accepted), (BOB, ALICE, InterestStatus::Declined)] {
        backend.save_interest(from, to, None).await.unwrap();
        backend.save_interest(from, to, Some(status)).await.unwrap();
    }
    let alice = client(backend, ALICE);

    assert_eq!(alice.interests().resolve(BOB).await.unwrap().state, InterestState::SentAccepted);
}

#[tokio::test]
async fn actions_require_a_resolved_state_that_offers_them() {
    let backend = Arc::new(MemoryBackend::new());
    let alice = client(backend.clone(), ALICE);

    assert!(matches!(
        alice.interests().show_interest(BOB).await,
        Err(ResolverError::ActionUnavailable { state: InterestState::None, .. })
    ));

    alice.interests().resolve(BOB).await.unwrap();
    alice.interests().show_interest(BOB).await.unwrap();
    assert!(matches!(
        alice.interests().show_interest(BOB).await,
        Err(ResolverError::ActionUnavailable { state: InterestState::SentPending, .. })
    ));
    assert!(matches!(
        alice.interests().start_messaging(BOB).await,
        Err(ResolverError::ActionUnavailable { action: Action::StartMessaging, .. })
    ));
    assert!(matches!(alice.interests().resolve(ALICE).await, Err(ResolverError::SelfPair)));
}

#[tokio::test]
async fn failed_fetch_falls_back_to_cached_records() {
    let backend = Arc::new(MemoryBackend::new());
    backend.save_interest(BOB, ALICE, None).await.unwrap();
    let alice = client(backend.clone(), ALICE);

    assert_eq!(alice.interests().resolve(BOB).await.unwrap().state, InterestState::RecvPending);

    backend.set_offline(true);
    let resolution = alice.interests().resolve(BOB).await.unwrap();
    assert_eq!(resolution.state, InterestState::RecvPending);
    assert!(resolution.incoming.is_some());
}

#[tokio::test]
async fn failed_save_is_reported_and_state_re_resolved() {
    let backend = Arc::new(MemoryBackend::new());
    let alice = client(backend.clone(), ALICE);
    alice.interests().resolve(BOB).await.unwrap();

    backend.set_offline(true);
    let outcome = alice.interests().show_interest(BOB).await.unwrap();
    assert!(matches!(outcome.error, Some(ApiError::Status { status: 503, .. })));
    assert_eq!(outcome.resolution.state, InterestState::ShowInterest);
}

#[tokio::test]
async fn refresh_loads_listings() {
    let backend = Arc::new(MemoryBackend::new());
    backend.save_interest(3, ALICE, None).await.unwrap();
    backend.save_interest(BOB, ALICE, None).await.unwrap();
    backend.save_interest(ALICE, 4, None).await.unwrap();
    backend.save_interest(ALICE, 4, Some(InterestStatus::Accepted)).await.unwrap();
    backend.save_channel(ALICE, 4).await.unwrap();

    let alice = client(backend, ALICE);
    alice.refresh().await.unwrap();

    let incoming: Vec<UserId> = alice.state().incoming_interests().iter().map(|i| i.from_user_id).collect();
    assert_eq!(incoming.len(), 2);
    assert!(incoming.contains(&BOB) && incoming.contains(&3));
    assert_eq!(alice.state().accepted_interests()[0].to_user_id, 4);
    assert_eq!(alice.state().channels().len(), 1);
}

/// Fails or misses channel lookups, or hides the existing record in
/// conflicts, on demand.
#[derive(Default)]
struct Flaky {
    inner: MemoryBackend,
    fail_channel_lookup: AtomicBool,
    miss_next_lookup: AtomicBool,
    bare_conflicts: AtomicBool,
}

#[async_trait]
impl Backend for Flaky {
    async fn get_interest(&self, from: UserId, to: UserId) -> Result<Option<Interest>, ApiError> {
        self.inner.get_interest(from, to).await
    }

    async fn save_interest(
        &self,
        from: UserId,
        to: UserId,
        status: Option<InterestStatus>,
    ) -> Result<Interest, ApiError> {
        self.inner.save_interest(from, to, status).await
    }

    async fn get_channel(&self, a: UserId, b: UserId) -> Result<Option<Channel>, ApiError> {
        if self.fail_channel_lookup.load(Ordering::SeqCst) {
            return Err(ApiError::Status {
                status: 502,
                message: "bad gateway".to_string(),
            });
        }
        if self.miss_next_lookup.swap(false, Ordering::SeqCst) {
            return Ok(None);
        }
        self.inner.get_channel(a, b).await
    }

    async fn save_channel(&self, from: UserId, to: UserId) -> Result<Channel, ApiError> {
        match self.inner.save_channel(from, to).await {
            Err(ApiError::Conflict { .. }) if self.bare_conflicts.load(Ordering::SeqCst) => {
                Err(ApiError::Conflict { existing: None })
            }
            other => other,
        }
    }

    async fn list_incoming(
        &self,
        user: UserId,
        status: Option<InterestStatus>,
    ) -> Result<Vec<Interest>, ApiError> {
        self.inner.list_incoming(user, status).await
    }

    async fn list_sent(
        &self,
        user: UserId,
        status: Option<InterestStatus>,
    ) -> Result<Vec<Interest>, ApiError> {
        self.inner.list_sent(user, status).await
    }

    async fn list_channels(&self, user: UserId) -> Result<Vec<Channel>, ApiError> {
        self.inner.list_channels(user).await
    }
}

#[tokio::test]
async fn channel_lookup_failure_falls_through_to_create() {
    let backend = Arc::new(Flaky::default());
    let existing = backend.inner.save_channel(BOB, ALICE).await.unwrap();
    backend.fail_channel_lookup.store(true, Ordering::SeqCst);

    let alice = client(backend.clone(), ALICE);
    let channel = alice.channels().get_or_create(ALICE, BOB).await.unwrap();
    assert_eq!(channel.id, existing.id);
}

#[tokio::test]
async fn bare_conflict_refetches_channel() {
    let backend = Arc::new(Flaky::default());
    let existing = backend.inner.save_channel(ALICE, BOB).await.unwrap();
    backend.bare_conflicts.store(true, Ordering::SeqCst);
    backend.miss_next_lookup.store(true, Ordering::SeqCst);

    let bob = client(backend.clone(), BOB);
    let channel = bob.channels().get_or_create(BOB, ALICE).await.unwrap();
    assert_eq!(channel.id, existing.id);
}

#[tokio::test]
async fn simultaneous_creators_share_one_channel() {
    let backend = Arc::new(MemoryBackend::new());
    let alice = client(backend.clone(), ALICE);
    let bob = client(backend.clone(), BOB);

    let (a, b) = tokio::join!(
        alice.channels().get_or_create(ALICE, BOB),
        bob.channels().get_or_create(BOB, ALICE)
    );
    assert_eq!(a.unwrap().id, b.unwrap().id);
    assert_eq!(backend.list_channels(ALICE).await.unwrap().len(), 1);
}

#[tokio::test]
async fn unreachable_backend_uses_cached_channel() {
    let backend = Arc::new(MemoryBackend::new());
    let alice = client(backend.clone(), ALICE);
    let first = alice.channels().get_or_create(ALICE, BOB).await.unwrap();

    backend.set_offline(true);
    let cached = alice.channels().get_or_create(ALICE, BOB).await.unwrap();
    assert_eq!(cached.id, first.id);

    let stranger = alice.channels().get_or_create(ALICE, 9).await;
    assert!(stranger.is_err());
}
