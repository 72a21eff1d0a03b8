use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use kindred_types::models::{Channel, Interest, InterestStatus, UserId};

use crate::backend::Backend;
use crate::channel::ChannelResolver;
use crate::error::{ApiError, ResolverError};
use crate::state::AppState;

/// Canonical status of the interest relationship between the signed-in user
/// and one other user, derived from both directional records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum InterestState {
    /// Not resolved yet.
    #[default]
    None,
    ShowInterest,
    SentPending,
    SentAccepted,
    SentDeclined,
    RecvPending,
    RecvAccepted,
    RecvDeclined,
}

/// Something the user can do from a given [`InterestState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    ShowInterest,
    Accept,
    Decline,
    StartMessaging,
}

impl InterestState {
    pub fn actions(&self) -> &'static [Action] {
        match self {
            Self::ShowInterest => &[Action::ShowInterest],
            Self::RecvPending => &[Action::Accept, Action::Decline],
            Self::SentAccepted | Self::RecvAccepted => &[Action::StartMessaging],
            Self::None | Self::SentPending | Self::SentDeclined | Self::RecvDeclined => &[],
        }
    }

    pub fn allows(&self, action: Action) -> bool {
        self.actions().contains(&action)
    }

    fn from_sent(status: InterestStatus) -> Self {
        match status {
            InterestStatus::Pending => Self::SentPending,
            InterestStatus::Accepted => Self::SentAccepted,
            InterestStatus::Declined => Self::SentDeclined,
            InterestStatus::Unknown => Self::ShowInterest,
        }
    }

    fn from_incoming(status: InterestStatus) -> Self {
        match status {
            InterestStatus::Pending => Self::RecvPending,
            InterestStatus::Accepted => Self::RecvAccepted,
            InterestStatus::Declined => Self::RecvDeclined,
            InterestStatus::Unknown => Self::ShowInterest,
        }
    }
}

impl fmt::Display for InterestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::None => "unresolved",
            Self::ShowInterest => "no interest exchanged",
            Self::SentPending => "sent interest is pending",
            Self::SentAccepted => "sent interest was accepted",
            Self::SentDeclined => "sent interest was declined",
            Self::RecvPending => "received interest is pending",
            Self::RecvAccepted => "received interest was accepted",
            Self::RecvDeclined => "received interest was declined",
        };
        f.write_str(text)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::ShowInterest => "show interest",
            Self::Accept => "accept",
            Self::Decline => "decline",
            Self::StartMessaging => "start messaging",
        };
        f.write_str(text)
    }
}

/// Derive the pair state from the record the current user sent and the one
/// they received.
///
/// A settled sent record (accepted or declined) decides the state on its
/// own. Otherwise any incoming record overrides a pending sent one.
pub fn resolve(sent: Option<&Interest>, incoming: Option<&Interest>) -> InterestState {
    let mut state = InterestState::ShowInterest;

    if let Some(sent) = sent {
        state = InterestState::from_sent(sent.status);
    }

    if matches!(state, InterestState::SentAccepted | InterestState::SentDeclined) {
        return state;
    }

    if let Some(incoming) = incoming {
        state = InterestState::from_incoming(incoming.status);
    }

    state
}

/// A resolved pair state together with the records it was derived from.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub state: InterestState,
    pub sent: Option<Interest>,
    pub incoming: Option<Interest>,
}

/// Human-readable summary of a read-only state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    pub text: &'static str,
    pub at: DateTime<Utc>,
}

impl fmt::Display for StatusLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}", self.text, self.at.format("%Y-%m-%d %H:%M"))
    }
}

impl Resolution {
    pub fn new(sent: Option<Interest>, incoming: Option<Interest>) -> Self {
        Self {
            state: resolve(sent.as_ref(), incoming.as_ref()),
            sent,
            incoming,
        }
    }

    /// Text and time of the record that produced the state. `None` for
    /// `None` and `ShowInterest`.
    pub fn status_line(&self) -> Option<StatusLine> {
        let (text, record) = match self.state {
            InterestState::SentPending => ("You sent an interest", &self.sent),
            InterestState::SentAccepted => ("Your interest was accepted", &self.sent),
            InterestState::SentDeclined => ("Your interest was declined", &self.sent),
            InterestState::RecvPending => ("You received an interest", &self.incoming),
            InterestState::RecvAccepted => ("You accepted the interest", &self.incoming),
            InterestState::RecvDeclined => ("You declined the interest", &self.incoming),
            InterestState::None | InterestState::ShowInterest => return None,
        };
        record.as_ref().map(|r| StatusLine { text, at: r.updated_on })
    }
}

/// Result of a mutating action. The pair is always re-resolved; `error`
/// holds the failed save, if any, so the caller can offer a retry.
#[derive(Debug)]
pub struct ActionOutcome {
    pub resolution: Resolution,
    pub error: Option<ApiError>,
}

impl ActionOutcome {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

// -- Resolver --

/// Resolves and acts on the interest relationship between the signed-in
/// user and others. Results are committed to [`AppState`].
#[derive(Clone)]
pub struct InterestResolver {
    backend: Arc<dyn Backend>,
    state: AppState,
    channels: ChannelResolver,
}

impl InterestResolver {
    pub fn new(backend: Arc<dyn Backend>, state: AppState) -> Self {
        let channels = ChannelResolver::new(backend.clone(), state.clone());
        Self {
            backend,
            state,
            channels,
        }
    }

    /// Fetch both directions (sent first) and commit the derived state.
    ///
    /// A failed fetch falls back to the cached copy of that record. If a
    /// newer resolution for the same pair committed first, that one is
    /// returned instead.
    pub async fn resolve(&self, other: UserId) -> Result<Resolution, ResolverError> {
        let current = self.pair_owner(other)?;
        let token = self.state.issue_token();

        let sent = self.fetch(current, other).await;
        let incoming = self.fetch(other, current).await;
        let resolution = Resolution::new(sent, incoming);

        if self.state.commit_pair(current, other, token, resolution.clone()) {
            return Ok(resolution);
        }
        Ok(self.state.resolution(other).unwrap_or(resolution))
    }

    /// Send an interest to `other`, then re-resolve.
    pub async fn show_interest(&self, other: UserId) -> Result<ActionOutcome, ResolverError> {
        let current = self.require(other, Action::ShowInterest)?;

        let error = match self.backend.save_interest(current, other, None).await {
            Ok(interest) => {
                info!("User {} showed interest in {}", current, other);
                self.state.add_sent_interest(interest);
                None
            }
            Err(e) => {
                warn!("Failed to save interest {} -> {}: {}", current, other, e);
                Some(e)
            }
        };

        self.finish(other, error).await
    }

    /// Accept or decline the pending interest `other` sent, then re-resolve.
    pub async fn respond(&self, other: UserId, accept: bool) -> Result<ActionOutcome, ResolverError> {
        let action = if accept { Action::Accept } else { Action::Decline };
        let current = self.require(other, action)?;

        let status = InterestStatus::from_response(accept);
        let error = match self.backend.save_interest(other, current, Some(status)).await {
            Ok(interest) => {
                info!("User {} {} interest from {}", current, status, other);
                self.state.apply_interest(interest);
                None
            }
            Err(e) => {
                warn!("Failed to mark interest {} -> {} {}: {}", other, current, status, e);
                Some(e)
            }
        };

        self.finish(other, error).await
    }

    /// Open the channel with `other`, creating it if needed.
    pub async fn start_messaging(&self, other: UserId) -> Result<Channel, ResolverError> {
        let current = self.require(other, Action::StartMessaging)?;
        Ok(self.channels.get_or_create(current, other).await?)
    }

    async fn finish(&self, other: UserId, error: Option<ApiError>) -> Result<ActionOutcome, ResolverError> {
        let resolution = self.resolve(other).await?;
        Ok(ActionOutcome { resolution, error })
    }

    async fn fetch(&self, from: UserId, to: UserId) -> Option<Interest> {
        match self.backend.get_interest(from, to).await {
            Ok(found) => {
                if found.is_none() {
                    debug!("No interest {} -> {}", from, to);
                }
                found
            }
            Err(e) => {
                warn!("Interest lookup {} -> {} failed, using cached copy: {}", from, to, e);
                self.state.interest(from, to)
            }
        }
    }

    fn pair_owner(&self, other: UserId) -> Result<UserId, ResolverError> {
        let current = self.state.current_user().ok_or(ResolverError::SignedOut)?;
        if current == other {
            return Err(ResolverError::SelfPair);
        }
        Ok(current)
    }

    /// The committed state must offer `action`.
    fn require(&self, other: UserId, action: Action) -> Result<UserId, ResolverError> {
        let current = self.pair_owner(other)?;
        let state = self.state.interest_state(other);
        if !state.allows(action) {
            return Err(ResolverError::ActionUnavailable { action, state });
        }
        Ok(current)
    }
}
