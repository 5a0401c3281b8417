//! Call session state machine.

use crate::error::InvalidTransition;
use crate::types::{CallDirection, CallMediaType, EndCallReason, Receiver, SessionId, UserId};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Current state of a call session. Idle is the absence of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum CallState {
    Ringing {
        direction: CallDirection,
        since: DateTime<Utc>,
    },
    /// Accepted by one side, waiting for the media join.
    Accepted {
        accepted_at: DateTime<Utc>,
        audio_muted: bool,
        video_paused: bool,
    },
    InProgress {
        connected_at: DateTime<Utc>,
        audio_muted: bool,
        video_paused: bool,
    },
    Ended {
        reason: EndCallReason,
        ended_at: DateTime<Utc>,
        duration_secs: Option<i64>,
    },
    Cancelled {
        at: DateTime<Utc>,
    },
    Rejected {
        at: DateTime<Utc>,
    },
}

impl CallState {
    pub fn is_ringing(&self) -> bool {
        matches!(self, Self::Ringing { .. })
    }

    /// Accepted or in progress.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Accepted { .. } | Self::InProgress { .. })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Ended { .. } | Self::Cancelled { .. } | Self::Rejected { .. }
        )
    }

    pub fn can_accept(&self) -> bool {
        matches!(
            self,
            Self::Ringing {
                direction: CallDirection::Incoming,
                ..
            }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallTransition {
    LocalAccepted,
    RemoteAccepted,
    Rejected,
    Cancelled,
    /// Media join completed with a valid token.
    Joined,
    Terminated { reason: EndCallReason },
    AudioMuteChanged { muted: bool },
    VideoStateChanged { paused: bool },
}

/// Controls a view may offer for the current session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CallAction {
    Accept,
    Reject,
    Cancel,
    End,
    ToggleMute,
    ToggleCamera,
}

#[derive(Debug, Clone, Serialize)]
pub struct CallSession {
    pub session_id: SessionId,
    pub media: CallMediaType,
    pub direction: CallDirection,
    pub initiator: UserId,
    pub receiver: Receiver,
    pub state: CallState,
    pub created_at: DateTime<Utc>,
}

impl CallSession {
    pub fn new_outgoing(
        session_id: SessionId,
        initiator: UserId,
        receiver: Receiver,
        media: CallMediaType,
    ) -> Self {
        Self::ringing(session_id, initiator, receiver, media, CallDirection::Outgoing)
    }

    pub fn new_incoming(
        session_id: SessionId,
        initiator: UserId,
        receiver: Receiver,
        media: CallMediaType,
    ) -> Self {
        Self::ringing(session_id, initiator, receiver, media, CallDirection::Incoming)
    }

    /// Session entered straight from an invite; skips ringing.
    pub fn new_join(
        session_id: SessionId,
        local_user: UserId,
        receiver: Receiver,
        media: CallMediaType,
    ) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            media,
            direction: CallDirection::Join,
            initiator: local_user,
            receiver,
            state: CallState::Accepted {
                accepted_at: now,
                audio_muted: false,
                video_paused: media != CallMediaType::Video,
            },
            created_at: now,
        }
    }

    fn ringing(
        session_id: SessionId,
        initiator: UserId,
        receiver: Receiver,
        media: CallMediaType,
        direction: CallDirection,
    ) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            media,
            direction,
            initiator,
            receiver,
            state: CallState::Ringing {
                direction,
                since: now,
            },
            created_at: now,
        }
    }

    pub fn is_initiator(&self) -> bool {
        self.direction == CallDirection::Outgoing
    }

    pub fn permitted_actions(&self) -> Vec<CallAction> {
        match &self.state {
            CallState::Ringing {
                direction: CallDirection::Incoming,
                ..
            } => vec![CallAction::Accept, CallAction::Reject],
            CallState::Ringing { .. } => vec![CallAction::Cancel],
            CallState::Accepted { .. } | CallState::InProgress { .. } => {
                vec![CallAction::End, CallAction::ToggleMute, CallAction::ToggleCamera]
            }
            _ => Vec::new(),
        }
    }

    /// Apply a state transition. Returns error if transition is invalid.
    pub fn apply_transition(&mut self, transition: CallTransition) -> Result<(), InvalidTransition> {
        let new_state = match (&self.state, transition) {
            (
                CallState::Ringing {
                    direction: CallDirection::Incoming,
                    ..
                },
                CallTransition::LocalAccepted,
            )
            | (
                CallState::Ringing {
                    direction: CallDirection::Outgoing,
                    ..
                },
                CallTransition::RemoteAccepted,
            ) => CallState::Accepted {
                accepted_at: Utc::now(),
                audio_muted: false,
                video_paused: self.media != CallMediaType::Video,
            },
            (CallState::Ringing { .. }, CallTransition::Rejected) => {
                CallState::Rejected { at: Utc::now() }
            }
            (CallState::Ringing { .. }, CallTransition::Cancelled) => {
                CallState::Cancelled { at: Utc::now() }
            }
            (
                CallState::Accepted {
                    audio_muted,
                    video_paused,
                    ..
                },
                CallTransition::Joined,
            ) => CallState::InProgress {
                connected_at: Utc::now(),
                audio_muted: *audio_muted,
                video_paused: *video_paused,
            },
            (CallState::Accepted { .. }, CallTransition::Terminated { reason }) => {
                CallState::Ended {
                    reason,
                    ended_at: Utc::now(),
                    duration_secs: None,
                }
            }
            (CallState::InProgress { connected_at, .. }, CallTransition::Terminated { reason }) => {
                let duration = Utc::now()
                    .signed_duration_since(*connected_at)
                    .num_seconds();
                CallState::Ended {
                    reason,
                    ended_at: Utc::now(),
                    duration_secs: Some(duration),
                }
            }
            (
                CallState::Accepted {
                    accepted_at,
                    video_paused,
                    ..
                },
                CallTransition::AudioMuteChanged { muted },
            ) => CallState::Accepted {
                accepted_at: *accepted_at,
                audio_muted: muted,
                video_paused: *video_paused,
            },
            (
                CallState::Accepted {
                    accepted_at,
                    audio_muted,
                    ..
                },
                CallTransition::VideoStateChanged { paused },
            ) => CallState::Accepted {
                accepted_at: *accepted_at,
                audio_muted: *audio_muted,
                video_paused: paused,
            },
            (
                CallState::InProgress {
                    connected_at,
                    video_paused,
                    ..
                },
                CallTransition::AudioMuteChanged { muted },
            ) => CallState::InProgress {
                connected_at: *connected_at,
                audio_muted: muted,
                video_paused: *video_paused,
            },
            (
                CallState::InProgress {
                    connected_at,
                    audio_muted,
                    ..
                },
                CallTransition::VideoStateChanged { paused },
            ) => CallState::InProgress {
                connected_at: *connected_at,
                audio_muted: *audio_muted,
                video_paused: paused,
            },
            (current, transition) => {
                return Err(InvalidTransition {
                    current_state: format!("{:?}", current),
                    attempted: format!("{:?}", transition),
                });
            }
        };
        self.state = new_state;
        Ok(())
    }

    pub fn audio_muted(&self) -> bool {
        match self.state {
            CallState::Accepted { audio_muted, .. } | CallState::InProgress { audio_muted, .. } => {
                audio_muted
            }
            _ => false,
        }
    }

    pub fn video_paused(&self) -> bool {
        match self.state {
            CallState::Accepted { video_paused, .. }
            | CallState::InProgress { video_paused, .. } => video_paused,
            _ => self.media != CallMediaType::Video,
        }
    }
}
