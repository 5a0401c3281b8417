//! Owner of the single active call session.

use super::error::CallError;
use crate::service::ChatService;
use crate::types::events::{CallChanged, CallEvent, CallFailed, EventBus, publish};
use chatcore::types::{
    CallDirection, CallMediaType, CallStatus, EndCallReason, Receiver, SessionId, UserId,
};
use chatcore::{CallAction, CallSession, CallState, CallTransition, InvalidTransition};
use log::{debug, info, warn};
use std::sync::Arc;
use tokio::sync::RwLock;

/// What to join: the current accepted session, or a session announced by an
/// invite that never rang locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinTarget {
    Session,
    Direct {
        session_id: SessionId,
        media: CallMediaType,
        receiver: Receiver,
    },
}

pub struct CallCoordinator {
    local_user: UserId,
    service: Arc<dyn ChatService>,
    events: Arc<EventBus>,
    active: RwLock<Option<CallSession>>,
}

fn ensure(session: &CallSession, allowed: bool, attempted: &str) -> Result<(), CallError> {
    if allowed {
        Ok(())
    } else {
        Err(InvalidTransition {
            current_state: format!("{:?}", session.state),
            attempted: attempted.to_string(),
        }
        .into())
    }
}

impl CallCoordinator {
    pub fn new(local_user: UserId, service: Arc<dyn ChatService>, events: Arc<EventBus>) -> Self {
        Self {
            local_user,
            service,
            events,
            active: RwLock::new(None),
        }
    }

    pub async fn session(&self) -> Option<CallSession> {
        self.active.read().await.clone()
    }

    pub async fn has_active_call(&self) -> bool {
        self.active.read().await.is_some()
    }

    pub async fn permitted_actions(&self) -> Vec<CallAction> {
        self.active
            .read()
            .await
            .as_ref()
            .map(CallSession::permitted_actions)
            .unwrap_or_default()
    }

    async fn current(&self) -> Result<CallSession, CallError> {
        self.session().await.ok_or(CallError::NoActiveSession)
    }

    fn publish_state(&self, session_id: &SessionId, state: Option<CallState>) {
        publish(
            &self.events.call,
            CallChanged {
                session_id: session_id.clone(),
                state,
            },
        );
    }

    async fn install(&self, session: CallSession) {
        *self.active.write().await = Some(session.clone());
        self.publish_state(&session.session_id, Some(session.state));
    }

    /// Apply `transition` to the active session if it is `session_id`.
    /// Terminal states release the session.
    async fn transition(
        &self,
        session_id: &SessionId,
        transition: CallTransition,
    ) -> Result<CallSession, CallError> {
        let mut active = self.active.write().await;
        let session = active
            .as_mut()
            .filter(|s| &s.session_id == session_id)
            .ok_or(CallError::NoActiveSession)?;
        session.apply_transition(transition)?;
        let snapshot = session.clone();
        if snapshot.state.is_terminal() {
            *active = None;
        }
        drop(active);

        debug!("Call {} is now {:?}", session_id, snapshot.state);
        self.publish_state(session_id, Some(snapshot.state.clone()));
        Ok(snapshot)
    }

    /// Forget the local session and tell the service there is no active call.
    pub async fn clear_active_call(&self) {
        if let Some(previous) = self.active.write().await.take() {
            self.publish_state(&previous.session_id, None);
        }
        if let Err(e) = self.service.clear_active_call().await {
            warn!("Failed to clear active call: {e}");
        }
    }

    pub async fn initiate(
        &self,
        receiver: Receiver,
        media: CallMediaType,
    ) -> Result<CallSession, CallError> {
        self.clear_active_call().await;

        let session_id = self.service.initiate_call(&receiver, media).await?;
        let session =
            CallSession::new_outgoing(session_id, self.local_user.clone(), receiver, media);
        info!("Calling {} ({})", session.receiver.id, media);
        self.install(session.clone()).await;
        Ok(session)
    }

    pub async fn accept(&self) -> Result<CallSession, CallError> {
        let session = self.current().await?;
        ensure(&session, session.state.can_accept(), "LocalAccepted")?;

        self.service.accept_call(&session.session_id).await?;
        self.transition(&session.session_id, CallTransition::LocalAccepted)
            .await?;
        self.join(JoinTarget::Session).await
    }

    pub async fn reject(&self) -> Result<(), CallError> {
        let session = self.current().await?;
        ensure(&session, session.state.can_accept(), "Rejected")?;

        self.service
            .reject_call(&session.session_id, CallStatus::Rejected)
            .await?;
        self.transition(&session.session_id, CallTransition::Rejected)
            .await?;
        Ok(())
    }

    pub async fn cancel(&self) -> Result<(), CallError> {
        let session = self.current().await?;
        let outgoing_ringing = matches!(
            session.state,
            CallState::Ringing {
                direction: CallDirection::Outgoing,
                ..
            }
        );
        ensure(&session, outgoing_ringing, "Cancelled")?;

        self.service
            .reject_call(&session.session_id, CallStatus::Cancelled)
            .await?;
        self.transition(&session.session_id, CallTransition::Cancelled)
            .await?;
        Ok(())
    }

    pub async fn end(&self) -> Result<(), CallError> {
        let session = self.current().await?;
        ensure(&session, session.state.is_live(), "Terminated")?;

        if let Err(e) = self.service.end_call(&session.session_id).await {
            warn!("Failed to end call {} remotely: {e}", session.session_id);
        }
        self.transition(
            &session.session_id,
            CallTransition::Terminated {
                reason: EndCallReason::LocalEnded,
            },
        )
        .await?;
        self.clear_active_call().await;
        Ok(())
    }

    /// Returns the new mute state.
    pub async fn toggle_mute(&self) -> Result<bool, CallError> {
        let session = self.current().await?;
        let muted = !session.audio_muted();
        self.transition(
            &session.session_id,
            CallTransition::AudioMuteChanged { muted },
        )
        .await?;
        Ok(muted)
    }

    /// Returns whether the camera is now paused.
    pub async fn toggle_camera(&self) -> Result<bool, CallError> {
        let session = self.current().await?;
        let paused = !session.video_paused();
        self.transition(
            &session.session_id,
            CallTransition::VideoStateChanged { paused },
        )
        .await?;
        Ok(paused)
    }

    /// Obtain a join token and move the session into progress.
    ///
    /// A token failure releases the session and is published on
    /// `call_failed`; it is not retried.
    pub async fn join(&self, target: JoinTarget) -> Result<CallSession, CallError> {
        let session = match target {
            JoinTarget::Session => self.current().await?,
            JoinTarget::Direct {
                session_id,
                media,
                receiver,
            } => {
                self.clear_active_call().await;
                let session =
                    CallSession::new_join(session_id, self.local_user.clone(), receiver, media);
                self.install(session.clone()).await;
                session
            }
        };
        ensure(
            &session,
            matches!(session.state, CallState::Accepted { .. }),
            "Joined",
        )?;

        match self
            .service
            .generate_call_token(&session.session_id)
            .await
        {
            Ok(_token) => {
                self.transition(&session.session_id, CallTransition::Joined)
                    .await
            }
            Err(e) => {
                warn!("Could not join call {}: {e}", session.session_id);
                {
                    let mut active = self.active.write().await;
                    if active
                        .as_ref()
                        .is_some_and(|s| s.session_id == session.session_id)
                    {
                        *active = None;
                    }
                }
                self.publish_state(&session.session_id, None);
                publish(
                    &self.events.call_failed,
                    CallFailed {
                        session_id: session.session_id.clone(),
                        reason: e.to_string(),
                    },
                );
                Err(CallError::JoinToken(e))
            }
        }
    }

    pub async fn handle_event(&self, event: CallEvent) -> Result<(), CallError> {
        if let CallEvent::IncomingReceived {
            session_id,
            caller,
            receiver,
            media,
        } = event
        {
            if let Some(current) = self.active.read().await.as_ref()
                && current.state.is_live()
            {
                info!(
                    "Ignoring incoming call {session_id} from {caller}: {} is in progress",
                    current.session_id
                );
                return Ok(());
            }
            info!("Incoming {} from {caller}", media.label().to_lowercase());
            self.install(CallSession::new_incoming(session_id, caller, receiver, media))
                .await;
            return Ok(());
        }

        let session_id = event.session_id().clone();
        let matches_active = self
            .active
            .read()
            .await
            .as_ref()
            .is_some_and(|s| s.session_id == session_id);
        if !matches_active {
            debug!("Dropping {event:?}: not the active session");
            return Ok(());
        }

        match event {
            CallEvent::OutgoingAccepted { .. } => {
                self.transition(&session_id, CallTransition::RemoteAccepted)
                    .await?;
                self.join(JoinTarget::Session).await?;
            }
            CallEvent::OutgoingRejected { .. } => {
                self.transition(&session_id, CallTransition::Rejected)
                    .await?;
                self.clear_active_call().await;
            }
            CallEvent::IncomingCancelled { .. } => {
                self.transition(&session_id, CallTransition::Cancelled)
                    .await?;
            }
            CallEvent::Ended { .. } => {
                self.transition(
                    &session_id,
                    CallTransition::Terminated {
                        reason: EndCallReason::RemoteEnded,
                    },
                )
                .await?;
                self.clear_active_call().await;
            }
            CallEvent::IncomingReceived { .. } => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_service::InMemoryService;
    use crate::service::ServiceError;

    fn setup() -> (Arc<InMemoryService>, Arc<EventBus>, CallCoordinator) {
        let service = Arc::new(InMemoryService::new("me"));
        let events = Arc::new(EventBus::new());
        let coordinator = CallCoordinator::new(UserId::new("me"), service.clone(), events.clone());
        (service, events, coordinator)
    }

    fn incoming(id: &str) -> CallEvent {
        CallEvent::IncomingReceived {
            session_id: SessionId::new(id),
            caller: UserId::new("u1"),
            receiver: Receiver::user("me"),
            media: CallMediaType::Audio,
        }
    }

    #[tokio::test]
    async fn test_outgoing_call_accepted_remotely_joins() {
        let (service, _events, calls) = setup();
        let session = calls
            .initiate(Receiver::user("u1"), CallMediaType::Video)
            .await
            .unwrap();
        assert_eq!(calls.permitted_actions().await, vec![CallAction::Cancel]);

        calls
            .handle_event(CallEvent::OutgoingAccepted {
                session_id: session.session_id.clone(),
            })
            .await
            .unwrap();

        let active = calls.session().await.unwrap();
        assert!(matches!(active.state, CallState::InProgress { .. }));
        assert_eq!(service.call_count("generate_call_token"), 1);
    }

    #[tokio::test]
    async fn test_initiate_clears_previous_session() {
        let (service, _events, calls) = setup();
        let first = calls
            .initiate(Receiver::user("u1"), CallMediaType::Audio)
            .await
            .unwrap();
        let second = calls
            .initiate(Receiver::user("u2"), CallMediaType::Audio)
            .await
            .unwrap();

        assert_ne!(first.session_id, second.session_id);
        assert_eq!(calls.session().await.unwrap().session_id, second.session_id);
        assert_eq!(service.call_count("clear_active_call"), 2);
    }

    #[tokio::test]
    async fn test_incoming_accept_then_remote_end() {
        let (_service, _events, calls) = setup();
        calls.handle_event(incoming("s1")).await.unwrap();
        assert_eq!(
            calls.permitted_actions().await,
            vec![CallAction::Accept, CallAction::Reject]
        );

        calls.accept().await.unwrap();
        assert!(calls.session().await.unwrap().state.is_live());

        calls
            .handle_event(CallEvent::Ended {
                session_id: SessionId::new("s1"),
            })
            .await
            .unwrap();
        assert!(calls.session().await.is_none());
    }

    #[tokio::test]
    async fn test_incoming_ignored_while_in_progress() {
        let (_service, _events, calls) = setup();
        calls.handle_event(incoming("s1")).await.unwrap();
        calls.accept().await.unwrap();

        calls.handle_event(incoming("s2")).await.unwrap();
        assert_eq!(calls.session().await.unwrap().session_id.as_str(), "s1");
    }

    #[tokio::test]
    async fn test_join_token_failure_clears_and_publishes() {
        let (service, events, calls) = setup();
        let mut failed = events.call_failed.subscribe();
        service.fail_next("generate_call_token", ServiceError::Network("offline".into()));

        let result = calls
            .join(JoinTarget::Direct {
                session_id: SessionId::new("call_1"),
                media: CallMediaType::Audio,
                receiver: Receiver::group("g1"),
            })
            .await;

        assert!(matches!(result, Err(CallError::JoinToken(_))));
        assert!(calls.session().await.is_none());
        assert_eq!(failed.recv().await.unwrap().session_id.as_str(), "call_1");
    }

    #[tokio::test]
    async fn test_reject_and_cancel_follow_direction() {
        let (service, _events, calls) = setup();
        calls.handle_event(incoming("s1")).await.unwrap();
        assert!(matches!(
            calls.cancel().await,
            Err(CallError::InvalidTransition(_))
        ));
        calls.reject().await.unwrap();
        assert!(calls.session().await.is_none());
        assert_eq!(service.calls_to("reject_call"), vec!["s1:Call Rejected"]);

        calls
            .initiate(Receiver::user("u1"), CallMediaType::Audio)
            .await
            .unwrap();
        calls.cancel().await.unwrap();
        assert!(!calls.has_active_call().await);
    }

    #[tokio::test]
    async fn test_toggles_and_stale_events() {
        let (_service, _events, calls) = setup();
        assert!(matches!(
            calls.toggle_mute().await,
            Err(CallError::NoActiveSession)
        ));

        calls.handle_event(incoming("s1")).await.unwrap();
        calls.accept().await.unwrap();
        assert!(calls.toggle_mute().await.unwrap());
        assert!(!calls.toggle_mute().await.unwrap());
        // Audio call starts with camera paused.
        assert!(!calls.toggle_camera().await.unwrap());

        calls
            .handle_event(CallEvent::Ended {
                session_id: SessionId::new("other"),
            })
            .await
            .unwrap();
        assert!(calls.session().await.is_some());

        calls.end().await.unwrap();
        assert!(calls.session().await.is_none());
    }
}
