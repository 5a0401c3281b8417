use crate::service::ChatService;
use chatcore::types::Receiver;
use log::{debug, warn};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatStateType {
    Composing,

    Paused,
}

impl ChatStateType {
    fn as_str(&self) -> &'static str {
        match self {
            ChatStateType::Composing => "composing",
            ChatStateType::Paused => "paused",
        }
    }
}

impl std::fmt::Display for ChatStateType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Default)]
struct NotifierState {
    composing: bool,
    timer: Option<JoinHandle<()>>,
    /// Bumped on every keystroke so a stale timer can tell it lost the race.
    generation: u64,
}

struct Inner {
    service: Arc<dyn ChatService>,
    receiver: Receiver,
    delay: Duration,
    state: Mutex<NotifierState>,
}

impl Inner {
    async fn send(&self, state: ChatStateType) {
        debug!(target: "Chatstate", "Sending {} to {}", state, self.receiver.id);
        let result = match state {
            ChatStateType::Composing => self.service.start_typing(&self.receiver).await,
            ChatStateType::Paused => self.service.end_typing(&self.receiver).await,
        };
        if let Err(e) = result {
            warn!(target: "Chatstate", "Failed to send {state} to {}: {e}", self.receiver.id);
        }
    }
}

/// Debounces outbound typing notifications for one conversation.
///
/// The first keystroke of a burst sends `composing`; `paused` follows once
/// no keystroke arrived for the configured delay. Dropping the notifier
/// cancels the pending timer.
pub struct TypingNotifier {
    inner: Arc<Inner>,
}

impl TypingNotifier {
    pub fn new(service: Arc<dyn ChatService>, receiver: Receiver, delay: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                service,
                receiver,
                delay,
                state: Mutex::new(NotifierState::default()),
            }),
        }
    }

    pub fn is_composing(&self) -> bool {
        self.inner
            .state
            .lock()
            .map(|s| s.composing)
            .unwrap_or(false)
    }

    pub async fn keystroke(&self) {
        let started = {
            let Ok(mut state) = self.inner.state.lock() else {
                return;
            };
            let started = !state.composing;
            state.composing = true;
            state.generation += 1;
            if let Some(timer) = state.timer.take() {
                timer.abort();
            }
            let inner = self.inner.clone();
            let generation = state.generation;
            state.timer = Some(tokio::spawn(async move {
                tokio::time::sleep(inner.delay).await;
                let expired = match inner.state.lock() {
                    Ok(mut state) if state.generation == generation && state.composing => {
                        state.composing = false;
                        state.timer = None;
                        true
                    }
                    _ => false,
                };
                if expired {
                    inner.send(ChatStateType::Paused).await;
                }
            }));
            started
        };

        if started {
            self.inner.send(ChatStateType::Composing).await;
        }
    }

    /// End typing now, e.g. because the message was sent.
    pub async fn stop(&self) {
        let was_composing = {
            let Ok(mut state) = self.inner.state.lock() else {
                return;
            };
            if let Some(timer) = state.timer.take() {
                timer.abort();
            }
            std::mem::take(&mut state.composing)
        };
        if was_composing {
            self.inner.send(ChatStateType::Paused).await;
        }
    }
}

impl Drop for TypingNotifier {
    fn drop(&mut self) {
        let Ok(mut state) = self.inner.state.lock() else {
            return;
        };
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        if std::mem::take(&mut state.composing)
            && let Ok(handle) = tokio::runtime::Handle::try_current()
        {
            let inner = self.inner.clone();
            handle.spawn(async move { inner.send(ChatStateType::Paused).await });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_service::InMemoryService;

    fn notifier(service: &Arc<InMemoryService>) -> TypingNotifier {
        TypingNotifier::new(
            service.clone(),
            Receiver::user("u1"),
            Duration::from_secs(1),
        )
    }

    #[test]
    fn test_chat_state_type_display() {
        assert_eq!(ChatStateType::Composing.to_string(), "composing");
        assert_eq!(ChatStateType::Paused.to_string(), "paused");
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_sends_one_start_and_one_stop() {
        let service = Arc::new(InMemoryService::new("me"));
        let typing = notifier(&service);

        for _ in 0..5 {
            typing.keystroke().await;
            tokio::time::sleep(Duration::from_millis(400)).await;
        }
        assert_eq!(service.call_count("start_typing"), 1);
        assert_eq!(service.call_count("end_typing"), 0);

        tokio::time::sleep(Duration::from_millis(700)).await;
        assert_eq!(service.call_count("end_typing"), 1);
        assert!(!typing.is_composing());

        // A new burst starts again.
        typing.keystroke().await;
        assert_eq!(service.call_count("start_typing"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_immediate_and_cancels_timer() {
        let service = Arc::new(InMemoryService::new("me"));
        let typing = notifier(&service);

        typing.keystroke().await;
        typing.stop().await;
        assert_eq!(service.call_count("end_typing"), 1);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(service.call_count("end_typing"), 1);

        // Stopping while idle sends nothing.
        typing.stop().await;
        assert_eq!(service.call_count("end_typing"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_revokes_timer() {
        let service = Arc::new(InMemoryService::new("me"));
        let typing = notifier(&service);
        typing.keystroke().await;
        drop(typing);

        tokio::time::sleep(Duration::from_secs(3)).await;
        // Only the farewell stop from drop, never a second one from the timer.
        assert_eq!(service.call_count("end_typing"), 1);
    }
}
