//! Per-connection state machine.
//!
//! A [`Session`] is created when the transport accepts a socket and is fed
//! every inbound payload in arrival order. It owns nothing shared; all
//! presence changes go through the [`Relay`].

use log::{debug, warn};
use std::sync::Arc;

use crate::broadcaster::Broadcaster;
use crate::error::{InboundError, ParseError, ProtocolViolation};
use crate::messages::{InboundEvent, OutboundEvent};
use crate::outbound::{ConnectionId, Outbound};
use crate::relay::Relay;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Authenticated,
    Closed,
}

/// What the transport should do after a payload was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// Too many rejected payloads; close the socket.
    Disconnect,
}

pub struct Session {
    id: ConnectionId,
    relay: Arc<Relay>,
    outbound: Arc<dyn Outbound>,
    state: ConnectionState,
    violations: u32,
}

impl Session {
    pub fn new(relay: Arc<Relay>, outbound: Arc<dyn Outbound>) -> Self {
        Session {
            id: ConnectionId::new(),
            relay,
            outbound,
            state: ConnectionState::Connected,
            violations: 0,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn violations(&self) -> u32 {
        self.violations
    }

    /// Handles one raw payload. Rejected payloads leave the state untouched
    /// and are answered with an `error` notice to this connection only.
    pub async fn handle_payload(&mut self, payload: &[u8]) -> Flow {
        if self.state == ConnectionState::Closed {
            return Flow::Disconnect;
        }

        let result = match serde_json::from_slice::<InboundEvent>(payload) {
            Ok(event) => self.handle_event(event).await.map_err(InboundError::from),
            Err(e) => Err(ParseError(e).into()),
        };

        match result {
            Ok(()) => Flow::Continue,
            Err(e) => self.reject(&e),
        }
    }

    pub async fn handle_event(&mut self, event: InboundEvent) -> Result<(), ProtocolViolation> {
        match (self.state, event) {
            (ConnectionState::Closed, _) => Ok(()),
            (_, InboundEvent::Login { username }) if username.trim().is_empty() => {
                Err(ProtocolViolation::EmptyUsername)
            }
            (ConnectionState::Connected, InboundEvent::Login { username }) => {
                self.relay
                    .join(self.id, username, Arc::clone(&self.outbound))
                    .await;
                self.state = ConnectionState::Authenticated;
                Ok(())
            }
            (ConnectionState::Authenticated, InboundEvent::Login { username }) => {
                self.relay.rename(self.id, username).await;
                Ok(())
            }
            (ConnectionState::Connected, InboundEvent::ChatMessage { .. }) => {
                Err(ProtocolViolation::ChatBeforeLogin)
            }
            (ConnectionState::Authenticated, InboundEvent::ChatMessage { text }) => {
                let report = self.relay.chat(self.id, text).await?;
                if report.failed > 0 {
                    debug!(
                        "Chat from {} reached {} of {} connection(s)",
                        self.id,
                        report.delivered,
                        report.delivered + report.failed
                    );
                }
                Ok(())
            }
        }
    }

    /// Transport closed. Always releases this connection's registry entry.
    pub async fn close(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        self.relay.leave(self.id).await;
        self.state = ConnectionState::Closed;
    }

    fn reject(&mut self, error: &InboundError) -> Flow {
        self.violations += 1;
        warn!(
            "Dropped payload from {} ({} violation(s)): {}",
            self.id, self.violations, error
        );

        if let Err(e) =
            Broadcaster::send_to(self.outbound.as_ref(), &OutboundEvent::error(error.to_string()))
        {
            debug!("Could not notify {} of rejected payload: {}", self.id, e);
        }

        let limit = self.relay.policy().max_violations;
        if limit > 0 && self.violations >= limit {
            warn!("Closing {} after {} violation(s)", self.id, self.violations);
            Flow::Disconnect
        } else {
            Flow::Continue
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        // Dropped without close(), e.g. its task was cancelled.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let relay = Arc::clone(&self.relay);
            let id = self.id;
            handle.spawn(async move {
                relay.leave(id).await;
            });
        } else {
            warn!("Session {} dropped outside a runtime; entry not released", self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbound::QueueSender;
    use crate::relay::Policy;
    use serde_json::{json, Value};
    use tokio::sync::mpsc::Receiver;
    use warp::ws::Message;

    struct Client {
        session: Session,
        rx: Receiver<Message>,
    }

    impl Client {
        fn connect(relay: &Arc<Relay>) -> Self {
            let (queue, rx) = QueueSender::channel(32);
            Client {
                session: Session::new(Arc::clone(relay), Arc::new(queue)),
                rx,
            }
        }

        async fn send(&mut self, value: Value) -> Flow {
            self.session
                .handle_payload(value.to_string().as_bytes())
                .await
        }

        fn drain(&mut self) -> Vec<Value> {
            let mut received = Vec::new();
            while let Ok(message) = self.rx.try_recv() {
                if let Ok(text) = message.to_str() {
                    received.push(serde_json::from_str(text).unwrap());
                }
            }
            received
        }
    }

    fn login(name: &str) -> Value {
        json!({"type": "login", "username": name})
    }

    fn chat(text: &str) -> Value {
        json!({"type": "chat_message", "message": text})
    }

    #[tokio::test]
    async fn full_room_scenario() {
        let relay = Arc::new(Relay::default());
        let mut a = Client::connect(&relay);
        let mut b = Client::connect(&relay);

        a.send(login("alice")).await;
        assert_eq!(a.session.state(), ConnectionState::Authenticated);
        assert_eq!(
            a.drain(),
            vec![
                json!({"type": "announcement", "message": "alice joined"}),
                json!({"type": "user_list", "users": ["alice"]}),
            ]
        );
        assert!(b.drain().is_empty());

        b.send(login("bob")).await;
        let expected = vec![
            json!({"type": "announcement", "message": "bob joined"}),
            json!({"type": "user_list", "users": ["alice", "bob"]}),
        ];
        assert_eq!(a.drain(), expected);
        assert_eq!(b.drain(), expected);

        a.send(chat("hi")).await;
        let expected = vec![json!({"type": "chat_message", "sender": "alice", "message": "hi"})];
        assert_eq!(a.drain(), expected);
        assert_eq!(b.drain(), expected);

        a.session.close().await;
        assert_eq!(a.session.state(), ConnectionState::Closed);
        assert_eq!(
            b.drain(),
            vec![
                json!({"type": "announcement", "message": "alice left"}),
                json!({"type": "user_list", "users": ["bob"]}),
            ]
        );
        assert_eq!(relay.registry().snapshot().await, vec!["bob"]);

        // A second release of the same connection is silent.
        assert_eq!(relay.leave(a.session.id()).await, None);
        assert!(b.drain().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_sessions_see_consistent_lists() {
        const CLIENTS: usize = 40;
        let relay = Arc::new(Relay::default());

        let tasks: Vec<_> = (0..CLIENTS)
            .map(|i| {
                let relay = Arc::clone(&relay);
                tokio::spawn(async move {
                    let (queue, rx) = QueueSender::channel(1024);
                    let mut session = Session::new(relay, Arc::new(queue));
                    let name = format!("user-{i}");
                    session
                        .handle_payload(login(&name).to_string().as_bytes())
                        .await;
                    session
                        .handle_payload(chat("hello").to_string().as_bytes())
                        .await;
                    tokio::task::yield_now().await;
                    session.close().await;
                    (name, rx)
                })
            })
            .collect();

        for task in tasks {
            let (name, mut rx) = task.await.unwrap();
            let mut events = Vec::new();
            while let Ok(message) = rx.try_recv() {
                if let Ok(text) = message.to_str() {
                    events.push(serde_json::from_str::<Value>(text).unwrap());
                }
            }

            assert_eq!(
                events[0],
                json!({"type": "announcement", "message": format!("{name} joined")})
            );
            assert!(events.contains(&json!({
                "type": "chat_message",
                "sender": name,
                "message": "hello",
            })));
            crate::relay::tests::assert_lists_follow_announcements(&events);
        }

        assert!(relay.registry().is_empty().await);
    }

    #[tokio::test]
    async fn chat_before_login_is_not_broadcast() {
        let relay = Arc::new(Relay::default());
        let mut a = Client::connect(&relay);
        let mut watcher = Client::connect(&relay);
        watcher.send(login("watcher")).await;
        watcher.drain();

        assert_eq!(a.send(chat("early")).await, Flow::Continue);
        assert_eq!(a.session.state(), ConnectionState::Connected);
        assert_eq!(a.session.violations(), 1);
        assert_eq!(
            a.drain(),
            vec![json!({"type": "error", "message": "Chat message sent before login"})]
        );
        assert!(watcher.drain().is_empty());
    }

    #[tokio::test]
    async fn second_login_is_a_silent_rename() {
        let relay = Arc::new(Relay::default());
        let mut a = Client::connect(&relay);
        let mut b = Client::connect(&relay);
        a.send(login("alice")).await;
        b.send(login("bob")).await;
        a.drain();
        b.drain();

        a.send(login("alicia")).await;
        assert_eq!(
            b.drain(),
            vec![json!({"type": "user_list", "users": ["alicia", "bob"]})]
        );

        b.send(chat("hey")).await;
        a.send(chat("yo")).await;
        assert_eq!(
            b.drain(),
            vec![
                json!({"type": "chat_message", "sender": "bob", "message": "hey"}),
                json!({"type": "chat_message", "sender": "alicia", "message": "yo"}),
            ]
        );
    }

    #[tokio::test]
    async fn unauthenticated_connections_never_listed() {
        let relay = Arc::new(Relay::default());
        let mut lurker_one = Client::connect(&relay);
        let mut lurker_two = Client::connect(&relay);
        let mut a = Client::connect(&relay);

        a.send(login("alice")).await;
        lurker_one.session.close().await;
        lurker_two.session.close().await;

        assert_eq!(relay.registry().snapshot().await, vec!["alice"]);
        assert!(lurker_one.drain().is_empty());
        assert!(lurker_two.drain().is_empty());
        assert_eq!(
            a.drain(),
            vec![
                json!({"type": "announcement", "message": "alice joined"}),
                json!({"type": "user_list", "users": ["alice"]}),
            ]
        );
    }

    #[tokio::test]
    async fn malformed_payload_keeps_state() {
        let relay = Arc::new(Relay::default());
        let mut a = Client::connect(&relay);
        a.send(login("alice")).await;
        a.drain();

        let flow = a.session.handle_payload(b"{not json").await;
        assert_eq!(flow, Flow::Continue);
        assert_eq!(a.session.state(), ConnectionState::Authenticated);

        let notices = a.drain();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0]["type"], "error");
        assert_eq!(relay.registry().snapshot().await, vec!["alice"]);
    }

    #[tokio::test]
    async fn empty_username_is_rejected() {
        let relay = Arc::new(Relay::default());
        let mut a = Client::connect(&relay);
        a.send(login("   ")).await;
        assert_eq!(a.session.state(), ConnectionState::Connected);
        assert!(relay.registry().is_empty().await);
        assert_eq!(
            a.drain(),
            vec![json!({"type": "error", "message": "Username must not be empty"})]
        );
    }

    #[tokio::test]
    async fn repeated_violations_disconnect() {
        let relay = Arc::new(Relay::new(Policy { max_violations: 2 }));
        let mut a = Client::connect(&relay);
        assert_eq!(a.send(chat("one")).await, Flow::Continue);
        assert_eq!(a.send(chat("two")).await, Flow::Disconnect);
    }

    #[tokio::test]
    async fn zero_limit_never_disconnects() {
        let relay = Arc::new(Relay::new(Policy { max_violations: 0 }));
        let mut a = Client::connect(&relay);
        for _ in 0..20 {
            assert_eq!(a.session.handle_payload(b"garbage").await, Flow::Continue);
        }
    }

    #[tokio::test]
    async fn dropping_an_open_session_releases_it() {
        let relay = Arc::new(Relay::default());
        let mut a = Client::connect(&relay);
        a.send(login("alice")).await;
        assert_eq!(relay.registry().len().await, 1);

        drop(a);
        for _ in 0..50 {
            if relay.registry().is_empty().await {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(relay.registry().is_empty().await);
    }
}
