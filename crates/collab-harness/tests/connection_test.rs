//! Connection manager tests

use std::time::Duration;

use collab_core::{
    ChannelEvent, ChannelEventKind, ConnectionConfig, ConnectionEvent, ConnectionManager,
    ConnectionState, Environment, ErrorKind, SendOutcome, SessionError, TransportError,
};
use collab_harness::{SimConnector, SimEnv, SimTokens};
use collab_proto::{CloseCode, EventType, Frame};

type Manager = ConnectionManager<SimEnv, SimConnector, SimTokens>;

struct World {
    manager: Manager,
    env: SimEnv,
    connector: SimConnector,
    tokens: SimTokens,
}

impl World {
    fn new() -> Self {
        let env = SimEnv::new();
        let connector = SimConnector::new();
        let tokens = SimTokens::new("abc123");
        let manager = ConnectionManager::new(
            env.clone(),
            connector.clone(),
            tokens.clone(),
            ConnectionConfig::new("ws://host"),
        );
        Self { manager, env, connector, tokens }
    }

    fn event(&mut self, kind: ChannelEventKind) -> Vec<ConnectionEvent> {
        let generation = self.manager.generation();
        self.manager.handle_channel_event(ChannelEvent::new(generation, kind))
    }

    fn open(&mut self) -> Vec<ConnectionEvent> {
        self.event(ChannelEventKind::Opened)
    }

    fn close(&mut self, code: u16) -> Vec<ConnectionEvent> {
        self.event(ChannelEventKind::Closed { code: CloseCode(code), reason: String::new() })
    }

    fn advance(&mut self, by: Duration) -> Vec<ConnectionEvent> {
        self.env.advance(by);
        self.manager.tick(self.env.now())
    }

    fn connected(room: &str) -> Self {
        let mut world = Self::new();
        world.manager.connect(room).unwrap();
        world.open();
        assert_eq!(world.manager.state(), ConnectionState::Connected);
        world
    }
}

fn joined(name: &str) -> Frame {
    Frame::UserJoined { username: name.to_string() }
}

fn error_kinds(events: &[ConnectionEvent]) -> Vec<ErrorKind> {
    events
        .iter()
        .filter_map(|e| match e {
            ConnectionEvent::Error(err) => Some(err.kind()),
            _ => None,
        })
        .collect()
}

fn reconnect_delays(events: &[ConnectionEvent]) -> Vec<Duration> {
    events
        .iter()
        .filter_map(|e| match e {
            ConnectionEvent::Reconnecting { delay, .. } => Some(*delay),
            _ => None,
        })
        .collect()
}

#[test]
fn connect_targets_room_with_token() {
    let mut world = World::new();
    world.manager.connect("demo-room").unwrap();

    assert_eq!(world.connector.urls(), vec!["ws://host/ws/chat/group/demo-room?token=abc123"]);
    assert_eq!(world.manager.state(), ConnectionState::Connecting);
    assert_eq!(world.manager.room_id(), Some("demo-room"));
}

#[tokio::test]
async fn pending_open_resolves_on_open() {
    let mut world = World::new();
    let pending = world.manager.connect("demo").unwrap();

    let events = world.open();
    assert!(matches!(
        events.as_slice(),
        [ConnectionEvent::Opened { reconnected: false, flushed: 0, .. }]
    ));
    assert_eq!(pending.await, Ok(()));
}

#[test]
fn missing_token_fails_without_opening() {
    let mut world = World::new();
    world.tokens.set(None);

    let result = world.manager.connect("demo");
    assert!(matches!(result, Err(SessionError::Auth { .. })));
    assert_eq!(world.connector.open_count(), 0);
    assert_eq!(world.manager.state(), ConnectionState::Disconnected);
}

#[test]
fn expired_token_fails_without_opening() {
    let mut world = World::new();
    world.tokens.expire();

    let result = world.manager.connect("demo");
    assert_eq!(result.map(|_| ()).map_err(|e| e.kind()), Err(ErrorKind::Auth));
    assert_eq!(world.connector.open_count(), 0);
}

#[test]
fn sends_while_disconnected_flush_in_order_on_open() {
    let mut world = World::new();
    for name in ["a", "b", "a"] {
        assert_eq!(world.manager.send(joined(name)), Ok(SendOutcome::Queued));
    }
    assert_eq!(world.manager.pending_len(), 3);

    world.manager.connect("demo").unwrap();
    assert!(world.connector.sent_frames().is_empty());

    let events = world.open();
    assert!(matches!(events.as_slice(), [ConnectionEvent::Opened { flushed: 3, .. }]));
    assert_eq!(world.manager.pending_len(), 0);

    assert_eq!(world.manager.send(joined("c")), Ok(SendOutcome::Sent));
    assert_eq!(
        world.connector.sent_frames(),
        vec![joined("a"), joined("b"), joined("a"), joined("c")]
    );
}

#[test]
fn normal_close_does_not_reconnect() {
    let mut world = World::connected("demo-room");

    let events = world.close(1000);
    assert!(events.contains(&ConnectionEvent::Closed {
        code: CloseCode::NORMAL,
        reason: String::new()
    }));
    assert_eq!(world.manager.state(), ConnectionState::Disconnected);
    assert_eq!(world.manager.next_deadline(), None);

    world.advance(Duration::from_secs(120));
    assert_eq!(world.connector.open_count(), 1);
}

#[test]
fn abnormal_close_reconnects_after_base_delay() {
    let mut world = World::connected("demo-room");

    let events = world.close(1006);
    assert_eq!(reconnect_delays(&events), vec![Duration::from_millis(1000)]);
    assert_eq!(error_kinds(&events), vec![ErrorKind::Transport]);
    assert_eq!(world.manager.state(), ConnectionState::Reconnecting);

    world.advance(Duration::from_millis(999));
    assert_eq!(world.connector.open_count(), 1);

    world.advance(Duration::from_millis(1));
    assert_eq!(world.connector.open_count(), 2);
    assert_eq!(world.manager.state(), ConnectionState::Connecting);
    assert_eq!(
        world.connector.urls()[1],
        "ws://host/ws/chat/group/demo-room?token=abc123"
    );

    let events = world.open();
    assert!(matches!(events.as_slice(), [ConnectionEvent::Opened { reconnected: true, .. }]));
    assert_eq!(world.manager.attempt(), 0);
}

#[test]
fn backoff_doubles_then_gives_up_once() {
    let mut world = World::connected("demo");

    let mut delays = reconnect_delays(&world.close(1006));
    let mut exhausted = 0;

    for _ in 0..10 {
        let Some(deadline) = world.manager.next_deadline() else {
            break;
        };
        let wait = deadline - world.env.now();
        world.advance(wait);

        let events = world.event(ChannelEventKind::Error(TransportError::Connect {
            reason: "refused".to_string(),
        }));
        delays.extend(reconnect_delays(&events));
        exhausted += error_kinds(&events)
            .iter()
            .filter(|k| **k == ErrorKind::ReconnectExhausted)
            .count();
    }

    let millis: Vec<u128> = delays.iter().map(Duration::as_millis).collect();
    assert_eq!(millis, vec![1000, 2000, 4000, 8000, 16000]);
    assert_eq!(exhausted, 1);
    assert_eq!(world.connector.open_count(), 6);
    assert_eq!(world.manager.state(), ConnectionState::Disconnected);
    assert_eq!(world.manager.next_deadline(), None);

    world.advance(Duration::from_secs(600));
    assert_eq!(world.connector.open_count(), 6);
}

#[test]
fn auth_close_codes_are_fatal() {
    for code in [1008, 4003] {
        let mut world = World::connected("demo");

        let events = world.close(code);
        assert_eq!(error_kinds(&events), vec![ErrorKind::Auth], "code {code}");
        assert!(reconnect_delays(&events).is_empty());
        assert_eq!(world.manager.state(), ConnectionState::Disconnected);
        assert_eq!(world.manager.next_deadline(), None);
    }
}

#[test]
fn unauthorized_transport_error_suppresses_reconnect() {
    let mut world = World::new();
    let mut pending = world.manager.connect("demo").unwrap();

    let events = world.event(ChannelEventKind::Error(TransportError::Unauthorized {
        reason: "HTTP 403".to_string(),
    }));
    assert_eq!(error_kinds(&events), vec![ErrorKind::Auth]);
    assert_eq!(world.manager.next_deadline(), None);
    assert!(matches!(pending.try_result(), Some(Err(SessionError::Auth { .. }))));
}

#[test]
fn first_open_failure_rejects_pending_and_keeps_retrying() {
    let mut world = World::new();
    world.connector.fail_next_open(TransportError::Connect { reason: "refused".to_string() });

    let mut pending = world.manager.connect("demo").unwrap();
    assert!(matches!(pending.try_result(), Some(Err(SessionError::Transport(_)))));
    assert_eq!(world.manager.state(), ConnectionState::Reconnecting);
    assert_eq!(reconnect_delays(&world.manager.take_events()), vec![Duration::from_millis(1000)]);

    world.advance(Duration::from_millis(1000));
    assert_eq!(world.connector.open_count(), 2);
}

#[test]
fn disconnect_then_connect_resets_attempts() {
    let mut world = World::connected("demo");
    world.close(1006);
    world.advance(Duration::from_millis(1000));
    world.event(ChannelEventKind::Error(TransportError::Connect { reason: "refused".to_string() }));
    assert_eq!(world.manager.attempt(), 2);

    world.manager.disconnect();
    assert_eq!(world.manager.attempt(), 0);
    assert_eq!(world.manager.state(), ConnectionState::Disconnected);
    assert_eq!(world.manager.next_deadline(), None);

    world.manager.connect("demo").unwrap();
    let events = world.close(1006);
    assert_eq!(reconnect_delays(&events), vec![Duration::from_millis(1000)]);
}

#[test]
fn disconnect_closes_normally_and_waits_for_confirmation() {
    let mut world = World::connected("demo");
    world.manager.send(joined("a")).unwrap();
    let generation = world.manager.generation();

    world.manager.disconnect();
    assert_eq!(world.manager.state(), ConnectionState::Closing);
    assert_eq!(
        world.connector.closes(),
        vec![(generation, CloseCode::NORMAL, "client disconnect".to_string())]
    );
    assert_eq!(world.manager.dispatcher().handler_count(), 0);

    world.manager.disconnect();
    assert_eq!(world.connector.closes().len(), 1);

    let events = world.close(1000);
    assert!(error_kinds(&events).is_empty());
    assert_eq!(world.manager.state(), ConnectionState::Disconnected);

    world.advance(Duration::from_secs(60));
    assert_eq!(world.connector.open_count(), 1);
}

#[test]
fn disconnect_clears_queue_and_cancels_pending_open() {
    let mut world = World::new();
    world.manager.send(joined("a")).unwrap();
    let mut pending = world.manager.connect("demo").unwrap();

    world.manager.disconnect();
    assert_eq!(world.manager.pending_len(), 0);
    assert_eq!(pending.try_result(), Some(Err(SessionError::Cancelled)));
}

#[test]
fn sends_during_backoff_flush_on_reconnect() {
    let mut world = World::connected("demo");
    world.close(1011);
    assert_eq!(world.manager.send(joined("late")), Ok(SendOutcome::Queued));

    world.advance(Duration::from_millis(1000));
    let events = world.open();
    assert!(matches!(events.as_slice(), [ConnectionEvent::Opened { flushed: 1, .. }]));

    let generation = world.manager.generation();
    assert_eq!(world.connector.sent_frames_on(generation), vec![joined("late")]);
}

#[test]
fn stale_generation_events_are_ignored() {
    let mut world = World::new();
    let mut first = world.manager.connect("one").unwrap();
    let old = world.manager.generation();

    world.manager.connect("two").unwrap();
    assert_eq!(first.try_result(), Some(Err(SessionError::Cancelled)));
    assert!(world.manager.generation() > old);

    let events =
        world.manager.handle_channel_event(ChannelEvent::new(old, ChannelEventKind::Opened));
    assert!(events.is_empty());
    assert_eq!(world.manager.state(), ConnectionState::Connecting);

    let events = world.manager.handle_channel_event(ChannelEvent::new(
        old,
        ChannelEventKind::Closed { code: CloseCode::ABNORMAL, reason: String::new() },
    ));
    assert!(events.is_empty());
    assert_eq!(world.manager.next_deadline(), None);
}

#[test]
fn connect_tears_down_previous_channel() {
    let mut world = World::connected("one");
    let old = world.manager.generation();

    world.manager.connect("two").unwrap();
    assert_eq!(
        world.connector.closes().first().map(|c| (c.0, c.1)),
        Some((old, CloseCode::NORMAL))
    );
    assert_eq!(world.connector.open_count(), 2);
    assert_eq!(world.manager.room_id(), Some("two"));
}

#[test]
fn malformed_frames_are_dropped_without_closing() {
    let mut world = World::connected("demo");
    let seen = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
    let sink = seen.clone();
    world.manager.dispatcher().subscribe_to(EventType::UserJoined, move |frame| {
        sink.borrow_mut().push(frame.clone());
        Ok(())
    });

    let events = world.event(ChannelEventKind::Text("{not json".to_string()));
    assert_eq!(error_kinds(&events), vec![ErrorKind::Protocol]);
    let events = world.event(ChannelEventKind::Binary(vec![1, 2, 3]));
    assert_eq!(error_kinds(&events), vec![ErrorKind::Protocol]);
    assert_eq!(world.manager.state(), ConnectionState::Connected);

    world.event(ChannelEventKind::Text(joined("eve").encode().unwrap()));
    assert_eq!(*seen.borrow(), vec![joined("eve")]);
}

#[test]
fn failed_send_queues_frame_and_reconnects() {
    let mut world = World::connected("demo");
    world.connector.fail_next_sends(1);

    assert_eq!(world.manager.send(joined("a")), Ok(SendOutcome::Queued));
    assert_eq!(world.manager.state(), ConnectionState::Reconnecting);
    assert_eq!(world.manager.pending_len(), 1);
    assert_eq!(error_kinds(&world.manager.take_events()), vec![ErrorKind::Transport]);

    world.advance(Duration::from_millis(1000));
    world.open();
    assert_eq!(world.connector.sent_frames(), vec![joined("a")]);
}

#[test]
fn interrupted_flush_keeps_order_for_next_open() {
    let mut world = World::new();
    for name in ["a", "b", "c"] {
        world.manager.send(joined(name)).unwrap();
    }
    world.manager.connect("demo").unwrap();
    world.connector.fail_next_sends(1);

    let events = world.open();
    assert_eq!(error_kinds(&events), vec![ErrorKind::Transport]);
    assert_eq!(world.manager.pending_len(), 3);

    world.advance(Duration::from_millis(1000));
    world.open();
    assert_eq!(world.connector.sent_frames(), vec![joined("a"), joined("b"), joined("c")]);
}

#[test]
fn credential_refetched_before_each_attempt() {
    let mut world = World::connected("demo");
    let fetches = world.tokens.fetches();

    world.tokens.set(Some("fresh"));
    world.close(1006);
    world.advance(Duration::from_millis(1000));

    assert_eq!(world.tokens.fetches(), fetches + 1);
    assert_eq!(world.connector.urls()[1], "ws://host/ws/chat/group/demo?token=fresh");
}

#[test]
fn expired_credential_ends_reconnection() {
    let mut world = World::connected("demo");
    world.close(1006);

    world.tokens.expire();
    let events = world.advance(Duration::from_millis(1000));
    assert_eq!(error_kinds(&events), vec![ErrorKind::Auth]);
    assert_eq!(world.connector.open_count(), 1);
    assert_eq!(world.manager.state(), ConnectionState::Disconnected);
}

#[test]
fn text_before_open_is_not_dispatched() {
    let mut world = World::new();
    world.manager.connect("demo").unwrap();
    let count = std::rc::Rc::new(std::cell::Cell::new(0));
    let c = count.clone();
    world.manager.dispatcher().subscribe(move |_| {
        c.set(c.get() + 1);
        Ok(())
    });

    world.event(ChannelEventKind::Text(joined("x").encode().unwrap()));
    assert_eq!(count.get(), 0);
}
