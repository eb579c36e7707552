//! Fuzz target for the [`ConnectionManager`] state machine
//!
//! Prevent lost frames and runaway reconnection via unexpected event orders
//!
//! # Strategy
//!
//! - Event sequences: arbitrary interleavings of commands, channel events,
//!   clock advances and credential changes
//! - Stale channels: events stamped with an old generation
//! - Transport faults: failed opens and failed sends
//!
//! # Invariants
//!
//! - A reconnection deadline exists iff the state is `Reconnecting`
//! - `Reconnecting` never exceeds the attempt budget
//! - `Connected` implies an empty pending queue
//! - `disconnect` leaves `Closing` or `Disconnected`, no queue, attempt 0
//! - The generation never decreases
//! - `ReconnectExhausted` is reported at most once per `connect`
//! - Every queued frame is either flushed, dropped by `disconnect`, or still
//!   queued (nothing vanishes)
//! - NEVER panic on any sequence

#![no_main]

use std::time::Duration;

use arbitrary::Arbitrary;
use collab_core::{
    ChannelEvent, ChannelEventKind, ConnectionConfig, ConnectionEvent, ConnectionManager,
    ConnectionState, Environment, ReconnectPolicy, SessionError, TransportError,
};
use collab_harness::{SimConnector, SimEnv, SimTokens};
use collab_proto::{CloseCode, Frame};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Clone, Arbitrary)]
enum FuzzEvent {
    Connect,
    Send { content: u8 },
    SendFirst { content: u8 },
    Disconnect,
    Open { stale: bool },
    Text { valid: bool, raw: String },
    Binary(Vec<u8>),
    Close { code: u16, stale: bool },
    Error { auth: bool },
    Advance { millis: u16 },
    AdvanceToDeadline,
    ExpireToken,
    SignOut,
    RestoreToken,
    FailNextOpen { auth: bool },
    FailNextSends { count: u8 },
}

#[derive(Debug, Clone, Arbitrary)]
struct FuzzInput {
    max_attempts: u8,
    base_delay_ms: u16,
    events: Vec<FuzzEvent>,
}

type Manager = ConnectionManager<SimEnv, SimConnector, SimTokens>;

fuzz_target!(|input: FuzzInput| {
    let policy = ReconnectPolicy {
        base_delay: Duration::from_millis(u64::from(input.base_delay_ms.max(1))),
        max_delay: Duration::from_secs(30),
        max_attempts: u32::from(input.max_attempts % 8),
    };
    let config = ConnectionConfig { endpoint: "ws://fuzz".to_string(), policy };

    let env = SimEnv::new();
    let connector = SimConnector::new();
    let tokens = SimTokens::new("fuzz-token");
    let mut manager: Manager =
        ConnectionManager::new(env.clone(), connector.clone(), tokens.clone(), config);

    let mut exhausted_reports = 0usize;
    let mut accepted = 0usize;
    let mut dropped = 0usize;

    for event in input.events {
        let generation_before = manager.generation();

        let events = match event {
            FuzzEvent::Connect => {
                exhausted_reports = 0;
                let _ = manager.connect("room");
                manager.take_events()
            },
            FuzzEvent::Send { content } => {
                if manager.send(frame(content)).is_ok() {
                    accepted += 1;
                }
                manager.take_events()
            },
            FuzzEvent::SendFirst { content } => {
                if manager.send_first(frame(content)).is_ok() {
                    accepted += 1;
                }
                manager.take_events()
            },
            FuzzEvent::Disconnect => {
                let queued = manager.pending_len();
                manager.disconnect();
                assert!(matches!(
                    manager.state(),
                    ConnectionState::Closing | ConnectionState::Disconnected
                ));
                assert_eq!(manager.pending_len(), 0);
                assert_eq!(manager.attempt(), 0);
                assert_eq!(manager.next_deadline(), None);
                dropped += queued;
                manager.take_events()
            },
            FuzzEvent::Open { stale } => {
                manager.handle_channel_event(stamp(&manager, stale, ChannelEventKind::Opened))
            },
            FuzzEvent::Text { valid, raw } => {
                let text = if valid { frame(0).encode().unwrap_or(raw) } else { raw };
                manager.handle_channel_event(stamp(&manager, false, ChannelEventKind::Text(text)))
            },
            FuzzEvent::Binary(bytes) => {
                let kind = ChannelEventKind::Binary(bytes);
                manager.handle_channel_event(stamp(&manager, false, kind))
            },
            FuzzEvent::Close { code, stale } => {
                let kind =
                    ChannelEventKind::Closed { code: CloseCode(code), reason: String::new() };
                manager.handle_channel_event(stamp(&manager, stale, kind))
            },
            FuzzEvent::Error { auth } => {
                let error = if auth {
                    TransportError::Unauthorized { reason: "fuzz".to_string() }
                } else {
                    TransportError::Connect { reason: "fuzz".to_string() }
                };
                manager.handle_channel_event(stamp(&manager, false, ChannelEventKind::Error(error)))
            },
            FuzzEvent::Advance { millis } => {
                env.advance(Duration::from_millis(u64::from(millis)));
                manager.tick(env.now())
            },
            FuzzEvent::AdvanceToDeadline => match manager.next_deadline() {
                Some(deadline) => {
                    env.advance(deadline - env.now());
                    manager.tick(env.now())
                },
                None => Vec::new(),
            },
            FuzzEvent::ExpireToken => {
                tokens.expire();
                Vec::new()
            },
            FuzzEvent::SignOut => {
                tokens.set(None);
                Vec::new()
            },
            FuzzEvent::RestoreToken => {
                tokens.set(Some("fuzz-token"));
                Vec::new()
            },
            FuzzEvent::FailNextOpen { auth } => {
                let error = if auth {
                    TransportError::Unauthorized { reason: "fuzz".to_string() }
                } else {
                    TransportError::Connect { reason: "fuzz".to_string() }
                };
                connector.fail_next_open(error);
                Vec::new()
            },
            FuzzEvent::FailNextSends { count } => {
                connector.fail_next_sends(usize::from(count % 4));
                Vec::new()
            },
        };

        exhausted_reports += events
            .iter()
            .filter(|e| {
                matches!(e, ConnectionEvent::Error(SessionError::ReconnectExhausted { .. }))
            })
            .count();
        assert!(exhausted_reports <= 1, "exhaustion reported {exhausted_reports} times");

        assert!(manager.generation() >= generation_before, "generation went backwards");
        assert_eq!(
            accepted,
            connector.sent_texts().len() + dropped + manager.pending_len(),
            "accepted frames unaccounted for"
        );
        check_invariants(&manager, policy);
    }
});

fn frame(content: u8) -> Frame {
    Frame::CodeUpdate {
        room: "room".to_string(),
        code: format!("v{content}"),
        username: "fuzz".to_string(),
    }
}

/// Event for the current channel, or for the one before it.
fn stamp(manager: &Manager, stale: bool, kind: ChannelEventKind) -> ChannelEvent {
    let mut generation = manager.generation();
    if stale {
        generation.0 = generation.0.wrapping_sub(1);
    }
    ChannelEvent::new(generation, kind)
}

fn check_invariants(manager: &Manager, policy: ReconnectPolicy) {
    let state = manager.state();

    assert_eq!(
        manager.next_deadline().is_some(),
        state == ConnectionState::Reconnecting,
        "deadline/state mismatch in {state:?}"
    );

    if state == ConnectionState::Reconnecting {
        assert!(manager.attempt() >= 1);
        assert!(policy.allows(manager.attempt()), "attempt {} over budget", manager.attempt());
    }

    if state == ConnectionState::Connected {
        assert_eq!(manager.pending_len(), 0, "Connected with a non-empty queue");
    }

    if manager.room_id().is_none() {
        assert!(matches!(state, ConnectionState::Disconnected | ConnectionState::Closing));
    }
}
