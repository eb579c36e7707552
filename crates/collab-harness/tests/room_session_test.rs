//! Room session tests

use std::time::Duration;

use chrono::{TimeZone, Utc};
use collab_client::{EntryStatus, Membership, SessionEvent};
use collab_core::{ConnectionState, ErrorKind, SendOutcome, SessionError};
use collab_harness::Scenario;
use collab_proto::Frame;

fn join_frame(room: &str, username: &str) -> Frame {
    Frame::JoinRoom { room: room.to_string(), username: username.to_string() }
}

fn connected_and_joined() -> Scenario {
    let mut sc = Scenario::new();
    sc.session.connect("demo").unwrap();
    sc.open();
    sc.session.join("demo", "ada").unwrap();
    sc.deliver(&Frame::RoomJoined {});
    assert_eq!(sc.session.membership(), Membership::Joined);
    sc.drain_events();
    sc
}

/// Drop the channel and let every reconnection attempt fail.
fn exhaust(sc: &mut Scenario) {
    sc.close(1006);
    while sc.advance_to_deadline().is_some() {
        sc.close(1006);
    }
}

#[test]
fn join_then_room_joined_flips_once() {
    let mut sc = Scenario::new();
    sc.session.connect("demo").unwrap();
    sc.open();

    assert_eq!(sc.session.join("demo", "ada"), Ok(SendOutcome::Sent));
    assert_eq!(sc.session.membership(), Membership::Joining);
    assert_eq!(sc.session.room(), Some("demo".to_string()));

    sc.deliver(&Frame::RoomJoined {});
    sc.deliver(&Frame::RoomJoined {});
    assert_eq!(sc.session.membership(), Membership::Joined);

    let changes: Vec<_> = sc
        .drain_events()
        .into_iter()
        .filter(|e| matches!(e, SessionEvent::MembershipChanged(_)))
        .collect();
    assert_eq!(
        changes,
        vec![
            SessionEvent::MembershipChanged(Membership::Joining),
            SessionEvent::MembershipChanged(Membership::Joined),
        ]
    );
    assert_eq!(sc.connector.sent_frames(), vec![join_frame("demo", "ada")]);
}

#[test]
fn join_before_open_is_flushed_on_open() {
    let mut sc = Scenario::new();
    assert_eq!(sc.session.join("demo", "ada"), Ok(SendOutcome::Queued));
    sc.session.connect("demo").unwrap();
    assert!(sc.connector.sent_frames().is_empty());

    sc.open();
    assert_eq!(sc.connector.sent_frames(), vec![join_frame("demo", "ada")]);
}

#[test]
fn code_update_fully_replaces_buffer() {
    let mut sc = connected_and_joined();
    sc.session.update_code("A").unwrap();
    assert_eq!(sc.session.code(), "A");

    sc.deliver(&Frame::CodeUpdate {
        room: "demo".to_string(),
        code: "B".to_string(),
        username: "bob".to_string(),
    });
    assert_eq!(sc.session.code(), "B");

    let events = sc.drain_events();
    assert_eq!(
        events,
        vec![
            SessionEvent::CodeChanged("A".to_string()),
            SessionEvent::CodeChanged("B".to_string()),
        ]
    );
}

#[test]
fn roster_tracks_presence_frames() {
    let mut sc = connected_and_joined();
    sc.deliver(&Frame::UserList {
        users: vec!["ada".to_string(), "bob".to_string(), "ada".to_string()],
    });
    sc.deliver(&Frame::UserJoined { username: "eve".to_string() });
    sc.deliver(&Frame::UserLeft { username: "bob".to_string() });

    assert_eq!(sc.session.roster(), vec!["ada".to_string(), "eve".to_string()]);
    let last_roster = sc.drain_events().into_iter().rev().find_map(|e| match e {
        SessionEvent::RosterChanged(users) => Some(users),
        _ => None,
    });
    assert_eq!(last_roster, Some(vec!["ada".to_string(), "eve".to_string()]));
}

#[test]
fn chat_is_provisional_until_echoed() {
    let mut sc = connected_and_joined();
    sc.session.send_chat("hello").unwrap();

    let transcript = sc.session.transcript();
    assert_eq!(transcript.len(), 1);
    assert_eq!(transcript[0].status, EntryStatus::Provisional);
    assert_eq!(transcript[0].username, "ada");

    let sent = sc.connector.sent_frames();
    assert!(matches!(
        sent.last(),
        Some(Frame::ChatMessage { content, username, room, .. })
            if content == "hello" && username == "ada" && room == "demo"
    ));

    let server_time = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    sc.deliver(&Frame::ChatMessage {
        content: "hello".to_string(),
        room: "demo".to_string(),
        username: "ada".to_string(),
        timestamp: server_time,
    });

    let transcript = sc.session.transcript();
    assert_eq!(transcript.len(), 1);
    assert_eq!(transcript[0].status, EntryStatus::Confirmed);
    assert_eq!(transcript[0].timestamp, server_time);
}

#[test]
fn room_commands_need_a_room() {
    let mut sc = Scenario::new();
    sc.session.connect("demo").unwrap();
    sc.open();

    assert_eq!(sc.session.send_chat("hi"), Err(SessionError::NotInRoom));
    assert_eq!(sc.session.update_code("x"), Err(SessionError::NotInRoom));
    assert!(sc.connector.sent_frames().is_empty());
}

#[test]
fn leave_clears_state_even_when_queued() {
    let mut sc = connected_and_joined();
    sc.deliver(&Frame::UserJoined { username: "bob".to_string() });
    sc.session.update_code("draft").unwrap();

    sc.close(1006);
    assert_eq!(sc.session.leave("demo", "ada"), Ok(SendOutcome::Queued));

    assert_eq!(sc.session.membership(), Membership::Idle);
    assert!(sc.session.roster().is_empty());
    assert_eq!(sc.session.code(), "");
    assert_eq!(sc.session.room(), None);
}

#[test]
fn reconnect_rejoins_before_other_queued_frames() {
    let mut sc = connected_and_joined();

    sc.close(1006);
    assert_eq!(sc.session.membership(), Membership::Joining);
    sc.session.send_chat("while away").unwrap();

    sc.advance(Duration::from_millis(1000));
    sc.open();

    let generation = sc.generation();
    let resent = sc.connector.sent_frames_on(generation);
    assert_eq!(resent.len(), 2);
    assert_eq!(resent[0], join_frame("demo", "ada"));
    assert!(matches!(&resent[1], Frame::ChatMessage { content, .. } if content == "while away"));

    sc.deliver(&Frame::RoomJoined {});
    assert_eq!(sc.session.membership(), Membership::Joined);
}

#[test]
fn rejoin_queued_once_per_outage() {
    let mut sc = connected_and_joined();

    sc.close(1006);
    for _ in 0..3 {
        sc.advance_to_deadline();
        sc.close(1006);
    }
    assert_eq!(sc.session.manager().pending_len(), 1);

    sc.advance_to_deadline();
    sc.open();
    assert_eq!(sc.connector.sent_frames_on(sc.generation()), vec![join_frame("demo", "ada")]);
}

#[test]
fn lifecycle_events_are_published() {
    let mut sc = connected_and_joined();

    sc.close(1006);
    sc.advance(Duration::from_millis(1000));
    sc.open();

    let lifecycle: Vec<_> = sc
        .drain_events()
        .into_iter()
        .filter(|e| {
            matches!(
                e,
                SessionEvent::Opened { .. }
                    | SessionEvent::Closed { .. }
                    | SessionEvent::Reconnecting { .. }
            )
        })
        .collect();
    assert_eq!(
        lifecycle,
        vec![
            SessionEvent::Closed { code: collab_proto::CloseCode::ABNORMAL, reason: String::new() },
            SessionEvent::Reconnecting { attempt: 1, delay: Duration::from_millis(1000) },
            SessionEvent::Opened { reconnected: true },
        ]
    );
}

#[test]
fn auth_rejection_is_fatal_for_the_ui() {
    let mut sc = connected_and_joined();
    sc.close(1008);

    let fatal: Vec<_> = sc
        .drain_events()
        .into_iter()
        .filter_map(|e| match e {
            SessionEvent::Fatal { kind, .. } => Some(kind),
            _ => None,
        })
        .collect();
    assert_eq!(fatal, vec![ErrorKind::Auth]);
    assert_eq!(sc.session.membership(), Membership::Idle);
    assert_eq!(sc.session.next_deadline(), None);
}

#[test]
fn connect_without_token_is_fatal() {
    let mut sc = Scenario::new();
    sc.tokens.set(None);

    assert!(matches!(sc.session.connect("demo"), Err(SessionError::Auth { .. })));
    assert!(sc
        .drain_events()
        .iter()
        .any(|e| matches!(e, SessionEvent::Fatal { kind: ErrorKind::Auth, .. })));
    assert_eq!(sc.connector.open_count(), 0);
}

#[test]
fn exhaustion_is_reported_once() {
    let mut sc = connected_and_joined();
    sc.close(1006);
    while sc.advance_to_deadline().is_some() {
        sc.close(1006);
    }

    let exhausted = sc
        .drain_events()
        .iter()
        .filter(|e| matches!(e, SessionEvent::Fatal { kind: ErrorKind::ReconnectExhausted, .. }))
        .count();
    assert_eq!(exhausted, 1);
    assert_eq!(sc.session.connection_state(), ConnectionState::Disconnected);
}

#[test]
fn disconnect_clears_everything_and_reconnect_reinstalls_handlers() {
    let mut sc = connected_and_joined();
    sc.deliver(&Frame::UserJoined { username: "bob".to_string() });
    sc.session.send_chat("bye").unwrap();

    sc.session.disconnect();
    assert_eq!(sc.session.connection_state(), ConnectionState::Closing);
    assert!(sc.session.roster().is_empty());
    assert!(sc.session.transcript().is_empty());
    assert_eq!(sc.session.membership(), Membership::Idle);
    assert_eq!(sc.session.manager().dispatcher().handler_count(), 0);

    sc.close(1000);
    assert_eq!(sc.session.connection_state(), ConnectionState::Disconnected);

    sc.session.connect("demo").unwrap();
    assert!(sc.session.manager().dispatcher().handler_count() > 0);
    sc.open();
    sc.session.join("demo", "ada").unwrap();
    sc.deliver(&Frame::UserJoined { username: "eve".to_string() });
    assert_eq!(sc.session.roster(), vec!["eve".to_string()]);
}

#[test]
fn disconnect_then_connect_waits_base_delay_on_next_failure() {
    let mut sc = connected_and_joined();
    sc.close(1006);
    sc.advance_to_deadline();
    sc.close(1006);
    assert_eq!(sc.session.manager().attempt(), 2);

    sc.session.disconnect();
    sc.session.connect("demo").unwrap();
    sc.close(1006);
    assert_eq!(sc.advance_to_deadline(), Some(Duration::from_millis(1000)));
}

#[test]
fn unknown_frames_leave_state_alone() {
    let mut sc = connected_and_joined();
    sc.channel(collab_core::ChannelEventKind::Text(
        r#"{"event_type":"cursor_moved","line":4}"#.to_string(),
    ));
    assert!(sc.drain_events().is_empty());
    assert_eq!(sc.session.connection_state(), ConnectionState::Connected);
}

#[test]
fn connect_after_exhaustion_rejoins_the_room() {
    let mut sc = connected_and_joined();
    exhaust(&mut sc);
    assert_eq!(sc.session.membership(), Membership::Idle);
    assert_eq!(sc.session.manager().pending_len(), 1);

    sc.session.connect("demo").unwrap();
    assert_eq!(sc.session.membership(), Membership::Joining);
    assert_eq!(sc.session.manager().pending_len(), 1);

    sc.open();
    assert_eq!(sc.connector.sent_frames_on(sc.generation()), vec![join_frame("demo", "ada")]);

    sc.deliver(&Frame::RoomJoined {});
    assert_eq!(sc.session.membership(), Membership::Joined);
}

#[test]
fn connecting_elsewhere_forgets_the_abandoned_room() {
    let mut sc = connected_and_joined();
    exhaust(&mut sc);

    sc.session.connect("other").unwrap();
    assert_eq!(sc.session.room(), None);
    assert_eq!(sc.session.membership(), Membership::Idle);
    assert_eq!(sc.session.manager().pending_len(), 0);

    sc.open();
    assert!(sc.connector.sent_frames_on(sc.generation()).is_empty());
}

#[test]
fn server_normal_close_leaves_the_room() {
    let mut sc = connected_and_joined();
    sc.deliver(&Frame::UserJoined { username: "bob".to_string() });
    sc.drain_events();

    sc.close(1000);
    assert_eq!(sc.session.connection_state(), ConnectionState::Disconnected);
    assert_eq!(sc.session.next_deadline(), None);
    assert_eq!(sc.session.membership(), Membership::Idle);
    assert!(sc.session.roster().is_empty());
    assert_eq!(
        sc.drain_events(),
        vec![
            SessionEvent::Closed { code: collab_proto::CloseCode::NORMAL, reason: String::new() },
            SessionEvent::MembershipChanged(Membership::Idle),
            SessionEvent::RosterChanged(Vec::new()),
        ]
    );

    sc.session.connect("demo").unwrap();
    sc.open();
    assert_eq!(sc.connector.sent_frames_on(sc.generation()), vec![join_frame("demo", "ada")]);
    sc.deliver(&Frame::RoomJoined {});
    assert_eq!(sc.session.membership(), Membership::Joined);
}
