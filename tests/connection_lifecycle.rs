//! Tests for the connection lifecycle.
//!
//! They cover the open handshake, orderly and remote-initiated closes, the
//! abandoned-handshake timeout path, and link failure, all against the fake
//! broker from `lockstep_testing`.

use std::time::Duration;

use lockstep::{Connection, ConnectionState, Error, Tuning, TransportError};
use lockstep_testing::{FakeBroker, open_broker, open_broker_with, session};
use rstest::rstest;

#[rstest]
fn open_reports_the_broker_confirmation() {
    let tuning = Tuning {
        connect_timeout: Duration::from_millis(100),
        socket_timeout: Duration::from_millis(300),
        ..Tuning::default()
    };
    let (conn, broker) = open_broker_with(tuning);

    assert!(conn.is_open());
    assert_eq!(conn.state(), ConnectionState::Open);
    assert_eq!(broker.read_timeout(), Some(Duration::from_millis(300)));
}

#[rstest]
fn handles_have_a_debug_representation(session: (Connection, FakeBroker)) {
    let (conn, _broker) = session;
    let channel = conn.open_channel(None).expect("open channel");

    let repr = format!("{conn:?}");
    assert!(repr.contains("Connection"), "got {repr}");
    assert!(repr.contains("Open"), "got {repr}");
    let repr = format!("{channel:?}");
    assert!(repr.contains("number: 1"), "got {repr}");
}

#[rstest]
fn close_completes_the_handshake(session: (Connection, FakeBroker)) {
    let (conn, broker) = session;

    conn.close(200, "goodbye").expect("close");

    assert!(conn.is_closed());
    assert!(broker.sent_names().contains(&"Connection.Close"));
    assert!(broker.is_shut_down());
}

#[rstest]
fn close_closes_open_channels_first(session: (Connection, FakeBroker)) {
    let (conn, broker) = session;
    let first = conn.open_channel(None).expect("open channel");
    let second = conn.open_channel(None).expect("open channel");

    conn.close(200, "goodbye").expect("close");

    let closes: Vec<&str> = broker
        .sent_names()
        .into_iter()
        .filter(|name| name.ends_with(".Close"))
        .collect();
    assert_eq!(
        closes,
        vec!["Channel.Close", "Channel.Close", "Connection.Close"]
    );
    assert!(first.is_closed());
    assert!(second.is_closed());
}

#[rstest]
fn operations_after_close_report_the_reason(session: (Connection, FakeBroker)) {
    let (conn, _broker) = session;
    conn.close(200, "goodbye").expect("close");

    let err = conn.open_channel(None).expect_err("connection is closed");
    let Error::ConnectionClosed(reason) = err else {
        panic!("expected a connection-closed error, got {err}");
    };
    assert_eq!(reason.code, 200);
    assert_eq!(reason.text, "goodbye");
}

#[rstest]
fn remote_close_surfaces_after_bookkeeping(session: (Connection, FakeBroker)) {
    let (conn, broker) = session;
    let channel = conn.open_channel(None).expect("open channel");

    broker.inject_close(320, "CONNECTION_FORCED - broker shutdown");
    let err = conn.process_data_events().expect_err("peer closed us");

    let Error::ConnectionClosed(reason) = err else {
        panic!("expected a connection-closed error, got {err}");
    };
    assert_eq!(reason.code, 320);
    assert!(conn.is_closed());
    assert!(channel.is_closed());
    assert_eq!(channel.close_reason().map(|r| r.code), Some(320));
}

#[rstest]
fn a_clean_remote_close_is_not_an_error(session: (Connection, FakeBroker)) {
    let (conn, broker) = session;

    broker.inject_close(200, "server restart");
    conn.process_data_events().expect("clean close");

    assert!(conn.is_closed());
}

#[rstest]
fn a_silent_peer_abandons_the_close_handshake() {
    let tuning = Tuning {
        close_timeout_threshold: 1,
        ..Tuning::default()
    };
    let (conn, broker) = open_broker_with(tuning);

    broker.go_silent();
    conn.close(200, "shutting down").expect("clean give-up");

    assert!(conn.is_closed());
    assert!(broker.sent_names().contains(&"Connection.Close"));
    assert!(broker.is_shut_down());

    let err = conn.open_channel(None).expect_err("connection is gone");
    assert!(matches!(err, Error::Disconnected), "got {err}");
}

#[rstest]
fn a_dead_link_fails_the_session(session: (Connection, FakeBroker)) {
    let (conn, broker) = session;

    broker.drop_link();
    let err = conn.process_data_events().expect_err("link is down");
    assert!(matches!(err, Error::Transport(TransportError::Io(_))), "got {err}");

    let err = conn.open_channel(None).expect_err("session is dead");
    let Error::ConnectionClosed(reason) = err else {
        panic!("expected a connection-closed error, got {err}");
    };
    assert_eq!(reason.code, 320);
    assert_eq!(reason.text, "transport failure");
}

#[rstest]
fn a_broker_that_never_confirms_the_open_is_abandoned() {
    let tuning = Tuning {
        open_timeout_threshold: 2,
        ..Tuning::default()
    };
    let (transport, broker) = FakeBroker::start();
    broker.go_silent();

    let err = Connection::open(transport, tuning).expect_err("no open confirmation");
    assert!(matches!(err, Error::Disconnected), "got {err}");
    assert!(broker.is_shut_down());
}

#[rstest]
fn connect_failure_propagates() {
    let (transport, broker) = FakeBroker::start();
    broker.drop_link();

    let err = Connection::open(transport, Tuning::default()).expect_err("no link");
    assert!(
        matches!(err, Error::Transport(TransportError::Connect { .. })),
        "got {err}"
    );
}

#[rstest]
fn clones_address_the_same_connection() {
    let (conn, _broker) = open_broker();
    let alias = conn.clone();

    conn.close(200, "goodbye").expect("close");

    assert!(alias.is_closed());
    assert_eq!(alias.state(), ConnectionState::Closed);
}
