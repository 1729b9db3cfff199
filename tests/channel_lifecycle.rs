//! Tests for channel allocation and lifecycle.
//!
//! They cover number allocation, explicit numbers, reuse after close, stale
//! handles, the close handshake, and broker-initiated channel closes.

use lockstep::method::{BasicConsume, BasicPublish, QueueDeclare};
use lockstep::{ChannelState, Connection, Error, Properties, Tuning};
use lockstep_testing::{FakeBroker, open_broker_with, session};
use rstest::rstest;

#[rstest]
fn channels_get_the_lowest_free_number(session: (Connection, FakeBroker)) {
    let (conn, _broker) = session;

    let first = conn.open_channel(None).expect("open channel");
    let second = conn.open_channel(None).expect("open channel");

    assert_eq!(first.number(), 1);
    assert_eq!(second.number(), 2);
    assert_eq!(first.state(), ChannelState::Open);
}

#[rstest]
fn explicit_numbers_are_honoured(session: (Connection, FakeBroker)) {
    let (conn, _broker) = session;

    let channel = conn.open_channel(Some(5)).expect("open channel 5");
    assert_eq!(channel.number(), 5);

    let err = conn.open_channel(Some(5)).expect_err("5 is taken");
    assert!(matches!(err, Error::ChannelInUse(5)), "got {err}");
}

#[rstest]
fn zero_and_out_of_range_numbers_are_rejected(session: (Connection, FakeBroker)) {
    let (conn, _broker) = session;
    let max = conn.tuning().channel_max;

    let err = conn.open_channel(Some(0)).expect_err("zero is reserved");
    assert!(
        matches!(err, Error::ChannelOutOfRange { channel: 0, .. }),
        "got {err}"
    );

    let err = conn.open_channel(Some(max + 1)).expect_err("above the maximum");
    let Error::ChannelOutOfRange { channel, max: reported } = err else {
        panic!("expected an out-of-range error, got {err}");
    };
    assert_eq!(channel, max + 1);
    assert_eq!(reported, max);
}

#[rstest]
fn exhausted_numbers_report_no_free_channel() {
    let tuning = Tuning {
        channel_max: 1,
        ..Tuning::default()
    };
    let (conn, _broker) = open_broker_with(tuning);

    let only = conn.open_channel(None).expect("open channel");
    assert_eq!(only.number(), 1);

    let err = conn.open_channel(None).expect_err("no numbers left");
    assert!(matches!(err, Error::NoFreeChannel(1)), "got {err}");
}

#[rstest]
fn closed_numbers_are_reused(session: (Connection, FakeBroker)) {
    let (conn, _broker) = session;

    let first = conn.open_channel(None).expect("open channel");
    assert_eq!(first.number(), 1);
    first.close(200, "done").expect("close channel");

    let second = conn.open_channel(None).expect("reopen");
    assert_eq!(second.number(), 1);
    assert!(second.is_open());
}

#[rstest]
fn stale_handles_stay_closed_after_reuse(session: (Connection, FakeBroker)) {
    let (conn, _broker) = session;

    let stale = conn.open_channel(None).expect("open channel");
    stale.close(200, "done").expect("close channel");
    let fresh = conn.open_channel(None).expect("reopen");
    assert_eq!(fresh.number(), stale.number());

    assert_eq!(stale.state(), ChannelState::Closed);
    let err = stale
        .queue_declare(QueueDeclare {
            queue: "jobs".into(),
            ..QueueDeclare::default()
        })
        .expect_err("stale handle");
    assert!(matches!(err, Error::ChannelClosed(_)), "got {err}");

    fresh
        .queue_declare(QueueDeclare {
            queue: "jobs".into(),
            ..QueueDeclare::default()
        })
        .expect("fresh handle still works");
}

#[rstest]
fn close_completes_the_handshake(session: (Connection, FakeBroker)) {
    let (conn, broker) = session;
    let channel = conn.open_channel(None).expect("open channel");

    channel.close(200, "done").expect("close channel");

    assert!(channel.is_closed());
    assert!(broker.sent_names().contains(&"Channel.Close"));
    let reason = channel.close_reason().expect("reason recorded");
    assert_eq!(reason.code, 200);
    assert_eq!(reason.text, "done");
    assert!(conn.is_open());
}

#[rstest]
fn operations_on_a_closed_channel_send_nothing(session: (Connection, FakeBroker)) {
    let (conn, broker) = session;
    let channel = conn.open_channel(None).expect("open channel");
    channel.close(200, "done").expect("close channel");

    let sent_before = broker.sent_names().len();

    assert!(matches!(
        channel.queue_declare(QueueDeclare::default()),
        Err(Error::ChannelClosed(_))
    ));
    assert!(matches!(
        channel.basic_publish(
            BasicPublish {
                routing_key: "jobs".into(),
                ..BasicPublish::default()
            },
            Properties::default(),
            "payload",
        ),
        Err(Error::ChannelClosed(_))
    ));
    assert!(matches!(
        channel.basic_consume(BasicConsume::default(), |_| {}),
        Err(Error::ChannelClosed(_))
    ));
    assert_eq!(broker.sent_names().len(), sent_before);
}

#[rstest]
fn a_broker_close_disables_the_channel(session: (Connection, FakeBroker)) {
    let (conn, broker) = session;
    let channel = conn.open_channel(None).expect("open channel");

    let err = channel
        .queue_declare(QueueDeclare {
            queue: "missing".into(),
            passive: true,
            ..QueueDeclare::default()
        })
        .expect_err("passive declare of a missing queue");

    let Error::ChannelClosed(reason) = err else {
        panic!("expected a channel-closed error, got {err}");
    };
    assert_eq!(reason.code, 404);
    assert!(reason.text.contains("NOT_FOUND"));
    assert!(channel.is_closed());
    assert!(conn.is_open());

    // The acknowledgement left with the pass that caught the close, so a
    // caller that stops polling here has still answered.
    assert!(broker.sent_names().contains(&"Channel.CloseOk"));
}

#[rstest]
fn reused_channels_mint_fresh_consumer_tags(session: (Connection, FakeBroker)) {
    let (conn, _broker) = session;
    let first = conn.open_channel(None).expect("open channel");
    first
        .queue_declare(QueueDeclare {
            queue: "jobs".into(),
            ..QueueDeclare::default()
        })
        .expect("declare");

    let first_tag = first
        .basic_consume(
            BasicConsume {
                queue: "jobs".into(),
                ..BasicConsume::default()
            },
            |_| {},
        )
        .expect("consume");
    assert_eq!(first_tag, "ctag-1.1");

    first.close(200, "done").expect("close channel");
    let second = conn.open_channel(None).expect("reopen");
    assert_eq!(second.number(), 1);

    let second_tag = second
        .basic_consume(
            BasicConsume {
                queue: "jobs".into(),
                ..BasicConsume::default()
            },
            |_| {},
        )
        .expect("consume again");
    assert_eq!(second_tag, "ctag-1.2");
}
