//! Tests for driver metrics.
//!
//! Each test captures one session under a thread-local debugging recorder
//! and asserts on a single metric, since a snapshot is consumed per lookup.

#![cfg(feature = "metrics")]

use lockstep::method::{BasicGet, BasicPublish, QueueDeclare};
use lockstep::{
    CHANNELS_OPEN, Channel, Connection, DISCARDED_METHODS_TOTAL, FORCED_DRAINS_TOTAL,
    IO_TIMEOUTS_TOTAL, METHODS_TOTAL, Method, Properties, Tuning,
};
use lockstep_testing::{capture_metrics, counter_total, gauge_value, open_broker, open_broker_with};
use rstest::rstest;

fn declared_channel(conn: &Connection, queue: &str) -> Channel {
    let channel = conn.open_channel(None).expect("open channel");
    channel
        .queue_declare(QueueDeclare {
            queue: queue.into(),
            ..QueueDeclare::default()
        })
        .expect("declare");
    channel
}

#[rstest]
fn the_channel_gauge_tracks_the_lifecycle() {
    let (_, snapshot) = capture_metrics(|| {
        let (conn, _broker) = open_broker();
        let first = conn.open_channel(None).expect("open channel");
        let _second = conn.open_channel(None).expect("open channel");
        first.close(200, "done").expect("close channel");
    });

    let open = gauge_value(snapshot, CHANNELS_OPEN);
    assert!((open - 1.0).abs() < f64::EPSILON, "got {open}");
}

#[rstest]
fn methods_are_counted_in_both_directions() {
    let (_, snapshot) = capture_metrics(|| {
        let (conn, _broker) = open_broker();
        declared_channel(&conn, "jobs");
    });

    // Outbound: Channel.Open and Queue.Declare. Inbound: Connection.OpenOk,
    // Channel.OpenOk, and Queue.DeclareOk.
    assert_eq!(counter_total(snapshot, METHODS_TOTAL), 5);
}

#[rstest]
fn idle_passes_count_as_io_timeouts() {
    let (_, snapshot) = capture_metrics(|| {
        let (conn, _broker) = open_broker();
        for _ in 0..3 {
            conn.process_data_events().expect("idle pass");
        }
    });

    assert_eq!(counter_total(snapshot, IO_TIMEOUTS_TOTAL), 3);
}

#[rstest]
fn the_write_to_read_ratio_forces_drains() {
    let tuning = Tuning {
        write_to_read_ratio: 1,
        ..Tuning::default()
    };
    let ((_conn, broker, publish_reads), snapshot) = capture_metrics(|| {
        let (conn, broker) = open_broker_with(tuning);
        let channel = declared_channel(&conn, "jobs");

        let before = broker.read_attempts();
        channel
            .basic_publish(
                BasicPublish {
                    routing_key: "jobs".into(),
                    ..BasicPublish::default()
                },
                Properties::default(),
                "payload",
            )
            .expect("publish");
        let publish_reads = broker.read_attempts() - before;
        (conn, broker, publish_reads)
    });

    // One forced drain each for the channel open, the declare, and the
    // publish.
    assert_eq!(counter_total(snapshot, FORCED_DRAINS_TOTAL), 3);
    // The publish needed no reply, so both reads came from its own drain:
    // the regular pass plus the forced one.
    assert_eq!(publish_reads, 2);
    assert_eq!(broker.queue_len("jobs"), Some(1));
}

#[rstest]
fn plain_sends_do_not_force_drains() {
    let (_, snapshot) = capture_metrics(|| {
        let (conn, _broker) = open_broker();
        let channel = declared_channel(&conn, "jobs");
        channel
            .basic_publish(
                BasicPublish {
                    routing_key: "jobs".into(),
                    ..BasicPublish::default()
                },
                Properties::default(),
                "payload",
            )
            .expect("publish");
    });

    assert_eq!(counter_total(snapshot, FORCED_DRAINS_TOTAL), 0);
}

#[rstest]
fn unclaimed_replies_are_counted_as_discarded() {
    let ((), snapshot) = capture_metrics(|| {
        let (conn, _broker) = open_broker();
        let channel = declared_channel(&conn, "jobs");

        conn.send_method(
            channel.number(),
            Method::BasicGet(BasicGet {
                queue: "jobs".into(),
                no_ack: true,
            }),
            None,
        )
        .expect("send outside any wait");
        conn.process_data_events().expect("flush the get");
        conn.process_data_events().expect("read the unclaimed reply");
    });

    assert_eq!(counter_total(snapshot, DISCARDED_METHODS_TOTAL), 1);
}
