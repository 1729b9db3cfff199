//! Tests for driver log output.
//!
//! They pin the messages an operator leans on: the stall warning for silent
//! links, discarded inbound methods, and lifecycle announcements.

use lockstep::method::{BasicGet, QueueDeclare};
use lockstep::{Method, Tuning};
use lockstep_testing::{LoggerHandle, logger, open_broker, open_broker_with};
use rstest::rstest;
use serial_test::serial;

fn stall_warnings(records: &[String]) -> usize {
    records
        .iter()
        .filter(|message| message.contains("connection may be stalled"))
        .count()
}

#[rstest]
#[serial(logging)]
fn an_idle_connection_warns_once_per_silence_streak(mut logger: LoggerHandle) {
    while logger.pop().is_some() {}
    let tuning = Tuning {
        open_timeout_threshold: 2,
        ..Tuning::default()
    };
    let (conn, broker) = open_broker_with(tuning);

    for _ in 0..4 {
        conn.process_data_events().expect("idle pass");
    }
    assert_eq!(stall_warnings(&logger.drain()), 1);

    // Traffic ends the streak; the next silence gets its own warning.
    broker.inject(0, Method::ConnectionOpenOk, None);
    for _ in 0..4 {
        conn.process_data_events().expect("pass");
    }
    assert_eq!(stall_warnings(&logger.drain()), 1);
}

#[rstest]
#[serial(logging)]
fn discarded_methods_name_the_method_and_channel(mut logger: LoggerHandle) {
    while logger.pop().is_some() {}
    let (conn, _broker) = open_broker();
    let channel = conn.open_channel(None).expect("open channel");
    channel
        .queue_declare(QueueDeclare {
            queue: "jobs".into(),
            ..QueueDeclare::default()
        })
        .expect("declare");

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

    let records = logger.drain();
    assert!(
        records
            .iter()
            .any(|message| message.contains("discarding Basic.GetEmpty on channel 1")),
        "got {records:?}"
    );
}

#[rstest]
#[serial(logging)]
fn lifecycle_transitions_are_announced(mut logger: LoggerHandle) {
    while logger.pop().is_some() {}
    let (conn, _broker) = open_broker();
    let _channel = conn.open_channel(None).expect("open channel");
    conn.close(200, "goodbye").expect("close");

    let records = logger.drain();
    assert!(records.iter().any(|message| message == "connection open"));
    assert!(records.iter().any(|message| message == "channel 1 open"));
    assert!(
        records
            .iter()
            .any(|message| message.contains("closing connection: code=200, text=goodbye")),
        "got {records:?}"
    );
}
