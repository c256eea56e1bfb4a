#![cfg(feature = "metrics")]
//! Tests for the recovery metrics.
//!
//! A `DebuggingRecorder` is installed as the thread-local default for each
//! test; the current-thread runtime keeps every spawned task on that thread.

use std::sync::Arc;

use amqp_robust::{
    CALLBACK_FAILURES_TOTAL,
    CHANNELS_READY,
    RESTORE_FAILURES_TOTAL,
    RESTORES_TOTAL,
    TransportError,
    callbacks::{Callback, CallbackCollection, callback, sync_callback},
    memory::RpcKind,
};
use amqp_robust_testing::{
    Session,
    counter,
    debugging_recorder_setup,
    gauge,
    op_expect,
    session,
};
use rstest::rstest;

#[rstest]
#[tokio::test]
async fn restore_cycle_updates_counters_and_gauge(session: Session) {
    let (snapshotter, recorder) = debugging_recorder_setup();
    let _guard = metrics::set_default_local_recorder(&recorder);
    let channel = &session.channel;

    op_expect!(channel.open());
    assert_eq!(gauge(&snapshotter, CHANNELS_READY), Some(1.0));

    session.bounce().await;
    assert_eq!(gauge(&snapshotter, CHANNELS_READY), Some(0.0));
    op_expect!(channel.ready());

    assert_eq!(counter(&snapshotter, RESTORES_TOTAL, None), 1);
    assert_eq!(counter(&snapshotter, RESTORE_FAILURES_TOTAL, None), 0);
    assert_eq!(gauge(&snapshotter, CHANNELS_READY), Some(1.0));

    op_expect!(channel.close());
    assert_eq!(gauge(&snapshotter, CHANNELS_READY), Some(0.0));
}

#[rstest]
#[tokio::test]
async fn failed_restore_is_counted(session: Session) {
    let (snapshotter, recorder) = debugging_recorder_setup();
    let _guard = metrics::set_default_local_recorder(&recorder);
    let Session { broker, channel } = &session;
    op_expect!(channel.open());
    broker.fail_next(RpcKind::Qos, TransportError::ConnectionLost);

    session.bounce().await;
    op_expect!(channel.restore(), "second attempt succeeds");

    assert_eq!(counter(&snapshotter, RESTORE_FAILURES_TOTAL, None), 1);
    assert_eq!(counter(&snapshotter, RESTORES_TOTAL, None), 1);
}

#[rstest]
#[case::error(callback(|_owner: Option<Arc<()>>, (): &()| Err("refused".into())), "error")]
#[case::panic(sync_callback(|_owner: Option<Arc<()>>, (): &()| panic!("subscriber bug")), "panic")]
fn subscriber_failures_are_counted_by_kind(
    #[case] subscriber: Callback<(), ()>,
    #[case] kind: &str,
) {
    let (snapshotter, recorder) = debugging_recorder_setup();
    let collection = CallbackCollection::<(), ()>::detached();
    collection.add(subscriber).expect("not frozen");

    metrics::with_local_recorder(&recorder, || {
        let broadcast = collection.call(&());
        assert!(broadcast.is_ready());
    });

    assert_eq!(
        counter(&snapshotter, CALLBACK_FAILURES_TOTAL, Some(("kind", kind))),
        1
    );
}
