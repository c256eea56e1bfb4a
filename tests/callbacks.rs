//! Broadcast behaviour as seen through `RobustChannel`'s subscriber hooks.

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use amqp_robust::{
    CallbackError,
    RobustChannel,
    callbacks::{async_callback, callback, sync_callback},
    transport::CloseReason,
};
use amqp_robust_testing::{LoggerHandle, Session, logger, op_expect, session};
use log::Level;
use rstest::rstest;

fn counting(hits: &Arc<AtomicUsize>) -> amqp_robust::callbacks::Callback<RobustChannel, ()> {
    let hits = hits.clone();
    sync_callback(move |_owner, (): &()| {
        hits.fetch_add(1, Ordering::SeqCst);
    })
}

#[rstest]
#[tokio::test]
async fn failing_reopen_subscriber_does_not_stop_the_others(
    session: Session,
    mut logger: LoggerHandle,
) {
    let channel = &session.channel;
    let sync_hits = Arc::new(AtomicUsize::new(0));
    let async_hits = Arc::new(AtomicUsize::new(0));
    let reopen = channel.reopen_callbacks();
    reopen.add(counting(&sync_hits)).expect("not frozen");
    reopen
        .add(callback(|_owner: Option<Arc<RobustChannel>>, (): &()| {
            Err("subscriber refused".into())
        }))
        .expect("not frozen");
    reopen
        .add(async_callback({
            let hits = async_hits.clone();
            move |_owner: Option<Arc<RobustChannel>>, (): &()| {
                let hits = hits.clone();
                async move {
                    tokio::task::yield_now().await;
                    hits.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }
        }))
        .expect("not frozen");

    op_expect!(channel.open());

    assert_eq!(sync_hits.load(Ordering::SeqCst), 1);
    assert_eq!(async_hits.load(Ordering::SeqCst), 1, "open awaits continuations");
    assert!(logger.saw(Level::Error, "subscriber refused"));
}

#[rstest]
#[tokio::test]
async fn panicking_reopen_subscriber_does_not_block_open(
    session: Session,
    mut logger: LoggerHandle,
) {
    let channel = &session.channel;
    channel
        .reopen_callbacks()
        .add(sync_callback(|_owner: Option<Arc<RobustChannel>>, (): &()| {
            panic!("subscriber bug")
        }))
        .expect("not frozen");

    op_expect!(channel.open());

    assert!(channel.state().is_ready());
    assert!(logger.saw(Level::Error, "callback panicked"));
}

#[rstest]
#[tokio::test]
async fn frozen_close_callbacks_keep_recovery_working(session: Session) {
    let channel = &session.channel;
    op_expect!(channel.open());
    channel.close_callbacks().freeze();

    let err = channel
        .close_callbacks()
        .add(sync_callback(|_owner, _reason: &CloseReason| {}))
        .expect_err("frozen");
    assert_eq!(err, CallbackError::Frozen);

    session.bounce().await;
    op_expect!(channel.ready());
    channel.close_callbacks().unfreeze();
}

#[rstest]
#[tokio::test]
async fn weak_close_subscriber_leaves_when_dropped(session: Session) {
    let channel = &session.channel;
    op_expect!(channel.open());
    let reasons = Arc::new(std::sync::Mutex::new(Vec::new()));
    let subscriber = {
        let reasons = reasons.clone();
        sync_callback(move |_owner, reason: &CloseReason| {
            reasons.lock().expect("lock").push(reason.to_string());
        })
    };
    channel
        .close_callbacks()
        .add_weak(&subscriber)
        .expect("not frozen");

    session.bounce().await;
    op_expect!(channel.ready());
    assert_eq!(reasons.lock().expect("lock").len(), 1);

    drop(subscriber);
    session.bounce().await;
    op_expect!(channel.ready());
    assert_eq!(reasons.lock().expect("lock").len(), 1);
    assert_eq!(channel.close_callbacks().len(), 1, "only the recovery handler remains");
}
