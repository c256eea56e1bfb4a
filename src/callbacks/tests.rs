//! Unit tests for the broadcast registry.

use std::sync::{
    Arc,
    Mutex,
    atomic::{AtomicUsize, Ordering},
};

use rstest::{fixture, rstest};

use super::*;

struct Owner {
    label: &'static str,
}

type Hits = Arc<AtomicUsize>;

#[fixture]
fn hits() -> Hits { Arc::new(AtomicUsize::new(0)) }

fn counting(hits: &Hits) -> Callback<Owner, u32> {
    let hits = hits.clone();
    sync_callback(move |_owner, value: &u32| {
        hits.fetch_add(*value as usize, Ordering::SeqCst);
    })
}

fn failing() -> Callback<Owner, u32> {
    callback(|_owner, _value: &u32| Err("subscriber refused".into()))
}

#[rstest]
#[tokio::test]
async fn failing_subscriber_does_not_block_siblings(hits: Hits) {
    let owner = Arc::new(Owner { label: "channel" });
    let collection = CallbackCollection::new(Arc::downgrade(&owner));
    collection.add(counting(&hits)).expect("add first");
    collection.add(failing()).expect("add failing");
    collection.add(counting(&hits)).expect("add second");

    let results = collection.call(&2).await;

    assert!(results.is_empty(), "no subscriber returned a continuation");
    assert_eq!(hits.load(Ordering::SeqCst), 4);
}

#[rstest]
#[tokio::test]
async fn failing_continuation_is_captured(hits: Hits) {
    let collection = CallbackCollection::<Owner, u32>::detached();
    let ok_hits = hits.clone();
    collection
        .add(async_callback(move |_owner, _value: &u32| {
            let hits = ok_hits.clone();
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                Ok::<(), BoxError>(())
            }
        }))
        .expect("add ok continuation");
    collection
        .add(async_callback(|_owner, _value: &u32| async {
            Err::<(), BoxError>("continuation failed".into())
        }))
        .expect("add failing continuation");
    collection
        .add(async_callback(|_owner, value: &u32| {
            let value = *value;
            async move {
                assert!(value > 0, "continuation exploded");
                Ok::<(), BoxError>(())
            }
        }))
        .expect("add panicking continuation");

    let broadcast = collection.call(&0);
    assert!(!broadcast.is_ready());
    let results = broadcast.await;

    assert_eq!(results.len(), 3);
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[rstest]
#[tokio::test]
async fn panicking_subscriber_is_isolated(hits: Hits) {
    let collection = CallbackCollection::<Owner, u32>::detached();
    collection
        .add(sync_callback(|_owner, _value: &u32| panic!("boom")))
        .expect("add panicking");
    collection.add(counting(&hits)).expect("add counting");

    let results = collection.call(&1).await;

    assert!(results.is_empty());
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[rstest]
fn frozen_collection_rejects_mutation(hits: Hits) {
    let collection = CallbackCollection::<Owner, u32>::detached();
    let member = counting(&hits);
    collection.add(member.clone()).expect("add before freeze");
    collection.freeze();

    assert_eq!(collection.add(counting(&hits)), Err(CallbackError::Frozen));
    assert_eq!(collection.add_weak(&counting(&hits)), Err(CallbackError::Frozen));
    assert_eq!(collection.discard(&member), Err(CallbackError::Frozen));
    assert_eq!(collection.clear(), Err(CallbackError::Frozen));
    assert_eq!(collection.len(), 1);
    assert!(collection.contains(&member));

    collection.unfreeze();
    assert_eq!(collection.discard(&member), Ok(true));
    assert!(collection.is_empty());
}

#[rstest]
fn frozen_collection_still_broadcasts(hits: Hits) {
    let collection = CallbackCollection::<Owner, u32>::detached();
    collection.add(counting(&hits)).expect("add");
    collection.freeze();

    let broadcast = collection.call(&5);

    assert!(broadcast.is_ready());
    assert_eq!(hits.load(Ordering::SeqCst), 5);
}

#[rstest]
fn weak_subscriber_leaves_when_dropped(hits: Hits) {
    let collection = CallbackCollection::<Owner, u32>::detached();
    let weak_member = counting(&hits);
    collection.add_weak(&weak_member).expect("add weak");
    assert!(collection.contains(&weak_member));
    assert_eq!(collection.len(), 1);

    let _ = collection.call(&1);
    drop(weak_member);
    let _ = collection.call(&1);

    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert!(collection.is_empty());
}

#[rstest]
fn duplicate_add_is_idempotent(hits: Hits) {
    let collection = CallbackCollection::<Owner, u32>::detached();
    let member = counting(&hits);
    collection.add(member.clone()).expect("add");
    collection.add(member.clone()).expect("add again");

    assert_eq!(collection.len(), 1);
    let _ = collection.call(&1);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[test]
fn subscribers_receive_owner_until_it_is_dropped() {
    let seen: Arc<Mutex<Vec<Option<&'static str>>>> = Arc::default();
    let owner = Arc::new(Owner { label: "first" });
    let collection = CallbackCollection::new(Arc::downgrade(&owner));
    let log = seen.clone();
    collection
        .add(sync_callback(move |owner: Option<Arc<Owner>>, _value: &u32| {
            log.lock().expect("lock").push(owner.map(|o| o.label));
        }))
        .expect("add");

    let _ = collection.call(&0);
    drop(owner);
    let _ = collection.call(&0);

    assert_eq!(*seen.lock().expect("lock"), vec![Some("first"), None]);
}

#[test]
fn subscriber_may_mutate_collection_during_call() {
    let collection = Arc::new(CallbackCollection::<Owner, u32>::detached());
    let handle = Arc::downgrade(&collection);
    let self_removing: Arc<Mutex<Option<Callback<Owner, u32>>>> = Arc::default();
    let slot = self_removing.clone();
    let member = sync_callback(move |_owner, _value: &u32| {
        let me = slot.lock().expect("lock").take();
        if let (Some(collection), Some(me)) = (handle.upgrade(), me) {
            collection.discard(&me).expect("discard self");
        }
    });
    *self_removing.lock().expect("lock") = Some(member.clone());
    collection.add(member).expect("add");

    let _ = collection.call(&0);

    assert!(collection.is_empty());
}

#[rstest]
fn clone_preserves_membership_and_frozen_state(hits: Hits) {
    let collection = CallbackCollection::<Owner, u32>::detached();
    let strong = counting(&hits);
    let weak = counting(&hits);
    collection.add(strong.clone()).expect("add strong");
    collection.add_weak(&weak).expect("add weak");
    collection.freeze();

    let copy = collection.clone();

    assert!(copy.is_frozen());
    assert!(copy.contains(&strong));
    assert!(copy.contains(&weak));
    copy.unfreeze();
    copy.clear().expect("clear copy");
    assert!(copy.is_empty());
    assert_eq!(collection.len(), 2, "original is independent of the copy");
}

#[rstest]
fn with_subscribers_deduplicates(hits: Hits) {
    let member = counting(&hits);
    let collection = CallbackCollection::<Owner, u32>::with_subscribers(
        Weak::new(),
        [member.clone(), member.clone(), counting(&hits)],
    );

    assert_eq!(collection.len(), 2);
    assert_eq!(collection.snapshot().len(), 2);
}

#[test]
fn continuations_complete_without_a_runtime() {
    let collection = CallbackCollection::<Owner, u32>::detached();
    collection
        .add(async_callback(|_owner, value: &u32| {
            let value = *value;
            async move {
                if value > 1 {
                    Ok::<(), BoxError>(())
                } else {
                    Err("too small".into())
                }
            }
        }))
        .expect("add");

    let results = futures::executor::block_on(collection.call(&2));
    assert_eq!(results.len(), 1);
    assert!(results[0].is_ok());

    let results = futures::executor::block_on(collection.call(&0));
    assert!(results[0].is_err());
}
