//! Integration tests for the live record store.

use live_records::{
    CancelToken, EntityKind, Item, ItemPatch, KvStore, List, Notifier, NotifierConfig, Repository,
    SessionState, Stamp, Store, StoreConfig, User,
};
use std::collections::HashMap;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

const WAIT: Duration = Duration::from_millis(500);

fn signed_in_store() -> Store {
    let store = Store::in_memory();
    store.identity().sign_in(&User::new("u1"), "s1").unwrap();
    store
}

// --- Repository scenarios ---

#[test]
fn test_create_list_lists_by_parent() {
    let store = signed_in_store();
    store.create_list("s1", "Groceries").unwrap();

    let lists = store.lists().list_by_parent("u1").unwrap();
    assert_eq!(lists.len(), 1);
    assert_eq!(lists[0].name, "Groceries");
}

#[test]
fn test_replace_item_keeps_created_at() {
    let store = signed_in_store();
    let list = store.create_list("s1", "Chores").unwrap().record;
    let item = store.create_item("s1", &list.id, "Sweep").unwrap().record;

    let mut checked = item.clone();
    checked.is_checked = true;
    store.items().replace(checked).unwrap();

    let stored = store.items().get_by_id(&item.id).unwrap().unwrap();
    assert!(stored.is_checked);
    assert_eq!(stored.created_at, item.created_at);
}

#[test]
fn test_delete_list_reaches_every_subscriber() {
    let store = signed_in_store();
    let keep = store.create_list("s1", "Keep").unwrap().record;
    let doomed = store.create_list("s1", "Doomed").unwrap().record;

    let mut first = store.subscribe_lists("s1").unwrap();
    let mut second = store.subscribe_lists("s1").unwrap();
    for sub in [&mut first, &mut second] {
        assert_eq!(sub.recv_timeout(WAIT).unwrap().records.len(), 2);
    }

    let deleted = store.delete_list("s1", &doomed.id).unwrap();

    for sub in [&mut first, &mut second] {
        let snapshot = sub.recv_timeout(WAIT).unwrap();
        assert_eq!(snapshot.stamp, Some(deleted.stamp));
        assert_eq!(snapshot.records, vec![keep.clone()]);
        assert!(!sub.is_closed());
    }
}

#[test]
fn test_concurrent_replace_last_writer_wins() {
    let store = Arc::new(signed_in_store());
    let list = store.create_list("s1", "Race").unwrap().record;
    let item = store.create_item("s1", &list.id, "start").unwrap().record;

    let mut sub = store.subscribe_items("s1", &list.id).unwrap();
    let initial = sub.recv_timeout(WAIT).unwrap();

    let writers: Vec<_> = ["left", "right"]
        .into_iter()
        .map(|title| {
            let store = Arc::clone(&store);
            let mut record = item.clone();
            record.title = title.to_string();
            thread::spawn(move || store.items().replace(record).unwrap())
        })
        .collect();
    let committed: Vec<_> = writers.into_iter().map(|w| w.join().unwrap()).collect();

    let last = committed.iter().max_by_key(|c| c.stamp).unwrap();
    let (stored, stamp) = store.items().get_versioned(&item.id).unwrap().unwrap();
    assert_eq!(stored.title, last.record.title);
    assert_eq!(stamp, last.stamp);

    let mut seen = vec![initial.stamp.unwrap()];
    while let Some(snapshot) = sub.recv_timeout(Duration::from_millis(100)) {
        seen.push(snapshot.stamp.unwrap());
    }
    assert!(seen.windows(2).all(|w| w[0] < w[1]), "stamps out of order: {:?}", seen);
    assert_eq!(seen.last(), Some(&last.stamp));
}

#[test]
fn test_racing_move_and_retitle_keep_one_index_entry() {
    let kv = Arc::new(KvStore::in_memory());
    let items: Arc<Repository<Item>> = Arc::new(Repository::new(
        EntityKind::items(),
        Arc::clone(&kv),
        Arc::new(Notifier::new()),
    ));

    for _ in 0..200 {
        let item = items.create(Item::new("l1", "start")).unwrap().record;
        let barrier = Arc::new(Barrier::new(2));

        let mut moved = item.clone();
        moved.list_id = "l2".into();
        let mut retitled = item.clone();
        retitled.title = "renamed".into();

        let writers: Vec<_> = [moved, retitled]
            .into_iter()
            .map(|record| {
                let items = Arc::clone(&items);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    items.replace(record).unwrap()
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        let stored = items.get_by_id(&item.id).unwrap().unwrap();
        let parents: Vec<&str> = ["l1", "l2"]
            .into_iter()
            .filter(|parent| {
                items
                    .list_by_parent(parent)
                    .unwrap()
                    .iter()
                    .any(|listed| listed.id == item.id)
            })
            .collect();
        assert_eq!(parents, vec![stored.list_id.as_str()], "index out of step for {}", item.id);

        items.delete(&stored).unwrap();
    }

    assert!(kv.is_empty());
}

#[test]
fn test_published_snapshots_of_large_collections_are_consistent() {
    let kv = Arc::new(KvStore::in_memory());
    let notifier = Arc::new(Notifier::with_config(NotifierConfig { buffer_size: 1024 }));
    let items: Arc<Repository<Item>> =
        Arc::new(Repository::new(EntityKind::items(), Arc::clone(&kv), Arc::clone(&notifier)));

    let mut stamps: HashMap<String, Stamp> = HashMap::new();
    for i in 0..200 {
        let committed = items.create(Item::new("big", &format!("seed {}", i))).unwrap();
        stamps.insert(committed.record.id, committed.stamp);
    }

    let mut sub = items.subscribe("big", CancelToken::new()).unwrap();
    assert_eq!(sub.recv_timeout(WAIT).unwrap().records.len(), 200);

    let writers: Vec<_> = (0..4)
        .map(|w| {
            let items = Arc::clone(&items);
            thread::spawn(move || {
                (0..50)
                    .map(|i| items.create(Item::new("big", &format!("w{} {}", w, i))).unwrap())
                    .map(|c| (c.record.id, c.stamp))
                    .collect::<Vec<_>>()
            })
        })
        .collect();
    for writer in writers {
        stamps.extend(writer.join().unwrap());
    }

    let mut snapshots = 0;
    while let Some(snapshot) = sub.recv_timeout(Duration::from_millis(100)) {
        snapshots += 1;
        let newest = snapshot.records.iter().map(|item| stamps[&item.id]).max().unwrap();
        let expected = stamps.values().filter(|stamp| **stamp <= newest).count();
        assert_eq!(
            snapshot.records.len(),
            expected,
            "snapshot at {:?} skipped records committed before {}",
            snapshot.stamp,
            newest
        );
    }
    assert!(snapshots > 0);
    assert_eq!(items.list_by_parent("big").unwrap().len(), 400);
}

// --- Session behavior ---

#[test]
fn test_late_subscriber_sees_one_initial_snapshot() {
    let store = signed_in_store();
    for name in ["a", "b", "c"] {
        store.create_list("s1", name).unwrap();
    }

    let mut sub = store.subscribe_lists("s1").unwrap();
    assert_eq!(sub.state(), SessionState::Init);
    let initial = sub.recv_timeout(WAIT).unwrap();
    assert_eq!(initial.records.len(), 3);
    assert_eq!(initial.stamp, store.kv().last_stamp());
    assert!(sub.recv_timeout(Duration::from_millis(50)).is_none());

    let fourth = store.create_list("s1", "d").unwrap();
    let live = sub.recv_timeout(WAIT).unwrap();
    assert_eq!(live.stamp, Some(fourth.stamp));
    assert_eq!(live.records.len(), 4);
}

#[test]
fn test_closed_session_gets_nothing() {
    let store = signed_in_store();
    let mut sub = store.subscribe_lists("s1").unwrap();
    sub.recv_timeout(WAIT).unwrap();
    sub.close();

    store.create_list("s1", "after close").unwrap();
    assert!(sub.recv_timeout(Duration::from_millis(50)).is_none());
    assert_eq!(store.notifier().topic_count(), 0);
}

#[test]
fn test_topics_are_isolated() {
    let store = signed_in_store();
    store.identity().sign_in(&User::new("u2"), "s2").unwrap();

    let mut mine = store.subscribe_lists("s1").unwrap();
    mine.recv_timeout(WAIT).unwrap();

    store.create_list("s2", "not yours").unwrap();
    assert!(mine.recv_timeout(Duration::from_millis(50)).is_none());
}

#[test]
fn test_item_moves_between_lists() {
    let kv = Arc::new(KvStore::in_memory());
    let notifier = Arc::new(Notifier::new());
    let items: Repository<Item> =
        Repository::new(EntityKind::items(), Arc::clone(&kv), Arc::clone(&notifier));

    let item = items.create(Item::new("l1", "wander")).unwrap().record;
    let mut from = items.subscribe("l1", CancelToken::new()).unwrap();
    let mut to = items.subscribe("l2", CancelToken::new()).unwrap();
    from.recv_timeout(WAIT).unwrap();
    to.recv_timeout(WAIT).unwrap();

    let mut moved = item.clone();
    moved.list_id = "l2".into();
    let committed = items.replace(moved).unwrap();

    assert!(items.list_by_parent("l1").unwrap().is_empty());
    assert_eq!(items.list_by_parent("l2").unwrap().len(), 1);

    let left = from.recv_timeout(WAIT).unwrap();
    let arrived = to.recv_timeout(WAIT).unwrap();
    assert!(left.records.is_empty());
    assert_eq!(arrived.records.len(), 1);
    assert_eq!(left.stamp, Some(committed.stamp));
    assert_eq!(arrived.stamp, Some(committed.stamp));
}

// --- Persistence ---

#[test]
fn test_reopen_restores_indexes_and_stamps() {
    let dir = TempDir::new().unwrap();
    let config = StoreConfig {
        sync_on_commit: false,
        ..StoreConfig::at(dir.path().join("store"))
    };

    let (list, last) = {
        let store = Store::open_or_create(config.clone()).unwrap();
        store.identity().sign_in(&User::new("u1"), "s1").unwrap();
        let list = store.create_list("s1", "Durable").unwrap().record;
        store.create_item("s1", &list.id, "one").unwrap();
        store.create_item("s1", &list.id, "two").unwrap();
        store.compact().unwrap();
        let three = store.create_item("s1", &list.id, "three").unwrap();
        (list, three.stamp)
    };

    let store = Store::open_or_create(config).unwrap();
    assert_eq!(store.kv().last_stamp(), Some(last));
    assert_eq!(store.items_for("s1", &list.id).unwrap().len(), 3);

    let next = store.create_list("s1", "After").unwrap();
    assert!(next.stamp > last);
}

#[test]
fn test_patch_then_read_back() {
    let store = signed_in_store();
    let list: List = store.create_list("s1", "Todo").unwrap().record;
    let item = store.create_item("s1", &list.id, "write tests").unwrap().record;

    store
        .update_item("s1", ItemPatch::new(&item.id).checked(true))
        .unwrap();
    let items = store.items_for("s1", &list.id).unwrap();
    assert_eq!(items.len(), 1);
    assert!(items[0].is_checked);
    assert!(store.kv().last_stamp() > Some(Stamp(0)));
}
