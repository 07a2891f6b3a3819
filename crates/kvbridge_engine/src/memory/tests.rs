use super::*;
use crate::key::Key;
use crate::native::{IndexParams, NativeDatabase, NativeTransaction, StoreParams};
use crate::range::{CursorDirection, KeyRange};
use serde_json::json;

type Log = Rc<RefCell<Vec<Result<Outcome, NativeError>>>>;

fn capture(request: &Request) -> Log {
    let log: Log = Rc::new(RefCell::new(Vec::new()));
    let ok = Rc::clone(&log);
    request.on_success(move |outcome| ok.borrow_mut().push(Ok(outcome)));
    let err = Rc::clone(&log);
    request.on_error(move |error| err.borrow_mut().push(Err(error)));
    log
}

fn txn_log(txn: &Rc<dyn NativeTransaction>) -> Rc<RefCell<Vec<String>>> {
    let log = Rc::new(RefCell::new(Vec::new()));
    let complete = Rc::clone(&log);
    txn.events()
        .on_complete(move |()| complete.borrow_mut().push("complete".to_string()));
    let abort = Rc::clone(&log);
    txn.events()
        .on_abort(move |e| abort.borrow_mut().push(format!("abort:{}", e.name)));
    let error = Rc::clone(&log);
    txn.events()
        .on_error(move |e| error.borrow_mut().push(format!("error:{}", e.name)));
    log
}

fn notes_schema(event: UpgradeNeeded) {
    let notes = event
        .database
        .create_store("notes", StoreParams::key_path("id").auto_increment())
        .unwrap();
    notes
        .create_index("tag", "tag".into(), IndexParams::default())
        .unwrap();
}

fn open(factory: &MemoryFactory, name: &str, version: u64) -> Rc<dyn NativeDatabase> {
    let request = factory.open(name, version).unwrap();
    request.on_upgrade_needed(notes_schema);
    let log = capture(&request);
    factory.event_loop().run_until_idle();
    let entry = log.borrow_mut().pop();
    match entry {
        Some(Ok(Outcome::Database(db))) => db,
        other => panic!("open failed: {other:?}"),
    }
}

fn seed(factory: &MemoryFactory, db: &Rc<dyn NativeDatabase>, records: &[serde_json::Value]) {
    let txn = db
        .transaction(&["notes".to_string()], TransactionMode::ReadWrite)
        .unwrap();
    let store = txn.store("notes").unwrap();
    for record in records {
        store.add(record.clone(), None).unwrap();
    }
    factory.event_loop().run_until_idle();
}

#[test]
fn open_runs_upgrade_and_creates_stores() {
    let factory = MemoryFactory::new(EventLoop::new());
    let db = open(&factory, "app", 1);

    assert_eq!(db.version(), 1);
    assert_eq!(db.store_names(), vec!["notes".to_string()]);
    assert_eq!(factory.version_of("app"), Some(1));
}

#[test]
fn open_version_zero_is_rejected_synchronously() {
    let factory = MemoryFactory::new(EventLoop::new());
    let err = factory.open("app", 0).unwrap_err();
    assert_eq!(err.name, "TypeError");
    assert_eq!(factory.event_loop().pending(), 0);
}

#[test]
fn open_lower_version_fails() {
    let factory = MemoryFactory::new(EventLoop::new());
    open(&factory, "app", 2).close();
    factory.event_loop().run_until_idle();

    let request = factory.open("app", 1).unwrap();
    let log = capture(&request);
    factory.event_loop().run_until_idle();
    assert!(matches!(&log.borrow()[0], Err(e) if e.name == "VersionError"));
}

#[test]
fn writes_commit_and_read_back() {
    let factory = MemoryFactory::new(EventLoop::new());
    let db = open(&factory, "app", 1);

    let txn = db
        .transaction(&["notes".to_string()], TransactionMode::ReadWrite)
        .unwrap();
    let events = txn_log(&txn);
    let store = txn.store("notes").unwrap();
    let added = capture(&store.add(json!({"text": "a"}), None).unwrap());
    let got = capture(&store.get(Key::from(1)).unwrap());
    factory.event_loop().run_until_idle();

    assert!(matches!(&added.borrow()[0], Ok(Outcome::Key(k)) if *k == Key::from(1)));
    assert!(
        matches!(&got.borrow()[0], Ok(Outcome::Value(v)) if *v == json!({"text": "a", "id": 1}))
    );
    assert_eq!(*events.borrow(), vec!["complete".to_string()]);
    assert_eq!(factory.record_count("app", "notes"), Some(1));
}

#[test]
fn failed_request_aborts_and_rolls_back() {
    let factory = MemoryFactory::new(EventLoop::new());
    let db = open(&factory, "app", 1);
    seed(&factory, &db, &[json!({"id": 1})]);

    let txn = db
        .transaction(&["notes".to_string()], TransactionMode::ReadWrite)
        .unwrap();
    let events = txn_log(&txn);
    let store = txn.store("notes").unwrap();
    let first = capture(&store.add(json!({"id": 2}), None).unwrap());
    let clash = capture(&store.add(json!({"id": 1}), None).unwrap());
    let after = capture(&store.add(json!({"id": 3}), None).unwrap());
    factory.event_loop().run_until_idle();

    assert!(matches!(&first.borrow()[0], Ok(_)));
    assert!(matches!(&clash.borrow()[0], Err(e) if e.name == "ConstraintError"));
    assert!(matches!(&after.borrow()[0], Err(e) if e.is_abort()));
    assert_eq!(
        *events.borrow(),
        vec!["error:ConstraintError".to_string(), "abort:ConstraintError".to_string()]
    );
    assert_eq!(factory.record_count("app", "notes"), Some(1));
}

#[test]
fn explicit_abort_discards_writes() {
    let factory = MemoryFactory::new(EventLoop::new());
    let db = open(&factory, "app", 1);

    let txn = db
        .transaction(&["notes".to_string()], TransactionMode::ReadWrite)
        .unwrap();
    let events = txn_log(&txn);
    let store = txn.store("notes").unwrap();
    let pending = capture(&store.put(json!({"text": "x"}), None).unwrap());
    txn.abort().unwrap();
    factory.event_loop().run_until_idle();

    assert!(matches!(&pending.borrow()[0], Err(e) if e.is_abort()));
    assert_eq!(*events.borrow(), vec!["abort:AbortError".to_string()]);
    assert_eq!(factory.record_count("app", "notes"), Some(0));
    assert!(txn.abort().is_err());
}

#[test]
fn finished_transaction_rejects_requests() {
    let factory = MemoryFactory::new(EventLoop::new());
    let db = open(&factory, "app", 1);

    let txn = db
        .transaction(&["notes".to_string()], TransactionMode::ReadWrite)
        .unwrap();
    let store = txn.store("notes").unwrap();
    factory.event_loop().run_until_idle();

    let err = store.put(json!({"id": 1}), None).unwrap_err();
    assert_eq!(err.name, "TransactionInactiveError");
}

#[test]
fn read_only_rejects_writes() {
    let factory = MemoryFactory::new(EventLoop::new());
    let db = open(&factory, "app", 1);

    let txn = db
        .transaction(&["notes".to_string()], TransactionMode::ReadOnly)
        .unwrap();
    let store = txn.store("notes").unwrap();
    assert_eq!(store.clear().unwrap_err().name, "ReadOnlyError");
    assert_eq!(store.add(json!({}), None).unwrap_err().name, "ReadOnlyError");
}

#[test]
fn transaction_scope_errors() {
    let factory = MemoryFactory::new(EventLoop::new());
    let db = open(&factory, "app", 1);

    assert_eq!(
        db.transaction(&[], TransactionMode::ReadOnly).unwrap_err().name,
        "InvalidAccessError"
    );
    assert_eq!(
        db.transaction(&["nope".to_string()], TransactionMode::ReadOnly)
            .unwrap_err()
            .name,
        "NotFoundError"
    );
    assert_eq!(
        db.create_store("late", StoreParams::default()).unwrap_err().name,
        "InvalidStateError"
    );

    db.close();
    assert_eq!(
        db.transaction(&["notes".to_string()], TransactionMode::ReadOnly)
            .unwrap_err()
            .name,
        "InvalidStateError"
    );
}

#[test]
fn handles_are_debug() {
    let factory = MemoryFactory::new(EventLoop::new());
    let db = open(&factory, "app", 1);
    let shown = format!("{db:?}");
    assert!(shown.contains("\"app\""), "{shown}");
    assert!(shown.contains("version: 1"), "{shown}");

    let txn = db
        .transaction(&["notes".to_string()], TransactionMode::ReadOnly)
        .unwrap();
    assert!(format!("{txn:?}").contains("ReadOnly"));

    let store = txn.store("notes").unwrap();
    let shown = format!("{store:?}");
    assert!(shown.contains("\"notes\""), "{shown}");
    assert!(shown.contains("auto_increment: true"), "{shown}");

    let index = store.index("tag").unwrap();
    assert!(format!("{index:?}").contains("\"tag\""));

    // Results carrying handles can be unwrapped on either side.
    let missing = txn.store("ghosts");
    assert_eq!(missing.unwrap_err().name, "NotFoundError");
}

#[test]
fn cursor_walks_store_and_index() {
    let factory = MemoryFactory::new(EventLoop::new());
    let db = open(&factory, "app", 1);
    seed(
        &factory,
        &db,
        &[
            json!({"tag": "b"}),
            json!({"tag": "a"}),
            json!({"tag": "b"}),
            json!({"tag": "c"}),
        ],
    );

    let walk = |direction: CursorDirection, index: Option<&str>| -> Vec<Key> {
        let txn = db
            .transaction(&["notes".to_string()], TransactionMode::ReadOnly)
            .unwrap();
        let store = txn.store("notes").unwrap();
        let request = match index {
            Some(name) => store.index(name).unwrap().open_cursor(None, direction),
            None => store.open_cursor(None, direction),
        }
        .unwrap();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        request.on_success(move |outcome| {
            if let Outcome::Cursor(Some(cursor)) = outcome {
                sink.borrow_mut().push(cursor.primary_key());
                cursor.continue_().unwrap();
            }
        });
        factory.event_loop().run_until_idle();
        let keys = seen.borrow().clone();
        keys
    };
    let keys = |ns: &[i32]| ns.iter().map(|n| Key::from(*n)).collect::<Vec<_>>();

    assert_eq!(walk(CursorDirection::Next, None), keys(&[1, 2, 3, 4]));
    assert_eq!(walk(CursorDirection::Prev, None), keys(&[4, 3, 2, 1]));
    assert_eq!(walk(CursorDirection::Next, Some("tag")), keys(&[2, 1, 3, 4]));
    assert_eq!(walk(CursorDirection::NextUnique, Some("tag")), keys(&[2, 1, 4]));
    assert_eq!(walk(CursorDirection::PrevUnique, Some("tag")), keys(&[4, 1, 2]));
}

#[test]
fn cursor_continue_twice_is_invalid() {
    let factory = MemoryFactory::new(EventLoop::new());
    let db = open(&factory, "app", 1);
    seed(&factory, &db, &[json!({}), json!({})]);

    let txn = db
        .transaction(&["notes".to_string()], TransactionMode::ReadOnly)
        .unwrap();
    let request = txn
        .store("notes")
        .unwrap()
        .open_cursor(None, CursorDirection::Next)
        .unwrap();
    let second = Rc::new(RefCell::new(None));
    let sink = Rc::clone(&second);
    request.on_success(move |outcome| {
        if let Outcome::Cursor(Some(cursor)) = outcome {
            if sink.borrow().is_none() {
                cursor.continue_().unwrap();
                *sink.borrow_mut() = Some(cursor.continue_().unwrap_err().name);
            }
        }
    });
    factory.event_loop().run_until_idle();
    assert_eq!(second.borrow().as_deref(), Some("InvalidStateError"));
}

#[test]
fn bulk_fetch_can_be_disabled() {
    let factory = MemoryFactory::with_config(EventLoop::new(), MemoryConfig::default().bulk_fetch(false));
    let db = open(&factory, "app", 1);
    let txn = db
        .transaction(&["notes".to_string()], TransactionMode::ReadOnly)
        .unwrap();
    let store = txn.store("notes").unwrap();
    assert!(store.get_all(None).is_none());
    assert!(store.get_all_keys(None).is_none());
}

#[test]
fn range_reads() {
    let factory = MemoryFactory::new(EventLoop::new());
    let db = open(&factory, "app", 1);
    seed(&factory, &db, &[json!({}), json!({}), json!({}), json!({})]);

    let txn = db
        .transaction(&["notes".to_string()], TransactionMode::ReadOnly)
        .unwrap();
    let store = txn.store("notes").unwrap();
    let range = KeyRange::lower_bound(Key::from(2), true);
    let count = capture(&store.count(Some(range.clone())).unwrap());
    let keys = capture(&store.get_all_keys(Some(range)).unwrap().unwrap());
    factory.event_loop().run_until_idle();

    assert!(matches!(&count.borrow()[0], Ok(Outcome::Count(2))));
    assert!(
        matches!(&keys.borrow()[0], Ok(Outcome::Keys(k)) if *k == vec![Key::from(3), Key::from(4)])
    );
}

#[test]
fn writers_on_the_same_store_serialize() {
    let factory = MemoryFactory::new(EventLoop::new());
    let db = open(&factory, "app", 1);
    let scope = ["notes".to_string()];
    let order = Rc::new(RefCell::new(Vec::new()));

    let first = db.transaction(&scope, TransactionMode::ReadWrite).unwrap();
    let second = db.transaction(&scope, TransactionMode::ReadWrite).unwrap();
    let done = Rc::clone(&order);
    first
        .events()
        .on_complete(move |()| done.borrow_mut().push("first complete"));

    let writes = [(&first, "first put"), (&second, "second put")];
    for (txn, label) in writes {
        let request = txn.store("notes").unwrap().put(json!({}), None).unwrap();
        let log = Rc::clone(&order);
        request.on_success(move |_| log.borrow_mut().push(label));
    }
    factory.event_loop().run_until_idle();

    assert_eq!(*order.borrow(), vec!["first put", "first complete", "second put"]);
}

#[test]
fn upgrade_blocks_until_connections_close() {
    let factory = MemoryFactory::new(EventLoop::new());
    let old = open(&factory, "app", 1);

    let request = factory.open("app", 2).unwrap();
    let blocked = Rc::new(Cell::new(None));
    let sink = Rc::clone(&blocked);
    request.on_blocked(move |change| sink.set(Some(change)));
    let log = capture(&request);
    factory.event_loop().run_until_idle();

    assert_eq!(
        blocked.get(),
        Some(VersionChange {
            old_version: 1,
            new_version: 2
        })
    );
    assert!(log.borrow().is_empty());

    old.close();
    factory.event_loop().run_until_idle();
    assert!(matches!(&log.borrow()[0], Ok(Outcome::Database(db)) if db.version() == 2));
}

#[test]
fn delete_waits_for_close() {
    let factory = MemoryFactory::new(EventLoop::new());
    let db = open(&factory, "app", 1);

    let request = factory.delete_database("app").unwrap();
    let log = capture(&request);
    factory.event_loop().run_until_idle();
    assert!(log.borrow().is_empty());

    db.close();
    factory.event_loop().run_until_idle();
    assert!(matches!(&log.borrow()[0], Ok(Outcome::Undefined)));
    assert!(factory.database_names().is_empty());
}

#[test]
fn aborted_upgrade_restores_previous_state() {
    let factory = MemoryFactory::new(EventLoop::new());
    let request = factory.open("app", 1).unwrap();
    request.on_upgrade_needed(|event| {
        event
            .database
            .create_store("notes", StoreParams::default())
            .unwrap();
        event.transaction.abort().unwrap();
    });
    let log = capture(&request);
    factory.event_loop().run_until_idle();

    assert!(matches!(&log.borrow()[0], Err(e) if e.is_abort()));
    assert_eq!(factory.version_of("app"), None);
    assert_eq!(factory.open_connections("app"), 0);
}
