// Concurrent Access Tests for unqdb
// These tests verify thread-safety of a shared database handle

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;
use tempfile::TempDir;
use unqdb::{Database, Error, Options};

fn open(dir: &TempDir) -> Database {
    Database::open(dir.path().join("db"), Options::default().sync(false)).unwrap()
}

/// Test concurrent writes from multiple threads
#[test]
fn test_concurrent_writes() {
    let dir = TempDir::new().unwrap();
    let db = open(&dir);

    let num_threads = 8;
    let writes_per_thread = 100;

    crossbeam::scope(|s| {
        for thread_id in 0..num_threads {
            let db = &db;
            s.spawn(move |_| {
                for i in 0..writes_per_thread {
                    let key = format!("thread_{}_key_{}", thread_id, i);
                    let value = format!("thread_{}_value_{}", thread_id, i);
                    db.store(key.as_bytes(), value.as_bytes()).unwrap();
                }
            });
        }
    })
    .unwrap();

    assert_eq!(db.len(), (num_threads * writes_per_thread) as u64);
    for thread_id in 0..num_threads {
        for i in 0..writes_per_thread {
            let key = format!("thread_{}_key_{}", thread_id, i);
            let expected = format!("thread_{}_value_{}", thread_id, i);
            assert_eq!(db.fetch(key.as_bytes()).unwrap(), expected.into_bytes());
        }
    }
}

/// Appends from many threads must not lose updates
#[test]
fn test_concurrent_appends_are_atomic() {
    let dir = TempDir::new().unwrap();
    let db = open(&dir);

    crossbeam::scope(|s| {
        for _ in 0..4 {
            s.spawn(|_| {
                for _ in 0..250 {
                    db.append(b"counter", b"x").unwrap();
                }
            });
        }
    })
    .unwrap();

    assert_eq!(db.fetch(b"counter").unwrap().len(), 1000);
}

/// Readers and writers running at the same time
#[test]
fn test_concurrent_reads_and_writes() {
    let dir = TempDir::new().unwrap();
    let db = Arc::new(open(&dir));
    for i in 0..200 {
        db.store(format!("stable_{:03}", i).as_bytes(), b"fixed").unwrap();
    }

    let barrier = Arc::new(Barrier::new(4));
    let reads = Arc::new(AtomicUsize::new(0));
    let mut handles = vec![];

    for writer in 0..2 {
        let db = Arc::clone(&db);
        let barrier = Arc::clone(&barrier);
        handles.push(thread::spawn(move || {
            barrier.wait();
            for i in 0..200 {
                db.store(format!("w{}_{:03}", writer, i).as_bytes(), b"v").unwrap();
            }
        }));
    }
    for _ in 0..2 {
        let db = Arc::clone(&db);
        let barrier = Arc::clone(&barrier);
        let reads = Arc::clone(&reads);
        handles.push(thread::spawn(move || {
            barrier.wait();
            for i in 0..200 {
                let value = db.fetch(format!("stable_{:03}", i).as_bytes()).unwrap();
                assert_eq!(value, b"fixed".to_vec());
                reads.fetch_add(1, Ordering::Relaxed);
            }
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(reads.load(Ordering::Relaxed), 400);
    assert_eq!(db.len(), 600);
}

/// Only one thread at a time may hold the explicit transaction
#[test]
fn test_transaction_is_exclusive() {
    let db = Database::memory().unwrap();
    let started = AtomicUsize::new(0);
    let refused = AtomicUsize::new(0);
    let barrier = Barrier::new(4);

    db.begin().unwrap();
    crossbeam::scope(|s| {
        for _ in 0..4 {
            s.spawn(|_| {
                barrier.wait();
                match db.begin() {
                    Ok(()) => {
                        started.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(Error::LockError(_)) => {
                        refused.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => panic!("unexpected error: {}", e),
                }
            });
        }
    })
    .unwrap();
    db.commit().unwrap();

    assert_eq!(started.load(Ordering::Relaxed), 0);
    assert_eq!(refused.load(Ordering::Relaxed), 4);
}

/// A write from another thread waits for the open transaction instead of
/// joining it, so a rollback cannot take it along
#[test]
fn test_other_threads_wait_for_transaction() {
    let dir = TempDir::new().unwrap();
    let db = open(&dir);
    let stored = AtomicBool::new(false);

    db.begin().unwrap();
    db.store(b"txn_key", b"discarded").unwrap();

    crossbeam::scope(|s| {
        s.spawn(|_| {
            db.store(b"other", b"kept").unwrap();
            stored.store(true, Ordering::SeqCst);
        });

        thread::sleep(Duration::from_millis(100));
        let early = stored.load(Ordering::SeqCst);
        // The owner is never blocked by its own transaction.
        let own = db.fetch(b"txn_key");
        db.rollback().unwrap();

        assert!(!early, "write slipped into another thread's transaction");
        assert_eq!(own.unwrap(), b"discarded".to_vec());
    })
    .unwrap();

    assert!(stored.load(Ordering::SeqCst));
    assert_eq!(db.fetch(b"other").unwrap(), b"kept".to_vec());
    assert!(!db.contains(b"txn_key").unwrap());
    assert!(!db.in_transaction());
}

/// A failing script only rolls back its own writes
#[test]
fn test_script_rollback_spares_other_threads() {
    let dir = TempDir::new().unwrap();
    let db = open(&dir);
    let barrier = Barrier::new(2);

    crossbeam::scope(|s| {
        s.spawn(|_| {
            let mut vm = db
                .compile(
                    r#"
                    db.store("script_key", "discarded")
                    local start = os.clock()
                    while os.clock() - start < 0.3 do end
                    error("give up")
                    "#,
                )
                .unwrap();
            barrier.wait();
            assert!(matches!(vm.execute(), Err(Error::Vm(_))));
        });
        s.spawn(|_| {
            barrier.wait();
            thread::sleep(Duration::from_millis(50));
            db.store(b"other_thread", b"kept").unwrap();
        });
    })
    .unwrap();

    assert_eq!(db.fetch(b"other_thread").unwrap(), b"kept".to_vec());
    assert!(!db.contains(b"script_key").unwrap());
}

/// Only the thread that began a transaction can end it
#[test]
fn test_transaction_ends_on_owning_thread() {
    let db = Database::memory().unwrap();
    db.begin().unwrap();
    db.store(b"k", b"v").unwrap();

    crossbeam::scope(|s| {
        s.spawn(|_| {
            assert!(matches!(db.commit(), Err(Error::LockError(_))));
            assert!(matches!(db.rollback(), Err(Error::LockError(_))));
            assert!(matches!(db.begin(), Err(Error::LockError(_))));
        });
    })
    .unwrap();

    assert!(db.in_transaction());
    db.commit().unwrap();
    assert_eq!(db.fetch(b"k").unwrap(), b"v".to_vec());
}

/// Each thread opens and closes its own database
#[test]
fn test_independent_databases_per_thread() {
    let dir = TempDir::new().unwrap();

    crossbeam::scope(|s| {
        for t in 0..4 {
            let path = dir.path().join(format!("db_{}", t));
            s.spawn(move |_| {
                let db = Database::open(&path, Options::default().sync(false)).unwrap();
                for i in 0..50 {
                    db.store(format!("{}", i).as_bytes(), format!("{}", t).as_bytes()).unwrap();
                }
                db.close().unwrap();

                let db = Database::open(&path, Options::default().read_only(true)).unwrap();
                assert_eq!(db.len(), 50);
            });
        }
    })
    .unwrap();
}
