// Transaction tests for unqdb
// Explicit transactions, auto-commit and atomicity of failed operations

use unqdb::{Database, Error, Options};
use tempfile::TempDir;

#[test]
fn test_commit_persists() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("db");

    {
        let db = Database::open(&path, Options::default()).unwrap();
        db.begin().unwrap();
        for i in 0..100 {
            db.store(format!("key_{}", i).as_bytes(), b"committed").unwrap();
        }
        assert!(db.in_transaction());
        db.commit().unwrap();
        assert!(!db.in_transaction());
    }

    let db = Database::open(&path, Options::default()).unwrap();
    assert_eq!(db.len(), 100);
}

#[test]
fn test_rollback_restores_previous_state() {
    let dir = TempDir::new().unwrap();
    let db = Database::open(dir.path().join("db"), Options::default().sync(false)).unwrap();

    db.store(b"balance", b"100").unwrap();
    db.store(b"keep", b"1").unwrap();

    db.begin().unwrap();
    db.store(b"balance", b"0").unwrap();
    db.delete(b"keep").unwrap();
    db.store(b"temp", b"x").unwrap();
    assert_eq!(db.len(), 2);
    db.rollback().unwrap();

    assert_eq!(db.fetch(b"balance").unwrap(), b"100".to_vec());
    assert!(db.contains(b"keep").unwrap());
    assert!(!db.contains(b"temp").unwrap());
    assert_eq!(db.len(), 2);
}

#[test]
fn test_rollback_on_memory_engine() {
    let db = Database::memory().unwrap();
    db.store(b"a", b"1").unwrap();

    db.begin().unwrap();
    db.store(b"a", b"2").unwrap();
    db.delete(b"a").unwrap();
    db.rollback().unwrap();
    assert_eq!(db.fetch(b"a").unwrap(), b"1".to_vec());

    db.begin().unwrap();
    db.store(b"b", b"2").unwrap();
    db.commit().unwrap();
    assert_eq!(db.len(), 2);
}

#[test]
fn test_protocol_errors() {
    let db = Database::memory().unwrap();

    assert!(matches!(db.commit(), Err(Error::LockError(_))));
    db.begin().unwrap();
    assert!(matches!(db.begin(), Err(Error::LockError(_))));
    db.commit().unwrap();
    assert!(matches!(db.rollback(), Err(Error::LockError(_))));
}

#[test]
fn test_failed_store_inside_transaction_changes_nothing() {
    let dir = TempDir::new().unwrap();
    let db = Database::open(
        dir.path().join("db"),
        Options::default().sync(false).page_size(512).max_pages(8),
    )
    .unwrap();

    db.begin().unwrap();
    db.store(b"small", b"fits").unwrap();

    // Needs far more pages than the file may hold.
    let mut state = 0x9e37_79b9_7f4a_7c15u64;
    let huge: Vec<u8> = (0..64 * 1024)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state >> 56) as u8
        })
        .collect();
    let err = db.store(b"huge", &huge).unwrap_err();
    assert!(matches!(err, Error::Full(_)), "unexpected error: {}", err);

    // The transaction is still usable and kept its earlier write.
    assert!(db.in_transaction());
    assert_eq!(db.fetch(b"small").unwrap(), b"fits".to_vec());
    assert!(!db.contains(b"huge").unwrap());
    db.commit().unwrap();
    assert_eq!(db.len(), 1);
}

#[test]
fn test_oversized_key_is_rejected() {
    let dir = TempDir::new().unwrap();
    let db = Database::open(dir.path().join("db"), Options::default().page_size(1024)).unwrap();

    let key = vec![b'k'; 1024 / 8 + 1];
    assert!(matches!(db.store(&key, b"v"), Err(Error::LimitReached(_))));
    db.store(&key[..128], b"v").unwrap();
}

#[test]
fn test_drop_commits_open_transaction() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("db");

    {
        let db = Database::open(&path, Options::default()).unwrap();
        db.begin().unwrap();
        db.store(b"k", b"v").unwrap();
    }

    let db = Database::open(&path, Options::default()).unwrap();
    assert_eq!(db.fetch(b"k").unwrap(), b"v".to_vec());
}
