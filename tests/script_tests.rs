// Script VM tests for unqdb
// Compiling, running and inspecting Lua scripts bound to a database

use std::time::Duration;
use tempfile::TempDir;
use unqdb::{Database, DbConfig, Error, ErrorCode, Options, ScriptValue};

fn open(dir: &TempDir) -> Database {
    Database::open(dir.path().join("db"), Options::default().sync(false)).unwrap()
}

#[test]
fn test_script_reads_and_writes() {
    let dir = TempDir::new().unwrap();
    let db = open(&dir);
    db.store(b"account:1", b"250").unwrap();
    db.store(b"account:2", b"40").unwrap();

    let mut vm = db
        .compile(
            r#"
            local from = tonumber(db.fetch("account:1"))
            local to = tonumber(db.fetch("account:2"))
            db.store("account:1", tostring(from - 100))
            db.store("account:2", tostring(to + 100))
            db.append("audit", "transfer;")
            remaining = from - 100
            missing = db.fetch("nope")
            "#,
        )
        .unwrap();
    vm.execute().unwrap();

    assert_eq!(db.fetch(b"account:1").unwrap(), b"150".to_vec());
    assert_eq!(db.fetch(b"account:2").unwrap(), b"140".to_vec());
    assert_eq!(db.fetch(b"audit").unwrap(), b"transfer;".to_vec());
    assert_eq!(vm.extract_int64("remaining").unwrap(), Some(150));
    assert_eq!(vm.extract("missing").unwrap(), None);
}

#[test]
fn test_fault_rolls_back_implicit_transaction() {
    let dir = TempDir::new().unwrap();
    let db = open(&dir);
    db.store(b"balance", b"10").unwrap();

    let mut vm = db
        .compile(
            r#"
            db.store("balance", "0")
            db.store("ghost", "boo")
            error("insufficient funds")
            "#,
        )
        .unwrap();
    let err = vm.execute().unwrap_err();
    assert!(matches!(&err, Error::Vm(msg) if msg.contains("insufficient funds")));
    assert_eq!(err.code(), ErrorCode::VmError);

    assert_eq!(db.fetch(b"balance").unwrap(), b"10".to_vec());
    assert!(!db.contains(b"ghost").unwrap());
    assert!(!db.in_transaction());
}

#[test]
fn test_script_joins_explicit_transaction() {
    let dir = TempDir::new().unwrap();
    let db = open(&dir);

    db.begin().unwrap();
    let mut vm = db.compile(r#"db.store("inside", "1")"#).unwrap();
    vm.execute().unwrap();
    assert!(db.in_transaction());
    drop(vm);

    db.rollback().unwrap();
    assert!(!db.contains(b"inside").unwrap());
}

#[test]
fn test_delete_exists_count() {
    let db = Database::memory().unwrap();
    db.store(b"a", b"1").unwrap();
    db.store(b"b", b"2").unwrap();

    let mut vm = db
        .compile(
            r#"
            removed = db.delete("a")
            removed_again = db.delete("a")
            has_b = db.exists("b")
            total = db.count()
            "#,
        )
        .unwrap();
    vm.execute().unwrap();

    assert_eq!(vm.extract_bool("removed").unwrap(), Some(true));
    assert_eq!(vm.extract_bool("removed_again").unwrap(), Some(false));
    assert_eq!(vm.extract_bool("has_b").unwrap(), Some(true));
    assert_eq!(vm.extract_int("total").unwrap(), Some(1));
}

#[test]
fn test_print_is_captured() {
    let db = Database::memory().unwrap();
    let mut vm = db.compile(r#"print("hello", 42, true) print(nil)"#).unwrap();
    vm.execute().unwrap();
    assert_eq!(vm.output(), "hello\t42\ttrue\nnil\n");
}

#[test]
fn test_extract_coercions() {
    let db = Database::memory().unwrap();
    let mut vm = db
        .compile(
            r#"
            n = 42
            f = 2.75
            s = "  17 apples"
            b = false
            t = {}
            "#,
        )
        .unwrap();
    vm.execute().unwrap();

    assert_eq!(vm.extract("n").unwrap(), Some(ScriptValue::Int(42)));
    assert_eq!(vm.extract_float("n").unwrap(), Some(42.0));
    assert_eq!(vm.extract_string("n").unwrap(), Some("42".to_string()));

    assert_eq!(vm.extract_int("f").unwrap(), Some(2));
    assert_eq!(vm.extract_bool("f").unwrap(), Some(true));

    assert_eq!(vm.extract_int("s").unwrap(), Some(17));
    assert_eq!(vm.extract_bool("b").unwrap(), Some(false));
    assert_eq!(vm.extract_int("b").unwrap(), Some(0));

    assert_eq!(vm.extract("t").unwrap(), Some(ScriptValue::Table));
    assert_eq!(vm.extract_int("unset").unwrap(), None);
}

#[test]
fn test_library_globals_are_not_extractable() {
    let db = Database::memory().unwrap();
    let mut vm = db.compile("root = math.sqrt(16)").unwrap();
    vm.execute().unwrap();

    assert_eq!(vm.extract_int("root").unwrap(), Some(4));
    assert_eq!(vm.extract("math").unwrap(), None);
    assert_eq!(vm.extract("_VERSION").unwrap(), None);
    assert_eq!(vm.extract("tostring").unwrap(), None);
}

#[test]
fn test_compile_error() {
    let db = Database::memory().unwrap();
    let err = db.compile("x = 1\ny = 2\nif then end").unwrap_err();
    assert_eq!(err.code(), ErrorCode::CompileError);
    assert!(matches!(err, Error::Compile { line: Some(3), .. }));
}

#[test]
fn test_timeout_aborts_script() {
    let dir = TempDir::new().unwrap();
    let db = open(&dir);
    db.configure(DbConfig::ScriptTimeout(Some(Duration::from_millis(50)))).unwrap();

    let mut vm = db
        .compile(
            r#"
            db.store("before", "loop")
            while true do end
            "#,
        )
        .unwrap();
    let err = vm.execute().unwrap_err();
    assert!(matches!(&err, Error::Vm(msg) if msg.contains("timeout")));
    assert!(!db.contains(b"before").unwrap());
}

#[test]
fn test_host_functions_do_not_outlive_execution() {
    let db = Database::memory().unwrap();
    let mut vm = db.compile("saved = db").unwrap();
    vm.execute().unwrap();

    // The table survives but its functions were scoped to the run.
    assert_eq!(vm.extract("saved").unwrap(), Some(ScriptValue::Table));
    vm.reset().unwrap();
    assert_eq!(vm.extract("saved").unwrap(), None);
}

#[test]
fn test_read_only_database_runs_without_transaction() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("db");
    {
        let db = Database::open(&path, Options::default()).unwrap();
        db.store(b"k", b"v").unwrap();
    }

    let db = Database::open(&path, Options::default().read_only(true)).unwrap();
    let mut vm = db.compile(r#"value = db.fetch("k")"#).unwrap();
    vm.execute().unwrap();
    assert_eq!(vm.extract_string("value").unwrap(), Some("v".to_string()));

    let mut writer = db.compile(r#"db.store("k", "changed")"#).unwrap();
    assert!(matches!(writer.execute(), Err(Error::Vm(_))));
}

#[test]
fn test_source_and_free() {
    let db = Database::memory().unwrap();
    let vm = db.compile("return 1").unwrap();
    assert_eq!(vm.source(), "return 1");
    vm.free();
}
