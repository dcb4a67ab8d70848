//! Basic usage example for unqdb
//!
//! This example demonstrates the fundamental operations:
//! - Opening a database
//! - Storing, appending and fetching records
//! - Walking the records with a cursor
//! - Grouping writes in a transaction

use anyhow::Context;
use unqdb::{Database, Options};

fn main() -> anyhow::Result<()> {
    // Initialize logger
    env_logger::init();

    let dir = std::env::temp_dir().join("unqdb_basic_example");
    std::fs::create_dir_all(&dir)?;
    let path = dir.join("basic.db");

    // Open database (will be created if it doesn't exist)
    let db = Database::open(&path, Options::default().page_cache_size(64))
        .with_context(|| format!("opening {}", path.display()))?;
    println!("Database opened at {}", path.display());

    println!("Writing data...");
    db.store(b"fruit:apple", b"red")?;
    db.store(b"fruit:banana", b"yellow")?;
    db.store(b"fruit:cherry", b"dark red")?;
    db.append(b"fruit:banana", b", sometimes green")?;

    println!("Reading data...");
    let banana = db.fetch(b"fruit:banana")?;
    println!("fruit:banana => {}", String::from_utf8_lossy(&banana));

    println!("Iterating from fruit:b...");
    let mut cursor = db.cursor();
    if cursor.seek_ge(b"fruit:b").is_ok() {
        loop {
            let (key, value) = cursor.entry()?;
            println!("  {} => {}", String::from_utf8_lossy(key), String::from_utf8_lossy(value));
            if cursor.next().is_err() {
                break;
            }
        }
    }
    cursor.close();

    println!("Rolling back a transaction...");
    db.begin()?;
    db.delete(b"fruit:apple")?;
    db.rollback()?;
    println!("fruit:apple still present: {}", db.contains(b"fruit:apple")?);

    if let Some(stats) = db.stats() {
        println!("commits: {}, pages written: {}", stats.commits, stats.pages_written);
    }

    db.close()?;
    println!("Database closed");

    Ok(())
}
