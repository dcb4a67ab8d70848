//! Script example for unqdb
//!
//! Runs a Lua transfer between two accounts. The second run fails half way
//! and its writes are rolled back.

use std::time::Duration;
use unqdb::{Database, DbConfig};

const TRANSFER: &str = r#"
local from = tonumber(db.fetch("account:alice"))
local to = tonumber(db.fetch("account:bob"))
db.store("account:alice", tostring(from - amount))
if from < amount then
    error("insufficient balance: " .. from)
end
db.store("account:bob", tostring(to + amount))
print("moved", amount)
"#;

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let db = Database::memory()?;
    db.configure(DbConfig::ScriptTimeout(Some(Duration::from_secs(1))))?;
    db.store(b"account:alice", b"150")?;
    db.store(b"account:bob", b"20")?;

    for amount in [100, 100] {
        let mut vm = db.compile(&format!("amount = {}\n{}", amount, TRANSFER))?;
        match vm.execute() {
            Ok(()) => print!("{}", vm.output()),
            Err(e) => println!("transfer of {} failed: {}", amount, e),
        }
    }

    for account in ["account:alice", "account:bob"] {
        let balance = db.fetch(account.as_bytes())?;
        println!("{} = {}", account, String::from_utf8_lossy(&balance));
    }

    let vm = db.compile(TRANSFER)?;
    println!("compiled chunk: {} bytes of bytecode", vm.bytecode()?.len());

    Ok(())
}
