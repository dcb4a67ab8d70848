//! Script virtual machine.
//!
//! Scripts are Lua 5.4 chunks. The pipeline mirrors a classic embedded VM:
//!
//! 1. [`crate::Database::compile`] turns source into bytecode, reporting
//!    syntax errors with their line.
//! 2. [`Vm::execute`] runs it with the `db` table bound to the database
//!    (see [`context`] for the available functions), inside an implicit
//!    transaction unless one is already open.
//! 3. `Vm::extract_*` reads the global variables the script left behind,
//!    coercing them with the tables documented in [`value`].
//!
//! # Example
//!
//! ```rust,no_run
//! use unqdb::{Database, Options};
//!
//! # fn main() -> Result<(), unqdb::Error> {
//! let db = Database::open("./data.db", Options::default())?;
//! db.store(b"account:1", b"250")?;
//! db.store(b"account:2", b"40")?;
//!
//! let mut vm = db.compile(r#"
//!     local from = tonumber(db.fetch("account:1"))
//!     local to = tonumber(db.fetch("account:2"))
//!     if from < 100 then
//!         error("insufficient balance")
//!     end
//!     db.store("account:1", tostring(from - 100))
//!     db.store("account:2", tostring(to + 100))
//!     remaining = from - 100
//! "#)?;
//! vm.execute()?;
//! assert_eq!(vm.extract_int64("remaining")?, Some(150));
//! # Ok(())
//! # }
//! ```

pub mod context;
pub mod value;
pub mod vm;

pub use context::ScriptContext;
pub use value::ScriptValue;
pub use vm::Vm;
