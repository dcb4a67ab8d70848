//! Host functions exposed to scripts.
//!
//! During one execution the global `db` table is bound to the database:
//!
//! | Function                 | Result                                  |
//! |--------------------------|-----------------------------------------|
//! | `db.store(key, value)`   | nothing; raises on failure              |
//! | `db.append(key, value)`  | nothing; raises on failure              |
//! | `db.fetch(key)`          | the value, or `nil` when absent         |
//! | `db.delete(key)`         | `true` if a record was removed          |
//! | `db.exists(key)`         | boolean                                 |
//! | `db.count()`             | number of records                       |
//!
//! `print` appends its arguments, tab separated, to the VM output buffer.
//! The functions are scoped to the execution and become invalid after it.

use crate::Database;
use mlua::{Lua, Scope, Table, Value, Variadic};
use std::cell::RefCell;

/// Everything a running script can reach.
pub struct ScriptContext<'a> {
    db: &'a Database,
    output: &'a RefCell<String>,
}

impl<'a> ScriptContext<'a> {
    /// Binds a database and an output buffer.
    pub fn new(db: &'a Database, output: &'a RefCell<String>) -> Self {
        Self { db, output }
    }

    /// Installs `db` and `print` as globals for the lifetime of `scope`.
    pub fn install<'lua, 'scope>(
        &self,
        lua: &'lua Lua,
        scope: &Scope<'lua, 'scope>,
    ) -> mlua::Result<()>
    where
        'a: 'scope,
    {
        let db = self.db;
        let output = self.output;
        let table: Table<'lua> = lua.create_table()?;

        table.set(
            "store",
            scope.create_function(move |_, (key, value): (mlua::String<'_>, mlua::String<'_>)| {
                db.store(key.as_bytes(), value.as_bytes()).map_err(mlua::Error::external)
            })?,
        )?;

        table.set(
            "append",
            scope.create_function(move |_, (key, value): (mlua::String<'_>, mlua::String<'_>)| {
                db.append(key.as_bytes(), value.as_bytes()).map_err(mlua::Error::external)
            })?,
        )?;

        table.set(
            "fetch",
            scope.create_function(move |lua, key: mlua::String<'_>| {
                match db.fetch_optional(key.as_bytes()).map_err(mlua::Error::external)? {
                    Some(value) => Ok(Value::String(lua.create_string(&value)?)),
                    None => Ok(Value::Nil),
                }
            })?,
        )?;

        table.set(
            "delete",
            scope.create_function(move |_, key: mlua::String<'_>| match db.delete(key.as_bytes()) {
                Ok(()) => Ok(true),
                Err(e) if e.is_not_found() => Ok(false),
                Err(e) => Err(mlua::Error::external(e)),
            })?,
        )?;

        table.set(
            "exists",
            scope.create_function(move |_, key: mlua::String<'_>| {
                db.contains(key.as_bytes()).map_err(mlua::Error::external)
            })?,
        )?;

        table.set("count", scope.create_function(move |_, ()| Ok(db.len() as i64))?)?;

        let globals = lua.globals();
        globals.set("db", table)?;

        globals.set(
            "print",
            scope.create_function(move |lua, args: Variadic<Value<'_>>| {
                let tostring: mlua::Function<'_> = lua.globals().get("tostring")?;
                let mut line = String::new();
                for (i, arg) in args.into_iter().enumerate() {
                    if i > 0 {
                        line.push('\t');
                    }
                    let text: mlua::String<'_> = tostring.call(arg)?;
                    line.push_str(&String::from_utf8_lossy(text.as_bytes()));
                }
                line.push('\n');
                output.borrow_mut().push_str(&line);
                Ok(())
            })?,
        )?;

        Ok(())
    }
}
