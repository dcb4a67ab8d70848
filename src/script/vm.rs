//! Compiled scripts.

use super::context::ScriptContext;
use super::value::ScriptValue;
use crate::error::{Error, Result};
use crate::Database;
use mlua::{Function, HookTriggers, Lua, RegistryKey, Table, Value};
use std::cell::RefCell;
use std::time::Instant;

const CHUNK_NAME: &str = "script";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VmState {
    Compiled,
    Executed,
}

/// A compiled script bound to a database.
///
/// Created by [`Database::compile`]. Run it with [`Vm::execute`], then read
/// the variables it left behind with the `extract_*` methods. The script's
/// globals live in a table of their own, so only what it assigned can be
/// extracted; library names such as `math` or `print` read through to the
/// shared globals.
///
/// If no transaction is open when the script starts, the run is wrapped in
/// one: committed when the script finishes, rolled back if it faults. Inside
/// an explicit transaction opened by the same thread the script's writes
/// simply join it; another thread's transaction is waited out first.
///
/// # Example
///
/// ```rust,no_run
/// use unqdb::{Database, Options};
///
/// # fn main() -> Result<(), unqdb::Error> {
/// let db = Database::open("./data.db", Options::default())?;
/// let mut vm = db.compile(r#"
///     db.store("greeting", "hello")
///     total = db.count()
///     print("stored", total)
/// "#)?;
/// vm.execute()?;
///
/// assert_eq!(vm.extract_int("total")?, Some(1));
/// assert_eq!(vm.output(), "stored\t1\n");
/// # Ok(())
/// # }
/// ```
pub struct Vm<'db> {
    db: &'db Database,
    source: String,
    lua: Lua,
    chunk: RegistryKey,
    env: RegistryKey,
    output: String,
    state: VmState,
}

impl<'db> Vm<'db> {
    pub(crate) fn compile(db: &'db Database, source: &str) -> Result<Self> {
        let lua = Lua::new();
        let (chunk, env) = {
            let env = lua.create_table().map_err(vm_error)?;
            let meta = lua.create_table().map_err(vm_error)?;
            meta.set("__index", lua.globals()).map_err(vm_error)?;
            env.set_metatable(Some(meta));

            let function = lua
                .load(source)
                .set_name(CHUNK_NAME)
                .set_environment(env.clone())
                .into_function()
                .map_err(compile_error)?;
            (
                lua.create_registry_value(function).map_err(vm_error)?,
                lua.create_registry_value(env).map_err(vm_error)?,
            )
        };

        Ok(Self {
            db,
            source: source.to_string(),
            lua,
            chunk,
            env,
            output: String::new(),
            state: VmState::Compiled,
        })
    }

    /// Runs the script.
    ///
    /// A script runs once per compile or [`Vm::reset`]; running it again
    /// fails with `InvalidState`.
    pub fn execute(&mut self) -> Result<()> {
        if self.state == VmState::Executed {
            return Err(Error::invalid_state("script already executed; reset it first"));
        }
        let implicit = self.db.begin_implicit()?;
        self.state = VmState::Executed;

        let start = Instant::now();
        if let Some(timeout) = self.db.script_timeout() {
            self.lua.set_hook(
                HookTriggers { every_nth_instruction: Some(1000), ..Default::default() },
                move |_lua, _debug| {
                    if start.elapsed() > timeout {
                        Err(mlua::Error::RuntimeError("script execution timeout".to_string()))
                    } else {
                        Ok(())
                    }
                },
            );
        }

        let output = RefCell::new(String::new());
        let result = self.run(&output);
        self.lua.remove_hook();
        self.output.push_str(&output.into_inner());

        match result {
            Ok(()) => {
                if implicit {
                    self.db.commit()?;
                }
                log::debug!("script executed in {:?}", start.elapsed());
                Ok(())
            }
            Err(e) => {
                log::warn!("script failed: {}", e);
                if implicit {
                    self.db.rollback()?;
                }
                Err(vm_error(e))
            }
        }
    }

    fn run(&self, output: &RefCell<String>) -> mlua::Result<()> {
        let context = ScriptContext::new(self.db, output);
        let function: Function<'_> = self.lua.registry_value(&self.chunk)?;
        let globals = self.lua.globals();
        let print: Value<'_> = globals.get("print")?;

        let result = self.lua.scope(|scope| {
            context.install(&self.lua, scope)?;
            function.call::<_, ()>(())
        });

        // The scoped host functions are dead now; don't leave them reachable.
        globals.set("db", Value::Nil)?;
        globals.set("print", print)?;
        result
    }

    /// Returns the script to its freshly compiled state: globals and output
    /// are cleared and it may be executed again.
    pub fn reset(&mut self) -> Result<()> {
        let fresh = Vm::compile(self.db, &self.source)?;
        *self = fresh;
        Ok(())
    }

    /// Text written by `print`.
    pub fn output(&self) -> &str {
        &self.output
    }

    /// The compiled chunk in Lua bytecode form.
    pub fn bytecode(&self) -> Result<Vec<u8>> {
        let function: Function<'_> = self.lua.registry_value(&self.chunk).map_err(vm_error)?;
        Ok(function.dump(false))
    }

    /// The source the script was compiled from.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Reads a variable the script assigned; `None` when it is not set.
    pub fn extract(&self, name: &str) -> Result<Option<ScriptValue>> {
        let env: Table<'_> = self.lua.registry_value(&self.env).map_err(vm_error)?;
        let value: Value<'_> = env.raw_get(name).map_err(vm_error)?;
        Ok(match value {
            Value::Nil => None,
            value => Some(ScriptValue::from_lua(&value)),
        })
    }

    /// A variable as a 32-bit integer (saturating).
    pub fn extract_int(&self, name: &str) -> Result<Option<i32>> {
        Ok(self.extract(name)?.map(|v| v.to_int()))
    }

    /// A variable as a 64-bit integer.
    pub fn extract_int64(&self, name: &str) -> Result<Option<i64>> {
        Ok(self.extract(name)?.map(|v| v.to_int64()))
    }

    /// A variable as a float.
    pub fn extract_float(&self, name: &str) -> Result<Option<f64>> {
        Ok(self.extract(name)?.map(|v| v.to_float()))
    }

    /// A variable as a boolean.
    pub fn extract_bool(&self, name: &str) -> Result<Option<bool>> {
        Ok(self.extract(name)?.map(|v| v.to_bool()))
    }

    /// A variable as a string.
    pub fn extract_string(&self, name: &str) -> Result<Option<String>> {
        Ok(self.extract(name)?.map(|v| v.to_string_lossy()))
    }

    /// Releases the VM. Dropping it does the same.
    pub fn free(self) {}
}

impl std::fmt::Debug for Vm<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vm")
            .field("state", &self.state)
            .field("source_len", &self.source.len())
            .field("output_len", &self.output.len())
            .finish()
    }
}

fn compile_error(err: mlua::Error) -> Error {
    match err {
        mlua::Error::SyntaxError { message, .. } => {
            let line = diagnostic_line(&message);
            Error::Compile { message, line }
        }
        other => Error::Compile { message: other.to_string(), line: None },
    }
}

fn vm_error(err: mlua::Error) -> Error {
    Error::Vm(err.to_string())
}

/// Pulls the line number out of a diagnostic like `[string "script"]:3: ...`.
fn diagnostic_line(message: &str) -> Option<u32> {
    message.match_indices(':').find_map(|(at, _)| {
        let rest = &message[at + 1..];
        let len = rest.bytes().take_while(u8::is_ascii_digit).count();
        if len > 0 && rest[len..].starts_with(':') {
            rest[..len].parse().ok()
        } else {
            None
        }
    })
}
