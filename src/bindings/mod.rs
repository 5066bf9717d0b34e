//! Capability bindings: the complete, enumerable API a report script sees
//! beyond the bare language.
//!
//! The set is built fresh for every execution and registered into that
//! execution's interpreter only. Functions that read the ledger are created
//! inside the interpreter's scope, borrow the [`ExecutionContext`] and
//! therefore cannot outlive the run. All of them are read-only and check the
//! run's deadline before doing any work.

mod accounts;
mod balances;
mod dates;
mod prices;
mod results;
mod securities;

use std::rc::Rc;

use mlua::{Function, Lua, MultiValue, Scope};
use tracing::debug;

use crate::sandbox::ExecutionContext;

pub use balances::Balance;
pub use dates::Date;

pub fn register<'scope, 'env, 'tx: 'env>(
    lua: &Lua,
    scope: &'scope Scope<'scope, 'env>,
    ctx: &'env ExecutionContext<'tx>,
) -> mlua::Result<()> {
    let globals = lua.globals();
    globals.set("accounts", accounts::module(lua, scope, ctx)?)?;
    globals.set("securities", securities::module(lua, scope, ctx)?)?;
    globals.set("balances", balances::module(lua, scope, ctx)?)?;
    globals.set("prices", prices::module(lua, scope, ctx)?)?;
    globals.set("date", dates::module(lua)?)?;
    // one result budget for every tabulation of the run
    globals.set("tabulation", results::module(lua, Rc::default())?)?;
    globals.set("print", print(lua, scope, ctx)?)?;
    Ok(())
}

// Scripts have no stdout; print goes to the server log instead.
fn print<'scope, 'env, 'tx: 'env>(
    lua: &Lua,
    scope: &'scope Scope<'scope, 'env>,
    ctx: &'env ExecutionContext<'tx>,
) -> mlua::Result<Function> {
    let tostring: Function = lua.globals().get("tostring")?;
    scope.create_function(move |_, args: MultiValue| {
        ctx.cancel.check()?;
        let mut parts = Vec::with_capacity(args.len());
        for arg in args {
            parts.push(tostring.call::<String>(arg)?);
        }
        debug!(report = ctx.report_id, user = ctx.user.id, "{}", parts.join("\t"));
        Ok(())
    })
}
