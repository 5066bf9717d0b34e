use std::rc::Rc;

use mlua::{Lua, Table};

use crate::tabulation::{ResultBudget, TabulationHandle};

/// `tabulation.new{...}`: the only way a script can produce a result. Every
/// tabulation it creates draws on the same `budget`.
pub(super) fn module(lua: &Lua, budget: Rc<ResultBudget>) -> mlua::Result<Table> {
    let module = lua.create_table()?;
    module.set(
        "new",
        lua.create_function(move |_, options: Option<Table>| {
            let handle = TabulationHandle::new(Rc::clone(&budget))?;
            if let Some(options) = options {
                handle.configure(&options)?;
            }
            Ok(handle)
        })?,
    )?;
    Ok(module)
}
