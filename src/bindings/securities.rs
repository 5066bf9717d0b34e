use mlua::{FromLua, Lua, MetaMethod, Scope, Table, UserData, UserDataFields, UserDataMethods, Value};

use crate::ledger::{Security, SecurityId};
use crate::sandbox::ExecutionContext;

impl UserData for Security {
    fn add_fields<F: UserDataFields<Self>>(fields: &mut F) {
        fields.add_field_method_get("id", |_, s| Ok(s.id));
        fields.add_field_method_get("name", |_, s| Ok(s.name.clone()));
        fields.add_field_method_get("description", |_, s| Ok(s.description.clone()));
        fields.add_field_method_get("symbol", |_, s| Ok(s.symbol.clone()));
        fields.add_field_method_get("precision", |_, s| Ok(s.precision));
        fields.add_field_method_get("type", |_, s| Ok(s.security_type.name()));
    }

    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_meta_method(MetaMethod::ToString, |_, s, ()| Ok(format!("security {}: {}", s.id, s.symbol)));
    }
}

/// A security argument: either a security handle or a bare id.
#[derive(Debug, Clone, Copy)]
pub struct SecurityRef(pub SecurityId);

impl FromLua for SecurityRef {
    fn from_lua(value: Value, _: &Lua) -> mlua::Result<Self> {
        match value {
            Value::Integer(id) => Ok(Self(id)),
            Value::Number(n) if n.fract() == 0.0 => Ok(Self(n as SecurityId)),
            Value::UserData(ud) => Ok(Self(ud.borrow::<Security>()?.id)),
            other => Err(mlua::Error::runtime(format!("expected a security or security id, got {}", other.type_name()))),
        }
    }
}

/// Securities are shared reference data, so only `default` looks at the user.
pub(super) fn module<'scope, 'env, 'tx: 'env>(
    lua: &Lua,
    scope: &'scope Scope<'scope, 'env>,
    ctx: &'env ExecutionContext<'tx>,
) -> mlua::Result<Table> {
    let module = lua.create_table()?;
    module.set(
        "all",
        scope.create_function(move |lua, ()| {
            ctx.cancel.check()?;
            let securities = ctx.ledger.securities().map_err(|e| ctx.fault(e))?;
            let by_id = lua.create_table()?;
            for security in securities {
                by_id.set(security.id, security)?;
            }
            Ok(by_id)
        })?,
    )?;
    module.set(
        "get",
        scope.create_function(move |_, security: SecurityRef| {
            ctx.cancel.check()?;
            ctx.ledger.security(security.0).map_err(|e| ctx.fault(e))
        })?,
    )?;
    module.set(
        "default",
        scope.create_function(move |_, ()| {
            ctx.cancel.check()?;
            ctx.ledger.default_currency(ctx.user).map_err(|e| ctx.fault(e))
        })?,
    )?;
    Ok(module)
}
