use mlua::{FromLua, Lua, MetaMethod, Scope, Table, UserData, UserDataFields, UserDataMethods, Value};

use crate::ledger::{Account, AccountId};
use crate::sandbox::ExecutionContext;

impl UserData for Account {
    fn add_fields<F: UserDataFields<Self>>(fields: &mut F) {
        fields.add_field_method_get("id", |_, a| Ok(a.id));
        fields.add_field_method_get("name", |_, a| Ok(a.name.clone()));
        fields.add_field_method_get("type", |_, a| Ok(a.account_type.name()));
        fields.add_field_method_get("security_id", |_, a| Ok(a.security_id));
        fields.add_field_method_get("parent_id", |_, a| Ok(a.parent_id));
    }

    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_meta_method(MetaMethod::ToString, |_, a, ()| Ok(format!("account {}: {}", a.id, a.name)));
    }
}

/// An account argument: either an account handle or a bare id.
#[derive(Debug, Clone, Copy)]
pub struct AccountRef(pub AccountId);

impl FromLua for AccountRef {
    fn from_lua(value: Value, _: &Lua) -> mlua::Result<Self> {
        match value {
            Value::Integer(id) => Ok(Self(id)),
            Value::Number(n) if n.fract() == 0.0 => Ok(Self(n as AccountId)),
            Value::UserData(ud) => Ok(Self(ud.borrow::<Account>()?.id)),
            other => Err(mlua::Error::runtime(format!("expected an account or account id, got {}", other.type_name()))),
        }
    }
}

/// `accounts.all()` and `accounts.get(id)`, limited to the invoking user.
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
            let accounts = ctx.ledger.accounts(ctx.user).map_err(|e| ctx.fault(e))?;
            let by_id = lua.create_table()?;
            for account in accounts {
                by_id.set(account.id, account)?;
            }
            Ok(by_id)
        })?,
    )?;
    module.set(
        "get",
        scope.create_function(move |_, account: AccountRef| {
            ctx.cancel.check()?;
            ctx.ledger.account(ctx.user, account.0).map_err(|e| ctx.fault(e))
        })?,
    )?;
    Ok(module)
}
