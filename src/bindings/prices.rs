use mlua::{Lua, MetaMethod, Scope, Table, UserData, UserDataFields, UserDataMethods, UserDataRef};

use super::dates::Date;
use super::securities::SecurityRef;
use crate::ledger::Price;
use crate::sandbox::ExecutionContext;

impl UserData for Price {
    fn add_fields<F: UserDataFields<Self>>(fields: &mut F) {
        fields.add_field_method_get("id", |_, p| Ok(p.id));
        fields.add_field_method_get("security_id", |_, p| Ok(p.security_id));
        fields.add_field_method_get("currency_id", |_, p| Ok(p.currency_id));
        fields.add_field_method_get("date", |_, p| Ok(Date(p.date)));
        fields.add_field_method_get("value", |_, p| Ok(p.value.to_f64()));
    }

    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_meta_method(MetaMethod::ToString, |_, p, ()| {
            Ok(format!("price of {} on {}: {}", p.security_id, p.date, p.value))
        });
    }
}

/// `prices.at(security, currency, date)`: the latest quote on or before `date`, or nil.
pub(super) fn module<'scope, 'env, 'tx: 'env>(
    lua: &Lua,
    scope: &'scope Scope<'scope, 'env>,
    ctx: &'env ExecutionContext<'tx>,
) -> mlua::Result<Table> {
    let module = lua.create_table()?;
    module.set(
        "at",
        scope.create_function(
            move |_, (security, currency, day): (SecurityRef, SecurityRef, UserDataRef<Date>)| {
                ctx.cancel.check()?;
                ctx.ledger
                    .closest_price(security.0, currency.0, day.0)
                    .map_err(|e| ctx.fault(e))
            },
        )?,
    )?;
    Ok(module)
}
