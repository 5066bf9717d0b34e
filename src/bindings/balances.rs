use mlua::{AnyUserData, Lua, MetaMethod, Scope, Table, UserData, UserDataFields, UserDataMethods, UserDataRef};

use super::accounts::AccountRef;
use super::dates::Date;
use crate::datatype::Amount;
use crate::error::TabulateError;
use crate::ledger::{Period, Security};
use crate::sandbox::ExecutionContext;

/// An exact amount of one security. Arithmetic across securities is refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Balance {
    pub security: Security,
    pub amount: Amount,
}

impl Balance {
    fn same_security(&self, other: &Balance) -> mlua::Result<()> {
        if self.security.id != other.security.id {
            return Err(mlua::Error::runtime(format!(
                "cannot combine balances in {} and {}",
                self.security.symbol, other.security.symbol
            )));
        }
        Ok(())
    }
}

impl UserData for Balance {
    fn add_fields<F: UserDataFields<Self>>(fields: &mut F) {
        fields.add_field_method_get("amount", |_, b| Ok(b.amount.to_f64()));
        fields.add_field_method_get("security", |_, b| Ok(b.security.clone()));
    }

    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_meta_method(MetaMethod::Add, |_, b, other: UserDataRef<Balance>| {
            b.same_security(&other)?;
            Ok(Balance {
                security: b.security.clone(),
                amount: &b.amount + &other.amount,
            })
        });
        methods.add_meta_method(MetaMethod::Sub, |_, b, other: UserDataRef<Balance>| {
            b.same_security(&other)?;
            Ok(Balance {
                security: b.security.clone(),
                amount: &b.amount - &other.amount,
            })
        });
        methods.add_meta_method(MetaMethod::Unm, |_, b, ()| {
            Ok(Balance {
                security: b.security.clone(),
                amount: -&b.amount,
            })
        });
        methods.add_meta_method(MetaMethod::Eq, |_, b, other: AnyUserData| {
            Ok(other.borrow::<Balance>().map(|o| *o == *b).unwrap_or(false))
        });
        methods.add_meta_method(MetaMethod::Lt, |_, b, other: UserDataRef<Balance>| {
            b.same_security(&other)?;
            Ok(b.amount < other.amount)
        });
        methods.add_meta_method(MetaMethod::Le, |_, b, other: UserDataRef<Balance>| {
            b.same_security(&other)?;
            Ok(b.amount <= other.amount)
        });
        methods.add_meta_method(MetaMethod::ToString, |_, b, ()| Ok(format!("{} {}", b.amount, b.security.symbol)));
    }
}

fn balance(ctx: &ExecutionContext, account: AccountRef, period: Period) -> mlua::Result<Balance> {
    ctx.cancel.check()?;
    let (account, amount) = match ctx.ledger.balance(ctx.user, account.0, period) {
        Ok(found) => found,
        // same message whether the account is missing or someone else's
        Err(TabulateError::NotFound) => return Err(mlua::Error::runtime(format!("account {} not found", account.0))),
        Err(e) => return Err(ctx.fault(e)),
    };
    let security = ctx
        .ledger
        .security(account.security_id)
        .map_err(|e| ctx.fault(e))?
        .ok_or_else(|| {
            ctx.fault(TabulateError::Internal(format!(
                "security {} of account {} is missing",
                account.security_id, account.id
            )))
        })?;
    Ok(Balance { security, amount })
}

/// `balances.at(account, date)` and `balances.between(account, from, to)`.
pub(super) fn module<'scope, 'env, 'tx: 'env>(
    lua: &Lua,
    scope: &'scope Scope<'scope, 'env>,
    ctx: &'env ExecutionContext<'tx>,
) -> mlua::Result<Table> {
    let module = lua.create_table()?;
    module.set(
        "at",
        scope.create_function(move |_, (account, day): (AccountRef, UserDataRef<Date>)| {
            balance(ctx, account, Period::AsOf(day.0))
        })?,
    )?;
    module.set(
        "between",
        scope.create_function(
            move |_, (account, from, to): (AccountRef, UserDataRef<Date>, UserDataRef<Date>)| {
                balance(ctx, account, Period::Between(from.0, to.0))
            },
        )?,
    )?;
    Ok(module)
}
