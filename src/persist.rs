// used for persistence
use std::time::Duration;

use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};

use crate::datatype::Amount;
use crate::error::{Result, TabulateError};
use crate::ledger::{AccountId, AccountType, SecurityId, SecurityType, User, UserId};
use crate::report::{Report, ReportId};

/// How long a connection waits on another writer's lock.
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

// ------------- Persistence -------------
/// Owns the schema and every write. Report scripts never get hold of one of
/// these; they only see a [`crate::ledger::Ledger`].
pub struct Persistor<'db> {
    pub db: &'db Connection,
}
impl<'db> Persistor<'db> {
    /// Wraps a connection, creating the schema if it is not there yet.
    pub fn new(connection: &'db Connection) -> Result<Persistor<'db>> {
        connection.execute_batch(
            "
            create table if not exists users (
                UserId integer primary key,
                Name text not null,
                DefaultCurrency integer not null
            );
            create table if not exists sessions (
                SessionSecret text primary key,
                UserId integer not null references users(UserId)
            );
            create table if not exists securities (
                SecurityId integer primary key,
                Name text not null,
                Description text not null,
                Symbol text not null,
                Precision integer not null,
                Type text not null
            );
            create table if not exists accounts (
                AccountId integer primary key,
                UserId integer not null references users(UserId),
                SecurityId integer not null references securities(SecurityId),
                ParentAccountId integer null references accounts(AccountId),
                Name text not null,
                Type text not null
            );
            create table if not exists transactions (
                TransactionId integer primary key,
                UserId integer not null references users(UserId),
                Description text not null,
                Date text not null
            );
            create table if not exists splits (
                SplitId integer primary key,
                TransactionId integer not null references transactions(TransactionId),
                AccountId integer not null references accounts(AccountId),
                Amount text not null
            );
            create index if not exists splits_by_account on splits (AccountId);
            create table if not exists prices (
                PriceId integer primary key,
                SecurityId integer not null references securities(SecurityId),
                CurrencyId integer not null references securities(SecurityId),
                Date text not null,
                Value text not null
            );
            create index if not exists prices_by_security on prices (SecurityId, CurrencyId, Date);
            -- sized for the 65536 byte script cap
            create table if not exists reports (
                ReportId integer primary key,
                UserId integer not null references users(UserId),
                Name text not null,
                Lua text not null
            );
            ",
        )?;
        Ok(Persistor { db: connection })
    }

    // ---- users and sessions ----
    pub fn create_user(&self, name: &str, default_currency: SecurityId) -> Result<User> {
        self.db
            .prepare_cached("insert into users (Name, DefaultCurrency) values (?, ?)")?
            .execute(params![name, default_currency])?;
        Ok(User {
            id: self.db.last_insert_rowid(),
            name: name.to_string(),
            default_currency,
        })
    }
    pub fn user(&self, id: UserId) -> Result<Option<User>> {
        let mut stmt = self
            .db
            .prepare_cached("select UserId, Name, DefaultCurrency from users where UserId = ?")?;
        Ok(stmt
            .query_row(params![id], |r| {
                Ok(User {
                    id: r.get(0)?,
                    name: r.get(1)?,
                    default_currency: r.get(2)?,
                })
            })
            .optional()?)
    }
    pub fn create_session(&self, user: &User, secret: &str) -> Result<()> {
        self.db
            .prepare_cached("insert into sessions (SessionSecret, UserId) values (?, ?)")?
            .execute(params![secret, user.id])?;
        Ok(())
    }
    pub fn user_for_session(&self, secret: &str) -> Result<Option<User>> {
        let user_id: Option<UserId> = self
            .db
            .prepare_cached("select UserId from sessions where SessionSecret = ?")?
            .query_row(params![secret], |r| r.get(0))
            .optional()?;
        match user_id {
            Some(id) => self.user(id),
            None => Ok(None),
        }
    }

    // ---- ledger writes ----
    pub fn create_security(&self, name: &str, symbol: &str, precision: i64, security_type: SecurityType) -> Result<SecurityId> {
        self.db
            .prepare_cached("insert into securities (Name, Description, Symbol, Precision, Type) values (?, ?, ?, ?, ?)")?
            .execute(params![name, name, symbol, precision, security_type.name()])?;
        Ok(self.db.last_insert_rowid())
    }
    pub fn create_account(
        &self,
        user: &User,
        name: &str,
        account_type: AccountType,
        security: SecurityId,
        parent: Option<AccountId>,
    ) -> Result<AccountId> {
        self.db
            .prepare_cached("insert into accounts (UserId, SecurityId, ParentAccountId, Name, Type) values (?, ?, ?, ?, ?)")?
            .execute(params![user.id, security, parent, name, account_type.name()])?;
        Ok(self.db.last_insert_rowid())
    }
    /// Records one transaction with its splits; splits must name accounts of `user`.
    pub fn post_transaction(&self, user: &User, date: NaiveDate, description: &str, splits: &[(AccountId, Amount)]) -> Result<i64> {
        for (account, _) in splits {
            let owner: Option<UserId> = self
                .db
                .prepare_cached("select UserId from accounts where AccountId = ?")?
                .query_row(params![account], |r| r.get(0))
                .optional()?;
            if owner != Some(user.id) {
                return Err(TabulateError::Validation(format!("account {account} does not belong to user {}", user.id)));
            }
        }
        self.db
            .prepare_cached("insert into transactions (UserId, Description, Date) values (?, ?, ?)")?
            .execute(params![user.id, description, date])?;
        let transaction = self.db.last_insert_rowid();
        let mut add_split = self
            .db
            .prepare_cached("insert into splits (TransactionId, AccountId, Amount) values (?, ?, ?)")?;
        for (account, amount) in splits {
            add_split.execute(params![transaction, account, amount])?;
        }
        Ok(transaction)
    }
    pub fn create_price(&self, security: SecurityId, currency: SecurityId, date: NaiveDate, value: &Amount) -> Result<i64> {
        self.db
            .prepare_cached("insert into prices (SecurityId, CurrencyId, Date, Value) values (?, ?, ?, ?)")?
            .execute(params![security, currency, date, value])?;
        Ok(self.db.last_insert_rowid())
    }

    // ---- reports ----
    // Every statement below is keyed on the owner as well as the id, so a
    // report owned by someone else is indistinguishable from a missing one.
    pub fn insert_report(&self, report: &Report) -> Result<ReportId> {
        self.db
            .prepare_cached("insert into reports (UserId, Name, Lua) values (?, ?, ?)")?
            .execute(params![report.owner_user_id, report.name, report.script_source])?;
        Ok(self.db.last_insert_rowid())
    }
    pub fn report(&self, owner: UserId, id: ReportId) -> Result<Option<Report>> {
        let mut stmt = self
            .db
            .prepare_cached("select ReportId, UserId, Name, Lua from reports where UserId = ? and ReportId = ?")?;
        Ok(stmt.query_row(params![owner, id], report_from_row).optional()?)
    }
    pub fn reports(&self, owner: UserId) -> Result<Vec<Report>> {
        let mut stmt = self
            .db
            .prepare_cached("select ReportId, UserId, Name, Lua from reports where UserId = ? order by ReportId")?;
        let rows = stmt.query_map(params![owner], report_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
    /// Returns false when no report with this id belongs to the owner.
    pub fn update_report(&self, report: &Report) -> Result<bool> {
        let changed = self
            .db
            .prepare_cached("update reports set Name = ?, Lua = ? where UserId = ? and ReportId = ?")?
            .execute(params![report.name, report.script_source, report.owner_user_id, report.id])?;
        Ok(changed == 1)
    }
    pub fn delete_report(&self, owner: UserId, id: ReportId) -> Result<bool> {
        let changed = self
            .db
            .prepare_cached("delete from reports where UserId = ? and ReportId = ?")?
            .execute(params![owner, id])?;
        Ok(changed == 1)
    }
}

fn report_from_row(row: &rusqlite::Row) -> rusqlite::Result<Report> {
    Ok(Report {
        id: row.get(0)?,
        owner_user_id: row.get(1)?,
        name: row.get(2)?,
        script_source: row.get(3)?,
    })
}
