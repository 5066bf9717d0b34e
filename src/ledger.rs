//! The slice of the ledger domain model report scripts may see.
//!
//! [`Ledger`] is a read-only view over one SQLite connection (normally the
//! caller's open transaction). It only ever issues `select` statements, and
//! every owner-scoped query takes the invoking [`User`] so it cannot be asked
//! about somebody else's rows.

use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::datatype::Amount;
use crate::error::{Result, TabulateError};

pub type UserId = i64;
pub type AccountId = i64;
pub type SecurityId = i64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub default_currency: SecurityId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountType {
    Bank,
    Cash,
    Asset,
    Liability,
    Investment,
    Income,
    Expense,
    Trading,
    Equity,
    Receivable,
    Payable,
}

impl AccountType {
    const ALL: [AccountType; 11] = [
        Self::Bank,
        Self::Cash,
        Self::Asset,
        Self::Liability,
        Self::Investment,
        Self::Income,
        Self::Expense,
        Self::Trading,
        Self::Equity,
        Self::Receivable,
        Self::Payable,
    ];
    pub fn name(&self) -> &'static str {
        match self {
            Self::Bank => "bank",
            Self::Cash => "cash",
            Self::Asset => "asset",
            Self::Liability => "liability",
            Self::Investment => "investment",
            Self::Income => "income",
            Self::Expense => "expense",
            Self::Trading => "trading",
            Self::Equity => "equity",
            Self::Receivable => "receivable",
            Self::Payable => "payable",
        }
    }
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.name() == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub id: AccountId,
    pub user_id: UserId,
    pub security_id: SecurityId,
    pub parent_id: Option<AccountId>,
    pub name: String,
    pub account_type: AccountType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityType {
    Currency,
    Stock,
}

impl SecurityType {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Currency => "currency",
            Self::Stock => "stock",
        }
    }
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "currency" => Some(Self::Currency),
            "stock" => Some(Self::Stock),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Security {
    pub id: SecurityId,
    pub name: String,
    pub description: String,
    pub symbol: String,
    pub precision: i64,
    pub security_type: SecurityType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Price {
    pub id: i64,
    pub security_id: SecurityId,
    pub currency_id: SecurityId,
    pub date: NaiveDate,
    pub value: Amount,
}

/// Which splits count towards a balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    /// Everything dated on or before the day.
    AsOf(NaiveDate),
    /// `from <= date < to`.
    Between(NaiveDate, NaiveDate),
}

fn account_from_row(row: &Row) -> rusqlite::Result<Account> {
    let type_name: String = row.get(5)?;
    let account_type = AccountType::from_name(&type_name).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, format!("unknown account type {type_name}").into())
    })?;
    Ok(Account {
        id: row.get(0)?,
        user_id: row.get(1)?,
        security_id: row.get(2)?,
        parent_id: row.get(3)?,
        name: row.get(4)?,
        account_type,
    })
}

fn security_from_row(row: &Row) -> rusqlite::Result<Security> {
    let type_name: String = row.get(5)?;
    let security_type = SecurityType::from_name(&type_name).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, format!("unknown security type {type_name}").into())
    })?;
    Ok(Security {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        symbol: row.get(3)?,
        precision: row.get(4)?,
        security_type,
    })
}

const ACCOUNT_COLUMNS: &str = "AccountId, UserId, SecurityId, ParentAccountId, Name, Type";
const SECURITY_COLUMNS: &str = "SecurityId, Name, Description, Symbol, Precision, Type";

// ------------- Ledger -------------
#[derive(Clone, Copy)]
pub struct Ledger<'tx> {
    db: &'tx Connection,
}

impl<'tx> Ledger<'tx> {
    pub fn new(db: &'tx Connection) -> Self {
        Self { db }
    }

    pub fn accounts(&self, user: &User) -> Result<Vec<Account>> {
        let mut stmt = self
            .db
            .prepare_cached(&format!("select {ACCOUNT_COLUMNS} from accounts where UserId = ? order by AccountId"))?;
        let rows = stmt.query_map(params![user.id], account_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Accounts of other users are reported exactly like missing ones.
    pub fn account(&self, user: &User, id: AccountId) -> Result<Option<Account>> {
        let mut stmt = self.db.prepare_cached(&format!(
            "select {ACCOUNT_COLUMNS} from accounts where UserId = ? and AccountId = ?"
        ))?;
        Ok(stmt.query_row(params![user.id, id], account_from_row).optional()?)
    }

    pub fn securities(&self) -> Result<Vec<Security>> {
        let mut stmt = self
            .db
            .prepare_cached(&format!("select {SECURITY_COLUMNS} from securities order by SecurityId"))?;
        let rows = stmt.query_map([], security_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn security(&self, id: SecurityId) -> Result<Option<Security>> {
        let mut stmt = self
            .db
            .prepare_cached(&format!("select {SECURITY_COLUMNS} from securities where SecurityId = ?"))?;
        Ok(stmt.query_row(params![id], security_from_row).optional()?)
    }

    pub fn default_currency(&self, user: &User) -> Result<Security> {
        self.security(user.default_currency)?.ok_or_else(|| {
            TabulateError::Internal(format!("default currency {} of user {} is missing", user.default_currency, user.id))
        })
    }

    /// Sum of the account's splits over `period`. Fails with `NotFound` when
    /// the account does not belong to `user`.
    pub fn balance(&self, user: &User, account: AccountId, period: Period) -> Result<(Account, Amount)> {
        let account = self.account(user, account)?.ok_or(TabulateError::NotFound)?;
        let amounts = match period {
            Period::AsOf(day) => {
                let mut stmt = self.db.prepare_cached(
                    "select s.Amount from splits s
                        join transactions t on t.TransactionId = s.TransactionId
                        where s.AccountId = ? and t.UserId = ? and t.Date <= ?",
                )?;
                let rows = stmt.query_map(params![account.id, user.id, day], |r| r.get::<_, Amount>(0))?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
            Period::Between(from, to) => {
                let mut stmt = self.db.prepare_cached(
                    "select s.Amount from splits s
                        join transactions t on t.TransactionId = s.TransactionId
                        where s.AccountId = ? and t.UserId = ? and t.Date >= ? and t.Date < ?",
                )?;
                let rows = stmt.query_map(params![account.id, user.id, from, to], |r| r.get::<_, Amount>(0))?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
        };
        Ok((account, amounts.into_iter().sum()))
    }

    /// The most recent price dated on or before `day`; never a later one.
    pub fn closest_price(&self, security: SecurityId, currency: SecurityId, day: NaiveDate) -> Result<Option<Price>> {
        let mut stmt = self.db.prepare_cached(
            "select PriceId, SecurityId, CurrencyId, Date, Value from prices
                where SecurityId = ? and CurrencyId = ? and Date <= ?
                order by Date desc, PriceId desc
                limit 1",
        )?;
        Ok(stmt
            .query_row(params![security, currency, day], |r| {
                Ok(Price {
                    id: r.get(0)?,
                    security_id: r.get(1)?,
                    currency_id: r.get(2)?,
                    date: r.get(3)?,
                    value: r.get(4)?,
                })
            })
            .optional()?)
    }
}
