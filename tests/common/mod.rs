#![allow(dead_code)]

use chrono::NaiveDate;
use rusqlite::Connection;
use tabulate::datatype::Amount;
use tabulate::interface::ReportInterface;
use tabulate::ledger::{AccountId, AccountType, SecurityId, SecurityType, User};
use tabulate::report::Report;
use tabulate::settings::Limits;
use tabulate::tabulation::Tabulation;

pub struct Fixture {
    pub iface: ReportInterface,
    pub alice: User,
    pub bob: User,
    pub usd: SecurityId,
    pub aapl: SecurityId,
    pub checking: AccountId,
    pub groceries: AccountId,
    pub salary: AccountId,
    pub brokerage: AccountId,
    pub savings: AccountId,
}

pub fn day(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("date")
}

pub fn amount(s: &str) -> Amount {
    Amount::parse(s).expect("amount")
}

pub fn setup() -> Fixture {
    setup_with(Limits::default())
}

/// Alice: paid on 2017-01-15, shops on 2017-02-10, holds some AAPL.
/// Bob: one savings account with money in it.
pub fn setup_with(limits: Limits) -> Fixture {
    let iface = ReportInterface::new(Connection::open_in_memory().expect("in-memory db"), limits).expect("interface");
    let seeded = iface
        .with_persistor(|p| {
            let usd = p.create_security("US Dollar", "USD", 2, SecurityType::Currency)?;
            let aapl = p.create_security("Apple Inc.", "AAPL", 0, SecurityType::Stock)?;
            let alice = p.create_user("alice", usd)?;
            let bob = p.create_user("bob", usd)?;
            p.create_session(&alice, "alice-secret")?;
            p.create_session(&bob, "bob-secret")?;

            let checking = p.create_account(&alice, "Checking", AccountType::Bank, usd, None)?;
            let groceries = p.create_account(&alice, "Groceries", AccountType::Expense, usd, None)?;
            let salary = p.create_account(&alice, "Salary", AccountType::Income, usd, None)?;
            let brokerage = p.create_account(&alice, "Brokerage", AccountType::Investment, aapl, None)?;
            let savings = p.create_account(&bob, "Savings", AccountType::Bank, usd, None)?;

            p.post_transaction(&alice, day("2017-01-15"), "Paycheck", &[
                (checking, amount("1000.50")),
                (salary, amount("-1000.50")),
            ])?;
            p.post_transaction(&alice, day("2017-02-10"), "Groceries", &[
                (checking, amount("-200.25")),
                (groceries, amount("200.25")),
            ])?;
            p.post_transaction(&alice, day("2017-01-20"), "Buy AAPL", &[(brokerage, amount("10"))])?;
            p.post_transaction(&bob, day("2017-01-01"), "Deposit", &[(savings, amount("5000"))])?;

            p.create_price(aapl, usd, day("2017-01-03"), &amount("115.82"))?;
            p.create_price(aapl, usd, day("2017-02-01"), &amount("128.75"))?;
            p.create_price(aapl, usd, day("2017-03-01"), &amount("139.79"))?;

            Ok((alice, bob, usd, aapl, checking, groceries, salary, brokerage, savings))
        })
        .expect("seed");
    let (alice, bob, usd, aapl, checking, groceries, salary, brokerage, savings) = seeded;
    Fixture {
        iface,
        alice,
        bob,
        usd,
        aapl,
        checking,
        groceries,
        salary,
        brokerage,
        savings,
    }
}

impl Fixture {
    /// Substitutes `$name` placeholders in a script with the fixture's ids.
    pub fn script(&self, source: &str) -> String {
        source
            .replace("$checking", &self.checking.to_string())
            .replace("$groceries", &self.groceries.to_string())
            .replace("$salary", &self.salary.to_string())
            .replace("$brokerage", &self.brokerage.to_string())
            .replace("$savings", &self.savings.to_string())
            .replace("$usd", &self.usd.to_string())
            .replace("$aapl", &self.aapl.to_string())
    }

    /// Stores `source` as one of `user`'s reports and runs it.
    pub fn run_as(&self, user: &User, source: &str) -> tabulate::Result<Tabulation> {
        let report = self
            .iface
            .create_report(user, Report::draft("test", self.script(source)))
            .expect("report stored");
        self.iface.tabulate(user, report.id)
    }

    pub fn run(&self, source: &str) -> tabulate::Result<Tabulation> {
        self.run_as(&self.alice, source)
    }
}
