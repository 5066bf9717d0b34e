use std::hint::black_box;

use chrono::NaiveDate;
use criterion::{Criterion, criterion_group, criterion_main};
use rusqlite::Connection;
use tabulate::datatype::Amount;
use tabulate::interface::ReportInterface;
use tabulate::ledger::{AccountType, SecurityType, User};
use tabulate::report::{Report, ReportId};
use tabulate::settings::Limits;

const MONTHLY: &str = r#"
function generate()
    local t = tabulation.new{title = "Monthly balances", units = securities.default().symbol}
    local day = date.new(2020, 1, 1)
    for month = 1, 36 do
        t:label(month, tostring(day))
        for id, account in pairs(accounts.all()) do
            t:series(account.name):set(month, balances.at(id, day:end_of_month()).amount)
        end
        day = day:add_months(1)
    end
    return t
end
"#;

// A user with a handful of accounts and three years of daily postings.
fn seeded() -> (ReportInterface, User, ReportId) {
    let iface = ReportInterface::new(Connection::open_in_memory().unwrap(), Limits::default()).unwrap();
    let user = iface
        .with_persistor(|p| {
            let usd = p.create_security("US Dollar", "USD", 2, SecurityType::Currency)?;
            let user = p.create_user("bench", usd)?;
            let income = p.create_account(&user, "Income", AccountType::Income, usd, None)?;
            let accounts = ["Checking", "Savings", "Cash", "Card"]
                .into_iter()
                .map(|name| p.create_account(&user, name, AccountType::Bank, usd, None))
                .collect::<tabulate::Result<Vec<_>>>()?;
            let mut day = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
            for n in 0..1095 {
                let target = accounts[n % accounts.len()];
                let amount = Amount::parse(&format!("{}.{:02}", n % 500, n % 100)).unwrap();
                p.post_transaction(&user, day, "posting", &[(target, amount.clone()), (income, -&amount)])?;
                day = day.succ_opt().unwrap();
            }
            Ok(user)
        })
        .unwrap();
    let report = iface.create_report(&user, Report::draft("monthly", MONTHLY)).unwrap();
    (iface, user, report.id)
}

fn criterion_benchmark(c: &mut Criterion) {
    let (iface, user, report) = seeded();
    c.bench_function("tabulate monthly balances", |b| {
        b.iter(|| black_box(iface.tabulate(&user, report).unwrap()))
    });
    c.bench_function("empty report", |b| {
        let empty = iface
            .create_report(&user, Report::draft("empty", "function generate() return tabulation.new() end"))
            .unwrap();
        b.iter(|| black_box(iface.tabulate(&user, empty.id).unwrap()))
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
