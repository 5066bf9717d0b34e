//! Tabulate – a host for untrusted, user-authored report scripts.
//!
//! A *report* is a named Lua script stored per user. Running it produces a
//! [`tabulation::Tabulation`]: a titled, labelled tree of named numeric series
//! ready for charting. Scripts read the user's ledger through a small set of
//! read-only capability bindings and nothing else.
//!
//! ## Modules
//! * [`error`] – [`error::TabulateError`], the crate-wide `Result` and the client error envelope.
//! * [`settings`] – layered configuration (defaults, `tabulate.toml`, `TABULATE_*` environment).
//! * [`datatype`] – [`datatype::Amount`], the exact decimal used for money.
//! * [`ledger`] – users, accounts, securities, prices and the read-only [`ledger::Ledger`] view.
//! * [`persist`] – SQLite schema and writes, including stored reports and sessions.
//! * [`report`] – report definitions and their validation.
//! * [`tabulation`] – the result model and the handles scripts build it through.
//! * [`sandbox`] – the execution host: interpreter setup, deadline and result checks.
//! * [`bindings`] – everything a script can call beyond the bare language.
//! * [`interface`] – [`interface::ReportInterface`], one transaction per operation.
//! * [`server`] – the HTTP surface.
//!
//! ## Quick Start
//! ```
//! use rusqlite::Connection;
//! use tabulate::interface::ReportInterface;
//! use tabulate::ledger::SecurityType;
//! use tabulate::report::Report;
//! use tabulate::settings::Limits;
//!
//! let iface = ReportInterface::new(Connection::open_in_memory().unwrap(), Limits::default()).unwrap();
//! let user = iface
//!     .with_persistor(|p| {
//!         let usd = p.create_security("US Dollar", "USD", 2, SecurityType::Currency)?;
//!         p.create_user("alice", usd)
//!     })
//!     .unwrap();
//! let report = iface
//!     .create_report(&user, Report::draft("Empty", "function generate() return tabulation.new{title='Empty'} end"))
//!     .unwrap();
//! let result = iface.tabulate(&user, report.id).unwrap();
//! assert_eq!(result.title, "Empty");
//! assert_eq!(result.report_id, report.id);
//! ```

pub mod bindings;
pub mod datatype;
pub mod error;
pub mod interface;
pub mod ledger;
pub mod patterns;
pub mod persist;
pub mod report;
pub mod sandbox;
pub mod server;
pub mod settings;
pub mod tabulation;

pub use error::{Result, TabulateError};
