//! Synchronous entry points for everything the server does with reports.
//!
//! Each operation runs in its own SQLite transaction, committed only when the
//! operation succeeds. Tabulation hands that same transaction to the
//! execution host, so every read a script makes sees one snapshot. Callers on
//! an async runtime should wrap these calls in `spawn_blocking`.

use std::sync::Mutex;

use rusqlite::{Connection, Transaction};
use tracing::info;

use crate::error::{Result, TabulateError};
use crate::ledger::User;
use crate::persist::{BUSY_TIMEOUT, Persistor};
use crate::report::{Report, ReportId, ReportList};
use crate::sandbox::ExecutionHost;
use crate::settings::{Limits, Settings};
use crate::tabulation::Tabulation;

enum Store {
    // one connection, so one operation at a time
    Shared(Mutex<Connection>),
    // a file gets a connection per operation, so long scripts don't queue everyone else
    File(String),
}

pub struct ReportInterface {
    store: Store,
    host: ExecutionHost,
}

impl ReportInterface {
    /// Wraps an already open connection, typically an in-memory database for
    /// tests or embedding. Every operation, script runs included, takes turns
    /// on that one connection, so a slow report holds up all the others.
    pub fn new(connection: Connection, limits: Limits) -> Result<Self> {
        Persistor::new(&connection)?;
        Ok(Self {
            store: Store::Shared(Mutex::new(connection)),
            host: ExecutionHost::new(limits),
        })
    }

    /// Opens the database file named in `settings` for concurrent use: each
    /// operation gets its own connection. An in-memory database would live on
    /// a single connection and serialize every request, so it is refused.
    pub fn open(settings: &Settings) -> Result<Self> {
        if settings.database.is_empty() || settings.database == ":memory:" {
            return Err(TabulateError::Config(format!(
                "database must be a file path, not {:?}",
                settings.database
            )));
        }
        let connection = Connection::open(&settings.database)?;
        connection.query_row("pragma journal_mode = wal", [], |_| Ok(()))?;
        Persistor::new(&connection)?;
        info!(database = %settings.database, "database ready");
        Ok(Self {
            store: Store::File(settings.database.clone()),
            host: ExecutionHost::new(settings.limits()),
        })
    }

    fn transact<R>(&self, work: impl FnOnce(&Transaction) -> Result<R>) -> Result<R> {
        match &self.store {
            Store::Shared(db) => {
                let mut db = db.lock().map_err(|e| TabulateError::Internal(format!("lock poisoned: {e}")))?;
                run_in_transaction(&mut db, work)
            }
            Store::File(path) => {
                let mut db = Connection::open(path)?;
                db.busy_timeout(BUSY_TIMEOUT)?;
                run_in_transaction(&mut db, work)
            }
        }
    }

    /// Direct write access for provisioning users, sessions and ledger data.
    pub fn with_persistor<R>(&self, work: impl FnOnce(&Persistor) -> Result<R>) -> Result<R> {
        self.transact(|tx| work(&rows(tx)))
    }

    pub fn user_for_session(&self, secret: &str) -> Result<User> {
        self.transact(|tx| rows(tx).user_for_session(secret))?
            .ok_or(TabulateError::NotSignedIn)
    }

    pub fn create_report(&self, user: &User, draft: Report) -> Result<Report> {
        draft.validate()?;
        let mut report = draft;
        report.owner_user_id = user.id;
        self.transact(|tx| {
            report.id = rows(tx).insert_report(&report)?;
            Ok(())
        })?;
        info!(report = report.id, user = user.id, "report created");
        Ok(report)
    }

    pub fn report(&self, user: &User, id: ReportId) -> Result<Report> {
        self.transact(|tx| rows(tx).report(user.id, id))?
            .ok_or(TabulateError::NotFound)
    }

    pub fn reports(&self, user: &User) -> Result<ReportList> {
        let reports = self.transact(|tx| rows(tx).reports(user.id))?;
        Ok(ReportList { reports })
    }

    /// Replaces name and source of an existing report owned by `user`.
    pub fn update_report(&self, user: &User, id: ReportId, replacement: Report) -> Result<Report> {
        if replacement.id != id {
            return Err(TabulateError::Validation(format!(
                "report id {} in body does not match {id}",
                replacement.id
            )));
        }
        replacement.validate()?;
        let mut report = replacement;
        report.owner_user_id = user.id;
        let updated = self.transact(|tx| rows(tx).update_report(&report))?;
        if !updated {
            return Err(TabulateError::NotFound);
        }
        info!(report = id, user = user.id, "report updated");
        Ok(report)
    }

    pub fn delete_report(&self, user: &User, id: ReportId) -> Result<()> {
        if !self.transact(|tx| rows(tx).delete_report(user.id, id))? {
            return Err(TabulateError::NotFound);
        }
        info!(report = id, user = user.id, "report deleted");
        Ok(())
    }

    /// Runs the stored script of one of `user`'s reports.
    pub fn tabulate(&self, user: &User, id: ReportId) -> Result<Tabulation> {
        self.transact(|tx| {
            let report = rows(tx).report(user.id, id)?.ok_or(TabulateError::NotFound)?;
            self.host.execute(&report, user, tx)
        })
    }
}

// The schema exists from the moment the interface was built.
fn rows<'tx>(tx: &'tx Transaction) -> Persistor<'tx> {
    Persistor { db: tx }
}

fn run_in_transaction<R>(db: &mut Connection, work: impl FnOnce(&Transaction) -> Result<R>) -> Result<R> {
    let tx = db.transaction()?;
    let result = work(&tx)?;
    tx.commit()?;
    Ok(result)
}
