//! The execution host: runs one untrusted report script and hands back its
//! [`Tabulation`], or a classified failure.
//!
//! Every call to [`ExecutionHost::execute`] gets a brand-new interpreter with
//! only the base, package, table, string and math libraries loaded. Anything
//! touching files, processes, the network or the VM's internals (`io`, `os`,
//! `debug`, `coroutine`, `dofile`, `loadfile`, C modules) is simply absent, so
//! scripts referring to them fail with an ordinary undefined-name error.
//!
//! Cancellation is cooperative. A VM hook fires on every function call and
//! every `instruction_check_interval` instructions and raises once the
//! deadline has passed; capability bindings check the same [`CancelToken`]
//! on entry. `pcall`/`xpcall` are wrapped so a script cannot swallow that
//! error and keep looping. The hook never sees the inside of a native call,
//! so the string pattern functions are replaced by host versions that poll
//! the token themselves (see [`crate::patterns`]), and SQLite gets a progress
//! handler that interrupts any statement still running past the deadline.

use std::cell::RefCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use mlua::{ChunkMode, Function, HookTriggers, Lua, LuaOptions, MultiValue, StdLib, Value, VmState};
use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::bindings;
use crate::error::{ContractBreach, Result, TabulateError};
use crate::ledger::{Ledger, User};
use crate::patterns;
use crate::persist::BUSY_TIMEOUT;
use crate::report::{Report, ReportId};
use crate::settings::Limits;
use crate::tabulation::{Tabulation, TabulationHandle};

/// Name of the function every report script must define.
pub const ENTRY_POINT: &str = "generate";

const DEADLINE_MESSAGE: &str = "report script exceeded its deadline";

// SQLite virtual machine steps between two deadline checks.
const QUERY_CHECK_INTERVAL: i32 = 1000;

// Runs before the report, with the deadline check as its only argument.
const PRELUDE: &str = r#"
local check = ...
dofile, loadfile = nil, nil
package.path, package.cpath, package.loadlib = "", "", nil
package.searchers = { package.searchers[1] }

local raw_load, raw_pcall, raw_xpcall = load, pcall, xpcall
local function rethrow(ok, ...)
    if not ok then check() end
    return ok, ...
end
load = function(chunk, name, mode, env)
    return raw_load(chunk, name, "t", env)
end
pcall = function(f, ...)
    return rethrow(raw_pcall(f, ...))
end
xpcall = function(f, handler, ...)
    return rethrow(raw_xpcall(f, handler, ...))
end
"#;

/// Deadline shared by the VM hook and every capability binding of one run.
#[derive(Debug, Clone)]
pub struct CancelToken {
    deadline: Instant,
    fired: Arc<AtomicBool>,
}
impl CancelToken {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now() + timeout,
            fired: Arc::new(AtomicBool::new(false)),
        }
    }
    /// Once expired, stays expired.
    pub fn is_cancelled(&self) -> bool {
        if self.fired.load(Ordering::Relaxed) {
            return true;
        }
        if Instant::now() >= self.deadline {
            self.fired.store(true, Ordering::SeqCst);
            return true;
        }
        false
    }
    pub fn check(&self) -> mlua::Result<()> {
        if self.is_cancelled() {
            Err(mlua::Error::runtime(DEADLINE_MESSAGE))
        } else {
            Ok(())
        }
    }
    /// Whether the deadline was ever observed, regardless of what the script did afterwards.
    pub fn fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

// Makes statements on `db` give up once the run's deadline has passed, for
// as long as the guard lives.
struct QueryDeadline<'c> {
    db: &'c Connection,
}

impl<'c> QueryDeadline<'c> {
    fn arm(db: &'c Connection, cancel: &CancelToken) -> Result<Self> {
        let token = cancel.clone();
        db.progress_handler(QUERY_CHECK_INTERVAL, Some(move || token.is_cancelled()));
        db.busy_timeout(cancel.remaining())?;
        Ok(Self { db })
    }
}

impl Drop for QueryDeadline<'_> {
    fn drop(&mut self) {
        self.db.progress_handler(0, None::<fn() -> bool>);
        if let Err(e) = self.db.busy_timeout(BUSY_TIMEOUT) {
            warn!(error = %e, "restoring busy timeout");
        }
    }
}

/// Everything one script run may touch. Lives exactly as long as the run.
pub struct ExecutionContext<'tx> {
    pub report_id: ReportId,
    pub user: &'tx User,
    pub ledger: Ledger<'tx>,
    pub cancel: CancelToken,
    host_fault: RefCell<Option<TabulateError>>,
}

impl<'tx> ExecutionContext<'tx> {
    pub fn new(report_id: ReportId, user: &'tx User, tx: &'tx Connection, cancel: CancelToken) -> Self {
        Self {
            report_id,
            user,
            ledger: Ledger::new(tx),
            cancel,
            host_fault: RefCell::new(None),
        }
    }

    /// Turns a host-side failure inside a binding into a script error.
    /// Storage and internal faults are remembered so the run is reported as
    /// an internal error rather than blamed on the script.
    pub fn fault(&self, e: TabulateError) -> mlua::Error {
        let message = e.to_string();
        if matches!(e, TabulateError::Persistence(_) | TabulateError::Internal(_)) {
            self.host_fault.borrow_mut().get_or_insert(e);
        }
        mlua::Error::runtime(message)
    }

    fn take_fault(&self) -> Option<TabulateError> {
        self.host_fault.borrow_mut().take()
    }
}

pub struct ExecutionHost {
    limits: Limits,
}

impl ExecutionHost {
    pub fn new(limits: Limits) -> Self {
        Self { limits }
    }

    /// Runs `report` on behalf of `user`, reading through `tx`. The
    /// transaction stays the caller's: nothing here commits or rolls back.
    pub fn execute(&self, report: &Report, user: &User, tx: &Connection) -> Result<Tabulation> {
        if report.owner_user_id != user.id {
            return Err(TabulateError::NotFound);
        }
        report.validate()?;

        let started = Instant::now();
        let digest = blake3::hash(report.script_source.as_bytes()).to_hex();
        let digest = &digest.as_str()[..16];
        let cancel = CancelToken::with_timeout(self.limits.timeout);
        let _queries = QueryDeadline::arm(tx, &cancel)?;
        let ctx = ExecutionContext::new(report.id, user, tx, cancel);

        let result = self.run(report, &ctx).map(|mut tabulation| {
            // whatever the script may have claimed, the result belongs to this report
            tabulation.report_id = report.id;
            tabulation
        });
        let ms = started.elapsed().as_secs_f64() * 1000.0;
        match &result {
            Ok(t) => info!(report = report.id, user = user.id, script = digest, ms, series = t.series.len(), "tabulation complete"),
            Err(e) => warn!(report = report.id, user = user.id, script = digest, ms, error = %e, "tabulation failed"),
        }
        result
    }

    // The interpreter is created and dropped inside this call on every path.
    fn run(&self, report: &Report, ctx: &ExecutionContext) -> Result<Tabulation> {
        let lua = self.interpreter(&ctx.cancel)?;
        let outcome = lua.scope(|scope| {
            bindings::register(&lua, scope, ctx)?;
            Ok(invoke(&lua, report))
        });
        lua.remove_hook();

        if ctx.cancel.fired() {
            return Err(TabulateError::Timeout);
        }
        if let Some(fault) = ctx.take_fault() {
            return Err(fault);
        }
        outcome.map_err(|e| TabulateError::Internal(format!("registering bindings: {e}")))?
    }

    fn interpreter(&self, cancel: &CancelToken) -> Result<Lua> {
        let libs = StdLib::PACKAGE | StdLib::TABLE | StdLib::STRING | StdLib::MATH;
        let lua = Lua::new_with(libs, LuaOptions::default()).map_err(|e| TabulateError::Internal(e.to_string()))?;
        lua.set_memory_limit(self.limits.memory_limit)
            .map_err(|e| TabulateError::Internal(e.to_string()))?;
        patterns::install(&lua, cancel, self.limits.memory_limit)
            .map_err(|e| TabulateError::Internal(format!("pattern functions: {e}")))?;

        let check = {
            let cancel = cancel.clone();
            lua.create_function(move |_, ()| cancel.check())
        }
        .map_err(|e| TabulateError::Internal(e.to_string()))?;
        lua.load(PRELUDE)
            .set_name("=prelude")
            .call::<()>(check)
            .map_err(|e| TabulateError::Internal(format!("sandbox prelude: {e}")))?;

        let hook_cancel = cancel.clone();
        lua.set_hook(
            HookTriggers::new()
                .on_calls()
                .every_nth_instruction(self.limits.instruction_check_interval),
            move |_, _| {
                if hook_cancel.is_cancelled() {
                    Err(mlua::Error::runtime(DEADLINE_MESSAGE))
                } else {
                    Ok(VmState::Continue)
                }
            },
        );
        Ok(lua)
    }
}

// Compiles the report, runs its top level, then calls the entry point.
fn invoke(lua: &Lua, report: &Report) -> Result<Tabulation> {
    let chunk = lua
        .load(report.script_source.as_str())
        .set_name("=report")
        .set_mode(ChunkMode::Text)
        .into_function()
        .map_err(|e| TabulateError::Compile(e.to_string()))?;
    chunk.call::<()>(()).map_err(|e| TabulateError::Runtime(e.to_string()))?;

    let entry = match lua.globals().get::<Value>(ENTRY_POINT) {
        Ok(Value::Function(f)) => f,
        _ => return Err(TabulateError::ContractViolation(ContractBreach::MissingEntryPoint)),
    };
    accept(call_entry(&entry)?)
}

fn call_entry(entry: &Function) -> Result<Value> {
    let mut values = entry
        .call::<MultiValue>(())
        .map_err(|e| TabulateError::Runtime(e.to_string()))?;
    match (values.len(), values.pop_front()) {
        (1, Some(value)) => Ok(value),
        (n, _) => Err(TabulateError::ContractViolation(ContractBreach::ReturnCount(n))),
    }
}

// Only the host's own tabulation handle is trusted; a table shaped like one is not.
fn accept(value: Value) -> Result<Tabulation> {
    match value {
        Value::UserData(ud) => {
            let handle = ud
                .borrow::<TabulationHandle>()
                .map_err(|_| TabulateError::ContractViolation(ContractBreach::WrongHandle))?;
            let tabulation = handle.finish();
            debug!(labels = tabulation.labels.len(), "accepted tabulation");
            Ok(tabulation)
        }
        _ => Err(TabulateError::ContractViolation(ContractBreach::NotAHandle)),
    }
}
