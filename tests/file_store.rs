use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use tabulate::TabulateError;
use tabulate::interface::ReportInterface;
use tabulate::ledger::SecurityType;
use tabulate::report::Report;
use tabulate::settings::Settings;

fn settings(database: &str) -> Settings {
    Settings {
        database: database.to_string(),
        listen: "127.0.0.1:0".to_string(),
        script_timeout_secs: 2,
        memory_limit_mb: 64,
        instruction_check_interval: 1000,
    }
}

// A database file that is removed, with its WAL companions, on drop.
struct Scratch(PathBuf);

impl Scratch {
    fn new(name: &str) -> Self {
        let path = std::env::temp_dir().join(format!("tabulate-{}-{name}.db", std::process::id()));
        let scratch = Self(path);
        scratch.remove();
        scratch
    }
    fn path(&self) -> &str {
        self.0.to_str().expect("utf-8 temp path")
    }
    fn remove(&self) {
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{suffix}", self.path()));
        }
    }
}

impl Drop for Scratch {
    fn drop(&mut self) {
        self.remove();
    }
}

#[test]
fn in_memory_database_is_refused() {
    for database in [":memory:", ""] {
        match ReportInterface::open(&settings(database)) {
            Err(TabulateError::Config(message)) => assert!(message.contains("file path"), "{message}"),
            Err(other) => panic!("{database:?} gave {other:?}"),
            Ok(_) => panic!("{database:?} was accepted"),
        }
    }
}

#[test]
fn a_slow_report_does_not_hold_up_others() {
    let scratch = Scratch::new("concurrent");
    let iface = ReportInterface::open(&settings(scratch.path())).expect("file database");
    let user = iface
        .with_persistor(|p| {
            let usd = p.create_security("US Dollar", "USD", 2, SecurityType::Currency)?;
            p.create_user("carol", usd)
        })
        .expect("seed");
    let slow = iface
        .create_report(&user, Report::draft("slow", "function generate() while true do end end"))
        .expect("slow report");
    let fast = iface
        .create_report(&user, Report::draft("fast", "function generate() return tabulation.new{title = 'fast'} end"))
        .expect("fast report");

    thread::scope(|s| {
        let stuck = s.spawn(|| iface.tabulate(&user, slow.id));
        thread::sleep(Duration::from_millis(200));

        let started = Instant::now();
        let t = iface.tabulate(&user, fast.id).expect("fast report runs");
        assert_eq!(t.title, "fast");
        assert!(started.elapsed() < Duration::from_secs(1), "waited {:?}", started.elapsed());
        assert!(!stuck.is_finished(), "the slow report should still be running");

        let slow_result = stuck.join().expect("slow thread");
        assert!(matches!(slow_result, Err(TabulateError::Timeout)), "got {slow_result:?}");
    });
}
