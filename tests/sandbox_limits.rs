mod common;

use std::time::{Duration, Instant};

use common::{setup, setup_with};
use tabulate::TabulateError;
use tabulate::settings::Limits;

fn quick() -> Limits {
    Limits {
        timeout: Duration::from_millis(250),
        ..Limits::default()
    }
}

fn assert_times_out(source: &str) {
    let fx = setup_with(quick());
    let started = Instant::now();
    let err = fx.run(source).unwrap_err();
    assert!(matches!(err, TabulateError::Timeout), "expected a timeout, got {err:?}");
    assert_eq!(err.error_id(), 13);
    assert!(started.elapsed() < Duration::from_secs(5), "took {:?}", started.elapsed());
}

#[test]
fn endless_loop_in_generate() {
    assert_times_out("function generate() while true do end end");
}

#[test]
fn endless_loop_at_top_level() {
    assert_times_out("local n = 0; while true do n = n + 1 end");
}

#[test]
fn deadline_cannot_be_swallowed() {
    assert_times_out(
        "function generate()
            while true do
                pcall(function() while true do end end)
            end
        end",
    );
    assert_times_out(
        "function generate()
            while true do
                xpcall(function() while true do end end, function(e) return e end)
            end
        end",
    );
}

#[test]
fn busy_bindings_time_out_too() {
    assert_times_out(
        "function generate()
            local d = date.new(2017, 1, 1)
            while true do
                pcall(balances.at, $checking, d)
            end
        end",
    );
}

#[test]
fn a_timed_out_run_leaves_the_next_alone() {
    let fx = setup_with(quick());
    assert!(matches!(fx.run("while true do end"), Err(TabulateError::Timeout)));
    let t = fx.run("function generate() return tabulation.new{title = 'after'} end").expect("runs");
    assert_eq!(t.title, "after");
}

#[test]
fn dangerous_libraries_are_absent() {
    let fx = setup();
    for name in ["io", "os", "debug", "coroutine", "utf8", "dofile", "loadfile"] {
        let source = format!("function generate() return tabulation.new{{title = type({name})}} end");
        let t = fx.run(&source).expect("runs");
        assert_eq!(t.title, "nil", "{name} is reachable");
    }
    let err = fx.run("os.execute('true')").unwrap_err();
    assert!(matches!(err, TabulateError::Runtime(_)));
    let err = fx.run("io.open('/etc/passwd')").unwrap_err();
    assert!(matches!(err, TabulateError::Runtime(_)));
}

#[test]
fn require_reaches_nothing_new() {
    let fx = setup();
    for module in ["io", "os", "debug", "socket", "ffi"] {
        let err = fx.run(&format!("require('{module}')")).unwrap_err();
        assert!(matches!(err, TabulateError::Runtime(_)), "require('{module}') gave {err:?}");
    }
    // already loaded whitelisted modules still resolve
    let t = fx
        .run("local s = require('string'); function generate() return tabulation.new{title = s.upper('ok')} end")
        .expect("runs");
    assert_eq!(t.title, "OK");
}

#[test]
fn load_accepts_only_source_text() {
    let fx = setup();
    let t = fx
        .run(
            "function generate()
                local f = load('return 40 + 2')
                local bytecode = string.dump(function() return 1 end)
                local g = load(bytecode)
                local t = tabulation.new{title = tostring(g)}
                t:series('answer'):push(f())
                return t
            end",
        )
        .expect("runs");
    assert_eq!(t.title, "nil");
    assert_eq!(t.series["answer"].values, vec![42.0]);
}

#[test]
fn memory_is_capped() {
    let fx = setup_with(Limits {
        memory_limit: 8 * 1024 * 1024,
        ..Limits::default()
    });
    let err = fx
        .run(
            "function generate()
                local hog = {}
                for i = 1, 10000000 do hog[i] = string.rep('x', 64) .. i end
                return tabulation.new()
            end",
        )
        .unwrap_err();
    assert!(matches!(err, TabulateError::Runtime(_)), "got {err:?}");
}

#[test]
fn result_size_is_capped() {
    let fx = setup();
    let err = fx
        .run("function generate() local t = tabulation.new(); t:label(100001, 'x'); return t end")
        .unwrap_err();
    assert!(matches!(err, TabulateError::Runtime(_)));
    let err = fx
        .run("function generate() local t = tabulation.new(); t:series('s'):set(0, 1); return t end")
        .unwrap_err();
    assert!(matches!(err, TabulateError::Runtime(_)));
    let err = fx
        .run("function generate() return tabulation.new{title = string.rep('x', 5000)} end")
        .unwrap_err();
    assert!(matches!(err, TabulateError::Runtime(_)));
}

#[test]
fn backtracking_patterns_time_out() {
    assert_times_out(
        "function generate()
            string.find(string.rep('a', 3000), string.rep('a*', 12) .. 'b')
        end",
    );
    assert_times_out(
        "function generate()
            local subject = string.rep('a', 3000)
            subject:gsub(string.rep('a-', 12) .. 'b', 'x')
        end",
    );
    assert_times_out("return string.match(string.rep('a', 3000), string.rep('a*', 12) .. '$b')");
}

#[test]
fn result_budget_spans_every_tabulation() {
    let fx = setup();
    let err = fx
        .run(
            "function generate()
                local big = string.rep('x', 4000)
                local kept = {}
                for n = 1, 3 do
                    local t = tabulation.new()
                    for i = 1, 100000 do t:label(i, big) end
                    kept[n] = t
                end
                return kept[1]
            end",
        )
        .unwrap_err();
    assert!(matches!(err, TabulateError::Runtime(ref m) if m.contains("bytes of text")), "got {err:?}");

    let err = fx
        .run(
            "function generate()
                for n = 1, 20 do
                    tabulation.new():series('s'):set(100000, 1)
                end
                return tabulation.new()
            end",
        )
        .unwrap_err();
    assert!(matches!(err, TabulateError::Runtime(ref m) if m.contains("values and labels")), "got {err:?}");

    let err = fx
        .run("function generate() for n = 1, 20000 do tabulation.new() end return tabulation.new() end")
        .unwrap_err();
    assert!(matches!(err, TabulateError::Runtime(ref m) if m.contains("series")), "got {err:?}");
}

#[test]
fn series_values_must_be_finite() {
    let fx = setup();
    for value in ["0/0", "math.huge", "-math.huge"] {
        let err = fx
            .run(&format!("function generate() local t = tabulation.new(); t:series('s'):push({value}); return t end"))
            .unwrap_err();
        assert!(matches!(err, TabulateError::Runtime(ref m) if m.contains("finite")), "{value} gave {err:?}");
    }
    let err = fx
        .run("function generate() local t = tabulation.new(); t:series('s'):set(2, 0/0); return t end")
        .unwrap_err();
    assert!(matches!(err, TabulateError::Runtime(_)));
}
