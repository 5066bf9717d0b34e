mod common;

use common::setup;
use tabulate::TabulateError;
use tabulate::error::ContractBreach;
use tabulate::report::Report;

const NET_WORTH: &str = r#"
local months = {"Jan", "Feb", "Mar"}

function generate()
    local t = tabulation.new{title = "Net Worth", subtitle = "2017", units = securities.default().symbol}
    t.labels = months
    local assets = t:series("Assets")
    local checking = assets:series("Checking")
    local day = date.new(2017, 1, 1)
    for i = 1, #months do
        local balance = balances.at($checking, day:end_of_month())
        checking:set(i, balance.amount)
        assets:set(i, balance.amount)
        day = day:add_months(1)
    end
    t:series("Income"):push(-balances.between($salary, date.new(2017, 1, 1), date.new(2018, 1, 1)).amount)
    return t
end
"#;

fn breach(result: tabulate::Result<tabulate::tabulation::Tabulation>) -> ContractBreach {
    match result {
        Err(TabulateError::ContractViolation(breach)) => breach,
        other => panic!("expected a contract violation, got {other:?}"),
    }
}

#[test]
fn net_worth_report() {
    let fx = setup();
    let report = fx
        .iface
        .create_report(&fx.alice, Report::draft("Net Worth", fx.script(NET_WORTH)))
        .expect("stored");
    let t = fx.iface.tabulate(&fx.alice, report.id).expect("tabulated");

    assert_eq!(t.report_id, report.id);
    assert_eq!(t.title, "Net Worth");
    assert_eq!(t.subtitle, "2017");
    assert_eq!(t.units, "USD");
    assert_eq!(t.labels, vec!["Jan", "Feb", "Mar"]);
    let assets = &t.series["Assets"];
    assert_eq!(assets.values, vec![1000.5, 800.25, 800.25]);
    assert_eq!(assets.series["Checking"].values, assets.values);
    assert!(assets.series["Checking"].series.is_empty());
    assert_eq!(t.series["Income"].values, vec![1000.5]);
    assert_eq!(t.series.len(), 2);
}

#[test]
fn result_serializes_for_clients() {
    let fx = setup();
    let t = fx
        .run("function generate() local t = tabulation.new{title = 'x'}; t:series('s'):push(1); return t end")
        .expect("tabulated");
    let json = serde_json::to_value(&t).expect("json");
    assert_eq!(json["reportId"], t.report_id);
    assert_eq!(json["series"]["s"]["values"][0], 1.0);
    assert!(json.get("errorId").is_none());
}

#[test]
fn missing_entry_point() {
    let fx = setup();
    assert_eq!(breach(fx.run("local x = 1")), ContractBreach::MissingEntryPoint);
    assert_eq!(breach(fx.run("generate = 5")), ContractBreach::MissingEntryPoint);
    assert_eq!(breach(fx.run("local function generate() return tabulation.new() end")), ContractBreach::MissingEntryPoint);
}

#[test]
fn entry_point_must_return_exactly_one_value() {
    let fx = setup();
    assert_eq!(breach(fx.run("function generate() end")), ContractBreach::ReturnCount(0));
    assert_eq!(
        breach(fx.run("function generate() return tabulation.new(), tabulation.new() end")),
        ContractBreach::ReturnCount(2)
    );
}

#[test]
fn lookalike_results_are_rejected() {
    let fx = setup();
    assert_eq!(
        breach(fx.run("function generate() return {title = 'Net Worth', series = {}} end")),
        ContractBreach::NotAHandle
    );
    assert_eq!(breach(fx.run("function generate() return 42 end")), ContractBreach::NotAHandle);
    assert_eq!(breach(fx.run("function generate() return nil end")), ContractBreach::NotAHandle);
    assert_eq!(
        breach(fx.run("function generate() return accounts.get($checking) end")),
        ContractBreach::WrongHandle
    );
    assert_eq!(
        breach(fx.run("function generate() return tabulation.new():series('s') end")),
        ContractBreach::WrongHandle
    );
    let err = fx.run("function generate() return 42 end").unwrap_err();
    assert_eq!(err.error_id(), 12);
}

#[test]
fn compile_errors() {
    let fx = setup();
    let err = fx.run("function generate(").unwrap_err();
    assert!(matches!(err, TabulateError::Compile(_)));
    assert_eq!(err.error_id(), 10);
}

#[test]
fn runtime_errors() {
    let fx = setup();
    let err = fx.run("error('top level')").unwrap_err();
    assert!(matches!(err, TabulateError::Runtime(ref m) if m.contains("top level")));
    assert_eq!(err.error_id(), 11);

    let err = fx.run("function generate() return nil + 1 end").unwrap_err();
    assert!(matches!(err, TabulateError::Runtime(_)));
    let err = fx.run("function generate() return tabulation.new{title = {}} end").unwrap_err();
    assert!(matches!(err, TabulateError::Runtime(_)));
}

#[test]
fn every_run_starts_from_a_clean_interpreter() {
    let fx = setup();
    fx.run("leaked = 42; string.upper = nil; function generate() return tabulation.new() end")
        .expect("first run");
    let t = fx
        .run(
            "function generate()
                local t = tabulation.new{title = string.upper('clean')}
                if leaked ~= nil then error('state leaked between runs') end
                return t
            end",
        )
        .expect("second run");
    assert_eq!(t.title, "CLEAN");
}

#[test]
fn print_goes_to_the_log() {
    let fx = setup();
    let t = fx
        .run("print('hello', 1, nil, accounts.get($checking)); function generate() return tabulation.new{title = 'ok'} end")
        .expect("runs");
    assert_eq!(t.title, "ok");
}

#[test]
fn labels_and_values_grow_with_gaps() {
    let fx = setup();
    let t = fx
        .run(
            "function generate()
                local t = tabulation.new()
                t:label(3, 'Mar')
                local s = t:series('s')
                s:set(2, 5)
                s:push(7)
                return t
            end",
        )
        .expect("runs");
    assert_eq!(t.labels, vec!["", "", "Mar"]);
    assert_eq!(t.series["s"].values, vec![0.0, 5.0, 7.0]);
}

#[test]
fn net_worth_example_comes_back_exactly() {
    use std::collections::BTreeMap;

    use tabulate::tabulation::{Series, Tabulation};

    let fx = setup();
    let report = fx
        .iface
        .create_report(
            &fx.alice,
            Report::draft(
                "Net Worth",
                r#"function generate()
                    local t = tabulation.new{title = "Net Worth"}
                    t.labels = {"Jan", "Feb"}
                    local total = t:series("Total")
                    total:push(100.0)
                    total:push(150.0)
                    return t
                end"#,
            ),
        )
        .expect("stored");
    let t = fx.iface.tabulate(&fx.alice, report.id).expect("tabulated");

    let expected = Tabulation {
        report_id: report.id,
        title: "Net Worth".into(),
        subtitle: String::new(),
        units: String::new(),
        labels: vec!["Jan".into(), "Feb".into()],
        series: BTreeMap::from([(
            "Total".to_string(),
            Series {
                values: vec![100.0, 150.0],
                series: BTreeMap::new(),
            },
        )]),
    };
    assert_eq!(t, expected);
}
