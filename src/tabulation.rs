//! Result model: the [`Tabulation`] a report produces and its recursive [`Series`].
//!
//! Scripts never build these directly. They get a [`TabulationHandle`] from
//! the `tabulation.new` binding and grow it through [`SeriesHandle`]s. While
//! the script runs, all series of one tabulation live in a single arena
//! (`Draft`) and refer to their children by index; nodes are only ever
//! appended as fresh children, so the structure is a tree by construction.
//! Once `generate` has returned, the arena is folded into owned values.
//!
//! Everything a run builds on the host heap is charged to one
//! [`ResultBudget`], however many tabulations the script creates.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;

use mlua::{MetaMethod, String as LuaString, Table, UserData, UserDataFields, UserDataMethods};
use serde::{Deserialize, Serialize};

use crate::report::ReportId;

/// Upper bound on labels or values addressed by a single index.
pub const MAX_POINTS: usize = 100_000;
/// Upper bound on series nodes, one per tabulation included, created by one run.
pub const MAX_SERIES: usize = 10_000;
/// Upper bound on values and label slots created by one run.
pub const MAX_CELLS: usize = 1_000_000;
/// Upper bound, in bytes, on any title, label or series name.
pub const MAX_TEXT: usize = 4096;
/// Upper bound, in bytes, on all titles, labels and series names stored by one run.
pub const MAX_TEXT_TOTAL: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Series {
    pub values: Vec<f64>,
    pub series: BTreeMap<String, Series>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tabulation {
    pub report_id: ReportId,
    pub title: String,
    pub subtitle: String,
    pub units: String,
    pub labels: Vec<String>,
    pub series: BTreeMap<String, Series>,
}

type NodeId = usize;

// The root node's children are the tabulation's top level series; its own
// values are never used.
const ROOT: NodeId = 0;

#[derive(Debug, Default)]
struct Node {
    values: Vec<f64>,
    children: BTreeMap<String, NodeId>,
}

/// Host-side allowance shared by every tabulation one script run builds.
/// Charges are never given back, so it also bounds what a script can churn
/// through by repeatedly replacing labels or abandoning tabulations.
#[derive(Debug, Default)]
pub struct ResultBudget {
    series: Cell<usize>,
    cells: Cell<usize>,
    text: Cell<usize>,
}

impl ResultBudget {
    fn take(counter: &Cell<usize>, amount: usize, limit: usize, what: &str) -> mlua::Result<()> {
        let total = counter.get().saturating_add(amount);
        if total > limit {
            return Err(mlua::Error::runtime(format!("a report may hold at most {limit} {what}")));
        }
        counter.set(total);
        Ok(())
    }
    fn take_series(&self) -> mlua::Result<()> {
        Self::take(&self.series, 1, MAX_SERIES, "series")
    }
    fn take_cells(&self, n: usize) -> mlua::Result<()> {
        Self::take(&self.cells, n, MAX_CELLS, "values and labels")
    }
    fn take_text(&self, bytes: usize) -> mlua::Result<()> {
        Self::take(&self.text, bytes, MAX_TEXT_TOTAL, "bytes of text")
    }
}

#[derive(Debug)]
struct Draft {
    budget: Rc<ResultBudget>,
    title: String,
    subtitle: String,
    units: String,
    labels: Vec<String>,
    nodes: Vec<Node>,
}

impl Draft {
    fn new(budget: Rc<ResultBudget>) -> mlua::Result<Self> {
        budget.take_series()?;
        Ok(Self {
            budget,
            title: String::new(),
            subtitle: String::new(),
            units: String::new(),
            labels: Vec::new(),
            nodes: vec![Node::default()],
        })
    }

    // Copies a string the draft is about to store, charging its bytes.
    fn keep_text(&self, s: &LuaString) -> mlua::Result<String> {
        let kept = text(s)?;
        self.budget.take_text(kept.len())?;
        Ok(kept)
    }

    fn child(&mut self, parent: NodeId, name: &str) -> mlua::Result<NodeId> {
        if let Some(&id) = self.nodes[parent].children.get(name) {
            return Ok(id);
        }
        self.budget.take_series()?;
        self.budget.take_text(name.len())?;
        let id = self.nodes.len();
        self.nodes.push(Node::default());
        self.nodes[parent].children.insert(name.to_string(), id);
        Ok(id)
    }

    fn set_value(&mut self, node: NodeId, index: i64, value: f64) -> mlua::Result<()> {
        if !value.is_finite() {
            return Err(mlua::Error::runtime(format!("series values must be finite numbers, got {value}")));
        }
        let slot = slot(index)?;
        let len = self.nodes[node].values.len();
        if slot >= len {
            self.budget.take_cells(slot + 1 - len)?;
            self.nodes[node].values.resize(slot + 1, 0.0);
        }
        self.nodes[node].values[slot] = value;
        Ok(())
    }

    fn set_labels(&mut self, labels: Table) -> mlua::Result<()> {
        let mut kept = Vec::new();
        for label in labels.sequence_values::<LuaString>() {
            if kept.len() == MAX_POINTS {
                return Err(mlua::Error::runtime(format!("a tabulation may hold at most {MAX_POINTS} labels")));
            }
            let label = self.keep_text(&label?)?;
            self.budget.take_cells(1)?;
            kept.push(label);
        }
        self.labels = kept;
        Ok(())
    }

    fn set_label(&mut self, index: i64, label: &LuaString) -> mlua::Result<()> {
        let slot = slot(index)?;
        let label = self.keep_text(label)?;
        if slot >= self.labels.len() {
            self.budget.take_cells(slot + 1 - self.labels.len())?;
            self.labels.resize(slot + 1, String::new());
        }
        self.labels[slot] = label;
        Ok(())
    }

    fn fold(&self, node: NodeId) -> Series {
        let node = &self.nodes[node];
        Series {
            values: node.values.clone(),
            series: node
                .children
                .iter()
                .map(|(name, &child)| (name.clone(), self.fold(child)))
                .collect(),
        }
    }

    fn finish(&self) -> Tabulation {
        Tabulation {
            report_id: 0,
            title: self.title.clone(),
            subtitle: self.subtitle.clone(),
            units: self.units.clone(),
            labels: self.labels.clone(),
            series: self.fold(ROOT).series,
        }
    }
}

// Copies a script string out of the interpreter, refusing oversized ones
// before they are duplicated on the host heap.
fn text(s: &LuaString) -> mlua::Result<String> {
    let bytes = s.as_bytes();
    if bytes.len() > MAX_TEXT {
        return Err(mlua::Error::runtime(format!("text longer than {MAX_TEXT} bytes")));
    }
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

// Lua indexes are 1-based.
fn slot(index: i64) -> mlua::Result<usize> {
    if index < 1 || index as u64 > MAX_POINTS as u64 {
        return Err(mlua::Error::runtime(format!("index {index} is outside 1..={MAX_POINTS}")));
    }
    Ok(index as usize - 1)
}

// ------------- Handles -------------
/// Opaque script-side reference to a tabulation under construction. The
/// execution host accepts nothing else as the result of `generate`.
pub struct TabulationHandle(Rc<RefCell<Draft>>);

impl TabulationHandle {
    /// Starts an empty tabulation charged to `budget`.
    pub fn new(budget: Rc<ResultBudget>) -> mlua::Result<Self> {
        Ok(Self(Rc::new(RefCell::new(Draft::new(budget)?))))
    }
    /// Applies the optional `{title=, subtitle=, units=, labels=}` table
    /// accepted by `tabulation.new`.
    pub fn configure(&self, options: &Table) -> mlua::Result<()> {
        let mut draft = self.0.borrow_mut();
        if let Some(title) = options.get::<Option<LuaString>>("title")? {
            draft.title = draft.keep_text(&title)?;
        }
        if let Some(subtitle) = options.get::<Option<LuaString>>("subtitle")? {
            draft.subtitle = draft.keep_text(&subtitle)?;
        }
        if let Some(units) = options.get::<Option<LuaString>>("units")? {
            draft.units = draft.keep_text(&units)?;
        }
        if let Some(labels) = options.get::<Option<Table>>("labels")? {
            draft.set_labels(labels)?;
        }
        Ok(())
    }
    pub fn finish(&self) -> Tabulation {
        self.0.borrow().finish()
    }
}

pub struct SeriesHandle {
    draft: Rc<RefCell<Draft>>,
    node: NodeId,
}

impl UserData for TabulationHandle {
    fn add_fields<F: UserDataFields<Self>>(fields: &mut F) {
        fields.add_field_method_get("title", |_, this| Ok(this.0.borrow().title.clone()));
        fields.add_field_method_set("title", |_, this, title: LuaString| {
            let mut draft = this.0.borrow_mut();
            draft.title = draft.keep_text(&title)?;
            Ok(())
        });
        fields.add_field_method_get("subtitle", |_, this| Ok(this.0.borrow().subtitle.clone()));
        fields.add_field_method_set("subtitle", |_, this, subtitle: LuaString| {
            let mut draft = this.0.borrow_mut();
            draft.subtitle = draft.keep_text(&subtitle)?;
            Ok(())
        });
        fields.add_field_method_get("units", |_, this| Ok(this.0.borrow().units.clone()));
        fields.add_field_method_set("units", |_, this, units: LuaString| {
            let mut draft = this.0.borrow_mut();
            draft.units = draft.keep_text(&units)?;
            Ok(())
        });
        fields.add_field_method_get("labels", |_, this| Ok(this.0.borrow().labels.clone()));
        fields.add_field_method_set("labels", |_, this, labels: Table| this.0.borrow_mut().set_labels(labels));
    }

    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("label", |_, this, (index, label): (i64, LuaString)| {
            this.0.borrow_mut().set_label(index, &label)
        });
        methods.add_method("series", |_, this, name: LuaString| {
            let node = this.0.borrow_mut().child(ROOT, &text(&name)?)?;
            Ok(SeriesHandle {
                draft: Rc::clone(&this.0),
                node,
            })
        });
        methods.add_meta_method(MetaMethod::ToString, |_, this, ()| {
            Ok(format!("tabulation: {}", this.0.borrow().title))
        });
    }
}

impl UserData for SeriesHandle {
    fn add_fields<F: UserDataFields<Self>>(fields: &mut F) {
        fields.add_field_method_get("values", |_, this| Ok(this.draft.borrow().nodes[this.node].values.clone()));
    }

    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("set", |_, this, (index, value): (i64, f64)| {
            this.draft.borrow_mut().set_value(this.node, index, value)
        });
        methods.add_method("push", |_, this, value: f64| {
            let mut draft = this.draft.borrow_mut();
            let next = draft.nodes[this.node].values.len() as i64 + 1;
            draft.set_value(this.node, next, value)
        });
        methods.add_method("series", |_, this, name: LuaString| {
            let node = this.draft.borrow_mut().child(this.node, &text(&name)?)?;
            Ok(SeriesHandle {
                draft: Rc::clone(&this.draft),
                node,
            })
        });
        methods.add_meta_method(MetaMethod::ToString, |_, this, ()| {
            Ok(format!("series: {} values", this.draft.borrow().nodes[this.node].values.len()))
        });
    }
}
