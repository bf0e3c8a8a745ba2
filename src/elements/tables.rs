//! Pinless tables that compute named values.
//!
//! Tables have no posts. Each row publishes a computed value that other
//! expressions, tables and computed sources read by name.

use tracing::debug;

use crate::circuit::{escape, Tokens};
use crate::solver::{FinishContext, StepContext, Tolerance};

use super::core::{number_text, ElementCore};
use super::equation::Formula;
use super::CircuitElement;

/// `name = equation`, with an optional expression used on the first timestep.
#[derive(Debug, Clone)]
pub struct EquationRow {
    pub name: String,
    formula: Formula,
    initial: Option<Formula>,
    value: f64,
}

impl EquationRow {
    pub fn new(name: impl Into<String>, equation: &str, initial: Option<&str>) -> Self {
        Self {
            name: name.into(),
            formula: Formula::new(equation),
            initial: initial.filter(|s| !s.trim().is_empty()).map(Formula::new),
            value: 0.0,
        }
    }

    pub fn equation(&self) -> &str {
        self.formula.expr.source()
    }

    pub fn initial_equation(&self) -> Option<&str> {
        self.initial.as_ref().map(|f| f.expr.source())
    }

    /// Value from the last sub-iteration.
    pub fn value(&self) -> f64 {
        self.value
    }
}

/// A table of equations evaluated together every sub-iteration.
#[derive(Debug, Clone)]
pub struct EquationTable {
    core: ElementCore,
    pub table_name: String,
    pub rows: Vec<EquationRow>,
}

impl EquationTable {
    pub fn new(core: ElementCore, table_name: impl Into<String>, rows: Vec<EquationRow>) -> Self {
        Self {
            core,
            table_name: table_name.into(),
            rows,
        }
    }

    pub fn from_tokens(core: ElementCore, tokens: &mut Tokens<'_>) -> Self {
        let table_name = tokens.string_or("");
        let count = tokens.record_count("row count", 3);
        let mut rows = Vec::new();
        for _ in 0..count {
            let name = tokens.string_or("");
            let equation = tokens.string_or("0");
            let initial = tokens.string_or("");
            rows.push(EquationRow::new(name, &equation, Some(&initial)));
        }
        Self::new(core, table_name, rows)
    }

    pub fn row(&self, name: &str) -> Option<&EquationRow> {
        self.rows.iter().find(|r| r.name == name)
    }
}

impl CircuitElement for EquationTable {
    fn core(&self) -> &ElementCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ElementCore {
        &mut self.core
    }

    fn dump_type(&self) -> &'static str {
        "266"
    }

    fn kind(&self) -> &'static str {
        "equation table"
    }

    fn post_count(&self) -> usize {
        0
    }

    fn non_linear(&self) -> bool {
        true
    }

    fn claimed_keys(&self) -> Vec<&str> {
        self.rows
            .iter()
            .filter(|r| !r.name.is_empty())
            .map(|r| r.name.as_str())
            .collect()
    }

    fn do_step(&mut self, ctx: &mut StepContext<'_>) {
        let (t, dt) = (ctx.time(), ctx.time_step());
        let first_step = ctx.time_step_count() == 0;
        for row in &mut self.rows {
            let value = {
                let vars = ctx.variables();
                match (&mut row.initial, first_step) {
                    (Some(initial), true) => initial.eval(&vars, t, dt),
                    _ => row.formula.eval(&vars, t, dt),
                }
            };
            ctx.check_convergence(value, row.value, Tolerance::Scheduled);
            row.value = value;
            if !row.name.is_empty() {
                ctx.set_computed_value(&row.name, value);
            }
        }
    }

    fn step_finished(&mut self, ctx: &mut FinishContext<'_>) {
        let dt = ctx.time_step();
        for row in &mut self.rows {
            row.formula.commit(row.value, dt);
            if let Some(initial) = &mut row.initial {
                initial.commit(row.value, dt);
            }
        }
    }

    fn reset(&mut self) {
        self.core.reset_state();
        for row in &mut self.rows {
            row.formula.reset();
            if let Some(initial) = &mut row.initial {
                initial.reset();
            }
            row.value = 0.0;
        }
    }

    fn info(&self) -> Vec<String> {
        let mut info = vec![format!("equation table {}", self.table_name)];
        for row in &self.rows {
            info.push(format!("{} = {}", row.name, number_text(row.value)));
            row.formula.diagnostics(&mut info);
        }
        info
    }

    fn dump_fields(&self) -> Vec<String> {
        let mut fields = vec![escape(&self.table_name), self.rows.len().to_string()];
        for row in &self.rows {
            fields.push(escape(&row.name));
            fields.push(escape(row.equation()));
            fields.push(escape(row.initial_equation().unwrap_or("")));
        }
        fields
    }
}

/// Another column's flow into a shared stock, scaled by that column's gain.
#[derive(Debug, Clone)]
struct Inflow {
    formula: Formula,
    gain: f64,
    value: f64,
}

/// How a column takes part in a stock held by several columns.
#[derive(Debug, Clone, Default)]
enum Share {
    #[default]
    Own,
    /// Integrates its own flow plus every other column's
    Lead(Vec<Inflow>),
    /// Shows the level the leading column integrates
    Follow,
}

/// Link assigned to a column by topology analysis.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum StockLink {
    /// `(flow, gain)` of each other column holding the stock
    Lead(Vec<(String, f64)>),
    /// Initial level of the leading column
    Follow(f64),
}

/// One stock: `stock += dt * gain * flow`.
#[derive(Debug, Clone)]
pub struct StockColumn {
    pub stock: String,
    flow: Formula,
    pub initial: f64,
    flow_value: f64,
    last_stock: f64,
    value: f64,
    share: Share,
}

impl StockColumn {
    pub fn new(stock: impl Into<String>, flow: &str, initial: f64) -> Self {
        Self {
            stock: stock.into(),
            flow: Formula::new(flow),
            initial,
            flow_value: 0.0,
            last_stock: initial,
            value: initial,
            share: Share::Own,
        }
    }

    pub fn flow(&self) -> &str {
        self.flow.expr.source()
    }

    /// Whether another column integrates this stock.
    pub fn follows(&self) -> bool {
        matches!(self.share, Share::Follow)
    }

    /// Flows from other columns added into this stock.
    pub fn inflow_count(&self) -> usize {
        match &self.share {
            Share::Lead(inflows) => inflows.len(),
            _ => 0,
        }
    }

    /// Stock level from the last sub-iteration.
    pub fn value(&self) -> f64 {
        self.value
    }
}

/// A table of stocks, each integrating its net flow.
#[derive(Debug, Clone)]
pub struct StockTable {
    core: ElementCore,
    pub table_name: String,
    pub gain: f64,
    pub columns: Vec<StockColumn>,
}

impl StockTable {
    pub fn new(core: ElementCore, table_name: impl Into<String>, gain: f64, columns: Vec<StockColumn>) -> Self {
        Self {
            core,
            table_name: table_name.into(),
            gain,
            columns,
        }
    }

    pub fn from_tokens(core: ElementCore, tokens: &mut Tokens<'_>) -> Self {
        let table_name = tokens.string_or("");
        let gain = tokens.f64_or("gain", 1.0);
        let count = tokens.record_count("column count", 3);
        let mut columns = Vec::new();
        for _ in 0..count {
            let stock = tokens.string_or("");
            let flow = tokens.string_or("0");
            let initial = tokens.f64_or("initial value", 0.0);
            columns.push(StockColumn::new(stock, &flow, initial));
        }
        Self::new(core, table_name, gain, columns)
    }

    pub fn column(&self, stock: &str) -> Option<&StockColumn> {
        self.columns.iter().find(|c| c.stock == stock)
    }

    /// Forget shared-stock links from the last analysis.
    pub(crate) fn unlink_stocks(&mut self) {
        for col in &mut self.columns {
            col.share = Share::Own;
        }
    }

    pub(crate) fn link_stock(&mut self, column: usize, link: StockLink) {
        let Some(col) = self.columns.get_mut(column) else {
            return;
        };
        col.share = match link {
            StockLink::Lead(flows) => Share::Lead(
                flows
                    .iter()
                    .map(|(flow, gain)| Inflow {
                        formula: Formula::new(flow),
                        gain: *gain,
                        value: 0.0,
                    })
                    .collect(),
            ),
            StockLink::Follow(initial) => {
                if col.initial != initial {
                    debug!(stock = %col.stock, from = col.initial, to = initial, "initial value taken from shared stock");
                    col.initial = initial;
                    col.last_stock = initial;
                    col.value = initial;
                }
                Share::Follow
            }
        };
    }
}

impl CircuitElement for StockTable {
    fn core(&self) -> &ElementCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ElementCore {
        &mut self.core
    }

    fn dump_type(&self) -> &'static str {
        "255"
    }

    fn kind(&self) -> &'static str {
        "stock table"
    }

    fn post_count(&self) -> usize {
        0
    }

    fn non_linear(&self) -> bool {
        true
    }

    fn claimed_keys(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| !c.stock.is_empty() && !c.follows())
            .map(|c| c.stock.as_str())
            .collect()
    }

    fn do_step(&mut self, ctx: &mut StepContext<'_>) {
        let (t, dt) = (ctx.time(), ctx.time_step());
        let first_step = ctx.time_step_count() == 0;
        for col in &mut self.columns {
            if first_step {
                col.last_stock = col.initial;
            }
            if col.follows() {
                col.value = ctx.computed().get_computed_value(&col.stock).unwrap_or(col.last_stock);
                continue;
            }
            let flow = {
                let vars = ctx.variables();
                col.flow.eval(&vars, t, dt)
            };
            ctx.check_convergence(flow, col.flow_value, Tolerance::Scheduled);
            col.flow_value = flow;
            let mut rate = self.gain * flow;
            if let Share::Lead(inflows) = &mut col.share {
                for inflow in inflows.iter_mut() {
                    let value = {
                        let vars = ctx.variables();
                        inflow.formula.eval(&vars, t, dt)
                    };
                    ctx.check_convergence(value, inflow.value, Tolerance::Scheduled);
                    inflow.value = value;
                    rate += inflow.gain * value;
                }
            }
            col.value = col.last_stock + dt * rate;
            if !col.stock.is_empty() {
                ctx.set_computed_value(&col.stock, col.value);
            }
        }
    }

    fn step_finished(&mut self, ctx: &mut FinishContext<'_>) {
        let dt = ctx.time_step();
        for col in &mut self.columns {
            col.last_stock = col.value;
            col.flow.commit(col.flow_value, dt);
            if let Share::Lead(inflows) = &mut col.share {
                for inflow in inflows.iter_mut() {
                    inflow.formula.commit(inflow.value, dt);
                }
            }
        }
    }

    fn reset(&mut self) {
        self.core.reset_state();
        for col in &mut self.columns {
            col.flow.reset();
            col.flow_value = 0.0;
            col.last_stock = col.initial;
            col.value = col.initial;
            if let Share::Lead(inflows) = &mut col.share {
                for inflow in inflows.iter_mut() {
                    inflow.formula.reset();
                    inflow.value = 0.0;
                }
            }
        }
    }

    fn info(&self) -> Vec<String> {
        let mut info = vec![format!("stock table {}", self.table_name)];
        for col in &self.columns {
            let line = match &col.share {
                Share::Follow => format!("{} = {} (shared, integrated elsewhere)", col.stock, number_text(col.value)),
                Share::Lead(inflows) => format!(
                    "{} = {} (flow {}, shared with {} other columns)",
                    col.stock,
                    number_text(col.value),
                    number_text(col.flow_value),
                    inflows.len()
                ),
                Share::Own => format!(
                    "{} = {} (flow {})",
                    col.stock,
                    number_text(col.value),
                    number_text(col.flow_value)
                ),
            };
            info.push(line);
            col.flow.diagnostics(&mut info);
        }
        info
    }

    fn dump_fields(&self) -> Vec<String> {
        let mut fields = vec![
            escape(&self.table_name),
            self.gain.to_string(),
            self.columns.len().to_string(),
        ];
        for col in &self.columns {
            fields.push(escape(&col.stock));
            fields.push(escape(col.flow()));
            fields.push(col.initial.to_string());
        }
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_initial_is_none() {
        let row = EquationRow::new("c", "0.8*y", Some(""));
        assert_eq!(row.initial_equation(), None);
        let seeded = EquationRow::new("c", "0.8*y", Some("5"));
        assert_eq!(seeded.initial_equation(), Some("5"));
    }

    #[test]
    fn test_tables_are_pinless_and_claim_rows() {
        let table = EquationTable::new(
            ElementCore::new(0, 0, 64, 0, 0),
            "econ",
            vec![EquationRow::new("c", "1", None), EquationRow::new("y", "2", None)],
        );
        assert_eq!(table.post_count(), 0);
        assert_eq!(table.claimed_keys(), vec!["c", "y"]);

        let stocks = StockTable::new(
            ElementCore::new(0, 0, 64, 0, 0),
            "bank",
            1.0,
            vec![StockColumn::new("cash", "1", 10.0)],
        );
        assert_eq!(stocks.claimed_keys(), vec!["cash"]);
        assert_eq!(stocks.column("cash").map(StockColumn::value), Some(10.0));
    }

    #[test]
    fn test_linked_columns() {
        let mut stocks = StockTable::new(
            ElementCore::new(0, 0, 64, 0, 0),
            "bank",
            1.0,
            vec![StockColumn::new("cash", "1", 10.0), StockColumn::new("loans", "2", 3.0)],
        );
        stocks.link_stock(0, StockLink::Lead(vec![("wages".to_string(), 2.0)]));
        stocks.link_stock(1, StockLink::Follow(7.0));
        stocks.link_stock(5, StockLink::Follow(1.0));

        assert_eq!(stocks.claimed_keys(), vec!["cash"]);
        assert_eq!(stocks.columns[0].inflow_count(), 1);
        assert!(stocks.columns[1].follows());
        assert_eq!(stocks.columns[1].initial, 7.0);
        assert!(stocks.info().iter().any(|l| l.contains("shared with 1 other columns")));

        stocks.unlink_stocks();
        assert_eq!(stocks.claimed_keys(), vec!["cash", "loans"]);
        assert_eq!(stocks.columns[0].inflow_count(), 0);
    }
}
