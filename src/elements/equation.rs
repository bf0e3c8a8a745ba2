//! Expression-driven sources and the source that reads a computed value.

use crate::circuit::{escape, NodeId, Tokens};
use crate::expr::{EvalEnv, ExprState, Expression, VariableSource, PARAM_COUNT};
use crate::solver::{FinishContext, StampSession, StepContext, Tolerance, UNCONNECTED_NODE_RESISTANCE};

use super::core::{number_text, voltage_text, DrivenOutput, ElementCore};
use super::CircuitElement;

const EQUATION_OUTPUT_TOLERANCE: Tolerance = Tolerance::fixed(0.01, 1e-6);
const COMPUTED_SOURCE_TOLERANCE: Tolerance = Tolerance::fixed(0.001, 1e-6);

/// A compiled expression together with its evaluation state.
#[derive(Debug, Clone)]
pub(crate) struct Formula {
    pub expr: Expression,
    pub state: ExprState,
}

impl Formula {
    pub fn new(source: &str) -> Self {
        Self {
            expr: Expression::compile(source),
            state: ExprState::new(),
        }
    }

    pub fn with_params(source: &str, params: &[f64]) -> Self {
        let mut formula = Self::new(source);
        for (slot, &value) in formula.state.values.iter_mut().zip(params) {
            *slot = value;
        }
        formula
    }

    pub fn eval(&mut self, vars: &dyn VariableSource, t: f64, time_step: f64) -> f64 {
        self.state.t = t;
        self.expr.eval(&mut self.state, &EvalEnv::new(time_step, vars))
    }

    /// Commit history once the timestep is accepted.
    pub fn commit(&mut self, output: f64, time_step: f64) {
        self.state.update_last_values(output);
        self.state.commit_integration(time_step);
    }

    pub fn reset(&mut self) {
        self.state.reset();
    }

    /// Parse error and unresolved names, for info panels.
    pub fn diagnostics(&self, info: &mut Vec<String>) {
        if let Some(err) = self.expr.error() {
            info.push(format!("error: {}", err));
        }
        let unresolved: Vec<&str> = self.state.unresolved().collect();
        if !unresolved.is_empty() {
            info.push(format!("unresolved: {}", unresolved.join(", ")));
        }
    }
}

/// Read `count` followed by that many parameter values. Only the first
/// `PARAM_COUNT` are kept.
pub(crate) fn read_params(tokens: &mut Tokens<'_>) -> Vec<f64> {
    let count = tokens.count_or("parameter count", 0, PARAM_COUNT);
    (0..count).map(|i| tokens.f64_or(&format!("parameter {}", i), 0.0)).collect()
}

pub(crate) fn dump_params(params: &[f64], fields: &mut Vec<String>) {
    fields.push(params.len().to_string());
    fields.extend(params.iter().map(f64::to_string));
}

/// A one-post source whose voltage is an expression, also published as a
/// computed value under `name`.
#[derive(Debug, Clone)]
pub struct Equation {
    core: ElementCore,
    pub name: String,
    pub params: Vec<f64>,
    formula: Formula,
    output: DrivenOutput,
}

impl Equation {
    pub fn new(core: ElementCore, name: impl Into<String>, equation: &str, params: Vec<f64>) -> Self {
        Self {
            core,
            name: name.into(),
            formula: Formula::with_params(equation, &params),
            params,
            output: DrivenOutput::default(),
        }
    }

    pub fn from_tokens(core: ElementCore, tokens: &mut Tokens<'_>) -> Self {
        let name = tokens.string_or("");
        let equation = tokens.string_or("0");
        let params = read_params(tokens);
        Self::new(core, name, &equation, params)
    }

    pub fn equation(&self) -> &str {
        self.formula.expr.source()
    }

    /// Value written by the last sub-iteration.
    pub fn value(&self) -> f64 {
        self.output.last_target
    }
}

impl CircuitElement for Equation {
    fn core(&self) -> &ElementCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ElementCore {
        &mut self.core
    }

    fn dump_type(&self) -> &'static str {
        "262"
    }

    fn kind(&self) -> &'static str {
        "equation"
    }

    fn post_count(&self) -> usize {
        1
    }

    fn voltage_source_count(&self) -> usize {
        1
    }

    fn non_linear(&self) -> bool {
        true
    }

    fn has_ground_connection(&self, _n: usize) -> bool {
        true
    }

    fn claimed_keys(&self) -> Vec<&str> {
        if self.name.is_empty() {
            Vec::new()
        } else {
            vec![self.name.as_str()]
        }
    }

    fn stamp(&mut self, session: &mut StampSession<'_>) {
        DrivenOutput::stamp(session, self.core.node(0), self.core.source(0));
    }

    fn do_step(&mut self, ctx: &mut StepContext<'_>) {
        let (t, dt) = (ctx.time(), ctx.time_step());
        let value = {
            let vars = ctx.variables();
            self.formula.eval(&vars, t, dt)
        };
        let out = self.core.volt(0);
        self.output
            .drive_settled(ctx, self.core.source(0), out, value, EQUATION_OUTPUT_TOLERANCE);
        if !self.name.is_empty() {
            ctx.set_computed_value(&self.name, value);
        }
    }

    fn step_finished(&mut self, ctx: &mut FinishContext<'_>) {
        self.formula.commit(self.output.last_target, ctx.time_step());
    }

    fn reset(&mut self) {
        self.core.reset_state();
        self.formula.reset();
        self.output = DrivenOutput::default();
    }

    fn info(&self) -> Vec<String> {
        let mut info = vec![
            "equation".to_string(),
            format!("{} = {}", self.name, self.equation()),
            format!("V = {}", voltage_text(self.core.volt(0))),
        ];
        self.formula.diagnostics(&mut info);
        info
    }

    fn dump_fields(&self) -> Vec<String> {
        let mut fields = vec![escape(&self.name), escape(self.equation())];
        dump_params(&self.params, &mut fields);
        fields
    }
}

/// A one-post source that outputs a computed value, or `default` when the
/// key has not been computed this run.
#[derive(Debug, Clone)]
pub struct ComputedSource {
    core: ElementCore,
    pub name: String,
    pub default: f64,
    output: DrivenOutput,
}

impl ComputedSource {
    pub fn new(core: ElementCore, name: impl Into<String>, default: f64) -> Self {
        Self {
            core,
            name: name.into(),
            default,
            output: DrivenOutput::default(),
        }
    }

    pub fn from_tokens(core: ElementCore, tokens: &mut Tokens<'_>) -> Self {
        let name = tokens.string_or("");
        let default = tokens.f64_or("default", 0.0);
        Self::new(core, name, default)
    }
}

impl CircuitElement for ComputedSource {
    fn core(&self) -> &ElementCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ElementCore {
        &mut self.core
    }

    fn dump_type(&self) -> &'static str {
        "267"
    }

    fn kind(&self) -> &'static str {
        "computed source"
    }

    fn post_count(&self) -> usize {
        1
    }

    fn voltage_source_count(&self) -> usize {
        1
    }

    fn non_linear(&self) -> bool {
        true
    }

    fn has_ground_connection(&self, _n: usize) -> bool {
        true
    }

    fn stamp(&mut self, session: &mut StampSession<'_>) {
        let out = self.core.node(0);
        DrivenOutput::stamp(session, out, self.core.source(0));
        session.stamp_resistor(out, NodeId::GROUND, UNCONNECTED_NODE_RESISTANCE);
    }

    fn do_step(&mut self, ctx: &mut StepContext<'_>) {
        let value = ctx
            .computed()
            .get_computed_value(&self.name)
            .unwrap_or(self.default);
        let out = self.core.volt(0);
        self.output
            .drive(ctx, self.core.source(0), out, value, COMPUTED_SOURCE_TOLERANCE);
    }

    fn reset(&mut self) {
        self.core.reset_state();
        self.output = DrivenOutput::default();
    }

    fn info(&self) -> Vec<String> {
        vec![
            "computed source".to_string(),
            self.name.clone(),
            format!("V = {}", voltage_text(self.core.volt(0))),
            format!("default = {}", number_text(self.default)),
        ]
    }

    fn dump_fields(&self) -> Vec<String> {
        vec![escape(&self.name), self.default.to_string()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::NoVariables;
    use approx::assert_relative_eq;

    #[test]
    fn test_formula_params_and_history() {
        let mut f = Formula::with_params("_a * t + lastoutput", &[2.0]);
        assert_relative_eq!(f.eval(&NoVariables, 3.0, 0.1), 6.0);
        f.commit(6.0, 0.1);
        assert_relative_eq!(f.eval(&NoVariables, 3.0, 0.1), 12.0);
        f.reset();
        assert_relative_eq!(f.eval(&NoVariables, 1.0, 0.1), 2.0);
    }

    #[test]
    fn test_diagnostics_report_parse_error() {
        let f = Formula::new("1 +");
        let mut info = Vec::new();
        f.diagnostics(&mut info);
        assert_eq!(info.len(), 1);
        assert!(info[0].starts_with("error"));
    }

    #[test]
    fn test_equation_claims_its_name() {
        let e = Equation::new(ElementCore::new(0, 0, 16, 0, 0), "y", "1", Vec::new());
        assert_eq!(e.claimed_keys(), vec!["y"]);
        let anon = Equation::new(ElementCore::new(0, 0, 16, 0, 0), "", "1", Vec::new());
        assert!(anon.claimed_keys().is_empty());
    }
}
