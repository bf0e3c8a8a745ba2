//! Integrator, differentiator and ODE.
//!
//! All three hold history that moves forward only in `step_finished`, so the
//! sub-iterations of one timestep all see the same previous state.

use crate::circuit::{escape, Tokens};
use crate::solver::{FinishContext, StampSession, StepContext, Tolerance};

use super::core::{number_text, voltage_text, DrivenOutput, ElementCore};
use super::equation::{dump_params, read_params, Formula};
use super::CircuitElement;

/// Integrator flag: take the initial value from input post 1.
pub const FLAG_INITIAL_FROM_INPUT: u32 = 1;

const DERIVATIVE_TOLERANCE: Tolerance = Tolerance::fixed(0.001, 1e-9);

/// Integrates its input: `out = last_output + dt * in`.
#[derive(Debug, Clone)]
pub struct Integrator {
    core: ElementCore,
    inputs: usize,
    pub initial: f64,
    last_output: f64,
    output: DrivenOutput,
}

impl Integrator {
    pub fn new(core: ElementCore, initial: f64) -> Self {
        let inputs = if core.has_flag(FLAG_INITIAL_FROM_INPUT) { 2 } else { 1 };
        Self {
            core,
            inputs,
            initial,
            last_output: 0.0,
            output: DrivenOutput::default(),
        }
    }

    pub fn from_tokens(core: ElementCore, tokens: &mut Tokens<'_>) -> Self {
        let initial = tokens.f64_or("initial value", 0.0);
        Self::new(core, initial)
    }

    /// Output committed at the end of the last timestep.
    pub fn last_output(&self) -> f64 {
        self.last_output
    }

    fn start_value(&self) -> f64 {
        if self.core.has_flag(FLAG_INITIAL_FROM_INPUT) {
            self.core.volt(1)
        } else {
            self.initial
        }
    }

    fn value(&self, time_step: f64) -> f64 {
        self.last_output + time_step * self.core.volt(0)
    }
}

impl CircuitElement for Integrator {
    fn core(&self) -> &ElementCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ElementCore {
        &mut self.core
    }

    fn dump_type(&self) -> &'static str {
        "260"
    }

    fn kind(&self) -> &'static str {
        "integrator"
    }

    chip_pins!();

    fn non_linear(&self) -> bool {
        true
    }

    fn stamp(&mut self, session: &mut StampSession<'_>) {
        DrivenOutput::stamp(session, self.core.node(self.inputs), self.core.source(0));
    }

    fn do_step(&mut self, ctx: &mut StepContext<'_>) {
        if ctx.time_step_count() == 0 {
            self.last_output = self.start_value();
        }
        let value = self.value(ctx.time_step());
        let out = self.core.volt(self.inputs);
        self.output
            .drive(ctx, self.core.source(0), out, value, Tolerance::Scheduled);
    }

    fn step_finished(&mut self, ctx: &mut FinishContext<'_>) {
        self.last_output = self.value(ctx.time_step());
    }

    fn reset(&mut self) {
        self.core.reset_state();
        self.last_output = 0.0;
        self.output = DrivenOutput::default();
    }

    fn info(&self) -> Vec<String> {
        vec![
            "integrator".to_string(),
            format!("in = {}", voltage_text(self.core.volt(0))),
            format!("Vout = {}", voltage_text(self.core.volt(self.inputs))),
            format!("initial = {}", number_text(self.initial)),
        ]
    }

    fn dump_fields(&self) -> Vec<String> {
        vec![self.initial.to_string()]
    }
}

/// Differentiates its input against the value committed last timestep.
///
/// The output stays at 0 for the first full timestep after a reset, while
/// there is no committed input to difference against.
#[derive(Debug, Clone)]
pub struct Differentiator {
    core: ElementCore,
    inputs: usize,
    last_input: f64,
    settle_step: Option<u64>,
    output: DrivenOutput,
}

impl Differentiator {
    pub fn new(core: ElementCore) -> Self {
        Self {
            core,
            inputs: 1,
            last_input: 0.0,
            settle_step: None,
            output: DrivenOutput::default(),
        }
    }

    pub fn is_settling(&self, time_step_count: u64) -> bool {
        self.settle_step.map_or(true, |s| time_step_count <= s)
    }
}

impl CircuitElement for Differentiator {
    fn core(&self) -> &ElementCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ElementCore {
        &mut self.core
    }

    fn dump_type(&self) -> &'static str {
        "259"
    }

    fn kind(&self) -> &'static str {
        "differentiator"
    }

    chip_pins!();

    fn non_linear(&self) -> bool {
        true
    }

    fn stamp(&mut self, session: &mut StampSession<'_>) {
        DrivenOutput::stamp(session, self.core.node(self.inputs), self.core.source(0));
    }

    fn do_step(&mut self, ctx: &mut StepContext<'_>) {
        let count = ctx.time_step_count();
        let settle = *self.settle_step.get_or_insert(count);
        let vs = self.core.source(0);
        if count <= settle {
            self.output.last_target = 0.0;
            ctx.stamp_right_side(vs, 0.0);
            return;
        }
        let dt = ctx.time_step();
        let value = if dt > 0.0 {
            (self.core.volt(0) - self.last_input) / dt
        } else {
            0.0
        };
        let out = self.core.volt(self.inputs);
        self.output.drive(ctx, vs, out, value, DERIVATIVE_TOLERANCE);
    }

    fn step_finished(&mut self, _ctx: &mut FinishContext<'_>) {
        self.last_input = self.core.volt(0);
    }

    fn reset(&mut self) {
        self.core.reset_state();
        self.last_input = 0.0;
        self.settle_step = None;
        self.output = DrivenOutput::default();
    }

    fn info(&self) -> Vec<String> {
        vec![
            "differentiator".to_string(),
            format!("in = {}", voltage_text(self.core.volt(0))),
            format!("Vout = {}", voltage_text(self.core.volt(self.inputs))),
        ]
    }
}

/// `name' = equation`, integrated with the timestep and published as a
/// computed value.
#[derive(Debug, Clone)]
pub struct Ode {
    core: ElementCore,
    pub name: String,
    pub initial: f64,
    pub params: Vec<f64>,
    formula: Formula,
    last_output: f64,
    output: DrivenOutput,
}

impl Ode {
    pub fn new(core: ElementCore, name: impl Into<String>, equation: &str, initial: f64, params: Vec<f64>) -> Self {
        Self {
            core,
            name: name.into(),
            initial,
            formula: Formula::with_params(equation, &params),
            params,
            last_output: initial,
            output: DrivenOutput::default(),
        }
    }

    pub fn from_tokens(core: ElementCore, tokens: &mut Tokens<'_>) -> Self {
        let name = tokens.string_or("");
        let equation = tokens.string_or("0");
        let initial = tokens.f64_or("initial value", 0.0);
        let params = read_params(tokens);
        Self::new(core, name, &equation, initial, params)
    }

    pub fn equation(&self) -> &str {
        self.formula.expr.source()
    }

    pub fn last_output(&self) -> f64 {
        self.last_output
    }
}

impl CircuitElement for Ode {
    fn core(&self) -> &ElementCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ElementCore {
        &mut self.core
    }

    fn dump_type(&self) -> &'static str {
        "261"
    }

    fn kind(&self) -> &'static str {
        "ODE"
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
        if ctx.time_step_count() == 0 {
            self.last_output = self.initial;
            self.formula.state.last_output = self.initial;
        }
        let rate = {
            let vars = ctx.variables();
            self.formula.eval(&vars, t, dt)
        };
        let value = self.last_output + dt * rate;
        let out = self.core.volt(0);
        self.output
            .drive(ctx, self.core.source(0), out, value, Tolerance::Scheduled);
        if !self.name.is_empty() {
            ctx.set_computed_value(&self.name, value);
        }
    }

    fn step_finished(&mut self, ctx: &mut FinishContext<'_>) {
        self.last_output = self.output.last_target;
        self.formula.commit(self.last_output, ctx.time_step());
    }

    fn reset(&mut self) {
        self.core.reset_state();
        self.formula.reset();
        self.last_output = self.initial;
        self.output = DrivenOutput::default();
    }

    fn info(&self) -> Vec<String> {
        let mut info = vec![
            "ODE".to_string(),
            format!("d{}/dt = {}", self.name, self.equation()),
            format!("{} = {}", self.name, number_text(self.core.volt(0))),
        ];
        self.formula.diagnostics(&mut info);
        info
    }

    fn dump_fields(&self) -> Vec<String> {
        let mut fields = vec![
            escape(&self.name),
            escape(self.equation()),
            self.initial.to_string(),
        ];
        dump_params(&self.params, &mut fields);
        fields
    }
}
