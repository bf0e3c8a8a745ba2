//! Arithmetic chips.
//!
//! Each chip has high-impedance inputs and an output driven by a voltage
//! source to ground. Sums and constant gains are linear and stamped once;
//! products and quotients are recomputed every sub-iteration.

use crate::circuit::{NodeId, Tokens};
use crate::solver::{StampSession, StepContext, Tolerance};

use super::core::{number_text, voltage_text, DrivenOutput, ElementCore};
use super::CircuitElement;

/// Constant gains and divisors closer to zero than this are clamped.
pub const MIN_COEFFICIENT: f64 = 1e-9;

/// Percent denominators closer to zero than this give 0.
pub const MIN_DENOMINATOR: f64 = 1e-6;

/// Largest slope stamped when linearizing a quotient.
const MAX_DERIVATIVE: f64 = 1e6;

/// Most inputs a chip can have.
pub const MAX_INPUTS: usize = 16;

const PRODUCT_TOLERANCE: Tolerance = Tolerance::fixed(0.001, 1e-9);
const PERCENT_TOLERANCE: Tolerance = Tolerance::fixed(0.01, 1e-9);

/// `(value, clamped)` with `|value| >= MIN_COEFFICIENT`, keeping the sign.
fn clamp_coefficient(value: f64) -> (f64, bool) {
    if value.abs() < MIN_COEFFICIENT {
        let sign = if value < 0.0 { -1.0 } else { 1.0 };
        (sign * MIN_COEFFICIENT, true)
    } else {
        (value, false)
    }
}

fn read_inputs(tokens: &mut Tokens<'_>, default: usize) -> usize {
    let inputs = tokens.count_or("input count", default, MAX_INPUTS);
    if inputs == 0 {
        tracing::warn!(line = tokens.line(), "chip needs at least one input");
        return 1;
    }
    inputs
}

/// Stamp `out = sum(gains[i] * in[i])`.
fn stamp_weighted_sum(core: &ElementCore, session: &mut StampSession<'_>, gains: &[f64]) {
    let vs = core.source(0);
    session.stamp_voltage_source(core.node(gains.len()), NodeId::GROUND, vs, 0.0);
    for (i, &gain) in gains.iter().enumerate() {
        session.stamp_vcvs(core.node(i), NodeId::GROUND, gain, vs);
    }
}

fn output_info(name: &str, core: &ElementCore, inputs: usize) -> Vec<String> {
    let mut info = vec![name.to_string()];
    for i in 0..inputs {
        info.push(format!("in{} = {}", i + 1, voltage_text(core.volt(i))));
    }
    info.push(format!("Vout = {}", voltage_text(core.volt(inputs))));
    info
}

/// Sums its inputs.
#[derive(Debug, Clone)]
pub struct Adder {
    core: ElementCore,
    pub inputs: usize,
}

impl Adder {
    pub fn new(core: ElementCore, inputs: usize) -> Self {
        Self { core, inputs }
    }

    pub fn from_tokens(core: ElementCore, tokens: &mut Tokens<'_>) -> Self {
        let inputs = read_inputs(tokens, 2);
        Self::new(core, inputs)
    }
}

impl CircuitElement for Adder {
    fn core(&self) -> &ElementCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ElementCore {
        &mut self.core
    }

    fn dump_type(&self) -> &'static str {
        "251"
    }

    fn kind(&self) -> &'static str {
        "adder"
    }

    chip_pins!();

    fn stamp(&mut self, session: &mut StampSession<'_>) {
        stamp_weighted_sum(&self.core, session, &vec![1.0; self.inputs]);
    }

    fn info(&self) -> Vec<String> {
        output_info("adder", &self.core, self.inputs)
    }

    fn dump_fields(&self) -> Vec<String> {
        vec![self.inputs.to_string()]
    }
}

/// First input minus the others.
#[derive(Debug, Clone)]
pub struct Subtracter {
    core: ElementCore,
    pub inputs: usize,
}

impl Subtracter {
    pub fn new(core: ElementCore, inputs: usize) -> Self {
        Self { core, inputs }
    }

    pub fn from_tokens(core: ElementCore, tokens: &mut Tokens<'_>) -> Self {
        let inputs = read_inputs(tokens, 2);
        Self::new(core, inputs)
    }
}

impl CircuitElement for Subtracter {
    fn core(&self) -> &ElementCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ElementCore {
        &mut self.core
    }

    fn dump_type(&self) -> &'static str {
        "252"
    }

    fn kind(&self) -> &'static str {
        "subtracter"
    }

    chip_pins!();

    fn stamp(&mut self, session: &mut StampSession<'_>) {
        let gains: Vec<f64> = (0..self.inputs).map(|i| if i == 0 { 1.0 } else { -1.0 }).collect();
        stamp_weighted_sum(&self.core, session, &gains);
    }

    fn info(&self) -> Vec<String> {
        output_info("subtracter", &self.core, self.inputs)
    }

    fn dump_fields(&self) -> Vec<String> {
        vec![self.inputs.to_string()]
    }
}

/// Product of its inputs.
#[derive(Debug, Clone)]
pub struct Multiply {
    core: ElementCore,
    pub inputs: usize,
    output: DrivenOutput,
}

impl Multiply {
    pub fn new(core: ElementCore, inputs: usize) -> Self {
        Self {
            core,
            inputs,
            output: DrivenOutput::default(),
        }
    }

    pub fn from_tokens(core: ElementCore, tokens: &mut Tokens<'_>) -> Self {
        let inputs = read_inputs(tokens, 2);
        Self::new(core, inputs)
    }
}

impl CircuitElement for Multiply {
    fn core(&self) -> &ElementCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ElementCore {
        &mut self.core
    }

    fn dump_type(&self) -> &'static str {
        "250"
    }

    fn kind(&self) -> &'static str {
        "multiply"
    }

    chip_pins!();

    fn non_linear(&self) -> bool {
        true
    }

    fn stamp(&mut self, session: &mut StampSession<'_>) {
        DrivenOutput::stamp(session, self.core.node(self.inputs), self.core.source(0));
    }

    fn do_step(&mut self, ctx: &mut StepContext<'_>) {
        let product: f64 = (0..self.inputs).map(|i| self.core.volt(i)).product();
        let out = self.core.volt(self.inputs);
        self.output
            .drive(ctx, self.core.source(0), out, product, PRODUCT_TOLERANCE);
    }

    fn reset(&mut self) {
        self.core.reset_state();
        self.output = DrivenOutput::default();
    }

    fn info(&self) -> Vec<String> {
        output_info("multiply", &self.core, self.inputs)
    }

    fn dump_fields(&self) -> Vec<String> {
        vec![self.inputs.to_string()]
    }
}

/// First input divided by the others. A zero divisor counts as 1e-9.
#[derive(Debug, Clone)]
pub struct Divider {
    core: ElementCore,
    pub inputs: usize,
    output: DrivenOutput,
}

impl Divider {
    pub fn new(core: ElementCore, inputs: usize) -> Self {
        Self {
            core,
            inputs,
            output: DrivenOutput::default(),
        }
    }

    pub fn from_tokens(core: ElementCore, tokens: &mut Tokens<'_>) -> Self {
        let inputs = read_inputs(tokens, 2);
        Self::new(core, inputs)
    }

    fn quotient(&self) -> f64 {
        (1..self.inputs).fold(self.core.volt(0), |acc, i| {
            let d = self.core.volt(i);
            acc / if d != 0.0 { d } else { MIN_COEFFICIENT }
        })
    }
}

impl CircuitElement for Divider {
    fn core(&self) -> &ElementCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ElementCore {
        &mut self.core
    }

    fn dump_type(&self) -> &'static str {
        "257"
    }

    fn kind(&self) -> &'static str {
        "divider"
    }

    chip_pins!();

    fn non_linear(&self) -> bool {
        true
    }

    fn stamp(&mut self, session: &mut StampSession<'_>) {
        DrivenOutput::stamp(session, self.core.node(self.inputs), self.core.source(0));
    }

    fn do_step(&mut self, ctx: &mut StepContext<'_>) {
        let quotient = self.quotient();
        let out = self.core.volt(self.inputs);
        self.output
            .drive(ctx, self.core.source(0), out, quotient, PRODUCT_TOLERANCE);
    }

    fn reset(&mut self) {
        self.core.reset_state();
        self.output = DrivenOutput::default();
    }

    fn info(&self) -> Vec<String> {
        let mut info = output_info("divider", &self.core, self.inputs);
        if (1..self.inputs).any(|i| self.core.volt(i) == 0.0) {
            info.push(format!("divisor clamped to {}", MIN_COEFFICIENT));
        }
        info
    }

    fn dump_fields(&self) -> Vec<String> {
        vec![self.inputs.to_string()]
    }
}

/// Multiplies its input by a constant gain.
#[derive(Debug, Clone)]
pub struct MultiplyConst {
    core: ElementCore,
    pub gain: f64,
    pub name: String,
}

impl MultiplyConst {
    pub fn new(core: ElementCore, gain: f64) -> Self {
        Self {
            core,
            gain,
            name: String::new(),
        }
    }

    pub fn from_tokens(core: ElementCore, tokens: &mut Tokens<'_>) -> Self {
        let gain = tokens.f64_or("gain", 1.0);
        let name = tokens.string_or("");
        Self { core, gain, name }
    }

    /// Gain actually stamped.
    pub fn effective_gain(&self) -> f64 {
        clamp_coefficient(self.gain).0
    }
}

impl CircuitElement for MultiplyConst {
    fn core(&self) -> &ElementCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ElementCore {
        &mut self.core
    }

    fn dump_type(&self) -> &'static str {
        "258"
    }

    fn kind(&self) -> &'static str {
        "multiply by constant"
    }

    fn post_count(&self) -> usize {
        2
    }

    fn post(&self, n: usize) -> crate::circuit::Point {
        self.core.chip_post(1, n)
    }

    fn voltage_source_count(&self) -> usize {
        1
    }

    fn connects(&self, _a: usize, _b: usize) -> bool {
        false
    }

    fn has_ground_connection(&self, n: usize) -> bool {
        n == 1
    }

    fn stamp(&mut self, session: &mut StampSession<'_>) {
        let (gain, clamped) = clamp_coefficient(self.gain);
        if clamped {
            tracing::warn!(element = %self.core.id, gain = self.gain, "gain clamped to {}", MIN_COEFFICIENT);
        }
        stamp_weighted_sum(&self.core, session, &[gain]);
    }

    fn info(&self) -> Vec<String> {
        let (gain, clamped) = clamp_coefficient(self.gain);
        let mut info = output_info("multiply by constant", &self.core, 1);
        if !self.name.is_empty() {
            info.insert(1, self.name.clone());
        }
        info.push(format!("gain = {}", number_text(gain)));
        if clamped {
            info.push(format!("gain clamped to {}", MIN_COEFFICIENT));
        }
        info
    }

    fn dump_fields(&self) -> Vec<String> {
        vec![self.gain.to_string(), crate::circuit::escape(&self.name)]
    }
}

/// Divides its input by a constant.
#[derive(Debug, Clone)]
pub struct DivideConst {
    core: ElementCore,
    pub divisor: f64,
    pub name: String,
}

impl DivideConst {
    pub fn new(core: ElementCore, divisor: f64) -> Self {
        Self {
            core,
            divisor,
            name: String::new(),
        }
    }

    pub fn from_tokens(core: ElementCore, tokens: &mut Tokens<'_>) -> Self {
        let divisor = tokens.f64_or("divisor", 1.0);
        let name = tokens.string_or("");
        Self { core, divisor, name }
    }

    /// Divisor actually used.
    pub fn effective_divisor(&self) -> f64 {
        clamp_coefficient(self.divisor).0
    }
}

impl CircuitElement for DivideConst {
    fn core(&self) -> &ElementCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ElementCore {
        &mut self.core
    }

    fn dump_type(&self) -> &'static str {
        "264"
    }

    fn kind(&self) -> &'static str {
        "divide by constant"
    }

    fn post_count(&self) -> usize {
        2
    }

    fn post(&self, n: usize) -> crate::circuit::Point {
        self.core.chip_post(1, n)
    }

    fn voltage_source_count(&self) -> usize {
        1
    }

    fn connects(&self, _a: usize, _b: usize) -> bool {
        false
    }

    fn has_ground_connection(&self, n: usize) -> bool {
        n == 1
    }

    fn stamp(&mut self, session: &mut StampSession<'_>) {
        let (divisor, clamped) = clamp_coefficient(self.divisor);
        if clamped {
            tracing::warn!(element = %self.core.id, divisor = self.divisor, "divisor clamped to {}", MIN_COEFFICIENT);
        }
        stamp_weighted_sum(&self.core, session, &[1.0 / divisor]);
    }

    fn info(&self) -> Vec<String> {
        let (divisor, clamped) = clamp_coefficient(self.divisor);
        let mut info = output_info("divide by constant", &self.core, 1);
        if !self.name.is_empty() {
            info.insert(1, self.name.clone());
        }
        info.push(format!("divisor = {}", number_text(divisor)));
        if clamped {
            info.push(format!("divisor clamped to {}", MIN_COEFFICIENT));
        }
        info
    }

    fn dump_fields(&self) -> Vec<String> {
        vec![self.divisor.to_string(), crate::circuit::escape(&self.name)]
    }
}

/// `100 * a / b / ...`, linearized around the present operating point every
/// sub-iteration so chains of percentages converge quickly.
#[derive(Debug, Clone)]
pub struct Percent {
    core: ElementCore,
    pub inputs: usize,
    last_volts: Vec<f64>,
    divided_by_zero: bool,
}

impl Percent {
    pub fn new(core: ElementCore, inputs: usize) -> Self {
        Self {
            core,
            inputs,
            last_volts: vec![0.0; inputs],
            divided_by_zero: false,
        }
    }

    pub fn from_tokens(core: ElementCore, tokens: &mut Tokens<'_>) -> Self {
        let inputs = read_inputs(tokens, 2);
        Self::new(core, inputs)
    }
}

/// `100 * v[0] / v[1] / ...` with tiny denominators pushed out to
/// `MIN_DENOMINATOR`.
fn percent_of(volts: &[f64]) -> f64 {
    let quotient = volts.iter().skip(1).fold(volts.first().copied().unwrap_or(0.0), |acc, &d| {
        let d = if d.abs() < MIN_DENOMINATOR {
            if d > 0.0 {
                MIN_DENOMINATOR
            } else {
                -MIN_DENOMINATOR
            }
        } else {
            d
        };
        acc / d
    });
    quotient * 100.0
}

fn clamp_derivative(dx: f64) -> f64 {
    let sign = if dx > 0.0 { 1.0 } else { -1.0 };
    if dx.abs() < 1e-6 {
        sign * 1e-6
    } else if dx.abs() > MAX_DERIVATIVE {
        sign * MAX_DERIVATIVE
    } else {
        dx
    }
}

impl CircuitElement for Percent {
    fn core(&self) -> &ElementCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ElementCore {
        &mut self.core
    }

    fn dump_type(&self) -> &'static str {
        "P"
    }

    fn kind(&self) -> &'static str {
        "percent"
    }

    chip_pins!();

    fn non_linear(&self) -> bool {
        true
    }

    fn stamp(&mut self, session: &mut StampSession<'_>) {
        DrivenOutput::stamp(session, self.core.node(self.inputs), self.core.source(0));
    }

    fn do_step(&mut self, ctx: &mut StepContext<'_>) {
        let vs = self.core.source(0);
        let volts: Vec<f64> = (0..self.inputs).map(|i| self.core.volt(i)).collect();

        self.divided_by_zero = volts.iter().skip(1).any(|v| v.abs() < MIN_DENOMINATOR);
        if self.divided_by_zero {
            ctx.stamp_right_side(vs, 0.0);
            return;
        }

        let v0 = percent_of(&volts);
        ctx.check_convergence(v0, self.core.volt(self.inputs), PERCENT_TOLERANCE);

        // Out - sum(dOut/dIn_i * In_i) = v0 - sum(dOut/dIn_i * volts_i)
        let mut rs = v0;
        self.last_volts.resize(self.inputs, 0.0);
        for i in 0..self.inputs {
            let mut dv = volts[i] - self.last_volts[i];
            if dv.abs() < 1e-6 {
                dv = 1e-6;
            }
            let mut shifted = volts.clone();
            shifted[i] -= dv;
            let dx = clamp_derivative((v0 - percent_of(&shifted)) / dv);
            ctx.stamp_matrix(vs, self.core.node(i), -dx);
            rs -= dx * volts[i];
        }
        ctx.stamp_right_side(vs, rs);
        self.last_volts.copy_from_slice(&volts);
    }

    fn reset(&mut self) {
        self.core.reset_state();
        self.last_volts = vec![0.0; self.inputs];
        self.divided_by_zero = false;
    }

    fn info(&self) -> Vec<String> {
        let mut info = output_info("percent", &self.core, self.inputs);
        if self.divided_by_zero {
            info.push("denominator near zero, output 0".to_string());
        }
        info
    }

    fn dump_fields(&self) -> Vec<String> {
        vec![self.inputs.to_string()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_clamp_coefficient_keeps_sign() {
        assert_eq!(clamp_coefficient(0.0), (1e-9, true));
        assert_eq!(clamp_coefficient(-1e-12), (-1e-9, true));
        assert_eq!(clamp_coefficient(2.0), (2.0, false));
    }

    #[test]
    fn test_percent_of() {
        assert_relative_eq!(percent_of(&[25.0, 50.0]), 50.0);
        assert_relative_eq!(percent_of(&[1.0, 0.0]), 1e8);
        assert_relative_eq!(percent_of(&[3.0]), 300.0);
    }

    #[test]
    fn test_derivative_bounds() {
        assert_eq!(clamp_derivative(0.0), -1e-6);
        assert_eq!(clamp_derivative(5e7), 1e6);
        assert_eq!(clamp_derivative(-3.0), -3.0);
    }

    #[test]
    fn test_divide_const_info_reports_clamp() {
        let d = DivideConst::new(ElementCore::new(0, 0, 64, 0, 0), 0.0);
        assert_relative_eq!(d.effective_divisor(), 1e-9);
        assert!(d.info().iter().any(|l| l.contains("clamped to 1e-9")));
    }
}
