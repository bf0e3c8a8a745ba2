//! Resistors and independent sources.

use std::f64::consts::TAU;

use crate::circuit::{NodeId, Point, Tokens};
use crate::solver::{StampSession, StepContext};

use super::core::{current_text, number_text, voltage_text, ElementCore};
use super::CircuitElement;

/// Smallest resistance accepted, to keep the matrix finite.
const MIN_RESISTANCE: f64 = 1e-9;

/// A linear resistor.
#[derive(Debug, Clone)]
pub struct Resistor {
    core: ElementCore,
    pub resistance: f64,
}

impl Resistor {
    pub fn new(core: ElementCore, resistance: f64) -> Self {
        Self { core, resistance }
    }

    pub fn between(a: Point, b: Point, resistance: f64) -> Self {
        Self::new(ElementCore::between(a, b), resistance)
    }

    pub fn from_tokens(core: ElementCore, tokens: &mut Tokens<'_>) -> Self {
        let resistance = tokens.f64_or("resistance", 1000.0);
        Self::new(core, resistance)
    }

    fn effective_resistance(&self) -> f64 {
        if self.resistance.abs() < MIN_RESISTANCE {
            MIN_RESISTANCE
        } else {
            self.resistance
        }
    }

    /// Current from post 0 to post 1.
    pub fn current(&self) -> f64 {
        (self.core.volt(0) - self.core.volt(1)) / self.effective_resistance()
    }
}

impl CircuitElement for Resistor {
    fn core(&self) -> &ElementCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ElementCore {
        &mut self.core
    }

    fn dump_type(&self) -> &'static str {
        "r"
    }

    fn kind(&self) -> &'static str {
        "resistor"
    }

    fn stamp(&mut self, session: &mut StampSession<'_>) {
        session.stamp_resistor(self.core.node(0), self.core.node(1), self.effective_resistance());
    }

    fn info(&self) -> Vec<String> {
        vec![
            "resistor".to_string(),
            format!("R = {} ohm", number_text(self.resistance)),
            format!("I = {}", current_text(self.current())),
            format!("Vd = {}", voltage_text(self.core.volt(0) - self.core.volt(1))),
        ]
    }

    fn dump_fields(&self) -> Vec<String> {
        vec![self.resistance.to_string()]
    }
}

/// Source waveform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Waveform {
    Dc,
    Ac,
}

impl Waveform {
    fn from_code(code: usize) -> Option<Self> {
        match code {
            0 => Some(Waveform::Dc),
            1 => Some(Waveform::Ac),
            _ => None,
        }
    }

    fn code(self) -> usize {
        match self {
            Waveform::Dc => 0,
            Waveform::Ac => 1,
        }
    }
}

/// An ideal voltage source between two posts, or a rail from one post to
/// ground.
///
/// Post 0 of a two-post source is the negative terminal.
#[derive(Debug, Clone)]
pub struct VoltageSource {
    core: ElementCore,
    pub waveform: Waveform,
    pub frequency: f64,
    pub max_voltage: f64,
    pub bias: f64,
    rail: bool,
}

impl VoltageSource {
    pub fn dc(core: ElementCore, voltage: f64) -> Self {
        Self {
            core,
            waveform: Waveform::Dc,
            frequency: 40.0,
            max_voltage: voltage,
            bias: 0.0,
            rail: false,
        }
    }

    /// DC source with its negative terminal at `neg`.
    pub fn between(neg: Point, pos: Point, voltage: f64) -> Self {
        Self::dc(ElementCore::between(neg, pos), voltage)
    }

    /// DC rail at `p`.
    pub fn rail(p: Point, voltage: f64) -> Self {
        let mut source = Self::dc(ElementCore::between(p, Point::new(p.x, p.y - 16)), voltage);
        source.rail = true;
        source
    }

    pub fn from_tokens(core: ElementCore, tokens: &mut Tokens<'_>, rail: bool) -> Self {
        let code = tokens.usize_or("waveform", 0);
        let waveform = Waveform::from_code(code).unwrap_or_else(|| {
            tracing::warn!(code, line = tokens.line(), "unsupported waveform, using DC");
            Waveform::Dc
        });
        Self {
            core,
            waveform,
            frequency: tokens.f64_or("frequency", 40.0),
            max_voltage: tokens.f64_or("max voltage", 5.0),
            bias: tokens.f64_or("bias", 0.0),
            rail,
        }
    }

    pub fn is_rail(&self) -> bool {
        self.rail
    }

    /// Voltage at time `t`.
    pub fn voltage_at(&self, t: f64) -> f64 {
        match self.waveform {
            Waveform::Dc => self.max_voltage + self.bias,
            Waveform::Ac => self.bias + self.max_voltage * (TAU * self.frequency * t).sin(),
        }
    }

    fn terminals(&self) -> (NodeId, NodeId) {
        if self.rail {
            (self.core.node(0), NodeId::GROUND)
        } else {
            (self.core.node(1), self.core.node(0))
        }
    }
}

impl CircuitElement for VoltageSource {
    fn core(&self) -> &ElementCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ElementCore {
        &mut self.core
    }

    fn dump_type(&self) -> &'static str {
        if self.rail {
            "R"
        } else {
            "v"
        }
    }

    fn kind(&self) -> &'static str {
        if self.rail {
            "rail"
        } else {
            "voltage source"
        }
    }

    fn post_count(&self) -> usize {
        if self.rail {
            1
        } else {
            2
        }
    }

    fn voltage_source_count(&self) -> usize {
        1
    }

    fn has_ground_connection(&self, _n: usize) -> bool {
        self.rail
    }

    fn stamp(&mut self, session: &mut StampSession<'_>) {
        let (pos, neg) = self.terminals();
        let vs = self.core.source(0);
        match self.waveform {
            Waveform::Dc => session.stamp_voltage_source(pos, neg, vs, self.voltage_at(0.0)),
            // Time-varying value is written every step
            Waveform::Ac => session.stamp_voltage_source(pos, neg, vs, 0.0),
        }
    }

    fn do_step(&mut self, ctx: &mut StepContext<'_>) {
        if self.waveform == Waveform::Ac {
            let v = self.voltage_at(ctx.time());
            ctx.update_voltage_source(self.core.source(0), v);
        }
    }

    fn info(&self) -> Vec<String> {
        let v = match self.post_count() {
            1 => self.core.volt(0),
            _ => self.core.volt(1) - self.core.volt(0),
        };
        let mut info = vec![
            self.kind().to_string(),
            format!("V = {}", voltage_text(v)),
            format!("I = {}", current_text(self.core.current(0))),
        ];
        if self.waveform == Waveform::Ac {
            info.push(format!("f = {} Hz", number_text(self.frequency)));
        }
        info
    }

    fn dump_fields(&self) -> Vec<String> {
        vec![
            self.waveform.code().to_string(),
            self.frequency.to_string(),
            self.max_voltage.to_string(),
            self.bias.to_string(),
        ]
    }
}

/// An ideal current source pushing current from post 0 to post 1 through
/// the external circuit.
#[derive(Debug, Clone)]
pub struct CurrentSource {
    core: ElementCore,
    pub current: f64,
}

impl CurrentSource {
    pub fn new(core: ElementCore, current: f64) -> Self {
        Self { core, current }
    }

    pub fn from_tokens(core: ElementCore, tokens: &mut Tokens<'_>) -> Self {
        let current = tokens.f64_or("current", 0.01);
        Self::new(core, current)
    }
}

impl CircuitElement for CurrentSource {
    fn core(&self) -> &ElementCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ElementCore {
        &mut self.core
    }

    fn dump_type(&self) -> &'static str {
        "i"
    }

    fn kind(&self) -> &'static str {
        "current source"
    }

    fn stamp(&mut self, session: &mut StampSession<'_>) {
        session.stamp_current_source(self.core.node(0), self.core.node(1), self.current);
    }

    fn info(&self) -> Vec<String> {
        vec![
            "current source".to_string(),
            format!("I = {}", current_text(self.current)),
            format!("V = {}", voltage_text(self.core.volt(1) - self.core.volt(0))),
        ]
    }

    fn dump_fields(&self) -> Vec<String> {
        vec![self.current.to_string()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_waveforms() {
        let dc = VoltageSource::between(Point::new(0, 0), Point::new(0, 16), 5.0);
        assert_relative_eq!(dc.voltage_at(3.0), 5.0);

        let mut ac = VoltageSource::rail(Point::new(0, 0), 2.0);
        ac.waveform = Waveform::Ac;
        ac.frequency = 1.0;
        ac.bias = 1.0;
        assert_relative_eq!(ac.voltage_at(0.25), 3.0, epsilon = 1e-12);
        assert_eq!(ac.post_count(), 1);
        assert_eq!(ac.dump_type(), "R");
    }

    #[test]
    fn test_resistor_clamps_zero() {
        let r = Resistor::between(Point::new(0, 0), Point::new(0, 16), 0.0);
        assert_relative_eq!(r.effective_resistance(), MIN_RESISTANCE);
    }
}
