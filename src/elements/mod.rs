//! Circuit elements.
//!
//! Every element implements [`CircuitElement`]: it declares its posts and
//! voltage-source slots, stamps its linear part once per topology, writes
//! its nonlinear right-hand side every sub-iteration and commits history
//! once per timestep. [`Element`] is the closed set of element kinds the
//! circuit stores and the file format knows.
//!
//! - Wiring: Wire, Ground, Labeled node
//! - Sources: Resistor, Voltage source, Rail, Current source, Computed source
//! - Math: Adder, Subtracter, Multiply, Divider, Multiply/Divide by constant, Percent
//! - Calculus: Integrator, Differentiator, ODE
//! - Equations: Equation, Equation table, Stock table
//! - Control: Stop time

/// Pin layout shared by chips: `self.inputs` high-impedance inputs and
/// one output driven by voltage-source slot 0.
macro_rules! chip_pins {
    () => {
        fn post_count(&self) -> usize {
            self.inputs + 1
        }

        fn post(&self, n: usize) -> $crate::circuit::Point {
            self.core.chip_post(self.inputs, n)
        }

        fn voltage_source_count(&self) -> usize {
            1
        }

        fn connects(&self, _a: usize, _b: usize) -> bool {
            false
        }

        fn has_ground_connection(&self, n: usize) -> bool {
            n == self.inputs
        }
    };
}

mod calculus;
mod control;
mod core;
mod equation;
mod math;
mod sources;
mod tables;
mod wires;

pub use self::core::{current_text, number_text, voltage_text, DrivenOutput, ElementCore};
pub use calculus::{Differentiator, Integrator, Ode, FLAG_INITIAL_FROM_INPUT};
pub use control::StopTime;
pub use equation::{ComputedSource, Equation};
pub use math::{
    Adder, DivideConst, Divider, Multiply, MultiplyConst, Percent, Subtracter, MAX_INPUTS,
    MIN_COEFFICIENT, MIN_DENOMINATOR,
};
pub use sources::{CurrentSource, Resistor, VoltageSource, Waveform};
pub use tables::{EquationRow, EquationTable, StockColumn, StockTable};
pub(crate) use tables::StockLink;
pub use wires::{Ground, LabeledNode, Wire};

use crate::circuit::{Point, Tokens};
use crate::solver::{FinishContext, StampSession, StepContext};

/// How an element takes part in node merging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity<'a> {
    /// Posts become nodes of their own
    Normal,
    /// Both posts are the same node
    Wire,
    /// The post is node 0
    Ground,
    /// The post joins every other post carrying the same label
    Label(&'a str),
}

/// The contract every element implements.
pub trait CircuitElement {
    fn core(&self) -> &ElementCore;
    fn core_mut(&mut self) -> &mut ElementCore;

    /// Type tag written at the start of the element's file line.
    fn dump_type(&self) -> &'static str;

    /// Short name for warnings and info panels.
    fn kind(&self) -> &'static str;

    fn post_count(&self) -> usize {
        2
    }

    fn post(&self, n: usize) -> Point {
        if n == 0 {
            self.core().p1()
        } else {
            self.core().p2()
        }
    }

    fn voltage_source_count(&self) -> usize {
        0
    }

    /// Whether `do_step` must run until the circuit settles.
    fn non_linear(&self) -> bool {
        false
    }

    fn connectivity(&self) -> Connectivity<'_> {
        Connectivity::Normal
    }

    /// Whether current can flow between posts `a` and `b`.
    fn connects(&self, _a: usize, _b: usize) -> bool {
        true
    }

    /// Whether post `n` has a path to ground through the element itself.
    fn has_ground_connection(&self, _n: usize) -> bool {
        false
    }

    /// Computed-value keys this element writes as their master.
    fn claimed_keys(&self) -> Vec<&str> {
        Vec::new()
    }

    /// Linear contribution, once per topology.
    fn stamp(&mut self, _session: &mut StampSession<'_>) {}

    /// Per-sub-iteration contribution.
    fn do_step(&mut self, _ctx: &mut StepContext<'_>) {}

    /// Commit history once the timestep is accepted.
    fn step_finished(&mut self, _ctx: &mut FinishContext<'_>) {}

    /// Return to the state of a freshly loaded circuit.
    fn reset(&mut self) {
        self.core_mut().reset_state();
    }

    /// Human-readable status lines.
    fn info(&self) -> Vec<String>;

    /// Element-specific file fields, already escaped.
    fn dump_fields(&self) -> Vec<String> {
        Vec::new()
    }
}

macro_rules! element_kinds {
    ($($variant:ident($ty:ty)),* $(,)?) => {
        /// A circuit element.
        #[derive(Debug, Clone)]
        pub enum Element {
            $($variant($ty),)*
        }

        impl Element {
            pub fn behavior(&self) -> &dyn CircuitElement {
                match self {
                    $(Element::$variant(e) => e,)*
                }
            }

            pub fn behavior_mut(&mut self) -> &mut dyn CircuitElement {
                match self {
                    $(Element::$variant(e) => e,)*
                }
            }
        }

        $(
            impl From<$ty> for Element {
                fn from(e: $ty) -> Self {
                    Element::$variant(e)
                }
            }
        )*
    };
}

element_kinds! {
    Wire(Wire),
    Ground(Ground),
    LabeledNode(LabeledNode),
    Resistor(Resistor),
    VoltageSource(VoltageSource),
    CurrentSource(CurrentSource),
    ComputedSource(ComputedSource),
    Adder(Adder),
    Subtracter(Subtracter),
    Multiply(Multiply),
    Divider(Divider),
    MultiplyConst(MultiplyConst),
    DivideConst(DivideConst),
    Percent(Percent),
    Integrator(Integrator),
    Differentiator(Differentiator),
    Ode(Ode),
    Equation(Equation),
    EquationTable(EquationTable),
    StockTable(StockTable),
    StopTime(StopTime),
}

impl Element {
    /// Build an element from its file type tag and remaining fields.
    /// Returns `None` for unknown tags.
    pub fn from_dump(dump_type: &str, core: ElementCore, tokens: &mut Tokens<'_>) -> Option<Self> {
        let element: Element = match dump_type {
            "w" => Wire::new(core).into(),
            "g" => Ground::new(core).into(),
            "207" => LabeledNode::from_tokens(core, tokens).into(),
            "r" => Resistor::from_tokens(core, tokens).into(),
            "v" => VoltageSource::from_tokens(core, tokens, false).into(),
            "R" => VoltageSource::from_tokens(core, tokens, true).into(),
            "i" => CurrentSource::from_tokens(core, tokens).into(),
            "267" => ComputedSource::from_tokens(core, tokens).into(),
            "251" => Adder::from_tokens(core, tokens).into(),
            "252" => Subtracter::from_tokens(core, tokens).into(),
            "250" => Multiply::from_tokens(core, tokens).into(),
            "257" => Divider::from_tokens(core, tokens).into(),
            "258" => MultiplyConst::from_tokens(core, tokens).into(),
            "264" => DivideConst::from_tokens(core, tokens).into(),
            "P" => Percent::from_tokens(core, tokens).into(),
            "260" => Integrator::from_tokens(core, tokens).into(),
            "259" => Differentiator::new(core).into(),
            "261" => Ode::from_tokens(core, tokens).into(),
            "262" => Equation::from_tokens(core, tokens).into(),
            "266" => EquationTable::from_tokens(core, tokens).into(),
            "255" => StockTable::from_tokens(core, tokens).into(),
            "431" => StopTime::from_tokens(core, tokens).into(),
            _ => return None,
        };
        Some(element)
    }

    pub fn core(&self) -> &ElementCore {
        self.behavior().core()
    }

    pub fn core_mut(&mut self) -> &mut ElementCore {
        self.behavior_mut().core_mut()
    }

    /// Posts in order.
    pub fn posts(&self) -> Vec<Point> {
        let e = self.behavior();
        (0..e.post_count()).map(|n| e.post(n)).collect()
    }

    /// Whether the element only joins points and never becomes a node itself.
    pub fn is_wire_like(&self) -> bool {
        matches!(
            self.behavior().connectivity(),
            Connectivity::Wire | Connectivity::Label(_)
        )
    }

    /// The element's file line without the trailing newline.
    pub fn dump(&self) -> String {
        let e = self.behavior();
        let c = e.core();
        let mut line = format!(
            "{} {} {} {} {} {}",
            e.dump_type(),
            c.x1,
            c.y1,
            c.x2,
            c.y2,
            c.flags
        );
        for field in e.dump_fields() {
            line.push(' ');
            line.push_str(&field);
        }
        line
    }
}
