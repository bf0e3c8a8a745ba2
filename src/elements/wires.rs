//! Wires, ground and labeled nodes.

use crate::circuit::{escape, Point, Tokens};

use super::core::{voltage_text, ElementCore};
use super::{CircuitElement, Connectivity};

/// Joins its two posts into one node.
#[derive(Debug, Clone)]
pub struct Wire {
    core: ElementCore,
}

impl Wire {
    pub fn new(core: ElementCore) -> Self {
        Self { core }
    }

    pub fn between(a: Point, b: Point) -> Self {
        Self::new(ElementCore::between(a, b))
    }
}

impl CircuitElement for Wire {
    fn core(&self) -> &ElementCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ElementCore {
        &mut self.core
    }

    fn dump_type(&self) -> &'static str {
        "w"
    }

    fn kind(&self) -> &'static str {
        "wire"
    }

    fn connectivity(&self) -> Connectivity<'_> {
        Connectivity::Wire
    }

    fn info(&self) -> Vec<String> {
        vec!["wire".to_string(), format!("V = {}", voltage_text(self.core.volt(0)))]
    }
}

/// Ties its post to node 0.
#[derive(Debug, Clone)]
pub struct Ground {
    core: ElementCore,
}

impl Ground {
    pub fn new(core: ElementCore) -> Self {
        Self { core }
    }

    pub fn at(p: Point) -> Self {
        Self::new(ElementCore::between(p, Point::new(p.x, p.y + 16)))
    }
}

impl CircuitElement for Ground {
    fn core(&self) -> &ElementCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ElementCore {
        &mut self.core
    }

    fn dump_type(&self) -> &'static str {
        "g"
    }

    fn kind(&self) -> &'static str {
        "ground"
    }

    fn post_count(&self) -> usize {
        1
    }

    fn connectivity(&self) -> Connectivity<'_> {
        Connectivity::Ground
    }

    fn has_ground_connection(&self, _n: usize) -> bool {
        true
    }

    fn info(&self) -> Vec<String> {
        vec!["ground".to_string()]
    }
}

/// A named connection point. Every labeled node with the same text is the
/// same circuit node, and its voltage is readable by name in expressions.
#[derive(Debug, Clone)]
pub struct LabeledNode {
    core: ElementCore,
    pub text: String,
}

impl LabeledNode {
    pub fn new(core: ElementCore, text: impl Into<String>) -> Self {
        Self {
            core,
            text: text.into(),
        }
    }

    pub fn at(p: Point, text: impl Into<String>) -> Self {
        Self::new(ElementCore::between(p, Point::new(p.x + 16, p.y)), text)
    }

    pub fn from_tokens(core: ElementCore, tokens: &mut Tokens<'_>) -> Self {
        let text = tokens.string_or("label");
        Self::new(core, text)
    }
}

impl CircuitElement for LabeledNode {
    fn core(&self) -> &ElementCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ElementCore {
        &mut self.core
    }

    fn dump_type(&self) -> &'static str {
        "207"
    }

    fn kind(&self) -> &'static str {
        "labeled node"
    }

    fn post_count(&self) -> usize {
        1
    }

    fn connectivity(&self) -> Connectivity<'_> {
        Connectivity::Label(&self.text)
    }

    fn info(&self) -> Vec<String> {
        vec![
            self.text.clone(),
            format!("V = {}", voltage_text(self.core.volt(0))),
            format!("node {}", self.core.node(0)),
        ]
    }

    fn dump_fields(&self) -> Vec<String> {
        vec![escape(&self.text)]
    }
}
