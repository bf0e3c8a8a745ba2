//! Labeled-node registry.
//!
//! Maps label text to the representative point of its first occurrence and,
//! after numbering, to the solved node index. Every occurrence of a label is
//! unified into one node by the topology builder using a two-phase protocol:
//! the first occurrence registers its point, later ones connect to it.

use std::cell::OnceCell;
use std::collections::HashMap;

use crate::circuit::{NodeId, Point};

/// One registered label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabelEntry {
    /// Point of the first occurrence
    pub point: Point,
    /// Node assigned during numbering
    pub node: Option<NodeId>,
}

/// Registry of labeled nodes, rebuilt on every topology analysis.
#[derive(Debug, Default)]
pub struct LabeledNodes {
    entries: HashMap<String, LabelEntry>,
    by_node: OnceCell<HashMap<NodeId, String>>,
    sorted: OnceCell<Vec<String>>,
}

impl LabeledNodes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget every label. Must run before each topology rebuild.
    pub fn reset_node_list(&mut self) {
        self.entries.clear();
        self.invalidate();
    }

    /// Register `label` at `point`, or return the point it was first seen at.
    ///
    /// Returns `None` for the first occurrence, which becomes the label's
    /// representative point.
    pub fn get_connected_post(&mut self, label: &str, point: Point) -> Option<Point> {
        if let Some(entry) = self.entries.get(label) {
            return Some(entry.point);
        }
        self.entries
            .insert(label.to_string(), LabelEntry { point, node: None });
        self.invalidate();
        None
    }

    /// Record the final node number for a label.
    pub fn set_node(&mut self, label: &str, node: NodeId) {
        match self.entries.get_mut(label) {
            Some(entry) => {
                if entry.node == Some(node) {
                    return;
                }
                entry.node = Some(node);
            }
            None => {
                // Labels numbered without a registration pass still resolve.
                self.entries.insert(
                    label.to_string(),
                    LabelEntry {
                        point: Point::default(),
                        node: Some(node),
                    },
                );
            }
        }
        self.invalidate();
    }

    /// Node index for a label.
    pub fn get_by_name(&self, label: &str) -> Option<NodeId> {
        self.entries.get(label).and_then(|e| e.node)
    }

    /// Full entry for a label.
    pub fn entry(&self, label: &str) -> Option<&LabelEntry> {
        self.entries.get(label)
    }

    /// Label attached to a node. When several labels share a node the
    /// alphabetically first one is returned.
    pub fn get_name_by_node(&self, node: NodeId) -> Option<&str> {
        self.by_node
            .get_or_init(|| {
                let mut map: HashMap<NodeId, String> = HashMap::new();
                for (name, entry) in &self.entries {
                    let Some(n) = entry.node else { continue };
                    match map.get(&n) {
                        Some(existing) if existing.as_str() <= name.as_str() => {}
                        _ => {
                            map.insert(n, name.clone());
                        }
                    }
                }
                map
            })
            .get(&node)
            .map(String::as_str)
    }

    /// All label names in sorted order.
    pub fn sorted_names(&self) -> &[String] {
        self.sorted.get_or_init(|| {
            let mut names: Vec<String> = self.entries.keys().cloned().collect();
            names.sort();
            names
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn invalidate(&mut self) {
        self.by_node.take();
        self.sorted.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_occurrence_registers() {
        let mut labels = LabeledNodes::new();
        assert_eq!(labels.get_connected_post("GND2", Point::new(0, 0)), None);
        assert_eq!(
            labels.get_connected_post("GND2", Point::new(64, 32)),
            Some(Point::new(0, 0))
        );
        assert_eq!(
            labels.get_connected_post("GND2", Point::new(128, 32)),
            Some(Point::new(0, 0))
        );
    }

    #[test]
    fn test_reverse_cache_invalidated_on_renumber() {
        let mut labels = LabeledNodes::new();
        labels.get_connected_post("vin", Point::new(0, 0));
        labels.set_node("vin", NodeId(2));
        assert_eq!(labels.get_name_by_node(NodeId(2)), Some("vin"));

        labels.set_node("vin", NodeId(5));
        assert_eq!(labels.get_name_by_node(NodeId(2)), None);
        assert_eq!(labels.get_name_by_node(NodeId(5)), Some("vin"));
        assert_eq!(labels.get_by_name("vin"), Some(NodeId(5)));
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut labels = LabeledNodes::new();
        labels.get_connected_post("b", Point::new(0, 0));
        labels.get_connected_post("a", Point::new(16, 0));
        labels.set_node("a", NodeId(1));
        assert_eq!(labels.sorted_names(), ["a".to_string(), "b".to_string()]);

        labels.reset_node_list();
        assert!(labels.is_empty());
        assert!(labels.sorted_names().is_empty());
        assert_eq!(labels.get_name_by_node(NodeId(1)), None);
        assert_eq!(labels.get_connected_post("a", Point::new(32, 0)), None);
    }

    #[test]
    fn test_shared_node_prefers_first_name() {
        let mut labels = LabeledNodes::new();
        labels.set_node("zeta", NodeId(3));
        labels.set_node("alpha", NodeId(3));
        assert_eq!(labels.get_name_by_node(NodeId(3)), Some("alpha"));
    }
}
