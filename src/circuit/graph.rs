//! Circuit element list and topology analysis.
//!
//! Topology is coordinate based: posts at the same point share a node, wires
//! and labeled nodes merge points, and ground is node 0. Analysis runs again
//! after every edit, renumbering nodes and voltage-source slots from scratch.

use std::collections::{HashMap, VecDeque};

use tracing::{debug, warn};

use super::types::{ElementId, NodeId, Point, VoltageSourceId};
use crate::elements::{CircuitElement, Connectivity, Element, StockColumn, StockLink};
use crate::error::{Result, SimError};
use crate::registry::{ComputedValues, LabeledNodes, StockRegistry, StockSite};

/// The element list of a circuit.
#[derive(Debug, Clone, Default)]
pub struct Circuit {
    elements: Vec<Element>,
    next_id: usize,
    need_analyze: bool,
}

impl Circuit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an element and return its id.
    pub fn add(&mut self, element: impl Into<Element>) -> ElementId {
        let mut element = element.into();
        let id = ElementId(self.next_id);
        self.next_id += 1;
        element.core_mut().id = id;
        self.elements.push(element);
        self.need_analyze = true;
        id
    }

    /// Remove an element, returning it.
    pub fn remove(&mut self, id: ElementId) -> Result<Element> {
        let index = self.index_of(id).ok_or(SimError::ElementNotFound { id })?;
        self.need_analyze = true;
        Ok(self.elements.remove(index))
    }

    /// Change an element in place. The next step re-analyzes the circuit.
    pub fn edit<F>(&mut self, id: ElementId, f: F) -> Result<()>
    where
        F: FnOnce(&mut Element),
    {
        let index = self.index_of(id).ok_or(SimError::ElementNotFound { id })?;
        f(&mut self.elements[index]);
        // Edits may not reassign ids
        self.elements[index].core_mut().id = id;
        self.need_analyze = true;
        Ok(())
    }

    pub fn get(&self, id: ElementId) -> Option<&Element> {
        self.elements.iter().find(|e| e.core().id == id)
    }

    fn index_of(&self, id: ElementId) -> Option<usize> {
        self.elements.iter().position(|e| e.core().id == id)
    }

    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    /// Mutable access for the simulator. Does not mark the circuit dirty.
    pub(crate) fn elements_mut(&mut self) -> &mut [Element] {
        &mut self.elements
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn clear(&mut self) {
        self.elements.clear();
        self.need_analyze = true;
    }

    /// Whether topology changed since the last analysis.
    pub fn need_analyze(&self) -> bool {
        self.need_analyze
    }

    pub fn mark_dirty(&mut self) {
        self.need_analyze = true;
    }

    /// Number nodes and voltage-source slots, register labels, link shared
    /// stocks and claim computed-value keys.
    pub fn analyze(&mut self, labels: &mut LabeledNodes, computed: &mut ComputedValues) -> Topology {
        let mut points = PointSets::default();
        labels.reset_node_list();

        // Merge points joined by wires and labels
        for element in &self.elements {
            let posts = element.posts();
            for &p in &posts {
                points.insert(p);
            }
            match element.behavior().connectivity() {
                Connectivity::Wire if posts.len() == 2 => points.union(posts[0], posts[1]),
                Connectivity::Label(text) => {
                    if let Some(&p) = posts.first() {
                        if let Some(first) = labels.get_connected_post(text, p) {
                            points.union(p, first);
                        }
                    }
                }
                _ => {}
            }
        }

        let ground_point = self.ground_point();
        if let Some(g) = ground_point {
            for element in &self.elements {
                if element.behavior().connectivity() == Connectivity::Ground {
                    if let Some(&p) = element.posts().first() {
                        points.union(p, g);
                    }
                }
            }
        }

        // Numbering: the ground set first, then element posts, then points
        // only reachable through wires and labels
        let mut node_of_set: HashMap<usize, NodeId> = HashMap::new();
        let mut node_points = vec![ground_point.unwrap_or_default()];
        if let Some(g) = ground_point {
            node_of_set.insert(points.find_point(g), NodeId::GROUND);
        }
        let ordered = self
            .elements
            .iter()
            .filter(|e| !e.is_wire_like())
            .chain(self.elements.iter().filter(|e| e.is_wire_like()));
        for element in ordered {
            for p in element.posts() {
                let set = points.find_point(p);
                node_of_set.entry(set).or_insert_with(|| {
                    node_points.push(p);
                    NodeId(node_points.len() - 1)
                });
            }
        }
        let num_nodes = node_points.len();

        let mut num_voltage_sources = 0;
        for element in &mut self.elements {
            let posts = element.posts();
            let sources = element.behavior().voltage_source_count();
            let core = element.core_mut();
            core.allocate(posts.len(), sources);
            for (i, p) in posts.iter().enumerate() {
                core.nodes[i] = node_of_set[&points.find_point(*p)];
            }
            for slot in core.voltage_sources.iter_mut() {
                *slot = VoltageSourceId(num_voltage_sources);
                num_voltage_sources += 1;
            }
        }

        for element in &self.elements {
            if let Connectivity::Label(text) = element.behavior().connectivity() {
                labels.set_node(text, element.core().node(0));
            }
        }

        let mut warnings = Vec::new();
        let unconnected = self.unconnected_nodes(num_nodes);
        for &node in &unconnected {
            let p = node_points[node.0];
            warn!(node = %node, point = %p, "node has no path to ground");
            warnings.push(format!("node {} at {} has no path to ground", node, p));
        }

        let stocks = self.link_shared_stocks();

        computed.clear_masters();
        for element in &self.elements {
            let id = element.core().id;
            for key in element.behavior().claimed_keys() {
                if let Err(e) = computed.claim_master(key, id) {
                    warnings.push(e.to_string());
                }
            }
        }

        self.need_analyze = false;
        debug!(
            nodes = num_nodes,
            voltage_sources = num_voltage_sources,
            labels = labels.len(),
            "analyzed circuit"
        );

        Topology {
            num_nodes,
            num_voltage_sources,
            ground_point,
            node_points,
            unconnected,
            warnings,
            stocks,
        }
    }

    /// Register every stock column, then give each shared stock's first
    /// column the other columns' flows and make the rest follow it.
    fn link_shared_stocks(&mut self) -> StockRegistry {
        let mut stocks = StockRegistry::new();
        for element in &self.elements {
            if let Element::StockTable(table) = element {
                for (i, col) in table.columns.iter().enumerate() {
                    stocks.register(&col.stock, table.core().id, i);
                }
            }
        }

        let mut links: Vec<(StockSite, StockLink)> = Vec::new();
        for name in stocks.shared_stocks() {
            let Some((lead, rest)) = stocks.sites(name).split_first() else {
                continue;
            };
            let initial = self.stock_column(*lead).map(|(_, col)| col.initial).unwrap_or(0.0);
            let flows = rest
                .iter()
                .filter_map(|&site| self.stock_column(site))
                .map(|(gain, col)| (col.flow().to_string(), gain))
                .collect();
            links.push((*lead, StockLink::Lead(flows)));
            links.extend(rest.iter().map(|&site| (site, StockLink::Follow(initial))));
            debug!(stock = name, columns = rest.len() + 1, "shared stock");
        }

        for element in &mut self.elements {
            if let Element::StockTable(table) = element {
                table.unlink_stocks();
            }
        }
        for (site, link) in links {
            if let Some(Element::StockTable(table)) = self.elements.iter_mut().find(|e| e.core().id == site.table) {
                table.link_stock(site.column, link);
            }
        }
        stocks
    }

    /// Gain and column at `site`.
    fn stock_column(&self, site: StockSite) -> Option<(f64, &StockColumn)> {
        match self.get(site.table)? {
            Element::StockTable(table) => Some((table.gain, table.columns.get(site.column)?)),
            _ => None,
        }
    }

    /// The ground element's point, else the first voltage source's negative
    /// post, else the first post of any element.
    fn ground_point(&self) -> Option<Point> {
        let first_ground = self
            .elements
            .iter()
            .find(|e| e.behavior().connectivity() == Connectivity::Ground);
        if let Some(p) = first_ground.and_then(|e| e.posts().first().copied()) {
            return Some(p);
        }
        let first_source = self.elements.iter().find(|e| match e {
            Element::VoltageSource(v) => !v.is_rail(),
            _ => false,
        });
        if let Some(p) = first_source.and_then(|e| e.posts().first().copied()) {
            return Some(p);
        }
        self.elements.iter().find_map(|e| e.posts().first().copied())
    }

    /// Nodes with no conductive path to ground through element posts.
    fn unconnected_nodes(&self, num_nodes: usize) -> Vec<NodeId> {
        let mut adjacent: Vec<Vec<usize>> = vec![Vec::new(); num_nodes];
        let mut reached = vec![false; num_nodes];
        let mut queue = VecDeque::new();
        if num_nodes > 0 {
            reached[0] = true;
            queue.push_back(0);
        }

        for element in self.elements.iter().filter(|e| !e.is_wire_like()) {
            let e = element.behavior();
            let nodes = &e.core().nodes;
            for a in 0..nodes.len() {
                if e.has_ground_connection(a) && !reached[nodes[a].0] {
                    reached[nodes[a].0] = true;
                    queue.push_back(nodes[a].0);
                }
                for b in (a + 1)..nodes.len() {
                    if e.connects(a, b) {
                        adjacent[nodes[a].0].push(nodes[b].0);
                        adjacent[nodes[b].0].push(nodes[a].0);
                    }
                }
            }
        }

        while let Some(n) = queue.pop_front() {
            for &m in &adjacent[n] {
                if !reached[m] {
                    reached[m] = true;
                    queue.push_back(m);
                }
            }
        }

        (1..num_nodes)
            .filter(|&n| !reached[n])
            .map(NodeId)
            .collect()
    }
}

/// Result of a topology analysis.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    /// Node count including ground
    pub num_nodes: usize,
    pub num_voltage_sources: usize,
    pub ground_point: Option<Point>,
    /// Representative point of each node
    pub node_points: Vec<Point>,
    /// Nodes that need a resistor to ground to keep the matrix solvable
    pub unconnected: Vec<NodeId>,
    pub warnings: Vec<String>,
    /// Stock columns by stock name
    pub stocks: StockRegistry,
}

impl Topology {
    /// Node at `point`, if any post sits there.
    pub fn node_at(&self, point: Point) -> Option<NodeId> {
        self.node_points.iter().position(|&p| p == point).map(NodeId)
    }
}

/// Union-find over grid points.
#[derive(Debug, Default)]
struct PointSets {
    index: HashMap<Point, usize>,
    parent: Vec<usize>,
}

impl PointSets {
    fn insert(&mut self, p: Point) -> usize {
        if let Some(&i) = self.index.get(&p) {
            return i;
        }
        let i = self.parent.len();
        self.parent.push(i);
        self.index.insert(p, i);
        i
    }

    fn find(&mut self, mut i: usize) -> usize {
        while self.parent[i] != i {
            self.parent[i] = self.parent[self.parent[i]];
            i = self.parent[i];
        }
        i
    }

    fn find_point(&mut self, p: Point) -> usize {
        let i = self.insert(p);
        self.find(i)
    }

    fn union(&mut self, a: Point, b: Point) {
        let (ra, rb) = (self.find_point(a), self.find_point(b));
        if ra != rb {
            // Keep the older set as root so numbering follows insertion order
            let (root, child) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[child] = root;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elements::{Adder, ElementCore, Ground, LabeledNode, Resistor, VoltageSource, Wire};

    fn analyze(circuit: &mut Circuit) -> (Topology, LabeledNodes, ComputedValues) {
        let mut labels = LabeledNodes::new();
        let mut computed = ComputedValues::new();
        let topo = circuit.analyze(&mut labels, &mut computed);
        (topo, labels, computed)
    }

    #[test]
    fn test_divider_numbering() {
        let mut c = Circuit::new();
        let v = c.add(VoltageSource::between(Point::new(0, 64), Point::new(0, 0), 10.0));
        c.add(Resistor::between(Point::new(0, 0), Point::new(64, 0), 1000.0));
        c.add(Resistor::between(Point::new(64, 0), Point::new(64, 64), 1000.0));
        c.add(Wire::between(Point::new(64, 64), Point::new(0, 64)));
        c.add(Ground::at(Point::new(0, 64)));

        let (topo, _, _) = analyze(&mut c);
        assert_eq!(topo.num_nodes, 3);
        assert_eq!(topo.num_voltage_sources, 1);
        assert!(topo.unconnected.is_empty());
        let source = c.get(v).unwrap();
        assert_eq!(source.core().nodes, vec![NodeId::GROUND, NodeId(1)]);
        assert!(!c.need_analyze());
    }

    #[test]
    fn test_labels_merge_nodes() {
        let mut c = Circuit::new();
        c.add(Ground::at(Point::new(0, 0)));
        c.add(VoltageSource::rail(Point::new(100, 0), 5.0));
        c.add(LabeledNode::at(Point::new(100, 0), "vin"));
        c.add(Resistor::between(Point::new(200, 0), Point::new(0, 0), 10.0));
        c.add(LabeledNode::at(Point::new(200, 0), "vin"));

        let (topo, labels, _) = analyze(&mut c);
        assert_eq!(topo.num_nodes, 2);
        assert_eq!(labels.get_by_name("vin"), Some(NodeId(1)));
        assert_eq!(topo.node_at(Point::new(200, 0)), None);
    }

    #[test]
    fn test_floating_chip_input_is_unconnected() {
        let mut c = Circuit::new();
        c.add(Ground::at(Point::new(0, 200)));
        c.add(Adder::new(ElementCore::new(0, 0, 64, 0, 0), 2));

        let (topo, _, _) = analyze(&mut c);
        // Two inputs float; the output is driven to ground
        assert_eq!(topo.num_nodes, 4);
        assert_eq!(topo.unconnected, vec![NodeId(1), NodeId(2)]);
        assert_eq!(topo.warnings.len(), 2);
    }

    #[test]
    fn test_remove_and_edit_mark_dirty() {
        let mut c = Circuit::new();
        let a = c.add(Resistor::between(Point::new(0, 0), Point::new(0, 16), 1.0));
        analyze(&mut c);
        c.edit(a, |e| {
            if let Element::Resistor(r) = e {
                r.resistance = 2.0;
            }
        })
        .unwrap();
        assert!(c.need_analyze());
        assert!(c.remove(a).is_ok());
        assert!(matches!(c.remove(a), Err(SimError::ElementNotFound { .. })));
    }
}
