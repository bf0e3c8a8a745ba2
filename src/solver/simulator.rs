//! Main simulator interface.

use tracing::{debug, info, warn};

use crate::circuit::{dump, Circuit, ElementId, FileOptions, LoadedCircuit, NodeId, Topology};
use crate::elements::Element;
use crate::error::{Result, SimError};
use crate::registry::{ComputedValues, LabeledNodes};

use super::config::{AbortPolicy, SimulatorConfig};
use super::context::{FinishContext, SimClock, StampSession, StepContext};
use super::convergence::ConvergencePolicy;
use super::iteration::{IterationOutcome, SubIterationController};
use super::mna::MnaMatrix;

/// Whether the simulator is advancing and why it stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimStatus {
    /// Steps only when asked
    Paused,
    /// Advancing under [`Simulator::run_for`] or [`Simulator::run_until`]
    Running,
    /// An element asked the run to stop. Stepping by hand still works.
    Stopped { message: String },
    /// The circuit cannot be solved, or a timestep failed under
    /// [`AbortPolicy::Halt`]. Editing or resetting clears it.
    Halted { message: String },
}

/// What one committed timestep produced.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    /// Simulated time the step was solved at
    pub t: f64,
    pub iteration: IterationOutcome,
    /// Stop requested by an element during this step
    pub stop_message: Option<String>,
}

impl StepOutcome {
    pub fn converged(&self) -> bool {
        self.iteration.converged()
    }
}

/// The circuit simulator.
///
/// Owns the circuit, the MNA system and both registries, and lends them to
/// elements one call at a time.
pub struct Simulator {
    circuit: Circuit,
    config: SimulatorConfig,
    policy: ConvergencePolicy,
    clock: SimClock,
    matrix: MnaMatrix,
    controller: SubIterationController,
    computed: ComputedValues,
    labels: LabeledNodes,
    topology: Topology,
    nonlinear: bool,
    status: SimStatus,
    load_warnings: Vec<String>,
    last_step_converged: bool,
    unconverged_steps: u64,
}

impl Simulator {
    /// Create a simulator with default configuration.
    pub fn new(circuit: Circuit) -> Self {
        Self::build(circuit, SimulatorConfig::default())
    }

    /// Create a simulator with a custom configuration.
    pub fn with_config(circuit: Circuit, config: SimulatorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(circuit, config))
    }

    /// Simulate a loaded file. The file's time step overrides the
    /// configuration's, and load warnings are kept.
    pub fn from_loaded(loaded: LoadedCircuit, config: SimulatorConfig) -> Result<Self> {
        let config = config.with_time_step(loaded.options.time_step);
        let mut sim = Self::with_config(loaded.circuit, config)?;
        sim.load_warnings = loaded.warnings;
        Ok(sim)
    }

    fn build(mut circuit: Circuit, config: SimulatorConfig) -> Self {
        circuit.mark_dirty();
        Self {
            circuit,
            policy: config.policy(),
            clock: SimClock::new(config.time_step),
            matrix: MnaMatrix::new(1, 0),
            controller: SubIterationController::new(config.iteration_cap),
            computed: ComputedValues::new(),
            labels: LabeledNodes::new(),
            topology: Topology::default(),
            nonlinear: false,
            status: SimStatus::Paused,
            load_warnings: Vec::new(),
            last_step_converged: true,
            unconverged_steps: 0,
            config,
        }
    }

    // ============ Editing ============

    pub fn add_element(&mut self, element: impl Into<Element>) -> ElementId {
        self.clear_halt();
        self.circuit.add(element)
    }

    pub fn remove_element(&mut self, id: ElementId) -> Result<Element> {
        self.clear_halt();
        self.circuit.remove(id)
    }

    pub fn edit_element<F>(&mut self, id: ElementId, f: F) -> Result<()>
    where
        F: FnOnce(&mut Element),
    {
        self.clear_halt();
        self.circuit.edit(id, f)
    }

    /// Change the time step. Takes effect at the next timestep.
    pub fn set_time_step(&mut self, time_step: f64) -> Result<()> {
        let config = self.config.clone().with_time_step(time_step);
        config.validate()?;
        self.config = config;
        self.clock.time_step = time_step;
        self.circuit.mark_dirty();
        Ok(())
    }

    fn clear_halt(&mut self) {
        if matches!(self.status, SimStatus::Halted { .. }) {
            self.status = SimStatus::Paused;
        }
    }

    // ============ Running ============

    pub fn run(&mut self) {
        if !matches!(self.status, SimStatus::Halted { .. }) {
            self.status = SimStatus::Running;
        }
    }

    /// Stop running. Takes effect between timesteps.
    pub fn pause(&mut self) {
        if self.status == SimStatus::Running {
            self.status = SimStatus::Paused;
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == SimStatus::Running
    }

    /// Return to t = 0 with fresh element history and computed values.
    pub fn reset(&mut self) {
        self.clock.reset();
        self.computed.clear();
        for element in self.circuit.elements_mut() {
            element.behavior_mut().reset();
        }
        self.matrix.x.fill(0.0);
        self.status = SimStatus::Paused;
        self.last_step_converged = true;
        self.unconverged_steps = 0;
        self.circuit.mark_dirty();
        debug!("simulation reset");
    }

    /// Re-number the circuit and stamp the matrix.
    pub fn analyze(&mut self) -> Result<()> {
        self.topology = self.circuit.analyze(&mut self.labels, &mut self.computed);
        self.matrix = MnaMatrix::new(self.topology.num_nodes, self.topology.num_voltage_sources);

        let mut session = StampSession::new(&mut self.matrix, self.clock.time_step);
        for element in self.circuit.elements_mut() {
            element.behavior_mut().stamp(&mut session);
        }
        for &node in &self.topology.unconnected {
            session.stamp_resistor(node, NodeId::GROUND, self.config.unconnected_node_resistance);
        }
        self.matrix.commit_base();

        self.nonlinear = self.circuit.elements().iter().any(|e| e.behavior().non_linear());
        debug!(
            size = self.matrix.size,
            nonlinear = self.nonlinear,
            "stamped circuit"
        );
        Ok(())
    }

    /// Solve and commit one timestep.
    pub fn step(&mut self) -> Result<StepOutcome> {
        if let SimStatus::Halted { message } = &self.status {
            return Err(SimError::Halted {
                message: message.clone(),
            });
        }
        if self.circuit.need_analyze() {
            self.analyze()?;
        }

        self.computed.begin_timestep(self.clock.time_step_count);

        let Self {
            circuit,
            matrix,
            computed,
            labels,
            policy,
            controller,
            clock,
            nonlinear,
            ..
        } = self;
        let result = controller.run(clock, *nonlinear, |clock| {
            solve_pass(circuit.elements_mut(), matrix, clock, policy, computed, labels)
        });

        let iteration = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(t = self.clock.t, error = %e, "circuit cannot be solved, halting");
                self.status = SimStatus::Halted {
                    message: e.to_string(),
                };
                return Err(e);
            }
        };

        if let IterationOutcome::Aborted { sub_iterations } = iteration {
            self.unconverged_steps += 1;
            warn!(t = self.clock.t, sub_iterations, "convergence failed");
            if self.config.abort_policy == AbortPolicy::Halt {
                let err = SimError::convergence_failure(sub_iterations, self.clock.t);
                info!(t = self.clock.t, "halting after convergence failure");
                self.status = SimStatus::Halted {
                    message: err.to_string(),
                };
                return Err(err);
            }
        }
        self.last_step_converged = iteration.converged();

        let stop_message = self.finish_step(iteration.converged());
        let t = self.clock.t;
        self.clock.advance();

        if let Some(message) = &stop_message {
            info!(t, message = message.as_str(), "simulation stopped");
            self.status = SimStatus::Stopped {
                message: message.clone(),
            };
        }

        Ok(StepOutcome {
            t,
            iteration,
            stop_message,
        })
    }

    /// Let every element commit the step.
    fn finish_step(&mut self, converged: bool) -> Option<String> {
        let mut stop = None;
        for element in self.circuit.elements_mut() {
            let id = element.core().id;
            let mut ctx = FinishContext::new(
                &self.matrix,
                &self.clock,
                &mut self.computed,
                &self.labels,
                &mut stop,
                id,
                converged,
            );
            element.behavior_mut().step_finished(&mut ctx);
        }
        if converged {
            self.computed.commit_converged();
        }
        stop
    }

    /// Run up to `max_steps` timesteps, stopping early on a stop request
    /// or a pause. Returns the number of steps taken.
    pub fn run_for(&mut self, max_steps: usize) -> Result<usize> {
        self.run();
        let mut taken = 0;
        while taken < max_steps && self.is_running() {
            self.step()?;
            taken += 1;
        }
        self.pause();
        Ok(taken)
    }

    /// Run until simulated time reaches `t_end`.
    pub fn run_until(&mut self, t_end: f64) -> Result<usize> {
        self.run();
        let mut taken = 0;
        while self.clock.t < t_end - self.clock.time_step * 1e-6 && self.is_running() {
            self.step()?;
            taken += 1;
        }
        self.pause();
        Ok(taken)
    }

    // ============ Queries ============

    pub fn time(&self) -> f64 {
        self.clock.t
    }

    pub fn time_step(&self) -> f64 {
        self.clock.time_step
    }

    pub fn time_step_count(&self) -> u64 {
        self.clock.time_step_count
    }

    pub fn clock(&self) -> &SimClock {
        &self.clock
    }

    pub fn status(&self) -> &SimStatus {
        &self.status
    }

    /// Whether the last committed step converged.
    pub fn last_step_converged(&self) -> bool {
        self.last_step_converged
    }

    /// Steps committed after hitting the iteration cap since reset.
    pub fn unconverged_steps(&self) -> u64 {
        self.unconverged_steps
    }

    pub fn node_voltage(&self, node: NodeId) -> f64 {
        if node.0 >= self.topology.num_nodes {
            return 0.0;
        }
        self.matrix.voltage(node)
    }

    /// Voltage of a labeled node, `None` for unknown labels.
    pub fn label_voltage(&self, label: &str) -> Option<f64> {
        self.labels.get_by_name(label).map(|n| self.node_voltage(n))
    }

    pub fn computed_value(&self, key: &str) -> Option<f64> {
        self.computed.get_computed_value(key)
    }

    /// A computed value if one exists, else a label's voltage.
    pub fn value_of(&self, name: &str) -> Option<f64> {
        self.computed_value(name).or_else(|| self.label_voltage(name))
    }

    pub fn computed(&self) -> &ComputedValues {
        &self.computed
    }

    pub fn labels(&self) -> &LabeledNodes {
        &self.labels
    }

    pub fn element_info(&self, id: ElementId) -> Option<Vec<String>> {
        self.circuit.get(id).map(|e| e.behavior().info())
    }

    pub fn element(&self, id: ElementId) -> Option<&Element> {
        self.circuit.get(id)
    }

    pub fn circuit(&self) -> &Circuit {
        &self.circuit
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    /// Load and topology warnings.
    pub fn warnings(&self) -> Vec<String> {
        self.load_warnings
            .iter()
            .chain(&self.topology.warnings)
            .cloned()
            .collect()
    }

    /// The circuit in file form.
    pub fn dump(&self) -> String {
        let options = FileOptions {
            time_step: self.clock.time_step,
            ..FileOptions::default()
        };
        dump(&self.circuit, &options)
    }
}

/// One sub-iteration: every element's step, then factor if needed and
/// solve, then hand the solution back to the elements.
fn solve_pass(
    elements: &mut [Element],
    matrix: &mut MnaMatrix,
    clock: &SimClock,
    policy: &ConvergencePolicy,
    computed: &mut ComputedValues,
    labels: &LabeledNodes,
) -> Result<bool> {
    matrix.restore_base();
    let mut converged = true;
    for element in elements.iter_mut() {
        let id = element.core().id;
        let mut ctx = StepContext::new(matrix, clock, policy, &mut converged, computed, labels, id);
        element.behavior_mut().do_step(&mut ctx);
    }

    matrix.ensure_factored()?;
    matrix.solve()?;

    for element in elements.iter_mut() {
        let core = element.core_mut();
        for (volt, node) in core.volts.iter_mut().zip(&core.nodes) {
            *volt = matrix.voltage(*node);
        }
        for (current, vs) in core.currents.iter_mut().zip(&core.voltage_sources) {
            *current = matrix.source_current(*vs);
        }
    }
    Ok(converged)
}
