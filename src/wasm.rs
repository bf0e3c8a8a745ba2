//! WASM bindings for Flowsim Core.
//!
//! ## Usage (JavaScript)
//!
//! ```javascript
//! import init, { WasmSimulator } from 'flowsim_core';
//!
//! await init();
//!
//! const sim = new WasmSimulator(circuitText);
//! sim.run();
//! // Once per animation frame:
//! sim.step_frame(50);
//! const gdp = sim.computed_value("GDP");
//! ```

use wasm_bindgen::prelude::*;

use crate::circuit::{self, ElementId};
use crate::error::SimError;
use crate::solver::{SimStatus, Simulator, SimulatorConfig};

/// Initialize panic hook for better error messages in browser console.
#[wasm_bindgen(start)]
pub fn init_panic_hook() {
    console_error_panic_hook::set_once();
}

fn to_js(e: SimError) -> JsValue {
    JsValue::from_str(&e.to_string())
}

/// WASM-compatible simulator.
#[wasm_bindgen]
pub struct WasmSimulator {
    simulator: Simulator,
}

#[wasm_bindgen]
impl WasmSimulator {
    /// Create a simulator from circuit file or SFCR text.
    #[wasm_bindgen(constructor)]
    pub fn new(circuit_text: &str) -> Result<WasmSimulator, JsValue> {
        Self::with_config(circuit_text, "{}")
    }

    /// Create a simulator with a JSON configuration.
    #[wasm_bindgen]
    pub fn with_config(circuit_text: &str, config_json: &str) -> Result<WasmSimulator, JsValue> {
        let config = SimulatorConfig::from_json_str(config_json).map_err(to_js)?;
        let loaded = circuit::load_model(circuit_text);
        let simulator = Simulator::from_loaded(loaded, config).map_err(to_js)?;
        Ok(WasmSimulator { simulator })
    }

    /// Replace the circuit, keeping the configuration.
    #[wasm_bindgen]
    pub fn load(&mut self, circuit_text: &str) -> Result<(), JsValue> {
        let config = self.simulator.config().clone();
        let loaded = circuit::load_model(circuit_text);
        self.simulator = Simulator::from_loaded(loaded, config).map_err(to_js)?;
        Ok(())
    }

    /// Advance one timestep. Returns whether it converged.
    #[wasm_bindgen]
    pub fn step(&mut self) -> Result<bool, JsValue> {
        self.simulator
            .step()
            .map(|outcome| outcome.converged())
            .map_err(to_js)
    }

    /// Advance up to `max_steps` while running. Returns steps taken.
    #[wasm_bindgen]
    pub fn step_frame(&mut self, max_steps: usize) -> Result<usize, JsValue> {
        let mut taken = 0;
        while taken < max_steps && self.simulator.is_running() {
            self.simulator.step().map_err(to_js)?;
            taken += 1;
        }
        Ok(taken)
    }

    #[wasm_bindgen]
    pub fn run(&mut self) {
        self.simulator.run();
    }

    #[wasm_bindgen]
    pub fn pause(&mut self) {
        self.simulator.pause();
    }

    #[wasm_bindgen]
    pub fn reset(&mut self) {
        self.simulator.reset();
    }

    #[wasm_bindgen(getter)]
    pub fn running(&self) -> bool {
        self.simulator.is_running()
    }

    #[wasm_bindgen(getter)]
    pub fn time(&self) -> f64 {
        self.simulator.time()
    }

    /// Stop or halt message, if any.
    #[wasm_bindgen(getter)]
    pub fn stop_message(&self) -> Option<String> {
        match self.simulator.status() {
            SimStatus::Stopped { message } | SimStatus::Halted { message } => Some(message.clone()),
            _ => None,
        }
    }

    #[wasm_bindgen(getter)]
    pub fn converged(&self) -> bool {
        self.simulator.last_step_converged()
    }

    /// Voltage of a labeled node, or `undefined`.
    #[wasm_bindgen]
    pub fn label_voltage(&self, label: &str) -> Option<f64> {
        self.simulator.label_voltage(label)
    }

    #[wasm_bindgen]
    pub fn computed_value(&self, key: &str) -> Option<f64> {
        self.simulator.computed_value(key)
    }

    /// Info lines of the element at `index` in file order.
    #[wasm_bindgen]
    pub fn element_info(&self, index: usize) -> Vec<String> {
        self.simulator
            .circuit()
            .elements()
            .get(index)
            .map(|e| e.core().id)
            .and_then(|id: ElementId| self.simulator.element_info(id))
            .unwrap_or_default()
    }

    #[wasm_bindgen]
    pub fn warnings(&self) -> Vec<String> {
        self.simulator.warnings()
    }

    /// The circuit in file form.
    #[wasm_bindgen]
    pub fn dump(&self) -> String {
        self.simulator.dump()
    }
}

/// Get the library version.
#[wasm_bindgen]
pub fn version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}
