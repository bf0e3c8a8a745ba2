//! End-to-end circuits driven through the public API.

use approx::assert_relative_eq;

use flowsim_core::circuit::{self, Circuit, Point};
use flowsim_core::elements::{
    Adder, Differentiator, DivideConst, ElementCore, Equation, EquationRow, EquationTable, Ground,
    Integrator, LabeledNode, Multiply, Ode, Percent, Resistor, StockColumn, StockTable, StopTime,
    VoltageSource,
};
use flowsim_core::solver::{AbortPolicy, IterationOutcome, SimStatus, Simulator, SimulatorConfig};
use flowsim_core::SimError;

fn chip(x: i32, y: i32) -> ElementCore {
    ElementCore::new(x, y, x + 64, y, 0)
}

fn sim_with_step(circuit: Circuit, time_step: f64) -> Simulator {
    Simulator::with_config(circuit, SimulatorConfig::new().with_time_step(time_step)).unwrap()
}

fn table(rows: Vec<EquationRow>) -> Circuit {
    let mut c = Circuit::new();
    c.add(EquationTable::new(chip(0, 0), "t1", rows));
    c
}

#[test]
fn test_adder_sums_rails() {
    let mut c = Circuit::new();
    c.add(Ground::at(Point::new(0, 200)));
    c.add(VoltageSource::rail(Point::new(0, 0), 2.0));
    c.add(VoltageSource::rail(Point::new(0, 16), 3.0));
    c.add(Adder::new(chip(0, 0), 2));
    c.add(LabeledNode::at(Point::new(64, 0), "sum"));

    let mut sim = Simulator::new(c);
    let outcome = sim.step().unwrap();
    assert_eq!(outcome.iteration, IterationOutcome::Converged { sub_iterations: 0 });
    assert_relative_eq!(sim.label_voltage("sum").unwrap(), 5.0, epsilon = 1e-9);
}

#[test]
fn test_multiply_and_percent() {
    let mut c = Circuit::new();
    c.add(Ground::at(Point::new(0, 200)));
    c.add(VoltageSource::rail(Point::new(0, 0), 25.0));
    c.add(VoltageSource::rail(Point::new(0, 16), 50.0));
    c.add(Multiply::new(chip(0, 0), 2));
    c.add(LabeledNode::at(Point::new(64, 0), "product"));
    c.add(Percent::new(ElementCore::new(0, 0, 64, 100, 0), 2));
    c.add(LabeledNode::at(Point::new(64, 100), "pct"));

    let mut sim = Simulator::new(c);
    let outcome = sim.step().unwrap();
    assert!(outcome.converged());
    assert_relative_eq!(sim.label_voltage("product").unwrap(), 1250.0, max_relative = 1e-6);
    assert_relative_eq!(sim.label_voltage("pct").unwrap(), 50.0, max_relative = 1e-6);
}

#[test]
fn test_labeled_ground_matches_direct_ground() {
    fn divider(labeled: bool) -> Circuit {
        let mut c = Circuit::new();
        c.add(VoltageSource::rail(Point::new(0, 0), 10.0));
        c.add(Resistor::between(Point::new(0, 0), Point::new(64, 0), 1000.0));
        c.add(Resistor::between(Point::new(64, 0), Point::new(128, 0), 1000.0));
        c.add(LabeledNode::at(Point::new(64, 0), "mid"));
        if labeled {
            c.add(LabeledNode::at(Point::new(128, 0), "GND2"));
            c.add(Ground::at(Point::new(300, 0)));
            c.add(LabeledNode::at(Point::new(300, 0), "GND2"));
        } else {
            c.add(Ground::at(Point::new(128, 0)));
        }
        c
    }

    let mut direct = Simulator::new(divider(false));
    let mut labeled = Simulator::new(divider(true));
    direct.step().unwrap();
    labeled.step().unwrap();

    let v = direct.label_voltage("mid").unwrap();
    assert_relative_eq!(v, 5.0, epsilon = 1e-9);
    assert_relative_eq!(labeled.label_voltage("mid").unwrap(), v, epsilon = 1e-9);
    assert_eq!(labeled.label_voltage("GND2"), Some(0.0));
}

#[test]
fn test_divide_by_zero_constant_is_clamped() {
    let mut c = Circuit::new();
    c.add(Ground::at(Point::new(0, 200)));
    c.add(VoltageSource::rail(Point::new(0, 0), 1.0));
    let id = c.add(DivideConst::new(chip(0, 0), 0.0));
    c.add(LabeledNode::at(Point::new(64, 0), "out"));

    let mut sim = Simulator::new(c);
    sim.step().unwrap();
    let out = sim.label_voltage("out").unwrap();
    assert!(out.is_finite());
    assert_relative_eq!(out, 1e9, max_relative = 1e-6);
    let info = sim.element_info(id).unwrap();
    assert!(info.iter().any(|line| line.contains("clamped")));
}

#[test]
fn test_integrator_accumulates_rate() {
    let mut c = Circuit::new();
    c.add(Ground::at(Point::new(0, 200)));
    c.add(VoltageSource::rail(Point::new(0, 0), 2.0));
    let id = c.add(Integrator::new(chip(0, 0), 0.0));
    c.add(LabeledNode::at(Point::new(64, 0), "out"));

    let mut sim = sim_with_step(c, 0.001);
    for _ in 0..10 {
        assert!(sim.step().unwrap().converged());
    }
    assert_relative_eq!(sim.label_voltage("out").unwrap(), 0.02, epsilon = 1e-9);
    match sim.element(id) {
        Some(flowsim_core::elements::Element::Integrator(i)) => {
            assert_relative_eq!(i.last_output(), 0.02, epsilon = 1e-9)
        }
        other => panic!("unexpected element {:?}", other),
    }
}

#[test]
fn test_differentiator_settles_then_tracks_slope() {
    let mut c = Circuit::new();
    c.add(Ground::at(Point::new(0, 200)));
    c.add(Equation::new(ElementCore::new(0, 0, 16, 0, 0), "ramp", "t*3", Vec::new()));
    c.add(Differentiator::new(chip(0, 0)));
    c.add(LabeledNode::at(Point::new(64, 0), "slope"));

    let mut sim = sim_with_step(c, 0.01);
    sim.step().unwrap();
    assert_eq!(sim.label_voltage("slope"), Some(0.0));
    for _ in 0..3 {
        sim.step().unwrap();
        assert_relative_eq!(sim.label_voltage("slope").unwrap(), 3.0, epsilon = 1e-6);
    }
}

#[test]
fn test_reset_resettles_calculus_elements() {
    let mut c = Circuit::new();
    c.add(Ground::at(Point::new(0, 200)));
    c.add(Equation::new(ElementCore::new(0, 0, 16, 0, 0), "ramp", "t*3", Vec::new()));
    c.add(Differentiator::new(chip(0, 0)));
    c.add(LabeledNode::at(Point::new(64, 0), "slope"));
    c.add(VoltageSource::rail(Point::new(0, 100), 2.0));
    c.add(Integrator::new(chip(0, 100), 0.0));
    c.add(LabeledNode::at(Point::new(64, 100), "area"));

    let mut sim = sim_with_step(c, 0.01);
    let run = |sim: &mut Simulator| {
        let mut trace = Vec::new();
        for _ in 0..4 {
            sim.step().unwrap();
            trace.push((sim.label_voltage("slope").unwrap(), sim.label_voltage("area").unwrap()));
        }
        trace
    };
    let first = run(&mut sim);
    sim.reset();
    assert_eq!(sim.time(), 0.0);
    let second = run(&mut sim);

    assert_eq!(second[0].0, 0.0);
    assert_relative_eq!(second[1].0, 3.0, epsilon = 1e-6);
    assert_relative_eq!(second[3].1, 0.08, epsilon = 1e-9);
    for (a, b) in first.iter().zip(&second) {
        assert_relative_eq!(a.0, b.0, epsilon = 1e-9);
        assert_relative_eq!(a.1, b.1, epsilon = 1e-9);
    }
}

#[test]
fn test_corrupt_counts_load_and_run() {
    let text = "$ 1 0.01\n\
        g 200 200 200 216 0\n\
        266 0 0 64 0 0 t 1e20\n\
        266 0 40 64 40 0 t2 4 a 1 \\0 b a*2\n\
        255 0 80 64 80 0 s 1 1e20 cash 1 5\n\
        251 0 120 64 120 0 99999\n\
        262 0 160 16 160 0 y _a 1e9 4\n";
    let loaded = circuit::load(text);
    assert_eq!(loaded.circuit.len(), 6);
    assert_eq!(loaded.warnings.len(), 5);

    let mut sim = Simulator::with_config(
        loaded.circuit,
        SimulatorConfig::new().with_time_step(loaded.options.time_step),
    )
    .unwrap();
    sim.step().unwrap();
    assert_eq!(sim.computed_value("b"), Some(2.0));
    assert_relative_eq!(sim.computed_value("cash").unwrap(), 5.01, epsilon = 1e-9);
    assert_eq!(sim.computed_value("y"), Some(4.0));
}

#[test]
fn test_oscillating_table_aborts_at_cap() {
    let mut sim = Simulator::new(table(vec![EquationRow::new("x", "1 - x", None)]));
    let outcome = sim.step().unwrap();
    assert_eq!(outcome.iteration, IterationOutcome::Aborted { sub_iterations: 100 });
    assert_eq!(outcome.iteration.passes(), 100);
    assert!(!sim.last_step_converged());
    assert_eq!(sim.unconverged_steps(), 1);
    assert_eq!(sim.time_step_count(), 1);
    assert_eq!(sim.status(), &SimStatus::Paused);
}

#[test]
fn test_halt_policy_stops_on_abort() {
    let config = SimulatorConfig::new()
        .with_abort_policy(AbortPolicy::Halt)
        .with_iteration_cap(20);
    let mut sim =
        Simulator::with_config(table(vec![EquationRow::new("x", "1 - x", None)]), config).unwrap();
    let err = sim.step().unwrap_err();
    assert!(matches!(err, SimError::ConvergenceFailure { iterations: 20, .. }));
    assert_eq!(sim.time_step_count(), 0);
    assert!(matches!(sim.step(), Err(SimError::Halted { .. })));
}

#[test]
fn test_contracting_table_converges() {
    let mut sim = Simulator::new(table(vec![EquationRow::new("x", "0.5*x + 1", None)]));
    let outcome = sim.step().unwrap();
    assert!(outcome.converged());
    assert!(outcome.iteration.passes() < 100);
    assert_relative_eq!(sim.computed_value("x").unwrap(), 2.0, epsilon = 0.01);
}

#[test]
fn test_table_rows_read_each_other_and_initial_values() {
    let rows = vec![
        EquationRow::new("y", "100", None),
        EquationRow::new("c", "0.8*y", Some("5")),
    ];
    let mut sim = sim_with_step(table(rows), 1.0);
    sim.step().unwrap();
    assert_relative_eq!(sim.computed_value("c").unwrap(), 5.0);
    sim.step().unwrap();
    assert_relative_eq!(sim.computed_value("c").unwrap(), 80.0, epsilon = 1e-9);
}

#[test]
fn test_stock_table_integrates_flow() {
    let mut c = Circuit::new();
    c.add(StockTable::new(
        chip(0, 0),
        "bank",
        1.0,
        vec![StockColumn::new("cash", "income - spending", 10.0)],
    ));
    c.add(EquationTable::new(
        chip(0, 100),
        "flows",
        vec![
            EquationRow::new("income", "3", None),
            EquationRow::new("spending", "1", None),
        ],
    ));

    let mut sim = sim_with_step(c, 0.5);
    for _ in 0..4 {
        sim.step().unwrap();
    }
    assert_relative_eq!(sim.computed_value("cash").unwrap(), 14.0, epsilon = 1e-9);
}

#[test]
fn test_shared_stock_sums_flows_across_tables() {
    let mut c = Circuit::new();
    c.add(StockTable::new(chip(0, 0), "bank", 1.0, vec![StockColumn::new("cash", "income", 10.0)]));
    let household = c.add(StockTable::new(
        chip(0, 50),
        "household",
        2.0,
        vec![
            StockColumn::new("cash", "-spending", 99.0),
            StockColumn::new("savings", "1", 0.0),
        ],
    ));
    c.add(EquationTable::new(
        chip(0, 100),
        "flows",
        vec![
            EquationRow::new("income", "3", None),
            EquationRow::new("spending", "0.5", None),
        ],
    ));

    let mut sim = sim_with_step(c, 0.5);
    for _ in 0..4 {
        assert!(sim.step().unwrap().converged());
    }
    // 10 + 4 * 0.5 * (3 - 2 * 0.5)
    assert_relative_eq!(sim.computed_value("cash").unwrap(), 14.0, epsilon = 1e-9);
    assert_relative_eq!(sim.computed_value("savings").unwrap(), 4.0, epsilon = 1e-9);
    assert!(sim.computed().conflicts().is_empty());
    assert_eq!(sim.topology().stocks.shared_stocks(), vec!["cash"]);

    match sim.element(household) {
        Some(flowsim_core::elements::Element::StockTable(t)) => {
            let cash = t.column("cash").unwrap();
            assert!(cash.follows());
            assert_eq!(cash.initial, 10.0);
            assert_relative_eq!(cash.value(), 14.0, epsilon = 1e-9);
        }
        other => panic!("unexpected element {:?}", other),
    }

    sim.reset();
    sim.step().unwrap();
    assert_relative_eq!(sim.computed_value("cash").unwrap(), 11.0, epsilon = 1e-9);
}

#[test]
fn test_ode_decay_step() {
    let mut c = Circuit::new();
    c.add(Ground::at(Point::new(0, 200)));
    c.add(Ode::new(ElementCore::new(0, 0, 16, 0, 0), "x", "-x", 1.0, Vec::new()));

    let mut sim = sim_with_step(c, 0.01);
    sim.step().unwrap();
    assert_relative_eq!(sim.computed_value("x").unwrap(), 1.0 / 1.01, epsilon = 1e-4);
}

#[test]
fn test_mastership_conflict_keeps_first_writer() {
    let mut c = Circuit::new();
    c.add(Ground::at(Point::new(0, 200)));
    c.add(Equation::new(ElementCore::new(0, 0, 16, 0, 0), "y", "1", Vec::new()));
    c.add(Equation::new(ElementCore::new(32, 0, 48, 0, 0), "y", "2", Vec::new()));

    let mut sim = Simulator::new(c);
    sim.step().unwrap();
    assert_relative_eq!(sim.computed_value("y").unwrap(), 1.0);
    assert_eq!(sim.computed().conflicts().len(), 1);
    assert!(sim.warnings().iter().any(|w| w.contains("'y'")));
}

#[test]
fn test_same_label_is_one_node() {
    let mut c = Circuit::new();
    c.add(Ground::at(Point::new(0, 200)));
    c.add(VoltageSource::rail(Point::new(0, 0), 4.0));
    c.add(LabeledNode::at(Point::new(0, 0), "bus"));
    let r = c.add(Resistor::between(Point::new(100, 0), Point::new(0, 200), 1000.0));
    c.add(LabeledNode::at(Point::new(100, 0), "bus"));

    let mut sim = Simulator::new(c);
    sim.step().unwrap();
    assert_relative_eq!(sim.label_voltage("bus").unwrap(), 4.0, epsilon = 1e-9);
    match sim.element(r) {
        Some(flowsim_core::elements::Element::Resistor(res)) => {
            assert_relative_eq!(res.current(), 0.004, epsilon = 1e-12)
        }
        other => panic!("unexpected element {:?}", other),
    }
}

#[test]
fn test_linear_steps_are_idempotent() {
    let mut c = Circuit::new();
    c.add(VoltageSource::between(Point::new(0, 64), Point::new(0, 0), 9.0));
    c.add(Resistor::between(Point::new(0, 0), Point::new(64, 0), 2000.0));
    c.add(Resistor::between(Point::new(64, 0), Point::new(0, 64), 1000.0));
    c.add(LabeledNode::at(Point::new(64, 0), "out"));
    c.add(Ground::at(Point::new(0, 64)));

    let mut sim = Simulator::new(c);
    sim.step().unwrap();
    let first = sim.label_voltage("out").unwrap();
    assert_relative_eq!(first, 3.0, epsilon = 1e-9);
    for _ in 0..5 {
        sim.step().unwrap();
        assert_eq!(sim.label_voltage("out").unwrap(), first);
    }
    sim.reset();
    sim.step().unwrap();
    assert_eq!(sim.label_voltage("out").unwrap(), first);
}

#[test]
fn test_file_round_trip_with_escaping() {
    let text = "$ 1 0.01\n262 0 0 16 0 0 my\\seq t\\s\\p\\s1 0\ng 64 64 64 80 0\n";
    let loaded = circuit::load(text);
    assert!(loaded.warnings.is_empty());
    match &loaded.circuit.elements()[0] {
        flowsim_core::elements::Element::Equation(e) => {
            assert_eq!(e.name, "my eq");
            assert_eq!(e.equation(), "t + 1");
        }
        other => panic!("unexpected element {:?}", other),
    }

    let dumped = circuit::dump(&loaded.circuit, &loaded.options);
    assert_eq!(dumped, text);
    let again = circuit::load(&dumped);
    assert_eq!(circuit::dump(&again.circuit, &again.options), text);

    let mut sim = Simulator::from_loaded(again, SimulatorConfig::default()).unwrap();
    assert_eq!(sim.time_step(), 0.01);
    sim.step().unwrap();
    assert_relative_eq!(sim.computed_value("my eq").unwrap(), 1.0);
    assert_eq!(sim.dump(), text);
}

#[test]
fn test_singular_circuit_halts_until_edited() {
    let mut c = Circuit::new();
    c.add(Ground::at(Point::new(0, 200)));
    c.add(VoltageSource::rail(Point::new(0, 0), 1.0));
    let second = c.add(VoltageSource::rail(Point::new(0, 0), 2.0));

    let mut sim = Simulator::new(c);
    let err = sim.step().unwrap_err();
    assert!(err.is_unsolvable());
    assert!(matches!(sim.status(), SimStatus::Halted { .. }));
    assert!(matches!(sim.step(), Err(SimError::Halted { .. })));

    sim.remove_element(second).unwrap();
    assert_eq!(sim.status(), &SimStatus::Paused);
    sim.step().unwrap();
    assert_relative_eq!(sim.node_voltage(flowsim_core::circuit::NodeId(1)), 1.0, epsilon = 1e-9);
}

#[test]
fn test_stop_time_ends_run() {
    let mut c = Circuit::new();
    c.add(StopTime::new(chip(0, 0), 0.05));
    c.add(EquationTable::new(chip(0, 100), "clock", vec![EquationRow::new("now", "t", None)]));

    let mut sim = sim_with_step(c, 0.01);
    assert_eq!(sim.run_for(100).unwrap(), 5);
    assert!(matches!(sim.status(), SimStatus::Stopped { .. }));
    assert_relative_eq!(sim.computed_value("now").unwrap(), 0.04, epsilon = 1e-9);
}

const SFCR_MODEL: &str = "\
@init
  timestep: 1
@end

@parameters
  alpha = 0.5
  G ~ 20
@end

@equations Households
  YD ~ G          # Disposable income
  C ~ alpha * YD
  Hh ~ YD - C + Hh[-1]
@end

@matrix Wealth
| Transaction | H | Sum |
|---|---|---|
| Income | YD | |
| Consumption | -C | |
@end
";

#[test]
fn test_sfcr_model_runs_and_survives_export() {
    let loaded = circuit::load_model(SFCR_MODEL);
    assert!(loaded.warnings.is_empty(), "{:?}", loaded.warnings);
    assert_eq!(loaded.notes.hints["YD"], "Disposable income");
    let exported = circuit::dump_sfcr(&loaded.circuit, &loaded.options, &loaded.notes);

    let mut sim = Simulator::from_loaded(loaded, SimulatorConfig::default()).unwrap();
    assert_eq!(sim.time_step(), 1.0);
    for _ in 0..3 {
        assert!(sim.step().unwrap().converged());
    }
    assert_relative_eq!(sim.computed_value("C").unwrap(), 10.0, epsilon = 1e-9);
    assert_relative_eq!(sim.computed_value("H").unwrap(), 30.0, epsilon = 1e-9);
    assert_relative_eq!(sim.computed_value("Hh").unwrap(), 30.0, epsilon = 1e-9);

    assert!(circuit::is_sfcr(&exported));
    let again = circuit::load_model(&exported);
    assert!(again.warnings.is_empty(), "{:?}", again.warnings);
    let mut replay = Simulator::from_loaded(again, SimulatorConfig::default()).unwrap();
    for _ in 0..3 {
        replay.step().unwrap();
    }
    assert_relative_eq!(replay.computed_value("H").unwrap(), 30.0, epsilon = 1e-9);
    assert_eq!(replay.dump(), sim.dump());
}

#[test]
fn test_load_model_reads_plain_files() {
    let loaded = circuit::load_model("$ 1 0.25\n262 0 0 16 0 0 y t 0\n");
    assert!(loaded.warnings.is_empty());
    assert_eq!(loaded.options.time_step, 0.25);
    assert_eq!(loaded.notes, circuit::ModelNotes::default());
    assert_eq!(loaded.circuit.len(), 1);
}
