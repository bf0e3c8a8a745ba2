//! Flowsim - circuit and flow model simulator
//!
//! Runs a circuit file or SFCR model and prints the watched values as CSV.
//!
//! # Usage
//!
//! ```bash
//! flowsim model.txt --until 10 --watch GDP --watch vin > out.csv
//! ```

use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use clap::Parser;
use flowsim_core::{
    circuit,
    error::{Result, SimError},
    solver::SimStatus,
    Simulator, SimulatorConfig,
};

/// Circuit and flow model simulator
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the circuit file or SFCR model
    #[arg(value_name = "CIRCUIT_FILE")]
    circuit_file: PathBuf,

    /// JSON simulator configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of timesteps to run
    #[arg(short = 'n', long, default_value_t = 100, conflicts_with = "until")]
    steps: usize,

    /// Run until this simulated time instead of a step count
    #[arg(short, long)]
    until: Option<f64>,

    /// Time step, overriding the file header
    #[arg(long)]
    time_step: Option<f64>,

    /// Computed value or label to print; repeat for more columns.
    /// Defaults to every computed value and label.
    #[arg(short, long = "watch")]
    watched: Vec<String>,

    /// Print every Nth step
    #[arg(long, default_value_t = 1)]
    every: usize,

    /// Also write the loaded model as SFCR text
    #[arg(long, value_name = "FILE")]
    export_sfcr: Option<PathBuf>,

    /// Log level when RUST_LOG is unset
    #[arg(long, default_value = "warn")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();
    flowsim_core::init_logging(&args.log_level);

    let config = match &args.config {
        Some(path) => SimulatorConfig::from_json_file(path)?,
        None => SimulatorConfig::default(),
    };
    let loaded = circuit::load_file(&args.circuit_file)?;
    if let Some(path) = &args.export_sfcr {
        let text = circuit::dump_sfcr(&loaded.circuit, &loaded.options, &loaded.notes);
        std::fs::write(path, text).map_err(io_error)?;
    }
    let mut sim = Simulator::from_loaded(loaded, config)?;
    if let Some(dt) = args.time_step {
        sim.set_time_step(dt)?;
    }
    sim.analyze()?;

    for warning in sim.warnings() {
        eprintln!("warning: {}", warning);
    }

    let watched = if args.watched.is_empty() {
        default_columns(&sim)
    } else {
        args.watched.clone()
    };

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    write_row(&mut out, "t", watched.iter().map(String::as_str))?;

    let every = args.every.max(1);
    let mut taken = 0usize;
    sim.run();
    loop {
        let done = match args.until {
            Some(t_end) => sim.time() >= t_end - sim.time_step() * 1e-6,
            None => taken >= args.steps,
        };
        if done || !sim.is_running() {
            break;
        }
        let outcome = sim.step()?;
        taken += 1;
        if taken % every == 0 || outcome.stop_message.is_some() {
            let values: Vec<String> = watched
                .iter()
                .map(|name| sim.value_of(name).map(|v| v.to_string()).unwrap_or_default())
                .collect();
            write_row(&mut out, &outcome.t.to_string(), values.iter().map(String::as_str))?;
        }
    }
    out.flush().map_err(io_error)?;

    eprintln!(
        "{} steps, t = {}, {} unconverged",
        taken,
        sim.time(),
        sim.unconverged_steps()
    );
    if let SimStatus::Stopped { message } = sim.status() {
        eprintln!("{}", message);
    }
    Ok(())
}

fn default_columns(sim: &Simulator) -> Vec<String> {
    let mut columns: Vec<String> = sim
        .circuit()
        .elements()
        .iter()
        .flat_map(|e| e.behavior().claimed_keys())
        .map(String::from)
        .collect();
    columns.sort();
    columns.dedup();
    for label in sim.labels().sorted_names() {
        if !columns.contains(label) {
            columns.push(label.clone());
        }
    }
    columns
}

fn write_row<'a>(out: &mut impl Write, first: &str, rest: impl Iterator<Item = &'a str>) -> Result<()> {
    let mut line = first.to_string();
    for cell in rest {
        line.push(',');
        line.push_str(cell);
    }
    writeln!(out, "{}", line).map_err(io_error)
}

fn io_error(e: io::Error) -> SimError {
    SimError::OutputError {
        message: e.to_string(),
    }
}
