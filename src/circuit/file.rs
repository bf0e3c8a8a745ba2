//! Circuit file reading and writing.
//!
//! ```text
//! $ 1 0.001
//! g 0 64 0 80 0
//! R 0 0 0 -16 0 0 40 5 0
//! 262 96 0 128 0 0 y t*2 0
//! ```
//!
//! The `$` header carries option flags and the time step. Every other line is
//! `dumpType x1 y1 x2 y2 flags <fields>`. Loading never fails because of one
//! bad line: the line is skipped, or the bad field takes its default, and a
//! warning is returned alongside the circuit.

use std::path::Path;

use tracing::{debug, warn};

use super::graph::Circuit;
use super::sfcr::{is_sfcr, load_sfcr, ModelNotes};
use super::tokens::Tokens;
use crate::elements::{Element, ElementCore};
use crate::error::{Result, SimError};
use crate::solver::DEFAULT_TIME_STEP;

/// Line prefixes for editor-only records that carry no simulation meaning.
const IGNORED_PREFIXES: [&str; 5] = ["%", "#", "x", "o", "h"];

/// Options stored in the file header.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FileOptions {
    pub flags: u32,
    pub time_step: f64,
}

impl Default for FileOptions {
    fn default() -> Self {
        Self {
            flags: 1,
            time_step: DEFAULT_TIME_STEP,
        }
    }
}

/// A loaded circuit file.
#[derive(Debug, Clone)]
pub struct LoadedCircuit {
    pub circuit: Circuit,
    pub options: FileOptions,
    /// Documentation carried by SFCR models
    pub notes: ModelNotes,
    /// Recovered problems, one per message
    pub warnings: Vec<String>,
}

/// Parse circuit text.
pub fn load(text: &str) -> LoadedCircuit {
    let mut circuit = Circuit::new();
    let mut options = FileOptions::default();
    let mut warnings = Vec::new();

    for (index, raw) in text.lines().enumerate() {
        read_line(raw, index + 1, &mut circuit, &mut options, &mut warnings);
    }

    debug!(elements = circuit.len(), warnings = warnings.len(), "loaded circuit");
    LoadedCircuit {
        circuit,
        options,
        notes: ModelNotes::default(),
        warnings,
    }
}

/// Parse either format, picking SFCR when the text has block markers.
pub fn load_model(text: &str) -> LoadedCircuit {
    if is_sfcr(text) {
        load_sfcr(text)
    } else {
        load(text)
    }
}

/// Read one circuit-file line into `circuit`. A `$` header replaces
/// `options`; blank and editor-only lines are skipped.
pub(super) fn read_line(
    raw: &str,
    line_no: usize,
    circuit: &mut Circuit,
    options: &mut FileOptions,
    warnings: &mut Vec<String>,
) {
    let line = raw.trim();
    if line.is_empty() {
        return;
    }
    let mut tokens = Tokens::new(line, line_no);
    let Some(tag) = tokens.next_raw() else {
        return;
    };

    if tag == "$" {
        *options = read_header(&mut tokens);
        warnings.append(&mut tokens.take_warnings());
        return;
    }
    if IGNORED_PREFIXES.iter().any(|p| tag == *p) {
        return;
    }

    match read_element(tag, &mut tokens) {
        Ok(element) => {
            circuit.add(element);
        }
        Err(e) => {
            warn!(line = line_no, error = %e, "skipping circuit file line");
            warnings.push(e.to_string());
        }
    }
    warnings.append(&mut tokens.take_warnings());
}

/// Read and parse a circuit file in either format.
pub fn load_file(path: impl AsRef<Path>) -> Result<LoadedCircuit> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| SimError::FileReadError {
        path: path.display().to_string(),
        source,
    })?;
    Ok(load_model(&text))
}

fn read_header(tokens: &mut Tokens<'_>) -> FileOptions {
    let defaults = FileOptions::default();
    let flags = tokens.count_or("flags", defaults.flags as usize, u32::MAX as usize) as u32;
    let mut time_step = tokens.f64_or("time step", defaults.time_step);
    if time_step <= 0.0 {
        warn!(line = tokens.line(), time_step, "non-positive time step, using default");
        time_step = defaults.time_step;
    }
    FileOptions { flags, time_step }
}

fn read_element(tag: &str, tokens: &mut Tokens<'_>) -> Result<Element> {
    let line = tokens.line();
    let mut coordinate = || {
        tokens
            .required_i32()
            .ok_or_else(|| SimError::file_format(line, "missing or bad coordinate"))
    };
    let (x1, y1, x2, y2) = (coordinate()?, coordinate()?, coordinate()?, coordinate()?);
    let flags = tokens
        .required_u32()
        .ok_or_else(|| SimError::file_format(line, "missing or bad flags"))?;
    let core = ElementCore::new(x1, y1, x2, y2, flags);
    Element::from_dump(tag, core, tokens).ok_or_else(|| SimError::UnknownElementType {
        dump_type: tag.to_string(),
        line,
    })
}

/// Write circuit text that [`load`] reads back to the same circuit.
pub fn dump(circuit: &Circuit, options: &FileOptions) -> String {
    let mut out = format!("$ {} {}\n", options.flags, options.time_step);
    for element in circuit.elements() {
        out.push_str(&element.dump());
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_and_elements() {
        let text = "$ 1 0.001\nr 0 0 0 64 0 220\n\ng 0 64 0 80 0\n";
        let loaded = load(text);
        assert!(loaded.warnings.is_empty());
        assert_eq!(loaded.options.time_step, 0.001);
        assert_eq!(loaded.circuit.len(), 2);
        assert_eq!(dump(&loaded.circuit, &loaded.options), "$ 1 0.001\nr 0 0 0 64 0 220\ng 0 64 0 80 0\n");
    }

    #[test]
    fn test_bad_lines_are_skipped_with_warnings() {
        let text = "zz 0 0 0 0 0\nr 0 0 oops 64 0 5\nr 0 0 0 64 0 abc\n% editor note\no 1 2 3\n";
        let loaded = load(text);
        assert_eq!(loaded.circuit.len(), 1);
        assert_eq!(loaded.warnings.len(), 3);
        assert!(loaded.warnings[0].contains("Unknown element type 'zz'"));
        assert!(loaded.warnings[1].contains("line 2"));
        assert!(loaded.warnings[2].contains("resistance"));
    }

    #[test]
    fn test_oversized_counts_are_clamped() {
        let text = "266 0 0 64 0 0 t 1e20\n255 0 80 64 80 0 s 1 99999999 cash 1 5\n251 0 160 64 160 0 1e20\n";
        let loaded = load(text);
        assert_eq!(loaded.circuit.len(), 3);
        assert_eq!(loaded.warnings.len(), 3);
        assert!(loaded.warnings.iter().all(|w| w.contains("clamped")));

        match &loaded.circuit.elements()[0] {
            Element::EquationTable(t) => assert!(t.rows.is_empty()),
            other => panic!("unexpected {:?}", other),
        }
        match &loaded.circuit.elements()[1] {
            Element::StockTable(t) => {
                assert_eq!(t.columns.len(), 1);
                assert_eq!(t.columns[0].initial, 5.0);
            }
            other => panic!("unexpected {:?}", other),
        }
        match &loaded.circuit.elements()[2] {
            Element::Adder(a) => assert_eq!(a.inputs, crate::elements::MAX_INPUTS),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_truncated_table_line_keeps_complete_rows() {
        let loaded = load("266 0 0 64 0 0 t 3 a 1 \\0 b 2\n");
        let Element::EquationTable(t) = &loaded.circuit.elements()[0] else {
            panic!("expected an equation table");
        };
        assert_eq!(t.rows.len(), 2);
        assert_eq!(t.rows[1].name, "b");
        assert_eq!(t.rows[1].equation(), "2");
        assert_eq!(loaded.warnings.len(), 1);
    }

    #[test]
    fn test_malformed_count_takes_default() {
        let loaded = load("262 0 0 16 0 0 y t -3 1 2\n");
        let Element::Equation(e) = &loaded.circuit.elements()[0] else {
            panic!("expected an equation");
        };
        assert!(e.params.is_empty());
        assert!(loaded.warnings[0].contains("parameter count"));
    }

    #[test]
    fn test_missing_header_uses_defaults() {
        let loaded = load("w 0 0 16 0 0");
        assert_eq!(loaded.options, FileOptions::default());
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_file("/nonexistent/circuit.txt").unwrap_err();
        assert!(matches!(err, SimError::FileReadError { .. }));
    }
}
