//! SFCR model text: a block format for stock-flow consistent models.
//!
//! ```text
//! @init
//!   timestep: 1
//! @end
//!
//! @equations Households x=176 y=24
//!   YD ~ W * N - T    # Disposable income
//!   H ~ YD - C + H[-1]
//! @end
//!
//! @matrix Balance x=176 y=120
//!   initial: 80, 0
//! | Transaction | H     | V |
//! |-------------|-------|---|
//! | Saving      | YD-C  | - |
//! @end
//!
//! @circuit
//! g 0 64 0 80 0
//! @end
//! ```
//!
//! `@equations` and `@parameters` blocks become equation tables. `@matrix`
//! blocks become stock tables with one stock per column whose flow is the sum
//! of the column's cells. `@circuit` lines are plain circuit-file lines.
//! `@info` and `@hints` are kept as [`ModelNotes`]; display-only blocks are
//! skipped with a debug log.

use std::collections::BTreeMap;
use std::ops::Range;

use tracing::{debug, warn};

use super::file::{read_line, FileOptions, LoadedCircuit};
use super::graph::Circuit;
use crate::elements::{
    CircuitElement, Element, ElementCore, EquationRow, EquationTable, StockColumn, StockTable,
};

/// Keywords that mark a model as SFCR text.
const BLOCK_KEYWORDS: [&str; 9] = [
    "@init",
    "@info",
    "@equations",
    "@parameters",
    "@matrix",
    "@hints",
    "@scope",
    "@circuit",
    "@sankey",
];

/// `@init` keys that only affect display.
const DISPLAY_SETTINGS: [&str; 8] = [
    "voltageRange",
    "voltageUnit",
    "timeUnit",
    "showToolbar",
    "showDots",
    "showVolts",
    "showValues",
    "showPower",
];

/// Header spellings of a matrix's computed total column.
const SUM_COLUMNS: [&str; 6] = ["Σ", "∑", "sigma", "sum", "total", "row total"];

const LAYOUT_X: i32 = 176;
const LAYOUT_TOP: i32 = 24;
const LAYOUT_GAP: i32 = 16;
const ROW_HEIGHT: i32 = 16;

const EXPORT_HEADER: &str = "# flowsim SFCR export\n\n";

/// Documentation that travels with an SFCR model.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelNotes {
    /// `@info` markdown
    pub info: Option<String>,
    /// Variable descriptions from `@hints` and trailing equation comments
    pub hints: BTreeMap<String, String>,
}

/// Whether any line opens an SFCR block.
pub fn is_sfcr(text: &str) -> bool {
    text.lines()
        .filter_map(|line| split_keyword(line.trim()))
        .any(|(keyword, _)| BLOCK_KEYWORDS.contains(&keyword))
}

/// Parse SFCR text. Like [`load`](super::load), bad lines warn and are
/// skipped rather than failing the whole model.
pub fn load_sfcr(text: &str) -> LoadedCircuit {
    let mut importer = Importer {
        lines: text.lines().collect(),
        next: 0,
        cursor_y: LAYOUT_TOP,
        loaded: LoadedCircuit {
            circuit: Circuit::new(),
            options: FileOptions::default(),
            notes: ModelNotes::default(),
            warnings: Vec::new(),
        },
    };
    importer.run();
    let loaded = importer.loaded;
    debug!(
        elements = loaded.circuit.len(),
        hints = loaded.notes.hints.len(),
        warnings = loaded.warnings.len(),
        "loaded sfcr model"
    );
    loaded
}

/// Write SFCR text in element order. Equation and stock tables become
/// blocks; everything else, and any table the block syntax cannot carry
/// exactly, goes into `@circuit` blocks.
pub fn dump_sfcr(circuit: &Circuit, options: &FileOptions, notes: &ModelNotes) -> String {
    let mut out = String::from(EXPORT_HEADER);
    if let Some(info) = &notes.info {
        out.push_str("@info\n");
        out.push_str(info);
        if !info.ends_with('\n') {
            out.push('\n');
        }
        out.push_str("@end\n\n");
    }
    out.push_str(&format!("@init\n  timestep: {}\n@end\n\n", options.time_step));

    let mut passthrough = Vec::new();
    for element in circuit.elements() {
        let block = match element {
            Element::EquationTable(table) => equations_text(table, notes),
            Element::StockTable(table) => matrix_text(table),
            _ => None,
        };
        match block {
            Some(text) => {
                flush_circuit(&mut out, &mut passthrough);
                out.push_str(&text);
                out.push('\n');
            }
            None => passthrough.push(element.dump()),
        }
    }
    flush_circuit(&mut out, &mut passthrough);

    let hints: Vec<_> = notes
        .hints
        .iter()
        .filter(|(name, hint)| !name.contains(':') && !hint.contains('\n'))
        .collect();
    if !hints.is_empty() {
        out.push_str("@hints\n");
        for (name, hint) in hints {
            out.push_str(&format!("  {}: {}\n", name, hint));
        }
        out.push_str("@end\n");
    }
    out
}

struct Importer<'a> {
    lines: Vec<&'a str>,
    next: usize,
    cursor_y: i32,
    loaded: LoadedCircuit,
}

impl<'a> Importer<'a> {
    fn run(&mut self) {
        while let Some((line_no, raw)) = self.next_line() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('%') {
                continue;
            }
            let Some((keyword, rest)) = split_keyword(line) else {
                if line.contains("sfcr_matrix") || line.contains("sfcr_set") {
                    self.warn(line_no, "R-style sfcr definitions are not supported");
                } else {
                    debug!(line = line_no, "text outside a block ignored");
                }
                continue;
            };
            match keyword {
                "@init" => self.init_block(line_no, rest),
                "@equations" | "@parameters" => self.equations_block(line_no, &keyword[1..], rest),
                "@matrix" => self.matrix_block(line_no, rest),
                "@hints" => self.hints_block(),
                "@info" => self.info_block(rest),
                "@circuit" => self.circuit_block(),
                "@scope" => debug!(line = line_no, variable = rest, "scope display skipped"),
                "@sankey" => {
                    self.body();
                    debug!(line = line_no, "sankey display skipped");
                }
                "@end" => self.warn(line_no, "@end outside a block"),
                other => {
                    self.body();
                    self.warn(line_no, format!("unknown block {}", other));
                }
            }
        }
    }

    /// Next line with its 1-based number.
    fn next_line(&mut self) -> Option<(usize, &'a str)> {
        let raw = *self.lines.get(self.next)?;
        self.next += 1;
        Some((self.next, raw))
    }

    /// Lines up to the closing `@end`, or up to the next block keyword when
    /// `@end` is missing.
    fn body(&mut self) -> Vec<(usize, &'a str)> {
        let mut body = Vec::new();
        while let Some(&raw) = self.lines.get(self.next) {
            let line = raw.trim();
            if line.starts_with('@') {
                if split_keyword(line).is_some_and(|(keyword, _)| keyword == "@end") {
                    self.next += 1;
                }
                break;
            }
            self.next += 1;
            body.push((self.next, raw));
        }
        body
    }

    /// Body lines with blanks and `#` comments dropped, trimmed.
    fn content(&mut self) -> Vec<(usize, &'a str)> {
        self.body()
            .into_iter()
            .map(|(n, raw)| (n, raw.trim()))
            .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
            .collect()
    }

    fn warn(&mut self, line_no: usize, message: impl Into<String>) {
        let message = message.into();
        warn!(line = line_no, %message, "sfcr line skipped");
        self.loaded.warnings.push(format!("line {}: {}", line_no, message));
    }

    fn init_block(&mut self, line_no: usize, inline: &'a str) {
        let settings: Vec<(usize, &str, &str)> = if inline.is_empty() {
            self.content()
                .into_iter()
                .filter_map(|(n, line)| split_setting(line, [':', '=']).map(|(k, v)| (n, k, v)))
                .collect()
        } else {
            inline
                .split_whitespace()
                .filter_map(|part| split_setting(part, ['=', ':']).map(|(k, v)| (line_no, k, v)))
                .collect()
        };
        for (n, key, value) in settings {
            match key {
                "timestep" => match value.parse::<f64>() {
                    Ok(dt) if dt > 0.0 && dt.is_finite() => self.loaded.options.time_step = dt,
                    _ => self.warn(n, format!("bad timestep '{}'", value)),
                },
                _ if DISPLAY_SETTINGS.contains(&key) => debug!(key, value, "display setting ignored"),
                _ => self.warn(n, format!("unknown init setting '{}'", key)),
            }
        }
    }

    fn equations_block(&mut self, line_no: usize, default_name: &str, rest: &str) {
        let header = BlockHeader::parse(rest, default_name);
        let mut rows = Vec::new();
        for (n, line) in self.content() {
            let (code, comment) = match line.split_once('#') {
                Some((code, comment)) => (code.trim(), comment.trim()),
                None => (line, ""),
            };
            let Some((name, expr)) = code.split_once('~').or_else(|| code.split_once('=')) else {
                self.warn(n, format!("expected 'name ~ expression', got '{}'", code));
                continue;
            };
            let name = name.trim();
            let expr = convert_self_accumulation(name, &normalize_expression(expr));
            if !comment.is_empty() {
                self.loaded
                    .notes
                    .hints
                    .entry(name.to_string())
                    .or_insert_with(|| comment.to_string());
            }
            rows.push(EquationRow::new(name, &expr, None));
        }
        if rows.is_empty() {
            self.warn(line_no, "equations block has no equations");
            return;
        }
        let (x, y) = self.place(header.position);
        let y2 = y + (rows.len() as i32 + 2) * ROW_HEIGHT;
        let table = EquationTable::new(ElementCore::new(x, y, x + 200, y2, 0), header.title(), rows);
        self.add(table, y2);
    }

    fn matrix_block(&mut self, line_no: usize, rest: &str) {
        let header = BlockHeader::parse(rest, "matrix");
        let mut columns: Vec<String> = Vec::new();
        let mut initial: Vec<f64> = Vec::new();
        let mut gain = 1.0;
        let mut rows: Vec<Vec<String>> = Vec::new();
        let mut header_seen = false;

        for (n, line) in self.content() {
            if let Some(list) = line.strip_prefix("columns:") {
                columns = split_list(list);
            } else if let Some(list) = line.strip_prefix("initial:") {
                initial.clear();
                for value in split_list(list) {
                    initial.push(value.parse().unwrap_or_else(|_| {
                        self.warn(n, format!("bad initial value '{}'", value));
                        0.0
                    }));
                }
            } else if let Some(value) = line.strip_prefix("gain:") {
                match value.trim().parse::<f64>() {
                    Ok(g) if g.is_finite() => gain = g,
                    _ => self.warn(n, format!("bad gain '{}'", value.trim())),
                }
            } else if line.starts_with("codes:") || line.starts_with("type:") {
                debug!(line = n, "matrix display setting ignored");
            } else if line.starts_with('|') {
                if line.contains("---") {
                    continue;
                }
                let cells = table_cells(line);
                if cells.len() < 2 {
                    continue;
                }
                if header_seen {
                    rows.push(cells);
                } else {
                    header_seen = true;
                    if columns.is_empty() {
                        columns = cells[1..].to_vec();
                    }
                }
            } else {
                self.warn(n, format!("unexpected matrix line '{}'", line));
            }
        }

        if columns.last().is_some_and(|c| is_sum_column(c)) {
            columns.pop();
        }
        if columns.is_empty() || rows.is_empty() {
            self.warn(line_no, "matrix needs a header and at least one row");
            return;
        }

        let stocks: Vec<StockColumn> = columns
            .iter()
            .enumerate()
            .map(|(j, stock)| {
                let terms: Vec<String> = rows
                    .iter()
                    .filter_map(|cells| cells.get(j + 1))
                    .map(|cell| cell.trim())
                    .filter(|cell| !cell.is_empty() && *cell != "-" && *cell != "0")
                    .map(normalize_expression)
                    .collect();
                StockColumn::new(stock.as_str(), &join_terms(&terms), initial.get(j).copied().unwrap_or(0.0))
            })
            .collect();

        let (x, y) = self.place(header.position);
        let y2 = y + (stocks.len() as i32 + 2) * ROW_HEIGHT;
        let table = StockTable::new(ElementCore::new(x, y, x + 400, y2, 0), header.title(), gain, stocks);
        self.add(table, y2);
    }

    fn hints_block(&mut self) {
        for (n, line) in self.content() {
            match line.split_once(':') {
                Some((name, hint)) if !name.trim().is_empty() => {
                    self.loaded
                        .notes
                        .hints
                        .insert(name.trim().to_string(), hint.trim().to_string());
                }
                _ => self.warn(n, format!("expected 'name: description', got '{}'", line)),
            }
        }
    }

    fn info_block(&mut self, title: &str) {
        let body = self.body();
        let has_heading = body.first().is_some_and(|(_, line)| line.trim().starts_with('#'));
        let mut info = String::new();
        if !has_heading && !title.is_empty() {
            info.push_str(&format!("# {}\n\n", title));
        }
        for (_, line) in body {
            info.push_str(line);
            info.push('\n');
        }
        self.loaded.notes.info = Some(info);
    }

    fn circuit_block(&mut self) {
        for (n, raw) in self.body() {
            if raw.trim().starts_with('#') {
                continue;
            }
            let loaded = &mut self.loaded;
            read_line(raw, n, &mut loaded.circuit, &mut loaded.options, &mut loaded.warnings);
        }
    }

    /// Top-left corner for the next block.
    fn place(&self, position: Option<(i32, i32)>) -> (i32, i32) {
        position.unwrap_or((LAYOUT_X, self.cursor_y))
    }

    fn add(&mut self, element: impl Into<Element>, bottom: i32) {
        self.loaded.circuit.add(element);
        self.cursor_y = bottom + LAYOUT_GAP;
    }
}

/// `@keyword name x=.. y=..`
struct BlockHeader {
    name: String,
    position: Option<(i32, i32)>,
}

impl BlockHeader {
    fn parse(rest: &str, default_name: &str) -> Self {
        let (mut x, mut y) = (None, None);
        let mut words = Vec::new();
        for part in rest.split_whitespace() {
            let lower = part.to_ascii_lowercase();
            if let Some(v) = lower.strip_prefix("x=") {
                x = v.parse().ok().or(x);
            } else if let Some(v) = lower.strip_prefix("y=") {
                y = v.parse().ok().or(y);
            } else {
                words.push(part);
            }
        }
        let name = if words.is_empty() {
            default_name.to_string()
        } else {
            words.join(" ")
        };
        Self {
            name,
            position: x.zip(y),
        }
    }

    /// Table title; underscores read as spaces.
    fn title(&self) -> String {
        self.name.replace('_', " ")
    }
}

fn split_keyword(line: &str) -> Option<(&str, &str)> {
    if !line.starts_with('@') {
        return None;
    }
    Some(match line.split_once(char::is_whitespace) {
        Some((keyword, rest)) => (keyword, rest.trim()),
        None => (line, ""),
    })
}

/// `key<sep>value` with the first separator in `separators` that occurs.
/// Trailing `#` comments are dropped from the value.
fn split_setting(text: &str, separators: [char; 2]) -> Option<(&str, &str)> {
    let (key, value) = separators.iter().find_map(|&sep| text.split_once(sep))?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    let value = value.split('#').next().unwrap_or("").trim();
    Some((key, value))
}

fn split_list(text: &str) -> Vec<String> {
    text.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// `| a | b | c |` as `["a", "b", "c"]`, without trailing empty cells.
fn table_cells(line: &str) -> Vec<String> {
    let inner = line.strip_prefix('|').unwrap_or(line);
    let inner = inner.strip_suffix('|').unwrap_or(inner);
    let mut cells: Vec<String> = inner.split('|').map(|c| c.trim().to_string()).collect();
    while cells.last().is_some_and(|c| c.is_empty()) {
        cells.pop();
    }
    cells
}

fn is_sum_column(name: &str) -> bool {
    let name = name.trim();
    SUM_COLUMNS.iter().any(|s| name.eq_ignore_ascii_case(s))
}

/// Sum of matrix cells. Multi-term sums parenthesize signed cells.
fn join_terms(terms: &[String]) -> String {
    match terms {
        [] => "0".to_string(),
        [single] => single.clone(),
        _ => terms
            .iter()
            .map(|t| {
                if t.contains(|c: char| c == '+' || c == '-') {
                    format!("({})", t)
                } else {
                    t.clone()
                }
            })
            .collect::<Vec<_>>()
            .join(" + "),
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Rewrite operator spellings: `d(x)` and `∆(x)` to `diff(x)`, `∫(x)` to
/// `integrate(x)`. Only at the start of a name, so `mod(` stays.
fn normalize_expression(expr: &str) -> String {
    const REWRITES: [(&str, &str); 3] = [("d(", "diff("), ("∆(", "diff("), ("∫(", "integrate(")];
    let expr = expr.trim();
    let mut out = String::with_capacity(expr.len());
    let mut i = 0;
    let mut after_ident = false;
    while let Some(c) = expr[i..].chars().next() {
        if !after_ident {
            if let Some((from, to)) = REWRITES.iter().find(|(from, _)| expr[i..].starts_with(from)) {
                out.push_str(to);
                i += from.len();
                continue;
            }
        }
        out.push(c);
        after_ident = is_ident_char(c);
        i += c.len_utf8();
    }
    out
}

/// Every `name[-1]`: the byte range it covers and the name.
fn lagged_names(expr: &str) -> Vec<(Range<usize>, &str)> {
    let mut found = Vec::new();
    let mut from = 0;
    while let Some(offset) = expr[from..].find("[-1]") {
        let at = from + offset;
        let before = expr[..at].trim_end();
        let start = before
            .char_indices()
            .rev()
            .take_while(|(_, c)| is_ident_char(*c))
            .last()
            .map_or(before.len(), |(i, _)| i);
        if start < before.len() {
            found.push((start..at + 4, &before[start..]));
        }
        from = at + 4;
    }
    found
}

/// `X ~ e + X[-1]` accumulates, so it becomes `X ~ integrate(e)`. Any other
/// `V[-1]` reads the previous step as `last(V)`.
fn convert_self_accumulation(name: &str, expr: &str) -> String {
    let lags = lagged_names(expr);
    if lags.is_empty() {
        return expr.to_string();
    }
    let mut out = expr.to_string();
    let mut accumulates = false;
    for (range, lagged) in lags.into_iter().rev() {
        if lagged == name && is_term(&out, &range) {
            accumulates = true;
            remove_term(&mut out, range);
        } else {
            out.replace_range(range, &format!("last({})", lagged));
        }
    }
    if !accumulates {
        return out;
    }
    let remaining = out.trim().trim_matches('+').trim();
    if remaining.is_empty() {
        name.to_string()
    } else {
        format!("integrate({})", remaining)
    }
}

/// Whether `range` stands alone as a summand.
fn is_term(text: &str, range: &Range<usize>) -> bool {
    let before = text[..range.start].trim_end();
    let after = text[range.end..].trim_start();
    (before.is_empty() || before.ends_with('+'))
        && (after.is_empty() || after.starts_with(|c: char| c == '+' || c == '-'))
}

/// Cut `range` out of `text` together with the `+` joining it to a
/// neighbouring term.
fn remove_term(text: &mut String, range: Range<usize>) {
    let before = text[..range.start].trim_end();
    if before.ends_with('+') {
        let start = before.len() - 1;
        text.replace_range(start..range.end, "");
        return;
    }
    let after = &text[range.end..];
    let trimmed = after.trim_start();
    if trimmed.starts_with('+') {
        let end = range.end + (after.len() - trimmed.len()) + 1;
        text.replace_range(range.start..end, "");
    } else {
        text.replace_range(range, "");
    }
}

/// Block name for `title`, or `None` when reading it back would change it.
fn block_name(title: &str) -> Option<String> {
    let name = title.split_whitespace().collect::<Vec<_>>().join("_");
    let positional = title.split_whitespace().any(|w| {
        let w = w.to_ascii_lowercase();
        w.starts_with("x=") || w.starts_with("y=")
    });
    (!name.is_empty() && !title.contains('_') && !positional && name.replace('_', " ") == title).then_some(name)
}

/// Whether importing `expr` gives back `expr` unchanged.
fn survives_import(name: &str, expr: &str) -> bool {
    !expr.contains(|c: char| matches!(c, '#' | '|' | '\n')) && convert_self_accumulation(name, &normalize_expression(expr)) == expr
}

fn equations_text(table: &EquationTable, notes: &ModelNotes) -> Option<String> {
    let title = block_name(&table.table_name)?;
    let exportable = !table.rows.is_empty()
        && table.rows.iter().all(|row| {
            row.initial_equation().is_none()
                && !row.name.is_empty()
                && !row.name.contains(|c: char| matches!(c, '~' | '=' | '#' | '@') || c.is_whitespace())
                && survives_import(&row.name, row.equation())
        });
    if !exportable {
        return None;
    }
    let core = table.core();
    let mut out = format!("@equations {} x={} y={}\n", title, core.x1, core.y1);
    for row in &table.rows {
        out.push_str(&format!("  {} ~ {}", row.name, row.equation()));
        if let Some(hint) = notes.hints.get(&row.name).filter(|h| !h.contains('\n')) {
            out.push_str(&format!("  # {}", hint));
        }
        out.push('\n');
    }
    out.push_str("@end\n");
    Some(out)
}

fn matrix_text(table: &StockTable) -> Option<String> {
    let title = block_name(&table.table_name)?;
    let exportable = !table.columns.is_empty()
        && !table.columns.last().is_some_and(|c| is_sum_column(&c.stock))
        && table.columns.iter().all(|col| {
            !col.stock.is_empty()
                && !col.stock.contains(|c: char| c == '|' || c == '#' || c == ',' || c.is_whitespace())
                && survives_import(&col.stock, col.flow())
        });
    if !exportable {
        return None;
    }
    let core = table.core();
    let mut out = format!("@matrix {} x={} y={}\n", title, core.x1, core.y1);
    if table.gain != 1.0 {
        out.push_str(&format!("  gain: {}\n", table.gain));
    }
    let initial: Vec<String> = table.columns.iter().map(|c| c.initial.to_string()).collect();
    out.push_str(&format!("  initial: {}\n", initial.join(", ")));

    out.push_str("| Transaction |");
    for col in &table.columns {
        out.push_str(&format!(" {} |", col.stock));
    }
    out.push_str("\n|-------------|");
    out.push_str(&"------|".repeat(table.columns.len()));
    out.push_str("\n| Flow |");
    for col in &table.columns {
        out.push_str(&format!(" {} |", col.flow()));
    }
    out.push_str("\n@end\n");
    Some(out)
}

fn flush_circuit(out: &mut String, lines: &mut Vec<String>) {
    if lines.is_empty() {
        return;
    }
    out.push_str("@circuit\n");
    for line in lines.drain(..) {
        out.push_str(&line);
        out.push('\n');
    }
    out.push_str("@end\n\n");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::dump;

    const MODEL: &str = "\
# Model SIM, reduced
% author note

@init
  timestep: 1   # one period
  showDots: true
@end

@info Model SIM
Households save part of income.
@end

@parameters
  alpha1 = 0.6
  G ~ 20
@end

@equations Households
  YD ~ W - T   # Disposable income
  H ~ YD - C + H[-1]
  Cl ~ C[-1]
@end

@matrix Balance
  columns: Households, Government, Sum
| Transaction | Households | Government | Sum |
|---|---|---|---|
| Taxes | -T | +T | 0 |
| Wages | W | - | |
| Spending | | -G | |
@end

@scope H

@circuit
g 0 64 0 80 0
@end

@hints
  G: Government spending
@end
";

    fn equations(loaded: &LoadedCircuit, index: usize) -> &EquationTable {
        match &loaded.circuit.elements()[index] {
            Element::EquationTable(t) => t,
            other => panic!("expected an equation table, got {:?}", other),
        }
    }

    #[test]
    fn test_detects_block_markers() {
        assert!(is_sfcr(MODEL));
        assert!(is_sfcr("  @init timestep=0.5\n"));
        assert!(!is_sfcr("$ 1 0.01\ng 0 64 0 80 0\n@end\n"));
        assert!(!is_sfcr("262 0 0 16 0 0 y a@b 0\n"));
    }

    #[test]
    fn test_imports_blocks() {
        let loaded = load_sfcr(MODEL);
        assert!(loaded.warnings.is_empty(), "{:?}", loaded.warnings);
        assert_eq!(loaded.options.time_step, 1.0);
        assert_eq!(loaded.circuit.len(), 4);

        let params = equations(&loaded, 0);
        assert_eq!(params.table_name, "parameters");
        assert_eq!(params.rows[0].name, "alpha1");
        assert_eq!(params.rows[1].equation(), "20");

        let households = equations(&loaded, 1);
        assert_eq!(households.table_name, "Households");
        assert_eq!(households.rows[1].equation(), "integrate(YD - C)");
        assert_eq!(households.rows[2].equation(), "last(C)");

        let Element::StockTable(balance) = &loaded.circuit.elements()[2] else {
            panic!("expected a stock table");
        };
        assert_eq!(balance.columns.len(), 2);
        assert_eq!(balance.columns[0].stock, "Households");
        assert_eq!(balance.columns[0].flow(), "(-T) + W");
        assert_eq!(balance.columns[1].flow(), "(+T) + (-G)");
        assert!(matches!(loaded.circuit.elements()[3], Element::Ground(_)));

        assert_eq!(loaded.notes.hints["YD"], "Disposable income");
        assert_eq!(loaded.notes.hints["G"], "Government spending");
        assert_eq!(loaded.notes.info.as_deref(), Some("# Model SIM\n\nHouseholds save part of income.\n"));
    }

    #[test]
    fn test_auto_layout_stacks_blocks() {
        let loaded = load_sfcr("@equations\n a ~ 1\n@end\n@equations B x=10 y=500\n b ~ 2\n@end\n@equations\n c ~ 3\n@end\n");
        let cores: Vec<(i32, i32)> = loaded.circuit.elements().iter().map(|e| (e.core().x1, e.core().y1)).collect();
        assert_eq!(cores, vec![(176, 24), (10, 500), (176, 564)]);
    }

    #[test]
    fn test_round_trip() {
        let first = load_sfcr(MODEL);
        let text = dump_sfcr(&first.circuit, &first.options, &first.notes);
        let second = load_sfcr(&text);
        assert!(second.warnings.is_empty(), "{:?}", second.warnings);
        assert_eq!(dump(&second.circuit, &second.options), dump(&first.circuit, &first.options));
        assert_eq!(second.notes, first.notes);
        assert_eq!(dump_sfcr(&second.circuit, &second.options, &second.notes), text);
    }

    #[test]
    fn test_unrepresentable_tables_pass_through() {
        let mut circuit = Circuit::new();
        circuit.add(EquationTable::new(
            ElementCore::new(0, 0, 64, 0, 0),
            "seeded",
            vec![EquationRow::new("k", "k + 1", Some("5"))],
        ));
        circuit.add(StockTable::new(
            ElementCore::new(0, 80, 64, 80, 0),
            "my_bank",
            1.0,
            vec![StockColumn::new("cash", "1", 3.0)],
        ));
        let options = FileOptions::default();
        let text = dump_sfcr(&circuit, &options, &ModelNotes::default());
        assert!(!text.contains("@equations"));
        assert!(!text.contains("@matrix"));

        let back = load_sfcr(&text);
        assert_eq!(dump(&back.circuit, &back.options), dump(&circuit, &options));
    }

    #[test]
    fn test_bad_lines_warn() {
        let loaded = load_sfcr("@init\n timestep: -1\n colour: red\n@end\n@equations\n no separator\n@end\n@matrix\n| a | b |\n@end\n@bogus\n x\n@end\n");
        assert_eq!(loaded.warnings.len(), 6);
        assert_eq!(loaded.options.time_step, FileOptions::default().time_step);
        assert!(loaded.circuit.is_empty());
        assert!(loaded.warnings[0].starts_with("line 2:"));
    }

    #[test]
    fn test_expression_rewrites() {
        assert_eq!(normalize_expression(" d(x) + mod(a, 2) + ∫(y) "), "diff(x) + mod(a, 2) + integrate(y)");
        assert_eq!(convert_self_accumulation("H", "H[-1] + YD"), "integrate(YD)");
        assert_eq!(convert_self_accumulation("H", "H[-1]"), "H");
        assert_eq!(convert_self_accumulation("V", "a + YV[-1]"), "a + last(YV)");
        assert_eq!(convert_self_accumulation("H", "H[-1] - C"), "integrate(- C)");
        assert_eq!(convert_self_accumulation("V", "s*V [-1] + W[-1]"), "s*last(V) + last(W)");
    }
}
