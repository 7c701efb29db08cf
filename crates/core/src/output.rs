//! The output expression language and grid writers.
//!
//! A small hand-written recursive-descent parser turns each output
//! variable's expression text into an AST once at Init; no
//! parser-combinator dependency is needed for a grammar this small.

use crate::cell::Cell;
use crate::error::OutputError;
use crate::mechanism::Mechanism;
use std::collections::BTreeMap;

/// One parsed output expression's AST.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Num(f64),
    Var(String),
    Neg(Box<Expr>),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    Div(Box<Expr>, Box<Expr>),
    /// `name(args...)`: `exp`, `log`, `coxHazard`, `loglogRR`.
    Call(String, Vec<Expr>),
    /// `{sum(inner)}`: a whole-grid reduction, evaluated once before the
    /// per-cell pass and substituted as a constant.
    GlobalSum(Box<Expr>),
}

impl Expr {
    /// Every bare variable name this expression references, for
    /// `CheckOutputVars`.
    fn collect_vars<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::Num(_) => {}
            Expr::Var(name) => out.push(name),
            Expr::Neg(e) | Expr::GlobalSum(e) => e.collect_vars(out),
            Expr::Add(a, b) | Expr::Sub(a, b) | Expr::Mul(a, b) | Expr::Div(a, b) => {
                a.collect_vars(out);
                b.collect_vars(out);
            }
            Expr::Call(_, args) => {
                for a in args {
                    a.collect_vars(out);
                }
            }
        }
    }
}

/// Parse an output expression.
///
/// # Errors
/// Returns [`OutputError::ParseError`] on malformed input.
pub fn parse(src: &str) -> Result<Expr, OutputError> {
    let tokens = tokenize(src)?;
    let mut pos = 0;
    let expr = parse_expr(&tokens, &mut pos, src)?;
    if pos != tokens.len() {
        return Err(OutputError::ParseError {
            expr: src.to_string(),
            detail: "unexpected trailing tokens".to_string(),
        });
    }
    Ok(expr)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
    LBrace,
    RBrace,
    Comma,
}

fn tokenize(src: &str) -> Result<Vec<Token>, OutputError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = src.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '{' => {
                tokens.push(Token::LBrace);
                i += 1;
            }
            '}' => {
                tokens.push(Token::RBrace);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let value = text.parse::<f64>().map_err(|e| OutputError::ParseError {
                    expr: src.to_string(),
                    detail: format!("bad number `{text}`: {e}"),
                })?;
                tokens.push(Token::Num(value));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => {
                return Err(OutputError::ParseError {
                    expr: src.to_string(),
                    detail: format!("unexpected character `{other}`"),
                })
            }
        }
    }
    Ok(tokens)
}

fn parse_expr(tokens: &[Token], pos: &mut usize, src: &str) -> Result<Expr, OutputError> {
    let mut lhs = parse_term(tokens, pos, src)?;
    loop {
        match tokens.get(*pos) {
            Some(Token::Plus) => {
                *pos += 1;
                let rhs = parse_term(tokens, pos, src)?;
                lhs = Expr::Add(Box::new(lhs), Box::new(rhs));
            }
            Some(Token::Minus) => {
                *pos += 1;
                let rhs = parse_term(tokens, pos, src)?;
                lhs = Expr::Sub(Box::new(lhs), Box::new(rhs));
            }
            _ => break,
        }
    }
    Ok(lhs)
}

fn parse_term(tokens: &[Token], pos: &mut usize, src: &str) -> Result<Expr, OutputError> {
    let mut lhs = parse_factor(tokens, pos, src)?;
    loop {
        match tokens.get(*pos) {
            Some(Token::Star) => {
                *pos += 1;
                let rhs = parse_factor(tokens, pos, src)?;
                lhs = Expr::Mul(Box::new(lhs), Box::new(rhs));
            }
            Some(Token::Slash) => {
                *pos += 1;
                let rhs = parse_factor(tokens, pos, src)?;
                lhs = Expr::Div(Box::new(lhs), Box::new(rhs));
            }
            _ => break,
        }
    }
    Ok(lhs)
}

fn parse_factor(tokens: &[Token], pos: &mut usize, src: &str) -> Result<Expr, OutputError> {
    match tokens.get(*pos) {
        Some(Token::Minus) => {
            *pos += 1;
            Ok(Expr::Neg(Box::new(parse_factor(tokens, pos, src)?)))
        }
        _ => parse_primary(tokens, pos, src),
    }
}

fn parse_primary(tokens: &[Token], pos: &mut usize, src: &str) -> Result<Expr, OutputError> {
    match tokens.get(*pos).cloned() {
        Some(Token::Num(v)) => {
            *pos += 1;
            Ok(Expr::Num(v))
        }
        Some(Token::LParen) => {
            *pos += 1;
            let inner = parse_expr(tokens, pos, src)?;
            expect(tokens, pos, &Token::RParen, src)?;
            Ok(inner)
        }
        Some(Token::LBrace) => {
            *pos += 1;
            expect_sum_ident(tokens, pos, src)?;
            expect(tokens, pos, &Token::LParen, src)?;
            let inner = parse_expr(tokens, pos, src)?;
            expect(tokens, pos, &Token::RParen, src)?;
            expect(tokens, pos, &Token::RBrace, src)?;
            Ok(Expr::GlobalSum(Box::new(inner)))
        }
        Some(Token::Ident(name)) => {
            *pos += 1;
            if tokens.get(*pos) == Some(&Token::LParen) {
                *pos += 1;
                let mut args = Vec::new();
                if tokens.get(*pos) != Some(&Token::RParen) {
                    loop {
                        args.push(parse_expr(tokens, pos, src)?);
                        if tokens.get(*pos) == Some(&Token::Comma) {
                            *pos += 1;
                        } else {
                            break;
                        }
                    }
                }
                expect(tokens, pos, &Token::RParen, src)?;
                Ok(Expr::Call(name, args))
            } else {
                Ok(Expr::Var(name))
            }
        }
        other => Err(OutputError::ParseError {
            expr: src.to_string(),
            detail: format!("unexpected token {other:?}"),
        }),
    }
}

/// `{...}` only ever wraps a `sum(...)` reduction; check for that
/// literal identifier rather than accepting any call name.
fn expect_sum_ident(tokens: &[Token], pos: &mut usize, src: &str) -> Result<(), OutputError> {
    match tokens.get(*pos) {
        Some(Token::Ident(name)) if name == "sum" => {
            *pos += 1;
            Ok(())
        }
        other => Err(OutputError::ParseError {
            expr: src.to_string(),
            detail: format!("expected `sum(...)` inside `{{...}}`, found {other:?}"),
        }),
    }
}

fn expect(tokens: &[Token], pos: &mut usize, want: &Token, src: &str) -> Result<(), OutputError> {
    if tokens.get(*pos) == Some(want) {
        *pos += 1;
        Ok(())
    } else {
        Err(OutputError::ParseError { expr: src.to_string(), detail: format!("expected {want:?}") })
    }
}

/// `sum(var)` over every cell, the only reduction the expression
/// language supports.
fn eval_sum(inner: &Expr, cells: &[Cell], mechanism: &dyn Mechanism) -> Result<f64, OutputError> {
    let mut total = 0.0;
    for cell in cells {
        total += eval(inner, cell, mechanism, None)?;
    }
    Ok(total)
}

/// Evaluate `expr` against one cell. `globals` supplies precomputed
/// `GlobalSum` values (keyed by their textual form); pass `None` while
/// computing those globals themselves.
fn eval(expr: &Expr, cell: &Cell, mechanism: &dyn Mechanism, globals: Option<&BTreeMap<String, f64>>) -> Result<f64, OutputError> {
    match expr {
        Expr::Num(v) => Ok(*v),
        Expr::Var(name) => resolve_var(name, cell, mechanism),
        Expr::Neg(e) => Ok(-eval(e, cell, mechanism, globals)?),
        Expr::Add(a, b) => Ok(eval(a, cell, mechanism, globals)? + eval(b, cell, mechanism, globals)?),
        Expr::Sub(a, b) => Ok(eval(a, cell, mechanism, globals)? - eval(b, cell, mechanism, globals)?),
        Expr::Mul(a, b) => Ok(eval(a, cell, mechanism, globals)? * eval(b, cell, mechanism, globals)?),
        Expr::Div(a, b) => Ok(eval(a, cell, mechanism, globals)? / eval(b, cell, mechanism, globals)?),
        Expr::Call(name, args) => eval_call(name, args, cell, mechanism, globals),
        Expr::GlobalSum(inner) => {
            let key = format!("{inner:?}");
            globals
.and_then(|g| g.get(&key).copied())
.ok_or_else(|| OutputError::ParseError { expr: key.clone(), detail: "global sum not precomputed".to_string() })
        }
    }
}

fn eval_call(name: &str, args: &[Expr], cell: &Cell, mechanism: &dyn Mechanism, globals: Option<&BTreeMap<String, f64>>) -> Result<f64, OutputError> {
    let values: Vec<f64> = args.iter().map(|a| eval(a, cell, mechanism, globals)).collect::<Result<_, _>>()?;
    match (name, values.as_slice()) {
        ("exp", [x]) => Ok(x.exp()),
        ("log", [x]) => Ok(x.ln()),
        ("loglogRR", [c]) => Ok(*c),
        ("coxHazard", [c, pop, mort]) => {
            Ok(((1.078_f64.ln() / 10.0 * c).exp() - 1.0) * pop * mort / 1e5)
        }
        _ => Err(OutputError::UnknownVariable(format!("{name}({})", args.len()))),
    }
}

fn resolve_var(name: &str, cell: &Cell, mechanism: &dyn Mechanism) -> Result<f64, OutputError> {
    if let Some(v) = mechanism.value(cell, name) {
        return Ok(v);
    }
    if let Some(builtin) = crate::mechanism::BuiltinVar::parse(name) {
        return Ok(builtin.resolve(cell));
    }
    match name {
        "Population" => Ok(cell.total_population()),
        _ => cell
.population
.get(name)
.or_else(|| cell.mortality.get(name))
.copied()
.ok_or_else(|| OutputError::UnknownVariable(name.to_string())),
    }
}

/// Fail fast if any referenced variable is not resolvable. Runs a trial evaluation against an empty
/// placeholder cell; any error other than "unknown variable" is
/// swallowed since build-time placeholder arithmetic (e.g. division by
/// a population that happens to be zero) is not a configuration error.
///
/// # Errors
/// Returns the first unresolvable variable name found.
pub fn check_output_vars(output_vars: &BTreeMap<String, String>, exprs: &BTreeMap<String, Expr>, mechanism: &dyn Mechanism, sample_cell: &Cell) -> Result<(), OutputError> {
    for (name, _) in output_vars {
        let Some(expr) = exprs.get(name) else {
            return Err(OutputError::UnknownVariable(name.clone()));
        };
        let mut vars = Vec::new();
        expr.collect_vars(&mut vars);
        for var in vars {
            resolve_var(var, sample_cell, mechanism)?;
        }
    }
    Ok(())
}

/// A compiled output variable: its parsed expression plus precomputed
/// global-sum constants, ready for repeated per-cell evaluation.
pub struct CompiledOutput {
    expr: Expr,
    globals: BTreeMap<String, f64>,
}

impl CompiledOutput {
    /// Parse `src` and precompute any `{sum(...)}` reductions it
    /// contains against `cells`.
    ///
    /// # Errors
    /// Returns [`OutputError::ParseError`] on malformed input.
    pub fn compile(src: &str, cells: &[Cell], mechanism: &dyn Mechanism) -> Result<Self, OutputError> {
        let expr = parse(src)?;
        let mut globals = BTreeMap::new();
        collect_global_sums(&expr, cells, mechanism, &mut globals)?;
        Ok(CompiledOutput { expr, globals })
    }

    /// Evaluate against one cell.
    ///
    /// # Errors
    /// Returns [`OutputError`] if the expression references an
    /// unresolvable variable.
    pub fn evaluate(&self, cell: &Cell, mechanism: &dyn Mechanism) -> Result<f64, OutputError> {
        eval(&self.expr, cell, mechanism, Some(&self.globals))
    }
}

fn collect_global_sums(expr: &Expr, cells: &[Cell], mechanism: &dyn Mechanism, out: &mut BTreeMap<String, f64>) -> Result<(), OutputError> {
    match expr {
        Expr::GlobalSum(inner) => {
            let key = format!("{inner:?}");
            if !out.contains_key(&key) {
                let value = eval_sum(inner, cells, mechanism)?;
                out.insert(key, value);
            }
        }
        Expr::Neg(e) => collect_global_sums(e, cells, mechanism, out)?,
        Expr::Add(a, b) | Expr::Sub(a, b) | Expr::Mul(a, b) | Expr::Div(a, b) => {
            collect_global_sums(a, cells, mechanism, out)?;
            collect_global_sums(b, cells, mechanism, out)?;
        }
        Expr::Call(_, args) => {
            for a in args {
                collect_global_sums(a, cells, mechanism, out)?;
            }
        }
        Expr::Num(_) | Expr::Var(_) => {}
    }
    Ok(())
}

/// One output row: a cell's footprint plus its evaluated output columns.
pub struct OutputRow {
    pub geom: crate::geom::Poly,
    pub columns: BTreeMap<String, f64>,
}

/// Destination for evaluated output rows. `ShapefileWriter` is the
/// production implementation; `RecordingWriter` is for tests.
pub trait GridWriter {
    /// # Errors
    /// Returns [`OutputError::WriterIo`] on any underlying I/O failure.
    fn write_rows(&mut self, rows: &[OutputRow]) -> Result<(), OutputError>;
}

/// Collects rows in memory, for tests that assert on written output
/// without touching the filesystem.
#[derive(Debug, Default)]
pub struct RecordingWriter {
    pub rows: Vec<BTreeMap<String, f64>>,
}

impl GridWriter for RecordingWriter {
    fn write_rows(&mut self, rows: &[OutputRow]) -> Result<(), OutputError> {
        self.rows.extend(rows.iter().map(|r| r.columns.clone()));
        Ok(())
    }
}

/// Writes rows as a 2-D shapefile: one polygon per cell, one dbf column
/// per requested variable.
pub struct ShapefileWriter {
    path: std::path::PathBuf,
}

impl ShapefileWriter {
    #[must_use]
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        ShapefileWriter { path: path.into() }
    }
}

impl GridWriter for ShapefileWriter {
    fn write_rows(&mut self, rows: &[OutputRow]) -> Result<(), OutputError> {
        use shapefile::dbase::{FieldValue, Record};
        use shapefile::{Point, Polygon, PolygonRing, Writer};

        let mut writer = Writer::from_path(&self.path, shapefile::dbase::TableWriterBuilder::new())
.map_err(|e| OutputError::WriterIo(e.to_string()))?;

        for row in rows {
            let points: Vec<Point> = row.geom.exterior().points().map(|p| Point::new(p.x(), p.y())).collect();
            let polygon = Polygon::new(PolygonRing::Outer(points));

            let mut record = Record::default();
            for (name, value) in &row.columns {
                record.insert(name.clone(), FieldValue::Numeric(Some(*value)));
            }

            writer.write_shape_and_record(&polygon, &record).map_err(|e| OutputError::WriterIo(e.to_string()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::Meteorology;
    use crate::geom::rect;
    use crate::mechanism::TrivialChem;
    use crate::units::{Concentration, MetersPerSecond, PerSecond, VolumetricFlux};

    fn sample_cell(conc: f64, pop: f64) -> Cell {
        let mut population = std::collections::BTreeMap::new();
        population.insert("total".to_string(), pop);
        Cell {
            id: 0,
            layer: 0,
            geom: rect(0.0, 0.0, 1000.0, 1000.0),
            z_bottom: 0.0,
            z_top: 50.0,
            dx: 1000.0,
            dy: 1000.0,
            dz: 50.0,
            volume: 1000.0 * 1000.0 * 50.0,
            cf: vec![Concentration::new(conc)],
            ci: vec![Concentration::new(conc)],
            emis_flux: vec![VolumetricFlux::new(0.0)],
            met: Meteorology::default(),
            v_dep: vec![MetersPerSecond::new(0.0)],
            scavenging: vec![PerSecond::new(0.0)],
            population,
            mortality: Default::default(),
            west: vec![],
            east: vec![],
            south: vec![],
            north: vec![],
            below: vec![],
            above: vec![],
        }
    }

    #[test]
    fn parses_simple_arithmetic() {
        let expr = parse("1 + 2 * 3").unwrap();
        let mechanism = TrivialChem::new();
        let cell = sample_cell(0.0, 0.0);
        assert_eq!(eval(&expr, &cell, &mechanism, None).unwrap(), 7.0);
    }

    #[test]
    fn resolves_species_variable() {
        let expr = parse("Tracer").unwrap();
        let mechanism = TrivialChem::new();
        let cell = sample_cell(4.5, 0.0);
        assert_eq!(eval(&expr, &cell, &mechanism, None).unwrap(), 4.5);
    }

    #[test]
    fn unknown_variable_is_rejected_by_check() {
        let mechanism = TrivialChem::new();
        let cell = sample_cell(0.0, 0.0);
        let mut output_vars = BTreeMap::new();
        output_vars.insert("Bad".to_string(), "NotAThing".to_string());
        let mut exprs = BTreeMap::new();
        exprs.insert("Bad".to_string(), parse("NotAThing").unwrap());
        assert!(check_output_vars(&output_vars, &exprs, &mechanism, &cell).is_err());
    }

    #[test]
    fn global_sum_is_precomputed_once() {
        let mechanism = TrivialChem::new();
        let cells = vec![sample_cell(1.0, 0.0), sample_cell(2.0, 0.0), sample_cell(3.0, 0.0)];
        let compiled = CompiledOutput::compile("{sum(Tracer)}", &cells, &mechanism).unwrap();
        let value = compiled.evaluate(&cells[0], &mechanism).unwrap();
        assert_eq!(value, 6.0);
    }

    #[test]
    fn brace_without_sum_wrapper_is_rejected() {
        assert!(parse("{Tracer}").is_err());
    }

    #[test]
    fn cox_hazard_matches_formula() {
        let expr = parse("coxHazard(loglogRR(Tracer), Population, 0.01)").unwrap();
        let mechanism = TrivialChem::new();
        let cell = sample_cell(2.0, 1000.0);
        let expected = ((1.078_f64.ln() / 10.0 * 2.0).exp() - 1.0) * 1000.0 * 0.01 / 1e5;
        assert!((eval(&expr, &cell, &mechanism, None).unwrap() - expected).abs() < 1e-12);
    }
}
