// Formula evaluator - walks the parsed AST against a cell lookup

use std::cmp::Ordering;

use calcgrid_core::CellId;
use rustc_hash::{FxHashMap, FxHashSet};

use super::parser::{self, Expr, Op};

pub const ERR_CIRCULAR: &str = "#CIRCULAR";
pub const ERR_PARSE: &str = "#ERROR!";
pub const ERR_VALUE: &str = "#VALUE!";
pub const ERR_DIV0: &str = "#DIV/0!";
pub const ERR_NAME: &str = "#NAME?";

/// Formula evaluations allowed to nest on the native stack. Dependencies are
/// resolved ahead of time by `Evaluator::prime`, so only cycles come close.
const MAX_DEPTH: usize = 128;

/// Read access to raw cell input.
pub trait CellLookup {
    /// Raw text of the cell, `None` when the cell is absent.
    fn raw_value(&self, id: CellId) -> Option<&str>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum EvalResult {
    /// Reference to an absent or empty cell
    Empty,
    Number(f64),
    Text(String),
    Boolean(bool),
    Error(String),
}

impl EvalResult {
    /// Interpret raw literal input the way a referencing formula sees it.
    fn from_literal(raw: &str) -> EvalResult {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return EvalResult::Empty;
        }
        if let Ok(n) = trimmed.parse::<f64>() {
            return EvalResult::Number(n);
        }
        match trimmed.to_ascii_uppercase().as_str() {
            "TRUE" => EvalResult::Boolean(true),
            "FALSE" => EvalResult::Boolean(false),
            _ => EvalResult::Text(raw.to_string()),
        }
    }

    /// Convert result to a number (for arithmetic operations). Empty is 0.
    pub fn to_number(&self) -> Result<f64, String> {
        match self {
            EvalResult::Empty => Ok(0.0),
            EvalResult::Number(n) => Ok(*n),
            EvalResult::Boolean(b) => Ok(if *b { 1.0 } else { 0.0 }),
            EvalResult::Text(s) => s.trim().parse::<f64>().map_err(|_| ERR_VALUE.to_string()),
            EvalResult::Error(e) => Err(e.clone()),
        }
    }

    /// Convert result to a string (for text operations). Empty is "".
    pub fn to_text(&self) -> String {
        match self {
            EvalResult::Empty => String::new(),
            EvalResult::Number(n) => format_number(*n),
            EvalResult::Text(s) => s.clone(),
            EvalResult::Boolean(b) => if *b { "TRUE".to_string() } else { "FALSE".to_string() },
            EvalResult::Error(e) => e.clone(),
        }
    }

    pub fn to_bool(&self) -> Result<bool, String> {
        match self {
            EvalResult::Empty => Ok(false),
            EvalResult::Boolean(b) => Ok(*b),
            EvalResult::Number(n) => Ok(*n != 0.0),
            EvalResult::Text(s) => match s.to_ascii_uppercase().as_str() {
                "TRUE" => Ok(true),
                "FALSE" => Ok(false),
                _ => Err(ERR_VALUE.to_string()),
            },
            EvalResult::Error(e) => Err(e.clone()),
        }
    }

    /// Final rendering of a formula result. A bare empty reference shows as 0.
    pub fn to_display(&self) -> String {
        match self {
            EvalResult::Empty => "0".to_string(),
            other => other.to_text(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, EvalResult::Error(_))
    }
}

fn format_number(n: f64) -> String {
    if n.is_nan() || n.is_infinite() {
        ERR_VALUE.to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        let s = format!("{:.10}", n);
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    }
}

fn error(marker: &str) -> EvalResult {
    EvalResult::Error(marker.to_string())
}

/// Evaluate raw cell input. Input without a leading `=` is returned unchanged.
///
/// `bounds` is `(rows, columns)` of the sheet; references outside it read as
/// empty and the number of reference hops is capped at `rows * columns`.
pub fn evaluate<L: CellLookup + ?Sized>(raw: &str, lookup: &L, bounds: (usize, usize)) -> String {
    if !raw.starts_with('=') {
        return raw.to_string();
    }
    let mut ctx = Evaluator::new(lookup, bounds);
    ctx.eval_root(raw).to_display()
}

/// Evaluate the cell at `id`, treating it as already on the evaluation path so
/// that a formula referring to itself is caught.
pub fn evaluate_cell<L: CellLookup + ?Sized>(id: CellId, lookup: &L, bounds: (usize, usize)) -> String {
    let raw = lookup.raw_value(id).unwrap_or_default();
    if !raw.starts_with('=') {
        return raw.to_string();
    }
    let mut ctx = Evaluator::new(lookup, bounds);
    ctx.visiting.insert(id);
    ctx.eval_root(raw).to_display()
}

struct Evaluator<'a, L: CellLookup + ?Sized> {
    lookup: &'a L,
    rows: usize,
    cols: usize,
    /// Cells currently on the evaluation path
    visiting: FxHashSet<CellId>,
    /// Results of formula cells already evaluated in this pass
    memo: FxHashMap<CellId, EvalResult>,
    hops: usize,
    max_hops: usize,
    depth: usize,
}

impl<'a, L: CellLookup + ?Sized> Evaluator<'a, L> {
    fn new(lookup: &'a L, (rows, cols): (usize, usize)) -> Self {
        Self {
            lookup,
            rows,
            cols,
            visiting: FxHashSet::default(),
            memo: FxHashMap::default(),
            hops: 0,
            max_hops: rows.saturating_mul(cols).max(1),
            depth: 0,
        }
    }

    /// Top-level formula: settle its dependencies first, then evaluate.
    fn eval_root(&mut self, raw: &str) -> EvalResult {
        match parser::parse(raw) {
            Ok(expr) => {
                self.prime(&expr);
                self.eval(&expr)
            }
            Err(e) => {
                log::debug!("formula parse error in {:?}: {}", raw, e);
                error(ERR_PARSE)
            }
        }
    }

    /// Cell references of `expr`, ranges clipped to the sheet.
    fn references(&self, expr: &Expr, out: &mut Vec<CellId>) {
        match expr {
            Expr::CellRef(id) => out.push(*id),
            Expr::Range(range) => {
                if let Some(range) = range.clamped(self.rows, self.cols) {
                    out.extend(range.cells());
                }
            }
            Expr::Function { args, .. } => {
                for arg in args {
                    self.references(arg, out);
                }
            }
            Expr::BinaryOp { left, right, .. } => {
                self.references(left, out);
                self.references(right, out);
            }
            Expr::Empty | Expr::Number(_) | Expr::Text(_) | Expr::Boolean(_) => {}
        }
    }

    /// A formula cell that has not been evaluated and is not on the path.
    fn unresolved_formula(&self, id: CellId) -> Option<Expr> {
        if !self.in_bounds(id) || self.visiting.contains(&id) || self.memo.contains_key(&id) {
            return None;
        }
        let raw = self.lookup.raw_value(id)?;
        if !raw.starts_with('=') {
            return None;
        }
        // Unparseable cells still go through `resolve` to memoize #ERROR!
        Some(parser::parse(raw).unwrap_or(Expr::Empty))
    }

    /// Evaluate everything `expr` depends on, deepest first, from an explicit
    /// stack. Afterwards every non-cyclic dependency is memoized, so reference
    /// chains of any length never nest evaluation on the native stack.
    fn prime(&mut self, expr: &Expr) {
        let mut refs = Vec::new();
        self.references(expr, &mut refs);

        // (cell, dependencies already pushed)
        let mut stack: Vec<(CellId, bool)> = refs.into_iter().rev().map(|id| (id, false)).collect();
        let mut expanding: FxHashSet<CellId> = FxHashSet::default();

        while let Some((id, expanded)) = stack.pop() {
            if expanded {
                self.resolve(id);
                expanding.remove(&id);
                continue;
            }
            if expanding.contains(&id) {
                continue;
            }
            let Some(formula) = self.unresolved_formula(id) else {
                continue;
            };
            expanding.insert(id);
            stack.push((id, true));

            refs = Vec::new();
            self.references(&formula, &mut refs);
            for dep in refs.into_iter().rev() {
                // A dependency still expanding closes a cycle; `resolve` reports it
                if !expanding.contains(&dep) {
                    stack.push((dep, false));
                }
            }
        }
    }

    fn eval_formula(&mut self, raw: &str) -> EvalResult {
        match parser::parse(raw) {
            Ok(expr) => self.eval(&expr),
            Err(e) => {
                log::debug!("formula parse error in {:?}: {}", raw, e);
                error(ERR_PARSE)
            }
        }
    }

    fn in_bounds(&self, id: CellId) -> bool {
        id.row < self.rows && id.col < self.cols
    }

    fn resolve(&mut self, id: CellId) -> EvalResult {
        if !self.in_bounds(id) {
            return EvalResult::Empty;
        }
        if self.visiting.contains(&id) {
            return error(ERR_CIRCULAR);
        }
        if let Some(cached) = self.memo.get(&id) {
            return cached.clone();
        }
        let lookup = self.lookup;
        let raw = match lookup.raw_value(id) {
            Some(raw) => raw,
            None => return EvalResult::Empty,
        };
        if !raw.starts_with('=') {
            return EvalResult::from_literal(raw);
        }

        self.hops += 1;
        if self.hops > self.max_hops || self.depth >= MAX_DEPTH {
            return error(ERR_CIRCULAR);
        }
        self.visiting.insert(id);
        self.depth += 1;
        let result = self.eval_formula(raw);
        self.depth -= 1;
        self.visiting.remove(&id);
        self.memo.insert(id, result.clone());
        result
    }

    fn eval(&mut self, expr: &Expr) -> EvalResult {
        match expr {
            Expr::Empty => EvalResult::Empty,
            Expr::Number(n) => EvalResult::Number(*n),
            Expr::Text(s) => EvalResult::Text(s.clone()),
            Expr::Boolean(b) => EvalResult::Boolean(*b),
            Expr::CellRef(id) => self.resolve(*id),
            // Ranges are only meaningful as function arguments
            Expr::Range(_) => error(ERR_VALUE),
            Expr::Function { name, args } => self.eval_function(name, args),
            Expr::BinaryOp { op, left, right } => {
                let left = self.eval(left);
                if left.is_error() {
                    return left;
                }
                let right = self.eval(right);
                if right.is_error() {
                    return right;
                }
                binary_op(*op, &left, &right)
            }
        }
    }

    /// Every value an argument list produces, ranges expanded row-major.
    fn flatten(&mut self, args: &[Expr]) -> Vec<(EvalResult, bool)> {
        let mut out = Vec::new();
        for arg in args {
            match arg {
                // Cells past the sheet edge read as empty, so they are skipped
                Expr::Range(range) => {
                    if let Some(range) = range.clamped(self.rows, self.cols) {
                        for id in range.cells() {
                            out.push((self.resolve(id), true));
                        }
                    }
                }
                other => out.push((self.eval(other), false)),
            }
        }
        out
    }

    /// Numeric arguments. Text and booleans inside ranges are skipped; direct
    /// arguments must coerce.
    fn collect_numbers(&mut self, args: &[Expr]) -> Result<Vec<f64>, String> {
        let mut numbers = Vec::new();
        for (value, from_range) in self.flatten(args) {
            match value {
                EvalResult::Error(e) => return Err(e),
                EvalResult::Number(n) => numbers.push(n),
                EvalResult::Empty => {}
                _ if from_range => {}
                other => numbers.push(other.to_number()?),
            }
        }
        Ok(numbers)
    }

    fn eval_function(&mut self, name: &str, args: &[Expr]) -> EvalResult {
        match name {
            "SUM" => match self.collect_numbers(args) {
                Ok(values) => EvalResult::Number(values.iter().sum()),
                Err(e) => EvalResult::Error(e),
            },
            "AVERAGE" => match self.collect_numbers(args) {
                Ok(values) if values.is_empty() => error(ERR_DIV0),
                Ok(values) => EvalResult::Number(values.iter().sum::<f64>() / values.len() as f64),
                Err(e) => EvalResult::Error(e),
            },
            "MIN" | "MAX" => match self.collect_numbers(args) {
                Ok(values) if values.is_empty() => EvalResult::Number(0.0),
                Ok(values) => {
                    let pick: fn(f64, f64) -> f64 = if name == "MIN" { f64::min } else { f64::max };
                    let first = values[0];
                    EvalResult::Number(values.into_iter().fold(first, pick))
                }
                Err(e) => EvalResult::Error(e),
            },
            "COUNT" => {
                let count = self
                    .flatten(args)
                    .into_iter()
                    .filter(|(v, _)| matches!(v, EvalResult::Number(_)))
                    .count();
                EvalResult::Number(count as f64)
            }
            "ABS" => {
                if args.len() != 1 {
                    return error(ERR_VALUE);
                }
                match self.eval(&args[0]).to_number() {
                    Ok(n) => EvalResult::Number(n.abs()),
                    Err(e) => EvalResult::Error(e),
                }
            }
            "ROUND" => {
                if args.is_empty() || args.len() > 2 {
                    return error(ERR_VALUE);
                }
                let value = match self.eval(&args[0]).to_number() {
                    Ok(n) => n,
                    Err(e) => return EvalResult::Error(e),
                };
                let digits = match args.get(1).map(|a| self.eval(a).to_number()) {
                    None => 0,
                    Some(Ok(d)) => d.trunc() as i32,
                    Some(Err(e)) => return EvalResult::Error(e),
                };
                let factor = 10f64.powi(digits);
                EvalResult::Number((value * factor).round() / factor)
            }
            "IF" => {
                if args.is_empty() || args.len() > 3 {
                    return error(ERR_VALUE);
                }
                let cond = match self.eval(&args[0]).to_bool() {
                    Ok(b) => b,
                    Err(e) => return EvalResult::Error(e),
                };
                // Only the chosen branch is evaluated
                if cond {
                    args.get(1).map(|a| self.eval(a)).unwrap_or(EvalResult::Boolean(true))
                } else {
                    args.get(2).map(|a| self.eval(a)).unwrap_or(EvalResult::Boolean(false))
                }
            }
            "CONCAT" | "CONCATENATE" => {
                let mut out = String::new();
                for (value, _) in self.flatten(args) {
                    if value.is_error() {
                        return value;
                    }
                    out.push_str(&value.to_text());
                }
                EvalResult::Text(out)
            }
            "UPPER" | "LOWER" | "LEN" => {
                if args.len() != 1 {
                    return error(ERR_VALUE);
                }
                let value = self.eval(&args[0]);
                if value.is_error() {
                    return value;
                }
                let text = value.to_text();
                match name {
                    "UPPER" => EvalResult::Text(text.to_uppercase()),
                    "LOWER" => EvalResult::Text(text.to_lowercase()),
                    _ => EvalResult::Number(text.chars().count() as f64),
                }
            }
            _ => error(ERR_NAME),
        }
    }
}

fn binary_op(op: Op, left: &EvalResult, right: &EvalResult) -> EvalResult {
    match op {
        Op::Add | Op::Sub | Op::Mul | Op::Div | Op::Pow => {
            let (a, b) = match (left.to_number(), right.to_number()) {
                (Ok(a), Ok(b)) => (a, b),
                (Err(e), _) | (_, Err(e)) => return EvalResult::Error(e),
            };
            let result = match op {
                Op::Add => a + b,
                Op::Sub => a - b,
                Op::Mul => a * b,
                Op::Div => {
                    if b == 0.0 {
                        return error(ERR_DIV0);
                    }
                    a / b
                }
                _ => a.powf(b),
            };
            if result.is_finite() {
                EvalResult::Number(result)
            } else {
                error(ERR_VALUE)
            }
        }
        Op::Concat => EvalResult::Text(format!("{}{}", left.to_text(), right.to_text())),
        Op::Lt | Op::Gt | Op::Eq | Op::LtEq | Op::GtEq | Op::NotEq => {
            let ord = compare(left, right);
            let result = match op {
                Op::Lt => ord == Ordering::Less,
                Op::Gt => ord == Ordering::Greater,
                Op::Eq => ord == Ordering::Equal,
                Op::LtEq => ord != Ordering::Greater,
                Op::GtEq => ord != Ordering::Less,
                _ => ord != Ordering::Equal,
            };
            EvalResult::Boolean(result)
        }
    }
}

/// Numbers compare numerically, everything else as case-insensitive text.
fn compare(left: &EvalResult, right: &EvalResult) -> Ordering {
    let numeric = |v: &EvalResult| matches!(v, EvalResult::Number(_) | EvalResult::Boolean(_) | EvalResult::Empty);
    if numeric(left) && numeric(right) {
        if let (Ok(a), Ok(b)) = (left.to_number(), right.to_number()) {
            return a.partial_cmp(&b).unwrap_or(Ordering::Equal);
        }
    }
    left.to_text().to_lowercase().cmp(&right.to_text().to_lowercase())
}
