//! Sandboxed interpreter.
//!
//! A call sees only its bound parameters and a fixed set of pure builtins.
//! There is no I/O, no clock and no shared state between calls. Every
//! evaluated expression and executed statement costs one step; a call that
//! exceeds its budget fails with [`EvalError::BudgetExhausted`].

use crate::ast::{
    AssignOp, BinaryOp, Binding, Body, Expr, Procedure, Property, Stmt, TemplatePart, UnaryOp,
};
use crate::value::{format_number, iso_string, parse_date, Value};
use chrono::{Datelike, NaiveDate, NaiveDateTime, TimeDelta, Timelike};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

/// Steps allowed per call unless the caller says otherwise.
pub const DEFAULT_STEP_BUDGET: u64 = 10_000;

/// Longest string a procedure may build.
pub const MAX_STRING_LEN: usize = 1 << 16;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("ReferenceError: {0}")]
    Reference(String),

    #[error("TypeError: {0}")]
    Type(String),

    #[error("RangeError: {0}")]
    Range(String),

    #[error("Uncaught {0}")]
    Thrown(String),

    #[error("step budget of {budget} exhausted")]
    BudgetExhausted { budget: u64 },
}

pub type Result<T> = std::result::Result<T, EvalError>;

impl Procedure {
    /// Evaluate the procedure for one row.
    ///
    /// `parent_names` and `args` are parallel: `args[i]` is the value of the
    /// parent called `parent_names[i]`.
    pub fn call(
        &self,
        binding: Binding,
        parent_names: &[String],
        args: &[Value],
        budget: u64,
    ) -> Result<Value> {
        let mut locals = HashMap::new();
        match binding {
            Binding::Positional => {
                for (i, param) in self.params.iter().enumerate() {
                    let value = args.get(i).cloned().unwrap_or(Value::Undefined);
                    locals.insert(param.clone(), Slot::mutable(value));
                }
            }
            Binding::Row => {
                let record: BTreeMap<String, Value> = parent_names
                    .iter()
                    .cloned()
                    .zip(args.iter().cloned())
                    .collect();
                if let Some(param) = self.params.first() {
                    locals.insert(param.clone(), Slot::mutable(Value::Record(record)));
                }
            }
        }

        let mut interp = Interpreter {
            locals,
            steps: 0,
            budget,
        };
        match &self.body {
            Body::Expr(expr) => interp.eval(expr),
            Body::Block(stmts) => match interp.exec_block(stmts)? {
                Flow::Return(value) => Ok(value),
                Flow::Normal => Ok(Value::Undefined),
            },
        }
    }

    /// Evaluate with the binding chosen by [`Procedure::binding_for`].
    pub fn call_row(&self, parent_names: &[String], args: &[Value], budget: u64) -> Result<Value> {
        self.call(self.binding_for(parent_names), parent_names, args, budget)
    }
}

struct Slot {
    value: Value,
    mutable: bool,
}

impl Slot {
    fn mutable(value: Value) -> Self {
        Self {
            value,
            mutable: true,
        }
    }
}

enum Flow {
    Normal,
    Return(Value),
}

struct Interpreter {
    locals: HashMap<String, Slot>,
    steps: u64,
    budget: u64,
}

impl Interpreter {
    fn tick(&mut self) -> Result<()> {
        self.steps += 1;
        if self.steps > self.budget {
            return Err(EvalError::BudgetExhausted {
                budget: self.budget,
            });
        }
        Ok(())
    }

    fn exec_block(&mut self, stmts: &[Stmt]) -> Result<Flow> {
        for stmt in stmts {
            if let Flow::Return(value) = self.exec(stmt)? {
                return Ok(Flow::Return(value));
            }
        }
        Ok(Flow::Normal)
    }

    fn exec(&mut self, stmt: &Stmt) -> Result<Flow> {
        self.tick()?;
        match stmt {
            Stmt::Declare {
                name,
                constant,
                init,
            } => {
                let value = match init {
                    Some(expr) => self.eval(expr)?,
                    None => Value::Undefined,
                };
                self.locals.insert(
                    name.clone(),
                    Slot {
                        value,
                        mutable: !constant,
                    },
                );
            }
            Stmt::Assign { name, op, value } => {
                let rhs = self.eval(value)?;
                let current = match self.locals.get(name) {
                    Some(slot) if !slot.mutable => {
                        return Err(EvalError::Type(
                            "Assignment to constant variable.".to_string(),
                        ))
                    }
                    Some(slot) => slot.value.clone(),
                    None => return Err(EvalError::Reference(format!("{name} is not defined"))),
                };
                let next = match op {
                    AssignOp::Set => rhs,
                    AssignOp::Add => add(&current, &rhs)?,
                    AssignOp::Sub => Value::Number(current.to_number() - rhs.to_number()),
                    AssignOp::Mul => Value::Number(current.to_number() * rhs.to_number()),
                    AssignOp::Div => Value::Number(current.to_number() / rhs.to_number()),
                };
                if let Some(slot) = self.locals.get_mut(name) {
                    slot.value = next;
                }
            }
            Stmt::If {
                test,
                then,
                otherwise,
            } => {
                let branch = if self.eval(test)?.truthy() {
                    then
                } else {
                    otherwise
                };
                return self.exec_block(branch);
            }
            Stmt::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr)?,
                    None => Value::Undefined,
                };
                return Ok(Flow::Return(value));
            }
            Stmt::Throw(expr) => {
                let value = self.eval(expr)?;
                return Err(EvalError::Thrown(thrown_message(&value)));
            }
            Stmt::Expr(expr) => {
                self.eval(expr)?;
            }
        }
        Ok(Flow::Normal)
    }

    fn eval(&mut self, expr: &Expr) -> Result<Value> {
        self.tick()?;
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Template(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        TemplatePart::Text(text) => out.push_str(text),
                        TemplatePart::Expr(expr) => out.push_str(&self.eval(expr)?.to_display()),
                    }
                    check_len(out.len())?;
                }
                Ok(Value::Str(out))
            }
            Expr::Array(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval(item)?);
                }
                Ok(Value::Array(values))
            }
            Expr::Ident(name) => self.lookup(name),
            Expr::Member {
                object,
                property,
                optional,
            } => {
                let target = self.eval(object)?;
                if *optional && target.is_nullish() {
                    return Ok(Value::Undefined);
                }
                let key = self.property_key(property)?;
                get_property(&target, &key)
            }
            Expr::Call { callee, args } => self.call(callee, args),
            Expr::New { class, args } => {
                let args = self.eval_args(args)?;
                match class.as_str() {
                    "Date" => construct_date(&args),
                    "Error" | "TypeError" | "RangeError" => Ok(Value::Record(BTreeMap::from([
                        ("name".to_string(), Value::Str(class.clone())),
                        (
                            "message".to_string(),
                            Value::Str(arg(&args, 0).to_display()),
                        ),
                    ]))),
                    other => Err(EvalError::Type(format!("{other} is not a constructor"))),
                }
            }
            Expr::Unary { op, operand } => {
                let value = self.eval(operand)?;
                Ok(match op {
                    UnaryOp::Neg => Value::Number(-value.to_number()),
                    UnaryOp::Plus => Value::Number(value.to_number()),
                    UnaryOp::Not => Value::Bool(!value.truthy()),
                    UnaryOp::TypeOf => Value::Str(value.type_of().to_string()),
                })
            }
            Expr::Binary { op, lhs, rhs } => self.binary(*op, lhs, rhs),
            Expr::Conditional {
                test,
                consequent,
                alternate,
            } => {
                if self.eval(test)?.truthy() {
                    self.eval(consequent)
                } else {
                    self.eval(alternate)
                }
            }
        }
    }

    fn lookup(&self, name: &str) -> Result<Value> {
        if let Some(slot) = self.locals.get(name) {
            return Ok(slot.value.clone());
        }
        match name {
            "Math" => Ok(Value::Record(BTreeMap::from([
                ("E".to_string(), Value::Number(std::f64::consts::E)),
                ("PI".to_string(), Value::Number(std::f64::consts::PI)),
            ]))),
            _ => Err(EvalError::Reference(format!("{name} is not defined"))),
        }
    }

    fn property_key(&mut self, property: &Property) -> Result<Value> {
        match property {
            Property::Name(name) => Ok(Value::Str(name.clone())),
            Property::Computed(expr) => self.eval(expr),
        }
    }

    fn eval_args(&mut self, args: &[Expr]) -> Result<Vec<Value>> {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.eval(arg)?);
        }
        Ok(values)
    }

    fn binary(&mut self, op: BinaryOp, lhs: &Expr, rhs: &Expr) -> Result<Value> {
        let left = self.eval(lhs)?;
        match op {
            BinaryOp::And => {
                return if left.truthy() { self.eval(rhs) } else { Ok(left) };
            }
            BinaryOp::Or => {
                return if left.truthy() { Ok(left) } else { self.eval(rhs) };
            }
            BinaryOp::Nullish => {
                return if left.is_nullish() {
                    self.eval(rhs)
                } else {
                    Ok(left)
                };
            }
            _ => {}
        }
        let right = self.eval(rhs)?;
        let (a, b) = (&left, &right);
        Ok(match op {
            BinaryOp::Add => add(a, b)?,
            BinaryOp::Sub => Value::Number(a.to_number() - b.to_number()),
            BinaryOp::Mul => Value::Number(a.to_number() * b.to_number()),
            BinaryOp::Div => Value::Number(a.to_number() / b.to_number()),
            BinaryOp::Rem => Value::Number(a.to_number() % b.to_number()),
            BinaryOp::Pow => Value::Number(a.to_number().powf(b.to_number())),
            BinaryOp::Lt => compare(a, b, |o| o.is_lt()),
            BinaryOp::Le => compare(a, b, |o| o.is_le()),
            BinaryOp::Gt => compare(a, b, |o| o.is_gt()),
            BinaryOp::Ge => compare(a, b, |o| o.is_ge()),
            BinaryOp::Eq => Value::Bool(a.loose_eq(b)),
            BinaryOp::Ne => Value::Bool(!a.loose_eq(b)),
            BinaryOp::StrictEq => Value::Bool(a.strict_eq(b)),
            BinaryOp::StrictNe => Value::Bool(!a.strict_eq(b)),
            BinaryOp::And | BinaryOp::Or | BinaryOp::Nullish => Value::Undefined,
        })
    }

    fn call(&mut self, callee: &Expr, args: &[Expr]) -> Result<Value> {
        match callee {
            Expr::Ident(name) if !self.locals.contains_key(name) => {
                let args = self.eval_args(args)?;
                call_global(name, &args)
            }
            Expr::Member {
                object,
                property,
                optional,
            } => {
                if let Expr::Ident(ns) = object.as_ref() {
                    if ns == "Math" && !self.locals.contains_key(ns) {
                        let key = self.property_key(property)?.to_display();
                        let args = self.eval_args(args)?;
                        return call_math(&key, &args);
                    }
                }
                let receiver = self.eval(object)?;
                if *optional && receiver.is_nullish() {
                    return Ok(Value::Undefined);
                }
                let key = self.property_key(property)?.to_display();
                let args = self.eval_args(args)?;
                call_method(&receiver, &key, &args)
            }
            other => {
                let value = self.eval(other)?;
                Err(EvalError::Type(format!(
                    "{} is not a function",
                    value.to_display()
                )))
            }
        }
    }
}

fn thrown_message(value: &Value) -> String {
    match value {
        Value::Record(fields) => match (fields.get("name"), fields.get("message")) {
            (Some(name), Some(message)) => {
                format!("{}: {}", name.to_display(), message.to_display())
            }
            (None, Some(message)) => message.to_display(),
            _ => value.to_display(),
        },
        other => other.to_display(),
    }
}

fn check_len(len: usize) -> Result<()> {
    if len > MAX_STRING_LEN {
        return Err(EvalError::Range("Invalid string length".to_string()));
    }
    Ok(())
}

fn add(a: &Value, b: &Value) -> Result<Value> {
    if a.is_stringish() || b.is_stringish() {
        let mut out = a.to_display();
        out.push_str(&b.to_display());
        check_len(out.len())?;
        return Ok(Value::Str(out));
    }
    Ok(Value::Number(a.to_number() + b.to_number()))
}

fn compare(a: &Value, b: &Value, accept: fn(std::cmp::Ordering) -> bool) -> Value {
    if let (Value::Str(x), Value::Str(y)) = (a, b) {
        return Value::Bool(accept(x.cmp(y)));
    }
    match a.to_number().partial_cmp(&b.to_number()) {
        Some(ordering) => Value::Bool(accept(ordering)),
        None => Value::Bool(false),
    }
}

fn arg(args: &[Value], i: usize) -> Value {
    args.get(i).cloned().unwrap_or(Value::Undefined)
}

fn get_property(target: &Value, key: &Value) -> Result<Value> {
    let name = key.to_display();
    match target {
        Value::Undefined | Value::Null => Err(EvalError::Type(format!(
            "Cannot read properties of {} (reading '{name}')",
            target.to_display()
        ))),
        Value::Record(fields) => Ok(fields.get(&name).cloned().unwrap_or(Value::Undefined)),
        Value::Str(s) => {
            if name == "length" {
                return Ok(Value::Number(s.chars().count() as f64));
            }
            Ok(index_of(key)
                .and_then(|i| s.chars().nth(i))
                .map(|c| Value::Str(c.to_string()))
                .unwrap_or(Value::Undefined))
        }
        Value::Array(items) => {
            if name == "length" {
                return Ok(Value::Number(items.len() as f64));
            }
            Ok(index_of(key)
                .and_then(|i| items.get(i).cloned())
                .unwrap_or(Value::Undefined))
        }
        Value::Bool(_) | Value::Number(_) | Value::Date(_) => Ok(Value::Undefined),
    }
}

fn index_of(key: &Value) -> Option<usize> {
    let n = match key {
        Value::Number(n) => *n,
        Value::Str(s) => s.parse::<f64>().ok()?,
        _ => return None,
    };
    if n >= 0.0 && n.fract() == 0.0 && n < usize::MAX as f64 {
        Some(n as usize)
    } else {
        None
    }
}

fn call_global(name: &str, args: &[Value]) -> Result<Value> {
    match name {
        "Number" => Ok(Value::Number(args.first().map(Value::to_number).unwrap_or(0.0))),
        "String" => Ok(Value::Str(
            args.first().map(Value::to_display).unwrap_or_default(),
        )),
        "Boolean" => Ok(Value::Bool(args.first().is_some_and(Value::truthy))),
        "parseInt" => {
            let radix = match args.get(1) {
                Some(r) if !r.is_nullish() => Some(r.to_number()),
                _ => None,
            };
            Ok(Value::Number(parse_int(&arg(args, 0).to_display(), radix)))
        }
        "parseFloat" => Ok(Value::Number(parse_float(&arg(args, 0).to_display()))),
        "isNaN" => Ok(Value::Bool(arg(args, 0).to_number().is_nan())),
        "isFinite" => Ok(Value::Bool(arg(args, 0).to_number().is_finite())),
        "Date" => Err(EvalError::Type(
            "Date must be called with new".to_string(),
        )),
        other => Err(EvalError::Reference(format!("{other} is not defined"))),
    }
}

fn call_math(name: &str, args: &[Value]) -> Result<Value> {
    let x = arg(args, 0).to_number();
    let n = match name {
        "round" => (x + 0.5).floor(),
        "floor" => x.floor(),
        "ceil" => x.ceil(),
        "abs" => x.abs(),
        "sqrt" => x.sqrt(),
        "trunc" => x.trunc(),
        "log" => x.ln(),
        "log10" => x.log10(),
        "exp" => x.exp(),
        "sign" => {
            if x.is_nan() || x == 0.0 {
                x
            } else {
                x.signum()
            }
        }
        "pow" => x.powf(arg(args, 1).to_number()),
        "min" => args.iter().map(Value::to_number).fold(f64::INFINITY, |acc, v| {
            if acc.is_nan() || v.is_nan() {
                f64::NAN
            } else {
                acc.min(v)
            }
        }),
        "max" => args
            .iter()
            .map(Value::to_number)
            .fold(f64::NEG_INFINITY, |acc, v| {
                if acc.is_nan() || v.is_nan() {
                    f64::NAN
                } else {
                    acc.max(v)
                }
            }),
        other => return Err(EvalError::Type(format!("Math.{other} is not a function"))),
    };
    Ok(Value::Number(n))
}

fn call_method(receiver: &Value, name: &str, args: &[Value]) -> Result<Value> {
    match receiver {
        Value::Str(s) => string_method(s, name, args),
        Value::Number(n) => number_method(*n, name, args),
        Value::Array(items) => array_method(items, name, args),
        Value::Date(date) => date_method(date.as_ref(), name),
        Value::Bool(b) if name == "toString" => Ok(Value::Str(b.to_string())),
        Value::Undefined | Value::Null => Err(EvalError::Type(format!(
            "Cannot read properties of {} (reading '{name}')",
            receiver.to_display()
        ))),
        _ => Err(EvalError::Type(format!(
            "{}.{name} is not a function",
            receiver.type_of()
        ))),
    }
}

/// Clamp a relative index the way `slice` does.
fn relative_index(value: &Value, len: usize, default: usize) -> usize {
    if value.is_nullish() {
        return default;
    }
    let n = value.to_number();
    if n.is_nan() {
        return 0;
    }
    let n = n.trunc();
    if n < 0.0 {
        (len as f64 + n).max(0.0) as usize
    } else {
        n.min(len as f64) as usize
    }
}

fn clamp_index(value: &Value, len: usize, default: usize) -> usize {
    if value.is_nullish() {
        return default;
    }
    let n = value.to_number();
    if n.is_nan() {
        return 0;
    }
    n.trunc().clamp(0.0, len as f64) as usize
}

fn string_method(s: &str, name: &str, args: &[Value]) -> Result<Value> {
    let chars: Vec<char> = s.chars().collect();
    let len = chars.len();
    let out = match name {
        "toUpperCase" => Value::Str(s.to_uppercase()),
        "toLowerCase" => Value::Str(s.to_lowercase()),
        "trim" => Value::Str(s.trim().to_string()),
        "trimStart" => Value::Str(s.trim_start().to_string()),
        "trimEnd" => Value::Str(s.trim_end().to_string()),
        "toString" => Value::Str(s.to_string()),
        "slice" => {
            let start = relative_index(&arg(args, 0), len, 0);
            let end = relative_index(&arg(args, 1), len, len);
            Value::Str(if start < end {
                chars[start..end].iter().collect()
            } else {
                String::new()
            })
        }
        "substring" => {
            let a = clamp_index(&arg(args, 0), len, 0);
            let b = clamp_index(&arg(args, 1), len, len);
            let (start, end) = if a <= b { (a, b) } else { (b, a) };
            Value::Str(chars[start..end].iter().collect())
        }
        "charAt" => {
            let i = arg(args, 0).to_number();
            let i = if i.is_nan() { 0.0 } else { i.trunc() };
            Value::Str(if i >= 0.0 && (i as usize) < len {
                chars[i as usize].to_string()
            } else {
                String::new()
            })
        }
        "includes" => Value::Bool(s.contains(&arg(args, 0).to_display())),
        "startsWith" => Value::Bool(s.starts_with(&arg(args, 0).to_display())),
        "endsWith" => Value::Bool(s.ends_with(&arg(args, 0).to_display())),
        "indexOf" => {
            let needle = arg(args, 0).to_display();
            Value::Number(match s.find(&needle) {
                Some(byte) => s[..byte].chars().count() as f64,
                None => -1.0,
            })
        }
        "replace" | "replaceAll" => {
            let pattern = arg(args, 0).to_display();
            let replacement = arg(args, 1).to_display();
            let replaced = if name == "replace" {
                s.replacen(&pattern, &replacement, 1)
            } else if pattern.is_empty() {
                s.to_string()
            } else {
                s.replace(&pattern, &replacement)
            };
            check_len(replaced.len())?;
            Value::Str(replaced)
        }
        "split" => {
            let sep = arg(args, 0);
            let parts: Vec<Value> = if sep.is_nullish() {
                vec![Value::Str(s.to_string())]
            } else {
                let sep = sep.to_display();
                if sep.is_empty() {
                    chars.iter().map(|c| Value::Str(c.to_string())).collect()
                } else {
                    s.split(sep.as_str()).map(Value::from).collect()
                }
            };
            Value::Array(parts)
        }
        "padStart" | "padEnd" => {
            let target = arg(args, 0).to_number();
            let target = if target.is_nan() { 0.0 } else { target };
            if target > MAX_STRING_LEN as f64 {
                return Err(EvalError::Range("Invalid string length".to_string()));
            }
            let target = target.max(0.0) as usize;
            let fill = match args.get(1) {
                Some(f) if !f.is_nullish() => f.to_display(),
                _ => " ".to_string(),
            };
            if target <= len || fill.is_empty() {
                Value::Str(s.to_string())
            } else {
                let pad: String = fill.chars().cycle().take(target - len).collect();
                Value::Str(if name == "padStart" {
                    format!("{pad}{s}")
                } else {
                    format!("{s}{pad}")
                })
            }
        }
        "concat" => {
            let mut out = s.to_string();
            for a in args {
                out.push_str(&a.to_display());
            }
            check_len(out.len())?;
            Value::Str(out)
        }
        other => {
            return Err(EvalError::Type(format!(
                "string.{other} is not a function"
            )))
        }
    };
    Ok(out)
}

fn number_method(n: f64, name: &str, args: &[Value]) -> Result<Value> {
    match name {
        "toFixed" => {
            let digits = arg(args, 0).to_number();
            let digits = if digits.is_nan() { 0.0 } else { digits.trunc() };
            if !(0.0..=100.0).contains(&digits) {
                return Err(EvalError::Range(
                    "toFixed() digits argument must be between 0 and 100".to_string(),
                ));
            }
            if !n.is_finite() {
                return Ok(Value::Str(format_number(n)));
            }
            Ok(Value::Str(format!("{:.*}", digits as usize, n)))
        }
        "toString" => Ok(Value::Str(format_number(n))),
        other => Err(EvalError::Type(format!("number.{other} is not a function"))),
    }
}

fn array_method(items: &[Value], name: &str, args: &[Value]) -> Result<Value> {
    match name {
        "join" => {
            let sep = match args.first() {
                Some(s) if !s.is_nullish() => s.to_display(),
                _ => ",".to_string(),
            };
            let joined = items
                .iter()
                .map(|v| {
                    if v.is_nullish() {
                        String::new()
                    } else {
                        v.to_display()
                    }
                })
                .collect::<Vec<_>>()
                .join(&sep);
            check_len(joined.len())?;
            Ok(Value::Str(joined))
        }
        "includes" => {
            let needle = arg(args, 0);
            Ok(Value::Bool(items.iter().any(|v| {
                v.strict_eq(&needle)
                    || matches!((v, &needle), (Value::Number(a), Value::Number(b)) if a.is_nan() && b.is_nan())
            })))
        }
        "indexOf" => {
            let needle = arg(args, 0);
            Ok(Value::Number(
                items
                    .iter()
                    .position(|v| v.strict_eq(&needle))
                    .map(|i| i as f64)
                    .unwrap_or(-1.0),
            ))
        }
        "toString" => Ok(Value::Str(Value::Array(items.to_vec()).to_display())),
        other => Err(EvalError::Type(format!("array.{other} is not a function"))),
    }
}

fn date_method(date: Option<&NaiveDateTime>, name: &str) -> Result<Value> {
    if name == "toISOString" {
        return match date {
            Some(d) => Ok(Value::Str(iso_string(d))),
            None => Err(EvalError::Range("Invalid time value".to_string())),
        };
    }
    let Some(d) = date else {
        return match name {
            "getFullYear" | "getMonth" | "getDate" | "getDay" | "getHours" | "getMinutes"
            | "getSeconds" | "getTime" => Ok(Value::Number(f64::NAN)),
            "toString" => Ok(Value::Str("Invalid Date".to_string())),
            other => Err(EvalError::Type(format!("date.{other} is not a function"))),
        };
    };
    let n = match name {
        "getFullYear" => d.year() as f64,
        "getMonth" => d.month0() as f64,
        "getDate" => d.day() as f64,
        "getDay" => d.weekday().num_days_from_sunday() as f64,
        "getHours" => d.hour() as f64,
        "getMinutes" => d.minute() as f64,
        "getSeconds" => d.second() as f64,
        "getTime" => d.and_utc().timestamp_millis() as f64,
        "toString" => return Ok(Value::Str(Value::Date(Some(*d)).to_display())),
        other => return Err(EvalError::Type(format!("date.{other} is not a function"))),
    };
    Ok(Value::Number(n))
}

fn construct_date(args: &[Value]) -> Result<Value> {
    match args {
        [] => Err(EvalError::Type(
            "the current time is not available to procedures".to_string(),
        )),
        [single] => Ok(Value::Date(match single {
            Value::Date(d) => *d,
            Value::Str(s) => parse_date(s),
            other => {
                let millis = other.to_number();
                if millis.is_finite() {
                    chrono::DateTime::from_timestamp_millis(millis as i64).map(|d| d.naive_utc())
                } else {
                    None
                }
            }
        })),
        parts => {
            let field = |i: usize, default: f64| {
                parts.get(i).map(Value::to_number).unwrap_or(default)
            };
            let (year, month, day) = (field(0, f64::NAN), field(1, 0.0), field(2, 1.0));
            let (hour, minute, second) = (field(3, 0.0), field(4, 0.0), field(5, 0.0));
            if [year, month, day, hour, minute, second]
                .iter()
                .any(|v| !v.is_finite() || v.abs() > 1e8)
            {
                return Ok(Value::Date(None));
            }
            // Month and day overflow roll into the next unit.
            let total_months = year as i64 * 12 + month as i64;
            let date = i32::try_from(total_months.div_euclid(12))
                .ok()
                .and_then(|y| {
                    NaiveDate::from_ymd_opt(y, total_months.rem_euclid(12) as u32 + 1, 1)
                })
                .and_then(|first| {
                    first.checked_add_signed(TimeDelta::try_days(day as i64 - 1)?)
                })
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .and_then(|d| {
                    d.checked_add_signed(TimeDelta::try_seconds(
                        hour as i64 * 3600 + minute as i64 * 60 + second as i64,
                    )?)
                });
            Ok(Value::Date(date))
        }
    }
}

/// Leading-integer parse with optional radix.
fn parse_int(text: &str, radix: Option<f64>) -> f64 {
    let t = text.trim_start();
    let (negative, t) = match t.as_bytes().first() {
        Some(b'-') => (true, &t[1..]),
        Some(b'+') => (false, &t[1..]),
        _ => (false, t),
    };
    let explicit = match radix {
        Some(r) if r.is_finite() && r.trunc() != 0.0 => Some(r.trunc()),
        _ => None,
    };
    let has_hex_prefix = t.starts_with("0x") || t.starts_with("0X");
    let (radix, digits) = match explicit {
        None if has_hex_prefix => (16, &t[2..]),
        None => (10, t),
        Some(r) if !(2.0..=36.0).contains(&r) => return f64::NAN,
        Some(r) if r == 16.0 && has_hex_prefix => (16, &t[2..]),
        Some(r) => (r as u32, t),
    };
    let mut value = 0.0f64;
    let mut any = false;
    for c in digits.chars() {
        match c.to_digit(radix) {
            Some(d) => {
                value = value * radix as f64 + d as f64;
                any = true;
            }
            None => break,
        }
    }
    if !any {
        return f64::NAN;
    }
    if negative {
        -value
    } else {
        value
    }
}

/// Longest numeric prefix.
fn parse_float(text: &str) -> f64 {
    let t = text.trim_start();
    for (prefix, value) in [
        ("Infinity", f64::INFINITY),
        ("+Infinity", f64::INFINITY),
        ("-Infinity", f64::NEG_INFINITY),
    ] {
        if t.starts_with(prefix) {
            return value;
        }
    }
    let bytes = t.as_bytes();
    let mut end = 0;
    if matches!(bytes.first(), Some(b'+') | Some(b'-')) {
        end = 1;
    }
    let mut seen_digit = false;
    let mut seen_dot = false;
    let mut best = None;
    while end < bytes.len() {
        match bytes[end] {
            b'0'..=b'9' => {
                seen_digit = true;
                end += 1;
                best = Some(end);
            }
            b'.' if !seen_dot => {
                seen_dot = true;
                end += 1;
            }
            b'e' | b'E' if seen_digit => {
                let mut exp_end = end + 1;
                if matches!(bytes.get(exp_end), Some(b'+') | Some(b'-')) {
                    exp_end += 1;
                }
                let start_digits = exp_end;
                while matches!(bytes.get(exp_end), Some(b'0'..=b'9')) {
                    exp_end += 1;
                }
                if exp_end > start_digits {
                    best = Some(exp_end);
                }
                break;
            }
            _ => break,
        }
    }
    match best {
        Some(end) => t[..end].parse::<f64>().unwrap_or(f64::NAN),
        None => f64::NAN,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_procedure;

    fn run(source: &str, names: &[&str], args: Vec<Value>) -> Result<Value> {
        let procedure = parse_procedure(source).expect("parse");
        let names: Vec<String> = names.iter().map(|s| s.to_string()).collect();
        procedure.call_row(&names, &args, DEFAULT_STEP_BUDGET)
    }

    #[test]
    fn row_binding_multiplies_fields() {
        let out = run(
            "row => row.price * row.qty",
            &["price", "qty"],
            vec![2.0.into(), 3.0.into()],
        )
        .unwrap();
        assert_eq!(out, Value::Number(6.0));
    }

    #[test]
    fn positional_binding_matches_param_count() {
        let out = run(
            "(first, last) => `${first} ${last}`.trim()",
            &["first", "last"],
            vec!["Ada".into(), "Lovelace".into()],
        )
        .unwrap();
        assert_eq!(out, Value::from("Ada Lovelace"));
    }

    #[test]
    fn single_param_single_parent_is_positional() {
        let out = run("x => x + 1", &["score"], vec![41.0.into()]).unwrap();
        assert_eq!(out, Value::Number(42.0));
    }

    #[test]
    fn single_param_reading_parent_name_binds_row() {
        let out = run("r => r.score * 2", &["score"], vec![4.0.into()]).unwrap();
        assert_eq!(out, Value::Number(8.0));
    }

    #[test]
    fn block_bodies_with_branches() {
        let source = r#"function (score) {
            let grade = "F";
            if (score >= 90) { grade = "A"; }
            else if (score >= 80) grade = "B";
            return grade;
        }"#;
        assert_eq!(run(source, &["score"], vec![95.0.into()]).unwrap(), "A".into());
        assert_eq!(run(source, &["score"], vec![85.0.into()]).unwrap(), "B".into());
        assert_eq!(run(source, &["score"], vec![10.0.into()]).unwrap(), "F".into());
    }

    #[test]
    fn throw_and_reference_errors_are_reported() {
        assert_eq!(
            run("x => { throw new Error('bad') }", &["x"], vec![1.0.into()]),
            Err(EvalError::Thrown("Error: bad".to_string()))
        );
        assert_eq!(
            run("x => { throw 'bad row' }", &["x"], vec![1.0.into()]),
            Err(EvalError::Thrown("bad row".to_string()))
        );
        assert!(matches!(
            run("x => y + 1", &["x"], vec![1.0.into()]),
            Err(EvalError::Reference(_))
        ));
        assert!(matches!(
            run("x => x.name.length", &["x"], vec![Value::Null]),
            Err(EvalError::Type(_))
        ));
    }

    #[test]
    fn budget_is_enforced() {
        let procedure = parse_procedure("x => x + x + x + x").unwrap();
        let names = vec!["x".to_string()];
        let err = procedure
            .call_row(&names, &[1.0.into()], 3)
            .unwrap_err();
        assert_eq!(err, EvalError::BudgetExhausted { budget: 3 });
    }

    #[test]
    fn const_reassignment_fails() {
        let source = "x => { const y = 1; y = 2; return y; }";
        assert!(matches!(
            run(source, &["x"], vec![0.0.into()]),
            Err(EvalError::Type(_))
        ));
        let source = "x => { let y = 1; y += x; return y; }";
        assert_eq!(run(source, &["x"], vec![2.0.into()]).unwrap(), Value::Number(3.0));
    }

    #[test]
    fn string_builtins() {
        let out = run(
            "s => s.trim().toUpperCase().slice(0, 3).padEnd(5, '.')",
            &["s"],
            vec!["  hello ".into()],
        )
        .unwrap();
        assert_eq!(out, "HEL..".into());
        let parts = run("s => s.split('-').join('/')", &["s"], vec!["a-b-c".into()]).unwrap();
        assert_eq!(parts, "a/b/c".into());
        let idx = run("s => s.indexOf('c')", &["s"], vec!["abc".into()]).unwrap();
        assert_eq!(idx, Value::Number(2.0));
    }

    #[test]
    fn numeric_builtins() {
        assert_eq!(
            run("x => Math.round(x * 100) / 100", &["x"], vec![1.005.into()]).unwrap(),
            Value::Number(1.0)
        );
        assert_eq!(
            run("x => Math.max(x, 3, 7)", &["x"], vec![5.0.into()]).unwrap(),
            Value::Number(7.0)
        );
        assert_eq!(
            run("x => x.toFixed(2)", &["x"], vec![3.14159.into()]).unwrap(),
            "3.14".into()
        );
        assert_eq!(
            run("x => parseInt(x) + parseFloat('2.5kg')", &["x"], vec!["12px".into()]).unwrap(),
            Value::Number(14.5)
        );
        assert_eq!(
            run("x => isNaN(Number(x))", &["x"], vec!["abc".into()]).unwrap(),
            Value::Bool(true)
        );
    }

    #[test]
    fn dates() {
        let out = run(
            "d => new Date(d).getFullYear()",
            &["d"],
            vec!["2023-07-14".into()],
        )
        .unwrap();
        assert_eq!(out, Value::Number(2023.0));
        let iso = run(
            "d => new Date(d).toISOString()",
            &["d"],
            vec!["2023-07-14".into()],
        )
        .unwrap();
        assert_eq!(iso, "2023-07-14T00:00:00.000Z".into());
        assert!(matches!(
            run("d => new Date(d).toISOString()", &["d"], vec!["nope".into()]),
            Err(EvalError::Range(_))
        ));
        assert!(run("d => new Date()", &["d"], vec![Value::Null]).is_err());
    }

    #[test]
    fn string_growth_is_bounded() {
        let out = run("s => s.padStart(1e9)", &["s"], vec!["x".into()]);
        assert!(matches!(out, Err(EvalError::Range(_))));
    }

    #[test]
    fn logical_operators_short_circuit() {
        // `y` is never evaluated.
        assert_eq!(
            run("x => x || y", &["x"], vec![1.0.into()]).unwrap(),
            Value::Number(1.0)
        );
        assert_eq!(
            run("x => x ?? 'none'", &["x"], vec![Value::Null]).unwrap(),
            "none".into()
        );
        assert_eq!(
            run("x => x?.length", &["x"], vec![Value::Undefined]).unwrap(),
            Value::Undefined
        );
    }
}
