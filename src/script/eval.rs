// Evaluates parsed statements into signal descriptions.
//
// Builtins:
//
//     sin(f) saw(f) square(f) noise()
//     gain(in, x) mul(in, x) add(in, x)
//     lowpass(in, cutoff) slew(in, ms)
//     mix(a, ...) pipe(src, stage, ...)
//     bass(f) kick()
//
// `a |> f(x)` and `pipe(a, f(x))` both mean `f(a, x)`.

use std::collections::HashMap;
use std::sync::Arc;

use super::parser::{Expr, Statement};
use super::signal::{BinaryOp, Signal};
use super::{Definition, ParseError, ParseErrorKind, Position, Script};

/// Upper bound on the size of one evaluated expression. `let` bindings are
/// substituted by value, so without a cap a few lines can describe an
/// exponentially large tree.
const MAX_NODES: usize = 2048;

pub struct Evaluator {
    bindings: HashMap<String, Signal>,
}

impl Evaluator {
    pub fn new() -> Self {
        Self {
            bindings: HashMap::new(),
        }
    }

    pub fn run(mut self, statements: Vec<Statement>) -> Result<Script, ParseError> {
        let mut script = Script::default();

        for statement in statements {
            match statement {
                Statement::Let { name, expr } => {
                    let signal = bounded(self.eval(&expr)?, &expr)?;
                    self.bindings.insert(name, signal);
                }
                Statement::Wave { label, expr, pos } => {
                    let signal = bounded(self.eval(&expr)?, &expr)?;
                    let existing = script
                        .definitions
                        .iter_mut()
                        .find(|d| *d.label == *label);
                    match existing {
                        Some(def) => {
                            def.signal = signal;
                            def.line = pos.line;
                            if !script.redefined.contains(&def.label) {
                                script.redefined.push(def.label.clone());
                            }
                        }
                        None => script.definitions.push(Definition {
                            label: Arc::from(label),
                            signal,
                            line: pos.line,
                        }),
                    }
                }
            }
        }

        Ok(script)
    }

    fn eval(&self, expr: &Expr) -> Result<Signal, ParseError> {
        match expr {
            Expr::Number(n) => Ok(Signal::Constant(*n)),
            Expr::Name { name, pos } => self.bindings.get(name).cloned().ok_or_else(|| {
                ParseError::new(*pos, ParseErrorKind::UnknownName(name.clone()))
            }),
            Expr::Neg(inner) => Ok(match self.eval(inner)? {
                Signal::Constant(v) => Signal::Constant(-v),
                other => Signal::binary(BinaryOp::Mul, other, Signal::Constant(-1.0)),
            }),
            Expr::Binary { op, lhs, rhs } => {
                Ok(Signal::binary(*op, self.eval(lhs)?, self.eval(rhs)?))
            }
            Expr::Call { name, args, pos } => self.call(name, args, None, *pos),
            Expr::Pipe { input, stage } => {
                let input = self.eval(input)?;
                self.stage(stage, input)
            }
        }
    }

    /// Apply a pipe stage (always a call) to an already evaluated input.
    fn stage(&self, stage: &Expr, input: Signal) -> Result<Signal, ParseError> {
        match stage {
            Expr::Call { name, args, pos } => self.call(name, args, Some(input), *pos),
            Expr::Name { pos, .. } => Err(ParseError::new(*pos, ParseErrorKind::PipeStage)),
            other => Err(ParseError::new(expr_position(other), ParseErrorKind::PipeStage)),
        }
    }

    fn call(
        &self,
        name: &str,
        args: &[Expr],
        input: Option<Signal>,
        pos: Position,
    ) -> Result<Signal, ParseError> {
        if name == "pipe" {
            return self.pipe(args, input, pos);
        }

        let mut values = Vec::with_capacity(args.len() + 1);
        values.extend(input);
        for arg in args {
            values.push(self.eval(arg)?);
        }

        let arity = |expected: &'static str, ok: bool| -> Result<(), ParseError> {
            if ok {
                Ok(())
            } else {
                Err(ParseError::new(
                    pos,
                    ParseErrorKind::Arity {
                        name: name.to_string(),
                        expected,
                        found: values.len(),
                    },
                ))
            }
        };

        let signal = match name {
            "sin" | "cycle" | "saw" | "phasor" | "square" => {
                arity("1 argument (frequency)", values.len() == 1)?;
                let freq = Box::new(take_first(values));
                match name {
                    "sin" | "cycle" => Signal::Sine(freq),
                    "saw" | "phasor" => Signal::Saw(freq),
                    _ => Signal::Square(freq),
                }
            }
            "noise" => {
                arity("no arguments", values.is_empty())?;
                Signal::Noise
            }
            "gain" | "mul" | "add" => {
                arity("2 arguments (input, amount)", values.len() == 2)?;
                let op = if name == "add" {
                    BinaryOp::Add
                } else {
                    BinaryOp::Mul
                };
                let [lhs, rhs] = take_pair(values);
                Signal::binary(op, lhs, rhs)
            }
            "lowpass" => {
                arity("2 arguments (input, cutoff)", values.len() == 2)?;
                let [input, cutoff] = take_pair(values);
                Signal::Lowpass {
                    input: Box::new(input),
                    cutoff: Box::new(cutoff),
                }
            }
            "slew" => {
                arity("2 arguments (input, milliseconds)", values.len() == 2)?;
                let [input, time] = take_pair(values);
                let millis = time.constant_value().ok_or_else(|| {
                    ParseError::new(pos, ParseErrorKind::ExpectedConstant("slew time"))
                })?;
                Signal::Slew {
                    input: Box::new(input),
                    millis,
                }
            }
            "mix" => {
                arity("at least 1 argument", !values.is_empty())?;
                Signal::Mix(values)
            }
            "bass" => {
                arity("1 argument (frequency)", values.len() == 1)?;
                Signal::binary(
                    BinaryOp::Mul,
                    Signal::Sine(Box::new(take_first(values))),
                    Signal::Constant(0.5),
                )
            }
            "kick" => {
                arity("no arguments", values.is_empty())?;
                Signal::binary(
                    BinaryOp::Mul,
                    Signal::Sine(Box::new(Signal::Constant(60.0))),
                    Signal::Constant(0.8),
                )
            }
            other => {
                return Err(ParseError::new(
                    pos,
                    ParseErrorKind::UnknownFunction(other.to_string()),
                ));
            }
        };

        Ok(signal)
    }

    fn pipe(
        &self,
        args: &[Expr],
        input: Option<Signal>,
        pos: Position,
    ) -> Result<Signal, ParseError> {
        let (mut acc, stages) = match input {
            Some(input) => (input, args),
            None => match args.split_first() {
                Some((source, stages)) => (self.eval(source)?, stages),
                None => {
                    return Err(ParseError::new(
                        pos,
                        ParseErrorKind::Arity {
                            name: "pipe".to_string(),
                            expected: "a source and zero or more stages",
                            found: 0,
                        },
                    ));
                }
            },
        };
        for stage in stages {
            acc = self.stage(stage, acc)?;
        }
        Ok(acc)
    }
}

fn bounded(signal: Signal, expr: &Expr) -> Result<Signal, ParseError> {
    let nodes = signal.node_count();
    if nodes > MAX_NODES {
        return Err(ParseError::new(
            expr_position(expr),
            ParseErrorKind::TooLarge {
                nodes,
                limit: MAX_NODES,
            },
        ));
    }
    Ok(signal)
}

/// Position of the leftmost token of `expr` that carries one.
fn expr_position(expr: &Expr) -> Position {
    match expr {
        Expr::Name { pos, .. } | Expr::Call { pos, .. } => *pos,
        Expr::Neg(inner) => expr_position(inner),
        Expr::Binary { lhs, .. } => expr_position(lhs),
        Expr::Pipe { input, .. } => expr_position(input),
        Expr::Number(_) => Position::default(),
    }
}

// Arity has been checked by the caller.
fn take_first(values: Vec<Signal>) -> Signal {
    values
        .into_iter()
        .next()
        .unwrap_or(Signal::Constant(0.0))
}

fn take_pair(values: Vec<Signal>) -> [Signal; 2] {
    let mut it = values.into_iter();
    let first = it.next().unwrap_or(Signal::Constant(0.0));
    let second = it.next().unwrap_or(Signal::Constant(0.0));
    [first, second]
}
