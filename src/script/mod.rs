// src/script/mod.rs
//
// Definition language.
//
// Submitted source text is parsed as data, never executed. A definition
// file is a sequence of statements:
//
//     // comments run to the end of the line
//     let base = 220;
//     wave("tone", pipe(sin(440), gain(0.3)));
//     wave("pad", mix(sin(base), saw(base * 1.5) * 0.1) |> lowpass(800));
//
// Parsing yields one `Definition` (label -> `Signal` description) per
// distinct label. Anything that goes wrong here rejects the whole
// submission; per-label problems are the compiler's business.

mod eval;
mod lexer;
mod parser;
mod signal;

pub use signal::{BinaryOp, Signal};

use std::fmt;

use crate::voice::Label;

/// Line/column of a token, both 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// The submitted text could not be turned into definitions.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{pos}: {kind}")]
pub struct ParseError {
    pub pos: Position,
    pub kind: ParseErrorKind,
}

impl ParseError {
    pub fn new(pos: Position, kind: ParseErrorKind) -> Self {
        Self { pos, kind }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseErrorKind {
    #[error("unexpected character {0:?}")]
    UnexpectedChar(char),

    #[error("unterminated string")]
    UnterminatedString,

    #[error("invalid number `{0}`")]
    InvalidNumber(String),

    #[error("expected {expected}, found {found}")]
    Unexpected {
        expected: &'static str,
        found: String,
    },

    #[error("unknown statement `{0}` (expected `wave` or `let`)")]
    UnknownStatement(String),

    #[error("unknown function `{0}`")]
    UnknownFunction(String),

    #[error("unknown name `{0}`")]
    UnknownName(String),

    #[error("`{name}` expects {expected}, got {found} argument(s)")]
    Arity {
        name: String,
        expected: &'static str,
        found: usize,
    },

    #[error("pipe stages must be function calls")]
    PipeStage,

    #[error("{0} must be a constant number")]
    ExpectedConstant(&'static str),

    #[error("wave labels must not be empty")]
    EmptyLabel,

    #[error("expression nests too deeply")]
    TooDeep,

    #[error("expression is too large ({nodes} nodes, limit {limit})")]
    TooLarge { nodes: usize, limit: usize },
}

/// One `wave(label, expr)` statement after evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct Definition {
    pub label: Label,
    pub signal: Signal,
    /// Line of the statement that produced this definition.
    pub line: usize,
}

/// Everything a definition file declares.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Script {
    /// Distinct labels in order of first appearance.
    pub definitions: Vec<Definition>,

    /// Labels declared more than once; the last declaration won.
    pub redefined: Vec<Label>,
}

impl Script {
    pub fn labels(&self) -> impl Iterator<Item = &Label> + '_ {
        self.definitions.iter().map(|d| &d.label)
    }
}

/// Parse and evaluate a definition file.
pub fn parse(source: &str) -> Result<Script, ParseError> {
    let tokens = lexer::Lexer::new(source).tokenize()?;
    let statements = parser::Parser::new(tokens).parse_program()?;
    eval::Evaluator::new().run(statements)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sine(freq: f64) -> Signal {
        Signal::Sine(Box::new(Signal::Constant(freq)))
    }

    #[test]
    fn parses_the_stock_example() {
        let script = parse("wave('tone', pipe(sin(440), gain(0.3)));").unwrap();
        assert_eq!(script.definitions.len(), 1);
        let def = &script.definitions[0];
        assert_eq!(&*def.label, "tone");
        assert_eq!(def.line, 1);
        assert_eq!(
            def.signal,
            Signal::binary(BinaryOp::Mul, sine(440.0), Signal::Constant(0.3))
        );
    }

    #[test]
    fn let_bindings_and_arithmetic() {
        let script = parse(
            "let base = 110
             wave(\"low\", sin(base * 2) + saw(base) / 4)",
        )
        .unwrap();
        assert_eq!(
            script.definitions[0].signal,
            Signal::binary(
                BinaryOp::Add,
                Signal::Sine(Box::new(Signal::binary(
                    BinaryOp::Mul,
                    Signal::Constant(110.0),
                    Signal::Constant(2.0)
                ))),
                Signal::binary(
                    BinaryOp::Div,
                    Signal::Saw(Box::new(Signal::Constant(110.0))),
                    Signal::Constant(4.0)
                ),
            )
        );
    }

    #[test]
    fn redefinition_keeps_first_position_and_last_body() {
        let script = parse(
            "wave('a', sin(100));
             wave('b', sin(200));
             wave('a', sin(300));",
        )
        .unwrap();
        let labels: Vec<&str> = script.labels().map(|l| &**l).collect();
        assert_eq!(labels, vec!["a", "b"]);
        assert_eq!(script.definitions[0].signal, sine(300.0));
        assert_eq!(script.definitions[0].line, 3);
        assert_eq!(script.redefined.len(), 1);
        assert_eq!(&*script.redefined[0], "a");
    }

    #[test]
    fn comments_and_blank_input() {
        assert_eq!(parse("").unwrap(), Script::default());
        assert_eq!(parse("// nothing yet\n\n").unwrap(), Script::default());
    }

    #[test]
    fn unknown_function_rejects_the_whole_file() {
        let err = parse("wave('ok', sin(1));\nwave('bad', wobble(3));").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::UnknownFunction("wobble".into()));
        assert_eq!(err.pos.line, 2);
    }

    #[test]
    fn error_display_carries_the_position() {
        let err = parse("wave('x', sin(440)").unwrap_err();
        assert_eq!(err.to_string(), "1:19: expected `)`, found end of input");
    }
}
