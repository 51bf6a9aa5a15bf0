//! Floating point expression evaluation for `#expr` and `#ifexpr`.

use arrayvec::ArrayVec;
use std::{borrow::Cow, f64::consts::PI};

/// An expression evaluation error.
#[derive(Clone, Debug, thiserror::Error, PartialEq)]
pub enum Error {
    /// The expression nests too deeply.
    #[error("Stack exhausted")]
    StackExhausted,
    /// A word which is not an operator or constant.
    #[error("Unrecognized word \"{0}\"")]
    UnknownWord(String),
    /// A character which cannot start any token.
    #[error("Unrecognized punctuation character \"{0}\"")]
    UnknownPunctuation(char),
    /// A number where an operator was expected.
    #[error("Unexpected number")]
    UnexpectedNumber,
    /// An operator where an operand was expected, or vice versa.
    #[error("Unexpected {0} operator")]
    UnexpectedOperator(&'static str),
    /// A close bracket without an open bracket.
    #[error("Unexpected closing bracket")]
    UnexpectedCloseBracket,
    /// An open bracket without a close bracket.
    #[error("Unclosed bracket")]
    UnclosedBracket,
    /// An operator without enough operands.
    #[error("Missing operand for {0}")]
    MissingOperand(&'static str),
    /// Division or modulo by zero.
    #[error("Division by zero")]
    DivisionByZero,
    /// A function argument outside of the function domain.
    #[error("Invalid argument for {0}")]
    InvalidArgument(&'static str),
}

/// The maximum depth of the operand and operator stacks.
const MAX_STACK_SIZE: usize = 100;

/// An expression operator.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Op {
    Open,
    Negative,
    Positive,
    Not,
    Abs,
    Ceil,
    Cos,
    Exp,
    Floor,
    Ln,
    Sin,
    Sqrt,
    Tan,
    Trunc,
    Exponent,
    Pow,
    Times,
    Divide,
    Mod,
    Plus,
    Minus,
    Round,
    Equal,
    NotEqual,
    Less,
    Greater,
    LessEqual,
    GreaterEqual,
    And,
    Or,
}

impl Op {
    /// The binding strength of the operator.
    fn precedence(self) -> u8 {
        match self {
            Op::Open => 0,
            Op::Or => 2,
            Op::And => 3,
            Op::Equal
            | Op::NotEqual
            | Op::Less
            | Op::Greater
            | Op::LessEqual
            | Op::GreaterEqual => 4,
            Op::Round => 5,
            Op::Plus | Op::Minus => 6,
            Op::Times | Op::Divide | Op::Mod => 7,
            Op::Pow => 8,
            Op::Not
            | Op::Abs
            | Op::Ceil
            | Op::Cos
            | Op::Exp
            | Op::Floor
            | Op::Ln
            | Op::Sin
            | Op::Sqrt
            | Op::Tan
            | Op::Trunc => 9,
            Op::Negative | Op::Positive | Op::Exponent => 10,
        }
    }

    /// Returns true if the operator takes a single operand.
    fn is_unary(self) -> bool {
        matches!(
            self,
            Op::Negative
                | Op::Positive
                | Op::Not
                | Op::Abs
                | Op::Ceil
                | Op::Cos
                | Op::Exp
                | Op::Floor
                | Op::Ln
                | Op::Sin
                | Op::Sqrt
                | Op::Tan
                | Op::Trunc
        )
    }

    /// The name of the operator, for error messages.
    fn name(self) -> &'static str {
        match self {
            Op::Open => "(",
            Op::Negative | Op::Minus => "-",
            Op::Positive | Op::Plus => "+",
            Op::Not => "not",
            Op::Abs => "abs",
            Op::Ceil => "ceil",
            Op::Cos => "cos",
            Op::Exp => "exp",
            Op::Floor => "floor",
            Op::Ln => "ln",
            Op::Sin => "sin",
            Op::Sqrt => "sqrt",
            Op::Tan => "tan",
            Op::Trunc => "trunc",
            Op::Exponent => "e",
            Op::Pow => "^",
            Op::Times => "*",
            Op::Divide => "/",
            Op::Mod => "mod",
            Op::Round => "round",
            Op::Equal => "=",
            Op::NotEqual => "!=",
            Op::Less => "<",
            Op::Greater => ">",
            Op::LessEqual => "<=",
            Op::GreaterEqual => ">=",
            Op::And => "and",
            Op::Or => "or",
        }
    }
}

/// Evaluates a mathematical expression. An empty expression evaluates to
/// `None`.
pub fn do_expression(expr: &str) -> Result<Option<f64>, Error> {
    let expr = normalize_operators(expr);
    let mut operands = ArrayVec::<f64, MAX_STACK_SIZE>::new_const();
    let mut operators = ArrayVec::<Op, MAX_STACK_SIZE>::new_const();
    let mut expecting_operand = true;
    let mut iter = expr.char_indices().peekable();

    while let Some((pos, c)) = iter.next() {
        if c.is_whitespace() {
            continue;
        }

        let op = if c.is_ascii_digit() || c == '.' {
            let mut end = pos + c.len_utf8();
            while let Some((next, c)) = iter.next_if(|(_, c)| c.is_ascii_digit() || *c == '.') {
                end = next + c.len_utf8();
            }
            if !expecting_operand {
                return Err(Error::UnexpectedNumber);
            }
            operands
                .try_push(parse_number(&expr[pos..end]))
                .map_err(|_| Error::StackExhausted)?;
            expecting_operand = false;
            continue;
        } else if c.is_ascii_alphabetic() {
            let mut end = pos + 1;
            while let Some((next, _)) = iter.next_if(|(_, c)| c.is_ascii_alphabetic()) {
                end = next + 1;
            }
            let word = expr[pos..end].to_ascii_lowercase();
            match (&*word, expecting_operand) {
                ("pi", true) | ("e", true) => {
                    let value = if word == "pi" { PI } else { 1.0_f64.exp() };
                    operands.try_push(value).map_err(|_| Error::StackExhausted)?;
                    expecting_operand = false;
                    continue;
                }
                ("pi", false) => return Err(Error::UnexpectedNumber),
                _ => word_op(&word).ok_or_else(|| Error::UnknownWord(word.clone()))?,
            }
        } else {
            let next = iter.peek().map(|(_, c)| *c);
            let (op, len) = match (c, next) {
                ('!', Some('=')) => (Op::NotEqual, 1),
                ('<', Some('>')) => (Op::NotEqual, 1),
                ('<', Some('=')) => (Op::LessEqual, 1),
                ('>', Some('=')) => (Op::GreaterEqual, 1),
                ('<', _) => (Op::Less, 0),
                ('>', _) => (Op::Greater, 0),
                ('=', _) => (Op::Equal, 0),
                ('+', _) if expecting_operand => (Op::Positive, 0),
                ('-', _) if expecting_operand => (Op::Negative, 0),
                ('+', _) => (Op::Plus, 0),
                ('-', _) => (Op::Minus, 0),
                ('*', _) => (Op::Times, 0),
                ('/', _) => (Op::Divide, 0),
                ('^', _) => (Op::Pow, 0),
                ('(', _) => (Op::Open, 0),
                (')', _) => {
                    if expecting_operand {
                        return Err(Error::UnexpectedCloseBracket);
                    }
                    let mut closed = false;
                    while let Some(top) = operators.pop() {
                        if top == Op::Open {
                            closed = true;
                            break;
                        }
                        apply(top, &mut operands)?;
                    }
                    if !closed {
                        return Err(Error::UnexpectedCloseBracket);
                    }
                    continue;
                }
                (c, _) => return Err(Error::UnknownPunctuation(c)),
            };
            for _ in 0..len {
                iter.next();
            }
            op
        };

        if op == Op::Open || op.is_unary() {
            if !expecting_operand {
                return Err(Error::UnexpectedOperator(op.name()));
            }
            operators.try_push(op).map_err(|_| Error::StackExhausted)?;
            continue;
        }

        // Binary operator
        if expecting_operand {
            return Err(Error::UnexpectedOperator(op.name()));
        }
        while let Some(&top) = operators.last() {
            if top == Op::Open || top.precedence() < op.precedence() {
                break;
            }
            operators.pop();
            apply(top, &mut operands)?;
        }
        operators.try_push(op).map_err(|_| Error::StackExhausted)?;
        expecting_operand = true;
    }

    if expecting_operand && let Some(&op) = operators.last() {
        return Err(if op == Op::Open {
            Error::UnclosedBracket
        } else {
            Error::MissingOperand(op.name())
        });
    }

    while let Some(op) = operators.pop() {
        if op == Op::Open {
            return Err(Error::UnclosedBracket);
        }
        apply(op, &mut operands)?;
    }

    Ok(operands.pop())
}

/// Formats an expression result the way `#expr` prints numbers, with at most
/// 14 significant digits.
pub fn format_result(value: f64) -> String {
    if value.is_nan() {
        "NAN".into()
    } else if value.is_infinite() {
        if value > 0.0 { "INF".into() } else { "-INF".into() }
    } else {
        let rounded = format!("{value:.13e}").parse::<f64>().unwrap_or(value);
        if rounded == 0.0 {
            "0".into()
        } else {
            format!("{rounded}")
        }
    }
}

/// Applies an operator to the top of the operand stack.
fn apply(op: Op, operands: &mut ArrayVec<f64, MAX_STACK_SIZE>) -> Result<(), Error> {
    let missing = || Error::MissingOperand(op.name());
    let result = if op.is_unary() {
        let a = operands.pop().ok_or_else(missing)?;
        match op {
            Op::Negative => -a,
            Op::Positive => a,
            Op::Not => f64::from(u8::from(a == 0.0)),
            Op::Abs => a.abs(),
            Op::Ceil => a.ceil(),
            Op::Cos => a.cos(),
            Op::Exp => a.exp(),
            Op::Floor => a.floor(),
            Op::Ln if a <= 0.0 => return Err(Error::InvalidArgument(op.name())),
            Op::Ln => a.ln(),
            Op::Sin => a.sin(),
            Op::Sqrt if a < 0.0 => return Err(Error::InvalidArgument(op.name())),
            Op::Sqrt => a.sqrt(),
            Op::Tan => a.tan(),
            Op::Trunc => a.trunc(),
            _ => unreachable!(),
        }
    } else {
        let b = operands.pop().ok_or_else(missing)?;
        let a = operands.pop().ok_or_else(missing)?;
        match op {
            Op::Exponent => a * 10.0_f64.powf(b),
            Op::Pow => a.powf(b),
            Op::Times => a * b,
            Op::Divide if b == 0.0 => return Err(Error::DivisionByZero),
            Op::Divide => a / b,
            Op::Mod => {
                #[allow(clippy::cast_possible_truncation)]
                let (a, b) = (a.trunc() as i64, b.trunc() as i64);
                if b == 0 {
                    return Err(Error::DivisionByZero);
                }
                // `i64::MIN % -1` overflows, but the remainder is still zero
                #[allow(clippy::cast_precision_loss)]
                let result = a.wrapping_rem(b) as f64;
                result
            }
            Op::Plus => a + b,
            Op::Minus => a - b,
            Op::Round => {
                let scale = 10.0_f64.powf(b.trunc());
                (a * scale).round() / scale
            }
            Op::Equal => f64::from(u8::from(a == b)),
            Op::NotEqual => f64::from(u8::from(a != b)),
            Op::Less => f64::from(u8::from(a < b)),
            Op::Greater => f64::from(u8::from(a > b)),
            Op::LessEqual => f64::from(u8::from(a <= b)),
            Op::GreaterEqual => f64::from(u8::from(a >= b)),
            Op::And => f64::from(u8::from(a != 0.0 && b != 0.0)),
            Op::Or => f64::from(u8::from(a != 0.0 || b != 0.0)),
            _ => unreachable!(),
        }
    };
    operands.push(result);
    Ok(())
}

/// Replaces entity-encoded and typographic operators with their ASCII forms.
fn normalize_operators(expr: &str) -> Cow<'_, str> {
    if expr.contains(['&', '\u{2212}']) {
        Cow::Owned(
            expr.replace("&minus;", "-")
                .replace("&lt;", "<")
                .replace("&gt;", ">")
                .replace('\u{2212}', "-"),
        )
    } else {
        Cow::Borrowed(expr)
    }
}

/// Parses a number, ignoring anything after a second decimal separator.
fn parse_number(text: &str) -> f64 {
    let end = text
        .match_indices('.')
        .nth(1)
        .map_or(text.len(), |(index, _)| index);
    text[..end].parse::<f64>().unwrap_or(0.0)
}

/// Converts a word to an operator.
fn word_op(word: &str) -> Option<Op> {
    Some(match word {
        "not" => Op::Not,
        "abs" => Op::Abs,
        "ceil" => Op::Ceil,
        "cos" => Op::Cos,
        "exp" => Op::Exp,
        "floor" => Op::Floor,
        "ln" => Op::Ln,
        "sin" => Op::Sin,
        "sqrt" => Op::Sqrt,
        "tan" => Op::Tan,
        "trunc" => Op::Trunc,
        "e" => Op::Exponent,
        "mod" => Op::Mod,
        "div" => Op::Divide,
        "round" => Op::Round,
        "and" => Op::And,
        "or" => Op::Or,
        _ => return None,
    })
}
