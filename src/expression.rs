//! Infix boolean expression language of condition strings.
//!
//! Iterating containers and [`Conditional`] accept textual conditions like
//! `i lt= 5` or `(${attempts} > 3) and ${done} = 1`. After variable
//! substitution such a string reaches this module, which tokenizes it,
//! parses it into a small AST and evaluates it. Comparisons bind tighter
//! than `and`, which binds tighter than `or`. Boolean operands of a
//! comparison count as 1 and 0, so `${flag} = true` works for variables
//! holding `"true"` or `"false"`.
//!
//! [`Conditional`]: crate::container::Conditional

use derive_more::with_trait::{Display, Error};

use crate::error::ActionError;

/// Errors of parsing or evaluating a boolean expression.
#[derive(Clone, Debug, Display, Eq, Error, PartialEq)]
pub enum EvalError {
    /// Character outside the expression grammar.
    #[display("unexpected character '{_0}' in expression")]
    UnexpectedChar(#[error(not(source))] char),

    /// Word or symbol that is no operator, literal or parenthesis.
    #[display("unexpected token '{_0}' in expression")]
    UnexpectedToken(#[error(not(source))] String),

    /// Expression ended where an operand or `)` was required.
    #[display("unexpected end of expression")]
    UnexpectedEnd,

    /// Numeric literal not representable as an `i64`.
    #[display("numeric literal '{_0}' is out of range")]
    NumberOutOfRange(#[error(not(source))] String),

    /// Operand of `and`/`or`, or the whole expression, is not boolean.
    #[display("expression does not evaluate to a boolean")]
    NotBoolean,
}

impl From<EvalError> for ActionError {
    fn from(err: EvalError) -> Self {
        Self::runtime(format!("invalid boolean expression: {err}"))
    }
}

/// Evaluator of textual conditions, pluggable on a
/// [`TestContext`](crate::context::TestContext).
pub trait BooleanEvaluator: Send + Sync {
    /// Evaluates the given `expression` to its boolean outcome.
    ///
    /// # Errors
    ///
    /// If the `expression` is malformed or doesn't represent a boolean
    /// outcome. Such failures are fatal to the surrounding container.
    fn evaluate(&self, expression: &str) -> crate::Result<bool>;
}

/// Default [`BooleanEvaluator`] implementing the infix grammar of this
/// module.
#[derive(Clone, Copy, Debug, Default)]
pub struct InfixEvaluator;

impl BooleanEvaluator for InfixEvaluator {
    fn evaluate(&self, expression: &str) -> crate::Result<bool> {
        evaluate(expression).map_err(Into::into)
    }
}

/// Parses and evaluates the given infix boolean `expression`.
///
/// # Errors
///
/// See [`EvalError`].
pub fn evaluate(expression: &str) -> Result<bool, EvalError> {
    let tokens = tokenize(expression)?;
    let mut parser = Parser {
        tokens: &tokens,
        pos: 0,
    };
    let ast = parser.or_expr()?;
    if let Some(trailing) = parser.peek() {
        return Err(EvalError::UnexpectedToken(trailing.to_string()));
    }
    match ast.eval()? {
        Value::Bool(b) => Ok(b),
        Value::Num(_) => Err(EvalError::NotBoolean),
    }
}

/// Comparison operator of the grammar.
///
/// Word forms (`lt`, `lt=`, `gt`, `gt=`) tokenize to the same operators as
/// their symbolic spellings.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
enum CmpOp {
    #[display("<")]
    Lt,
    #[display("<=")]
    Le,
    #[display(">")]
    Gt,
    #[display(">=")]
    Ge,
    #[display("=")]
    Eq,
    #[display("!=")]
    Ne,
}

#[derive(Clone, Debug, Display, PartialEq)]
enum Token {
    #[display("{_0}")]
    Num(i64),
    #[display("{_0}")]
    Bool(bool),
    #[display("{_0}")]
    Op(CmpOp),
    #[display("and")]
    And,
    #[display("or")]
    Or,
    #[display("(")]
    Open,
    #[display(")")]
    Close,
}

fn tokenize(input: &str) -> Result<Vec<Token>, EvalError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::Open);
            }
            ')' => {
                chars.next();
                tokens.push(Token::Close);
            }
            '<' => {
                chars.next();
                tokens.push(Token::Op(take_eq(&mut chars, CmpOp::Le, CmpOp::Lt)));
            }
            '>' => {
                chars.next();
                tokens.push(Token::Op(take_eq(&mut chars, CmpOp::Ge, CmpOp::Gt)));
            }
            '=' => {
                chars.next();
                // `=` and `==` are interchangeable.
                if chars.peek() == Some(&'=') {
                    chars.next();
                }
                tokens.push(Token::Op(CmpOp::Eq));
            }
            '!' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Op(CmpOp::Ne));
                } else {
                    return Err(EvalError::UnexpectedChar('!'));
                }
            }
            '-' => {
                chars.next();
                if !matches!(chars.peek(), Some(d) if d.is_ascii_digit()) {
                    return Err(EvalError::UnexpectedChar('-'));
                }
                tokens.push(read_number(&mut chars, true)?);
            }
            c if c.is_ascii_digit() => {
                tokens.push(read_number(&mut chars, false)?);
            }
            c if c.is_ascii_alphabetic() => {
                tokens.push(read_word(&mut chars)?);
            }
            other => return Err(EvalError::UnexpectedChar(other)),
        }
    }
    Ok(tokens)
}

fn take_eq(
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
    with_eq: CmpOp,
    without: CmpOp,
) -> CmpOp {
    if chars.peek() == Some(&'=') {
        chars.next();
        with_eq
    } else {
        without
    }
}

fn read_number(
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
    negative: bool,
) -> Result<Token, EvalError> {
    let mut digits = if negative {
        String::from('-')
    } else {
        String::new()
    };
    while let Some(&d) = chars.peek() {
        if !d.is_ascii_digit() {
            break;
        }
        digits.push(d);
        chars.next();
    }
    digits
        .parse::<i64>()
        .map(Token::Num)
        .map_err(|_| EvalError::NumberOutOfRange(digits))
}

fn read_word(
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
) -> Result<Token, EvalError> {
    let mut word = String::new();
    while let Some(&c) = chars.peek() {
        if !c.is_ascii_alphabetic() {
            break;
        }
        word.push(c);
        chars.next();
    }
    let take_trailing_eq = |chars: &mut std::iter::Peekable<
        std::str::Chars<'_>,
    >| {
        if chars.peek() == Some(&'=') {
            chars.next();
            true
        } else {
            false
        }
    };
    Ok(match word.as_str() {
        "and" => Token::And,
        "or" => Token::Or,
        "true" => Token::Bool(true),
        "false" => Token::Bool(false),
        "lt" => Token::Op(if take_trailing_eq(chars) {
            CmpOp::Le
        } else {
            CmpOp::Lt
        }),
        "gt" => Token::Op(if take_trailing_eq(chars) {
            CmpOp::Ge
        } else {
            CmpOp::Gt
        }),
        _ => return Err(EvalError::UnexpectedToken(word)),
    })
}

/// Parsed expression tree, evaluated recursively.
#[derive(Debug)]
enum Expr {
    Bool(bool),
    Num(i64),
    Cmp(CmpOp, Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

#[derive(Clone, Copy, Debug)]
enum Value {
    Bool(bool),
    Num(i64),
}

impl Value {
    fn into_bool(self) -> Result<bool, EvalError> {
        match self {
            Self::Bool(b) => Ok(b),
            Self::Num(_) => Err(EvalError::NotBoolean),
        }
    }

    // Boolean operands take part in comparisons by their numeric
    // value, `true` counting as 1 and `false` as 0.
    fn as_num(self) -> i64 {
        match self {
            Self::Bool(b) => i64::from(b),
            Self::Num(n) => n,
        }
    }
}

impl Expr {
    fn eval(&self) -> Result<Value, EvalError> {
        match self {
            Self::Bool(b) => Ok(Value::Bool(*b)),
            Self::Num(n) => Ok(Value::Num(*n)),
            Self::Cmp(op, lhs, rhs) => {
                let (l, r) = (lhs.eval()?.as_num(), rhs.eval()?.as_num());
                Ok(Value::Bool(match op {
                    CmpOp::Lt => l < r,
                    CmpOp::Le => l <= r,
                    CmpOp::Gt => l > r,
                    CmpOp::Ge => l >= r,
                    CmpOp::Eq => l == r,
                    CmpOp::Ne => l != r,
                }))
            }
            Self::And(lhs, rhs) => Ok(Value::Bool(
                lhs.eval()?.into_bool()? & rhs.eval()?.into_bool()?,
            )),
            Self::Or(lhs, rhs) => Ok(Value::Bool(
                lhs.eval()?.into_bool()? | rhs.eval()?.into_bool()?,
            )),
        }
    }
}

struct Parser<'t> {
    tokens: &'t [Token],
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<&Token> {
        let token = self.tokens.get(self.pos);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn or_expr(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.and_expr()?;
        while matches!(self.peek(), Some(Token::Or)) {
            self.pos += 1;
            let rhs = self.and_expr()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn and_expr(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.cmp_expr()?;
        while matches!(self.peek(), Some(Token::And)) {
            self.pos += 1;
            let rhs = self.cmp_expr()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn cmp_expr(&mut self) -> Result<Expr, EvalError> {
        let lhs = self.primary()?;
        if let Some(Token::Op(op)) = self.peek() {
            let op = *op;
            self.pos += 1;
            let rhs = self.primary()?;
            return Ok(Expr::Cmp(op, Box::new(lhs), Box::new(rhs)));
        }
        Ok(lhs)
    }

    fn primary(&mut self) -> Result<Expr, EvalError> {
        match self.next() {
            Some(Token::Open) => {
                let inner = self.or_expr()?;
                match self.next() {
                    Some(Token::Close) => Ok(inner),
                    Some(other) => {
                        Err(EvalError::UnexpectedToken(other.to_string()))
                    }
                    None => Err(EvalError::UnexpectedEnd),
                }
            }
            Some(Token::Num(n)) => Ok(Expr::Num(*n)),
            Some(Token::Bool(b)) => Ok(Expr::Bool(*b)),
            Some(other) => Err(EvalError::UnexpectedToken(other.to_string())),
            None => Err(EvalError::UnexpectedEnd),
        }
    }
}
