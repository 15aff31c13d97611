//! Formula expression grammar.
//!
//! ```text
//! A / B * 100
//! (A.0 + B.errors) % 7
//! sqrt(A ^ 2 + B ** 2) - ln(C)
//! ```
//!
//! `^` and `**` are exponentiation and bind tighter than unary minus, so
//! `-2 ^ 2` is `-4`.

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag, take_while},
    character::complete::{char, digit0, digit1, multispace0, one_of, satisfy},
    combinator::{opt, recognize},
    multi::separated_list0,
    sequence::{delimited, preceded},
};

use super::FormulaError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
}

impl BinaryOp {
    fn apply(self, lhs: f64, rhs: f64) -> f64 {
        match self {
            BinaryOp::Add => lhs + rhs,
            BinaryOp::Sub => lhs - rhs,
            BinaryOp::Mul => lhs * rhs,
            BinaryOp::Div => lhs / rhs,
            BinaryOp::Mod => lhs % rhs,
            BinaryOp::Pow => lhs.powf(rhs),
        }
    }
}

/// Built-in functions callable from a formula.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MathFunction {
    Exp,
    Log,
    Ln,
    Exp2,
    Log2,
    Exp10,
    Log10,
    Sqrt,
    Cbrt,
    Erf,
    Erfc,
    Lgamma,
    Tgamma,
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Degrees,
    Radians,
    Abs,
    Now,
}

impl MathFunction {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "exp" => MathFunction::Exp,
            "log" => MathFunction::Log,
            "ln" => MathFunction::Ln,
            "exp2" => MathFunction::Exp2,
            "log2" => MathFunction::Log2,
            "exp10" => MathFunction::Exp10,
            "log10" => MathFunction::Log10,
            "sqrt" => MathFunction::Sqrt,
            "cbrt" => MathFunction::Cbrt,
            "erf" => MathFunction::Erf,
            "erfc" => MathFunction::Erfc,
            "lgamma" => MathFunction::Lgamma,
            "tgamma" => MathFunction::Tgamma,
            "sin" => MathFunction::Sin,
            "cos" => MathFunction::Cos,
            "tan" => MathFunction::Tan,
            "asin" => MathFunction::Asin,
            "acos" => MathFunction::Acos,
            "atan" => MathFunction::Atan,
            "degrees" => MathFunction::Degrees,
            "radians" => MathFunction::Radians,
            "abs" => MathFunction::Abs,
            "now" => MathFunction::Now,
            _ => return None,
        })
    }

    pub fn arity(self) -> usize {
        match self {
            MathFunction::Now => 0,
            _ => 1,
        }
    }

    fn call(self, args: &[f64]) -> f64 {
        let x = args.first().copied().unwrap_or(f64::NAN);
        match self {
            MathFunction::Exp => x.exp(),
            MathFunction::Log | MathFunction::Ln => x.ln(),
            MathFunction::Exp2 => x.exp2(),
            MathFunction::Log2 => x.log2(),
            // whole powers only
            MathFunction::Exp10 => 10f64.powi(x as i32),
            MathFunction::Log10 => x.log10(),
            MathFunction::Sqrt => x.sqrt(),
            MathFunction::Cbrt => x.cbrt(),
            MathFunction::Erf => libm::erf(x),
            MathFunction::Erfc => libm::erfc(x),
            MathFunction::Lgamma => libm::lgamma(x),
            MathFunction::Tgamma => libm::tgamma(x),
            MathFunction::Sin => x.sin(),
            MathFunction::Cos => x.cos(),
            MathFunction::Tan => x.tan(),
            MathFunction::Asin => x.asin(),
            MathFunction::Acos => x.acos(),
            MathFunction::Atan => x.atan(),
            MathFunction::Degrees => x.to_degrees(),
            MathFunction::Radians => x.to_radians(),
            MathFunction::Abs => x.abs(),
            MathFunction::Now => chrono::Utc::now().timestamp() as f64,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Variable(String),
    Neg(Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Call(MathFunction, Vec<Expr>),
}

impl Expr {
    /// Evaluate with `lookup` supplying variable values. Unbound variables
    /// evaluate to NaN.
    pub fn eval(&self, lookup: &impl Fn(&str) -> Option<f64>) -> f64 {
        match self {
            Expr::Number(n) => *n,
            Expr::Variable(name) => lookup(name).unwrap_or(f64::NAN),
            Expr::Neg(inner) => -inner.eval(lookup),
            Expr::Binary(op, lhs, rhs) => op.apply(lhs.eval(lookup), rhs.eval(lookup)),
            Expr::Call(function, args) => {
                let args: Vec<f64> = args.iter().map(|a| a.eval(lookup)).collect();
                function.call(&args)
            }
        }
    }

    /// Variable names in first-use order, without duplicates.
    pub fn variables(&self) -> Vec<String> {
        fn walk(expr: &Expr, out: &mut Vec<String>) {
            match expr {
                Expr::Number(_) => {}
                Expr::Variable(name) => {
                    if !out.contains(name) {
                        out.push(name.clone());
                    }
                }
                Expr::Neg(inner) => walk(inner, out),
                Expr::Binary(_, lhs, rhs) => {
                    walk(lhs, out);
                    walk(rhs, out);
                }
                Expr::Call(_, args) => args.iter().for_each(|a| walk(a, out)),
            }
        }
        let mut out = Vec::new();
        walk(self, &mut out);
        out
    }
}

/// Parsed form before function names are checked.
enum Raw {
    Number(f64),
    Variable(String),
    Neg(Box<Raw>),
    Binary(BinaryOp, Box<Raw>, Box<Raw>),
    Call(String, Vec<Raw>),
}

pub fn parse_expression(input: &str) -> Result<Expr, FormulaError> {
    let raw = match additive(input) {
        Ok((rest, raw)) => {
            let rest = rest.trim_start();
            if !rest.is_empty() {
                return Err(FormulaError::Parse {
                    position: input.len() - rest.len(),
                    message: format!("unexpected input '{rest}'"),
                });
            }
            raw
        }
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
            return Err(FormulaError::Parse {
                position: input.len() - e.input.len(),
                message: "invalid expression".to_string(),
            });
        }
        Err(nom::Err::Incomplete(_)) => {
            return Err(FormulaError::Parse {
                position: input.len(),
                message: "incomplete expression".to_string(),
            });
        }
    };
    resolve(raw)
}

fn resolve(raw: Raw) -> Result<Expr, FormulaError> {
    Ok(match raw {
        Raw::Number(n) => Expr::Number(n),
        Raw::Variable(name) => Expr::Variable(name),
        Raw::Neg(inner) => Expr::Neg(Box::new(resolve(*inner)?)),
        Raw::Binary(op, lhs, rhs) => {
            Expr::Binary(op, Box::new(resolve(*lhs)?), Box::new(resolve(*rhs)?))
        }
        Raw::Call(name, args) => {
            let function = MathFunction::from_name(&name)
                .ok_or_else(|| FormulaError::UnknownFunction(name.clone()))?;
            if args.len() != function.arity() {
                return Err(FormulaError::Arity {
                    function: name,
                    expected: function.arity(),
                    found: args.len(),
                });
            }
            Expr::Call(
                function,
                args.into_iter().map(resolve).collect::<Result<_, _>>()?,
            )
        }
    })
}

fn fold(first: Raw, rest: Vec<(BinaryOp, Raw)>) -> Raw {
    rest.into_iter().fold(first, |lhs, (op, rhs)| {
        Raw::Binary(op, Box::new(lhs), Box::new(rhs))
    })
}

fn additive(input: &str) -> IResult<&str, Raw> {
    let (mut input, first) = multiplicative(input)?;
    let mut rest = Vec::new();
    loop {
        let op = preceded(
            multispace0,
            alt((
                char('+').map(|_| BinaryOp::Add),
                char('-').map(|_| BinaryOp::Sub),
            )),
        );
        match (op, multiplicative).parse(input) {
            Ok((next, pair)) => {
                rest.push(pair);
                input = next;
            }
            Err(nom::Err::Error(_)) => break,
            Err(e) => return Err(e),
        }
    }
    Ok((input, fold(first, rest)))
}

fn multiplicative(input: &str) -> IResult<&str, Raw> {
    let (mut input, first) = unary(input)?;
    let mut rest = Vec::new();
    loop {
        let op = preceded(
            multispace0,
            alt((
                // `**` is power, not two multiplications
                (char('*'), nom::combinator::not(char('*'))).map(|_| BinaryOp::Mul),
                char('/').map(|_| BinaryOp::Div),
                char('%').map(|_| BinaryOp::Mod),
            )),
        );
        match (op, unary).parse(input) {
            Ok((next, pair)) => {
                rest.push(pair);
                input = next;
            }
            Err(nom::Err::Error(_)) => break,
            Err(e) => return Err(e),
        }
    }
    Ok((input, fold(first, rest)))
}

fn unary(input: &str) -> IResult<&str, Raw> {
    let (input, _) = multispace0(input)?;
    alt((
        preceded(char('-'), unary).map(|inner| Raw::Neg(Box::new(inner))),
        preceded(char('+'), unary),
        power,
    ))
    .parse(input)
}

fn power(input: &str) -> IResult<&str, Raw> {
    let (input, base) = primary(input)?;
    let (input, exponent) = opt(preceded(
        (multispace0, alt((tag("**"), tag("^")))),
        unary,
    ))
    .parse(input)?;
    Ok(match exponent {
        Some(exp) => (input, Raw::Binary(BinaryOp::Pow, Box::new(base), Box::new(exp))),
        None => (input, base),
    })
}

fn primary(input: &str) -> IResult<&str, Raw> {
    let (input, _) = multispace0(input)?;
    alt((
        delimited(char('('), additive, preceded(multispace0, char(')'))),
        number,
        call,
        identifier.map(|name: &str| Raw::Variable(name.to_string())),
    ))
    .parse(input)
}

fn number(input: &str) -> IResult<&str, Raw> {
    let exponent = (one_of("eE"), opt(one_of("+-")), digit1);
    let (rest, text) = recognize((
        alt((
            recognize((digit1, opt((char('.'), digit0)))),
            recognize((char('.'), digit1)),
        )),
        opt(exponent),
    ))
    .parse(input)?;
    match text.parse::<f64>() {
        Ok(n) => Ok((rest, Raw::Number(n))),
        Err(_) => Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Float,
        ))),
    }
}

fn identifier(input: &str) -> IResult<&str, &str> {
    recognize((
        satisfy(|c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '_' || c == '.'),
    ))
    .parse(input)
}

fn call(input: &str) -> IResult<&str, Raw> {
    let (input, name) = identifier(input)?;
    let (input, args) = delimited(
        (multispace0, char('(')),
        separated_list0((multispace0, char(',')), additive),
        (multispace0, char(')')),
    )
    .parse(input)?;
    Ok((input, Raw::Call(name.to_string(), args)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(expression: &str, vars: &[(&str, f64)]) -> f64 {
        let expr = parse_expression(expression).unwrap();
        expr.eval(&|name: &str| vars.iter().find(|(n, _)| *n == name).map(|(_, v)| *v))
    }

    #[test]
    fn test_precedence() {
        assert_eq!(eval("1 + 2 * 3", &[]), 7.0);
        assert_eq!(eval("(1 + 2) * 3", &[]), 9.0);
        assert_eq!(eval("10 - 4 - 3", &[]), 3.0);
        assert_eq!(eval("-2 ^ 2", &[]), -4.0);
        assert_eq!(eval("2 ** 3 ** 2", &[]), 512.0);
        assert_eq!(eval("2^-1", &[]), 0.5);
        assert_eq!(eval("7 % 4", &[]), 3.0);
        assert_eq!(eval("1.5e2 / .5", &[]), 300.0);
    }

    #[test]
    fn test_variables() {
        assert_eq!(eval("A / B * 100", &[("A", 1.0), ("B", 4.0)]), 25.0);
        assert_eq!(eval("A.0 + B.errors", &[("A.0", 1.0), ("B.errors", 2.0)]), 3.0);
        let expr = parse_expression("A + B * A - C.1").unwrap();
        assert_eq!(expr.variables(), vec!["A", "B", "C.1"]);
    }

    #[test]
    fn test_functions() {
        assert_eq!(eval("sqrt(16)", &[]), 4.0);
        assert_eq!(eval("abs(-3)", &[]), 3.0);
        assert_eq!(eval("exp10(2)", &[]), 100.0);
        assert_eq!(eval("log10(A)", &[("A", 1000.0)]), 3.0);
        assert!((eval("degrees(3.141592653589793)", &[]) - 180.0).abs() < 1e-9);
        assert!((eval("tgamma(5)", &[]) - 24.0).abs() < 1e-9);
        assert!(eval("erf(0)", &[]).abs() < 1e-12);
        assert!(eval("now()", &[]) > 1.0e9);
    }

    #[test]
    fn test_division_by_zero_is_float_division() {
        assert!(eval("A / B", &[("A", 1.0), ("B", 0.0)]).is_infinite());
        assert!(eval("A / B", &[("A", 0.0), ("B", 0.0)]).is_nan());
    }

    #[test]
    fn test_unknown_function() {
        let err = parse_expression("foo(A)").unwrap_err();
        assert!(matches!(err, FormulaError::UnknownFunction(ref name) if name == "foo"));
    }

    #[test]
    fn test_arity() {
        let err = parse_expression("sqrt(A, B)").unwrap_err();
        assert!(matches!(
            err,
            FormulaError::Arity { expected: 1, found: 2, .. }
        ));
    }

    #[test]
    fn test_parse_errors_carry_position() {
        let err = parse_expression("A + ").unwrap_err();
        assert!(matches!(err, FormulaError::Parse { position: 2, .. }));

        let err = parse_expression("A B").unwrap_err();
        assert!(matches!(err, FormulaError::Parse { position: 2, .. }));

        assert!(parse_expression("(A + B").is_err());
        assert!(parse_expression("").is_err());
    }
}
