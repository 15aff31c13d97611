//! Filter expression parser
//!
//! ```text
//! service.name = 'redis' AND (http.status_code >= 500 OR error EXISTS)
//! NOT resource.k8s.namespace.name IN ('prod', 'staging')
//! duration BETWEEN 100 AND 200 hasToken(body, 'timeout')
//! ```
//!
//! Keywords are case-insensitive. Adjacent terms without an operator are
//! joined with AND.

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_while1},
    character::complete::{char, digit0, digit1, multispace0, multispace1, one_of},
    combinator::{map, not, opt, peek, recognize, value},
    error::{Error, ErrorKind},
    multi::{many0, separated_list0},
    sequence::{delimited, preceded},
};

use super::ast::{Comparison, FilterExpr, FunctionCall, FunctionName, Literal, Operand};
use crate::query::error::QueryError;
use crate::query::operator::FilterOperator;

const KEYWORDS: &[&str] = &[
    "and", "or", "not", "in", "like", "ilike", "between", "exists", "regexp", "contains",
];

/// Parse a filter expression. Blank input is not an expression; callers
/// check for it before parsing.
pub fn parse_filter(input: &str) -> Result<FilterExpr, QueryError> {
    match or_expr(input) {
        Ok((rest, expr)) => {
            let rest = rest.trim_start();
            if rest.is_empty() {
                Ok(expr)
            } else {
                Err(QueryError::syntax(
                    input.len() - rest.len(),
                    format!("unexpected input '{}'", truncate(rest)),
                ))
            }
        }
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => Err(QueryError::syntax(
            input.len() - e.input.len(),
            format!("invalid expression near '{}'", truncate(e.input)),
        )),
        Err(nom::Err::Incomplete(_)) => Err(QueryError::syntax(input.len(), "incomplete input")),
    }
}

fn truncate(s: &str) -> &str {
    match s.char_indices().nth(24) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

fn is_key_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '.' | ':' | '-' | '$' | '@' | '/')
}

/// Case-insensitive keyword that is not the prefix of a longer token.
fn keyword<'a>(word: &'static str) -> impl Parser<&'a str, Output = &'a str, Error = Error<&'a str>> {
    (tag_no_case(word), peek(not(take_while1(is_key_char)))).map(|(kw, _)| kw)
}

fn or_expr(input: &str) -> IResult<&str, FilterExpr> {
    let (mut input, first) = and_expr(input)?;
    let mut terms = vec![first];
    loop {
        match preceded((multispace0, keyword("or")), and_expr).parse(input) {
            Ok((rest, term)) => {
                terms.push(term);
                input = rest;
            }
            Err(nom::Err::Error(_)) => break,
            Err(e) => return Err(e),
        }
    }
    let expr = if terms.len() == 1 {
        terms.remove(0)
    } else {
        FilterExpr::Or(terms)
    };
    Ok((input, expr))
}

fn and_expr(input: &str) -> IResult<&str, FilterExpr> {
    let (mut input, first) = unary(input)?;
    let mut terms = vec![first];
    loop {
        let next = alt((
            preceded((multispace0, keyword("and"), multispace0), unary),
            preceded(multispace1, unary),
            // `a=1(b=2)` style juxtaposition without whitespace
            preceded(peek(char('(')), unary),
        ))
        .parse(input);
        match next {
            Ok((rest, term)) => {
                terms.push(term);
                input = rest;
            }
            Err(nom::Err::Error(_)) => break,
            Err(e) => return Err(e),
        }
    }
    let expr = if terms.len() == 1 {
        terms.remove(0)
    } else {
        FilterExpr::And(terms)
    };
    Ok((input, expr))
}

fn unary(input: &str) -> IResult<&str, FilterExpr> {
    let (input, _) = multispace0(input)?;
    let (input, negated) = opt((keyword("not"), multispace0)).parse(input)?;
    let (input, expr) = primary(input)?;
    match negated {
        Some(_) => Ok((input, FilterExpr::Not(Box::new(expr)))),
        None => Ok((input, expr)),
    }
}

fn primary(input: &str) -> IResult<&str, FilterExpr> {
    alt((
        map(
            delimited(char('('), or_expr, (multispace0, char(')'))),
            |inner| FilterExpr::Group(Box::new(inner)),
        ),
        map(function_call, FilterExpr::Function),
        map(comparison, FilterExpr::Comparison),
        full_text,
    ))
    .parse(input)
}

fn full_text(input: &str) -> IResult<&str, FilterExpr> {
    alt((
        map(quoted, FilterExpr::FullText),
        map(bare_token, |s| FilterExpr::FullText(s.to_string())),
    ))
    .parse(input)
}

fn function_call(input: &str) -> IResult<&str, FunctionCall> {
    let (input, name) = alt((
        value(FunctionName::HasToken, tag_no_case("hastoken")),
        value(FunctionName::HasAny, tag_no_case("hasany")),
        value(FunctionName::HasAll, tag_no_case("hasall")),
        value(FunctionName::Has, tag_no_case("has")),
    ))
    .parse(input)?;
    let (input, _) = (multispace0, char('('), multispace0).parse(input)?;
    let (input, key) = key_token(input)?;
    let (input, args) = many0(preceded(
        (multispace0, char(','), multispace0),
        alt((map(array, Operand::List), map(literal, Operand::Single))),
    ))
    .parse(input)?;
    let (input, _) = (multispace0, char(')')).parse(input)?;
    Ok((
        input,
        FunctionCall {
            name,
            key: key.to_string(),
            args,
        },
    ))
}

fn comparison(input: &str) -> IResult<&str, Comparison> {
    let (input, key) = key_token(input)?;
    let (input, _) = multispace0(input)?;

    if let Ok((rest, operator)) = symbolic_operator(input) {
        let (rest, _) = multispace0(rest)?;
        let (rest, lit) = literal(rest)?;
        return Ok((
            rest,
            Comparison {
                key: key.to_string(),
                operator,
                operand: Operand::Single(lit),
            },
        ));
    }

    let (input, negated) = opt((keyword("not"), multispace1)).parse(input)?;
    let negated = negated.is_some();
    let pick = |positive: FilterOperator| {
        if negated { positive.negate() } else { positive }
    };

    if let Ok((rest, _)) = keyword("exists").parse(input) {
        return Ok((
            rest,
            Comparison {
                key: key.to_string(),
                operator: pick(FilterOperator::Exists),
                operand: Operand::None,
            },
        ));
    }

    if let Ok((rest, _)) = keyword("between").parse(input) {
        let (rest, low) = preceded(multispace0, literal).parse(rest)?;
        let (rest, _) = (multispace0, keyword("and")).parse(rest)?;
        let (rest, high) = preceded(multispace0, literal).parse(rest)?;
        return Ok((
            rest,
            Comparison {
                key: key.to_string(),
                operator: pick(FilterOperator::Between),
                operand: Operand::Range(low, high),
            },
        ));
    }

    if let Ok((rest, _)) = keyword("in").parse(input) {
        let (rest, _) = multispace0(rest)?;
        let (rest, operand) = alt((
            map(
                delimited(
                    (char('('), multispace0),
                    separated_list0((multispace0, char(','), multispace0), literal),
                    (multispace0, char(')')),
                ),
                Operand::List,
            ),
            map(array, Operand::List),
            map(literal, Operand::Single),
        ))
        .parse(rest)?;
        return Ok((
            rest,
            Comparison {
                key: key.to_string(),
                operator: pick(FilterOperator::In),
                operand,
            },
        ));
    }

    let (input, operator) = alt((
        value(FilterOperator::ILike, keyword("ilike")),
        value(FilterOperator::Like, keyword("like")),
        value(FilterOperator::Regexp, keyword("regexp")),
        value(FilterOperator::Contains, keyword("contains")),
    ))
    .parse(input)?;
    let (input, lit) = preceded(multispace0, literal).parse(input)?;
    Ok((
        input,
        Comparison {
            key: key.to_string(),
            operator: pick(operator),
            operand: Operand::Single(lit),
        },
    ))
}

fn symbolic_operator(input: &str) -> IResult<&str, FilterOperator> {
    alt((
        value(FilterOperator::Equal, tag("==")),
        value(FilterOperator::NotEqual, tag("!=")),
        value(FilterOperator::NotEqual, tag("<>")),
        value(FilterOperator::LessThanOrEq, tag("<=")),
        value(FilterOperator::GreaterThanOrEq, tag(">=")),
        value(FilterOperator::Equal, tag("=")),
        value(FilterOperator::LessThan, tag("<")),
        value(FilterOperator::GreaterThan, tag(">")),
    ))
    .parse(input)
}

fn array(input: &str) -> IResult<&str, Vec<Literal>> {
    delimited(
        (char('['), multispace0),
        separated_list0((multispace0, char(','), multispace0), literal),
        (multispace0, char(']')),
    )
    .parse(input)
}

fn literal(input: &str) -> IResult<&str, Literal> {
    alt((
        map(quoted, Literal::Text),
        map(number, Literal::Number),
        value(Literal::Bool(true), keyword("true")),
        value(Literal::Bool(false), keyword("false")),
        map(bare_token, |s| Literal::Bare(s.to_string())),
    ))
    .parse(input)
}

fn number(input: &str) -> IResult<&str, f64> {
    let (rest, text) = recognize((
        opt(one_of("+-")),
        digit1,
        opt((char('.'), digit0)),
        opt((one_of("eE"), opt(one_of("+-")), digit1)),
    ))
    .parse(input)?;
    // `200OK` is a bare token, not a number followed by junk
    let (rest, _) = peek(not(take_while1(is_key_char))).parse(rest)?;
    text.parse::<f64>()
        .map(|n| (rest, n))
        .map_err(|_| nom::Err::Error(Error::new(input, ErrorKind::Float)))
}

/// Key text such as `service.name`, `resource.env:string` or `tags:[]string`.
fn key_token(input: &str) -> IResult<&str, &str> {
    let (rest, token) = recognize((
        take_while1(is_key_char),
        opt((tag("[]"), take_while1(|c: char| c.is_alphanumeric()))),
    ))
    .parse(input)?;
    if is_keyword(token) {
        return Err(nom::Err::Error(Error::new(input, ErrorKind::Tag)));
    }
    Ok((rest, token))
}

fn bare_token(input: &str) -> IResult<&str, &str> {
    let (rest, token) = take_while1(is_key_char).parse(input)?;
    if is_keyword(token) {
        return Err(nom::Err::Error(Error::new(input, ErrorKind::Tag)));
    }
    Ok((rest, token))
}

fn is_keyword(token: &str) -> bool {
    KEYWORDS.iter().any(|kw| kw.eq_ignore_ascii_case(token))
}

/// Single or double quoted text. `\\` and `\'` are unescaped, other escape
/// sequences are kept verbatim.
fn quoted(input: &str) -> IResult<&str, String> {
    let (rest, quote) = one_of("'\"").parse(input)?;
    let mut escaped = false;
    for (idx, c) in rest.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        if c == '\\' {
            escaped = true;
        } else if c == quote {
            let body = &rest[..idx];
            return Ok((&rest[idx + c.len_utf8()..], unescape(body)));
        }
    }
    Err(nom::Err::Error(Error::new(input, ErrorKind::Char)))
}

fn unescape(text: &str) -> String {
    text.replace("\\\\", "\\").replace("\\'", "'")
}
