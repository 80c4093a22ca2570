use std::rc::Rc;

use itertools::Itertools;
use pest::{
    error::{Error as PestError, ErrorVariant},
    iterators::Pair,
    Parser, Position, RuleType, Span,
};

use crate::{ast::*, value::Value};

pub type ParseResult<T> = Result<T, PestError<Rule>>;

fn only<R>(pair: Pair<R>) -> Pair<R>
where
    R: RuleType,
{
    let rule = pair.as_rule();
    match pair.into_inner().next() {
        Some(inner) => inner,
        None => unreachable!("{:?} has no inner pair", rule),
    }
}

fn custom_error(message: String, span: Span) -> PestError<Rule> {
    PestError::new_from_span(ErrorVariant::CustomError { message }, span)
}

#[derive(pest_derive::Parser)]
#[grammar = "grammar.pest"]
struct KismetParser;

/// Deepest bracket nesting accepted in source
pub const MAX_NESTING: usize = 256;
/// Stack reserved while parsing, enough for `MAX_NESTING` levels
const PARSE_STACK: usize = 8 * 1024 * 1024;

pub fn parse(input: &str) -> ParseResult<Items> {
    check_nesting(input)?;
    stacker::maybe_grow(PARSE_STACK, PARSE_STACK, || {
        let mut pairs = KismetParser::parse(Rule::program, input)?;
        match pairs.next() {
            Some(program) => parse_items(only(program)),
            None => unreachable!("program produced no pair"),
        }
    })
}

/// Fail on brackets nested deeper than `MAX_NESTING`, ignoring any inside
/// strings and comments
fn check_nesting(input: &str) -> ParseResult<()> {
    let mut depth = 0usize;
    let mut chars = input.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '"' => {
                while let Some((_, c)) = chars.next() {
                    match c {
                        '\\' => {
                            chars.next();
                        }
                        '"' => break,
                        _ => {}
                    }
                }
            }
            '#' => {
                for (_, c) in chars.by_ref() {
                    if c == '\n' || c == '\r' {
                        break;
                    }
                }
            }
            '(' | '{' => {
                depth += 1;
                if depth > MAX_NESTING {
                    let pos = match Position::new(input, i) {
                        Some(pos) => pos,
                        None => unreachable!("{} is not a char boundary", i),
                    };
                    return Err(PestError::new_from_pos(
                        ErrorVariant::CustomError {
                            message: format!("Nesting deeper than {} levels", MAX_NESTING),
                        },
                        pos,
                    ));
                }
            }
            ')' | '}' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    Ok(())
}

/// Parse a single expression
pub fn parse_expression(input: &str) -> ParseResult<Expr> {
    let mut items = parse(input)?.items;
    if items.len() == 1 {
        Ok(items.remove(0))
    } else {
        Err(PestError::new_from_pos(
            ErrorVariant::CustomError {
                message: format!("Expected one expression, found {}", items.len()),
            },
            Position::from_start(input),
        ))
    }
}

fn parse_items(pair: Pair<Rule>) -> ParseResult<Items> {
    let items = pair.into_inner().map(parse_expr).collect::<ParseResult<_>>()?;
    Ok(Items { items })
}

fn parse_expr(pair: Pair<Rule>) -> ParseResult<Expr> {
    let mut pairs = pair.into_inner();
    let first = match pairs.next() {
        Some(pair) => parse_operand(pair)?,
        None => unreachable!("expression without operand"),
    };
    let mut rights = Vec::new();
    for (op, operand) in pairs.tuples() {
        let op = Ident::new(only(op).as_str());
        rights.push(Right::new(op, parse_operand(operand)?));
    }
    Ok(if rights.is_empty() {
        first
    } else {
        Expr::Infix(Rc::new(InfixExpr::new(first, rights)))
    })
}

fn parse_operand(pair: Pair<Rule>) -> ParseResult<Expr> {
    let mut pairs = pair.into_inner();
    let mut expr = match pairs.next() {
        Some(pair) => parse_term(pair)?,
        None => unreachable!("operand without term"),
    };
    for args in pairs {
        let args = args
            .into_inner()
            .map(parse_expr)
            .collect::<ParseResult<Vec<_>>>()?;
        expr = Expr::call(expr, args);
    }
    Ok(expr)
}

fn parse_term(pair: Pair<Rule>) -> ParseResult<Expr> {
    let pair = only(pair);
    Ok(match pair.as_rule() {
        Rule::int => match pair.as_str().parse::<i64>() {
            Ok(i) => Expr::literal(i),
            Err(e) => return Err(custom_error(format!("Invalid integer: {}", e), pair.as_span())),
        },
        Rule::real => match pair.as_str().parse::<f64>() {
            Ok(r) => Expr::literal(r),
            Err(e) => return Err(custom_error(format!("Invalid real: {}", e), pair.as_span())),
        },
        Rule::nil => Expr::Literal(Value::Nil),
        Rule::bool_literal => Expr::literal(pair.as_str() == "true"),
        Rule::ident => Expr::ident(pair.as_str()),
        Rule::string => Expr::literal(parse_string_literal(pair)?),
        Rule::block => Expr::Block(parse_items(only(pair))?.items.into()),
        Rule::paren => parse_expr(only(pair))?,
        rule => unreachable!("{:?}", rule),
    })
}

fn parse_string_literal(pair: Pair<Rule>) -> ParseResult<String> {
    let mut s = String::new();
    for pair in pair.into_inner() {
        match pair.as_rule() {
            Rule::raw_string => s.push_str(pair.as_str()),
            Rule::escape => {
                let pair = only(pair);
                match pair.as_rule() {
                    Rule::predefined => s.push(match pair.as_str() {
                        "0" => '\0',
                        "r" => '\r',
                        "t" => '\t',
                        "n" => '\n',
                        "\\" => '\\',
                        "'" => '\'',
                        "\"" => '"',
                        s => unreachable!("{}", s),
                    }),
                    Rule::unicode => {
                        let span = pair.as_span();
                        let c = u32::from_str_radix(only(pair).as_str(), 16)
                            .ok()
                            .and_then(std::char::from_u32)
                            .ok_or_else(|| {
                                custom_error("Invalid unicode escape".into(), span.clone())
                            })?;
                        s.push(c);
                    }
                    rule => unreachable!("{:?}", rule),
                }
            }
            rule => unreachable!("{:?}", rule),
        }
    }
    Ok(s)
}
