//! Selector Parser
//!
//! Parses series selectors into label matchers.
//!
//! # Supported Syntax
//!
//! ```text
//! metric_name
//! metric_name{label="value", ...}
//! {label="value", ...}
//! ```
//!
//! Operators: `=` (equal), `!=` (not equal), `=~` (anchored regex).
//! Values are double-quoted; `\\`, `\"` and `\n` are recognised escapes.
//!
//! # Examples
//!
//! ```text
//! http_requests_total
//! http_requests_total{job="api", env!="dev"}
//! {instance=~"host-[0-9]+"}
//! ```

use nom::{
    branch::alt,
    bytes::complete::{escaped_transform, is_not, tag, take_while, take_while1},
    character::complete::{char, multispace0},
    combinator::{map, opt, recognize, value},
    multi::separated_list0,
    sequence::{delimited, pair, terminated, tuple},
    IResult,
};

use crate::index::matcher::Matcher;
use crate::query::error::{QueryError, QueryResult};
use crate::storage::types::METRIC_NAME_LABEL;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MatchOp {
    Equal,
    NotEqual,
    Regex,
}

/// A matcher as written, before validation
type RawMatcher<'a> = (&'a str, MatchOp, String);

/// Parse a selector string into matchers
///
/// A leading metric name becomes an equality matcher on `__name__`. A
/// selector that yields no matchers at all is rejected.
pub fn parse_selector(input: &str) -> QueryResult<Vec<Matcher>> {
    let (remaining, (name, raw)) = parse_full_selector(input)
        .map_err(|e| QueryError::Parse(format!("invalid selector '{}': {:?}", input, e)))?;

    if !remaining.is_empty() {
        return Err(QueryError::Parse(format!(
            "Unexpected input after selector: '{}'",
            remaining
        )));
    }

    let mut matchers = Vec::new();
    if let Some(name) = name {
        matchers.push(Matcher::equal(METRIC_NAME_LABEL, name));
    }
    for (label, op, value) in raw.into_iter().flatten() {
        let matcher = match op {
            MatchOp::Equal => Matcher::equal(label, value),
            MatchOp::NotEqual => Matcher::not_equal(label, value),
            MatchOp::Regex => Matcher::regex(label, value)?,
        };
        matchers.push(matcher);
    }

    if matchers.is_empty() {
        return Err(QueryError::Parse(format!(
            "selector '{}' has no matchers",
            input
        )));
    }
    Ok(matchers)
}

/// Parse the whole selector, surrounding whitespace included
fn parse_full_selector(input: &str) -> IResult<&str, (Option<&str>, Option<Vec<RawMatcher>>)> {
    let (input, _) = multispace0(input)?;
    let (input, name) = opt(parse_metric_name)(input)?;
    let (input, _) = multispace0(input)?;
    let (input, matchers) = opt(parse_matcher_list)(input)?;
    let (input, _) = multispace0(input)?;
    Ok((input, (name, matchers)))
}

/// Parse `{matcher, matcher, ...}`, allowing a trailing comma
fn parse_matcher_list(input: &str) -> IResult<&str, Vec<RawMatcher>> {
    delimited(
        pair(char('{'), multispace0),
        terminated(
            separated_list0(
                delimited(multispace0, char(','), multispace0),
                parse_matcher,
            ),
            opt(pair(multispace0, char(','))),
        ),
        pair(multispace0, char('}')),
    )(input)
}

/// Parse `label op "value"`
fn parse_matcher(input: &str) -> IResult<&str, RawMatcher> {
    map(
        tuple((
            parse_label_name,
            multispace0,
            parse_op,
            multispace0,
            parse_quoted_string,
        )),
        |(label, _, op, _, value)| (label, op, value),
    )(input)
}

fn parse_op(input: &str) -> IResult<&str, MatchOp> {
    alt((
        value(MatchOp::Regex, tag("=~")),
        value(MatchOp::NotEqual, tag("!=")),
        value(MatchOp::Equal, tag("=")),
    ))(input)
}

/// Metric names may also contain colons
fn parse_metric_name(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while1(|c: char| c.is_ascii_alphabetic() || c == '_' || c == ':'),
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '_' || c == ':'),
    ))(input)
}

fn parse_label_name(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while1(|c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '_'),
    ))(input)
}

/// Parse a double-quoted string with backslash escapes
fn parse_quoted_string(input: &str) -> IResult<&str, String> {
    delimited(
        char('"'),
        map(
            opt(escaped_transform(
                is_not("\\\""),
                '\\',
                alt((
                    value("\\", char('\\')),
                    value("\"", char('"')),
                    value("\n", char('n')),
                )),
            )),
            Option::unwrap_or_default,
        ),
        char('"'),
    )(input)
}
