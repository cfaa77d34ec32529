// 🔎 Query parser
//
// Minimal dialect:
//
//   SELECT <col-list> FROM <table> [WHERE <col> <op> <literal>]
//
// Keywords are case-insensitive; identifiers and literals keep their case.
// Exactly one predicate is supported. Everything after the operator is the
// literal, so `WHERE a = 1 AND b = 2` compares `a` against `1 AND b = 2`.

use serde::Serialize;
use std::fmt;

use crate::error::ParseError;

const SELECT: &str = "SELECT ";
const FROM: &str = " FROM ";
const WHERE: &str = " WHERE ";

/// Operators, longest first so `>=` is never read as `>`
const OPERATORS: [(&str, Operator); 6] = [
    (">=", Operator::Ge),
    ("<=", Operator::Le),
    ("!=", Operator::Ne),
    ("=", Operator::Eq),
    (">", Operator::Gt),
    ("<", Operator::Lt),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
}

impl Operator {
    pub fn symbol(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Ne => "!=",
            Operator::Gt => ">",
            Operator::Lt => "<",
            Operator::Ge => ">=",
            Operator::Le => "<=",
        }
    }

    /// Compare two values as strings. Numeric-looking values are not
    /// converted: `"365.8" > "300"` but also `"9" > "10"`.
    pub fn apply(&self, value: &str, literal: &str) -> bool {
        match self {
            Operator::Eq => value == literal,
            Operator::Ne => value != literal,
            Operator::Gt => value > literal,
            Operator::Lt => value < literal,
            Operator::Ge => value >= literal,
            Operator::Le => value <= literal,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Projection {
    All,
    Columns(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Predicate {
    pub column: String,
    pub op: Operator,
    pub literal: String,
}

impl Predicate {
    pub fn matches(&self, value: &str) -> bool {
        self.op.apply(value, &self.literal)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Query {
    pub projection: Projection,
    pub table: String,
    pub predicate: Option<Predicate>,
}

/// Parse query text into a [`Query`].
///
/// The table name is not checked here; that is the executor's job.
pub fn parse(text: &str) -> Result<Query, ParseError> {
    // Trailing space lets " FROM " and " WHERE " match at the very end
    let mut padded = text.split_whitespace().collect::<Vec<_>>().join(" ");
    padded.push(' ');
    // ASCII uppercasing keeps byte offsets aligned with `padded`
    let upper = padded.to_ascii_uppercase();

    if !upper.starts_with(SELECT) {
        return Err(ParseError::MissingSelect);
    }

    let from = upper[SELECT.len() - 1..]
        .find(FROM)
        .map(|i| i + SELECT.len() - 1)
        .ok_or(ParseError::MissingFrom)?;

    let select_list = padded.get(SELECT.len()..from).unwrap_or_default();
    let projection = parse_projection(select_list)?;

    let rest_start = from + FROM.len();
    let mut wheres = upper[rest_start - 1..].match_indices(WHERE).map(|(i, _)| i + rest_start - 1);
    let first_where = wheres.next();
    if wheres.next().is_some() {
        return Err(ParseError::MultipleWhere);
    }

    let (table, predicate) = match first_where {
        Some(at) => {
            let table = padded.get(rest_start..at).unwrap_or_default();
            let clause = &padded[at + WHERE.len()..];
            (table, Some(parse_predicate(clause)?))
        }
        None => (&padded[rest_start..], None),
    };

    let table = table.trim();
    if table.is_empty() {
        return Err(ParseError::MissingTable);
    }

    Ok(Query {
        projection,
        table: table.to_string(),
        predicate,
    })
}

fn parse_projection(select_list: &str) -> Result<Projection, ParseError> {
    let columns: Vec<String> = select_list.split(',').map(|c| c.trim().to_string()).collect();
    if columns.iter().any(String::is_empty) {
        return Err(ParseError::EmptySelectList);
    }

    if columns[0] == "*" {
        Ok(Projection::All)
    } else {
        Ok(Projection::Columns(columns))
    }
}

fn parse_predicate(clause: &str) -> Result<Predicate, ParseError> {
    let (at, symbol, op) = clause
        .char_indices()
        .find_map(|(i, _)| {
            OPERATORS
                .iter()
                .find(|(symbol, _)| clause[i..].starts_with(symbol))
                .map(|(symbol, op)| (i, *symbol, *op))
        })
        .ok_or(ParseError::MissingOperator)?;

    let column = clause[..at].trim();
    if column.is_empty() {
        return Err(ParseError::MissingPredicateColumn);
    }

    Ok(Predicate {
        column: column.to_string(),
        op,
        literal: unquote(clause[at + symbol.len()..].trim()).to_string(),
    })
}

fn unquote(literal: &str) -> &str {
    literal
        .strip_prefix('\'')
        .and_then(|l| l.strip_suffix('\''))
        .unwrap_or(literal)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns(names: &[&str]) -> Projection {
        Projection::Columns(names.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn test_select_star() {
        let query = parse("SELECT * FROM BB_ASSETS").unwrap();
        assert_eq!(query.projection, Projection::All);
        assert_eq!(query.table, "BB_ASSETS");
        assert!(query.predicate.is_none());
    }

    #[test]
    fn test_keywords_case_insensitive_identifiers_preserved() {
        let query = parse("select  Company,\n revenue   from bb_assets where Sector = 'Tech'").unwrap();
        assert_eq!(query.projection, columns(&["Company", "revenue"]));
        assert_eq!(query.table, "bb_assets");
        let predicate = query.predicate.unwrap();
        assert_eq!(predicate.column, "Sector");
        assert_eq!(predicate.op, Operator::Eq);
        assert_eq!(predicate.literal, "Tech");
    }

    #[test]
    fn test_operators_use_longest_match() {
        let cases = [
            ("a >= 1", Operator::Ge),
            ("a<=1", Operator::Le),
            ("a != 1", Operator::Ne),
            ("a = 1", Operator::Eq),
            ("a > 1", Operator::Gt),
            ("a < 1", Operator::Lt),
        ];
        for (clause, expected) in cases {
            let query = parse(&format!("SELECT x FROM T WHERE {clause}")).unwrap();
            let predicate = query.predicate.unwrap();
            assert_eq!(predicate.op, expected, "{clause}");
            assert_eq!(predicate.column, "a");
            assert_eq!(predicate.literal, "1");
        }
    }

    #[test]
    fn test_literal_quotes_and_case() {
        let query = parse("SELECT * FROM T WHERE Company = 'Apple Inc.'").unwrap();
        assert_eq!(query.predicate.unwrap().literal, "Apple Inc.");

        let query = parse("SELECT * FROM T WHERE Company = apple").unwrap();
        assert_eq!(query.predicate.unwrap().literal, "apple");
    }

    #[test]
    fn test_single_predicate_keeps_tail_in_literal() {
        let query = parse("SELECT * FROM T WHERE a = 1 AND b = 2").unwrap();
        let predicate = query.predicate.unwrap();
        assert_eq!(predicate.op, Operator::Eq);
        assert_eq!(predicate.literal, "1 AND b = 2");
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(parse("DELETE FROM T"), Err(ParseError::MissingSelect));
        assert_eq!(parse(""), Err(ParseError::MissingSelect));
        assert_eq!(parse("SELECT a, b"), Err(ParseError::MissingFrom));
        assert_eq!(parse("SELECT FROM T"), Err(ParseError::EmptySelectList));
        assert_eq!(parse("SELECT a,,b FROM T"), Err(ParseError::EmptySelectList));
        assert_eq!(parse("SELECT a FROM"), Err(ParseError::MissingTable));
        assert_eq!(parse("SELECT a FROM WHERE a = 1"), Err(ParseError::MissingTable));
        assert_eq!(
            parse("SELECT a FROM T WHERE a = 1 WHERE b = 2"),
            Err(ParseError::MultipleWhere)
        );
        assert_eq!(parse("SELECT a FROM T WHERE a LIKE 1"), Err(ParseError::MissingOperator));
        assert_eq!(parse("SELECT a FROM T WHERE = 1"), Err(ParseError::MissingPredicateColumn));
    }

    #[test]
    fn test_string_comparison() {
        assert!(Operator::Gt.apply("365.8", "300"));
        assert!(!Operator::Gt.apply("168.1", "300"));
        assert!(Operator::Gt.apply("9", "10"));
        assert!(Operator::Ne.apply("a", "b"));
        assert!(Operator::Le.apply("a", "a"));
    }
}
