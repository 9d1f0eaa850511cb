//! Header selectors for partitioning one logical queue between consumer
//! pools, e.g. `dashboardType = 'FINANCIAL_REPORT'` or
//! `dashboardType IN ('CLICK_TRENDS', 'GEO_DISTRIBUTION') AND region <> 'EU'`.
//!
//! Selectors are evaluated in-process against message headers; the broker
//! itself is never asked to filter.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::infrastructure::broker::Headers;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SelectorError {
    #[error("Unexpected end of selector expression")]
    UnexpectedEnd,
    #[error("Unexpected token '{token}' at position {position}")]
    UnexpectedToken { token: String, position: usize },
    #[error("Unterminated string literal starting at position {0}")]
    UnterminatedLiteral(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    Equals { header: String, value: String },
    NotEquals { header: String, value: String },
    In { header: String, values: Vec<String> },
    Not(Box<Selector>),
    And(Box<Selector>, Box<Selector>),
    Or(Box<Selector>, Box<Selector>),
}

impl Selector {
    pub fn equals(header: impl Into<String>, value: impl Into<String>) -> Self {
        Selector::Equals {
            header: header.into(),
            value: value.into(),
        }
    }

    pub fn any_of<I, S>(header: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Selector::In {
            header: header.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn parse(expression: &str) -> Result<Self, SelectorError> {
        let tokens = tokenize(expression)?;
        let mut parser = Parser { tokens, pos: 0 };
        let selector = parser.parse_or()?;
        match parser.peek() {
            None => Ok(selector),
            Some((token, position)) => Err(SelectorError::UnexpectedToken {
                token: token.to_string(),
                position: *position,
            }),
        }
    }

    /// A missing header never matches a comparison, so `NOT (h = 'x')`
    /// matches messages that lack `h`.
    pub fn matches(&self, headers: &Headers) -> bool {
        match self {
            Selector::Equals { header, value } => {
                headers.get(header).is_some_and(|v| v == value)
            }
            Selector::NotEquals { header, value } => {
                headers.get(header).is_some_and(|v| v != value)
            }
            Selector::In { header, values } => headers
                .get(header)
                .is_some_and(|v| values.iter().any(|candidate| candidate == v)),
            Selector::Not(inner) => !inner.matches(headers),
            Selector::And(left, right) => left.matches(headers) && right.matches(headers),
            Selector::Or(left, right) => left.matches(headers) || right.matches(headers),
        }
    }

    /// Short identifier safe for consumer group names.
    pub fn slug(&self) -> String {
        self.to_string()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
            .collect::<String>()
            .split('_')
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("_")
    }
}

impl FromStr for Selector {
    type Err = SelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Selector::parse(s)
    }
}

fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Equals { header, value } => write!(f, "{} = {}", header, quote(value)),
            Selector::NotEquals { header, value } => write!(f, "{} <> {}", header, quote(value)),
            Selector::In { header, values } => {
                let list = values.iter().map(|v| quote(v)).collect::<Vec<_>>().join(", ");
                write!(f, "{} IN ({})", header, list)
            }
            Selector::Not(inner) => write!(f, "NOT ({})", inner),
            Selector::And(left, right) => write!(f, "({} AND {})", left, right),
            Selector::Or(left, right) => write!(f, "({} OR {})", left, right),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    Literal(String),
    Eq,
    NotEq,
    LParen,
    RParen,
    Comma,
    And,
    Or,
    Not,
    In,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Ident(name) => f.write_str(name),
            Token::Literal(value) => f.write_str(&quote(value)),
            Token::Eq => f.write_str("="),
            Token::NotEq => f.write_str("<>"),
            Token::LParen => f.write_str("("),
            Token::RParen => f.write_str(")"),
            Token::Comma => f.write_str(","),
            Token::And => f.write_str("AND"),
            Token::Or => f.write_str("OR"),
            Token::Not => f.write_str("NOT"),
            Token::In => f.write_str("IN"),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<(Token, usize)>, SelectorError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '=' => {
                tokens.push((Token::Eq, i));
                i += 1;
            }
            '<' if chars.get(i + 1) == Some(&'>') => {
                tokens.push((Token::NotEq, i));
                i += 2;
            }
            '!' if chars.get(i + 1) == Some(&'=') => {
                tokens.push((Token::NotEq, i));
                i += 2;
            }
            '(' => {
                tokens.push((Token::LParen, i));
                i += 1;
            }
            ')' => {
                tokens.push((Token::RParen, i));
                i += 1;
            }
            ',' => {
                tokens.push((Token::Comma, i));
                i += 1;
            }
            '\'' => {
                let start = i;
                let mut value = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(SelectorError::UnterminatedLiteral(start)),
                        Some('\'') if chars.get(i + 1) == Some(&'\'') => {
                            value.push('\'');
                            i += 2;
                        }
                        Some('\'') => {
                            i += 1;
                            break;
                        }
                        Some(other) => {
                            value.push(*other);
                            i += 1;
                        }
                    }
                }
                tokens.push((Token::Literal(value), start));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_ascii_alphanumeric() || chars[i] == '_' || chars[i] == '.')
                {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                let token = match word.to_ascii_uppercase().as_str() {
                    "AND" => Token::And,
                    "OR" => Token::Or,
                    "NOT" => Token::Not,
                    "IN" => Token::In,
                    _ => Token::Ident(word),
                };
                tokens.push((token, start));
            }
            other => {
                return Err(SelectorError::UnexpectedToken {
                    token: other.to_string(),
                    position: i,
                })
            }
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&(Token, usize)> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Result<(Token, usize), SelectorError> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or(SelectorError::UnexpectedEnd)?;
        self.pos += 1;
        Ok(token)
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek().is_some_and(|(t, _)| t == expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: Token) -> Result<(), SelectorError> {
        let (token, position) = self.next()?;
        if token == expected {
            Ok(())
        } else {
            Err(SelectorError::UnexpectedToken {
                token: token.to_string(),
                position,
            })
        }
    }

    fn literal(&mut self) -> Result<String, SelectorError> {
        match self.next()? {
            (Token::Literal(value), _) => Ok(value),
            (token, position) => Err(SelectorError::UnexpectedToken {
                token: token.to_string(),
                position,
            }),
        }
    }

    fn parse_or(&mut self) -> Result<Selector, SelectorError> {
        let mut left = self.parse_and()?;
        while self.eat(&Token::Or) {
            let right = self.parse_and()?;
            left = Selector::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Selector, SelectorError> {
        let mut left = self.parse_unary()?;
        while self.eat(&Token::And) {
            let right = self.parse_unary()?;
            left = Selector::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Selector, SelectorError> {
        if self.eat(&Token::Not) {
            return Ok(Selector::Not(Box::new(self.parse_unary()?)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Selector, SelectorError> {
        match self.next()? {
            (Token::LParen, _) => {
                let inner = self.parse_or()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            (Token::Ident(header), _) => self.parse_comparison(header),
            (token, position) => Err(SelectorError::UnexpectedToken {
                token: token.to_string(),
                position,
            }),
        }
    }

    fn parse_comparison(&mut self, header: String) -> Result<Selector, SelectorError> {
        match self.next()? {
            (Token::Eq, _) => Ok(Selector::Equals {
                header,
                value: self.literal()?,
            }),
            (Token::NotEq, _) => Ok(Selector::NotEquals {
                header,
                value: self.literal()?,
            }),
            (Token::In, _) => self.parse_in_list(header),
            (Token::Not, _) => {
                self.expect(Token::In)?;
                Ok(Selector::Not(Box::new(self.parse_in_list(header)?)))
            }
            (token, position) => Err(SelectorError::UnexpectedToken {
                token: token.to_string(),
                position,
            }),
        }
    }

    fn parse_in_list(&mut self, header: String) -> Result<Selector, SelectorError> {
        self.expect(Token::LParen)?;
        let mut values = vec![self.literal()?];
        while self.eat(&Token::Comma) {
            values.push(self.literal()?);
        }
        self.expect(Token::RParen)?;
        Ok(Selector::In { header, values })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> Headers {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_parse_equality() {
        let selector = Selector::parse("dashboardType = 'FINANCIAL_REPORT'").unwrap();
        assert_eq!(selector, Selector::equals("dashboardType", "FINANCIAL_REPORT"));
        assert!(selector.matches(&headers(&[("dashboardType", "FINANCIAL_REPORT")])));
        assert!(!selector.matches(&headers(&[("dashboardType", "CLICK_TRENDS")])));
        assert!(!selector.matches(&headers(&[])));
    }

    #[test]
    fn test_parse_compound_expression() {
        let selector = Selector::parse(
            "dashboardType IN ('CLICK_TRENDS', 'GEO_DISTRIBUTION') and not (tenant = 'acme')",
        )
        .unwrap();
        assert!(selector.matches(&headers(&[("dashboardType", "CLICK_TRENDS")])));
        assert!(!selector.matches(&headers(&[
            ("dashboardType", "GEO_DISTRIBUTION"),
            ("tenant", "acme")
        ])));
        assert!(!selector.matches(&headers(&[("dashboardType", "FINANCIAL_REPORT")])));
    }

    #[test]
    fn test_or_binds_looser_than_and() {
        let selector = Selector::parse("a = '1' OR b = '2' AND c = '3'").unwrap();
        assert!(selector.matches(&headers(&[("a", "1")])));
        assert!(!selector.matches(&headers(&[("b", "2")])));
        assert!(selector.matches(&headers(&[("b", "2"), ("c", "3")])));
    }

    #[test]
    fn test_not_in_and_escaped_quotes() {
        let selector = Selector::parse("owner NOT IN ('o''brien')").unwrap();
        assert!(!selector.matches(&headers(&[("owner", "o'brien")])));
        assert!(selector.matches(&headers(&[("owner", "smith")])));
    }

    #[test]
    fn test_display_round_trips() {
        let selector = Selector::parse("x <> 'a' OR y IN ('b','c')").unwrap();
        assert_eq!(Selector::parse(&selector.to_string()).unwrap(), selector);
        assert_eq!(
            Selector::equals("dashboardType", "FINANCIAL_REPORT").slug(),
            "dashboardtype_financial_report"
        );
    }

    #[test]
    fn test_rejects_malformed_expressions() {
        assert_eq!(
            Selector::parse("dashboardType = "),
            Err(SelectorError::UnexpectedEnd)
        );
        assert_eq!(
            Selector::parse("a = 'open"),
            Err(SelectorError::UnterminatedLiteral(4))
        );
        assert!(matches!(
            Selector::parse("a = 'x' b"),
            Err(SelectorError::UnexpectedToken { .. })
        ));
    }
}
