//! Parser for filter expressions.

use std::iter::Peekable;
use std::str::Chars;

use crate::error::{RagStoreError, Result};
use crate::vector::filter::{CompareOp, FilterExpr, FilterField, FilterLiteral};

/// Recursive-descent parser for the filter language.
///
/// Grammar (keywords are case-insensitive):
///
/// ```text
/// expr       := or
/// or         := and (("or" | "||") and)*
/// and        := unary (("and" | "&&") unary)*
/// unary      := ("not" | "!") unary | "(" expr ")" | predicate
/// predicate  := field op literal
///             | field ["not"] "in" "[" literal ("," literal)* "]"
///             | field "like" string
/// ```
#[derive(Debug)]
pub struct FilterParser {
    max_depth: usize,
}

impl Default for FilterParser {
    fn default() -> Self {
        Self::new()
    }
}

impl FilterParser {
    pub fn new() -> Self {
        FilterParser { max_depth: 64 }
    }

    /// Parse a filter expression. Errors are [`RagStoreError::ValidationError`].
    pub fn parse(&self, input: &str) -> Result<FilterExpr> {
        let tokens = tokenize(input)?;
        if tokens.is_empty() {
            return Err(RagStoreError::validation("empty filter expression"));
        }

        let mut parser = TokenParser {
            tokens,
            pos: 0,
            depth: 0,
            max_depth: self.max_depth.max(1),
        };
        let expr = parser.parse_or_expression()?;
        if let Some(token) = parser.peek() {
            return Err(RagStoreError::validation(format!(
                "unexpected {} in filter expression",
                token.describe()
            )));
        }
        Ok(expr)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Num(f64),
    Op(CompareOp),
    AndAnd,
    OrOr,
    Bang,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Ident(s) => format!("'{s}'"),
            Token::Str(s) => format!("string '{s}'"),
            Token::Num(n) => format!("number {n}"),
            Token::Op(op) => format!("'{}'", op.symbol()),
            Token::AndAnd => "'&&'".to_string(),
            Token::OrOr => "'||'".to_string(),
            Token::Bang => "'!'".to_string(),
            Token::LParen => "'('".to_string(),
            Token::RParen => "')'".to_string(),
            Token::LBracket => "'['".to_string(),
            Token::RBracket => "']'".to_string(),
            Token::Comma => "','".to_string(),
        }
    }

    fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self, Token::Ident(s) if s.eq_ignore_ascii_case(keyword))
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut chars = input.chars().peekable();
    let mut tokens = Vec::new();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' | ')' | '[' | ']' | ',' => {
                chars.next();
                tokens.push(match c {
                    '(' => Token::LParen,
                    ')' => Token::RParen,
                    '[' => Token::LBracket,
                    ']' => Token::RBracket,
                    _ => Token::Comma,
                });
            }
            '\'' | '"' => {
                chars.next();
                tokens.push(Token::Str(read_string(&mut chars, c)?));
            }
            '=' | '!' | '<' | '>' => {
                chars.next();
                let followed_by_eq = chars.next_if_eq(&'=').is_some();
                tokens.push(match (c, followed_by_eq) {
                    ('=', _) => Token::Op(CompareOp::Eq),
                    ('!', true) => Token::Op(CompareOp::Ne),
                    ('!', false) => Token::Bang,
                    ('<', true) => Token::Op(CompareOp::Le),
                    ('<', false) => Token::Op(CompareOp::Lt),
                    ('>', true) => Token::Op(CompareOp::Ge),
                    _ => Token::Op(CompareOp::Gt),
                });
            }
            '&' | '|' => {
                chars.next();
                if chars.next_if_eq(&c).is_none() {
                    return Err(RagStoreError::validation(format!(
                        "expected '{c}{c}' in filter expression"
                    )));
                }
                tokens.push(if c == '&' { Token::AndAnd } else { Token::OrOr });
            }
            c if c.is_ascii_digit() || c == '-' || c == '+' => {
                tokens.push(Token::Num(read_number(&mut chars)?));
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_alphanumeric() || c == '_' || c == '.' {
                        ident.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(ident));
            }
            other => {
                return Err(RagStoreError::validation(format!(
                    "unexpected character '{other}' in filter expression"
                )));
            }
        }
    }

    Ok(tokens)
}

fn read_string(chars: &mut Peekable<Chars<'_>>, quote: char) -> Result<String> {
    let mut value = String::new();
    loop {
        match chars.next() {
            Some('\\') => match chars.next() {
                Some(escaped) => value.push(escaped),
                None => break,
            },
            Some(c) if c == quote => return Ok(value),
            Some(c) => value.push(c),
            None => break,
        }
    }
    Err(RagStoreError::validation("unterminated string literal"))
}

fn read_number(chars: &mut Peekable<Chars<'_>>) -> Result<f64> {
    let mut text = String::new();
    while let Some(&c) = chars.peek() {
        let sign_allowed = text.is_empty() || text.ends_with(['e', 'E']);
        let is_sign = (c == '-' || c == '+') && sign_allowed;
        if c.is_ascii_digit() || c == '.' || c == 'e' || c == 'E' || is_sign {
            text.push(c);
            chars.next();
        } else {
            break;
        }
    }
    text.parse::<f64>()
        .ok()
        .filter(|n| n.is_finite())
        .ok_or_else(|| RagStoreError::validation(format!("invalid number '{text}'")))
}

struct TokenParser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    max_depth: usize,
}

impl TokenParser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, expected: Token) -> Result<()> {
        match self.next() {
            Some(token) if token == expected => Ok(()),
            Some(token) => Err(RagStoreError::validation(format!(
                "expected {}, found {}",
                expected.describe(),
                token.describe()
            ))),
            None => Err(RagStoreError::validation(format!(
                "expected {}, found end of expression",
                expected.describe()
            ))),
        }
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.peek().is_some_and(|t| t.is_keyword(keyword)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn parse_or_expression(&mut self) -> Result<FilterExpr> {
        let mut clauses = vec![self.parse_and_expression()?];
        while self.eat_keyword("or") || self.next_if(Token::OrOr) {
            clauses.push(self.parse_and_expression()?);
        }
        Ok(if clauses.len() == 1 {
            clauses.remove(0)
        } else {
            FilterExpr::Or(clauses)
        })
    }

    fn parse_and_expression(&mut self) -> Result<FilterExpr> {
        let mut clauses = vec![self.parse_unary()?];
        while self.eat_keyword("and") || self.next_if(Token::AndAnd) {
            clauses.push(self.parse_unary()?);
        }
        Ok(if clauses.len() == 1 {
            clauses.remove(0)
        } else {
            FilterExpr::And(clauses)
        })
    }

    fn parse_unary(&mut self) -> Result<FilterExpr> {
        self.depth += 1;
        if self.depth > self.max_depth {
            return Err(RagStoreError::validation("filter expression is nested too deeply"));
        }

        let expr = if self.eat_keyword("not") || self.next_if(Token::Bang) {
            FilterExpr::Not(Box::new(self.parse_unary()?))
        } else if self.next_if(Token::LParen) {
            let inner = self.parse_or_expression()?;
            self.expect(Token::RParen)?;
            inner
        } else {
            self.parse_predicate()?
        };

        self.depth -= 1;
        Ok(expr)
    }

    fn parse_predicate(&mut self) -> Result<FilterExpr> {
        let field = match self.next() {
            Some(Token::Ident(name)) => FilterField::parse(&name)?,
            Some(token) => {
                return Err(RagStoreError::validation(format!(
                    "expected a field name, found {}",
                    token.describe()
                )));
            }
            None => {
                return Err(RagStoreError::validation(
                    "expected a field name, found end of expression",
                ));
            }
        };

        if self.eat_keyword("not") {
            if !self.eat_keyword("in") {
                return Err(RagStoreError::validation("expected 'in' after 'not'"));
            }
            let values = self.parse_list()?;
            return Ok(FilterExpr::In {
                field,
                values,
                negated: true,
            });
        }
        if self.eat_keyword("in") {
            let values = self.parse_list()?;
            return Ok(FilterExpr::In {
                field,
                values,
                negated: false,
            });
        }
        if self.eat_keyword("like") {
            return match self.next() {
                Some(Token::Str(pattern)) => Ok(FilterExpr::Like { field, pattern }),
                _ => Err(RagStoreError::validation("'like' needs a string pattern")),
            };
        }

        match self.next() {
            Some(Token::Op(op)) => {
                let value = self.parse_literal()?;
                Ok(FilterExpr::Compare { field, op, value })
            }
            Some(token) => Err(RagStoreError::validation(format!(
                "expected an operator after '{field}', found {}",
                token.describe()
            ))),
            None => Err(RagStoreError::validation(format!(
                "expected an operator after '{field}'"
            ))),
        }
    }

    fn parse_list(&mut self) -> Result<Vec<FilterLiteral>> {
        self.expect(Token::LBracket)?;
        let mut values = Vec::new();
        if self.next_if(Token::RBracket) {
            return Ok(values);
        }
        loop {
            values.push(self.parse_literal()?);
            if self.next_if(Token::Comma) {
                continue;
            }
            self.expect(Token::RBracket)?;
            return Ok(values);
        }
    }

    fn parse_literal(&mut self) -> Result<FilterLiteral> {
        match self.next() {
            Some(Token::Str(s)) => Ok(FilterLiteral::String(s)),
            Some(Token::Num(n)) => Ok(FilterLiteral::Number(n)),
            Some(token) if token.is_keyword("true") => Ok(FilterLiteral::Bool(true)),
            Some(token) if token.is_keyword("false") => Ok(FilterLiteral::Bool(false)),
            Some(token) => Err(RagStoreError::validation(format!(
                "expected a literal, found {}",
                token.describe()
            ))),
            None => Err(RagStoreError::validation(
                "expected a literal, found end of expression",
            )),
        }
    }

    fn next_if(&mut self, expected: Token) -> bool {
        if self.peek() == Some(&expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(input: &str) -> Result<FilterExpr> {
        FilterParser::new().parse(input)
    }

    #[test]
    fn test_parse_simple_comparison() {
        let expr = parse("doc_id == 'd1'").unwrap();
        assert_eq!(expr, FilterExpr::doc_id_eq("d1"));
    }

    #[test]
    fn test_parse_in_list() {
        let expr = parse(r#"id in ["a", 'b']"#).unwrap();
        assert_eq!(expr, FilterExpr::id_in(["a", "b"]));

        let expr = parse("id not in []").unwrap();
        assert!(matches!(expr, FilterExpr::In { negated: true, ref values, .. } if values.is_empty()));
    }

    #[test]
    fn test_operator_precedence() {
        let expr = parse("id == 'a' or doc_id == 'd1' and content like 'x%'").unwrap();
        match expr {
            FilterExpr::Or(clauses) => {
                assert_eq!(clauses.len(), 2);
                assert!(matches!(clauses[1], FilterExpr::And(_)));
            }
            other => panic!("expected Or, got {other:?}"),
        }
    }

    #[test]
    fn test_symbolic_operators_and_parentheses() {
        let expr = parse("!(metadata.page >= -2.5e1 || metadata.public == true) && id != 'x'").unwrap();
        match expr {
            FilterExpr::And(clauses) => {
                assert!(matches!(clauses[0], FilterExpr::Not(_)));
                assert!(matches!(
                    clauses[1],
                    FilterExpr::Compare {
                        op: CompareOp::Ne,
                        ..
                    }
                ));
            }
            other => panic!("expected And, got {other:?}"),
        }
    }

    #[test]
    fn test_keywords_are_case_insensitive() {
        assert!(parse("id == 'a' AND NOT doc_id IN ['x']").is_ok());
        assert!(parse("metadata.draft == FALSE").is_ok());
    }

    #[test]
    fn test_escaped_quotes() {
        let expr = parse(r"content == 'it\'s'").unwrap();
        assert!(matches!(
            expr,
            FilterExpr::Compare { value: FilterLiteral::String(ref s), .. } if s == "it's"
        ));
    }

    #[test]
    fn test_invalid_expressions() {
        for input in [
            "",
            "   ",
            "doc_id",
            "doc_id ==",
            "doc_id = = 'x'",
            "embedding == 'x'",
            "metadata == 'x'",
            "(id == 'a'",
            "id == 'a')",
            "id == 'unterminated",
            "id & 'a'",
            "id in 'a'",
            "content like 3",
            "id == 'a' id == 'b'",
            "id == 1e999",
            "id == #",
        ] {
            assert!(
                matches!(parse(input), Err(RagStoreError::ValidationError(_))),
                "expected failure for {input:?}"
            );
        }
    }

    #[test]
    fn test_nesting_limit() {
        let deep = format!("{}id == 'a'{}", "(".repeat(100), ")".repeat(100));
        assert!(parse(&deep).is_err());
    }
}
