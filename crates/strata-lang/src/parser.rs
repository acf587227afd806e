//! Recursive descent parser for filter expressions.

use crate::ast::{ComparisonOp, FilterExpr, Literal};
use crate::error::ParseError;
use crate::lexer::{Lexer, SpannedToken, Token};
use crate::span::{Span, Spanned};

/// Parser for the filter language.
pub struct Parser<'source> {
    lexer: Lexer<'source>,
    source: &'source str,
}

impl<'source> Parser<'source> {
    /// Create a new parser for the given source.
    pub fn new(source: &'source str) -> Self {
        Self {
            lexer: Lexer::new(source),
            source,
        }
    }

    /// Parse a complete filter expression, rejecting trailing input.
    pub fn parse_filter(&mut self) -> Result<FilterExpr, ParseError> {
        if self.source.trim().is_empty() {
            return Err(ParseError::new("empty filter expression", Span::new(0, 0)));
        }

        let expr = self.parse_or_condition()?;

        if let Some(tok) = self.lexer.next_token() {
            let tok = tok?;
            return Err(ParseError::new(
                format!("unexpected {} after expression", tok.token.describe()),
                tok.span,
            )
            .with_hint("combine conditions with 'and' or 'or'"));
        }

        Ok(expr)
    }

    /// Parse OR conditions (`or` / `,`).
    fn parse_or_condition(&mut self) -> Result<FilterExpr, ParseError> {
        let mut left = self.parse_and_condition()?;

        while matches!(self.lexer.peek(), Some(Token::Or) | Some(Token::Comma)) {
            self.next_token()?;
            let right = self.parse_and_condition()?;
            left = match left {
                FilterExpr::Or(mut parts) => {
                    parts.push(right);
                    FilterExpr::Or(parts)
                }
                _ => FilterExpr::Or(vec![left, right]),
            };
        }

        Ok(left)
    }

    /// Parse AND conditions (`and` / `;`).
    fn parse_and_condition(&mut self) -> Result<FilterExpr, ParseError> {
        let mut left = self.parse_primary_condition()?;

        while matches!(self.lexer.peek(), Some(Token::And) | Some(Token::Semicolon)) {
            self.next_token()?;
            let right = self.parse_primary_condition()?;
            left = match left {
                FilterExpr::And(mut parts) => {
                    parts.push(right);
                    FilterExpr::And(parts)
                }
                _ => FilterExpr::And(vec![left, right]),
            };
        }

        Ok(left)
    }

    /// Parse a parenthesized group or a single field condition.
    fn parse_primary_condition(&mut self) -> Result<FilterExpr, ParseError> {
        if self.lexer.peek() == Some(&Token::LParen) {
            self.next_token()?;
            let inner = self.parse_or_condition()?;
            self.expect_token(Token::RParen)?;
            return Ok(inner);
        }

        let field = self.expect_word()?;
        let op_tok = self.next_token()?;

        let op = match &op_tok.token {
            Token::Eq => ComparisonOp::Eq,
            Token::Ne => ComparisonOp::Ne,
            Token::Lt => ComparisonOp::Lt,
            Token::Le => ComparisonOp::Le,
            Token::Gt => ComparisonOp::Gt,
            Token::Ge => ComparisonOp::Ge,
            Token::In | Token::Out => {
                let values = self.parse_value_list()?;
                return Ok(FilterExpr::In {
                    field,
                    values,
                    negated: matches!(op_tok.token, Token::Out),
                });
            }
            other => {
                return Err(ParseError::new(
                    format!("expected comparison operator, found {}", other.describe()),
                    op_tok.span,
                )
                .with_hint("use '==' for equality or '=in=' for set membership"))
            }
        };

        let value = self.parse_literal()?;
        Ok(FilterExpr::Comparison { field, op, value })
    }

    /// Parse `( value, value, ... )`.
    fn parse_value_list(&mut self) -> Result<Vec<Spanned<Literal>>, ParseError> {
        self.expect_token(Token::LParen)?;
        let mut values = vec![self.parse_literal()?];

        while self.lexer.peek() == Some(&Token::Comma) {
            self.next_token()?;
            values.push(self.parse_literal()?);
        }

        self.expect_token(Token::RParen)?;
        Ok(values)
    }

    /// Parse a single value.
    fn parse_literal(&mut self) -> Result<Spanned<Literal>, ParseError> {
        let tok = self.next_token()?;
        let literal = match tok.token {
            Token::Word(w) => Literal::Word(w),
            Token::Quoted(s) | Token::QuotedSingle(s) => Literal::Quoted(s),
            // keywords are valid values in value position
            Token::And => Literal::Word(self.source[tok.span.start..tok.span.end].to_string()),
            Token::Or => Literal::Word(self.source[tok.span.start..tok.span.end].to_string()),
            other => {
                return Err(ParseError::new(
                    format!("expected value, found {}", other.describe()),
                    tok.span,
                ))
            }
        };
        Ok(Spanned::new(literal, tok.span))
    }

    /// Expect and consume a field name.
    fn expect_word(&mut self) -> Result<Spanned<String>, ParseError> {
        let tok = self.next_token()?;
        match tok.token {
            Token::Word(name) => Ok(Spanned::new(name, tok.span)),
            other => Err(ParseError::new(
                format!("expected field name, found {}", other.describe()),
                tok.span,
            )),
        }
    }

    /// Expect and consume a specific token.
    fn expect_token(&mut self, expected: Token) -> Result<SpannedToken, ParseError> {
        let tok = self.next_token()?;
        if std::mem::discriminant(&tok.token) == std::mem::discriminant(&expected) {
            Ok(tok)
        } else {
            Err(ParseError::new(
                format!(
                    "expected {}, found {}",
                    expected.describe(),
                    tok.token.describe()
                ),
                tok.span,
            ))
        }
    }

    /// Get the next token or error at end of input.
    fn next_token(&mut self) -> Result<SpannedToken, ParseError> {
        match self.lexer.next_token() {
            Some(tok) => tok,
            None => Err(ParseError::new(
                "unexpected end of filter",
                Span::new(self.source.len(), self.source.len()),
            )),
        }
    }
}

/// Parse a filter source string.
pub fn parse(source: &str) -> Result<FilterExpr, ParseError> {
    Parser::new(source).parse_filter()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn word(s: &str) -> Literal {
        Literal::Word(s.to_string())
    }

    #[test]
    fn test_parse_equality() {
        let expr = parse("name == name").unwrap();
        if let FilterExpr::Comparison { field, op, value } = expr {
            assert_eq!(field.value, "name");
            assert_eq!(op, ComparisonOp::Eq);
            assert_eq!(value.value, word("name"));
        } else {
            panic!("expected Comparison");
        }
    }

    #[test]
    fn test_parse_and_binds_tighter_than_or() {
        let expr = parse("a == 1 or b == 2 and c == 3").unwrap();
        if let FilterExpr::Or(parts) = expr {
            assert_eq!(parts.len(), 2);
            assert!(matches!(parts[0], FilterExpr::Comparison { .. }));
            assert!(matches!(&parts[1], FilterExpr::And(inner) if inner.len() == 2));
        } else {
            panic!("expected Or");
        }
    }

    #[test]
    fn test_parse_flat_or_chain() {
        let expr = parse("name == name or name == module or name == entity").unwrap();
        assert!(matches!(expr, FilterExpr::Or(parts) if parts.len() == 3));
    }

    #[test]
    fn test_parse_in() {
        let expr = parse("name=in=(name, module)").unwrap();
        if let FilterExpr::In {
            field,
            values,
            negated,
        } = expr
        {
            assert_eq!(field.value, "name");
            assert!(!negated);
            let texts: Vec<_> = values.iter().map(|v| v.value.text()).collect();
            assert_eq!(texts, vec!["name", "module"]);
        } else {
            panic!("expected In");
        }
    }

    #[test]
    fn test_parse_out() {
        let expr = parse("name=out=(a)").unwrap();
        assert!(matches!(expr, FilterExpr::In { negated: true, .. }));
    }

    #[test]
    fn test_parse_parentheses() {
        let expr = parse("(a == 1 or a == 2) and b == 3").unwrap();
        if let FilterExpr::And(parts) = expr {
            assert!(matches!(&parts[0], FilterExpr::Or(inner) if inner.len() == 2));
        } else {
            panic!("expected And");
        }
    }

    #[test]
    fn test_parse_rsql_separators() {
        let semicolon = parse("a==1;b==2").unwrap();
        assert!(matches!(semicolon, FilterExpr::And(_)));
        let comma = parse("a==1,b==2").unwrap();
        assert!(matches!(comma, FilterExpr::Or(_)));
    }

    #[test]
    fn test_fields_collected() {
        let expr = parse("text == x and (numberLong > 1 or bool == true)").unwrap();
        assert_eq!(expr.fields(), vec!["text", "numberLong", "bool"]);
    }

    #[test]
    fn test_empty_filter_rejected() {
        assert!(parse("   ").is_err());
    }

    #[test]
    fn test_trailing_input_rejected() {
        let err = parse("a == 1 b == 2").unwrap_err();
        assert!(err.message.contains("after expression"));
    }

    #[test]
    fn test_missing_operator() {
        let source = "name module";
        let err = parse(source).unwrap_err();
        assert!(err.format_with_source(source).contains("line 1"));
    }

    #[test]
    fn test_keyword_as_value() {
        let expr = parse("name == or").unwrap();
        if let FilterExpr::Comparison { value, .. } = expr {
            assert_eq!(value.value, word("or"));
        } else {
            panic!("expected Comparison");
        }
    }
}
