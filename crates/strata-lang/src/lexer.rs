//! Lexer for the filter language using logos.

use crate::error::ParseError;
use crate::span::Span;
use logos::Logos;

/// Token types for the filter language.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+")]
pub enum Token {
    // Logical operators
    #[token("and")]
    #[token("AND")]
    And,
    #[token("or")]
    #[token("OR")]
    Or,
    #[token(";")]
    Semicolon,
    #[token(",")]
    Comma,

    // Comparison operators
    #[token("==")]
    Eq,
    #[token("!=")]
    Ne,
    #[token("<")]
    #[token("=lt=")]
    Lt,
    #[token("<=")]
    #[token("=le=")]
    Le,
    #[token(">")]
    #[token("=gt=")]
    Gt,
    #[token(">=")]
    #[token("=ge=")]
    Ge,

    // Set operators
    #[token("=in=")]
    In,
    #[token("=out=")]
    Out,

    // Grouping
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,

    // Quoted value (double quotes)
    #[regex(r#""([^"\\]|\\.)*""#, |lex| {
        let s = lex.slice();
        unescape(&s[1..s.len() - 1])
    })]
    Quoted(String),

    // Quoted value (single quotes)
    #[regex(r#"'([^'\\]|\\.)*'"#, |lex| {
        let s = lex.slice();
        unescape(&s[1..s.len() - 1])
    })]
    QuotedSingle(String),

    // Field name or unquoted value: anything up to a delimiter
    #[regex(r#"[^\s'"(),;=!<>]+"#, |lex| lex.slice().to_string())]
    Word(String),
}

impl Token {
    /// Short human-readable rendering for error messages.
    pub fn describe(&self) -> String {
        match self {
            Token::And => "'and'".into(),
            Token::Or => "'or'".into(),
            Token::Semicolon => "';'".into(),
            Token::Comma => "','".into(),
            Token::Eq => "'=='".into(),
            Token::Ne => "'!='".into(),
            Token::Lt => "'<'".into(),
            Token::Le => "'<='".into(),
            Token::Gt => "'>'".into(),
            Token::Ge => "'>='".into(),
            Token::In => "'=in='".into(),
            Token::Out => "'=out='".into(),
            Token::LParen => "'('".into(),
            Token::RParen => "')'".into(),
            Token::Quoted(s) | Token::QuotedSingle(s) => format!("string '{}'", s),
            Token::Word(w) => format!("'{}'", w),
        }
    }
}

fn unescape(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            result.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => result.push('\n'),
            Some('t') => result.push('\t'),
            Some(other) => result.push(other),
            None => result.push('\\'),
        }
    }

    result
}

/// A token with its span in the source.
#[derive(Debug, Clone, PartialEq)]
pub struct SpannedToken {
    pub token: Token,
    pub span: Span,
}

/// Lexer producing spanned tokens with one token of lookahead.
pub struct Lexer<'source> {
    inner: logos::Lexer<'source, Token>,
    peeked: Option<Option<Result<SpannedToken, ParseError>>>,
}

impl<'source> Lexer<'source> {
    /// Create a new lexer for the given source.
    pub fn new(source: &'source str) -> Self {
        Self {
            inner: Token::lexer(source),
            peeked: None,
        }
    }

    /// Peek at the next token without consuming it.
    ///
    /// Lexing errors are surfaced by the following `next_token` call.
    pub fn peek(&mut self) -> Option<&Token> {
        if self.peeked.is_none() {
            self.peeked = Some(self.next_inner());
        }
        match self.peeked.as_ref() {
            Some(Some(Ok(tok))) => Some(&tok.token),
            _ => None,
        }
    }

    /// Get the next token.
    pub fn next_token(&mut self) -> Option<Result<SpannedToken, ParseError>> {
        match self.peeked.take() {
            Some(peeked) => peeked,
            None => self.next_inner(),
        }
    }

    fn next_inner(&mut self) -> Option<Result<SpannedToken, ParseError>> {
        let token = self.inner.next()?;
        let span: Span = self.inner.span().into();
        Some(match token {
            Ok(token) => Ok(SpannedToken { token, span }),
            Err(()) => Err(ParseError::new(
                format!("unexpected character sequence '{}'", self.inner.slice()),
                span,
            )
            .with_hint("quote values that contain operator characters")),
        })
    }
}

/// Tokenize a source string, stopping at the first lexing error.
pub fn tokenize(source: &str) -> Result<Vec<SpannedToken>, ParseError> {
    let mut lexer = Lexer::new(source);
    let mut tokens = Vec::new();
    while let Some(tok) = lexer.next_token() {
        tokens.push(tok?);
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token> {
        tokenize(source)
            .unwrap()
            .into_iter()
            .map(|t| t.token)
            .collect()
    }

    #[test]
    fn test_simple_equality() {
        assert_eq!(
            kinds("name == module"),
            vec![
                Token::Word("name".into()),
                Token::Eq,
                Token::Word("module".into())
            ]
        );
    }

    #[test]
    fn test_hyphenated_values() {
        let tokens = kinds("text == logKey-basicType and numberLong == 10");
        assert_eq!(tokens[2], Token::Word("logKey-basicType".into()));
        assert_eq!(tokens[3], Token::And);
        assert_eq!(tokens[6], Token::Word("10".into()));
    }

    #[test]
    fn test_in_operator() {
        assert_eq!(
            kinds("name=in=(name, module)"),
            vec![
                Token::Word("name".into()),
                Token::In,
                Token::LParen,
                Token::Word("name".into()),
                Token::Comma,
                Token::Word("module".into()),
                Token::RParen,
            ]
        );
    }

    #[test]
    fn test_keyword_prefix_is_word() {
        assert_eq!(kinds("android"), vec![Token::Word("android".into())]);
        assert_eq!(kinds("order"), vec![Token::Word("order".into())]);
    }

    #[test]
    fn test_quoted_values() {
        let tokens = kinds(r#"text == "a b" or text == 'c\'d'"#);
        assert_eq!(tokens[2], Token::Quoted("a b".into()));
        assert_eq!(tokens[6], Token::QuotedSingle("c'd".into()));
    }

    #[test]
    fn test_rsql_aliases() {
        assert_eq!(
            kinds("a=lt=1;b=ge=2"),
            vec![
                Token::Word("a".into()),
                Token::Lt,
                Token::Word("1".into()),
                Token::Semicolon,
                Token::Word("b".into()),
                Token::Ge,
                Token::Word("2".into()),
            ]
        );
    }

    #[test]
    fn test_lexing_error() {
        let err = tokenize("name = x").unwrap_err();
        assert_eq!(err.span.start, 5);
    }
}
