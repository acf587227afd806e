//! STRATA Filter Language
//!
//! This crate provides the lexer and parser for the small relational filter
//! language used to select entity records.
//!
//! # Syntax
//!
//! ```text
//! name == module
//! text == logKey-basicType and numberLong == 10
//! name == name or name == module
//! name=in=(name, module)
//! (numberLong > 10 or bool == true) and text != 'a b'
//! a==1;b==2          // ';' is AND, ',' is OR
//! ```
//!
//! Values are untyped: unquoted words and quoted strings are both kept as
//! text and typed later against the entity schema.
//!
//! # Usage
//!
//! ```rust
//! use strata_lang::{parse, FilterExpr};
//!
//! let expr = parse("name=in=(name, module)").unwrap();
//! assert!(matches!(expr, FilterExpr::In { .. }));
//! ```

pub mod ast;
pub mod error;
pub mod lexer;
pub mod parser;
pub mod span;

pub use ast::{ComparisonOp, FilterExpr, Literal};
pub use error::ParseError;
pub use span::{Span, Spanned};

/// Parse a filter string into an expression tree.
pub fn parse(source: &str) -> Result<FilterExpr, ParseError> {
    parser::parse(source)
}

/// Tokenize a filter string (for debugging/testing).
pub fn tokenize(source: &str) -> Result<Vec<lexer::SpannedToken>, ParseError> {
    lexer::tokenize(source)
}
