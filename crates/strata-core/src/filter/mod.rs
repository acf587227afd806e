//! Filtering, ordering and paging of record lists.

pub mod context;
pub mod translator;

pub use context::{FilterContext, FilterContextBuilder};
pub use translator::{FilterTranslator, SqlFilter};
