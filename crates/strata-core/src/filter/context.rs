//! List request parameters.

use crate::error::{Error, Result};

/// Request parameter carrying the filter text.
pub const PARAM_SEARCH: &str = "search";
/// Request parameter carrying the page size.
pub const PARAM_LIMIT: &str = "limit";
/// Request parameter carrying the page offset.
pub const PARAM_START: &str = "start";
/// Request parameter carrying the comma-separated sort fields.
pub const PARAM_ORDER_BY: &str = "orderBy";

/// What to list: filter, ordering and page.
///
/// A `limit` of 0 means unbounded. Order terms prefixed with `-` sort
/// descending.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterContext {
    /// Filter expression text.
    pub search: Option<String>,
    /// Sort terms.
    pub order_by: Vec<String>,
    /// Page size.
    pub limit: u64,
    /// Rows to skip.
    pub start: u64,
}

impl FilterContext {
    /// Unfiltered, unbounded context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the filter text.
    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }

    /// Set the sort terms.
    pub fn with_order_by<I, S>(mut self, terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.order_by = terms.into_iter().map(Into::into).collect();
        self
    }

    /// Set the page size.
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = limit;
        self
    }

    /// Set the page offset.
    pub fn with_start(mut self, start: u64) -> Self {
        self.start = start;
        self
    }

    /// Filter text, if any non-blank text was given.
    pub fn search(&self) -> Option<&str> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// Builds [`FilterContext`]s from request parameters.
#[derive(Debug, Clone, Copy)]
pub struct FilterContextBuilder {
    api_list_limit: u64,
}

impl FilterContextBuilder {
    /// Builder applying `api_list_limit` when no limit is given.
    pub fn new(api_list_limit: u64) -> Self {
        Self { api_list_limit }
    }

    /// Build a context from name/value pairs. Unknown names are ignored.
    pub fn from_params<'a, I>(&self, params: I) -> Result<FilterContext>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut context = FilterContext::new().with_limit(self.api_list_limit);
        for (name, value) in params {
            match name {
                PARAM_SEARCH => context.search = Some(value.to_string()),
                PARAM_LIMIT => context.limit = parse_count(name, value)?,
                PARAM_START => context.start = parse_count(name, value)?,
                PARAM_ORDER_BY => {
                    context.order_by = value
                        .split(',')
                        .map(str::trim)
                        .filter(|term| !term.is_empty())
                        .map(str::to_string)
                        .collect()
                }
                _ => {}
            }
        }
        Ok(context)
    }
}

fn parse_count(name: &str, value: &str) -> Result<u64> {
    value.trim().parse().map_err(|_| Error::InvalidParameter {
        name: name.to_string(),
        value: value.to_string(),
    })
}
