//! Request and response shapes for the events endpoint.

use crate::core::{DiscoverError, OutputType, Result, ResultRow};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Project id meaning "every project the principal can access".
pub const ALL_PROJECTS: i64 = -1;

/// True if the requested ids select every accessible project
pub fn selects_all_projects(ids: &[i64]) -> bool {
    ids.is_empty() || ids.contains(&ALL_PROJECTS)
}

/// Who is asking.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Principal {
    /// Requesting user
    pub user_id: u64,
    /// Organization the request is scoped to
    pub organization_id: u64,
    /// Allowed to query more than one project at once
    pub global_views: bool,
}

impl Principal {
    /// Creates a principal without multi-project access
    pub fn new(user_id: u64, organization_id: u64) -> Self {
        Self {
            user_id,
            organization_id,
            global_views: false,
        }
    }

    /// Grants or revokes multi-project access
    pub fn with_global_views(mut self, enabled: bool) -> Self {
        self.global_views = enabled;
        self
    }
}

/// An events query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EventsRequest {
    /// Field and function tokens, in output order
    #[serde(alias = "field")]
    pub fields: Vec<String>,
    /// Search filter
    pub query: String,
    /// Sort tokens; a leading `-` sorts descending
    #[serde(alias = "orderby")]
    pub sort: Vec<String>,
    /// Project ids; empty or `-1` selects every accessible project
    pub project: Vec<i64>,
    /// Absolute range start
    pub start: Option<String>,
    /// Absolute range end
    pub end: Option<String>,
    /// Relative range such as `14d`
    pub stats_period: Option<String>,
    /// Opaque page cursor
    pub cursor: Option<String>,
    /// Page size
    pub per_page: Option<usize>,
    /// Return every row up to the page cap without links
    pub no_pagination: bool,
}

impl EventsRequest {
    /// Creates a request selecting the given tokens
    pub fn new<S: AsRef<str>>(fields: &[S]) -> Self {
        Self {
            fields: fields.iter().map(|f| f.as_ref().to_string()).collect(),
            ..Self::default()
        }
    }

    /// Sets the search filter
    pub fn query(mut self, query: impl Into<String>) -> Self {
        self.query = query.into();
        self
    }

    /// Sets the sort tokens
    pub fn sort<S: AsRef<str>>(mut self, sort: &[S]) -> Self {
        self.sort = sort.iter().map(|s| s.as_ref().to_string()).collect();
        self
    }

    /// Sets the project ids
    pub fn projects(mut self, ids: &[i64]) -> Self {
        self.project = ids.to_vec();
        self
    }

    /// Sets a relative range
    pub fn stats_period(mut self, period: impl Into<String>) -> Self {
        self.stats_period = Some(period.into());
        self
    }

    /// Sets an absolute range
    pub fn range(mut self, start: impl Into<String>, end: impl Into<String>) -> Self {
        self.start = Some(start.into());
        self.end = Some(end.into());
        self
    }

    /// Sets the page cursor
    pub fn cursor(mut self, cursor: impl Into<String>) -> Self {
        self.cursor = Some(cursor.into());
        self
    }

    /// Sets the page size
    pub fn per_page(mut self, per_page: usize) -> Self {
        self.per_page = Some(per_page);
        self
    }

    /// Disables pagination
    pub fn no_pagination(mut self) -> Self {
        self.no_pagination = true;
        self
    }
}

/// Position within a result set, encoded as `limit:offset:is_prev`.
///
/// Pages are addressed by row offset, so `is_prev` only records which link
/// issued the cursor; it is kept so cursors round-trip unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    /// Page size the cursor was issued for, used when no page size is given
    pub limit: usize,
    /// Rows skipped
    pub offset: usize,
    /// Points at the previous page
    pub is_prev: bool,
}

impl Cursor {
    /// Parses a cursor string
    pub fn parse(text: &str) -> Result<Self> {
        let invalid = || DiscoverError::invalid_search(format!("Invalid cursor parameter: {text}"));
        let parts: Vec<&str> = text.split(':').collect();
        let [limit, offset, is_prev] = parts.as_slice() else {
            return Err(invalid());
        };
        Ok(Self {
            limit: limit.parse().map_err(|_| invalid())?,
            offset: offset.parse().map_err(|_| invalid())?,
            is_prev: match *is_prev {
                "0" => false,
                "1" => true,
                _ => return Err(invalid()),
            },
        })
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.limit, self.offset, u8::from(self.is_prev))
    }
}

/// One pagination link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageLink {
    /// Cursor to request
    pub cursor: String,
    /// Whether following the link returns rows
    pub results: bool,
}

/// Previous and next links.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageLinks {
    /// Towards the start of the result set
    pub previous: PageLink,
    /// Towards the end of the result set
    pub next: PageLink,
}

impl PageLinks {
    /// Builds links around a page
    pub fn around(limit: usize, offset: usize, has_next: bool) -> Self {
        let previous = Cursor {
            limit,
            offset: offset.saturating_sub(limit),
            is_prev: true,
        };
        let next = Cursor {
            limit,
            offset: offset.saturating_add(limit),
            is_prev: false,
        };
        Self {
            previous: PageLink {
                cursor: previous.to_string(),
                results: offset > 0,
            },
            next: PageLink {
                cursor: next.to_string(),
                results: has_next,
            },
        }
    }
}

/// Normalized rows plus per-column types.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EventsResponse {
    /// One entry per row, keyed by field name or aggregate alias
    pub data: Vec<ResultRow>,
    /// Output type per key
    pub meta: BTreeMap<String, OutputType>,
    /// Pagination links, absent when pagination is disabled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub links: Option<PageLinks>,
}

impl EventsResponse {
    /// Response with no rows
    pub fn empty() -> Self {
        Self::default()
    }
}
