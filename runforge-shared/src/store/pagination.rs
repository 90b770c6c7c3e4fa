/// Pagination types and the opaque cursor codec
///
/// Listing endpoints support two styles:
///
/// - **Offset pagination**: `limit` + `offset`, response carries `total`.
/// - **Cursor pagination**: keyset iteration over `(sort_field, id)`. The
///   cursor is an opaque base64 token produced by the store and passed back
///   verbatim; it carries just enough index state to resume iteration and
///   never any authorization context.
///
/// Both backends (Postgres and in-memory) share the token codec and the
/// page-assembly logic here so their cursors are interchangeable in shape.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Maximum page size accepted from clients
pub const MAX_PAGE_SIZE: i64 = 100;

/// Default page size when the client does not specify one
pub const DEFAULT_PAGE_SIZE: i64 = 20;

/// Offset-based page request
#[derive(Debug, Clone, Copy)]
pub struct Pagination {
    /// Page size, clamped to 1..=MAX_PAGE_SIZE
    pub limit: i64,

    /// Rows to skip
    pub offset: i64,
}

impl Pagination {
    /// Builds a pagination request, clamping out-of-range values
    pub fn new(limit: Option<i64>, offset: Option<i64>) -> Self {
        let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        let offset = offset.unwrap_or(0).max(0);
        Pagination { limit, offset }
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Pagination {
            limit: DEFAULT_PAGE_SIZE,
            offset: 0,
        }
    }
}

/// Offset-based page response
#[derive(Debug, Clone, Serialize)]
pub struct OffsetPage<T> {
    /// Items on this page
    pub items: Vec<T>,

    /// Total matching rows
    pub total: i64,

    /// Requested page size
    pub limit: i64,

    /// Requested offset
    pub offset: i64,
}

/// Sortable fields for cursor pagination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    CreatedAt,
    UpdatedAt,
    Priority,
    Name,
}

impl SortField {
    /// Wire representation, also the whitelisted SQL column name
    pub fn as_str(&self) -> &'static str {
        match self {
            SortField::CreatedAt => "created_at",
            SortField::UpdatedAt => "updated_at",
            SortField::Priority => "priority",
            SortField::Name => "name",
        }
    }
}

impl fmt::Display for SortField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created_at" => Ok(SortField::CreatedAt),
            "updated_at" => Ok(SortField::UpdatedAt),
            "priority" => Ok(SortField::Priority),
            "name" => Ok(SortField::Name),
            other => Err(format!("unknown sort field: {}", other)),
        }
    }
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }

    /// The opposite order, used when walking a page backwards
    pub fn reversed(&self) -> SortOrder {
        match self {
            SortOrder::Asc => SortOrder::Desc,
            SortOrder::Desc => SortOrder::Asc,
        }
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "asc" => Ok(SortOrder::Asc),
            "desc" => Ok(SortOrder::Desc),
            other => Err(format!("unknown sort order: {}", other)),
        }
    }
}

/// Which way a cursor walks relative to the sorted listing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CursorDirection {
    Next,
    Prev,
}

/// Decoded cursor token
///
/// Carries the sort configuration it was minted under plus the `(value, id)`
/// keyset position of the row it points past. A cursor presented with a
/// different sort configuration than it was minted under is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    /// Sort field the cursor was minted under
    #[serde(rename = "f")]
    pub field: SortField,

    /// Sort order the cursor was minted under
    #[serde(rename = "o")]
    pub order: SortOrder,

    /// Stringified sort value of the boundary row
    #[serde(rename = "v")]
    pub value: String,

    /// Boundary row id (keyset tiebreak)
    #[serde(rename = "id")]
    pub id: Uuid,

    /// Walk direction
    #[serde(rename = "d")]
    pub direction: CursorDirection,
}

impl Cursor {
    /// Encodes the cursor as an opaque URL-safe base64 token
    pub fn encode(&self) -> String {
        // Serializing a plain struct of primitives cannot fail
        let json = serde_json::to_vec(self).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(json)
    }

    /// Decodes a token back into a cursor
    pub fn decode(token: &str) -> Result<Self, CursorError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token.as_bytes())
            .map_err(|_| CursorError::Malformed)?;
        serde_json::from_slice(&bytes).map_err(|_| CursorError::Malformed)
    }
}

/// Cursor decoding / validation errors
#[derive(Debug, thiserror::Error)]
pub enum CursorError {
    #[error("cursor token is malformed")]
    Malformed,

    #[error("cursor does not match the requested sort: {0}")]
    SortMismatch(String),
}

/// Cursor-based page request
#[derive(Debug, Clone)]
pub struct CursorQuery {
    /// Page size, clamped to 1..=MAX_PAGE_SIZE
    pub limit: i64,

    /// Decoded cursor, `None` for the first page
    pub cursor: Option<Cursor>,

    /// Sort field
    pub sort_field: SortField,

    /// Sort order
    pub sort_order: SortOrder,
}

impl CursorQuery {
    /// Builds a cursor query, decoding and validating the token if present
    pub fn new(
        limit: Option<i64>,
        cursor: Option<&str>,
        sort_field: SortField,
        sort_order: SortOrder,
    ) -> Result<Self, CursorError> {
        let cursor = match cursor {
            Some(token) => {
                let cursor = Cursor::decode(token)?;
                if cursor.field != sort_field || cursor.order != sort_order {
                    return Err(CursorError::SortMismatch(format!(
                        "cursor was minted for {} {}",
                        cursor.field, cursor.order
                    )));
                }
                Some(cursor)
            }
            None => None,
        };

        Ok(CursorQuery {
            limit: limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
            cursor,
            sort_field,
            sort_order,
        })
    }

    /// True when this query walks backwards from its cursor
    pub fn walks_prev(&self) -> bool {
        matches!(
            self.cursor.as_ref().map(|c| c.direction),
            Some(CursorDirection::Prev)
        )
    }

    /// The order rows must be fetched in to satisfy this query
    ///
    /// Walking backwards fetches in reversed order; the page is flipped
    /// back before it is returned.
    pub fn traversal_order(&self) -> SortOrder {
        if self.walks_prev() {
            self.sort_order.reversed()
        } else {
            self.sort_order
        }
    }
}

/// Cursor metadata attached to a page
#[derive(Debug, Clone, Serialize)]
pub struct CursorPageInfo {
    /// Token for the page after this one, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,

    /// Token for the page before this one, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prev_cursor: Option<String>,

    /// Whether more rows exist in the direction of travel
    pub has_more: bool,
}

/// Cursor-based page response
#[derive(Debug, Clone, Serialize)]
pub struct CursorPage<T> {
    /// Items on this page, in the requested sort order
    pub items: Vec<T>,

    /// Cursor metadata
    pub pagination: CursorPageInfo,

    /// Requested page size
    pub limit: i64,

    /// Sort order the page was produced under
    pub sort_order: SortOrder,

    /// Sort field the page was produced under
    pub sort_field: SortField,
}

/// Assembles a cursor page from rows fetched in traversal order
///
/// `items` must already be flipped back to the requested order when the
/// query walked backwards; `has_more` reports whether an extra row existed
/// past the page in the direction of travel. `sort_value` extracts the
/// stringified sort value used for minting boundary cursors.
pub fn assemble_cursor_page<T>(
    items: Vec<T>,
    query: &CursorQuery,
    has_more: bool,
    sort_value: impl Fn(&T) -> String,
    id_of: impl Fn(&T) -> Uuid,
) -> CursorPage<T> {
    let walked_prev = query.walks_prev();

    let mint = |row: &T, direction: CursorDirection| {
        Cursor {
            field: query.sort_field,
            order: query.sort_order,
            value: sort_value(row),
            id: id_of(row),
            direction,
        }
        .encode()
    };

    let next_cursor = match items.last() {
        // Forward: only when more rows follow. Backward: the rows we came
        // from are always ahead of us.
        Some(last) if (!walked_prev && has_more) || walked_prev => {
            Some(mint(last, CursorDirection::Next))
        }
        _ => None,
    };

    let prev_cursor = match items.first() {
        Some(first) if (walked_prev && has_more) || (!walked_prev && query.cursor.is_some()) => {
            Some(mint(first, CursorDirection::Prev))
        }
        _ => None,
    };

    CursorPage {
        items,
        pagination: CursorPageInfo {
            next_cursor,
            prev_cursor,
            has_more,
        },
        limit: query.limit,
        sort_order: query.sort_order,
        sort_field: query.sort_field,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_cursor() -> Cursor {
        Cursor {
            field: SortField::CreatedAt,
            order: SortOrder::Desc,
            value: "2026-01-02T03:04:05.678900Z".to_string(),
            id: Uuid::new_v4(),
            direction: CursorDirection::Next,
        }
    }

    #[test]
    fn test_pagination_clamps() {
        let p = Pagination::new(None, None);
        assert_eq!(p.limit, DEFAULT_PAGE_SIZE);
        assert_eq!(p.offset, 0);

        let p = Pagination::new(Some(1000), Some(-5));
        assert_eq!(p.limit, MAX_PAGE_SIZE);
        assert_eq!(p.offset, 0);

        let p = Pagination::new(Some(0), Some(40));
        assert_eq!(p.limit, 1);
        assert_eq!(p.offset, 40);
    }

    #[test]
    fn test_cursor_round_trip() {
        let cursor = sample_cursor();
        let token = cursor.encode();
        let decoded = Cursor::decode(&token).unwrap();
        assert_eq!(decoded, cursor);
    }

    #[test]
    fn test_cursor_rejects_garbage() {
        assert!(Cursor::decode("not/base64!").is_err());

        let junk = URL_SAFE_NO_PAD.encode(b"{\"hello\":\"world\"}");
        assert!(Cursor::decode(&junk).is_err());
    }

    #[test]
    fn test_cursor_query_rejects_sort_mismatch() {
        let token = sample_cursor().encode();

        // Same sort: accepted
        assert!(
            CursorQuery::new(None, Some(&token), SortField::CreatedAt, SortOrder::Desc).is_ok()
        );

        // Different field or order: rejected
        assert!(CursorQuery::new(None, Some(&token), SortField::Name, SortOrder::Desc).is_err());
        assert!(
            CursorQuery::new(None, Some(&token), SortField::CreatedAt, SortOrder::Asc).is_err()
        );
    }

    #[test]
    fn test_traversal_order_flips_for_prev() {
        let mut cursor = sample_cursor();
        cursor.direction = CursorDirection::Prev;
        let query = CursorQuery {
            limit: 10,
            cursor: Some(cursor),
            sort_field: SortField::CreatedAt,
            sort_order: SortOrder::Desc,
        };
        assert!(query.walks_prev());
        assert_eq!(query.traversal_order(), SortOrder::Asc);
    }

    #[test]
    fn test_assemble_first_page() {
        let query = CursorQuery {
            limit: 2,
            cursor: None,
            sort_field: SortField::Name,
            sort_order: SortOrder::Asc,
        };
        let rows = vec![("a", Uuid::new_v4()), ("b", Uuid::new_v4())];
        let page = assemble_cursor_page(rows, &query, true, |r| r.0.to_string(), |r| r.1);

        assert!(page.pagination.has_more);
        assert!(page.pagination.next_cursor.is_some());
        // First page never has a prev cursor
        assert!(page.pagination.prev_cursor.is_none());

        let next = Cursor::decode(page.pagination.next_cursor.as_deref().unwrap()).unwrap();
        assert_eq!(next.value, "b");
        assert_eq!(next.direction, CursorDirection::Next);
    }

    #[test]
    fn test_assemble_last_page() {
        let query = CursorQuery {
            limit: 10,
            cursor: Some(Cursor {
                field: SortField::Name,
                order: SortOrder::Asc,
                value: "m".to_string(),
                id: Uuid::new_v4(),
                direction: CursorDirection::Next,
            }),
            sort_field: SortField::Name,
            sort_order: SortOrder::Asc,
        };

        let rows = vec![("x", Uuid::new_v4())];
        let page = assemble_cursor_page(rows, &query, false, |r| r.0.to_string(), |r| r.1);

        assert!(!page.pagination.has_more);
        assert!(page.pagination.next_cursor.is_none());
        // Not the first page, so we can walk back
        assert!(page.pagination.prev_cursor.is_some());
    }

    #[test]
    fn test_assemble_empty_page() {
        let query = CursorQuery {
            limit: 10,
            cursor: None,
            sort_field: SortField::CreatedAt,
            sort_order: SortOrder::Desc,
        };
        let page: CursorPage<(&str, Uuid)> =
            assemble_cursor_page(Vec::new(), &query, false, |r| r.0.to_string(), |r| r.1);
        assert!(page.items.is_empty());
        assert!(page.pagination.next_cursor.is_none());
        assert!(page.pagination.prev_cursor.is_none());
    }
}
