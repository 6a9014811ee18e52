//! Offset-based feed pagination primitives.
//!
//! Endpoints that page over query results accept [`FeedParams`] and answer
//! with a [`Feed`] whose [`PageInfo`] is derived by [`page_info_from`]. Page
//! numbers are zero-indexed.
//!
//! ```
//! use pagination::page_info_from;
//!
//! let info = page_info_from(10, 20, 45);
//! assert_eq!(info.page, 2);
//! assert_eq!(info.total_pages, 5);
//! assert_eq!(info.next_page, Some(3));
//! assert_eq!(info.prev_page, Some(1));
//! ```

use serde::{Deserialize, Serialize};

/// Page size used when the caller does not provide a limit.
pub const FEED_SIZE_DEFAULT: u64 = 24;

/// Largest page size a caller may request.
pub const FEED_SIZE_MAX: u64 = 48;

/// Paging request accepted by feed endpoints.
///
/// `limit` is optional so a missing value can be told apart from an explicit
/// zero. A zero limit asks for totals only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FeedParams {
    /// Requested page size.
    pub limit: Option<u64>,
    /// Number of items to skip.
    pub offset: u64,
    /// Skip counting the total and leave the page metadata empty.
    pub no_page_info: bool,
}

impl FeedParams {
    /// Effective page size: the default when unset, clamped to [`FEED_SIZE_MAX`].
    ///
    /// ```
    /// use pagination::{FeedParams, FEED_SIZE_DEFAULT, FEED_SIZE_MAX};
    ///
    /// assert_eq!(FeedParams::default().valid_limit(), FEED_SIZE_DEFAULT);
    /// let greedy = FeedParams { limit: Some(1_000), ..FeedParams::default() };
    /// assert_eq!(greedy.valid_limit(), FEED_SIZE_MAX);
    /// ```
    #[must_use]
    pub const fn valid_limit(&self) -> u64 {
        match self.limit {
            None => FEED_SIZE_DEFAULT,
            Some(limit) if limit > FEED_SIZE_MAX => FEED_SIZE_MAX,
            Some(limit) => limit,
        }
    }

    /// Effective offset.
    #[must_use]
    pub const fn valid_offset(&self) -> u64 {
        self.offset
    }

    /// Page metadata for these parameters and the given total.
    #[must_use]
    pub const fn page_info(&self, total: u64) -> PageInfo {
        page_info_from(self.valid_limit(), self.valid_offset(), total)
    }
}

/// Page metadata returned alongside feed items.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    /// Total number of items across all pages.
    pub total: u64,
    /// Number of pages, never below one.
    pub total_pages: u64,
    /// Zero-indexed current page.
    pub page: u64,
    /// Page size the metadata was computed with.
    pub per_page: u64,
    /// Index of the following page, when there is one.
    pub next_page: Option<u64>,
    /// Index of the preceding page, when there is one.
    pub prev_page: Option<u64>,
    /// Whether `next_page` is set.
    pub has_next: bool,
    /// Whether `prev_page` is set.
    pub has_prev: bool,
}

/// Compute page metadata for a window of `limit` items starting at `offset`
/// within `total` items.
///
/// A zero `limit` yields a single page at index zero with no neighbours. A
/// zero `total` never has neighbours.
///
/// ```
/// use pagination::page_info_from;
///
/// let totals_only = page_info_from(0, 30, 100);
/// assert_eq!((totals_only.page, totals_only.total_pages), (0, 1));
/// assert!(!totals_only.has_next && !totals_only.has_prev);
/// ```
#[must_use]
#[expect(
    clippy::integer_division,
    reason = "page index is the floor of offset over limit"
)]
pub const fn page_info_from(limit: u64, offset: u64, total: u64) -> PageInfo {
    let (total_pages, page) = if limit > 0 {
        let pages = total.div_ceil(limit);
        (if pages == 0 { 1 } else { pages }, offset / limit)
    } else {
        (1, 0)
    };

    let next_page = if total > 0 && page < total_pages - 1 {
        Some(page + 1)
    } else {
        None
    };

    let prev_page = if total > 0 && page > 0 {
        Some(page - 1)
    } else {
        None
    };

    PageInfo {
        total,
        total_pages,
        page,
        per_page: limit,
        next_page,
        prev_page,
        has_next: next_page.is_some(),
        has_prev: prev_page.is_some(),
    }
}

/// A page of items together with its metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Feed<T> {
    /// Items on the current page.
    pub items: Vec<T>,
    /// Metadata describing the page. Left at its default when the caller set
    /// [`FeedParams::no_page_info`].
    pub page_info: PageInfo,
}

impl<T> Default for Feed<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            page_info: PageInfo::default(),
        }
    }
}
