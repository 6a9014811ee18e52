//! Paged feed queries.
//!
//! A feed is one statement run twice: once wrapped in a count for the page
//! metadata and once with `limit`/`offset` for the items.

use async_trait::async_trait;
use pagination::{Feed, FeedParams};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::domain::error::Error;
use crate::domain::sql::Statement;
use crate::domain::transaction::TxHandle;

/// Items that load extra data after the page query, e.g. nested collections.
#[async_trait]
pub trait Refetch: Send {
    /// Complete this item using `tx`.
    async fn refetch(&mut self, tx: &TxHandle) -> Result<(), Error>;
}

#[derive(Debug, Deserialize)]
struct Total {
    total: u64,
}

/// Number of rows `query` produces.
pub async fn fetch_total(tx: &TxHandle, query: &Statement) -> Result<u64, Error> {
    let count = query.wrapped("select count(*) as total from (", ") as _feed");
    let row: Total = tx.fetch_one(&count).await?;
    Ok(row.total)
}

/// `query` with `limit` and `offset` appended when they are non-zero.
pub fn paged(query: &Statement, params: &FeedParams) -> Statement {
    let mut statement = query.clone();
    if params.valid_limit() > 0 {
        statement = statement.append_arg("limit", to_arg(params.valid_limit()));
    }
    if params.valid_offset() > 0 {
        statement = statement.append_arg("offset", to_arg(params.valid_offset()));
    }
    statement
}

fn to_arg(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Fetch one page of `query`.
///
/// The total is counted unless `params.no_page_info` is set. A zero limit
/// only counts and returns no items.
///
/// # Errors
///
/// The classified failure of either query.
pub async fn fetch_feed<T: DeserializeOwned>(
    tx: &TxHandle,
    query: &Statement,
    params: &FeedParams,
) -> Result<Feed<T>, Error> {
    let mut feed = Feed::default();
    if !params.no_page_info {
        let total = fetch_total(tx, query).await?;
        feed.page_info = params.page_info(total);
    }
    if params.valid_limit() == 0 {
        return Ok(feed);
    }
    feed.items = tx.fetch_all(&paged(query, params)).await?;
    Ok(feed)
}

/// [`fetch_feed`], then [`Refetch::refetch`] every item in order.
///
/// # Errors
///
/// The first failure from the queries or from an item.
pub async fn fetch_feed_with_refetch<T>(
    tx: &TxHandle,
    query: &Statement,
    params: &FeedParams,
) -> Result<Feed<T>, Error>
where
    T: DeserializeOwned + Refetch,
{
    let mut feed = fetch_feed::<T>(tx, query, params).await?;
    for item in &mut feed.items {
        item.refetch(tx).await?;
    }
    Ok(feed)
}
