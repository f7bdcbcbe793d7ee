// Copyright (C) 2025 the bloglist developers
//
// This file is part of bloglist.
//
// bloglist is free software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// bloglist is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without
// even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with bloglist.  If not,
// see <http://www.gnu.org/licenses/>.

//! # blog-list statistics
//!
//! # Introduction
//!
//! Aggregate statistics over the blog collection: total likes, the most-liked blog, and the most
//! prolific author. The functions in this module are pure: they take the collection as an ordered
//! slice, never mutate it, never touch storage or the network, and hold no state between calls.
//! The `/stats` endpoint at the bottom of this module is their only consumer in-tree: it fetches
//! the full collection from the storage layer, runs each aggregate, and serializes the results.
//!
//! # Ties
//!
//! Both "pick the best" aggregates need a tie-break rule to be testable at all:
//!
//! - [favorite_blog] folds left over the collection, replacing its running best only on a
//!   *strictly* greater like-count, so the first blog (in input order) to reach the maximum wins.
//!
//! - [top_author] groups in first-seen order & scans that order with a strictly-greater
//!   comparison, so the first author (in input order) to reach the maximum count wins. Note that
//!   there's no sorting anywhere-- a sort-based implementation would leave the winner at the
//!   mercy of whatever the sort does with equal keys.

use std::{collections::HashMap, sync::Arc};

use axum::{
    extract::State,
    http::{header::CONTENT_TYPE, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use snafu::{prelude::*, Backtrace};
use tower_http::{cors::CorsLayer, set_header::SetResponseHeaderLayer};
use tracing::error;

use crate::{
    counter_add,
    entities::{Blog, BlogId, BlogUrl},
    gauge_setu,
    http::{Bloglist, ErrorResponseBody},
    metrics::{self, Sort},
    storage::{self, Backend as StorageBackend},
};

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                        the aggregates                                          //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Always returns 1, regardless of input
///
/// A smoke-test seam verifying that this module is wired-in; it has no other semantics & should
/// not acquire any.
pub fn dummy(_blogs: &[Blog]) -> u64 {
    1
}

/// Sum of like-counts across the collection; zero for an empty collection
///
/// The accumulator is 64 bits wide, which comfortably holds any realistic total.
pub fn total_likes(blogs: &[Blog]) -> u64 {
    blogs.iter().map(Blog::likes).sum()
}

/// The blog with the strictly greatest like-count; None for an empty collection
///
/// On ties, the first blog encountered in input order keeps priority over later blogs with an
/// equal count.
pub fn favorite_blog(blogs: &[Blog]) -> Option<&Blog> {
    blogs.iter().fold(None, |best, blog| match best {
        Some(leader) if blog.likes() > leader.likes() => Some(blog),
        None => Some(blog),
        _ => best,
    })
}

/// The author with the most blogs in the collection, and how many they have
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct TopAuthor {
    pub author: String,
    pub count: usize,
}

/// The author appearing on the greatest number of blogs; None for an empty collection
///
/// One forward pass builds the count per author while recording the order in which distinct
/// authors first appear; a linear scan over that order then selects the maximum with a
/// strictly-greater comparison. When several authors share the maximum count, the one who first
/// appeared in the input wins-- deterministic & reproducible given the same input order.
pub fn top_author(blogs: &[Blog]) -> Option<TopAuthor> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    let mut first_seen: Vec<&str> = Vec::new();
    for blog in blogs {
        counts
            .entry(blog.author())
            .and_modify(|count| *count += 1)
            .or_insert_with(|| {
                first_seen.push(blog.author());
                1
            });
    }
    first_seen
        .into_iter()
        .fold(None, |best: Option<(&str, usize)>, author| {
            let count = counts[author];
            match best {
                Some((_, leading)) if count > leading => Some((author, count)),
                None => Some((author, count)),
                _ => best,
            }
        })
        .map(|(author, count)| TopAuthor {
            author: author.to_owned(),
            count,
        })
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          `/stats`                                              //
////////////////////////////////////////////////////////////////////////////////////////////////////

inventory::submit! { metrics::Registration::new("stats_requests", "Number of hits on the stats endpoint", Sort::IntegralCounter) }
inventory::submit! { metrics::Registration::new("stats_blog_count", "Number of blogs scanned by the most recent stats request", Sort::IntegralGauge) }

/// stats module error type
#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to fetch blogs from the backend: {source}"))]
    GetBlogs {
        source: storage::Error,
        backtrace: Backtrace,
    },
}

impl Error {
    pub fn as_status_and_msg(&self) -> (StatusCode, String) {
        match self {
            Error::GetBlogs { source, .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to fetch blogs: {}", source),
            ),
        }
    }
}

impl axum::response::IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        let (code, msg) = self.as_status_and_msg();
        (code, Json(ErrorResponseBody { error: msg })).into_response()
    }
}

type Result<T> = std::result::Result<T, Error>;

/// A [Blog](crate::entities::Blog), as reported by the stats endpoint (no owner populated;
/// aggregate reporting doesn't need the join)
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct FavoriteBlog {
    pub id: BlogId,
    pub title: String,
    pub author: String,
    pub url: BlogUrl,
    pub likes: u64,
}

impl From<&Blog> for FavoriteBlog {
    fn from(blog: &Blog) -> Self {
        FavoriteBlog {
            id: blog.id(),
            title: blog.title().to_owned(),
            author: blog.author().to_owned(),
            url: blog.url().clone(),
            likes: blog.likes(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct StatsRsp {
    pub total_likes: u64,
    pub favorite_blog: Option<FavoriteBlog>,
    pub top_author: Option<TopAuthor>,
}

/// `/stats` handler
///
/// Fetch the full collection (in submission order), pass it through each aggregate, & serialize
/// the results. The aggregates never call back into storage.
async fn get_stats(State(state): State<Arc<Bloglist>>) -> axum::response::Response {
    async fn get_stats1(
        storage: &(dyn StorageBackend + Send + Sync),
    ) -> Result<(StatsRsp, usize)> {
        let blogs = storage.all_blogs().await.context(GetBlogsSnafu)?;
        let rsp = StatsRsp {
            total_likes: total_likes(&blogs),
            favorite_blog: favorite_blog(&blogs).map(FavoriteBlog::from),
            top_author: top_author(&blogs),
        };
        Ok((rsp, blogs.len()))
    }

    match get_stats1(state.storage.as_ref()).await {
        Ok((rsp, count)) => {
            counter_add!(state.instruments, "stats_requests", 1);
            gauge_setu!(state.instruments, "stats_blog_count", count as u64);
            (StatusCode::OK, Json(rsp)).into_response()
        }
        Err(err) => {
            error!("{:#?}", err);
            let (status, msg) = err.as_status_and_msg();
            (status, Json(ErrorResponseBody { error: msg })).into_response()
        }
    }
}

/// Return a router for the stats endpoint
///
/// The returned [Router] will presumably be merged with other routers.
pub fn make_router(state: Arc<Bloglist>) -> Router<Arc<Bloglist>> {
    Router::new()
        .route("/stats", get(get_stats))
        // All responses are JSON; add the appropriate Content-Type header (but leave the existing
        // Content-Type header should a handler set it specially).
        .layer(SetResponseHeaderLayer::if_not_present(
            CONTENT_TYPE,
            HeaderValue::from_static("application/json; charset=utf-8"),
        ))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::entities::UserId;

    use chrono::Utc;
    use std::str::FromStr;

    fn blog(author: &str, likes: u64) -> Blog {
        Blog::new(
            &UserId::new(),
            "Go To Statement Considered Harmful",
            author,
            &BlogUrl::from_str("https://www.u.arizona.edu/~rubinson/").unwrap(),
            likes,
            &Utc::now(),
        )
    }

    #[test]
    fn dummy_always_returns_one() {
        assert_eq!(dummy(&[]), 1);
        assert_eq!(dummy(&[blog("Edsger W. Dijkstra", 5)]), 1);
        assert_eq!(
            dummy(&[blog("Michael Chan", 7), blog("Robert C. Martin", 10)]),
            1
        );
    }

    #[test]
    fn total_likes_of_nothing_is_zero() {
        assert_eq!(total_likes(&[]), 0);
    }

    #[test]
    fn total_likes_sums_the_collection() {
        assert_eq!(total_likes(&[blog("Edsger W. Dijkstra", 5)]), 5);
        assert_eq!(
            total_likes(&[
                blog("Michael Chan", 7),
                blog("Edsger W. Dijkstra", 5),
                blog("Edsger W. Dijkstra", 12),
                blog("Robert C. Martin", 10),
            ]),
            34
        );
    }

    #[test]
    fn favorite_of_nothing_is_nothing() {
        assert!(favorite_blog(&[]).is_none());
    }

    #[test]
    fn favorite_of_one_is_that_one() {
        let blogs = [blog("Edsger W. Dijkstra", 5)];
        assert_eq!(favorite_blog(&blogs), Some(&blogs[0]));
    }

    #[test]
    fn favorite_has_the_most_likes() {
        let blogs = [
            blog("Michael Chan", 7),
            blog("Edsger W. Dijkstra", 12),
            blog("Robert C. Martin", 10),
        ];
        let favorite = favorite_blog(&blogs).unwrap();
        assert_eq!(favorite, &blogs[1]);
        assert!(blogs.iter().all(|b| favorite.likes() >= b.likes()));
    }

    #[test]
    fn favorite_ties_go_to_the_earlier_blog() {
        let blogs = [
            blog("Michael Chan", 5),
            blog("Edsger W. Dijkstra", 5),
            blog("Robert C. Martin", 3),
        ];
        assert_eq!(favorite_blog(&blogs), Some(&blogs[0]));
    }

    #[test]
    fn top_author_of_nothing_is_nothing() {
        assert!(top_author(&[]).is_none());
    }

    #[test]
    fn top_author_counts_blogs() {
        let blogs = [
            blog("Edsger W. Dijkstra", 5),
            blog("Robert C. Martin", 10),
            blog("Edsger W. Dijkstra", 12),
        ];
        assert_eq!(
            top_author(&blogs),
            Some(TopAuthor {
                author: "Edsger W. Dijkstra".to_owned(),
                count: 2
            })
        );
    }

    #[test]
    fn top_author_ties_go_to_the_first_seen() {
        let blogs = [blog("Michael Chan", 7), blog("Edsger W. Dijkstra", 5)];
        assert_eq!(
            top_author(&blogs),
            Some(TopAuthor {
                author: "Michael Chan".to_owned(),
                count: 1
            })
        );

        // The later author pulls even, but never strictly ahead.
        let blogs = [
            blog("Michael Chan", 7),
            blog("Edsger W. Dijkstra", 5),
            blog("Michael Chan", 0),
            blog("Edsger W. Dijkstra", 12),
        ];
        assert_eq!(
            top_author(&blogs),
            Some(TopAuthor {
                author: "Michael Chan".to_owned(),
                count: 2
            })
        );
    }

    #[test]
    fn aggregates_are_pure() {
        let blogs = [
            blog("Michael Chan", 7),
            blog("Edsger W. Dijkstra", 5),
            blog("Edsger W. Dijkstra", 12),
            blog("Robert C. Martin", 10),
        ];
        assert_eq!(total_likes(&blogs), total_likes(&blogs));
        assert_eq!(favorite_blog(&blogs), favorite_blog(&blogs));
        assert_eq!(top_author(&blogs), top_author(&blogs));
        assert_eq!(dummy(&blogs), dummy(&blogs));
    }
}
