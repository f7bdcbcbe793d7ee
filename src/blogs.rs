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

//! # The blog API
//!
//! CRUD over the blog collection. Reading is public; adding, updating & deleting demand an
//! authenticated user. I've chosen to have all the handlers just return an
//! [axum::response::Response] so that I can use different structures to represent responses; this
//! has resulted in a little more boilerplate.

use std::{collections::HashMap, sync::Arc};

use axum::{
    extract::{rejection::ExtensionRejection, Path, State},
    http::{header::CONTENT_TYPE, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::get,
    Extension, Json, Router,
};
use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use snafu::{prelude::*, Backtrace};
use tap::Pipe;
use tower_http::{cors::CorsLayer, set_header::SetResponseHeaderLayer};
use tracing::{debug, error, info};

use crate::{
    authn::{self, check_password, check_token, AuthnScheme},
    counter_add,
    entities::{self, Blog, BlogId, BlogUrl, User, UserId, Username},
    http::{Bloglist, ErrorResponseBody},
    metrics::{self, Sort},
    storage::{self, Backend as StorageBackend, BlogPatch},
    token::SigningKeys,
};

/// blog API error type
#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to add blog: {source}"))]
    AddBlog {
        source: storage::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("{source}"))]
    BadUrl {
        source: entities::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to delete blog {id}: {source}"))]
    DeleteBlog {
        id: BlogId,
        source: storage::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to fetch blogs from the backend: {source}"))]
    GetBlogs {
        source: storage::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("An Authorization header had a non-textual value: {source}"))]
    InvalidAuthHeaderValue {
        value: HeaderValue,
        source: authn::Error,
    },
    #[snafu(display("Invalid credentials: {source}"))]
    InvalidCredentials { source: authn::Error },
    #[snafu(display("author is missing"))]
    MissingAuthor { backtrace: Backtrace },
    #[snafu(display("title is missing"))]
    MissingTitle { backtrace: Backtrace },
    #[snafu(display("url is missing"))]
    MissingUrl { backtrace: Backtrace },
    #[snafu(display("Multiple Authorization headers were supplied; only one is accepted."))]
    MultipleAuthnHeaders,
    #[snafu(display("No authorization credentials supplied"))]
    NoAuthToken { backtrace: Backtrace },
    #[snafu(display("No blog with id {id}"))]
    NoSuchBlog { id: BlogId, backtrace: Backtrace },
    #[snafu(display("Failed to update blog {id}: {source}"))]
    UpdateBlog {
        id: BlogId,
        source: storage::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to lookup a blog's submitter: {source}"))]
    UserLookup {
        source: storage::Error,
        backtrace: Backtrace,
    },
}

impl Error {
    pub fn as_status_and_msg(&self) -> (StatusCode, String) {
        match self {
            ////////////////////////////////////////////////////////////////////////////////////////
            // Broken requests-- tell the caller how to fix it
            ////////////////////////////////////////////////////////////////////////////////////////
            Error::BadUrl { source, .. } => (StatusCode::BAD_REQUEST, format!("{}", source)),
            Error::InvalidAuthHeaderValue { value, source, .. } => (
                StatusCode::BAD_REQUEST,
                format!("Bad Authorization header {:?}: {}", value, source),
            ),
            Error::MissingAuthor { .. } => {
                (StatusCode::BAD_REQUEST, "author is missing".to_string())
            }
            Error::MissingTitle { .. } => (StatusCode::BAD_REQUEST, "title is missing".to_string()),
            Error::MissingUrl { .. } => (StatusCode::BAD_REQUEST, "url is missing".to_string()),
            Error::MultipleAuthnHeaders => (
                StatusCode::BAD_REQUEST,
                "Multiple authorization headers".to_string(),
            ),
            ////////////////////////////////////////////////////////////////////////////////////////
            // Authorization failure-- don't tell a potential attacker the way in which they failed
            ////////////////////////////////////////////////////////////////////////////////////////
            Error::InvalidCredentials { .. } => {
                (StatusCode::UNAUTHORIZED, "Unauthorized".to_string())
            }
            Error::NoAuthToken { .. } => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
            ////////////////////////////////////////////////////////////////////////////////////////
            // The blog simply isn't there
            ////////////////////////////////////////////////////////////////////////////////////////
            Error::NoSuchBlog { id, .. } => {
                (StatusCode::NOT_FOUND, format!("No blog with id {}", id))
            }
            ////////////////////////////////////////////////////////////////////////////////////////
            // Internal failure-- own up to it:
            ////////////////////////////////////////////////////////////////////////////////////////
            Error::AddBlog { source, .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to add blog: {}", source),
            ),
            Error::DeleteBlog { id, source, .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to delete blog {}: {}", id, source),
            ),
            Error::GetBlogs { source, .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to fetch blogs: {}", source),
            ),
            Error::UpdateBlog { id, source, .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to update blog {}: {}", id, source),
            ),
            Error::UserLookup { source, .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to lookup a blog's submitter: {}", source),
            ),
        }
    }
}

// Not sure about this approach-- the implementation of this trait is awfully prolix. OTOH, it does
// make the implementation of handlers much easier...
impl axum::response::IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        let (code, msg) = self.as_status_and_msg();
        (code, Json(ErrorResponseBody { error: msg })).into_response()
    }
}

type Result<T> = std::result::Result<T, Error>;

type StdResult<T, E> = std::result::Result<T, E>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                         Authorization                                          //
////////////////////////////////////////////////////////////////////////////////////////////////////

inventory::submit! { metrics::Registration::new("blogs_auth_successes", "Authenticated requests to the blog API", Sort::IntegralCounter) }
inventory::submit! { metrics::Registration::new("blogs_auth_failures", "Rejected or credential-less requests to the blog API", Sort::IntegralCounter) }

/// Authenticate a request to the blog API
///
/// Insert the authenticated [User] into the request's extensions on success. On a request bearing
/// no credentials at all, we let the request go through *without* the extension: the read-only
/// endpoints are public, and the mutating handlers will reject any request lacking the attached
/// [User]. We can't use the [Extension] extractor directly in those handlers, as we'd 500 (rather
/// than 401) if a handler were invoked un-authorized.
///
/// # Middleware
///
/// This function leverages Axum's support for function-based [middleware]. The requirements on
/// our function are:
///
/// 1. Be an async fn.
/// 2. Take zero or more FromRequestParts extractors.
/// 3. Take exactly one FromRequest extractor as the second to last argument.
/// 4. Take Next as the last argument.
/// 5. Return something that implements IntoResponse
///
/// [middleware]: https://docs.rs/axum/latest/axum/middleware/index.html
async fn authenticate(
    State(state): State<Arc<Bloglist>>,
    headers: axum::http::HeaderMap,
    mut request: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    // Use a nested function returning a `Result` so I can use the `?` sigil, Snafu's `ResultExt`
    // & `OptionExt` and generally write idiomatically; then have the outer implementation handle
    // converting that to an axum Response.
    async fn authenticate1(
        headers: axum::http::HeaderMap,
        storage: &(dyn StorageBackend + Send + Sync),
        keys: &SigningKeys,
        issuer: &str,
    ) -> Result<User> {
        // Ostensibly, we expect authorization credentials in the Authorization header. Of course,
        // there's nothing stopping a client from including *multiple* Authorization headers, so
        // we have to handle that eventuality. I'm going to just reject requests that carry more
        // than one (smells too much like someone trying something fishy).
        let scheme = match headers
            .get_all("authorization")
            .into_iter()
            .at_most_one()
            .map_err(|_| Error::MultipleAuthnHeaders)?
        {
            Some(header_val) => AuthnScheme::try_from(header_val).context(
                InvalidAuthHeaderValueSnafu {
                    value: header_val.clone(),
                },
            )?,
            None => {
                return NoAuthTokenSnafu.fail();
            }
        };

        match scheme {
            AuthnScheme::BearerToken(token_string) => {
                check_token(storage, &token_string, keys, issuer)
                    .await
                    .context(InvalidCredentialsSnafu)
            }
            AuthnScheme::Basic((username, password)) => {
                check_password(storage, &username, password)
                    .await
                    .context(InvalidCredentialsSnafu)
            }
        }
    }

    match authenticate1(
        headers,
        state.storage.as_ref(),
        &state.signing_keys,
        &state.domain,
    )
    .await
    {
        Ok(user) => {
            debug!("bloglist authorized user {}", user.id());
            request.extensions_mut().insert(user);
            counter_add!(state.instruments, "blogs_auth_successes", 1);
            next.run(request).await
        }
        Err(Error::NoAuthToken { .. }) => {
            counter_add!(state.instruments, "blogs_auth_failures", 1);
            next.run(request).await
        }
        // I want to be careful about what sort of information we reveal to our caller...
        Err(err) => {
            error!("bloglist failed to authenticate this request");
            counter_add!(state.instruments, "blogs_auth_failures", 1);
            err.into_response()
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       request & response                                       //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The submitting [User], as embedded in blog responses
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct UserRef {
    pub id: UserId,
    pub username: Username,
    pub name: String,
}

impl From<&User> for UserRef {
    fn from(user: &User) -> Self {
        UserRef {
            id: user.id(),
            username: user.username().clone(),
            name: user.display_name(),
        }
    }
}

/// A [Blog], as represented on the wire
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct BlogRsp {
    pub id: BlogId,
    pub title: String,
    pub author: String,
    pub url: BlogUrl,
    pub likes: u64,
    pub posted: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<UserRef>,
}

impl BlogRsp {
    pub fn new(blog: &Blog, user: Option<&User>) -> BlogRsp {
        BlogRsp {
            id: blog.id(),
            title: blog.title().to_owned(),
            author: blog.author().to_owned(),
            url: blog.url().clone(),
            likes: blog.likes(),
            posted: blog.posted(),
            user: user.map(UserRef::from),
        }
    }
}

/// A deserializable struct representing the body of `POST /blogs` & `PUT /blogs/{id}`
///
/// Every field is optional at the deserialization layer so that *this* module gets to explain
/// which required field is missing, rather than leaving the caller to puzzle out a generic serde
/// error.
#[derive(Clone, Debug, Deserialize)]
struct BlogReq {
    title: Option<String>,
    author: Option<String>,
    url: Option<String>,
    likes: Option<u64>,
}

impl BlogReq {
    /// Apply the ingestion rules: title, author & url are required; the url must parse; a missing
    /// like-count is normalized to zero. (Negative like-counts never get this far-- they're
    /// rejected at deserialization.)
    fn validated(&self) -> Result<(String, String, BlogUrl, u64)> {
        let title = self.title.clone().context(MissingTitleSnafu)?;
        let author = self.author.clone().context(MissingAuthorSnafu)?;
        let url = self.url.clone().context(MissingUrlSnafu)?;
        let url = BlogUrl::try_from(url).context(BadUrlSnafu)?;
        Ok((title, author, url, self.likes.unwrap_or(0)))
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          `GET /blogs`                                          //
////////////////////////////////////////////////////////////////////////////////////////////////////

inventory::submit! { metrics::Registration::new("blogs_listed", "Number of collection listings served", Sort::IntegralCounter) }

/// `GET /blogs` handler
///
/// Return the entire collection, in order of submission, each entry with its submitter populated.
async fn get_blogs(State(state): State<Arc<Bloglist>>) -> axum::response::Response {
    async fn get_blogs1(storage: &(dyn StorageBackend + Send + Sync)) -> Result<Vec<BlogRsp>> {
        let blogs = storage.all_blogs().await.context(GetBlogsSnafu)?;
        let users: HashMap<UserId, User> = storage
            .users()
            .await
            .context(UserLookupSnafu)?
            .into_iter()
            .map(|u| (u.id(), u))
            .collect();
        blogs
            .iter()
            .map(|blog| BlogRsp::new(blog, users.get(&blog.user())))
            .collect::<Vec<BlogRsp>>()
            .pipe(Ok)
    }

    match get_blogs1(state.storage.as_ref()).await {
        Ok(rsp) => {
            counter_add!(state.instruments, "blogs_listed", 1);
            (StatusCode::OK, Json(rsp)).into_response()
        }
        Err(err) => {
            error!("{:#?}", err);
            let (status, msg) = err.as_status_and_msg();
            (status, Json(ErrorResponseBody { error: msg })).into_response()
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       `GET /blogs/{id}`                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

inventory::submit! { metrics::Registration::new("blogs_fetched", "Number of single-blog fetches served", Sort::IntegralCounter) }

/// `GET /blogs/{id}` handler
async fn get_blog(
    State(state): State<Arc<Bloglist>>,
    Path(id): Path<BlogId>,
) -> axum::response::Response {
    async fn get_blog1(
        id: &BlogId,
        storage: &(dyn StorageBackend + Send + Sync),
    ) -> Result<BlogRsp> {
        let blog = storage
            .blog_for_id(id)
            .await
            .context(GetBlogsSnafu)?
            .context(NoSuchBlogSnafu { id: *id })?;
        let user = storage
            .user_for_id(&blog.user())
            .await
            .context(UserLookupSnafu)?;
        Ok(BlogRsp::new(&blog, user.as_ref()))
    }

    match get_blog1(&id, state.storage.as_ref()).await {
        Ok(rsp) => {
            counter_add!(state.instruments, "blogs_fetched", 1);
            (StatusCode::OK, Json(rsp)).into_response()
        }
        Err(err) => {
            if !matches!(err, Error::NoSuchBlog { .. }) {
                error!("{:#?}", err)
            };
            let (status, msg) = err.as_status_and_msg();
            (status, Json(ErrorResponseBody { error: msg })).into_response()
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                         `POST /blogs`                                          //
////////////////////////////////////////////////////////////////////////////////////////////////////

inventory::submit! { metrics::Registration::new("blogs_added", "Number of blogs added", Sort::IntegralCounter) }

/// `POST /blogs` handler
///
/// Add a blog to the collection. Body fields:
///
/// - title (required)
/// - author (required): a display string, *not* a reference to a user
/// - url (required)
/// - likes: initial like-count; if omitted, zero
///
/// The created entry is associated with the authenticated user & returned in full.
async fn add_blog(
    State(state): State<Arc<Bloglist>>,
    user: StdResult<Extension<User>, ExtensionRejection>,
    Json(blog_req): Json<BlogReq>,
) -> axum::response::Response {
    async fn add_blog1(
        user: &User,
        req: &BlogReq,
        storage: &(dyn StorageBackend + Send + Sync),
    ) -> Result<BlogRsp> {
        let (title, author, url, likes) = req.validated()?;
        let blog = Blog::new(&user.id(), &title, &author, &url, likes, &Utc::now());
        storage.add_blog(&blog).await.context(AddBlogSnafu)?;
        Ok(BlogRsp::new(&blog, Some(user)))
    }

    match &user {
        Ok(Extension(user)) => match add_blog1(user, &blog_req, state.storage.as_ref()).await {
            Ok(rsp) => {
                info!("{} added blog {}", user.username(), rsp.id);
                counter_add!(state.instruments, "blogs_added", 1);
                (StatusCode::CREATED, Json(rsp)).into_response()
            }
            Err(err) => {
                info!("add blog rejected: {}", err);
                let (status, msg) = err.as_status_and_msg();
                (status, Json(ErrorResponseBody { error: msg })).into_response()
            }
        },
        Err(_) => (
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponseBody {
                error: "Unauthorized".to_string(),
            }),
        )
            .into_response(),
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       `PUT /blogs/{id}`                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

inventory::submit! { metrics::Registration::new("blogs_updated", "Number of blogs updated", Sort::IntegralCounter) }

/// `PUT /blogs/{id}` handler
///
/// Whole-record update: the same body as `POST /blogs`, the same validation rules. Identity,
/// submitter & post time are fixed at submission & survive any number of updates.
async fn update_blog(
    State(state): State<Arc<Bloglist>>,
    Path(id): Path<BlogId>,
    user: StdResult<Extension<User>, ExtensionRejection>,
    Json(blog_req): Json<BlogReq>,
) -> axum::response::Response {
    async fn update_blog1(
        id: &BlogId,
        req: &BlogReq,
        storage: &(dyn StorageBackend + Send + Sync),
    ) -> Result<BlogRsp> {
        let (title, author, url, likes) = req.validated()?;
        let updated = storage
            .update_blog(
                id,
                BlogPatch {
                    title,
                    author,
                    url,
                    likes,
                },
            )
            .await
            .context(UpdateBlogSnafu { id: *id })?
            .context(NoSuchBlogSnafu { id: *id })?;
        let user = storage
            .user_for_id(&updated.user())
            .await
            .context(UserLookupSnafu)?;
        Ok(BlogRsp::new(&updated, user.as_ref()))
    }

    match &user {
        Ok(Extension(user)) => match update_blog1(&id, &blog_req, state.storage.as_ref()).await {
            Ok(rsp) => {
                info!("{} updated blog {}", user.username(), rsp.id);
                counter_add!(state.instruments, "blogs_updated", 1);
                (StatusCode::OK, Json(rsp)).into_response()
            }
            Err(err) => {
                if !matches!(err, Error::NoSuchBlog { .. }) {
                    info!("update blog rejected: {}", err);
                }
                let (status, msg) = err.as_status_and_msg();
                (status, Json(ErrorResponseBody { error: msg })).into_response()
            }
        },
        Err(_) => (
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponseBody {
                error: "Unauthorized".to_string(),
            }),
        )
            .into_response(),
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                      `DELETE /blogs/{id}`                                      //
////////////////////////////////////////////////////////////////////////////////////////////////////

inventory::submit! { metrics::Registration::new("blogs_deleted", "Number of blogs deleted", Sort::IntegralCounter) }

/// `DELETE /blogs/{id}` handler
///
/// Deletion is idempotent: deleting a blog that isn't there is a no-op, answered 204 all the
/// same.
async fn delete_blog(
    State(state): State<Arc<Bloglist>>,
    Path(id): Path<BlogId>,
    user: StdResult<Extension<User>, ExtensionRejection>,
) -> axum::response::Response {
    async fn delete_blog1(
        id: &BlogId,
        storage: &(dyn StorageBackend + Send + Sync),
    ) -> Result<bool> {
        storage
            .delete_blog(id)
            .await
            .context(DeleteBlogSnafu { id: *id })
    }

    match &user {
        Ok(Extension(user)) => match delete_blog1(&id, state.storage.as_ref()).await {
            Ok(deleted) => {
                if deleted {
                    info!("{} deleted blog {}", user.username(), id);
                    counter_add!(state.instruments, "blogs_deleted", 1);
                }
                StatusCode::NO_CONTENT.into_response()
            }
            Err(err) => {
                error!("{:#?}", err);
                let (status, msg) = err.as_status_and_msg();
                (status, Json(ErrorResponseBody { error: msg })).into_response()
            }
        },
        Err(_) => (
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponseBody {
                error: "Unauthorized".to_string(),
            }),
        )
            .into_response(),
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                           Public API                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Return a router for the blog API
///
/// The returned [Router] will presumably be merged with other routers.
pub fn make_router(state: Arc<Bloglist>) -> Router<Arc<Bloglist>> {
    Router::new()
        .route("/blogs", get(get_blogs).post(add_blog))
        .route(
            "/blogs/{id}",
            get(get_blog).put(update_blog).delete(delete_blog),
        )
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            authenticate,
        ))
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
    use crate::{memory::Store, metrics::Instruments, token::mint_token};

    use axum::body::Body;
    use axum::http::Request;
    use base64::{prelude::BASE64_STANDARD, Engine};
    use chrono::Duration;
    use http_body_util::BodyExt;
    use secrecy::SecretString;
    use std::str::FromStr;
    use tower::ServiceExt;

    fn mk_state() -> Arc<Bloglist> {
        let registry = prometheus::Registry::new();
        let instruments = Instruments::new(&registry);
        Arc::new(Bloglist {
            domain: "blog.example.com".to_owned(),
            instance_id: uuid::Uuid::new_v4(),
            storage: Arc::new(Store::new()),
            registry,
            instruments,
            signing_keys: SigningKeys::default(),
            token_lifetime: Duration::seconds(300),
        })
    }

    fn mk_app(state: Arc<Bloglist>) -> Router {
        Router::new()
            .nest("/api", make_router(state.clone()))
            .with_state(state)
    }

    async fn mk_user(state: &Arc<Bloglist>, name: &str, password: &str) -> User {
        let user = User::new(
            &Username::new(name).unwrap(),
            &SecretString::from(password.to_string()),
            None,
        )
        .unwrap();
        state.storage.add_user(&user).await.unwrap();
        user
    }

    fn basic(name: &str, password: &str) -> String {
        format!(
            "Basic {}",
            BASE64_STANDARD.encode(format!("{}:{}", name, password))
        )
    }

    async fn body_json(rsp: axum::response::Response) -> serde_json::Value {
        let bytes = rsp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn blogs_are_returned_as_json_in_submission_order() {
        let state = mk_state();
        let user = mk_user(&state, "mluukkai", "salainen").await;
        for (title, likes) in [("React patterns", 7), ("Canonical string reduction", 12)] {
            state
                .storage
                .add_blog(&Blog::new(
                    &user.id(),
                    title,
                    "Michael Chan",
                    &BlogUrl::from_str("https://reactpatterns.com/").unwrap(),
                    likes,
                    &Utc::now(),
                ))
                .await
                .unwrap();
        }

        let rsp = mk_app(state)
            .oneshot(Request::get("/api/blogs").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(rsp.status(), StatusCode::OK);
        assert!(rsp
            .headers()
            .get("content-type")
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("application/json"));

        let body = body_json(rsp).await;
        let blogs = body.as_array().unwrap();
        assert_eq!(blogs.len(), 2);
        assert_eq!(blogs[0]["title"], "React patterns");
        assert!(blogs[0]["id"].is_string());
        assert_eq!(blogs[0]["user"]["username"], "mluukkai");
    }

    #[tokio::test]
    async fn adding_a_blog_requires_credentials() {
        let state = mk_state();
        let rsp = mk_app(state)
            .oneshot(
                Request::post("/api/blogs")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        serde_json::json!({
                            "title": "First class tests",
                            "author": "Robert C. Martin",
                            "url": "http://blog.cleancoder.com/"
                        })
                        .to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(rsp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn a_new_blog_is_added() {
        let state = mk_state();
        mk_user(&state, "mluukkai", "salainen").await;
        let app = mk_app(state);

        let rsp = app
            .clone()
            .oneshot(
                Request::post("/api/blogs")
                    .header("content-type", "application/json")
                    .header("authorization", basic("mluukkai", "salainen"))
                    .body(Body::from(
                        serde_json::json!({
                            "title": "Go To Statement Considered Harmful",
                            "author": "Edsger W. Dijkstra",
                            "url": "http://www.u.arizona.edu/~rubinson/",
                            "likes": 5
                        })
                        .to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(rsp.status(), StatusCode::CREATED);
        let body = body_json(rsp).await;
        assert_eq!(body["likes"], 5);
        assert_eq!(body["user"]["username"], "mluukkai");

        let rsp = app
            .oneshot(Request::get("/api/blogs").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_json(rsp).await;
        let titles: Vec<&str> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|b| b["title"].as_str().unwrap())
            .collect();
        assert_eq!(titles, vec!["Go To Statement Considered Harmful"]);
    }

    #[tokio::test]
    async fn bearer_tokens_are_accepted() {
        let state = mk_state();
        let user = mk_user(&state, "mluukkai", "salainen").await;
        let (keyid, signing_key) = state.signing_keys.current().unwrap();
        let token = mint_token(
            user.username(),
            &keyid,
            &signing_key,
            &state.domain,
            &state.token_lifetime,
        )
        .unwrap();

        let rsp = mk_app(state)
            .oneshot(
                Request::post("/api/blogs")
                    .header("content-type", "application/json")
                    .header("authorization", format!("Bearer {}", token))
                    .body(Body::from(
                        serde_json::json!({
                            "title": "React patterns",
                            "author": "Michael Chan",
                            "url": "https://reactpatterns.com/"
                        })
                        .to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(rsp.status(), StatusCode::CREATED);
    }

    #[tokio::test]
    async fn likes_default_to_zero() {
        let state = mk_state();
        mk_user(&state, "mluukkai", "salainen").await;
        let rsp = mk_app(state)
            .oneshot(
                Request::post("/api/blogs")
                    .header("content-type", "application/json")
                    .header("authorization", basic("mluukkai", "salainen"))
                    .body(Body::from(
                        serde_json::json!({
                            "title": "React patterns",
                            "author": "Michael Chan",
                            "url": "https://reactpatterns.com/"
                        })
                        .to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(rsp.status(), StatusCode::CREATED);
        assert_eq!(body_json(rsp).await["likes"], 0);
    }

    #[tokio::test]
    async fn missing_title_and_url_are_bad_requests() {
        let state = mk_state();
        mk_user(&state, "mluukkai", "salainen").await;
        let app = mk_app(state);

        let rsp = app
            .clone()
            .oneshot(
                Request::post("/api/blogs")
                    .header("content-type", "application/json")
                    .header("authorization", basic("mluukkai", "salainen"))
                    .body(Body::from(
                        serde_json::json!({
                            "author": "Michael Chan",
                            "url": "https://reactpatterns.com/"
                        })
                        .to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(rsp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(rsp).await["error"], "title is missing");

        let rsp = app
            .oneshot(
                Request::post("/api/blogs")
                    .header("content-type", "application/json")
                    .header("authorization", basic("mluukkai", "salainen"))
                    .body(Body::from(
                        serde_json::json!({
                            "title": "React patterns",
                            "author": "Michael Chan"
                        })
                        .to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(rsp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(rsp).await["error"], "url is missing");
    }

    #[tokio::test]
    async fn single_blogs_are_fetched_by_id() {
        let state = mk_state();
        let user = mk_user(&state, "mluukkai", "salainen").await;
        let blog = Blog::new(
            &user.id(),
            "React patterns",
            "Michael Chan",
            &BlogUrl::from_str("https://reactpatterns.com/").unwrap(),
            7,
            &Utc::now(),
        );
        state.storage.add_blog(&blog).await.unwrap();
        let app = mk_app(state);

        let rsp = app
            .clone()
            .oneshot(
                Request::get(format!("/api/blogs/{}", blog.id()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(rsp.status(), StatusCode::OK);
        assert_eq!(body_json(rsp).await["id"], blog.id().to_string());

        let rsp = app
            .oneshot(
                Request::get(format!("/api/blogs/{}", BlogId::new()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(rsp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn blogs_are_updated_and_deleted() {
        let state = mk_state();
        let user = mk_user(&state, "mluukkai", "salainen").await;
        let blog = Blog::new(
            &user.id(),
            "React patterns",
            "Michael Chan",
            &BlogUrl::from_str("https://reactpatterns.com/").unwrap(),
            7,
            &Utc::now(),
        );
        state.storage.add_blog(&blog).await.unwrap();
        let app = mk_app(state);

        let rsp = app
            .clone()
            .oneshot(
                Request::put(format!("/api/blogs/{}", blog.id()))
                    .header("content-type", "application/json")
                    .header("authorization", basic("mluukkai", "salainen"))
                    .body(Body::from(
                        serde_json::json!({
                            "title": "React patterns",
                            "author": "Michael Chan",
                            "url": "https://reactpatterns.com/",
                            "likes": 8
                        })
                        .to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(rsp.status(), StatusCode::OK);
        assert_eq!(body_json(rsp).await["likes"], 8);

        let rsp = app
            .clone()
            .oneshot(
                Request::put(format!("/api/blogs/{}", BlogId::new()))
                    .header("content-type", "application/json")
                    .header("authorization", basic("mluukkai", "salainen"))
                    .body(Body::from(
                        serde_json::json!({
                            "title": "React patterns",
                            "author": "Michael Chan",
                            "url": "https://reactpatterns.com/",
                            "likes": 8
                        })
                        .to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(rsp.status(), StatusCode::NOT_FOUND);

        // Deletion is idempotent: 204 both times.
        for _ in 0..2 {
            let rsp = app
                .clone()
                .oneshot(
                    Request::delete(format!("/api/blogs/{}", blog.id()))
                        .header("authorization", basic("mluukkai", "salainen"))
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(rsp.status(), StatusCode::NO_CONTENT);
        }
    }

    #[tokio::test]
    async fn bad_credentials_are_rejected_even_on_reads() {
        let state = mk_state();
        mk_user(&state, "mluukkai", "salainen").await;
        let rsp = mk_app(state)
            .oneshot(
                Request::get("/api/blogs")
                    .header("authorization", basic("mluukkai", "vaara"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(rsp.status(), StatusCode::UNAUTHORIZED);
    }
}
