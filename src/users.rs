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

//! # User API
//!
//! API for sign-up, logging-in, and listing users. None of these endpoints demand
//! authentication-- signing-up & logging-in obviously can't, and the user listing is public
//! (it reveals usernames, display names, and blogs, all of which are public anyway).

use std::sync::Arc;

use axum::{
    extract::State,
    http::{header::CONTENT_TYPE, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Duration;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use snafu::{prelude::*, Backtrace};
use tower_http::{cors::CorsLayer, set_header::SetResponseHeaderLayer};
use tracing::{error, info};

use crate::{
    authn::{self, check_password},
    blogs::BlogRsp,
    counter_add,
    entities::{self, User, UserId, Username},
    http::{Bloglist, ErrorResponseBody},
    metrics::{self, Sort},
    storage::{self, Backend as StorageBackend},
    token::{self, mint_token, SigningKeys},
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to add user: {source}"))]
    AddUser { source: storage::Error },
    #[snafu(display("{source}"))]
    BadUsername {
        source: entities::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Invalid credentials: {source}"))]
    InvalidCredentials { source: authn::Error },
    #[snafu(display("Failed to list users: {source}"))]
    ListUsers { source: storage::Error },
    #[snafu(display("password is missing"))]
    MissingPassword { backtrace: Backtrace },
    #[snafu(display("username is missing"))]
    MissingUsername { backtrace: Backtrace },
    #[snafu(display("No signing keys available: {source}"))]
    NoKeys {
        source: token::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to create user: {source}"))]
    Signup {
        source: entities::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to mint a token for user {username}: {source}"))]
    Token {
        username: Username,
        #[snafu(source(from(token::Error, Box::new)))]
        source: Box<token::Error>,
    },
}

impl Error {
    pub fn as_status_and_msg(&self) -> (StatusCode, String) {
        match self {
            ////////////////////////////////////////////////////////////////////////////////////////
            // Broken requests-- tell the caller how to fix it
            ////////////////////////////////////////////////////////////////////////////////////////
            Error::BadUsername {
                source: entities::Error::UsernameTooShort { .. },
                ..
            } => (StatusCode::BAD_REQUEST, "username is too short".to_string()),
            Error::BadUsername { .. } => (StatusCode::BAD_REQUEST, "username is invalid".to_string()),
            Error::MissingPassword { .. } => {
                (StatusCode::BAD_REQUEST, "password is missing".to_string())
            }
            Error::MissingUsername { .. } => {
                (StatusCode::BAD_REQUEST, "username is missing".to_string())
            }
            Error::Signup {
                source: entities::Error::PasswordTooShort { .. },
                ..
            } => (StatusCode::BAD_REQUEST, "password is too short".to_string()),
            Error::AddUser {
                source: storage::Error::UsernameClaimed { .. },
            } => (StatusCode::BAD_REQUEST, "username must be unique".to_string()),
            ////////////////////////////////////////////////////////////////////////////////////////
            // Authorization failure-- don't tell a potential attacker the way in which they failed
            ////////////////////////////////////////////////////////////////////////////////////////
            Error::InvalidCredentials { .. } => (
                StatusCode::UNAUTHORIZED,
                "invalid username or password".to_string(),
            ),
            ////////////////////////////////////////////////////////////////////////////////////////
            // Internal failure-- own up to it:
            ////////////////////////////////////////////////////////////////////////////////////////
            Error::ListUsers { source } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to list users: {}", source),
            ),
            Error::NoKeys { source, .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!(
                    "No signing keys found ({}); did you configure the program?",
                    source
                ),
            ),
            Error::Signup { source, .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to create user: {}", source),
            ),
            Error::Token {
                username, source, ..
            } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to mint a token for {}: {}", username, source),
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

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                         `POST /users`                                          //
////////////////////////////////////////////////////////////////////////////////////////////////////

inventory::submit! { metrics::Registration::new("users_signups_successful", "Successful signups", Sort::IntegralCounter) }
inventory::submit! { metrics::Registration::new("users_signups_failures", "Rejected signups", Sort::IntegralCounter) }

/// A deserializable struct representing the body of `POST /users`
///
/// `username` & `password` are required, but optional at the deserialization layer so that *this*
/// module gets to explain which is missing.
#[derive(Clone, Debug, Deserialize)]
struct SignupReq {
    username: Option<String>,
    name: Option<String>,
    password: Option<SecretString>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct UserRsp {
    pub id: UserId,
    pub username: Username,
    pub name: String,
}

/// Signup as a new user
///
/// Parameters:
///
/// - username: bloglist usernames consist of alphanumeric characters and '-', '_' & '.', and must
///   be at least three characters; the username must be unique-- if it's already claimed, the
///   request will fail.
///
/// - password: bloglist passwords may be arbitrary UTF-8 text of at least three characters;
///   bloglist will not store passwords (it stores an Argon2id hash of the salted password)
///
/// - name: the user's "display name" (generally intended to be used in user interfaces); unlike
///   usernames, this may be arbitrary UTF-8 encoded text (optional, defaults to the username)
async fn signup(
    State(state): State<Arc<Bloglist>>,
    Json(signup_req): Json<SignupReq>,
) -> axum::response::Response {
    async fn signup1(
        req: &SignupReq,
        storage: &(dyn StorageBackend + Send + Sync),
    ) -> Result<UserRsp> {
        let username = req.username.as_deref().context(MissingUsernameSnafu)?;
        let username = Username::new(username).context(BadUsernameSnafu)?;
        let password = req.password.as_ref().context(MissingPasswordSnafu)?;
        let user = User::new(&username, password, req.name.as_deref()).context(SignupSnafu)?;
        storage.add_user(&user).await.context(AddUserSnafu)?;
        Ok(UserRsp {
            id: user.id(),
            username: user.username().clone(),
            name: user.display_name(),
        })
    }

    match signup1(&signup_req, state.storage.as_ref()).await {
        Ok(rsp) => {
            info!("Created user {}", rsp.username);
            counter_add!(state.instruments, "users_signups_successful", 1);
            (StatusCode::CREATED, Json(rsp)).into_response()
        }
        Err(err) => {
            info!("signup rejected: {}", err);
            counter_add!(state.instruments, "users_signups_failures", 1);
            let (status, msg) = err.as_status_and_msg();
            (status, Json(ErrorResponseBody { error: msg })).into_response()
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          `GET /users`                                          //
////////////////////////////////////////////////////////////////////////////////////////////////////

inventory::submit! { metrics::Registration::new("users_listed", "Number of user listings served", Sort::IntegralCounter) }

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct UserWithBlogsRsp {
    pub id: UserId,
    pub username: Username,
    pub name: String,
    pub blogs: Vec<BlogRsp>,
}

/// `GET /users` handler
///
/// Return all users, in order of signup, each with the blogs they've submitted.
async fn get_users(State(state): State<Arc<Bloglist>>) -> axum::response::Response {
    async fn get_users1(
        storage: &(dyn StorageBackend + Send + Sync),
    ) -> Result<Vec<UserWithBlogsRsp>> {
        let users = storage.users().await.context(ListUsersSnafu)?;
        let mut rsps = Vec::with_capacity(users.len());
        for user in users {
            let blogs = storage
                .blogs_for_user(&user.id())
                .await
                .context(ListUsersSnafu)?;
            rsps.push(UserWithBlogsRsp {
                id: user.id(),
                username: user.username().clone(),
                name: user.display_name(),
                blogs: blogs.iter().map(|blog| BlogRsp::new(blog, None)).collect(),
            });
        }
        Ok(rsps)
    }

    match get_users1(state.storage.as_ref()).await {
        Ok(rsp) => {
            counter_add!(state.instruments, "users_listed", 1);
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
//                                         `POST /login`                                          //
////////////////////////////////////////////////////////////////////////////////////////////////////

inventory::submit! { metrics::Registration::new("users_logins_successful", "Successful logins", Sort::IntegralCounter) }
inventory::submit! { metrics::Registration::new("users_logins_failures", "Rejected logins", Sort::IntegralCounter) }

#[derive(Clone, Debug, Deserialize)]
struct LoginReq {
    username: Username,
    password: SecretString,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct LoginRsp {
    pub token: String,
    pub username: Username,
    pub name: String,
}

/// Login as an existing user
///
/// This endpoint will vend a time-limited JWT that can be supplied in the Authorization header
/// (with the bearer scheme) in subsequent requests.
async fn login(
    State(state): State<Arc<Bloglist>>,
    Json(login_req): Json<LoginReq>,
) -> axum::response::Response {
    async fn login1(
        storage: &(dyn StorageBackend + Send + Sync),
        signing_keys: &SigningKeys,
        token_lifetime: &Duration,
        issuer: &str,
        username: &Username,
        password: SecretString,
    ) -> Result<LoginRsp> {
        let user = check_password(storage, username, password)
            .await
            .context(InvalidCredentialsSnafu)?;
        let (keyid, signing_key) = signing_keys.current().context(NoKeysSnafu)?;
        let token = mint_token(username, &keyid, &signing_key, issuer, token_lifetime).context(
            TokenSnafu {
                username: username.clone(),
            },
        )?;
        Ok(LoginRsp {
            token,
            username: username.clone(),
            name: user.display_name(),
        })
    }

    match login1(
        state.storage.as_ref(),
        &state.signing_keys,
        &state.token_lifetime,
        &state.domain,
        &login_req.username,
        login_req.password,
    )
    .await
    {
        Ok(rsp) => {
            info!("Logged-in user {}", login_req.username);
            counter_add!(state.instruments, "users_logins_successful", 1);
            (StatusCode::OK, Json(rsp)).into_response()
        }
        Err(err @ Error::InvalidCredentials { .. }) => {
            info!("login rejected for {}", login_req.username);
            counter_add!(state.instruments, "users_logins_failures", 1);
            let (status, msg) = err.as_status_and_msg();
            (status, Json(ErrorResponseBody { error: msg })).into_response()
        }
        Err(err) => {
            error!("{:#?}", err);
            counter_add!(state.instruments, "users_logins_failures", 1);
            let (status, msg) = err.as_status_and_msg();
            (status, Json(ErrorResponseBody { error: msg })).into_response()
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                           Public API                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Return a router for the User API
///
/// The returned [Router] will presumably be merged with other routers.
pub fn make_router(state: Arc<Bloglist>) -> Router<Arc<Bloglist>> {
    Router::new()
        .route("/users", get(get_users).post(signup))
        .route("/login", post(login))
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
    use crate::{memory::Store, metrics::Instruments, token::verify_token};

    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
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

    async fn post_json(app: &Router, uri: &str, body: serde_json::Value) -> axum::response::Response {
        app.clone()
            .oneshot(
                Request::post(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    async fn body_json(rsp: axum::response::Response) -> serde_json::Value {
        let bytes = rsp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn creation_succeeds_with_a_fresh_username() {
        let app = mk_app(mk_state());
        let rsp = post_json(
            &app,
            "/api/users",
            serde_json::json!({
                "username": "mluukkai",
                "name": "Matti Luukkainen",
                "password": "salainen"
            }),
        )
        .await;
        assert_eq!(rsp.status(), StatusCode::CREATED);
        let body = body_json(rsp).await;
        assert_eq!(body["username"], "mluukkai");
        assert_eq!(body["name"], "Matti Luukkainen");

        let rsp = app
            .clone()
            .oneshot(Request::get("/api/users").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(rsp.status(), StatusCode::OK);
        let body = body_json(rsp).await;
        let usernames: Vec<&str> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|u| u["username"].as_str().unwrap())
            .collect();
        assert_eq!(usernames, vec!["mluukkai"]);
    }

    #[tokio::test]
    async fn creation_fails_if_username_is_taken() {
        let app = mk_app(mk_state());
        let req = serde_json::json!({
            "username": "root",
            "name": "Root Groot",
            "password": "galaxy"
        });
        assert_eq!(
            post_json(&app, "/api/users", req.clone()).await.status(),
            StatusCode::CREATED
        );
        let rsp = post_json(&app, "/api/users", req).await;
        assert_eq!(rsp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(rsp).await["error"], "username must be unique");
    }

    #[tokio::test]
    async fn creation_fails_on_missing_or_short_fields() {
        let app = mk_app(mk_state());

        let rsp = post_json(
            &app,
            "/api/users",
            serde_json::json!({"username": "rogue", "name": "Rogue"}),
        )
        .await;
        assert_eq!(rsp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(rsp).await["error"], "password is missing");

        let rsp = post_json(
            &app,
            "/api/users",
            serde_json::json!({"username": "rogue", "name": "Rogue", "password": "q"}),
        )
        .await;
        assert_eq!(rsp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(rsp).await["error"], "password is too short");

        let rsp = post_json(
            &app,
            "/api/users",
            serde_json::json!({"name": "Rogue", "password": "queen"}),
        )
        .await;
        assert_eq!(rsp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(rsp).await["error"], "username is missing");

        let rsp = post_json(
            &app,
            "/api/users",
            serde_json::json!({"username": "r", "name": "Rogue", "password": "queen"}),
        )
        .await;
        assert_eq!(rsp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(rsp).await["error"], "username is too short");
    }

    #[tokio::test]
    async fn logins_vend_verifiable_tokens() {
        let state = mk_state();
        let app = mk_app(state.clone());
        assert_eq!(
            post_json(
                &app,
                "/api/users",
                serde_json::json!({
                    "username": "mluukkai",
                    "name": "Matti Luukkainen",
                    "password": "salainen"
                })
            )
            .await
            .status(),
            StatusCode::CREATED
        );

        let rsp = post_json(
            &app,
            "/api/login",
            serde_json::json!({"username": "mluukkai", "password": "salainen"}),
        )
        .await;
        assert_eq!(rsp.status(), StatusCode::OK);
        let body = body_json(rsp).await;
        assert_eq!(body["username"], "mluukkai");
        assert_eq!(body["name"], "Matti Luukkainen");
        let token = body["token"].as_str().unwrap();
        assert_eq!(
            verify_token(token, &state.signing_keys, &state.domain)
                .unwrap()
                .as_ref(),
            "mluukkai"
        );

        let rsp = post_json(
            &app,
            "/api/login",
            serde_json::json!({"username": "mluukkai", "password": "vaara1"}),
        )
        .await;
        assert_eq!(rsp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            body_json(rsp).await["error"],
            "invalid username or password"
        );
    }
}
