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

//! # bloglistd
//!
//! The bloglist daemon: a small, multi-user blog-list service.
//!
//! bloglistd runs in the foreground (the usual case being inside a container), logging to stdout,
//! serving the blog, user & stats APIs from a single listening socket. SIGTERM shuts it down
//! gracefully; SIGHUP causes it to re-read its configuration file.

use std::{
    future::IntoFuture,
    net::SocketAddr,
    path::PathBuf,
    str::FromStr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use axum::{extract::State, routing::get, Router};
use clap::{crate_version, value_parser, Arg, ArgAction, Command};
use http::{HeaderName, HeaderValue};
use prometheus::{Encoder, TextEncoder};
use serde::Deserialize;
use snafu::{prelude::*, IntoError};
use tap::Pipe;
use tokio::{
    net::TcpListener,
    signal::unix::{signal, SignalKind},
    sync::Notify,
};
use tower_http::{
    request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer},
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{error, info, Level};
use tracing_subscriber::{filter::EnvFilter, fmt, layer::SubscriberExt, Layer, Registry};
use uuid::Uuid;

use bloglist::{
    blogs::make_router as make_blog_router,
    http::Bloglist,
    memory::Store,
    metrics::{check_metric_registrations, Instruments},
    stats::make_router as make_stats_router,
    token::SigningKeys,
    users::make_router as make_user_router,
};

/// The bloglist application error type
///
/// Note that I do not derive the [Debug] trait for this error. This is because `main()` returns
/// `Result<(), Error>`. For this to work, `Result<(), Error>` must implement
/// [std::process::Termination], which has a blanket implementation for `Result<T, E>`, so long as
/// `T` implements `Termination` (which `()` does) and `E` implements `Debug`. Should the `E`
/// variant be returned, the Rust runtime uses the `Debug` implementation to produce an error
/// message on stderr. The derived implementation of `Debug` is not very readable, therefore I'm
/// implementing it "by hand" in terms of `Display`.
#[derive(Snafu)]
pub enum Error {
    #[snafu(display("Failed to bind to {address}: {source}"))]
    Bind {
        address: SocketAddr,
        source: std::io::Error,
    },
    #[snafu(display("Unable to read configuration file: {source}"))]
    ConfigNotFound {
        pth: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("Error parsing configuration file: {source}"))]
    ConfigParse {
        pth: PathBuf,
        source: toml::de::Error,
    },
    #[snafu(display("Failed to parse RUST_LOG: {source}"))]
    EnvFilter {
        source: tracing_subscriber::filter::FromEnvError,
    },
    #[snafu(display("Failed to set the tracing subscriber: {source}"))]
    Subscriber {
        source: tracing::subscriber::SetGlobalDefaultError,
    },
    #[snafu(display("Failed to instantiate a Tokio runtime: {source}"))]
    TokioRuntime { source: std::io::Error },
}

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(self, f)
    }
}

type Result<T> = std::result::Result<T, Error>;

type StdResult<T, E> = std::result::Result<T, E>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                         configuration                                          //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Logging-related options read from the command line or the environment
struct LogOpts {
    pub plain: bool,
    pub level: Level,
}

impl LogOpts {
    fn new(matches: &clap::ArgMatches) -> LogOpts {
        LogOpts {
            plain: matches.get_flag("plain"),
            level: match (
                matches.get_flag("debug"),
                matches.get_flag("verbose"),
                matches.get_flag("quiet"),
            ) {
                (true, _, _) => Level::TRACE,
                (false, true, _) => Level::DEBUG,
                (false, false, true) => Level::ERROR,
                (_, _, _) => Level::INFO,
            },
        }
    }
}

/// Configuration options read from the CLI (or the environment)
struct CliOpts {
    pub instance_id: Uuid,
    pub log_opts: LogOpts,
    pub cfg: Option<PathBuf>,
}

impl CliOpts {
    fn new(matches: clap::ArgMatches) -> CliOpts {
        CliOpts {
            instance_id: matches
                .get_one::<Uuid>("instance-id")
                .cloned()
                .unwrap_or(Uuid::new_v4()),
            log_opts: LogOpts::new(&matches),
            cfg: matches.get_one::<PathBuf>("config").cloned(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
struct SigningKeysConfig {
    /// Access-token lifetime, in seconds
    #[serde(rename = "token-lifetime-seconds")]
    token_lifetime_seconds: i64,
    #[serde(rename = "signing-keys")]
    signing_keys: SigningKeys,
}

impl Default for SigningKeysConfig {
    fn default() -> Self {
        SigningKeysConfig {
            token_lifetime_seconds: 3600,
            signing_keys: SigningKeys::default(),
        }
    }
}

/// bloglist configuration, version one
#[derive(Clone, Debug, Deserialize)]
struct ConfigV1 {
    /// Local address at which to listen; specify as "address:port"
    address: SocketAddr,
    /// The public hostname for this instance; doubles as the JWT issuer
    domain: String,
    #[serde(rename = "signing-keys")]
    signing_keys: SigningKeysConfig,
}

impl ConfigV1 {
    pub fn address(&self) -> &SocketAddr {
        &self.address
    }
    pub fn token_lifetime(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.signing_keys.token_lifetime_seconds)
    }
}

impl Default for ConfigV1 {
    fn default() -> Self {
        ConfigV1 {
            address: "0.0.0.0:3003".parse::<SocketAddr>().unwrap(/* known good */),
            domain: "localhost".to_string(),
            signing_keys: SigningKeysConfig::default(),
        }
    }
}

#[derive(Deserialize)]
#[serde(tag = "version")] // tag "internally"
enum Configuration {
    #[serde(rename = "1")]
    V1(ConfigV1),
}

/// Parse the bloglist configuration file
fn parse_config(cfg: &Option<PathBuf>) -> Result<ConfigV1> {
    let (pth, defaulted): (PathBuf, bool) = cfg.as_ref().map_or_else(
        || (PathBuf::from_str("/etc/bloglist.toml").unwrap(/* known good */), true),
        |p| (p.clone(), false),
    );
    match std::fs::read_to_string(&pth) {
        Ok(text) => match toml::from_str::<Configuration>(&text) {
            Ok(cfg) => match cfg {
                Configuration::V1(cfg) => Ok(cfg),
            },
            Err(err) => Err(ConfigParseSnafu { pth }.into_error(err)),
        },
        Err(err) => {
            if defaulted {
                Ok(ConfigV1::default())
            } else {
                Err(ConfigNotFoundSnafu { pth }.into_error(err))
            }
        }
    }
}

/// Configure bloglist logging
///
/// We're running in the foreground (the usual case being inside a container), so we just log to
/// stdout-- structured JSON by default, human-readable with `--plain`.
///
/// This method can only be invoked once (as it, in turn, feeds tracing's
/// [set_global_default](tracing::subscriber::set_global_default)).
#[allow(clippy::type_complexity)]
fn configure_logging(
    logopts: &LogOpts,
) -> Result<(Box<dyn Layer<Registry> + Send + Sync>, EnvFilter)> {
    let filter = EnvFilter::builder()
        .with_default_directive(logopts.level.into())
        .from_env()
        .context(EnvFilterSnafu)?;

    // `json()` & `compact()` produce `Layer` instances *of different types*. It is for this
    // reason that `Box<dyn Layer<S> + Send + Sync>` implements `Layer`:
    let formatter: Box<dyn Layer<Registry> + Send + Sync> = if logopts.plain {
        Box::new(fmt::Layer::default().compact().with_writer(std::io::stdout))
    } else {
        Box::new(
            fmt::Layer::default()
                .json()
                .with_current_span(true)
                .with_writer(std::io::stdout),
        )
    };

    Ok((formatter, filter))
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                           the server                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

async fn healthcheck() -> &'static str {
    "GOOD"
}

async fn metrics(State(state): State<Arc<Bloglist>>) -> String {
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&state.registry.gather(), &mut buffer)
        .expect("Failed to encode Prometheus metrics");
    String::from_utf8(buffer).expect("Non UTF-8 Prometheus output?")
}

/// Counter for generating request IDs; I realize that a u64 gives me a lot less information than
/// a UUID (the traditional type for request IDs), but I judge it to be enough, as well as more
/// easily readable, and a useful gauge of how long the server's been up.
#[derive(Clone, Debug, Default)]
struct RequestIdGenerator {
    counter: Arc<AtomicU64>,
}

impl MakeRequestId for RequestIdGenerator {
    fn make_request_id<B>(&mut self, _request: &axum::extract::Request<B>) -> Option<RequestId> {
        self.counter
            .fetch_add(1, Ordering::SeqCst)
            .to_string()
            .pipe(|s| RequestId::new(HeaderValue::from_str(&s).unwrap(/* known good */)))
            .pipe(Some)
    }
}

/// Make the [Router] serving the entire API
fn make_router(state: Arc<Bloglist>) -> Router {
    Router::new()
        .route("/healthcheck", get(healthcheck))
        .route("/metrics", get(metrics))
        .nest("/api", make_blog_router(state.clone()))
        .nest("/api", make_user_router(state.clone()))
        .nest("/api", make_stats_router(state.clone()))
        // We want incoming requests to hit the `SetRequestIdLayer` *first*, so it must be the
        // last/outer layer we apply:
        .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
            "x-request-id",
        )))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().include_headers(true))
                .on_response(DefaultOnResponse::new().include_headers(true)),
        )
        .layer(SetRequestIdLayer::new(
            HeaderName::from_static("x-request-id"),
            RequestIdGenerator::default(),
        ))
        .with_state(state)
}

/// Serve bloglist API requests
#[tracing::instrument(
    skip(opts, cfg),
    fields(instance_id = %opts.instance_id)
)]
async fn serve(opts: CliOpts, mut cfg: ConfigV1) -> Result<()> {
    // Produce a future which can be used to signal graceful shutdown, below.
    async fn shutdown_signal(nfy: Arc<Notify>) {
        nfy.notified().await
    }

    let mut sighup = signal(SignalKind::hangup()).unwrap(/* known good */);
    let mut sigterm = signal(SignalKind::terminate()).unwrap(/* known good */);

    // Loop forever, handling SIGHUPs, until asked to terminate:
    loop {
        // The state (and with it, the collection) is rebuilt on each pass; an in-memory store
        // has nothing to carry across a configuration reload.
        let registry = prometheus::Registry::new();
        let instruments = Instruments::new(&registry);
        let state = Arc::new(Bloglist {
            domain: cfg.domain.clone(),
            instance_id: opts.instance_id,
            storage: Arc::new(Store::new()),
            registry,
            instruments,
            signing_keys: cfg.signing_keys.signing_keys.clone(),
            token_lifetime: cfg.token_lifetime(),
        });

        let nfy = Arc::new(Notify::new());

        let server = axum::serve(
            TcpListener::bind(cfg.address()).await.context(BindSnafu {
                address: *cfg.address(),
            })?,
            make_router(state),
        )
        .with_graceful_shutdown(shutdown_signal(nfy.clone()));

        info!("bloglist listening at {}", cfg.address());

        let mut server = server.into_future();

        fn log_on_err<T, E>(x: StdResult<T, E>)
        where
            E: std::fmt::Debug,
        {
            if let Err(err) = x {
                error!("{:?}", err);
            }
        }

        tokio::select! {
            // Intentionally not handling this-- the server *should* never shutdown on its own.
            // That said, if I don't move `server` into a Future, it never gets polled.
            _ = &mut server => unimplemented!(),
            _ = sighup.recv() => { // Future<Output = Option<()>>
                info!("Received SIGHUP; re-reading configuration.");
                // Signal our axum server to shut-down...
                nfy.notify_one();
                // & wait for it to complete. There's not much to be done on failure, nor do we
                // expect a result, but if there _was_ an error of some kind, I'd like to know
                // about it.
                log_on_err(server.await);
                // Cool! Now re-read our configuration:
                cfg = match parse_config(&opts.cfg) {
                    Ok(cfg) => cfg,
                    Err(_) => cfg
                };
            }
            _ = sigterm.recv() => { // Future<Output = Option<()>>
                info!("Received SIGTERM; terminating.");
                // That's it-- we're outta here. Signal our axum server to shut-down...
                nfy.notify_one();
                // & wait for it:
                log_on_err(server.await);
                break;
            }
        }; // End tokio::select!.
    } // End loop.

    Ok(())
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                    main() & process startup                                    //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Transition to async
///
/// Configure our logging (which depends on configuration), then call `serve()`. We only want to
/// enter `serve()` _after_ spinning-up logging, because it carries-out some interesting logging,
/// and we'd like that instrumented with the instance ID.
async fn go_async(opts: CliOpts) -> Result<()> {
    let cfg = parse_config(&opts.cfg)?;
    let (formatter, filter) = configure_logging(&opts.log_opts)?;
    // Setup the global logger. Nb. this can only be invoked once (will panic on a second
    // invocation)!
    tracing::subscriber::set_global_default(Registry::default().with(formatter).with(filter))
        .context(SubscriberSnafu)?;

    // At this point we have logging-- huzzah!
    info!(
        "bloglist version {}, instance {} starting.",
        crate_version!(),
        opts.instance_id
    );

    check_metric_registrations();

    serve(opts, cfg).await
}

fn main() -> Result<()> {
    // Most of bloglistd's configuration options are read from file; the few command-line options
    // that it accepts govern 1) where to find the configuration file, 2) process startup that
    // takes place before the configuration file is parsed. They all have corresponding
    // environment variables for the sake of convenience when running bloglist in a container.
    let opts = CliOpts::new(
        Command::new("bloglistd")
            .version(crate_version!())
            .about("A minimal multi-user blog list service")
            .arg(
                Arg::new("config")
                    .short('c')
                    .long("config")
                    .num_args(1)
                    .value_parser(value_parser!(PathBuf))
                    .env("BLOGLIST_CONFIG")
                    .help(
                        "path (absolute or relative to the process' current directory) to a \
                       configuration file",
                    ),
            )
            .arg(
                Arg::new("debug")
                    .short('D')
                    .long("debug")
                    .num_args(0)
                    .action(ArgAction::SetTrue)
                    .env("BLOGLIST_DEBUG")
                    .help("produce debug output"),
            )
            .arg(
                // I'm not sure if I want to allow this to be set in config. For now, just CLI
                // and env.
                Arg::new("instance-id")
                    .short('I')
                    .long("instance-id")
                    .num_args(1)
                    .value_parser(value_parser!(Uuid))
                    .env("BLOGLIST_INSTANCE_ID")
                    .help("Instance ID (only salient when running multiple instances)")
                    .long_help(
                        "Instance ID
A UUID identifying this bloglist instance. If not given, a random UUID will be used.",
                    ),
            )
            .arg(
                Arg::new("plain")
                    .short('p')
                    .long("plain")
                    .num_args(0)
                    .action(ArgAction::SetTrue)
                    .env("BLOGLIST_PLAIN")
                    .help("log in human-readable format, not JSON/structured logging"),
            )
            .arg(
                Arg::new("quiet")
                    .short('q')
                    .long("quiet")
                    .num_args(0)
                    .action(ArgAction::SetTrue)
                    .env("BLOGLIST_QUIET")
                    .help("produce only error output"),
            )
            .arg(
                Arg::new("verbose")
                    .short('v')
                    .long("verbose")
                    .num_args(0)
                    .action(ArgAction::SetTrue)
                    .env("BLOGLIST_VERBOSE")
                    .help("produce prolix output"),
            )
            .get_matches(),
    );

    tokio::runtime::Runtime::new()
        .context(TokioRuntimeSnafu)?
        .block_on(go_async(opts)) // and start our server!
}
