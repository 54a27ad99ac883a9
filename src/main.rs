//! Storage Controller Database
//!
//! Opens the configured backend, runs the full load pass and either reports
//! on the loaded object graph or keeps serving persistence metrics.
//!
//! ```text
//!   config file ──► CLI overrides ──► EngineFactory ──► DatabaseLoader
//!                                                            │
//!                             load: summary   dump: graph    serve: /metrics
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use prometheus::Registry;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use storage_controller_db::{Controller, ControllerConfig, DbMetrics, EngineConfig};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Storage Controller Database - load and inspect the controller object graph
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(long, env = "CONTROLLER_CONFIG")]
    config: Option<PathBuf>,

    /// Backend engine (sql, etcd, k8s-crd); overrides the configuration file
    #[arg(long, env = "DB_ENGINE")]
    engine: Option<String>,

    /// SQLite database file for the sql engine
    #[arg(long, env = "DB_SQL_PATH")]
    sql_path: Option<PathBuf>,

    /// etcd endpoint, may be repeated
    #[arg(long = "etcd-endpoint", env = "DB_ETCD_ENDPOINTS", value_delimiter = ',')]
    etcd_endpoints: Vec<String>,

    /// Key prefix for the etcd engine
    #[arg(long, env = "DB_ETCD_PREFIX", default_value = "/STORAGE/")]
    etcd_prefix: String,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:9942")]
    metrics_addr: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load the database and print a summary
    Load,
    /// Load the database and print the object graph
    Dump {
        /// Print YAML instead of JSON
        #[arg(long)]
        yaml: bool,
    },
    /// Load the database and serve metrics until interrupted
    Serve,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args);

    let config = build_config(&args)?;
    info!("Starting {} {}", storage_controller_db::NAME, storage_controller_db::VERSION);
    info!("  Database: {:?}", config.database);

    let registry = Registry::new();
    let metrics = DbMetrics::new(&registry).context("Failed to register metrics")?;
    let controller = Controller::open(config, metrics)
        .await
        .context("Failed to load the database")?;
    info!("Loaded database from {} engine", controller.engine_name());

    match args.command {
        Command::Load => {
            let snapshot = controller.snapshot().await;
            println!("nodes:                  {}", snapshot.nodes.len());
            println!("storage pools:          {}", snapshot.stor_pools.len());
            println!("resource definitions:   {}", snapshot.rsc_dfns.len());
            println!("volume definitions:     {}", snapshot.vlm_dfns.len());
            println!("resources:              {}", snapshot.resources.len());
            println!("volumes:                {}", snapshot.volumes.len());
            println!("layer resource objects: {}", snapshot.layers.len());
            println!("total objects:          {}", snapshot.entity_count());
        }
        Command::Dump { yaml } => {
            let snapshot = controller.snapshot().await;
            let text = if yaml {
                serde_yaml::to_string(&snapshot)?
            } else {
                serde_json::to_string_pretty(&snapshot)?
            };
            println!("{}", text);
        }
        Command::Serve => {
            let registry = Arc::new(registry);
            let metrics_addr = args.metrics_addr.clone();
            let server = tokio::spawn(async move {
                if let Err(e) = run_metrics_server(&metrics_addr, registry).await {
                    error!("Metrics server error: {:#}", e);
                }
            });

            tokio::signal::ctrl_c().await.context("Failed to wait for shutdown signal")?;
            info!("Shutting down");
            server.abort();
        }
    }

    Ok(())
}

// =============================================================================
// Configuration
// =============================================================================

fn build_config(args: &Args) -> anyhow::Result<ControllerConfig> {
    let mut config = match &args.config {
        Some(path) => ControllerConfig::from_yaml_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => ControllerConfig::default(),
    };

    if let Some(engine) = &args.engine {
        config.database = match engine.to_lowercase().as_str() {
            "sql" => EngineConfig::Sql {
                path: args.sql_path.clone(),
            },
            "etcd" => EngineConfig::Etcd {
                endpoints: args.etcd_endpoints.clone(),
                prefix: args.etcd_prefix.clone(),
            },
            "k8s-crd" | "k8s_crd" => EngineConfig::K8sCrd,
            other => anyhow::bail!("Unknown database engine '{}'", other),
        };
    } else if args.sql_path.is_some() {
        warn!("--sql-path has no effect without --engine sql");
    }

    config.validate()?;
    Ok(config)
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "kube=info", "h2=warn", "tonic=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(addr: &str, registry: Arc<Registry>) -> anyhow::Result<()> {
    use hyper::header::{HeaderValue, CONTENT_TYPE};
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Response, Server, StatusCode};
    use prometheus::{Encoder, TextEncoder};

    let make_svc = make_service_fn(move |_conn| {
        let registry = registry.clone();
        async move {
            Ok::<_, std::convert::Infallible>(service_fn(move |req: Request<Body>| {
                let registry = registry.clone();
                async move {
                    let mut response = Response::new(Body::empty());
                    match req.uri().path() {
                        "/metrics" => {
                            let encoder = TextEncoder::new();
                            let mut buffer = Vec::new();
                            match encoder.encode(&registry.gather(), &mut buffer) {
                                Ok(()) => {
                                    if let Ok(value) = HeaderValue::from_str(encoder.format_type()) {
                                        response.headers_mut().insert(CONTENT_TYPE, value);
                                    }
                                    *response.body_mut() = Body::from(buffer);
                                }
                                Err(e) => {
                                    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                                    *response.body_mut() = Body::from(e.to_string());
                                }
                            }
                        }
                        "/healthz" | "/readyz" => *response.body_mut() = Body::from("ok"),
                        _ => {
                            *response.status_mut() = StatusCode::NOT_FOUND;
                            *response.body_mut() = Body::from("not found");
                        }
                    }
                    Ok::<_, std::convert::Infallible>(response)
                }
            }))
        }
    });

    let addr: SocketAddr = addr
        .parse()
        .with_context(|| format!("Invalid metrics server address '{}'", addr))?;

    info!("Metrics server listening on {}", addr);
    Server::bind(&addr).serve(make_svc).await.context("Metrics server failed")?;

    Ok(())
}
