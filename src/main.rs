use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::DefaultBodyLimit;
use clap::Parser;
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use troublelab::cli;
use troublelab::config;
use troublelab::import;
use troublelab::llm::OpenAiChatClient;
use troublelab::models::user::UserUpdate;
use troublelab::store::postgres::PgStore;
use troublelab::{api, AppState};

/// Upload limit for CSV imports and JSON bodies.
const BODY_LIMIT: usize = 5 * 1024 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::{trace as sdktrace, Resource};

    // OTLP export only when an endpoint is configured
    let telemetry_layer = if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic())
            .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "troublelab"),
            ])))
            .install_batch(opentelemetry_sdk::runtime::Tokio)
            .context("failed to install OpenTelemetry tracer")?;
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "troublelab=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .with(telemetry_layer)
        .init();

    let cfg = config::load()?;
    let args = cli::Cli::parse();

    let result = match args.command {
        Some(cli::Commands::Serve { port }) => {
            let port = port.unwrap_or(cfg.port);
            run_server(cfg, port).await
        }
        Some(cli::Commands::Token { command }) => {
            let db = PgStore::connect(&cfg.database_url).await?;
            handle_token_command(&db, command).await
        }
        Some(cli::Commands::User { command }) => {
            let db = PgStore::connect(&cfg.database_url).await?;
            handle_user_command(&db, command).await
        }
        Some(cli::Commands::Import { command }) => handle_import_command(&cfg, command).await,
        None => {
            let port = cfg.port;
            run_server(cfg, port).await
        }
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

async fn run_server(cfg: config::Config, port: u16) -> anyhow::Result<()> {
    tracing::info!("Connecting to database...");
    let db = PgStore::connect(&cfg.database_url).await?;

    tracing::info!("Running migrations...");
    db.migrate().await?;

    let llm = OpenAiChatClient::from_config(&cfg)?;
    let dashboard_origin = cfg.dashboard_origin.clone();

    let state = Arc::new(AppState {
        db,
        llm: Arc::new(llm),
        config: cfg,
    });

    let app = api::router(state)
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .layer({
            use axum::http::{HeaderName, Method};
            use tower_http::cors::AllowOrigin;
            CorsLayer::new()
                .allow_origin(AllowOrigin::predicate(move |origin, _| {
                    let origin_str = origin.to_str().unwrap_or("");
                    origin_str == dashboard_origin
                        || origin_str.starts_with("http://localhost:")
                        || origin_str.starts_with("http://127.0.0.1:")
                }))
                .allow_methods([
                    Method::GET,
                    Method::POST,
                    Method::PUT,
                    Method::DELETE,
                    Method::PATCH,
                    Method::OPTIONS,
                ])
                .allow_headers([
                    HeaderName::from_static("content-type"),
                    HeaderName::from_static("authorization"),
                    HeaderName::from_static("x-admin-key"),
                    HeaderName::from_static("x-request-id"),
                ])
                .allow_credentials(true)
        })
        .layer(axum::middleware::from_fn(request_id_middleware))
        .layer(axum::middleware::from_fn(security_headers_middleware));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Trouble Lab listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Middleware: injects a unique X-Request-Id into every response.
async fn request_id_middleware(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let req_id = uuid::Uuid::new_v4().to_string();
    let mut resp = next.run(req).await;
    if let Ok(val) = axum::http::HeaderValue::from_str(&req_id) {
        resp.headers_mut().insert("x-request-id", val);
    }
    resp
}

/// Middleware: injects security headers into every response.
async fn security_headers_middleware(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    use axum::http::HeaderValue;

    let mut resp = next.run(req).await;
    let headers = resp.headers_mut();

    headers.insert("X-Content-Type-Options", HeaderValue::from_static("nosniff"));
    headers.insert("X-Frame-Options", HeaderValue::from_static("DENY"));
    // transcripts and tokens must not be cached
    headers.insert("Cache-Control", HeaderValue::from_static("no-store"));
    headers.insert("Referrer-Policy", HeaderValue::from_static("no-referrer"));
    headers.remove("Server");

    resp
}

async fn handle_token_command(db: &PgStore, cmd: cli::TokenCommands) -> anyhow::Result<()> {
    match cmd {
        cli::TokenCommands::Generate { count } => {
            if count == 0 || count > api::admin::MAX_GENERATE {
                anyhow::bail!("count must be between 1 and {}", api::admin::MAX_GENERATE);
            }
            let tokens = db.generate_tokens(count).await?;
            println!("Generated {} token(s):", tokens.len());
            for t in tokens {
                println!("  {}", t.token_value);
            }
        }
        cli::TokenCommands::List { status } => {
            let tokens = db.list_tokens(status).await?;
            if tokens.is_empty() {
                println!("No tokens found.");
            } else {
                println!("{:<20} {:<10} {:<38} CREATED", "TOKEN", "STATUS", "USER");
                for t in tokens {
                    println!(
                        "{:<20} {:<10} {:<38} {}",
                        t.token_value,
                        t.status,
                        t.assigned_user_id
                            .map(|u| u.to_string())
                            .unwrap_or_else(|| "-".into()),
                        t.created_at.format("%Y-%m-%d")
                    );
                }
            }
        }
        cli::TokenCommands::SetStatus { value, status } => {
            match db.set_token_status_by_value(&value, status).await? {
                Some(t) => println!("Token {} is now {}.", t.token_value, t.status),
                None => println!("Token not found."),
            }
        }
    }
    Ok(())
}

async fn handle_user_command(db: &PgStore, cmd: cli::UserCommands) -> anyhow::Result<()> {
    match cmd {
        cli::UserCommands::Promote { id } => {
            let update = UserUpdate {
                is_admin: Some(true),
                ..Default::default()
            };
            match db.update_user(id, &update).await? {
                Some(u) => println!("{} ({}) is now an admin.", u.name, u.id),
                None => println!("User not found."),
            }
        }
    }
    Ok(())
}

fn read_export(path: &Path) -> anyhow::Result<import::Extraction> {
    let bytes = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    import::extract(&bytes)
}

async fn handle_import_command(
    cfg: &config::Config,
    cmd: cli::ImportCommands,
) -> anyhow::Result<()> {
    match cmd {
        cli::ImportCommands::Preview { file } => {
            let extraction = read_export(&file)?;
            println!("{:<6} {:<8} {:<20} {:<8} REASON", "ROW", "ELIGIBLE", "KEY", "STATUS");
            for row in &extraction.extracted_data {
                println!(
                    "{:<6} {:<8} {:<20} {:<8} {}",
                    row.row_number,
                    row.is_eligible,
                    row.key_to_use,
                    row.status_mapped,
                    row.skip_reason.as_deref().unwrap_or("")
                );
            }
            println!(
                "total={} eligible={} skipped={}",
                extraction.stats.total, extraction.stats.eligible, extraction.stats.skipped
            );
        }
        cli::ImportCommands::Apply { file } => {
            let extraction = read_export(&file)?;
            let records = extraction.eligible_records();
            let db = PgStore::connect(&cfg.database_url).await?;
            let summary = import::reconcile(&db, &records).await;
            println!(
                "total={} success={} failed={} created={} updated={} skipped={} phone_updated={}",
                summary.total,
                summary.success,
                summary.failed,
                summary.created,
                summary.updated,
                summary.skipped,
                summary.phone_updated
            );
            for e in &summary.errors {
                println!("  {}: {}", e.auth_key, e.error);
            }
        }
    }
    Ok(())
}
