//! Sales Service - Main Application Entry Point
//!
//! # Startup Flow
//!
//! 1. Parse the command line
//! 2. Load and validate configuration from environment variables
//! 3. Create database connection pool and run migrations
//! 4. Connect the rate-limit counter store
//! 5. Serve HTTP, or run a key management command and exit

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use sales_service::{
    config::Config,
    db,
    models::api_key::{ApiKey, ApiKeyType},
    rate_limit::{MemoryRateLimitStore, RateLimitStore, RedisRateLimitStore},
    repos::{
        ApiKeyRepository,
        pg::{PgApiKeyRepository, PgSalesStore},
    },
    routes,
    services::{
        authenticator::{Authenticator, KeySpec},
        pricing_client::HttpPricingClient,
    },
    state::{AppState, StateParts},
};

#[derive(Parser)]
#[command(name = "sales_service")]
#[command(version, about = "Customers and orders API", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server (default)
    Serve,

    /// Create an API key and print the raw key once
    GenerateKey {
        name: String,

        #[arg(long = "type", value_enum, default_value_t = KeyTypeArg::Frontend)]
        key_type: KeyTypeArg,

        /// Requests per minute; the type's default when omitted
        #[arg(long)]
        rate_limit: Option<i32>,

        /// Allowed path pattern, repeatable (`*`, `?` and `[...]` wildcards)
        #[arg(long = "endpoint")]
        endpoints: Vec<String>,

        /// Client name stored in the key metadata
        #[arg(long)]
        client: Option<String>,

        /// Client version stored in the key metadata
        #[arg(long)]
        app_version: Option<String>,
    },

    /// Enable, disable or inspect an existing key
    ManageKey {
        id: Uuid,

        #[arg(value_enum)]
        action: KeyAction,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum KeyTypeArg {
    Frontend,
    Internal,
    Admin,
}

impl From<KeyTypeArg> for ApiKeyType {
    fn from(arg: KeyTypeArg) -> Self {
        match arg {
            KeyTypeArg::Frontend => ApiKeyType::Frontend,
            KeyTypeArg::Internal => ApiKeyType::Internal,
            KeyTypeArg::Admin => ApiKeyType::Admin,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum KeyAction {
    Enable,
    Disable,
    Info,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging with tracing subscriber. Reads RUST_LOG environment variable (defaults to "info" level)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();

    let config = Config::from_env().context("failed to load configuration")?;
    config.validate()?;
    tracing::info!(app_env = %config.app_env, "Configuration loaded");

    let pool = db::create_pool(&config.database_url).await?;
    tracing::info!("Database pool created");

    db::run_migrations(&pool).await?;
    tracing::info!("Database migrations complete");

    let counters = connect_counters(&config).await?;
    let keys: Arc<dyn ApiKeyRepository> = Arc::new(PgApiKeyRepository::new(pool.clone()));

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config, pool, keys, counters).await,
        Commands::GenerateKey {
            name,
            key_type,
            rate_limit,
            endpoints,
            client,
            app_version,
        } => {
            let authenticator = Authenticator::new(keys, counters, config.rate_limits());
            let metadata = (client.is_some() || app_version.is_some())
                .then(|| json!({ "client": client, "app_version": app_version }));
            let generated = authenticator
                .generate(KeySpec {
                    name,
                    key_type: key_type.into(),
                    rate_limit_per_minute: rate_limit,
                    allowed_endpoints: (!endpoints.is_empty()).then_some(endpoints),
                    metadata,
                })
                .await?;

            print_key(&generated.api_key);
            println!();
            println!("API key (shown once, store it now):");
            println!("{}", generated.secret);
            Ok(())
        }
        Commands::ManageKey { id, action } => {
            let authenticator = Authenticator::new(keys, counters, config.rate_limits());
            let key = match action {
                KeyAction::Enable => authenticator.set_active(id, true).await?,
                KeyAction::Disable => authenticator.set_active(id, false).await?,
                KeyAction::Info => authenticator.get(id).await?,
            };
            print_key(&key);
            if matches!(action, KeyAction::Info) {
                let usage = authenticator.usage(&key).await?;
                println!("used this minute:  {}", usage.used_this_minute);
                if let Some(remaining) = usage.remaining_this_minute {
                    println!("remaining:         {remaining}");
                }
            }
            Ok(())
        }
    }
}

/// Redis when `REDIS_URL` is set, in-process counters otherwise.
async fn connect_counters(config: &Config) -> anyhow::Result<Arc<dyn RateLimitStore>> {
    match &config.redis_url {
        Some(url) => {
            let conn = db::create_redis(url)
                .await
                .context("failed to connect to Redis")?;
            tracing::info!("Rate limits stored in Redis");
            Ok(Arc::new(RedisRateLimitStore::new(conn)))
        }
        None => {
            tracing::warn!("REDIS_URL not set, rate limits are per process");
            Ok(Arc::new(MemoryRateLimitStore::new()))
        }
    }
}

async fn serve(
    config: Config,
    pool: db::DbPool,
    keys: Arc<dyn ApiKeyRepository>,
    counters: Arc<dyn RateLimitStore>,
) -> anyhow::Result<()> {
    let pricing = HttpPricingClient::new(config.pricing())?;

    let state = AppState::new(StateParts {
        store: Arc::new(PgSalesStore::new(pool.clone())),
        keys,
        counters,
        pricing: Arc::new(pricing),
        pool: Some(pool),
        rate_limits: config.rate_limits(),
        internal_tokens: config.internal_tokens(),
        debug: config.app_debug,
    });
    let app = routes::build_router(state);

    // Bind to network address and start server
    let addr = format!("0.0.0.0:{}", config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    // Peer addresses feed the internal routes' origin check
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

fn print_key(key: &ApiKey) {
    println!("id:                {}", key.id);
    println!("name:              {}", key.name);
    println!("type:              {}", key.key_type);
    println!("key:               {}", key.masked_key());
    println!("rate limit:        {}/min", key.rate_limit_per_minute);
    println!("active:            {}", key.is_active);
    println!("total requests:    {}", key.total_requests);
    if let Some(endpoints) = &key.allowed_endpoints {
        println!("allowed endpoints: {}", endpoints.join(", "));
    }
}
