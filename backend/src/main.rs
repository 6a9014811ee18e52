//! Backend entry-point: loads settings, opens the database pool and serves
//! the HTTP API.

mod server;

use color_eyre::eyre::{Report, WrapErr};
use ortho_config::OrthoConfig;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use server::{ServerConfig, create_server};
use starter::outbound::persistence::{DbPool, PoolConfig};
use starter::settings::AppSettings;

fn init_tracing(settings: &AppSettings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.log_level()));
    let result = if settings.development_mode {
        fmt().with_env_filter(filter).try_init()
    } else {
        fmt().with_env_filter(filter).json().try_init()
    };
    if let Err(e) = result {
        warn!(error = %e, "tracing init failed");
    }
}

/// Application bootstrap.
#[actix_web::main]
async fn main() -> Result<(), Report> {
    color_eyre::install()?;

    let settings = AppSettings::load().wrap_err("failed to load settings")?;
    init_tracing(&settings);

    let bind_addr = settings.bind_addr()?;
    let connect_options = settings.connect_options()?;
    let pool = DbPool::new(
        PoolConfig::new(connect_options).with_max_size(settings.pool_max_size()),
    )
    .await?;
    info!("database pool ready");

    let config = ServerConfig::new(bind_addr)
        .with_db_pool(pool)
        .with_pretty_json(settings.pretty_json)
        .with_pretty_sql(settings.pretty_sql);
    let server = create_server(config).wrap_err("failed to start HTTP server")?;
    info!(%bind_addr, "listening");
    server.await.wrap_err("HTTP server failed")
}
