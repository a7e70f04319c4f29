mod config;
mod error;
mod handlers;
mod middleware;
mod models;
mod routes;
mod services;
mod state;
mod utils;

use crate::config::Config;
use crate::middleware::{create_cors, RequestLogging};
use crate::routes::{storefront_routes, unmetered_routes};
use crate::state::AppState;
use actix_web::{web, App, HttpServer};
use anyhow::Context;
use chrono::Local;
use log::info;
use std::io;
use std::io::Write;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    let mut log_builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    log_builder
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] - {}",
                Local::now().format("%Y-%m-%d %H:%M:%S %:z"),
                record.level(),
                record.args()
            )
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e)) // 转换为 io::Result
        })
        .init();

    // 配置缺失时直接启动失败
    let config = Config::from_env().context("Failed to load configuration")?;
    let bind_address = config.bind_address();
    let workers = config.server.workers;
    let server_config = config.server.clone();

    let app_state = web::Data::new(AppState::new(config)?);

    info!(
        "Starting storefront payment service on {} ({:?})",
        bind_address, server_config.environment
    );

    let mut server = HttpServer::new(move || {
        App::new()
            .app_data(app_state.clone())
            .wrap(create_cors(&server_config))
            .wrap(RequestLogging)
            .configure(unmetered_routes)
            .configure(storefront_routes)
    });
    if let Some(workers) = workers {
        server = server.workers(workers);
    }

    server
        .bind(&bind_address)
        .with_context(|| format!("Failed to bind {}", bind_address))?
        .run()
        .await?;

    info!("Server stopped");
    Ok(())
}
