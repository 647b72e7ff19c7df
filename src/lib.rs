use std::sync::Arc;

use actix_web::{web::Data, App, HttpServer};
use tokio_util::sync::CancellationToken;
use tracing::level_filters::LevelFilter;
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{util::SubscriberInitExt, EnvFilter, FmtSubscriber};

use config::Config;
use reclaim::Reclaimer;
use service::Service;
use transport::{HttpPushChannel, WhatsAppTransport};
use worker::Worker;

pub mod api;
pub mod config;
pub mod error;
pub mod history;
pub mod job;
pub mod reclaim;
pub mod retry;
pub mod service;
pub mod transport;
pub mod webhook;
pub mod worker;

/// Runs the full process: HTTP surface (enqueue, operator endpoints,
/// provider webhook), one delivery worker loop, and the stuck-job
/// reclaimer. Multiple processes may point at the same database file.
pub async fn run() -> eyre::Result<()> {
    #[cfg(debug_assertions)]
    FmtSubscriber::builder()
        .pretty()
        .with_env_filter(
            EnvFilter::builder()
                .with_env_var("RELAYQ_LOG")
                .with_default_directive(LevelFilter::INFO.into())
                .from_env()?,
        )
        .finish()
        .try_init()?;

    #[cfg(not(debug_assertions))]
    FmtSubscriber::builder()
        .json()
        .with_env_filter(
            EnvFilter::builder()
                .with_env_var("RELAYQ_LOG")
                .with_default_directive(LevelFilter::INFO.into())
                .from_env()?,
        )
        .finish()
        .try_init()?;

    let config = Config::load()?;

    // Misconfiguration is fatal here, before anything is spawned.
    let transport = WhatsAppTransport::new(
        config.api_base(),
        config.sender_id()?,
        config.access_token()?,
    )?;
    let push = HttpPushChannel::new(config.push_url())?;
    config.verify_token()?;

    let worker_id = config.worker_id();
    let bind_addr = config.bind_addr().to_owned();

    let service = Arc::new(Service::connect_with(config).await?);

    let token = CancellationToken::new();

    let worker = Worker::new(service.clone(), transport, push, worker_id);
    let worker_handle = tokio::spawn(worker.run(token.clone()));

    let reclaimer = Reclaimer::new(service.clone());
    let reclaimer_handle = tokio::spawn(reclaimer.run(token.clone()));

    let data = Data::from(service);

    HttpServer::new(move || {
        App::new()
            .wrap(TracingLogger::default())
            .service(api::service())
            .service(webhook::service())
            .app_data(data.clone())
    })
    .bind(bind_addr)?
    .run()
    .await?;

    token.cancel();
    let _ = worker_handle.await;
    let _ = reclaimer_handle.await;

    Ok(())
}
