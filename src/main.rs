mod config;
mod error;
mod handlers;
mod models;
mod services;
mod tasks;
#[cfg(test)]
mod test_support;

use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use anyhow::Context;
use dotenv::dotenv;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use config::PushCredentials;
use services::{
    dispatcher::{Dispatcher, DryRunGateway, FcmGateway, PushGateway},
    odoo::{OdooClient, RecordStore},
    registry::DeviceRegistry,
    resolver::RecipientResolver,
};
use tasks::poll_task::{spawn_pollers, PollContext};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::init();

    let config = config::Config::from_env().context("Failed to load configuration")?;
    let timeout = config.poll.request_timeout();

    let registry = DeviceRegistry::new();

    let store: Arc<dyn RecordStore> = Arc::new(
        OdooClient::new(config.odoo.clone(), timeout).context("Failed to build record store client")?,
    );

    let gateway: Arc<dyn PushGateway> = if config.push.dry_run {
        log::warn!("PUSH_DRY_RUN is set, notifications will only be logged");
        Arc::new(DryRunGateway)
    } else {
        log::info!(
            "Push delivery via FCM project {} ({})",
            config.push.project_id,
            match &config.push.credentials {
                PushCredentials::ServiceAccount(account) => account.client_email.as_str(),
                PushCredentials::AccessToken(_) => "static access token",
                PushCredentials::None => "no credentials",
            }
        );
        Arc::new(FcmGateway::new(config.push.clone(), timeout).context("Failed to build push client")?)
    };

    let ctx = PollContext {
        store: store.clone(),
        registry: registry.clone(),
        resolver: RecipientResolver::new(
            store.clone(),
            registry.clone(),
            config.poll.officer_user_ids.clone(),
            timeout,
        ),
        dispatcher: Dispatcher::new(gateway, registry.clone(), timeout),
        config: config.poll.clone(),
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let pollers = spawn_pollers(ctx, shutdown_rx);

    let bind_address = format!("0.0.0.0:{}", config.port);
    log::info!("Starting notification relay on http://{}", bind_address);
    log::info!(
        "Polling {} every {}s, officers: {:?}",
        config.odoo.url,
        config.poll.interval_secs,
        config.poll.officer_user_ids
    );

    let poll_config = config.poll.clone();
    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allow_any_method()
                    .allow_any_header(),
            )
            .app_data(web::Data::new(registry.clone()))
            .app_data(web::Data::from(store.clone()))
            .app_data(web::Data::new(poll_config.clone()))
            .configure(handlers::configure)
    })
    .bind(&bind_address)?
    .run()
    .await?;

    // The HTTP server has stopped (SIGINT/SIGTERM); let in-flight poll
    // cycles finish before exiting.
    log::info!("Shutting down, waiting for pollers to drain");
    shutdown_tx.send(true).ok();
    let drain = Duration::from_secs(config.poll.request_timeout_secs * 4 + 5);
    for handle in pollers {
        match tokio::time::timeout(drain, handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::error!("Poller task failed: {}", e),
            Err(_) => log::warn!("Poller did not stop within {:?}", drain),
        }
    }

    Ok(())
}
