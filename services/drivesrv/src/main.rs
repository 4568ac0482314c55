//! Drive Service binary

use std::net::SocketAddr;

use clap::Parser;
use tracing::{error, info};

use common::service_bootstrap::{self, ServiceInfo};
use common::{shutdown, ServiceArgs};
use drivesrv::api::create_routes;
use drivesrv::config::AppConfig;
use drivesrv::error::DriveSrvError;
use drivesrv::runtime::DriveRuntime;
use errors::{ServiceError, ServiceResult};

const SERVICE_NAME: &str = "drivesrv";

#[tokio::main]
async fn main() -> ServiceResult<()> {
    let args = ServiceArgs::parse();

    let config_path = args.config_path(SERVICE_NAME);
    let config = AppConfig::load(&config_path).map_err(ServiceError::from)?;

    let service_info = ServiceInfo::new(
        SERVICE_NAME,
        env!("CARGO_PKG_VERSION"),
        "S7 drive polling and command service",
        config.service.api.port,
    );
    let level = if args.log_level == "info" && !args.debug {
        config.logging.level.parse().unwrap_or(tracing::Level::INFO)
    } else {
        args.parse_log_level()
    };
    service_bootstrap::init_logging(
        &service_info,
        config.logging.dir.as_deref(),
        level,
        config.logging.json,
    )
    .map_err(|e| ServiceError::StartupFailed(format!("logging: {e}")))?;
    if !args.no_color {
        service_bootstrap::print_startup_banner(&service_info);
    }

    info!("Configuration: {}", config_path);
    config.validate().map_err(ServiceError::from)?;
    if args.validate {
        info!("Validation completed successfully");
        return Ok(());
    }

    let mut runtime = DriveRuntime::new(&config);
    let cancel = runtime.cancel_token();
    let signal_task = shutdown::cancel_on_shutdown(cancel.clone());

    info!(
        "PLC {} | DB{} | {} drives | {} ms",
        runtime.connection().endpoint(),
        config.polling.data_block,
        config.polling.drive_count,
        config.polling.interval_ms
    );
    runtime.start();

    if config.service.api.enabled {
        let bind_address = args
            .bind_address
            .clone()
            .unwrap_or_else(|| config.service.api.bind_address());
        let addr: SocketAddr = bind_address.parse().map_err(|e| {
            ServiceError::from(DriveSrvError::config(format!(
                "invalid bind address '{bind_address}': {e}"
            )))
        })?;
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("API server listening on http://{}", addr);

        let app = create_routes(runtime.app_state());
        let api_cancel = cancel.clone();
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async move { api_cancel.cancelled().await })
            .await
        {
            error!("API server error: {}", e);
            cancel.cancel();
        }
    } else {
        cancel.cancelled().await;
    }

    info!("Shutting down");
    runtime.shutdown().await;
    signal_task.abort();
    info!("{} stopped", SERVICE_NAME);
    Ok(())
}
