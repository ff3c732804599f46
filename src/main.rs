use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::mpsc;

use push_dispatch_service::config::Settings;
use push_dispatch_service::gateway::create_gateway;
use push_dispatch_service::notification::NotificationDispatcher;
use push_dispatch_service::resolver::{ChannelResolver, ResolverEvent};
use push_dispatch_service::server::{create_app, AppState};
use push_dispatch_service::telemetry::init_telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let settings = Settings::new()?;

    // Initialize tracing; the guard flushes spans on exit
    let _telemetry = init_telemetry(&settings.log, &settings.otel)?;
    tracing::info!("Configuration loaded");

    let gateway = create_gateway(&settings.gateway)?;

    // Token lifecycle events go to the log until a registry consumes them
    let (resolver, events) = ChannelResolver::new();
    let resolver_handle = tokio::spawn(drain_resolver_events(events));

    let dispatcher = NotificationDispatcher::from_config(gateway, &settings.dispatch, &settings.message)
        .with_resolver(Arc::new(resolver));
    tracing::info!(
        gateway = dispatcher.gateway_name(),
        max_in_flight = dispatcher.max_in_flight(),
        "Dispatcher initialized"
    );

    let addr = settings.server_addr();
    let state = AppState::new(settings, dispatcher);
    let app = create_app(state);

    // Start server
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // The router owned the last resolver handle; the drain task ends once it is dropped
    match tokio::time::timeout(Duration::from_secs(5), resolver_handle).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(error = %e, "Resolver event task ended abnormally"),
        Err(_) => tracing::warn!("Timed out draining resolver events"),
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn drain_resolver_events(mut events: mpsc::UnboundedReceiver<ResolverEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            ResolverEvent::Invalidated { device_id, reason } => {
                tracing::info!(device_id = %device_id, reason = %reason, "Device token invalidated");
            }
            ResolverEvent::Replaced { old, new } => {
                tracing::info!(old = %old, new = %new, "Device token replaced");
            }
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
