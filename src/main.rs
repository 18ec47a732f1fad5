#![deny(clippy::unwrap_used)]

use std::sync::Arc;

use dotenv::dotenv;
use poem::{Server, listener::TcpListener};
use tracing::info;

use ssh_terminal_gateway::terminal::{
    AppState, ConnectionRegistry, ConnectionSettings, GatewayConfig, LoginRegistry,
    RusshConnector, SessionGateway, app,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    // Initialize logging with proper tracing default
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("info".parse().expect("valid directive")),
        )
        .init();

    let config = GatewayConfig::from_env();

    let logins = Arc::new(LoginRegistry::new(config.login_ttl));
    for token in &config.access_tokens {
        logins.grant(token.clone());
    }
    if logins.is_empty() {
        info!("No access tokens configured; terminal logins must be granted by the host application");
    }

    let connector = Arc::new(RusshConnector::new(config.term.clone(), config.compression));
    let registry = Arc::new(ConnectionRegistry::new(
        connector,
        ConnectionSettings {
            connect_timeout: config.connect_timeout,
            idle_timeout: config.idle_timeout,
            io_timeout: config.io_timeout,
        },
    ));
    let reaper = registry.start_reaper(config.reaper_interval);

    // Expired logins are dropped on the reaper cadence.
    let purge = {
        let logins = logins.clone();
        let period = config.reaper_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                logins.purge_expired();
            }
        })
    };

    let state = Arc::new(AppState {
        gateway: SessionGateway::new(registry.clone(), &config),
        authenticator: logins,
        outbound_capacity: config.outbound_capacity,
    });

    let addr = format!("0.0.0.0:{}", config.port);
    info!("Starting SSH terminal gateway on {}", addr);
    info!(
        "Idle connections are reaped after {:?} (checked every {:?})",
        config.idle_timeout, config.reaper_interval
    );

    Server::new(TcpListener::bind(addr))
        .name("SSH Terminal Gateway")
        .run_with_graceful_shutdown(
            app(state),
            async {
                let _ = tokio::signal::ctrl_c().await;
                info!("Shutdown requested");
            },
            None,
        )
        .await?;

    purge.abort();
    registry.shutdown().await;
    let _ = reaper.await;

    Ok(())
}
