//! Raksha - emergency SOS orchestration server.
//!
//! # API Endpoints
//!
//! - `GET /` - Service status (provider readiness, active session, registration)
//! - `POST /check_distress` - Classify transcribed text; three distress hits trigger SOS
//! - `POST /sos_trigger` - Start an SOS session
//! - `POST /cancel_sos` - Cancel the active session with the user's PIN
//! - `POST /update_location` - Record the user's latest location
//! - `POST /call_status` - Telephony provider status webhook
//! - `GET /sos/status` - Current session snapshot
//! - `GET /sos/history` - Recently resolved sessions
//! - `GET /health` - Health check

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use raksha::api::{AppState, router};
use raksha::classifier::HttpClassifier;
use raksha::config::AppConfig;
use raksha::controller::SosController;
use raksha::storage::Storage;
use raksha::telephony::{Telephony, TwilioClient, UnconfiguredTelephony};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing with environment filter
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("raksha=info".parse()?))
        .init();

    let config = AppConfig::from_env();

    info!(
        port = config.port,
        db_url = %config.database_url,
        classifier_url = %config.classifier_url,
        "Starting Raksha server"
    );

    // Initialize storage
    let storage = Storage::new(&config.database_url).await?;
    info!("Database initialized");

    if let Some(profile) = &config.seed_profile {
        storage.save_profile(profile).await?;
        info!(
            phone = %profile.phone,
            guardians = profile.guardians.len(),
            "User profile seeded"
        );
    }

    let telephony: Arc<dyn Telephony> = match &config.twilio {
        Some(twilio) => {
            info!(twilio = ?twilio, "Twilio configured");
            Arc::new(TwilioClient::new(twilio.clone()))
        }
        None => {
            warn!("Twilio credentials missing, calls and SMS are disabled");
            Arc::new(UnconfiguredTelephony)
        }
    };

    if config.public_url.is_none() {
        warn!("RAKSHA_PUBLIC_URL not set, call status callbacks will not be received");
    }

    let controller = SosController::new(
        config.sos.clone(),
        config.public_url.clone(),
        Arc::new(HttpClassifier::new(&config.classifier_url)),
        telephony,
        Arc::new(storage),
    );

    let app = router(AppState { controller })
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()));

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr).await?;

    info!(%addr, "Raksha is listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}
