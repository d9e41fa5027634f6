use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use dotenv::dotenv;
use tokio::net::TcpListener;
use tower_http::cors::{CorsLayer, Any};
use tower_http::trace::{self, TraceLayer};
use tracing::{Level, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod router;

use appointment_cell::{
    AppointmentRepository, AppointmentState, ExpertLocks, ExpirySweeper, InMemoryAppointmentRepository,
    LoggingNotifier, NotificationDispatcher, SchedulingLock, SupabaseAppointmentRepository,
    SupabaseSchedulingLocks, WebhookNotifier,
};
use expert_cell::{ExpertRepository, ExpertState, InMemoryExpertRepository, SupabaseExpertRepository};
use shared_config::{AppConfig, StorageBackend};
use shared_database::SupabaseClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Loading Env Vars
    dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting expert booking API server");

    let config = Arc::new(AppConfig::from_env());

    let (experts, appointments, scheduling_lock): (
        Arc<dyn ExpertRepository>,
        Arc<dyn AppointmentRepository>,
        Arc<dyn SchedulingLock>,
    ) = match config.storage_backend {
        StorageBackend::Supabase => {
            info!("Using Supabase storage at {}", config.supabase_url);
            let supabase = Arc::new(SupabaseClient::new(&config));
            (
                Arc::new(SupabaseExpertRepository::new(supabase.clone())),
                Arc::new(SupabaseAppointmentRepository::new(supabase.clone())),
                Arc::new(SupabaseSchedulingLocks::new(
                    supabase,
                    Duration::from_secs(config.booking_lock_lease_seconds),
                )),
            )
        }
        StorageBackend::Memory => {
            info!("Using in-memory storage");
            (
                Arc::new(InMemoryExpertRepository::new()),
                Arc::new(InMemoryAppointmentRepository::new()),
                Arc::new(ExpertLocks::new()),
            )
        }
    };

    let notifier: Arc<dyn NotificationDispatcher> = match &config.notification_webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(url.clone())),
        None => Arc::new(LoggingNotifier),
    };

    let expert_state = Arc::new(ExpertState::new(config.clone(), experts.clone()));
    let appointment_state = Arc::new(AppointmentState::with_scheduling_lock(
        config.clone(),
        experts,
        appointments.clone(),
        notifier,
        scheduling_lock,
    ));

    // Background expiry of pending appointments that were never confirmed
    let sweeper = ExpirySweeper::new(
        appointments,
        appointment_state.lifecycle.clone(),
        Duration::from_secs(config.expiry_sweep_interval_seconds),
    );
    tokio::spawn(async move { sweeper.run().await });

    // Set up CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Build the application router
    let app = router::create_router(expert_state, appointment_state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(trace::DefaultMakeSpan::new()
                    .level(Level::INFO))
                .on_response(trace::DefaultOnResponse::new()
                    .level(Level::INFO)),
        )
        .layer(cors);

    // Run the server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    info!("Listening on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
