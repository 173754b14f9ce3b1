//! washQ demo.
//!
//! Runs a scripted session against the in-memory providers: an admin sets up
//! machines, a resident books one, starts a wash and is notified when the
//! timer completes it.

use anyhow::Context;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use washq::app::{Providers, WashqApp};
use washq::config::Config;
use washq::mocks::{InMemoryDocumentStore, MockIdentityProvider};
use washq::providers::store::{to_document, Collection};
use washq::providers::{BroadcastNotifier, DocumentStore};
use washq::qr::NoopDecoder;
use washq::session::Credentials;
use washq::{Role, User, CANONICAL_WASH_MINUTES};
use washq_core::environment::{Clock, SystemClock};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,washq=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    washq::metrics::register_business_metrics();

    let config = Config::from_env();
    info!(
        start_wash_latency_ms = config.start_wash_latency.as_millis(),
        qr_base_url = %config.qr_base_url,
        "Configuration loaded"
    );

    let store = InMemoryDocumentStore::new();
    let identity = MockIdentityProvider::new();
    let notifier = BroadcastNotifier::default();
    let clock = Arc::new(SystemClock);

    seed_admin(&store, &identity, clock.as_ref()).await?;

    let mut notifications = notifier.subscribe();
    tokio::spawn(async move {
        while let Ok(notification) = notifications.recv().await {
            info!(title = %notification.title, body = %notification.body, "🔔 Notification");
        }
    });

    let app = WashqApp::new(
        config,
        Providers {
            store: Arc::new(store),
            identity: Arc::new(identity),
            notifier: Arc::new(notifier),
            decoder: Arc::new(NoopDecoder),
            clock,
        },
    );
    app.start().await?;

    // Admin installs the machines
    app.login(&Credentials::new("admin@washq.app", "admin-secret"))
        .await
        .context("admin login")?;
    let washer = app.add_machine("Washer #1", Some("Basement")).await?;
    app.add_machine("Washer #2", Some("Basement")).await?;
    info!(url = %app.machine_qr_url(&washer.id), "Print this on Washer #1");
    app.logout().await?;

    // A resident scans, books and starts a wash
    app.login(&Credentials::new("ada@washq.app", "laundry-day"))
        .await
        .context("resident login")?;
    let scanned = app.resolve_qr(&app.machine_qr_url(&washer.id)).await?;
    app.book(&scanned.id).await?;
    let running = app.start_wash(&scanned.id).await?;
    info!(machine = %running.name, summary = %running.summary(), "Wash started");

    // Time passes
    let finished = app.tick(CANONICAL_WASH_MINUTES).await?;
    info!(finished = finished.len(), "Timer ran");

    for machine in app.machines().await {
        info!(
            machine = %machine.name,
            status = machine.status.label(),
            summary = %machine.summary(),
            "Machine"
        );
    }
    info!(
        delivered = app.notifications_delivered().await,
        "Demo finished"
    );

    app.shutdown();
    Ok(())
}

async fn seed_admin(
    store: &InMemoryDocumentStore,
    identity: &MockIdentityProvider,
    clock: &dyn Clock,
) -> anyhow::Result<()> {
    let account = identity.register("admin@washq.app", "admin-secret");
    let admin = User {
        id: account.uid,
        email: account.email,
        display_name: Some("Laundry Admin".to_string()),
        role: Role::Admin,
        active_booking: None,
        created_at: clock.now(),
    };
    store
        .put(Collection::Users, admin.id.as_str(), to_document(&admin)?)
        .await?;
    Ok(())
}
