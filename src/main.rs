use {
    member_sync::{
        AppState,
        adapters::{
            notification::{HttpSink, LogSink},
            provider_client::HttpProviderClient,
            webhook::router,
        },
        config::Config,
        domain::{ports::NotificationSink, signature::SignatureVerifier},
        infra::postgres::{
            account_repo::{PgAccountStore, PgContentAccessStore},
            ledger_repo::PgTransactionLedger,
            promo_repo::PgPromoLedger,
        },
        services::{
            locks::AccountLocks,
            notifier::{NotificationQueue, run_notifier},
            webhook_pipeline::{Collaborators, PipelineSettings, WebhookPipeline},
            worker::{CommissionApprover, run_commission_approver},
        },
    },
    sqlx::postgres::PgPoolOptions,
    std::{process::ExitCode, sync::Arc, time::Duration},
    tokio::{signal, sync::watch},
    tracing_subscriber::EnvFilter,
};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .acquire_timeout(Duration::from_secs(3))
        .connect(&config.database_url)
        .await?;
    sqlx::migrate!("./migrations").run(&pool).await?;

    let accounts = Arc::new(PgAccountStore::new(pool.clone()));
    let promos = Arc::new(PgPromoLedger::new(pool.clone()));
    let locks = AccountLocks::new();

    let sink: Arc<dyn NotificationSink> = match &config.notify.webhook_url {
        Some(url) => Arc::new(HttpSink::new(url.as_str())?),
        None => Arc::new(LogSink),
    };
    let (notifications, notify_rx) = NotificationQueue::channel(config.notify.queue_capacity);

    let pipeline = WebhookPipeline::new(
        SignatureVerifier::new(config.webhook_secret.as_bytes()),
        Collaborators {
            accounts: accounts.clone(),
            access: Arc::new(PgContentAccessStore::new(pool.clone())),
            promos: promos.clone(),
            provider: Arc::new(HttpProviderClient::new(&config.provider)?),
            ledger: Arc::new(PgTransactionLedger::new(pool.clone())),
        },
        notifications,
        locks.clone(),
        PipelineSettings {
            default_currency: config.default_currency,
            commission_rates: config.commission_rates,
        },
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let notifier = tokio::spawn(run_notifier(
        notify_rx,
        sink,
        config.notify.clone(),
        shutdown_rx.clone(),
    ));
    let approver = tokio::spawn(run_commission_approver(
        CommissionApprover::new(promos, accounts, locks, config.commission_hold),
        Duration::from_secs(3600),
        shutdown_rx,
    ));

    let state = AppState {
        pipeline: Arc::new(pipeline),
    };
    let app = router(state, config.max_body_bytes);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!("listening on {}", config.bind_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    let _ = tokio::join!(notifier, approver);
    tracing::info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl+c: {e}");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => tracing::info!("received ctrl+c, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}
