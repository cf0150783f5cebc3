// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::{error::Error, net::SocketAddr, sync::Arc};

use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use tokio_util::sync::CancellationToken;

use postboard_server::{
    api::router,
    auth::{CredentialHasher, FirebaseVerifier, JwksManager, SessionAuthority, TokenCodec},
    avatar::HttpAvatarFetcher,
    config::{AppConfig, TlsConfig},
    logging,
    mail::mailer_from_config,
    state::AppState,
    storage::{RedbUserStore, UserStore},
    tasks::BackgroundTasks,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // A missing .env file is fine; real deployments use the environment
    let _ = dotenvy::dotenv();

    let config = AppConfig::from_env()?;
    logging::init(config.log_format);

    std::fs::create_dir_all(&config.data_dir)?;
    std::fs::create_dir_all(&config.icons_dir)?;

    let users: Arc<dyn UserStore> = Arc::new(RedbUserStore::open(&config.user_db_path())?);
    tracing::info!(path = %config.user_db_path().display(), "Opened user store");

    let shutdown = CancellationToken::new();
    let (tasks, worker) = BackgroundTasks::new();
    let worker_handle = tokio::spawn(worker.run(shutdown.clone()));

    let mut sessions = SessionAuthority::new(
        users.clone(),
        TokenCodec::new(config.tokens.clone()),
        CredentialHasher::new(config.hashing)?,
        mailer_from_config(&config.mail)?,
        tasks,
    );

    let mut jwks = None;
    if let Some(federated) = &config.federated {
        let manager = Arc::new(JwksManager::new(&federated.jwks_url)?);
        sessions = sessions
            .with_federated(Arc::new(FirebaseVerifier::new(manager.clone(), federated)))
            .with_avatars(Arc::new(HttpAvatarFetcher::new(config.icons_dir.clone())?));
        jwks = Some(manager);
        tracing::info!(project = %federated.project_id, "Federated login enabled");
    } else {
        tracing::warn!("FIREBASE_PROJECT_ID not set; federated login disabled");
    }

    let mut state = AppState::new(
        sessions,
        users,
        config.data_dir.clone(),
        config.icons_dir.clone(),
    );
    if let Some(manager) = jwks {
        state = state.with_jwks(manager);
    }
    let app = router(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    let server = serve(app, addr, config.tls.as_ref());

    tokio::select! {
        result = server => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Server failed");
                shutdown.cancel();
                let _ = worker_handle.await;
                return Err(e.into());
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    shutdown.cancel();
    let _ = worker_handle.await;
    tracing::info!("Server stopped");
    Ok(())
}

/// Serve over HTTPS when certificate files are configured, else plain HTTP.
async fn serve(app: Router, addr: SocketAddr, tls: Option<&TlsConfig>) -> std::io::Result<()> {
    match tls {
        Some(tls) => {
            // Install the ring crypto provider for rustls before any TLS operations
            let _ = rustls::crypto::ring::default_provider().install_default();
            let tls_config = RustlsConfig::from_pem_file(&tls.cert_path, &tls.key_path).await?;
            tracing::info!(%addr, "Postboard server listening on https (docs at /docs)");
            axum_server::bind_rustls(addr, tls_config)
                .serve(app.into_make_service())
                .await
        }
        None => {
            tracing::info!(%addr, "Postboard server listening on http (docs at /docs)");
            axum_server::bind(addr).serve(app.into_make_service()).await
        }
    }
}
