use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use lectern::auth::Accounts;
use lectern::catalog::Catalog;
use lectern::config::{Cli, Command, Config, LibraryQuery, default_config_dir, default_config_path};
use lectern::db::Database;
use lectern::handler::AppState;
use lectern::library::Holdings;
use serde::Serialize;
use tokio::{signal, sync::mpsc};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let args = Cli::parse();
    dotenvy::dotenv().ok();

    // With --config the data directory is the config file's parent,
    // otherwise both live under ~/.lectern/.
    let (config_path, data_dir) = match args.config_path {
        Some(path) => {
            let path = PathBuf::from(path);
            let dir = path
                .parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| PathBuf::from("."));
            (path, dir)
        }
        None => (default_config_path(), default_config_dir()),
    };

    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        eprintln!("failed to create data directory {:?}: {}", data_dir, e);
        std::process::exit(1);
    }

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = Config::new(&config_path.to_string_lossy()).unwrap_or_else(|e| {
        tracing::error!(error = %e, path = ?config_path, "failed to load config file");
        std::process::exit(1);
    });
    let db = Arc::new(Database::new(&cfg, &data_dir).await.unwrap_or_else(|e| {
        tracing::error!(error = %e, "failed to setup database");
        std::process::exit(1);
    }));

    let outcome = match args.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(cfg, db).await,
        Command::Grant { username, permission } => Accounts::new(&db).grant_permission(&username, permission).await,
        Command::Revoke { username, permission } => Accounts::new(&db).revoke_permission(&username, permission).await,
        Command::SetRole { username, role } => Accounts::new(&db).set_role(&username, role).await,
        Command::Query { query } => run_query(&db, query).await,
    };

    if let Err(e) = outcome {
        tracing::error!(error = %lectern::unpack_error(e.as_ref()), "command failed");
        std::process::exit(1);
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run_query(db: &Database, query: LibraryQuery) -> Result<()> {
    match query {
        LibraryQuery::BooksByAuthor { author } => print_json(&Catalog::new(db).books_by_author(&author).await?),
        LibraryQuery::BooksInLibrary { library } => print_json(&Holdings::new(db).books_in_library(&library).await?),
        LibraryQuery::Librarian { library } => print_json(&Holdings::new(db).librarian_of_library(&library).await?),
    }
}

async fn serve(cfg: Config, db: Arc<Database>) -> Result<()> {
    let address = format!("0.0.0.0:{}", cfg.app.get_port());
    let cancellation_token = CancellationToken::new();
    let (shutdown_complete_tx, mut shutdown_complete_rx) = mpsc::channel::<()>(1);

    if Database::is_replica(&cfg.app.turso_url, &cfg.app.turso_auth_token) {
        let sync_db = db.clone();
        let sync_token = cancellation_token.clone();
        let sync_done = shutdown_complete_tx.clone();
        let period = Duration::from_secs(cfg.app.sync_interval_seconds.max(1));
        tokio::spawn(async move {
            let _done = sync_done;
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = sync_db.sync().await {
                            tracing::warn!(error = %e, "replica sync failed");
                        }
                    }
                    _ = sync_token.cancelled() => {
                        tracing::info!("replica sync task shutting down");
                        break;
                    }
                }
            }
        });
    }

    let app = lectern::app(AppState::new(db, &cfg));
    let listener = tokio::net::TcpListener::bind(&address).await?;

    tracing::info!("lectern running on {}", &address);
    tokio::select! {
        result = axum::serve(listener, app) => {
            if let Err(err) = result {
                tracing::error!(error = %err, "server stopped unexpectedly");
                cancellation_token.cancel();
                return Err(err.into());
            }
        }
        _ = signal::ctrl_c() => {
            tracing::info!("ctrl+c signal received, preparing to shutdown");
            cancellation_token.cancel();
        }
    }

    drop(shutdown_complete_tx);
    shutdown_complete_rx.recv().await;
    tracing::info!("lectern going off, graceful shutdown complete");
    Ok(())
}
