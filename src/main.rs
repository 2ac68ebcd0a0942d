use std::net::SocketAddr;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use keyshop::bot::BotConsole;
use keyshop::config::Config;
use keyshop::db::{AppState, create_pool, init_db, queries};
use keyshop::handlers;
use keyshop::jobs::run_janitor;
use keyshop::models::CreatePromoCode;

#[derive(Parser)]
#[command(name = "keyshop", version, about = "License key storefront with bank-transfer payments")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server, the bot console and the janitor (default)
    Serve,
    /// Delete pending orders older than the given age
    PurgeStale {
        /// Age in minutes (default: STALE_ORDER_MINUTES)
        #[arg(long)]
        older_than_minutes: Option<i64>,
    },
    /// Overwrite local key pools with the mirror's copies
    SyncKeys,
    /// Create or replace a legacy promo code
    AddPromo {
        code: String,
        /// Percent off, 1-100
        discount: i64,
        uses: i64,
        /// Expiry as a unix timestamp
        #[arg(long)]
        expires_at: Option<i64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "keyshop=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    let pool = create_pool(&config.database_path)
        .with_context(|| format!("failed to open database {}", config.database_path))?;
    {
        let conn = pool.get()?;
        init_db(&conn).context("failed to initialize database schema")?;
    }

    let state = AppState::new(config, pool).context("failed to build application state")?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(state).await,
        Command::PurgeStale { older_than_minutes } => {
            let minutes = older_than_minutes.unwrap_or(state.config.stale_order_minutes);
            let conn = state.db.get()?;
            let deleted = queries::delete_stale_pending(&conn, minutes)?;
            println!("Deleted {} pending orders older than {} minutes", deleted, minutes);
            Ok(())
        }
        Command::SyncKeys => {
            let mirror = state
                .mirror
                .as_ref()
                .context("GITHUB_TOKEN, GITHUB_OWNER and GITHUB_REPO must be set")?;
            let files = mirror.pull_all(&state.keys).await?;
            for file in &files {
                println!("{}: {} lines", file.file, file.lines);
            }
            println!("Synced {} files", files.len());
            Ok(())
        }
        Command::AddPromo {
            code,
            discount,
            uses,
            expires_at,
        } => {
            let input = CreatePromoCode {
                code,
                discount,
                uses_left: uses,
                expires_at,
            };
            input.validate().map_err(anyhow::Error::msg)?;
            let conn = state.db.get()?;
            let promo = queries::upsert_promo(&conn, &input)?;
            println!(
                "Promo {} saved: {}% off, {} uses",
                promo.code, promo.discount, promo.uses_left
            );
            Ok(())
        }
    }
}

async fn serve(state: AppState) -> anyhow::Result<()> {
    let addr = state.config.addr();
    if state.config.dev_mode {
        tracing::warn!("Running in dev mode: emails without SENDGRID_API_KEY are only logged");
    }
    if state.config.bank_api_url.is_none() {
        tracing::warn!("BANK_API_URL not set, payment checks will fail");
    }

    tokio::spawn(BotConsole::new(state.clone()).run());
    tokio::spawn(run_janitor(state.clone()));

    let app = handlers::app(state);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    tracing::info!("keyshop listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_purge_stale_age_flag() {
        let cli = Cli::try_parse_from(["keyshop", "purge-stale", "--older-than-minutes", "30"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Command::PurgeStale {
                older_than_minutes: Some(30)
            })
        ));

        let cli = Cli::try_parse_from(["keyshop"]).unwrap();
        assert!(cli.command.is_none());
    }
}
