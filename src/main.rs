mod cli;

use anyhow::{bail, Context};
use chrono::Utc;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use event_snap::popup::PopupView;
use event_snap::relay::{Message, Reply};
use event_snap::App;

use crate::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let app = App::open()?;

    match cli.command {
        Commands::Extract { url, overlay } => {
            let (_agent, record) = app.open_page(&url).await?;
            let Some(record) = record else {
                bail!("{url} is not a supported event page");
            };
            println!("{}", serde_json::to_string_pretty(&record)?);
            if overlay {
                if let Some(frame) = app.overlay.current() {
                    println!("{}", frame.src);
                }
            }
        }
        Commands::Popup { source } => {
            let view = PopupView::load(&app.store).with_widget_url(app.config.widget_url.clone());
            println!("{}", view.status);
            println!("{}", view.title);
            println!("{}", view.date);
            println!("{}", view.location);
            if let Some(image) = &view.image {
                println!("{image}");
            }
            if let Some(url) = source.and_then(|source| view.widget_url(&source, Utc::now())) {
                println!("{url}");
            }
        }
        Commands::SetToken { token } => {
            print_reply(app.relay.handle(Message::SetApiToken { token }).await)?;
        }
        Commands::Fetch { page } => {
            if let Some(page) = page {
                app.open_page(&page)
                    .await
                    .with_context(|| format!("failed to load fallback page {page}"))?;
            }
            print_reply(app.relay.handle(Message::FetchRemoteEvents).await)?;
        }
        Commands::Daemon => {
            let heartbeat = app.start_scheduler();
            tracing::info!(
                every = app.config.refresh_interval_secs,
                "refreshing remote events in the background"
            );
            tokio::signal::ctrl_c().await?;
            heartbeat.abort();
            tracing::info!("stopped");
        }
    }
    Ok(())
}

fn print_reply(reply: Reply) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(&reply)?);
    if let Reply::Error { error } = reply {
        bail!(error);
    }
    Ok(())
}
