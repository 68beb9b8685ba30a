use castlight::{config::ServerConfig, context::AppContext, error::Result, jobs, server};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "castlight=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    print_banner();

    // `--continue` keeps the previous session's documents on disk
    let continue_existing = std::env::args().any(|arg| arg == "--continue");

    let config = ServerConfig::from_env()?;

    let ctx = AppContext::new(config, continue_existing).await?;
    let ctx = Arc::new(ctx);

    // Start background jobs
    let scheduler = Arc::new(jobs::JobScheduler::new(Arc::clone(&ctx)));
    scheduler.start();

    server::serve((*ctx).clone()).await?;

    Ok(())
}

fn print_banner() {
    println!(
        r#"
   ______           __  ___       __    __
  / ____/___ ______/ /_/ (_)___ _/ /_  / /_
 / /   / __ `/ ___/ __/ / / __ `/ __ \/ __/
/ /___/ /_/ (__  ) /_/ / / /_/ / / / / /_
\____/\__,_/____/\__/_/_/\__, /_/ /_/\__/
                        /____/

        Live Stream Overlay Server v{}
        "#,
        env!("CARGO_PKG_VERSION")
    );
}
