//! Fleet control plane binary

mod commands;

use clap::{Parser, Subcommand};
use commands::ServeCommand;
use tracing_subscriber::{layer::SubscriberExt, Layer};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "FLEET_LOG_LEVEL", global = true)]
    log_level: String,

    /// Log format: compact, full
    #[arg(
        long,
        default_value = "compact",
        env = "FLEET_LOG_FORMAT",
        global = true
    )]
    log_format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the internal provisioning and upgrade API
    Serve(ServeCommand),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG gives full control; otherwise fleet crates log at --log-level
    // and noisy dependencies at warn
    let filter = if std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .map_err(|e| anyhow::anyhow!("Invalid RUST_LOG environment variable: {}", e))?
    } else {
        tracing_subscriber::EnvFilter::new(format!(
            "fleet={level},\
             fleet_cli={level},\
             fleet_core={level},\
             fleet_database={level},\
             fleet_migrations={level},\
             fleet_providers={level},\
             fleet_provisioning={level},\
             fleet_upgrades={level},\
             sqlx=warn,\
             sea_orm=warn,\
             sea_orm_migration=warn,\
             h2=warn,\
             tower=warn,\
             tower_http=warn,\
             hyper=warn,\
             reqwest=warn,\
             rustls=warn",
            level = cli.log_level
        ))
    };

    let fmt_layer = match cli.log_format.as_str() {
        "full" => tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed(),
        _ => tracing_subscriber::fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed(),
    };

    let subscriber = tracing_subscriber::registry().with(filter).with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to set global default subscriber: {}", e))?;

    match cli.command {
        Commands::Serve(serve_cmd) => serve_cmd.execute(),
    }
}
