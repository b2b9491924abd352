use anyhow::Result;
use clap::{Args, Parser, Subcommand};

mod seed;

#[derive(Parser)]
#[command(name = "civic", version, about = "Civic issue reporting service CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API
    Api,
    /// Apply database migrations
    Migrate,
    /// Insert a demo user and a sample issue
    Seed(SeedArgs),
}

#[derive(Args, Clone)]
struct SeedArgs {
    /// Pretty-print JSON output
    #[arg(long, default_value_t = false)]
    pretty: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Api => {
            let config = civic_api::load_config()?;
            civic_api::run(config).await?;
        }
        Commands::Migrate => {
            civic_core::logging::init("civic-cli");
            let pool = connect().await?;
            civic_core::migrations::run(&pool).await?;
        }
        Commands::Seed(args) => {
            civic_core::logging::init("civic-cli");
            let pool = connect().await?;
            civic_core::migrations::run(&pool).await?;
            let summary = seed::seed(&pool).await?;
            let rendered = if args.pretty {
                serde_json::to_string_pretty(&summary)?
            } else {
                serde_json::to_string(&summary)?
            };
            println!("{rendered}");
        }
    }

    Ok(())
}

async fn connect() -> Result<sqlx::Pool<sqlx::Postgres>> {
    let database_url = civic_core::config::required_env("DATABASE_URL")?;
    let max_connections = civic_core::config::parse_env_or("DATABASE_MAX_CONNECTIONS", 2u32)?;
    civic_core::db::connect(&database_url, max_connections).await
}
