use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::info;

use url_shortener::config::Config;
use url_shortener::models::ShortenedUrl;
use url_shortener::storage::{
    QueryContext, SqlExecutor, SqliteExecutor, StorageError, UrlRepository,
};
use url_shortener::telemetry;

#[derive(Parser)]
#[command(name = "url-shortener")]
#[command(about = "Manage short code mappings", long_about = None)]
struct Cli {
    /// Overrides DATABASE_URL
    #[arg(long)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the url_info table and its indexes
    Init,
    /// Map a short code to a URL
    Create {
        short_code: String,
        original_url: String,
    },
    /// Resolve a short code
    Get { short_code: String },
    /// Find the active short code for a URL
    Lookup { original_url: String },
    /// Check whether a short code is taken
    Exists { short_code: String },
    /// Deactivate a mapping by id
    Delete { id: i64 },
    /// List active mappings, newest first
    List {
        #[arg(long, default_value_t = 50)]
        limit: i64,
        #[arg(long, default_value_t = 0)]
        offset: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::from_env()?;
    if let Some(url) = cli.database_url {
        config.database.url = url;
    }

    telemetry::init(&config.log.level);
    info!("Loaded configuration");

    let executor = SqliteExecutor::connect(
        &config.database.url,
        config.database.connect_timeout(),
        telemetry::component("db"),
    )
    .await
    .context("failed to initialize database")?
    .with_default_timeout(config.database.query_timeout());
    let db: Arc<dyn SqlExecutor> = Arc::new(executor);

    let repo = UrlRepository::new(Arc::clone(&db), telemetry::component("repository"));

    // Ctrl-C cancels whatever call is in flight.
    let ctx = QueryContext::background();
    let interrupt = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    let outcome = match repo.init(&ctx).await {
        Ok(()) => run(&repo, &ctx, cli.command).await,
        Err(e) => Err(e).context("failed to prepare schema"),
    };

    db.close().await?;
    outcome
}

async fn run(repo: &UrlRepository, ctx: &QueryContext, command: Commands) -> Result<()> {
    match command {
        Commands::Init => println!("✓ Schema ready"),
        Commands::Create {
            short_code,
            original_url,
        } => {
            if repo.exists(ctx, &short_code).await? {
                println!("⚠ Short code '{}' is already in use", short_code);
                return Ok(());
            }
            let url = repo
                .create(ctx, &ShortenedUrl::new(short_code, original_url))
                .await?;
            println!("✓ Created");
            print_url(&url);
        }
        Commands::Get { short_code } => match repo.get_by_short_code(ctx, &short_code).await {
            Ok(url) => print_url(&url),
            Err(StorageError::NotFound) => println!("No active url for '{}'", short_code),
            Err(e) => return Err(e.into()),
        },
        Commands::Lookup { original_url } => {
            match repo.get_by_original_url(ctx, &original_url).await {
                Ok(url) => print_url(&url),
                Err(StorageError::NotFound) => {
                    println!("No active short code for '{}'", original_url)
                }
                Err(e) => return Err(e.into()),
            }
        }
        Commands::Exists { short_code } => {
            println!("{}", repo.exists(ctx, &short_code).await?);
        }
        Commands::Delete { id } => match repo.delete(ctx, id).await {
            Ok(()) => println!("✓ Deactivated url {}", id),
            Err(StorageError::NotFound) => println!("⚠ No active url with id {}", id),
            Err(e) => return Err(e.into()),
        },
        Commands::List { limit, offset } => {
            let urls = repo.list_active(ctx, limit, offset).await?;
            if urls.is_empty() {
                println!("No active urls found.");
            } else {
                println!("{:<8} {:<16} {:<26} {}", "ID", "Short Code", "Created", "URL");
                println!("{}", "-".repeat(80));
                for url in urls {
                    println!(
                        "{:<8} {:<16} {:<26} {}",
                        url.id,
                        url.short_code,
                        format_timestamp(url.created_at),
                        url.original_url
                    );
                }
            }
        }
    }

    Ok(())
}

fn print_url(url: &ShortenedUrl) {
    println!(
        "fetched: id={} shortcode={} url={} created={}",
        url.id,
        url.short_code,
        url.original_url,
        format_timestamp(url.created_at)
    );
}

fn format_timestamp(secs: i64) -> String {
    chrono::DateTime::from_timestamp(secs, 0)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| secs.to_string())
}
