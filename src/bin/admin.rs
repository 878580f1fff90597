//! CLI administration tool for cached-shortener.
//!
//! Operates directly on the store and the shared cache. Every mutation goes
//! through the same service as the server, so cache entries are rewritten
//! and events are published to connected clients.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin admin -- list
//! cargo run --bin admin -- add https://example.com promo01
//! cargo run --bin admin -- update-short promo01 promo02
//! cargo run --bin admin -- update-original https://example.com https://example.org
//! cargo run --bin admin -- delete promo02
//! cargo run --bin admin -- delete-all --confirm
//! cargo run --bin admin -- show-cache
//! cargo run --bin admin -- stats
//! cargo run --bin admin -- status
//! ```
//!
//! # Environment Variables
//!
//! Read through the same configuration as the server, so pool settings,
//! cache TTL and the secret key match it. In particular:
//!
//! - `DATABASE_URL` (required): PostgreSQL connection string
//! - `REDIS_URL` (optional): shared cache; without it cache commands only see
//!   a throwaway in-memory cache and no events reach running servers
//! - `URL_SECRET_KEY` (required)

use cached_shortener::application::services::{IdentifierGenerator, UrlService};
use cached_shortener::config::{load_from_env, mask_connection_string};
use cached_shortener::infrastructure::cache::{MemoryCache, RedisCache, SharedCache};
use cached_shortener::infrastructure::persistence::{PgUrlRepository, connect_pool};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use dialoguer::Confirm;
use std::sync::Arc;

/// CLI tool for managing cached-shortener.
#[derive(Parser)]
#[command(name = "admin")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List all mappings
    List,

    /// Add a mapping with an explicit short code
    Add {
        original_url: String,
        short_code: String,
    },

    /// Replace the original URL of a mapping
    UpdateOriginal { old_url: String, new_url: String },

    /// Replace the short code of a mapping
    UpdateShort { old_code: String, new_code: String },

    /// Delete a mapping by original URL or short code
    Delete {
        identifier: String,

        /// Skip confirmation prompt
        #[arg(short = 'y', long)]
        yes: bool,
    },

    /// Delete every mapping and clear the shared cache
    DeleteAll {
        /// Required; the command refuses to run without it
        #[arg(long)]
        confirm: bool,
    },

    /// Show shared cache entries with their TTL
    ShowCache,

    /// Show mapping and cache counts
    Stats,

    /// Check store and cache connectivity
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let service = connect().await?;

    match cli.command {
        Commands::List => list(&service).await?,
        Commands::Add {
            original_url,
            short_code,
        } => add(&service, &original_url, &short_code).await?,
        Commands::UpdateOriginal { old_url, new_url } => {
            update_original(&service, &old_url, &new_url).await?
        }
        Commands::UpdateShort { old_code, new_code } => {
            update_short(&service, &old_code, &new_code).await?
        }
        Commands::Delete { identifier, yes } => delete(&service, &identifier, yes).await?,
        Commands::DeleteAll { confirm } => delete_all(&service, confirm).await?,
        Commands::ShowCache => show_cache(&service).await?,
        Commands::Stats => stats(&service).await?,
        Commands::Status => status(&service).await?,
    }

    Ok(())
}

/// Builds the service over PostgreSQL and, when configured, Redis.
async fn connect() -> Result<UrlService> {
    let config = load_from_env().context("Failed to load configuration")?;
    let database_url = config.require_database_url()?;
    let ttl = config.cache_ttl_seconds;

    let pool = connect_pool(database_url, &config.pool_settings())
        .await
        .with_context(|| {
            format!(
                "Failed to connect to {}",
                mask_connection_string(database_url)
            )
        })?;

    let cache: Arc<dyn SharedCache> = match &config.redis_url {
        Some(redis_url) => Arc::new(
            RedisCache::connect(redis_url, ttl)
                .await
                .context("Failed to connect to Redis")?,
        ),
        None => {
            println!(
                "{}",
                "REDIS_URL not set: cache commands use a local in-memory cache".yellow()
            );
            Arc::new(MemoryCache::new(ttl))
        }
    };

    Ok(UrlService::new(
        Arc::new(PgUrlRepository::new(Arc::new(pool))),
        cache,
        IdentifierGenerator::new(config.url_secret_key.as_bytes()),
    ))
}

async fn list(service: &UrlService) -> Result<()> {
    println!("{}", "Mappings".bright_blue().bold());
    println!();

    let mappings = service.list().await?;

    if mappings.is_empty() {
        println!("{}", "  No mappings found".yellow());
        return Ok(());
    }

    println!(
        "  {:<12} {:<20} {}",
        "Code".bright_white().bold(),
        "Created".bright_white().bold(),
        "Original URL".bright_white().bold()
    );
    println!("  {}", "─".repeat(75).bright_black());

    for mapping in &mappings {
        println!(
            "  {:<12} {:<20} {}",
            mapping.short_code.cyan(),
            mapping
                .created_at
                .format("%Y-%m-%d %H:%M")
                .to_string()
                .bright_black(),
            mapping.original_url
        );
    }

    println!();
    println!(
        "  Total: {}",
        mappings.len().to_string().bright_white().bold()
    );

    Ok(())
}

async fn add(service: &UrlService, original_url: &str, short_code: &str) -> Result<()> {
    let mapping = service.add(original_url, short_code).await?;

    println!("{}", "Mapping added".green().bold());
    println!("  {} → {}", mapping.short_code.cyan(), mapping.original_url);

    Ok(())
}

async fn update_original(service: &UrlService, old_url: &str, new_url: &str) -> Result<()> {
    let renamed = service.rename_original(old_url, new_url).await?;

    println!("{}", "Original URL updated".green().bold());
    println!("  Code: {}", renamed.current.short_code.cyan());
    println!("  Old:  {}", renamed.previous.original_url.bright_black());
    println!("  New:  {}", renamed.current.original_url);

    Ok(())
}

async fn update_short(service: &UrlService, old_code: &str, new_code: &str) -> Result<()> {
    let renamed = service.rename_short(old_code, new_code).await?;

    println!("{}", "Short code updated".green().bold());
    println!("  URL: {}", renamed.current.original_url);
    println!("  Old: {}", renamed.previous.short_code.bright_black());
    println!("  New: {}", renamed.current.short_code.cyan());

    Ok(())
}

async fn delete(service: &UrlService, identifier: &str, skip_confirm: bool) -> Result<()> {
    if !skip_confirm {
        let confirmed = Confirm::new()
            .with_prompt(format!("Delete the mapping for {}?", identifier))
            .default(false)
            .interact()?;

        if !confirmed {
            println!("{}", "Cancelled".red());
            return Ok(());
        }
    }

    let mapping = service.delete(identifier).await?;

    println!("{}", "Mapping deleted".green().bold());
    println!("  {} → {}", mapping.short_code.cyan(), mapping.original_url);

    Ok(())
}

async fn delete_all(service: &UrlService, confirm: bool) -> Result<()> {
    if !confirm {
        println!(
            "{}",
            "Refusing to delete everything without --confirm".red().bold()
        );
        return Ok(());
    }

    let removed = service.delete_all().await?;

    println!(
        "{} {} mappings deleted, cache cleared",
        "Done:".green().bold(),
        removed.to_string().bright_white().bold()
    );

    Ok(())
}

async fn show_cache(service: &UrlService) -> Result<()> {
    println!("{}", "Shared cache".bright_blue().bold());
    println!();

    let mut entries = service.inspect_cache().await?;
    entries.sort_by(|a, b| a.key.cmp(&b.key));

    if entries.is_empty() {
        println!("{}", "  Cache is empty".yellow());
        return Ok(());
    }

    for entry in &entries {
        let ttl = entry
            .ttl
            .map(|t| format!("{}s", t))
            .unwrap_or_else(|| "-".to_string());

        println!(
            "  {:<50} {:>7}  {}",
            entry.key.cyan(),
            ttl.bright_black(),
            entry.value.as_deref().unwrap_or("<gone>")
        );
    }

    println!();
    println!(
        "  Total: {}",
        entries.len().to_string().bright_white().bold()
    );

    Ok(())
}

async fn stats(service: &UrlService) -> Result<()> {
    println!("{}", "Statistics".bright_blue().bold());
    println!();

    let stats = service.stats().await?;

    println!(
        "  Mappings:      {}",
        stats.total_mappings.to_string().bright_green().bold()
    );
    match stats.cached_keys {
        Some(keys) => println!("  Cache entries: {}", keys.to_string().bright_green().bold()),
        None => println!("  Cache entries: {}", "unavailable".red()),
    }

    Ok(())
}

async fn status(service: &UrlService) -> Result<()> {
    println!("{}", "System status".bright_blue().bold());
    println!();

    if service.repository().health_check().await {
        println!("  Database: {}", "OK".green().bold());
        let count = service.repository().count().await?;
        println!("  Mappings: {}", count.to_string().bright_white());
    } else {
        println!("  Database: {}", "ERROR".red().bold());
    }

    if service.cache().health_check().await {
        println!("  Cache:    {}", "OK".green().bold());
        match service.inspect_cache().await {
            Ok(entries) => println!("  Entries:  {}", entries.len().to_string().bright_white()),
            Err(e) => println!("  Entries:  {}", e.to_string().red()),
        }
    } else {
        println!("  Cache:    {}", "ERROR".red().bold());
    }

    Ok(())
}
