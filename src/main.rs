use anyhow::{Context, Result};
use clap::Parser;

use site_geocache::cli::{CacheCommand, Cli, Commands};
use site_geocache::{cache_stats, init_tracing, list_unresolved, resolve_sites, AppConfig, ResolveOptions};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = AppConfig::from_env();

    match cli.command {
        Commands::Resolve(args) => {
            let options = ResolveOptions {
                input: args.input,
                output: args.output,
                footprints: args.footprints,
                cache: args.cache,
                retry_unresolved: args.retry_unresolved,
                fresh_cache: args.fresh_cache,
            };
            let report = resolve_sites(&config, &options)
                .await
                .with_context(|| format!("failed to resolve {}", options.input.display()))?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Cache(CacheCommand::Stats(args)) => {
            let path = args.cache.unwrap_or(config.cache_path);
            let stats = cache_stats(&path)
                .with_context(|| format!("failed to read cache {}", path.display()))?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Commands::Cache(CacheCommand::Unresolved(args)) => {
            let path = args.cache.unwrap_or(config.cache_path);
            let keys = list_unresolved(&path)
                .with_context(|| format!("failed to read cache {}", path.display()))?;
            for key in keys {
                println!("{key}");
            }
        }
    }
    Ok(())
}
