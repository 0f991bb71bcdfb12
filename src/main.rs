use anyhow::Context;
use hybrid_search::cache::{exact_key, CacheStore, SqliteCacheStore};
use hybrid_search::cli::{CacheAction, Cli, Commands, ConfigAction};
use hybrid_search::config::{expand_path, Config};
use hybrid_search::error::HybridError;
use hybrid_search::search::SearchSettings;
use std::path::PathBuf;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse_args();

    init_logging(cli.verbose);

    match cli.command {
        Commands::Config { action } => cmd_config(cli.config, cli.profile, action)?,
        Commands::Cache { action } => {
            let runtime = tokio::runtime::Runtime::new().context("Failed to create tokio runtime")?;
            runtime.block_on(cmd_cache(cli.config, cli.profile, action))?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose {
        "hybrid_search=debug"
    } else {
        "hybrid_search=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt().with_env_filter(filter).with_target(false).init();
}

fn cmd_config(
    config_path: Option<PathBuf>,
    profile: Option<String>,
    action: ConfigAction,
) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show { section } => {
            let config = load_config(config_path, profile)?;
            let mut value =
                serde_json::to_value(&config).context("Failed to serialize config")?;

            if let Some(section) = section {
                value = value
                    .get(&section)
                    .cloned()
                    .ok_or_else(|| HybridError::Config(format!("Unknown section: {}", section)))?;
            }

            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        ConfigAction::Validate { file } => {
            let path = match file.or(config_path) {
                Some(path) => path,
                None => Config::default_path()?,
            };
            let config = Config::load(&path)?;
            println!("✓ Configuration is valid");
            println!("  Schema version: {}", config.meta.schema_version);
            println!("  Profiles: {}", config.profiles.len());
        }
        ConfigAction::Init { force } => {
            let path = match config_path {
                Some(path) => path,
                None => Config::default_path()?,
            };

            if path.exists() && !force {
                println!("Configuration file already exists at: {}", path.display());
                println!("Use --force to overwrite");
                return Ok(());
            }

            Config::default().save(&path)?;
            println!("✓ Configuration initialized at: {}", path.display());
        }
    }

    Ok(())
}

async fn cmd_cache(
    config_path: Option<PathBuf>,
    profile: Option<String>,
    action: CacheAction,
) -> anyhow::Result<()> {
    let config = load_config(config_path, profile)?;

    if let CacheAction::Key {
        query,
        tenant,
        limit,
        no_rerank,
    } = &action
    {
        let settings = SearchSettings::from_config(&config)?;
        let limit = limit.unwrap_or(settings.default_limit);
        let params = settings.cache_params(limit, !no_rerank);
        println!("{}", exact_key(query, tenant, &params));
        return Ok(());
    }

    let path = expand_path(&config.cache.sqlite_path)?;
    let store = SqliteCacheStore::new(&path, config.cache.compression_threshold)
        .with_context(|| format!("Failed to open cache database at {}", path.display()))?;

    match action {
        CacheAction::Stats => {
            let stats = store.stats().await?;
            println!("Cache: {}", path.display());
            println!("  Entries:    {}", stats.entry_count);
            println!("  Expired:    {}", stats.expired_count);
            println!("  Compressed: {}", stats.compressed_count);
            println!("  Size:       {} bytes", stats.total_size_bytes);
        }
        CacheAction::Purge => {
            let removed = store.purge_expired().await?;
            println!("✓ Purged {} expired entries", removed);
        }
        CacheAction::Flush => {
            let removed = store.flush().await?;
            println!("✓ Flushed {} entries", removed);
        }
        CacheAction::Key { .. } => {}
    }

    Ok(())
}

fn load_config(config_path: Option<PathBuf>, profile: Option<String>) -> anyhow::Result<Config> {
    let path = match config_path {
        Some(path) => path,
        None => Config::default_path()?,
    };

    if !path.exists() {
        tracing::warn!(
            "Config file not found, using defaults. Run 'hybrid-search config init' to create one."
        );
        let mut config = Config::default();
        if let Some(profile) = profile {
            config.apply_profile(&profile)?;
        }
        return Ok(config);
    }

    let config = match profile {
        Some(profile) => Config::load_with_profile(&path, &profile)?,
        None => Config::load(&path)?,
    };
    Ok(config)
}
