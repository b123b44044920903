use crate::{
    commands::{Commands, SelectorArgs},
    env::EnvManager,
    error::CliError,
};
use clap::Parser;
use compiler::parse::parse_selector;
use engine::{
    EngineConfig, SelectorError, SelectorRequest, SelectorService, SelectorSource,
    error::DbError,
    executor::{MySqlExecutor, OfflineExecutor, QueryExecutor},
    store::{FileSelectorStore, MemorySelectorStore, MySqlSelectorStore, SelectorStore},
};
use mysql_async::Pool;
use std::{path::PathBuf, sync::Arc};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod commands;
mod env;
mod error;

#[derive(Parser)]
#[command(name = "selector", version = "0.1.0", about = "Wiser data selector compiler")]
struct Cli {
    #[arg(long, global = true, help = "Load SELECTOR_* settings from this .env file")]
    env_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    // Logs go to stderr so stdout stays valid JSON
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut env = EnvManager::from_process();
    if let Some(path) = &cli.env_file {
        env.load_from_file(path)?;
    }
    let config = env.engine_config()?;

    match cli.command {
        Commands::Compile { selector, insecure } => {
            let (service, pool) = offline_service(&selector, config)?;
            let mut request = request(&selector).await?;
            if insecure {
                request.source = insecure_source(request.source)?;
            }
            let query = service.compile(&request).await?;
            println!("{}", serde_json::to_string_pretty(&*query)?);
            disconnect(pool).await?;
        }
        Commands::Validate { selector } => {
            let (service, pool) = offline_service(&selector, config)?;
            let query = service.compile(&request(&selector).await?).await?;
            info!(
                "Selector is valid: {} connection(s), {} join(s), {} parameter(s)",
                query.nodes.len(),
                query.join_count,
                query.params.len()
            );
            disconnect(pool).await?;
        }
        Commands::Run { selector } => {
            let url = config.require_database_url()?.to_string();
            let executor = MySqlExecutor::from_url(&url)?;
            let pool = executor.pool().clone();
            let store = selector_store(&selector, Some(&pool));
            let service = SelectorService::new(Arc::new(executor), store, config);

            let response = service.run(&request(&selector).await?).await;
            println!("{}", serde_json::to_string_pretty(&response)?);
            disconnect(Some(pool)).await?;

            if response.status != 200 {
                return Err(CliError::Status(response.status));
            }
        }
    }

    Ok(())
}

async fn request(args: &SelectorArgs) -> Result<SelectorRequest, CliError> {
    let source = match (&args.file, args.id) {
        (Some(path), _) => SelectorSource::Json(tokio::fs::read_to_string(path).await?),
        (None, Some(id)) => SelectorSource::Stored(id),
        (None, None) => return Err(CliError::Config("either --selector or --id is required".into())),
    };

    let mut request = SelectorRequest::new(source)
        .with_context(args.context())
        .for_filter_items(args.filter_items);
    if args.remove_unknown {
        request = request.remove_unknown_variables(true);
    }
    Ok(request)
}

/// Marks inline selector JSON as insecure. The selector is parsed here, so
/// substitution runs on the parsed tree instead of the raw text.
fn insecure_source(source: SelectorSource) -> Result<SelectorSource, CliError> {
    match source {
        SelectorSource::Json(raw) => {
            let mut selector = parse_selector(&raw).map_err(SelectorError::from)?;
            selector.insecure = true;
            Ok(SelectorSource::Parsed(selector))
        }
        _ => Err(CliError::Config("--insecure needs --selector".into())),
    }
}

/// A service that never executes. Stored selectors still come from the
/// database when one is configured and no store directory is given.
fn offline_service(
    args: &SelectorArgs,
    config: EngineConfig,
) -> Result<(SelectorService, Option<Pool>), CliError> {
    let pool = match (&args.store_dir, config.database_url.as_deref()) {
        (None, Some(url)) => Some(MySqlExecutor::from_url(url)?.pool().clone()),
        _ => None,
    };
    let store = selector_store(args, pool.as_ref());
    let executor: Arc<dyn QueryExecutor> = Arc::new(OfflineExecutor);
    Ok((SelectorService::new(executor, store, config), pool))
}

fn selector_store(args: &SelectorArgs, pool: Option<&Pool>) -> Arc<dyn SelectorStore> {
    match (&args.store_dir, pool) {
        (Some(dir), _) => Arc::new(FileSelectorStore::new(dir)),
        (None, Some(pool)) => Arc::new(MySqlSelectorStore::new(pool.clone())),
        (None, None) => Arc::new(MemorySelectorStore::new()),
    }
}

async fn disconnect(pool: Option<Pool>) -> Result<(), CliError> {
    if let Some(pool) = pool {
        pool.disconnect().await.map_err(DbError::from)?;
    }
    Ok(())
}
