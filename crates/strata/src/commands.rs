//! Argument model and command execution for the `strata` binary.

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use strata_config::{LayeredConfigOptions, StrataConfig};
use strata_memory::{
    ContextCoordinator, ContextScope, MemoryLayer, Priority, ScopeIds, SearchQuery, StoreRequest,
};

/// Command-line options for the local context store.
#[derive(Debug, Parser)]
#[command(name = "strata", version, about = "Layered, scoped context store")]
pub struct Cli {
    /// Optional path to a strata.json5 config file, applied as a runtime override
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

/// Scope and the identifiers that resolve it.
#[derive(Debug, Clone, Args)]
pub struct ScopeArgs {
    #[arg(long, default_value = "global")]
    pub scope: ContextScope,
    #[arg(long)]
    pub tenant: Option<String>,
    #[arg(long)]
    pub user: Option<String>,
    #[arg(long)]
    pub session: Option<String>,
    #[arg(long)]
    pub agent: Option<String>,
}

impl ScopeArgs {
    fn ids(&self) -> ScopeIds {
        ScopeIds {
            tenant_id: self.tenant.clone(),
            user_id: self.user.clone(),
            session_id: self.session.clone(),
            agent_id: self.agent.clone(),
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Store a value. VALUE is parsed as JSON, or kept as a string if it is not JSON.
    Put {
        key: String,
        value: String,
        #[arg(long, default_value = "short_term")]
        layer: MemoryLayer,
        #[command(flatten)]
        scope: ScopeArgs,
        #[arg(long, default_value = "medium")]
        priority: Priority,
        #[arg(long)]
        category: Option<String>,
        /// Override the layer TTL, in seconds
        #[arg(long)]
        ttl: Option<u64>,
        /// JSON object stored alongside the value
        #[arg(long)]
        metadata: Option<String>,
        /// Fail unless the current sync_version matches
        #[arg(long)]
        expect_version: Option<u64>,
    },
    /// Read one entry.
    Get {
        key: String,
        #[command(flatten)]
        scope: ScopeArgs,
        /// Comma-separated scopes tried in order instead of `--scope`
        #[arg(long, value_delimiter = ',')]
        chain: Vec<ContextScope>,
    },
    /// Keyword search across live entries.
    Search {
        /// Keywords; every keyword must match
        query: Vec<String>,
        #[arg(long)]
        scope: Option<ContextScope>,
        #[arg(long)]
        layer: Option<MemoryLayer>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        tenant: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Delete a key from one layer, or from every layer.
    Delete {
        key: String,
        #[command(flatten)]
        scope: ScopeArgs,
        #[arg(long)]
        layer: Option<MemoryLayer>,
    },
    /// Print coordinator health and store counters.
    Stats,
    /// Remove expired entries now.
    Sweep,
}

/// Load the layered config, with `path` as the highest-precedence layer.
/// Persistence is always on: every invocation is a separate process.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<StrataConfig> {
    let cwd = std::env::current_dir().context("failed to resolve working directory")?;
    let mut options = LayeredConfigOptions::new(&cwd);
    if let Some(path) = path {
        options = options.with_runtime_path(path);
    }
    let mut config = StrataConfig::load_layered_with_options(options)
        .context("failed to load config")?
        .config;
    config.persistence.enabled = true;
    Ok(config)
}

/// Run one command and return its JSON output.
pub async fn execute(
    coordinator: &dyn ContextCoordinator,
    command: Command,
    default_limit: usize,
) -> anyhow::Result<Value> {
    let output = match command {
        Command::Put {
            key,
            value,
            layer,
            scope,
            priority,
            category,
            ttl,
            metadata,
            expect_version,
        } => {
            let value = serde_json::from_str(&value).unwrap_or(Value::String(value));
            let mut request = StoreRequest::new(key, value, layer, scope.scope)
                .with_ids(scope.ids())
                .with_priority(priority)
                .with_source("cli");
            if let Some(category) = category {
                request = request.with_category(category);
            }
            if let Some(ttl) = ttl {
                request = request.expires_in(ttl);
            }
            if let Some(metadata) = metadata {
                let metadata: Value =
                    serde_json::from_str(&metadata).context("--metadata must be JSON")?;
                request = request.with_metadata(metadata);
            }
            if let Some(version) = expect_version {
                request = request.expect_version(version);
            }
            serde_json::to_value(coordinator.store(request).await?)?
        }
        Command::Get { key, scope, chain } => {
            let ids = scope.ids();
            let entry = if chain.is_empty() {
                coordinator.retrieve(&key, scope.scope, &ids).await?
            } else {
                coordinator.retrieve_first(&key, &chain, &ids).await?
            };
            serde_json::to_value(entry)?
        }
        Command::Search {
            query,
            scope,
            layer,
            category,
            tenant,
            limit,
        } => {
            let limit = limit.unwrap_or(default_limit);
            if limit == 0 {
                bail!("--limit must be greater than zero");
            }
            let mut search = SearchQuery::new(query.join(" ")).with_limit(limit);
            if let Some(scope) = scope {
                search = search.with_scope(scope);
            }
            if let Some(layer) = layer {
                search = search.with_layer(layer);
            }
            if let Some(category) = category {
                search = search.with_category(category);
            }
            if let Some(tenant) = tenant {
                search = search.with_tenant(tenant);
            }
            serde_json::to_value(coordinator.search(&search).await?)?
        }
        Command::Delete { key, scope, layer } => {
            let removed = coordinator
                .delete(&key, scope.scope, &scope.ids(), layer)
                .await?;
            json!({ "key": key, "removed": removed })
        }
        Command::Stats => serde_json::to_value(coordinator.health().await)?,
        Command::Sweep => serde_json::to_value(coordinator.sweep().await)?,
    };
    Ok(output)
}
