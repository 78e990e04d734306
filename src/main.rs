use anyhow::{bail, Context, Result};
use aztree::azure::{arm_registry, ArmClient, Credentials};
use aztree::config::Config;
use aztree::resource::{
    builtin_definitions, Remediation, RemediationAction, Resource, ResourceId, ResourceModule,
    ResourceTree,
};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// Browse and edit Azure resources through a cached resource tree
#[derive(Parser, Debug)]
#[command(name = "aztree", version = aztree::VERSION, about, long_about = None)]
struct Args {
    /// Subscription to use
    #[arg(short, long)]
    subscription: Option<String>,

    /// Management endpoint
    #[arg(long)]
    endpoint: Option<String>,

    /// Bearer token; the Azure CLI is used when absent
    #[arg(long, env = "AZURE_ACCESS_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Log level for debugging
    #[arg(long, value_enum, default_value = "off")]
    log_level: LogLevel,

    /// Run in read-only mode (block all write operations)
    #[arg(long)]
    readonly: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List subscriptions visible to the caller
    Subscriptions,
    /// List the child module kinds of a resource
    Modules {
        /// Parent resource id (defaults to the subscription)
        parent: Option<String>,
    },
    /// List resources of a kind under a parent
    Ls {
        kind: String,
        #[arg(short, long)]
        parent: Option<String>,
        /// Narrow a subscription-level listing to a resource group
        #[arg(short = 'g', long)]
        resource_group: Option<String>,
    },
    /// Show one resource
    Show {
        id: String,
        /// Resolve generic resources to their typed kind
        #[arg(long)]
        concrete: bool,
    },
    /// Update fields of a resource (FIELD=VALUE, dot paths allowed)
    Set {
        id: String,
        #[arg(required = true)]
        fields: Vec<String>,
    },
    /// Create a resource of a kind under a parent
    Create {
        kind: String,
        name: String,
        #[arg(short, long)]
        parent: Option<String>,
        fields: Vec<String>,
    },
    /// Delete a resource
    Rm { id: String },
    /// Remember the subscription for later runs
    Use { subscription: String },
}

impl Command {
    fn is_write(&self) -> bool {
        matches!(
            self,
            Command::Set { .. } | Command::Create { .. } | Command::Rm { .. }
        )
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Option<Level> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some(Level::ERROR),
            LogLevel::Warn => Some(Level::WARN),
            LogLevel::Info => Some(Level::INFO),
            LogLevel::Debug => Some(Level::DEBUG),
            LogLevel::Trace => Some(Level::TRACE),
        }
    }
}

fn setup_logging(level: LogLevel) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let tracing_level = level.to_tracing_level()?;

    let log_path = get_log_path();

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let file = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
    {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Failed to open log file {:?}: {}", log_path, e);
            return None;
        }
    };

    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    tracing_subscriber::fmt()
        .with_max_level(tracing_level)
        .with_writer(non_blocking.with_max_level(tracing_level))
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("aztree started with log level: {:?}", level);
    tracing::info!("Log file: {:?}", log_path);

    Some(guard)
}

fn get_log_path() -> PathBuf {
    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("aztree").join("aztree.log");
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".aztree").join("aztree.log");
    }
    PathBuf::from("aztree.log")
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let _log_guard = setup_logging(args.log_level);

    let mut config = Config::load();
    if let Some(endpoint) = &args.endpoint {
        config.endpoint = Some(endpoint.clone());
    }

    if args.readonly && args.command.is_write() {
        bail!("Write operations are disabled in read-only mode");
    }

    let credentials = match &args.token {
        Some(token) => Credentials::from_token(token.clone()),
        None => Credentials::azure_cli(),
    };
    let client = ArmClient::new(&config.effective_endpoint(), credentials)?;
    let tree = ResourceTree::new(
        arm_registry(&client, builtin_definitions()),
        config.tree_options(),
    );

    if let Err(err) = run(&tree, &args, &mut config).await {
        report(&err);
        std::process::exit(1);
    }
    Ok(())
}

async fn run(tree: &ResourceTree, args: &Args, config: &mut Config) -> Result<()> {
    match &args.command {
        Command::Subscriptions => {
            let subs = tree.list_subscriptions().await?;
            print_json(&Value::Array(subs.iter().map(|s| summary(s)).collect()));
        }
        Command::Modules { parent } => {
            let subscription = selected_subscription(args, config)?;
            let parent = resolve_parent(tree, parent.as_deref(), &subscription).await?;
            let modules: Vec<Value> = tree
                .list_sub_modules(&parent)
                .iter()
                .map(|m| json!({"kind": m.name(), "display_name": m.display_name()}))
                .collect();
            print_json(&Value::Array(modules));
        }
        Command::Ls {
            kind,
            parent,
            resource_group,
        } => {
            let subscription = selected_subscription(args, config)?;
            let parent = resolve_parent(tree, parent.as_deref(), &subscription).await?;
            let module = tree.module_for(&parent, kind)?;
            let items = match resource_group {
                Some(rg) => list_in_group(&module, rg).await?,
                None => module.list().await?,
            };
            print_json(&Value::Array(items.iter().map(|r| summary(r)).collect()));
        }
        Command::Show { id, concrete } => {
            let mut resource = find(tree, id).await?;
            if *concrete {
                resource = resource.to_concrete().await?;
            }
            print_json(&detail(&resource));
        }
        Command::Set { id, fields } => {
            let resource = find(tree, id).await?;
            let draft = resource.update()?;
            for (field, value) in parse_fields(fields)? {
                draft.set(&field, value)?;
            }
            let committed = draft.commit().await?;
            print_json(&detail(&committed));
        }
        Command::Create {
            kind,
            name,
            parent,
            fields,
        } => {
            let subscription = selected_subscription(args, config)?;
            let parent = resolve_parent(tree, parent.as_deref(), &subscription).await?;
            let module = tree.module_for(&parent, kind)?;
            let config: Map<String, Value> = parse_fields(fields)?.into_iter().collect();
            let committed = module.create(name, config)?.commit().await?;
            print_json(&detail(&committed));
        }
        Command::Rm { id } => {
            let resource = find(tree, id).await?;
            resource.delete().await?;
            println!("Deleted {}", resource.id());
        }
        Command::Use { subscription } => {
            config.set_subscription(subscription)?;
            println!("Using subscription {}", subscription);
        }
    }
    Ok(())
}

fn selected_subscription(args: &Args, config: &Config) -> Result<String> {
    args.subscription
        .clone()
        .or_else(|| config.effective_subscription())
        .context("No subscription selected. Pass --subscription or set AZURE_SUBSCRIPTION_ID")
}

/// Subscription-level modules narrowed to one resource group
async fn list_in_group(module: &ResourceModule, resource_group: &str) -> Result<Vec<Arc<Resource>>> {
    let all = module.list().await?;
    Ok(all
        .into_iter()
        .filter(|r| {
            r.id()
                .resource_group_name()
                .is_some_and(|rg| rg.eq_ignore_ascii_case(resource_group))
        })
        .collect())
}

async fn resolve_parent(
    tree: &ResourceTree,
    parent: Option<&str>,
    subscription: &str,
) -> Result<Arc<Resource>> {
    match parent {
        Some(id) => find(tree, id).await,
        None => Ok(tree.subscription(subscription)?),
    }
}

async fn find(tree: &ResourceTree, id: &str) -> Result<Arc<Resource>> {
    let id = ResourceId::parse(id)?;
    tree.get_by_id(&id)
        .await?
        .with_context(|| format!("Resource {} was not found", id))
}

fn parse_fields(fields: &[String]) -> Result<Vec<(String, Value)>> {
    fields
        .iter()
        .map(|field| {
            let (path, raw) = field
                .split_once('=')
                .with_context(|| format!("Expected FIELD=VALUE, got '{}'", field))?;
            // JSON literals pass through; anything else is a string
            let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
            Ok((path.to_string(), value))
        })
        .collect()
}

fn summary(resource: &Resource) -> Value {
    json!({
        "id": resource.id().to_string(),
        "name": resource.name(),
        "kind": resource.kind_label(),
        "status": resource.status(),
    })
}

fn detail(resource: &Resource) -> Value {
    let mut value = summary(resource);
    value["snapshot"] = resource.snapshot().unwrap_or(Value::Null);
    value["synced_at"] = json!(resource.synced_at().map(|t| t.to_rfc3339()));
    value
}

fn print_json(value: &Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(e) => eprintln!("Failed to render output: {}", e),
    }
}

fn report(err: &anyhow::Error) {
    let Some(classified) = err.downcast_ref::<aztree::Error>() else {
        eprintln!("Error: {err:#}");
        return;
    };
    eprintln!("Error ({}): {}", classified.kind(), classified.message());
    for Remediation { title, action } in classified.remediation() {
        match action {
            RemediationAction::ConfigureAccess(scope) => eprintln!("  - {}: {}", title, scope),
            RemediationAction::OpenUrl(url) => eprintln!("  - {}: {}", title, url),
        }
    }
}
