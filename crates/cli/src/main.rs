use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use serde_json::Value;
use skua_client::{AllNamespaces, ClientConfig, ClusterClient, StaticNamespaces};
use skua_core::{fields, BuiltinKind};
use skua_kubectl::Kubectl;
use tokio::signal;
use tokio::time::timeout;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "skuactl", version, about = "Skua CLI: a live cluster mirror over the query tool")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Namespace to watch and filter by
    #[arg(long = "ns", global = true)]
    namespace: Option<String>,

    /// Query tool to invoke (default: $SKUA_KUBECTL or "kubectl")
    #[arg(long = "kubectl", global = true)]
    kubectl: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// List available cluster contexts; the current one is starred
    Contexts,
    /// Switch to a named cluster context
    UseContext {
        name: String,
    },
    /// List custom type registry entries (one-shot, bypasses the cache)
    Crds,
    /// Mirror one kind and print a snapshot once events settle
    Get {
        /// Built-in collection (e.g. "pods", "deploy") or a fully
        /// qualified custom form "plural.version.group"
        kind: String,
        /// Watch every namespace instead of the current one
        #[arg(short = 'A', long = "all-namespaces", action = ArgAction::SetTrue)]
        all_namespaces: bool,
    },
    /// Mirror the whole cluster and print partition counts on every
    /// change signal until Ctrl-C
    Watch,
}

#[derive(Debug)]
enum KindSelector {
    BuiltIn(BuiltinKind),
    Custom {
        group: String,
        version: String,
        plural: String,
    },
}

fn parse_kind(key: &str) -> Option<KindSelector> {
    if let Some(kind) = BuiltinKind::parse(key) {
        return Some(KindSelector::BuiltIn(kind));
    }
    let mut parts = key.splitn(3, '.');
    let plural = parts.next()?;
    let version = parts.next()?;
    let group = parts.next()?;
    if plural.is_empty() || version.is_empty() || group.is_empty() {
        return None;
    }
    Some(KindSelector::Custom {
        group: group.to_string(),
        version: version.to_string(),
        plural: plural.to_string(),
    })
}

/// Cluster-scoped built-ins live in un-namespaced partitions, so a
/// namespace filter there would only ever miss.
fn lookup_namespace<'a>(selector: &KindSelector, ns: Option<&'a str>) -> Option<&'a str> {
    match selector {
        KindSelector::BuiltIn(kind) if !kind.namespaced() => None,
        _ => ns,
    }
}

fn init_tracing() {
    let env = std::env::var("SKUA_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("SKUA_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid SKUA_METRICS_ADDR; expected host:port");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    let kubectl = match &cli.kubectl {
        Some(program) => Kubectl::with_program(program.clone()),
        None => Kubectl::new(),
    };

    match cli.command {
        Commands::Contexts => {
            let current = kubectl.current_context().await;
            let contexts = kubectl.available_contexts().await?;
            match cli.output {
                Output::Human => {
                    for name in &contexts {
                        let marker = if *name == current { "*" } else { " " };
                        println!("{} {}", marker, name);
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&contexts)?),
            }
        }
        Commands::UseContext { name } => {
            kubectl.use_context(&name).await?;
            info!(context = %name, "context switched");
            println!("switched to {}", name);
        }
        Commands::Crds => {
            let entries = kubectl
                .list(BuiltinKind::CustomResourceDefinitions.collection(), None)
                .await?;
            match cli.output {
                Output::Human => {
                    println!("{:<44} {:<28} {:<11} AGE", "NAME", "GROUP", "SCOPE");
                    for entry in &entries {
                        let name = fields::name(entry).unwrap_or("-");
                        let group = entry
                            .get("spec")
                            .and_then(|s| s.get("group"))
                            .and_then(|g| g.as_str())
                            .unwrap_or("-");
                        let scope = entry
                            .get("spec")
                            .and_then(|s| s.get("scope"))
                            .and_then(|g| g.as_str())
                            .unwrap_or("-");
                        println!("{:<44} {:<28} {:<11} {}", name, group, scope, render_age(entry));
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&entries)?),
            }
        }
        Commands::Get { kind, all_namespaces } => {
            let Some(selector) = parse_kind(&kind) else {
                anyhow::bail!("unrecognized kind '{}': expected a built-in collection or plural.version.group", kind);
            };
            let ns = if all_namespaces { None } else { cli.namespace.as_deref() };
            info!(kind = %kind, ns = ?ns, "get invoked");

            let client = ClusterClient::new(ClientConfig { kubectl, ..ClientConfig::default() });
            client.start().await?;
            match ns {
                Some(ns) => client.set_oracle(Arc::new(StaticNamespaces::new([ns]))).await?,
                None => client.set_oracle(Arc::new(AllNamespaces)).await?,
            }

            let mut changes = client.subscribe_changes();
            wait_for_snapshot(&mut changes).await;
            let filter = lookup_namespace(&selector, ns);
            let items = match &selector {
                KindSelector::BuiltIn(kind) => client.resources(*kind, filter),
                KindSelector::Custom { group, version, plural } => {
                    client.custom_resources(group, version, plural, filter)
                }
            };

            match cli.output {
                Output::Human => {
                    println!("{:<16} {:<44} AGE", "NAMESPACE", "NAME");
                    for item in &items {
                        let ns_col = fields::namespace(item).unwrap_or("-");
                        let name = fields::name(item).unwrap_or("-");
                        println!("{:<16} {:<44} {}", ns_col, name, render_age(item));
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&items)?),
            }
            client.shutdown().await?;
        }
        Commands::Watch => {
            info!("watch dashboard invoked");
            let client = ClusterClient::new(ClientConfig { kubectl, ..ClientConfig::default() });
            client.start().await?;
            let oracle: Arc<dyn skua_client::NamespaceOracle> = match cli.namespace.as_deref() {
                Some(ns) => Arc::new(StaticNamespaces::new([ns])),
                None => Arc::new(AllNamespaces),
            };
            client.set_oracle(oracle).await?;

            let mut changes = client.subscribe_changes();
            loop {
                tokio::select! {
                    res = changes.changed() => {
                        if res.is_err() { break; }
                        let mut counts = client.partition_counts();
                        counts.retain(|(_, n)| *n > 0);
                        counts.sort_by_key(|(key, _)| key.to_string());
                        match cli.output {
                            Output::Human => {
                                let total: usize = counts.iter().map(|(_, n)| n).sum();
                                println!("-- {} objects in {} partitions", total, counts.len());
                                for (key, n) in &counts {
                                    println!("{:<48} {}", key.to_string(), n);
                                }
                            }
                            Output::Json => {
                                #[derive(serde::Serialize)]
                                struct Row { key: String, count: usize }
                                let rows: Vec<_> = counts
                                    .iter()
                                    .map(|(key, n)| Row { key: key.to_string(), count: *n })
                                    .collect();
                                println!("{}", serde_json::to_string(&rows)?);
                            }
                        }
                    }
                    _ = signal::ctrl_c() => {
                        info!("Ctrl-C received; shutting down");
                        break;
                    }
                }
            }
            client.shutdown().await?;
        }
    }

    Ok(())
}

/// Blocks until the first change signal, bounded by SKUA_WAIT_SECS
/// (default 8). An empty cluster never signals, so the bound matters.
async fn wait_for_snapshot(changes: &mut tokio::sync::watch::Receiver<u64>) {
    let wait_secs = std::env::var("SKUA_WAIT_SECS").ok().and_then(|s| s.parse::<u64>().ok()).unwrap_or(8);
    let deadline = Instant::now() + Duration::from_secs(wait_secs);
    while *changes.borrow() == 0 {
        let now = Instant::now();
        if now >= deadline { break; }
        let rem = deadline.duration_since(now).min(Duration::from_secs(2));
        if timeout(rem, changes.changed()).await.is_err() { break; }
    }
}

fn render_age(obj: &Value) -> String {
    let Some(ts) = fields::creation_timestamp(obj) else { return "-".to_string(); };
    let Ok(created) = chrono::DateTime::parse_from_rfc3339(ts) else { return "-".to_string(); };
    let elapsed = chrono::Utc::now() - created.with_timezone(&chrono::Utc);
    let mut secs = elapsed.num_seconds().max(0) as u64;
    let days = secs / 86_400; secs %= 86_400;
    let hours = secs / 3600; secs %= 3600;
    let mins = secs / 60; secs %= 60;
    if days > 0 { format!("{}d{}h", days, hours) }
    else if hours > 0 { format!("{}h{}m", hours, mins) }
    else if mins > 0 { format!("{}m", mins) }
    else { format!("{}s", secs) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_selector_accepts_builtin_shorthands() {
        assert!(matches!(
            parse_kind("deploy"),
            Some(KindSelector::BuiltIn(BuiltinKind::Deployments))
        ));
        assert!(matches!(
            parse_kind("persistentvolumes"),
            Some(KindSelector::BuiltIn(BuiltinKind::PersistentVolumes))
        ));
    }

    #[test]
    fn kind_selector_splits_qualified_custom_forms() {
        match parse_kind("widgets.v1.example.com") {
            Some(KindSelector::Custom { group, version, plural }) => {
                assert_eq!(group, "example.com");
                assert_eq!(version, "v1");
                assert_eq!(plural, "widgets");
            }
            other => panic!("unexpected parse: {:?}", other),
        }
    }

    #[test]
    fn kind_selector_rejects_junk() {
        assert!(parse_kind("widgets.v1").is_none());
        assert!(parse_kind("").is_none());
    }

    #[test]
    fn cluster_scoped_builtins_ignore_the_namespace_filter() {
        let pv = parse_kind("pv").unwrap();
        assert_eq!(lookup_namespace(&pv, Some("x")), None);
        let pods = parse_kind("pods").unwrap();
        assert_eq!(lookup_namespace(&pods, Some("x")), Some("x"));
        let custom = parse_kind("widgets.v1.example.com").unwrap();
        assert_eq!(lookup_namespace(&custom, Some("x")), Some("x"));
    }
}
