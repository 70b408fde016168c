use clap::Parser;
use cluster_dispatch::cache::{InMemoryCacheCluster, ReplicatedCache};
use cluster_dispatch::config::DispatcherConfig;
use cluster_dispatch::dispatcher::{ChannelCommandDispatcherFactory, Command, CommandDispatcher};
use cluster_dispatch::marshal::BincodeMarshaller;
use cluster_dispatch::membership::{Address, Group, Membership};
use cluster_dispatch::registry::{CacheRegistry, ProviderSet, ServiceProviderRegistry};
use cluster_dispatch::transport::InProcessNetwork;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

/// Runs an in-process cluster and walks it through dispatch, registries and a crash.
#[derive(Debug, Parser)]
#[command(name = "cluster-demo", version)]
struct Args {
    /// Number of members to start.
    #[arg(long, default_value_t = 3, value_parser = clap::value_parser!(u16).range(2..))]
    nodes: u16,

    /// Name of the group.
    #[arg(long, default_value = "demo")]
    cluster: String,

    /// Remote command timeout in milliseconds; defaults to the environment or 5000.
    #[arg(long)]
    timeout_ms: Option<u64>,
}

/// Per-member state the demo commands run against.
struct NodeStatus {
    name: String,
    started: Instant,
    served: AtomicU64,
}

#[derive(Debug, Serialize, Deserialize)]
enum StatusCommand {
    Ping,
    Uptime,
}

impl Command for StatusCommand {
    type Context = NodeStatus;
    type Output = String;

    fn execute(&self, status: &NodeStatus) -> anyhow::Result<String> {
        let served = status.served.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(match self {
            Self::Ping => format!("{} pong (#{})", status.name, served),
            Self::Uptime => format!(
                "{} up for {:?} (#{})",
                status.name,
                status.started.elapsed(),
                served
            ),
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut config = DispatcherConfig::from_env();
    if let Some(timeout_ms) = args.timeout_ms {
        config.request_timeout_ms = timeout_ms;
    }
    tracing::info!("Starting {} members in group {}", args.nodes, args.cluster);

    // 1. Group and dispatcher factories:
    let network = InProcessNetwork::new(args.cluster.clone());
    let mut factories = Vec::new();
    for i in 1..=args.nodes {
        let endpoint = network.connect(format!("node-{}", i));
        factories.push(
            ChannelCommandDispatcherFactory::new(endpoint, BincodeMarshaller, config.clone()).await,
        );
    }
    let _membership_log = factories[0].register(Arc::new(
        |previous: &Membership, current: &Membership, merged: bool| -> anyhow::Result<()> {
            tracing::info!(
                "Membership changed from {} to {} members (merged: {})",
                previous.members().len(),
                current.members().len(),
                merged
            );
            Ok(())
        },
    ));

    // 2. Command dispatchers:
    let mut dispatchers = Vec::new();
    for factory in &factories {
        let status = NodeStatus {
            name: factory.local_member().name().to_string(),
            started: Instant::now(),
            served: AtomicU64::new(0),
        };
        dispatchers.push(factory.create_command_dispatcher::<StatusCommand>("status", status)?);
    }

    let responses = dispatchers[0].execute_on_group(&StatusCommand::Ping, &[])?;
    for (node, result) in responses.collect().await {
        match result {
            Ok(outcome) => tracing::info!("{} answered {:?}", node, outcome),
            Err(e) => tracing::warn!("{} failed: {}", node, e),
        }
    }
    let last = factories[factories.len() - 1].local_member();
    let uptime = dispatchers[0]
        .execute_on_member(&StatusCommand::Uptime, &last)?
        .await?;
    tracing::info!("{} answered {:?}", last, uptime);

    // 3. Registries over a replicated cache:
    let addresses: Vec<Address> = factories
        .iter()
        .map(|factory| factory.local_member().address().clone())
        .collect();
    let entries = InMemoryCacheCluster::<Address, (String, u64)>::new("members");
    let providers = InMemoryCacheCluster::<String, ProviderSet>::new("providers");
    let mut entry_caches = Vec::new();
    let mut provider_caches = Vec::new();
    for address in &addresses {
        entry_caches.push(entries.join(address.clone()));
        provider_caches.push(providers.join(address.clone()));
    }
    entries.rebalance(addresses.clone());
    providers.rebalance(addresses.clone());

    let mut registries = Vec::new();
    let mut service_registries = Vec::new();
    let mut registrations = Vec::new();
    for (i, factory) in factories.iter().enumerate() {
        let group: Arc<dyn Group> = factory.clone();
        let registry = CacheRegistry::create(
            group.clone(),
            entry_caches[i].clone() as Arc<dyn ReplicatedCache<Address, (String, u64)>>,
            factory.local_member().name().to_string(),
            i as u64,
        )
        .await?;
        let service_registry = ServiceProviderRegistry::new(
            group,
            provider_caches[i].clone() as Arc<dyn ReplicatedCache<String, ProviderSet>>,
        )
        .await;
        registrations.push(service_registry.register("status".to_string()).await?);
        registries.push(registry);
        service_registries.push(service_registry);
    }

    tracing::info!("Registry entries: {:?}", registries[0].entries().await?);
    tracing::info!(
        "Providers of status: {:?}",
        service_registries[0].providers(&"status".to_string()).await?
    );

    // 4. Crash the last member and let the survivors repair:
    let crashed = addresses[addresses.len() - 1].clone();
    let survivors = addresses[..addresses.len() - 1].to_vec();
    tracing::info!("Crashing {}", crashed);
    network.disconnect(&crashed);
    entries.leave(&crashed);
    providers.leave(&crashed);
    entries.rebalance(survivors.clone());
    providers.rebalance(survivors);
    tokio::time::sleep(Duration::from_millis(200)).await;

    tracing::info!("Registry entries: {:?}", registries[0].entries().await?);
    tracing::info!(
        "Providers of status: {:?}",
        service_registries[0].providers(&"status".to_string()).await?
    );
    let ping = match dispatchers[0].execute_on_member(&StatusCommand::Ping, &last) {
        Ok(future) => future.await,
        Err(e) => Err(e),
    };
    match ping {
        Ok(outcome) => tracing::info!("{} still answered {:?}", last, outcome),
        Err(e) => tracing::info!("{} is gone: {}", last, e),
    }

    // 5. Shutdown:
    let live = factories.len() - 1;
    for registration in registrations.drain(..live) {
        registration.close().await;
    }
    for registry in registries.drain(..live) {
        registry.close().await;
    }
    drop(dispatchers);
    for factory in &factories {
        factory.close().await?;
    }
    tracing::info!("Cluster {} shut down", args.cluster);

    Ok(())
}
