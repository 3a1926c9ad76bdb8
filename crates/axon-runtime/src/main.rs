//! Runtime binary: loads configuration, wires the components together and
//! runs the bus consumer loops until shutdown.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};

use axon_channels::ChannelGateway;
use axon_core::bus::MessageBus;
use axon_core::config::AxonConfig;
use axon_runtime::{build_executor, build_gateway, build_memory, build_summarizer, ExecutorBridge};
use axon_sessions::SessionStore;

#[derive(Parser, Debug)]
#[command(name = "axon", about = "Multi-channel AI assistant runtime")]
struct Args {
    /// Path to axon.toml (default: ~/.axon/axon.toml).
    #[arg(short, long)]
    config: Option<String>,

    /// Enable debug logging.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_filter = if args.verbose {
        "axon=debug,axon_agent=debug,axon_memory=debug"
    } else {
        "axon=info,axon_agent=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();

    // Invalid configuration is fatal at startup.
    let config = AxonConfig::load(args.config.as_deref())?;

    let gateway = build_gateway(&config);
    let memory = build_memory(&config)?;
    let sessions = Arc::new(SessionStore::new(
        &config.session.storage_path,
        config.session.session_timeout_secs,
        config.session.max_history,
    )?);

    // Tool implementations are external; library users register them here.
    let tools = Arc::new(
        axon_agent::ToolRegistry::new()
            .with_timeout(Duration::from_secs(config.agent.tool_timeout_secs)),
    );

    let summarizer = build_summarizer(&config, &gateway, &memory);
    let bus = Arc::new(MessageBus::new(config.bus.capacity));

    let executor = build_executor(
        &config,
        Arc::clone(&gateway),
        Arc::clone(&sessions),
        tools,
        memory,
        summarizer.clone(),
        Some(bus.outbound_sender()),
    );

    let channels = Arc::new(ChannelGateway::new(
        Arc::new(ExecutorBridge(Arc::clone(&executor))),
        config.channels.max_reconnect,
    ));
    channels.start_all().await;
    if channels.statuses().is_empty() {
        info!("no channel adapters registered; waiting on the bus only");
    }

    // Inbound consumer: channels publish messages, the executor answers,
    // replies are broadcast back.
    let inbound_task = {
        let bus = Arc::clone(&bus);
        let channels = Arc::clone(&channels);
        tokio::spawn(async move {
            while let Some(msg) = bus.next_inbound().await {
                channels.process(msg).await;
            }
            info!("inbound consumer drained");
        })
    };

    // Outbound pump: tool-injected messages are broadcast as well.
    let outbound_task = {
        let bus = Arc::clone(&bus);
        let channels = Arc::clone(&channels);
        tokio::spawn(async move {
            while let Some(msg) = bus.next_outbound().await {
                channels.broadcast(msg).await;
            }
            info!("outbound pump drained");
        })
    };

    info!("axon runtime up");
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    bus.close();
    if let Some(s) = &summarizer {
        s.shutdown();
    }

    // Let in-flight turns finish inside the grace window, then move on.
    let grace = Duration::from_secs(config.runtime.grace_secs);
    let drained = tokio::time::timeout(grace, async {
        let _ = inbound_task.await;
        let _ = outbound_task.await;
    })
    .await;
    if drained.is_err() {
        warn!(grace_secs = config.runtime.grace_secs, "grace window elapsed, forcing exit");
    }

    channels.stop_all().await;
    info!("axon runtime stopped");
    Ok(())
}
