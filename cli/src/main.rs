//! `orchestratord`: process entry point for the autonomous agent
//! orchestrator (§9 "Global singletons" redesign — leaf-first explicit
//! wiring lives in `cli::lib`, this binary only sequences it).
//!
//! Startup order mirrors §9: state store -> memory client -> tool executor
//! -> scheduler -> MCP registry -> agent engine -> MCP/HTTP server -> Nexus
//! trigger registry hydration -> background loops. Shuts down on
//! SIGINT/SIGTERM via `serve::serve_until_shutdown`'s graceful shutdown.

use std::sync::Arc;

use clap::Parser;

use cli::{
    apply_timezone, build_agent_engine, build_context, build_llm_client, build_pipeline,
    load_persisted_triggers, persist_admin_password, register_persisted_mcp_servers,
    seed_builtin_tasks, spawn_ingestion_loop, DaemonConfig, DEFAULT_INGEST_POLL_INTERVAL,
};
use serve::ServeConfig;

/// CLI overrides layered on top of `DaemonConfig::from_env` (§6 "Environment
/// knobs"); any flag left unset keeps the env/default value.
#[derive(Parser, Debug)]
#[command(name = "orchestratord")]
#[command(about = "Autonomous agent orchestrator daemon")]
struct Args {
    /// Override `ORCHESTRATOR_BIND` (host:port the HTTP/SSE surface binds to).
    #[arg(long, value_name = "ADDR")]
    bind: Option<String>,

    /// Override `ORCHESTRATOR_DB` (sqlite state-store path).
    #[arg(long, value_name = "PATH")]
    db: Option<std::path::PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    config::load_and_apply("orchestratord", None::<&std::path::Path>).ok();
    cli::logging::init();

    let args = Args::parse();
    let mut daemon_cfg = DaemonConfig::from_env();
    if let Some(bind) = args.bind {
        daemon_cfg.bind_addr = bind;
    }
    if let Some(db) = args.db {
        daemon_cfg.db_path = db;
    }

    apply_timezone(&daemon_cfg);

    let ctx = build_context(&daemon_cfg)?;

    persist_admin_password(&ctx.state_store, &daemon_cfg).await;

    if let Err(e) = register_persisted_mcp_servers(&ctx).await {
        tracing::warn!(error = %e, "failed to hydrate persisted mcp_server rows");
    }

    let llm = build_llm_client(&daemon_cfg);
    let agent = build_agent_engine(&ctx, llm.clone());

    let (router, nexus) = serve::build(
        ctx.clone(),
        agent.clone(),
        llm.clone(),
        ServeConfig {
            mcp_auth_token: daemon_cfg.mcp_auth_token.clone(),
            ..ServeConfig::default()
        },
    );

    load_persisted_triggers(&ctx.state_store, nexus.triggers()).await;

    seed_builtin_tasks(&ctx.scheduler, ctx.memory.clone(), Arc::new(orchestrator_core::scheduler::FixedTempo(orchestrator_core::scheduler::Tempo::Alert))).await;

    let pipeline = Arc::new(build_pipeline(&daemon_cfg, ctx.memory.clone()));
    let _ingestion_handle = spawn_ingestion_loop(pipeline, DEFAULT_INGEST_POLL_INTERVAL);

    tracing::info!(bind = %daemon_cfg.bind_addr, "orchestratord starting");
    let listener = tokio::net::TcpListener::bind(&daemon_cfg.bind_addr).await?;
    serve::serve_until_shutdown(listener, router).await?;

    tracing::info!("orchestratord stopped");
    Ok(())
}
