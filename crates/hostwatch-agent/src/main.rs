use anyhow::Context;
use hostwatch_agent::config::{self, AgentConfig, CONFIG_FILE_NAME};
use hostwatch_agent::state::AgentContext;
use hostwatch_agent::{reporter, server};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("hostwatch=info".parse()?))
        .init();

    let config_path = config::config_path(CONFIG_FILE_NAME);
    let mut config = AgentConfig::load(&config_path);
    config.auto_detect();
    config.apply_env_overrides();
    if let Err(err) = config.save(&config_path) {
        tracing::warn!(path = %config_path.display(), error = %err,
            "could not persist configuration");
    }
    tracing::info!(
        agent_id = %config.agent_id,
        machine_name = %config.machine_name,
        server = %config.server_url,
        "hostwatch agent starting"
    );

    let bind_addr = format!(
        "{}:{}",
        config.command_server_host, config.command_server_port
    );
    let (shutdown_tx, _) = watch::channel(false);
    let ctx = AgentContext::new(config, config_path, shutdown_tx);

    // No command endpoint means no control surface: fail the bootstrap.
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("cannot bind command endpoint on {bind_addr}"))?;
    tracing::info!(addr = %bind_addr, "command endpoint listening");

    let client = reqwest::Client::new();
    register_agent(&ctx, &client).await;

    let sender = tokio::spawn(reporter::run_sender(
        Arc::clone(&ctx),
        client,
        ctx.shutdown_signal(),
    ));
    let sampler = tokio::spawn(reporter::run_sampler(
        Arc::clone(&ctx),
        ctx.shutdown_signal(),
    ));
    let endpoint = tokio::spawn(server::serve(
        Arc::clone(&ctx),
        listener,
        ctx.shutdown_signal(),
    ));

    let mut shutdown = ctx.shutdown_signal();
    tokio::select! {
        _ = signal::ctrl_c() => {
            tracing::info!("interrupt received, shutting down");
            ctx.request_shutdown();
        }
        _ = shutdown.changed() => {
            tracing::info!("stop requested, shutting down");
        }
    }

    // Reverse of startup: let the endpoint drain, then stop the loops.
    if let Ok(Err(err)) = endpoint.await {
        tracing::warn!(error = %err, "command endpoint exited with error");
    }
    let _ = sampler.await;
    let _ = sender.await;

    tracing::info!("hostwatch agent stopped");
    Ok(())
}

/// Best-effort: the collector also creates agent records on first metrics,
/// so a failure here never blocks startup.
async fn register_agent(ctx: &Arc<AgentContext>, client: &reqwest::Client) {
    let (agent_id, machine_name, server_url, timeout_ms) = {
        let config = ctx.config.lock().unwrap();
        (
            config.agent_id.clone(),
            config.machine_name.clone(),
            config.server_url.clone(),
            config.send_timeout_ms,
        )
    };

    let base = server_url.trim_end_matches('/');
    let base = base.strip_suffix("/metrics").unwrap_or(base);
    let url = format!("{base}/api/agents/{agent_id}/register");

    let (_, ips) = hostwatch_probe::inventory::addresses();
    let body = serde_json::json!({
        "agent_id": agent_id,
        "machine_name": machine_name,
        "machine_type": hostwatch_probe::inventory::machine_type(),
        "ip_address": ips.first().cloned().unwrap_or_default(),
    });

    match client
        .post(&url)
        .timeout(Duration::from_millis(timeout_ms.max(1)))
        .json(&body)
        .send()
        .await
    {
        Ok(response) if response.status().is_success() => {
            tracing::info!("agent registered with collector");
        }
        Ok(response) => {
            tracing::warn!(status = %response.status(), "agent registration rejected");
        }
        Err(err) => {
            tracing::warn!(error = %err, "agent registration failed");
        }
    }
}
