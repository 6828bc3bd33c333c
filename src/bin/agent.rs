use std::time::Instant;

use anyhow::Result;
use serde_json::json;

use narsbridge::agent::{AgentChannel, AgentConfig, NullReasoner};
use narsbridge::babbling::BabblingSelector;
use narsbridge::config::Config;
use narsbridge::logging::{log, log_session_summary, obj, v_num, v_str, Domain, Level};
use narsbridge::operations::OperationRegistry;
use narsbridge::transport::Transport;

#[tokio::main]
async fn main() -> Result<()> {
    let started = Instant::now();
    let cfg = Config::from_env();
    log(
        Level::Info,
        Domain::System,
        "startup",
        obj(&[
            ("agent_addr", v_str(&cfg.agent_addr.to_string())),
            ("env_addr", v_str(&cfg.env_addr.to_string())),
            ("babble_budget", json!(cfg.babble_budget)),
            ("babble_chance", v_num(cfg.babble_chance)),
        ]),
    );

    let transport = Transport::bind(cfg.agent_addr).await?;
    let registry = OperationRegistry::standard(cfg.env_addr);
    let babbling = BabblingSelector::new(cfg.babble_budget, cfg.babble_chance, cfg.babble_seed);
    let mut channel = AgentChannel::new(
        transport,
        registry,
        NullReasoner,
        babbling,
        AgentConfig::from_config(&cfg),
    );

    let result = channel.run().await;
    let stats = channel.stats();
    log_session_summary(
        "agent",
        started.elapsed().as_secs_f64(),
        &[
            ("cycles", json!(stats.cycles)),
            ("derived", json!(stats.derived)),
            ("babbled", json!(stats.babbled)),
            ("idle", json!(stats.idle)),
            ("skipped", json!(stats.skipped)),
            ("dropped_actions", json!(stats.dropped_actions)),
            ("babble_remaining", json!(channel.babbling().remaining())),
        ],
    );
    result?;
    Ok(())
}
