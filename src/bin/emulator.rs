use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use anyhow::{Result, bail};
use fsm_netem::bus::{BusBackend, MemoryBroker};
use fsm_netem::config::{delay_until_time_of_day, load_dir};
use fsm_netem::emulation::Emulation;
use fsm_netem::trace::{CAT_PACKET_RCV, CAT_PACKET_SND, CAT_STATE};
use tokio::time::Instant;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let scenario_dir = std::env::var("SCENARIO_DIR").unwrap_or_else(|_| "scenarios".to_string());
    // START_AT (UTC HH:MM:SS) takes precedence over START_DELAY_SECS.
    let start_delay = match std::env::var("START_AT") {
        Ok(target) => delay_until_time_of_day(&target, SystemTime::now())?,
        Err(_) => Duration::from_secs(
            std::env::var("START_DELAY_SECS")
                .ok()
                .map(|value| value.parse::<u64>())
                .transpose()?
                .unwrap_or(0),
        ),
    };
    let relay_url = std::env::var("RELAY_URL").ok();
    let backend = match std::env::var("BUS_BACKEND").as_deref() {
        Ok("memory") => BusBackend::Memory(MemoryBroker::new()),
        Ok("relay") | Err(_) => BusBackend::Relay,
        Ok(other) => bail!("unknown BUS_BACKEND '{other}' (expected 'relay' or 'memory')"),
    };

    let mut configs = load_dir(&PathBuf::from(&scenario_dir))?;
    if let Some(url) = &relay_url {
        for config in &mut configs {
            config.bus.address = url.clone();
        }
    }
    info!(
        scenarios = %scenario_dir,
        components = configs.len(),
        start_delay = ?start_delay,
        backend = ?backend,
        "Launching emulation"
    );

    let start_at = Instant::now() + start_delay;
    let emulation = Emulation::launch(configs, backend, start_at).await?;

    tokio::signal::ctrl_c().await?;

    let trace = std::sync::Arc::clone(emulation.trace());
    emulation.shutdown().await;

    info!(
        records = trace.len(),
        state_spans = trace.with_category(CAT_STATE).len(),
        packets_sent = trace.with_category(CAT_PACKET_SND).len(),
        packets_received = trace.with_category(CAT_PACKET_RCV).len(),
        "Trace summary"
    );
    Ok(())
}
