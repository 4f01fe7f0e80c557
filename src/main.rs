use std::sync::Arc;

use anyhow::bail;
use fabrikd::{init_logging, Config, Daemon, DeviceFamily, DeviceLink, SimConfig, SimLink};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging()?;
    tracing::info!(
        version = fabrikd::VERSION,
        built = fabrikd::BUILD_DATE,
        "fabrikd starting"
    );

    let config = Config::load()?;
    let family = config.device_family()?;
    let link: Arc<dyn DeviceLink> = match family {
        DeviceFamily::Sim => Arc::new(SimLink::new(SimConfig::default())),
        other => bail!(
            "device family '{other}' requires an external transport bridge, \
             which this build does not bundle"
        ),
    };

    let daemon = Daemon::new(link, config.daemon_config());

    // First interrupt asks for an orderly stop; the loops observe the flag
    // at their next tick boundary
    let shutdown = daemon.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, shutting down");
            shutdown.send_replace(true);
        }
    });

    daemon.run().await?;
    Ok(())
}
