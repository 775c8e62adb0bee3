use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use cnpj_messaging::bus::{global, BrokerService, KafkaBroker};
use cnpj_messaging::cnpj::{self, LoggingSink};
use cnpj_messaging::{telemetry, BrokerSettings, ConsumerHost};

const SHUTDOWN_BUDGET: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    telemetry::init();
    let settings = BrokerSettings::load()?;

    let broker = KafkaBroker::new(&settings)?;
    let registrations = cnpj::registrations(&settings, Arc::new(LoggingSink))?;
    global::configure(Arc::new(BrokerService::new(Arc::new(broker), settings)))?;

    let host = ConsumerHost::from_global()?
        .with_registrations(registrations)
        .start()?;
    info!(consumers = host.len(), "cnpj consumer running; press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");

    let report = host.stop(SHUTDOWN_BUDGET).await;
    for stuck in report.timed_out() {
        warn!(topic = %stuck.topic, group = %stuck.group, "consumer still running at exit");
    }
    Ok(())
}
