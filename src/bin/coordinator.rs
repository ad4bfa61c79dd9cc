//! END coordinator process.
//!
//! Reads its settings from the environment (see `drainweave::config`),
//! restores barrier state from the transaction log, then consumes END frames
//! until SIGINT or SIGTERM.

use drainweave::config::ProcessConfig;
use drainweave::coordinator::CoordinatorController;
use drainweave::error::CoordinatorError;
use drainweave::logging;
use drainweave::transport::TcpTransport;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> ExitCode {
  let config = match ProcessConfig::from_env() {
    Ok(config) => config,
    Err(e) => {
      eprintln!("coordinator: {e}");
      return ExitCode::FAILURE;
    }
  };
  if let Err(e) = logging::init(config.log_level) {
    eprintln!("coordinator: {e}");
    return ExitCode::FAILURE;
  }

  match run(config).await {
    Ok(()) => {
      info!("coordinator stopped");
      ExitCode::SUCCESS
    }
    Err(e) => {
      error!(error = %e, corruption = e.is_corruption(), "coordinator failed");
      ExitCode::FAILURE
    }
  }
}

async fn run(config: ProcessConfig) -> Result<(), CoordinatorError> {
  let transport = TcpTransport::bind(config.tcp).await?;
  let mut controller = CoordinatorController::recover(config.coordinator, transport)?;

  let cancel = CancellationToken::new();
  tokio::spawn(watch_signals(cancel.clone()));

  let result = controller.run(cancel).await;
  if let Err(e) = controller.close().await {
    warn!(error = %e, "failed to close transport");
  }
  result
}

async fn watch_signals(cancel: CancellationToken) {
  #[cfg(unix)]
  {
    use tokio::signal::unix::{SignalKind, signal};
    match signal(SignalKind::terminate()) {
      Ok(mut sigterm) => {
        tokio::select! {
          _ = tokio::signal::ctrl_c() => info!("received SIGINT"),
          _ = sigterm.recv() => info!("received SIGTERM"),
        }
      }
      Err(e) => {
        warn!(error = %e, "couldn't install SIGTERM handler, listening for SIGINT only");
        let _ = tokio::signal::ctrl_c().await;
        info!("received SIGINT");
      }
    }
  }
  #[cfg(not(unix))]
  {
    let _ = tokio::signal::ctrl_c().await;
    info!("received interrupt");
  }
  cancel.cancel();
}
