//! Entry point: load configuration, init logging, bind the listener, run
//! until shutdown, persist state, exit.

use std::process::ExitCode;
use std::sync::Arc;

use chatd::config::Config;
use chatd::network::Gateway;
use chatd::state::Switchboard;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = match Config::resolve_path_from_args(std::env::args().skip(1)) {
        Some(path) => match Config::load(path.as_ref()) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!(path = %path, error = %e, "failed to load config");
                return ExitCode::FAILURE;
            }
        },
        None => Config::default(),
    };

    let switchboard = Switchboard::new(&config);

    let gateway = match Gateway::bind(&config) {
        Ok(gateway) => gateway,
        Err(e) => {
            tracing::error!(error = %e, "fatal startup failure");
            return ExitCode::FAILURE;
        }
    };

    spawn_signal_watcher(switchboard.clone());

    gateway.run(switchboard).await;

    ExitCode::SUCCESS
}

/// Watch for SIGINT/SIGTERM (or platform equivalent) and request shutdown
/// the same way an ADMIN-issued `@shutdown` does.
fn spawn_signal_watcher(switchboard: Arc<Switchboard>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("received interrupt signal");
            switchboard.request_shutdown();
        }
    });
}
