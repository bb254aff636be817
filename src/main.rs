use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use tqserver::configuration::load_configuration::discover;
use tqserver::core::command_line_args::{cmd_get_config_path, cmd_get_operation_mode};
use tqserver::core::operation_mode::load_operation_mode;
use tqserver::core::os_signal::start_os_signal_handling;
use tqserver::http::listener;
use tqserver::http::router::ServerState;
use tqserver::logging::syslog::{error, info};
use tqserver::network::port_manager::init_port_manager;
use tqserver::registry::registry::Registry;
use tqserver::reload::broadcaster::Broadcaster;
use tqserver::supervisor::supervisor::Supervisor;

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    println!("TQServer");

    let operation_mode = load_operation_mode(cmd_get_operation_mode());
    let config_path = cmd_get_config_path();

    start_os_signal_handling();

    let (server_config, worker_configs) = match discover(&config_path) {
        Ok(result) => result,
        Err(e) => {
            error(format!("failed to load configuration from {}: {}", config_path.display(), e));
            std::process::exit(1);
        }
    };

    let port_manager = init_port_manager(server_config.port_range_start, server_config.port_range_end);
    let registry = Arc::new(Registry::new());
    let reload = Broadcaster::new();
    let shutting_down = Arc::new(AtomicBool::new(false));

    let server_root = config_path.parent().map(|p| p.to_path_buf()).unwrap_or_else(|| std::path::PathBuf::from("."));
    let workers_dir = std::path::PathBuf::from(&server_config.workers_dir);
    let listen_addr = server_config.listen.clone();

    let supervisor = Supervisor::new(workers_dir, config_path, server_config, operation_mode, registry.clone(), reload.clone(), port_manager, shutting_down.clone());
    tokio::spawn(supervisor.run(worker_configs));

    let state = Arc::new(ServerState { registry, server_root, mode: operation_mode, reload, shutting_down });

    info(format!("TQServer ({}) listening on {}", if operation_mode.is_dev() { "dev" } else { "prod" }, listen_addr));

    if let Err(e) = listener::serve(&listen_addr, state).await {
        error(format!("listener exited with error: {}", e));
        std::process::exit(1);
    }
}
