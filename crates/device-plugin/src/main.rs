use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use device_plugin::config::Cli;
use device_plugin::config::Commands;
use device_plugin::config::ListDevicesArgs;
use device_plugin::config::ServeArgs;
use device_plugin::device::DeviceInventory;
use device_plugin::device::DeviceSnapshot;
use device_plugin::plugin::PluginConfig;
use device_plugin::plugin::PluginServer;
use device_plugin::supervisor::Supervisor;
use device_plugin::supervisor::SupervisorConfig;
use device_plugin::watchers;
use tokio::sync::mpsc;
use utils::version;

/// Sets up global panic hooks.
fn setup_global_hooks() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        default_hook(panic_info);
        tracing::error!("Thread panicked: {}", panic_info);
    }));
}

/// Flattens an error report, keeping its context chain and attachments.
fn into_anyhow<C>(report: error_stack::Report<C>) -> anyhow::Error {
    anyhow::anyhow!("{report:?}")
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_global_hooks();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve(serve_args) => run_serve(*serve_args).await,
        Commands::ListDevices(list_args) => run_list_devices(list_args),
    }
}

async fn run_serve(args: ServeArgs) -> Result<()> {
    let _guard =
        utils::logging::init(args.log_path.as_deref()).context("initialize logging failed")?;

    tracing::info!(
        "Starting Habana device plugin {} for {}",
        &**version::VERSION,
        args.backend.dev_type
    );

    // Owns the HLML session until the supervisor returns
    let backend = args.backend.build().map_err(into_anyhow)?;

    let plugin_config = PluginConfig::from(&args);
    let supervisor_config = SupervisorConfig::from(&args);

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let _fs_watcher = watchers::watch_kubelet_socket(
        &args.device_plugin_path,
        &plugin_config.kubelet_socket,
        events_tx.clone(),
    )
    .map_err(into_anyhow)?;
    let _signals = watchers::spawn_signal_watcher(events_tx).map_err(into_anyhow)?;

    let server = PluginServer::new(plugin_config, backend);
    let mut supervisor = Supervisor::new(server, supervisor_config);
    supervisor.run(events_rx).await.map_err(into_anyhow)?;

    tracing::info!("Habana device plugin stopped");
    Ok(())
}

fn run_list_devices(args: ListDevicesArgs) -> Result<()> {
    let _guard = utils::logging::init(None).context("initialize logging failed")?;

    let backend = args.backend.build().map_err(into_anyhow)?;
    let snapshot = DeviceSnapshot::new(backend.enumerate().map_err(into_anyhow)?);

    let json = if args.pretty {
        serde_json::to_string_pretty(&snapshot)
    } else {
        serde_json::to_string(&snapshot)
    }
    .context("serialize devices failed")?;
    println!("{json}");
    Ok(())
}
