use clap::{Parser, Subcommand};
use parley_core::actions::ActionRegistry;
use parley_core::channels::ConsoleChannel;
use parley_core::runtime::Runtime;
use parley_core::workflow::RunStatus;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(name = "parley")]
#[command(about = "Parley CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Run the gateway (web widget endpoints over HTTP + WebSocket).
    Gateway {
        /// Config file path (default: PARLEY_CONFIG_PATH or ~/.parley/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// HTTP and WebSocket port (default from config or 15160)
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Talk to the configured flows from this terminal.
    ///
    /// Lines are sent as text. `/postback <payload>`, `/location <lat>,<lon>` and
    /// `/file <path>` send the other message kinds.
    Chat {
        /// Config file path (default: PARLEY_CONFIG_PATH or ~/.parley/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },

    /// Print the registered actions and their schemas as JSON.
    Actions,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("parley {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Gateway { config, port }) => {
            if let Err(e) = run_gateway(config, port).await {
                log::error!("gateway failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Chat { config }) => {
            if let Err(e) = run_chat(config).await {
                log::error!("chat failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Actions) => {
            if let Err(e) = list_actions() {
                log::error!("actions failed: {}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

async fn run_gateway(
    config_path: Option<std::path::PathBuf>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let (mut config, path) = parley_core::config::load_config(config_path)?;
    if let Some(p) = port {
        config.gateway.port = p;
    }
    log::info!("starting gateway on {}:{}", config.gateway.bind, config.gateway.port);
    parley_core::gateway::run_gateway(config, path).await
}

async fn run_chat(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let (config, path) = parley_core::config::load_config(config_path)?;
    let runtime = Runtime::start(config, path).await?;

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    let console = ConsoleChannel::new(out_tx);
    runtime.channels.register(console.clone()).await;
    let printer = tokio::spawn(async move {
        while let Some(text) = out_rx.recv().await {
            println!("< {}", text.replace('\n', "\n  "));
        }
    });

    let subscriber = console
        .get_or_create_session(runtime.subscribers.as_ref())
        .await?;
    println!("chatting as {} (Ctrl+D to quit)", subscriber.first_name);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let event = match console.wrap_line(&line, subscriber.clone()) {
            Ok(Some(event)) => event,
            Ok(None) => continue,
            Err(e) => {
                eprintln!("{}", e);
                continue;
            }
        };
        match runtime.runner.handle_event(event).await {
            Ok(RunStatus::Finished) => log::debug!("flow finished"),
            Ok(status) => log::debug!("run status: {:?}", status),
            Err(e) => eprintln!("error: {}", e),
        }
    }

    drop(console);
    drop(runtime);
    printer.abort();
    Ok(())
}

fn list_actions() -> anyhow::Result<()> {
    let registry = ActionRegistry::with_messaging_actions();
    let actions: Vec<serde_json::Value> = registry
        .list()
        .map(|meta| {
            serde_json::json!({
                "name": meta.name,
                "description": meta.description,
                "inputSchema": meta.input_schema.describe(),
                "outputSchema": meta.output_schema.describe(),
            })
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&actions)?);
    Ok(())
}
