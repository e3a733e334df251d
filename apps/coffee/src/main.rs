use std::{path::PathBuf, sync::Arc};

use alloy_primitives::Address;
use anyhow::Result;
use clap::Parser;
use client_core::{MissingWalletProvider, RpcWallet, SessionController, WalletProvider};
use tokio::io::{self, AsyncBufReadExt, BufReader};
use tokio_stream::{
    wrappers::{BroadcastStream, LinesStream},
    StreamExt,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use url::Url;

mod commands;
mod render;
mod settings;

use commands::{Command, HELP};
use settings::load_settings;

#[derive(Parser, Debug)]
#[command(name = "coffee", about = "Buy the author a coffee and read the memos left on chain")]
struct Args {
    /// Settings file; defaults to ./coffee.toml when present
    #[arg(long)]
    config: Option<PathBuf>,
    /// JSON-RPC endpoint of the wallet node
    #[arg(long)]
    rpc_url: Option<Url>,
    /// Address of the deployed tip-jar contract
    #[arg(long)]
    contract: Option<Address>,
    #[arg(long)]
    poll_interval_ms: Option<u64>,
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut settings = load_settings(args.config.as_deref())?;
    if let Some(rpc_url) = args.rpc_url {
        settings.rpc_url = Some(rpc_url);
    }
    if let Some(contract) = args.contract {
        settings.contract_address = contract;
    }
    if let Some(poll_interval_ms) = args.poll_interval_ms {
        settings.poll_interval_ms = poll_interval_ms;
    }
    if let Some(log_level) = args.log_level {
        settings.log_level = log_level;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let wallet: Arc<dyn WalletProvider> = match &settings.rpc_url {
        Some(url) => {
            info!("wallet: using json-rpc node at {url}");
            Arc::new(RpcWallet::new(url.clone()))
        }
        None => {
            warn!("wallet: no rpc_url configured; please configure a wallet provider");
            Arc::new(MissingWalletProvider)
        }
    };
    let controller = SessionController::new(wallet, settings.deployment());

    let mut events = BroadcastStream::new(controller.subscribe_events());
    let subscription = controller.start().await;

    println!("Buy Hachi a Tea! (contract {})", settings.contract_address);
    println!("{}", render::status_line(&controller.snapshot().await));
    println!("type `help` for commands");

    let mut lines = LinesStream::new(BufReader::new(io::stdin()).lines());
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            line = lines.next() => {
                let line = match line {
                    Some(Ok(line)) => line,
                    Some(Err(err)) => {
                        warn!("stdin read failed: {err}");
                        break;
                    }
                    None => break,
                };
                match line.parse::<Command>() {
                    Ok(Command::Quit) => break,
                    Ok(command) => dispatch(&controller, command).await,
                    Err(message) => println!("{message}"),
                }
            }
            Some(event) = events.next() => match event {
                Ok(event) => {
                    let connection = controller.connection().await;
                    if let Some(line) = render::event_line(&event, &connection) {
                        println!("{line}");
                    }
                }
                Err(err) => warn!("ui event stream lagged: {err}"),
            },
            _ = &mut ctrl_c => break,
        }
    }

    subscription.close().await;
    Ok(())
}

/// Draft edits and local views run inline; remote calls are spawned so the
/// prompt stays responsive while a transaction is mined.
async fn dispatch(controller: &Arc<SessionController>, command: Command) {
    match command {
        Command::Name(name) => controller.set_draft_name(name).await,
        Command::Message(message) => controller.set_draft_message(message).await,
        Command::Memos => {
            for line in render::memo_list(&controller.snapshot().await) {
                println!("{line}");
            }
        }
        Command::Status => println!("{}", render::status_line(&controller.snapshot().await)),
        Command::Help => println!("{HELP}"),
        Command::Connect => spawn_remote(controller, |c| async move {
            let _ = c.request_connection().await;
        }),
        Command::Buy => spawn_remote(controller, |c| async move {
            let _ = c.submit_payment().await;
        }),
        Command::Refresh => spawn_remote(controller, |c| async move {
            let _ = c.refresh_memo_log().await;
        }),
        Command::Withdraw => spawn_remote(controller, |c| async move {
            let _ = c.withdraw_all().await;
        }),
        Command::Quit => {}
    }
}

// Failures are reported through `SessionEvent::OperationFailed`.
fn spawn_remote<F, Fut>(controller: &Arc<SessionController>, op: F)
where
    F: FnOnce(Arc<SessionController>) -> Fut,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    tokio::spawn(op(Arc::clone(controller)));
}
