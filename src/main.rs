// datafan - command line entry point
//
//   datafan serve --id M1 --listen 127.0.0.1:41120 --peers 127.0.0.1:41121
//   datafan demo

use clap::{Args, Parser, Subcommand};
use datafan::model::Record;
use datafan::sim::run_demo;
use datafan::storage::{MapStore, SledStore, Store};
use datafan::sync::{Engine, EngineConfig, Member, Shutdown};
use datafan::transport::{ConnectorConfig, TcpConnector, TcpConnectorConfig};
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

type CliResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

#[derive(Parser, Debug)]
#[command(name = "datafan", version, about = "Anti-entropy gossip sync between data owners")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one networked member until interrupted
    Serve(ServeArgs),
    /// Run three in-process members through a scripted scenario
    Demo(DemoArgs),
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Identity of this member
    #[arg(long)]
    id: String,

    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0:41120")]
    listen: String,

    /// Address peers should dial; required when listening on 0.0.0.0 or [::]
    #[arg(long)]
    advertise: Option<String>,

    /// Comma separated addresses of peers to connect to
    #[arg(long, value_delimiter = ',')]
    peers: Vec<String>,

    #[arg(long, default_value_t = 1000)]
    sync_period_ms: u64,

    /// Persist items in a sled database at this path
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Seed an item owned by this member, as key=value (repeatable)
    #[arg(long = "put", value_parser = parse_key_value)]
    puts: Vec<(String, String)>,
}

#[derive(Args, Debug)]
struct DemoArgs {
    #[arg(long, default_value_t = 20)]
    sync_period_ms: u64,

    /// Give up on a step after this many seconds
    #[arg(long, default_value_t = 10)]
    step_timeout_secs: u64,
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got {:?}", s)),
    }
}

#[tokio::main]
async fn main() -> CliResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match Cli::parse().command {
        Command::Serve(args) => serve(args).await,
        Command::Demo(args) => demo(args).await,
    }
}

async fn serve(args: ServeArgs) -> CliResult<()> {
    let sled = match &args.data_dir {
        Some(path) => Some(Arc::new(SledStore::<Record>::open(path)?)),
        None => None,
    };
    let store: Arc<dyn Store<Record>> = match &sled {
        Some(sled) => Arc::clone(sled) as Arc<dyn Store<Record>>,
        None => Arc::new(MapStore::<Record>::new()),
    };
    let member = Member::new(args.id.as_str(), store);

    for (key, value) in &args.puts {
        member.write_value(key.as_str(), value.as_str())?;
    }

    let mut tcp_config = TcpConnectorConfig::new()
        .with_base_config(ConnectorConfig::default())
        .with_listen_address(&args.listen);
    if let Some(advertise) = &args.advertise {
        tcp_config = tcp_config.with_advertise_address(advertise);
    }
    let connector = TcpConnector::bind(member, tcp_config).await?;
    info!(id = %args.id, advertise = %connector.info().address, "member ready");

    let engine_config = EngineConfig::new().with_sync_period(Duration::from_millis(args.sync_period_ms));
    let engine = Arc::new(Engine::new(connector, engine_config)?);

    let shutdown = Shutdown::new();
    let running = tokio::spawn(Arc::clone(&engine).run(shutdown.signal()));

    for peer in args.peers.iter().filter(|p| !p.is_empty()) {
        match engine.add_member(peer.clone()).await {
            Ok(()) => info!(peer = %peer, "connected"),
            Err(e) => warn!(peer = %peer, error = %e, "could not connect"),
        }
    }

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    shutdown.trigger();
    running.await??;

    if let Some(sled) = sled {
        sled.flush()?;
    }
    Ok(())
}

async fn demo(args: DemoArgs) -> CliResult<()> {
    let config = EngineConfig::new().with_sync_period(Duration::from_millis(args.sync_period_ms));
    let converged = run_demo(config, Duration::from_secs(args.step_timeout_secs)).await?;
    if !converged {
        return Err("demo did not converge in time".into());
    }
    info!("demo converged");
    Ok(())
}
