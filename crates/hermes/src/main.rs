use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use hermesconf::HermesConfig;
use hermesproto::{zmq_version, BarrierHost, StreamDescriptor};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use hermes::device::{DeviceAdapter, SyntheticDevice};
use hermes::node::{Consumer, LogRenderer, NodeContext, Producer, RenderPoller};
use hermes::stream::experiment::activity_descriptor;
use hermes::{telemetry, EventOutcome, ExperimentController, UiEvent};

/// Distributed sensor recording node
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Config file, loaded after the system and user files
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a producer over the synthetic device
    Producer {
        #[command(flatten)]
        device: SyntheticArgs,

        /// Stop capturing after this many samples
        #[arg(long)]
        samples: Option<u64>,

        /// Log the local Stream every N milliseconds
        #[arg(long)]
        render_ms: Option<u64>,
    },

    /// Mirror producer feeds into a local replica
    Consumer {
        #[command(flatten)]
        device: SyntheticArgs,

        /// Data-plane endpoint to subscribe to (repeatable)
        #[arg(long = "feed")]
        feeds: Vec<String>,

        /// Also mirror experiment/activity
        #[arg(long)]
        activity: bool,

        /// Log the replica every N milliseconds
        #[arg(long, default_value = "1000")]
        render_ms: u64,
    },

    /// Run the experiment controller; reads `mark <label>`, `toggle <peer>`
    /// and `stop` from stdin
    Controller,

    /// Host the sync barrier
    Barrier {
        /// Override session.sync.quorum
        #[arg(long)]
        quorum: Option<usize>,
    },

    /// Print the effective configuration
    Config,
}

#[derive(Args, Debug)]
struct SyntheticArgs {
    /// Device name, also the data-plane topic
    #[arg(long, default_value = "synthetic")]
    device_name: String,

    /// Sampling rate in Hz
    #[arg(long, default_value = "50")]
    rate: f64,

    /// Channels in the signal stream
    #[arg(long, default_value = "1")]
    channels: usize,
}

impl SyntheticArgs {
    fn device(&self) -> SyntheticDevice {
        SyntheticDevice::new(&self.device_name, self.rate, self.channels)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = HermesConfig::load_from(cli.config.as_deref()).context("Failed to load config")?;

    if let Command::Config = cli.command {
        print!("{}", config.to_toml());
        return Ok(());
    }

    telemetry::init(&config.infra.telemetry.log_level).context("Failed to initialize logging")?;
    tracing::info!("hermes node {:?}, libzmq {}", config.session.node_name, zmq_version());

    let ctx = NodeContext::new(config);
    spawn_signal_handler(ctx.shutdown.clone());

    match cli.command {
        Command::Producer {
            device,
            samples,
            render_ms,
        } => run_producer(ctx, device, samples, render_ms).await,
        Command::Consumer {
            device,
            feeds,
            activity,
            render_ms,
        } => run_consumer(ctx, device, feeds, activity, render_ms).await,
        Command::Controller => run_controller(ctx).await,
        Command::Barrier { quorum } => run_barrier(ctx, quorum).await,
        Command::Config => Ok(()),
    }
}

async fn run_producer(
    ctx: NodeContext,
    args: SyntheticArgs,
    samples: Option<u64>,
    render_ms: Option<u64>,
) -> Result<()> {
    let device = match samples {
        Some(n) => args.device().with_limit(n),
        None => args.device(),
    };
    let producer = Producer::new(ctx.clone(), device);

    let render = render_ms.map(|ms| {
        RenderPoller::new(Duration::from_millis(ms), LogRenderer::new())
            .spawn(producer.reader(), ctx.shutdown.child_token())
    });

    let result = producer.run().await;
    if let Some(task) = render {
        task.abort();
    }

    let report = result.context("Producer failed")?;
    println!("{}", serde_json::to_string(&report)?);
    Ok(())
}

async fn run_consumer(
    ctx: NodeContext,
    args: SyntheticArgs,
    feeds: Vec<String>,
    activity: bool,
    render_ms: u64,
) -> Result<()> {
    let mut descriptors: Vec<StreamDescriptor> = args.device().descriptors();
    if activity {
        descriptors.push(activity_descriptor(&ctx.config.session.activities));
    }

    let mut consumer = Consumer::new(ctx, descriptors).with_poller(RenderPoller::new(
        Duration::from_millis(render_ms),
        LogRenderer::new(),
    ));
    if !feeds.is_empty() {
        consumer = consumer.with_feeds(feeds);
    }

    let report = consumer.run().await.context("Consumer failed")?;
    println!("{}", serde_json::to_string(&report)?);
    Ok(())
}

async fn run_controller(ctx: NodeContext) -> Result<()> {
    if ctx.config.session.activities.is_empty() {
        bail!("session.activities is empty; nothing to mark");
    }

    let shutdown = ctx.shutdown.clone();
    let (handle, node) = ExperimentController::new(ctx).start();
    println!(
        "activities: {}; peers: {}",
        handle.activities().join(", "),
        handle.peers().collect::<Vec<_>>().join(", ")
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => break,
            line = lines.next_line() => line.context("Failed to read stdin")?,
        };
        let Some(line) = line else {
            break;
        };

        let event = match parse_command(&line) {
            Some(event) => event,
            None => {
                println!("commands: mark <label> | toggle <peer> | stop");
                continue;
            }
        };
        let stopping = event == UiEvent::StopExperiment;

        match handle.handle_event(event).await {
            Ok(EventOutcome::Marked { label, time_s }) => println!("{} at {:.6}", label, time_s),
            Ok(EventOutcome::Toggled { peer, state }) => println!("{} -> {}", peer, state),
            Ok(EventOutcome::Stopped(report)) => println!("{}", serde_json::to_string(&report)?),
            Err(e) => println!("error: {}", e),
        }
        if stopping {
            break;
        }
    }

    shutdown.cancel();
    let report = node
        .await
        .context("Controller task panicked")?
        .context("Controller node failed")?;
    println!("{}", serde_json::to_string(&report)?);
    Ok(())
}

fn parse_command(line: &str) -> Option<UiEvent> {
    let mut parts = line.split_whitespace();
    let event = match (parts.next()?, parts.next()) {
        ("mark", Some(label)) => UiEvent::MarkActivity(label.to_string()),
        ("toggle", Some(peer)) => UiEvent::TogglePause(peer.to_string()),
        ("stop", None) => UiEvent::StopExperiment,
        _ => return None,
    };
    Some(event)
}

async fn run_barrier(ctx: NodeContext, quorum: Option<usize>) -> Result<()> {
    let sync = &ctx.config.session.sync;
    let host = BarrierHost::new(
        ctx.config.infra.network.sync_endpoint(),
        quorum.unwrap_or(sync.quorum),
        sync.timeout(),
    );

    let report = tokio::select! {
        _ = ctx.shutdown.cancelled() => {
            tracing::warn!("barrier interrupted before quorum");
            return Ok(());
        }
        result = host.serve(&ctx.zmq) => result.context("Sync barrier failed")?,
    };
    tracing::info!("released {:?}", report.released);
    Ok(())
}

fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Received SIGINT (Ctrl+C), shutting down gracefully...");
                shutdown.cancel();
            }
            Err(e) => tracing::warn!("Failed to listen for SIGINT: {}", e),
        }
    });
}
