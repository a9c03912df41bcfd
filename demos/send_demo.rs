//! Exercises a [`koc_tracing::Sender`] against a real collector: mints a
//! root trace-context, merges it with a second synthetic context, starts and
//! ends a span, then drains and stops.

use std::time::Duration;

use clap::Parser;
use koc_tracing::{merge, span, Cpid, RequestContext, Sender, TraceContext};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Manually exercise the sender against a collector.
#[derive(Parser)]
#[command(
    name = "send-demo",
    about = "Send a synthetic merge-log and span to a collector"
)]
struct Args {
    /// Collector gRPC address
    #[arg(long, default_value = "127.0.0.1:4317")]
    collector_addr: String,

    /// Dial timeout before giving up on the collector
    #[arg(long, default_value = "5")]
    setup_timeout_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "koc_tracing=debug,send_demo=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let (sender, mut setup) = Sender::init(
        args.collector_addr.clone(),
        Duration::from_secs(args.setup_timeout_secs),
    )?;

    tokio::spawn(async move {
        let _ = setup.changed().await;
        tracing::info!(state = ?*setup.borrow(), "sender setup resolved");
    });

    let root = merge::new_root_context("initial apply", "send-demo", &sender).await;
    tracing::info!(cpid = %root.cpid, "minted root trace context");

    let other = TraceContext {
        cpid: Cpid::generate(),
        anc_cpids: Vec::new(),
    };
    let merged =
        merge::merge_and_emit(&root, &[other], "merged two inputs", "send-demo", &sender).await?;
    tracing::info!(cpid = %merged.cpid, ancestors = ?merged.anc_cpids, "merged trace context");

    let ctx = RequestContext::new();
    let (_ctx, open_span) = span::start(
        &ctx,
        merged.cpid.clone(),
        "send-demo",
        "Demo",
        "demo-object",
        "reconciling demo object",
    );
    if let Some(open_span) = open_span {
        open_span.end(&sender).await;
    }

    sender.stop().await;
    tracing::info!("sender stopped");
    Ok(())
}
