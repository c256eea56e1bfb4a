//! Demo binary for `amqp_robust`.
//!
//! Declares an exchange and a bound queue on the in-memory broker, then
//! simulates outages and prints the RPCs replayed by each recovery.

mod cli;

use std::{sync::Arc, time::Duration};

use amqp_robust::{
    RobustChannel,
    callbacks::sync_callback,
    config::ChannelConfig,
    memory::MemoryBroker,
    options::{ExchangeOptions, QosOptions, QueueOptions},
    recovery::{BackoffConfig, RestoreSupervisor},
    transport::{ExchangeKind, FieldTable},
};
use clap::Parser;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Applications embedding the library should install their own subscriber.
    tracing_subscriber::fmt::init();

    let cli = cli::Cli::parse();
    let mut config = ChannelConfig::default();
    if let Some(ms) = cli.rpc_timeout_ms {
        config = config.rpc_timeout(Duration::from_millis(ms));
    }

    let broker = Arc::new(MemoryBroker::new());
    let channel = RobustChannel::new(broker.clone(), config);
    channel
        .reopen_callbacks()
        .add(sync_callback(|owner: Option<Arc<RobustChannel>>, (): &()| {
            let number = owner.and_then(|channel| channel.number());
            log::info!("channel reopened: channel={number:?}");
        }))?;

    let shutdown = CancellationToken::new();
    let supervisor = RestoreSupervisor::new(BackoffConfig::default());
    let supervising = tokio::spawn({
        let channel = channel.clone();
        let shutdown = shutdown.clone();
        async move { supervisor.run(channel, shutdown).await }
    });

    channel
        .set_qos(QosOptions::default().prefetch_count(cli.prefetch))
        .await?;
    channel.open().await?;
    let exchange = channel
        .declare_exchange(
            &cli.exchange,
            ExchangeOptions::default().kind(ExchangeKind::Topic).durable(true),
        )
        .await?;
    let queue = channel
        .declare_queue(&cli.queue, QueueOptions::default().durable(true))
        .await?;
    queue
        .bind(exchange.name(), &cli.routing_key, FieldTable::new())
        .await?;
    for rpc in broker.take_journal() {
        println!("setup: {rpc}");
    }

    for cycle in 1..=cli.cycles {
        broker.disconnect();
        tokio::time::sleep(Duration::from_millis(cli.outage_ms)).await;
        broker.reconnect();
        channel.ready().await?;
        for rpc in broker.take_journal() {
            println!("cycle {cycle}: {rpc}");
        }
    }

    channel.close().await?;
    shutdown.cancel();
    supervising.await?;
    Ok(())
}
