//! Command line interface for the recovery demo binary.
//!
//! Shared with the build script, which renders the man page from it.

use clap::Parser;

/// Command line arguments for the `amqp-robust-demo` binary.
#[derive(Debug, Parser)]
#[command(
    name = "amqp-robust-demo",
    version,
    about = "Declare entities on an in-memory broker and watch them survive outages"
)]
pub struct Cli {
    /// Exchange to declare.
    #[arg(short, long, default_value = "events")]
    pub exchange: String,
    /// Queue to declare and bind to the exchange.
    #[arg(short, long, default_value = "audit")]
    pub queue: String,
    /// Routing key of the binding.
    #[arg(long, default_value = "#")]
    pub routing_key: String,
    /// Prefetch count applied before the channel opens.
    #[arg(short, long, default_value_t = 10)]
    pub prefetch: u16,
    /// Number of outage/recovery cycles to simulate.
    #[arg(short, long, default_value_t = 2)]
    pub cycles: u32,
    /// How long each simulated outage lasts, in milliseconds.
    #[arg(long, default_value_t = 50)]
    pub outage_ms: u64,
    /// Per-RPC timeout in milliseconds.
    #[arg(long)]
    pub rpc_timeout_ms: Option<u64>,
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::Cli;

    #[test]
    fn defaults_describe_a_small_topology() {
        let cli = Cli::parse_from(["amqp-robust-demo"]);
        assert_eq!(cli.exchange, "events");
        assert_eq!(cli.queue, "audit");
        assert_eq!(cli.cycles, 2);
        assert_eq!(cli.rpc_timeout_ms, None);
    }

    #[test]
    fn parses_cycle_and_timeout_options() {
        let cli = Cli::parse_from([
            "amqp-robust-demo",
            "--cycles",
            "5",
            "--rpc-timeout-ms",
            "250",
            "-q",
            "orders",
        ]);
        assert_eq!(cli.cycles, 5);
        assert_eq!(cli.rpc_timeout_ms, Some(250));
        assert_eq!(cli.queue, "orders");
    }
}
