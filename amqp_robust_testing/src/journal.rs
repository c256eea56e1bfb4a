//! Assertions over a [`MemoryBroker`](amqp_robust::memory::MemoryBroker)
//! journal.

use std::sync::Arc;

use amqp_robust::{
    ChannelState,
    RobustChannel,
    config::ChannelConfig,
    memory::{MemoryBroker, Method, Rpc, RpcKind},
};
use rstest::fixture;

/// A broker and a closed channel bound to it.
pub struct Session {
    pub broker: Arc<MemoryBroker>,
    pub channel: Arc<RobustChannel>,
}

impl Session {
    /// Create a session whose channel uses `config`.
    #[must_use]
    pub fn with_config(config: ChannelConfig) -> Self {
        let broker = Arc::new(MemoryBroker::new());
        let channel = RobustChannel::new(broker.clone(), config);
        Self { broker, channel }
    }

    /// Simulate an outage and its end.
    ///
    /// Waits for the channel to notice the loss before reconnecting, so a
    /// following `ready()` cannot slip through ahead of the restore.
    pub async fn bounce(&self) {
        self.broker.disconnect();
        wait_for_state(&self.channel, ChannelState::Restoring).await;
        self.broker.reconnect();
    }
}

/// Suspend until `channel` enters `state`.
///
/// # Panics
/// Panics if the channel's state sender is gone, which cannot happen while
/// `channel` is borrowed.
pub async fn wait_for_state(channel: &RobustChannel, state: ChannelState) {
    let mut states = channel.state_changes();
    states
        .wait_for(|current| *current == state)
        .await
        .expect("state sender lives in the channel");
}

/// Session with default configuration.
#[fixture]
pub fn session() -> Session { Session::with_config(ChannelConfig::default()) }

/// Entity declarations in journal order, as `exchange:NAME` or `queue:NAME`.
#[must_use]
pub fn declarations(journal: &[Rpc]) -> Vec<String> {
    journal
        .iter()
        .filter_map(|rpc| match &rpc.method {
            Method::ExchangeDeclare(name) => Some(format!("exchange:{name}")),
            Method::QueueDeclare(name) => Some(format!("queue:{name}")),
            _ => None,
        })
        .collect()
}

/// Number of journal entries of `kind`.
#[must_use]
pub fn count(journal: &[Rpc], kind: RpcKind) -> usize {
    journal.iter().filter(|rpc| rpc.method.kind() == kind).count()
}

/// Index of the first entry of `kind`.
#[must_use]
pub fn first(journal: &[Rpc], kind: RpcKind) -> Option<usize> {
    journal.iter().position(|rpc| rpc.method.kind() == kind)
}

/// Assert the restore ordering: QoS, then every exchange declaration, then
/// every queue declaration.
///
/// # Panics
/// Panics when the journal violates the ordering.
pub fn assert_restore_order(journal: &[Rpc]) {
    let qos = first(journal, RpcKind::Qos).expect("restore applies qos");
    let mut seen_queue = false;
    for (index, rpc) in journal.iter().enumerate() {
        match rpc.method.kind() {
            RpcKind::ExchangeDeclare => {
                assert!(index > qos, "exchange declared before qos: {journal:?}");
                assert!(!seen_queue, "exchange declared after a queue: {journal:?}");
            }
            RpcKind::QueueDeclare => {
                assert!(index > qos, "queue declared before qos: {journal:?}");
                seen_queue = true;
            }
            _ => {}
        }
    }
}
