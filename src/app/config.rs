//! Command line of the `patternmq` binary. Every subcommand parses into the configuration
//! struct its role runs with.

use crate::proxy::DEFAULT_BATCH_SIZE;

use clap::{Args, Parser, Subcommand};
use std::time::Duration;

pub const PROXY_FRONTEND: &str = "tcp://*:9200";
pub const PROXY_BACKEND: &str = "tcp://*:9210";
pub const PRODUCER_ENDPOINT: &str = "tcp://localhost:9210";
pub const SUBSCRIBER_ENDPOINT: &str = "tcp://localhost:9200";
pub const SERVER_ENDPOINT: &str = "tcp://*:5555";
pub const CLIENT_ENDPOINT: &str = "tcp://localhost:5555";

pub const PRODUCER_MESSAGE: &str = "Hello from producer!";
pub const SERVER_MESSAGE: &str = "Hello from server!";
pub const CLIENT_MESSAGE: &str = "Hello from client!";

const DEFAULT_INTERVAL_MS: u64 = 1000;

#[derive(Parser, Debug)]
#[command(name = "patternmq")]
#[command(
    version,
    about = "Messaging pattern examples and a publish/subscribe relay proxy"
)]
pub struct Cli {
    /// Output logs as JSON. RUST_LOG selects what is logged.
    #[arg(long, global = true, env = "PATTERNMQ_LOG_JSON")]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Relay frames from producers to subscribers and subscriptions back
    Proxy(ProxyConfig),
    /// Publish a stamped message periodically to the proxy
    Producer(ProducerConfig),
    /// Print the frames the proxy delivers
    Subscriber(SubscriberConfig),
    /// Send a stamped message periodically to the paired client
    PairServer(PairServerConfig),
    /// Print the frames sent by the pair server
    PairClient(PairClientConfig),
    /// Publish a stamped message periodically
    PubServer(PubServerConfig),
    /// Print the frames published by the pub server
    SubClient(SubClientConfig),
    /// Answer every request with a fixed reply
    RepServer(RepServerConfig),
    /// Send a request periodically and print the reply
    ReqClient(ReqClientConfig),
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct ProxyConfig {
    /// Subscriber-facing endpoint
    #[arg(long, env = "PATTERNMQ_FRONTEND", default_value = PROXY_FRONTEND)]
    pub frontend: String,

    /// Producer-facing endpoint
    #[arg(long, env = "PATTERNMQ_BACKEND", default_value = PROXY_BACKEND)]
    pub backend: String,

    /// Pair endpoint receiving a copy of every forwarded frame
    #[arg(long, env = "PATTERNMQ_CAPTURE")]
    pub capture: Option<String>,

    /// Frames forwarded in one direction before serving the other one
    #[arg(long, env = "PATTERNMQ_POLL_BATCH", default_value_t = DEFAULT_BATCH_SIZE)]
    pub poll_batch: usize,

    /// Forward every subscription upstream instead of the first one per prefix
    #[arg(long, env = "PATTERNMQ_VERBOSE")]
    pub verbose: bool,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            frontend: PROXY_FRONTEND.to_string(),
            backend: PROXY_BACKEND.to_string(),
            capture: None,
            poll_batch: DEFAULT_BATCH_SIZE,
            verbose: false,
        }
    }
}

/// Settings shared by the roles sending a stamped message periodically
#[derive(Args, Debug, Clone, PartialEq)]
pub struct PeriodicConfig {
    /// Delay between two messages in milliseconds
    #[arg(long = "interval-ms", env = "PATTERNMQ_INTERVAL_MS", default_value_t = DEFAULT_INTERVAL_MS)]
    pub interval_ms: u64,

    /// Stop after this many messages
    #[arg(long, env = "PATTERNMQ_COUNT")]
    pub count: Option<u64>,
}

impl PeriodicConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for PeriodicConfig {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_INTERVAL_MS,
            count: None,
        }
    }
}

/// Settings shared by the roles printing what they receive
#[derive(Args, Debug, Clone, PartialEq, Default)]
pub struct ReceiveConfig {
    /// Stop after this many frames
    #[arg(long, env = "PATTERNMQ_COUNT")]
    pub count: Option<u64>,
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct ProducerConfig {
    /// Endpoint of the proxy backend
    #[arg(long, env = "PATTERNMQ_ENDPOINT", default_value = PRODUCER_ENDPOINT)]
    pub endpoint: String,

    #[arg(long, env = "PATTERNMQ_MESSAGE", default_value = PRODUCER_MESSAGE)]
    pub message: String,

    #[command(flatten)]
    pub periodic: PeriodicConfig,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            endpoint: PRODUCER_ENDPOINT.to_string(),
            message: PRODUCER_MESSAGE.to_string(),
            periodic: PeriodicConfig::default(),
        }
    }
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct SubscriberConfig {
    /// Endpoint of the proxy frontend
    #[arg(long, env = "PATTERNMQ_ENDPOINT", default_value = SUBSCRIBER_ENDPOINT)]
    pub endpoint: String,

    /// Subscription prefix, empty for every frame
    #[arg(long, env = "PATTERNMQ_FILTER", default_value = "")]
    pub filter: String,

    #[command(flatten)]
    pub receive: ReceiveConfig,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            endpoint: SUBSCRIBER_ENDPOINT.to_string(),
            filter: String::new(),
            receive: ReceiveConfig::default(),
        }
    }
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct PairServerConfig {
    #[arg(long, env = "PATTERNMQ_ENDPOINT", default_value = SERVER_ENDPOINT)]
    pub endpoint: String,

    #[arg(long, env = "PATTERNMQ_MESSAGE", default_value = SERVER_MESSAGE)]
    pub message: String,

    #[command(flatten)]
    pub periodic: PeriodicConfig,
}

impl Default for PairServerConfig {
    fn default() -> Self {
        Self {
            endpoint: SERVER_ENDPOINT.to_string(),
            message: SERVER_MESSAGE.to_string(),
            periodic: PeriodicConfig::default(),
        }
    }
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct PairClientConfig {
    #[arg(long, env = "PATTERNMQ_ENDPOINT", default_value = CLIENT_ENDPOINT)]
    pub endpoint: String,

    #[command(flatten)]
    pub receive: ReceiveConfig,
}

impl Default for PairClientConfig {
    fn default() -> Self {
        Self {
            endpoint: CLIENT_ENDPOINT.to_string(),
            receive: ReceiveConfig::default(),
        }
    }
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct PubServerConfig {
    #[arg(long, env = "PATTERNMQ_ENDPOINT", default_value = SERVER_ENDPOINT)]
    pub endpoint: String,

    #[arg(long, env = "PATTERNMQ_MESSAGE", default_value = SERVER_MESSAGE)]
    pub message: String,

    #[command(flatten)]
    pub periodic: PeriodicConfig,
}

impl Default for PubServerConfig {
    fn default() -> Self {
        Self {
            endpoint: SERVER_ENDPOINT.to_string(),
            message: SERVER_MESSAGE.to_string(),
            periodic: PeriodicConfig::default(),
        }
    }
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct SubClientConfig {
    #[arg(long, env = "PATTERNMQ_ENDPOINT", default_value = CLIENT_ENDPOINT)]
    pub endpoint: String,

    #[arg(long, env = "PATTERNMQ_FILTER", default_value = "")]
    pub filter: String,

    #[command(flatten)]
    pub receive: ReceiveConfig,
}

impl Default for SubClientConfig {
    fn default() -> Self {
        Self {
            endpoint: CLIENT_ENDPOINT.to_string(),
            filter: String::new(),
            receive: ReceiveConfig::default(),
        }
    }
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct RepServerConfig {
    #[arg(long, env = "PATTERNMQ_ENDPOINT", default_value = SERVER_ENDPOINT)]
    pub endpoint: String,

    /// Reply sent to every request
    #[arg(long, env = "PATTERNMQ_REPLY", default_value = SERVER_MESSAGE)]
    pub reply: String,

    #[command(flatten)]
    pub receive: ReceiveConfig,
}

impl Default for RepServerConfig {
    fn default() -> Self {
        Self {
            endpoint: SERVER_ENDPOINT.to_string(),
            reply: SERVER_MESSAGE.to_string(),
            receive: ReceiveConfig::default(),
        }
    }
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct ReqClientConfig {
    #[arg(long, env = "PATTERNMQ_ENDPOINT", default_value = CLIENT_ENDPOINT)]
    pub endpoint: String,

    #[arg(long, env = "PATTERNMQ_MESSAGE", default_value = CLIENT_MESSAGE)]
    pub message: String,

    #[command(flatten)]
    pub periodic: PeriodicConfig,
}

impl Default for ReqClientConfig {
    fn default() -> Self {
        Self {
            endpoint: CLIENT_ENDPOINT.to_string(),
            message: CLIENT_MESSAGE.to_string(),
            periodic: PeriodicConfig::default(),
        }
    }
}
