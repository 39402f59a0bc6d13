//! # Application layer
//! Configuration, logging and the example roles run by the `patternmq` binary

pub mod config;
pub mod logging;
pub mod roles;

use self::config::Command;
use crate::core::socket::SocketError;
use crate::core::transport::{EndpointError, TransportFactory};
use crate::core::util::thread::Shutdown;
use crate::proxy::ProxyError;

use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Endpoint(#[from] EndpointError),
    #[error("cannot bind {endpoint}")]
    Bind {
        endpoint: String,
        #[source]
        source: SocketError,
    },
    #[error("cannot connect to {endpoint}")]
    Connect {
        endpoint: String,
        #[source]
        source: SocketError,
    },
    #[error("socket failed")]
    Socket(#[from] SocketError),
    #[error(transparent)]
    Proxy(#[from] ProxyError),
}

/// Runs the role selected on the command line until it finishes or `shutdown` is signaled
pub fn run<F: TransportFactory>(
    factory: &F,
    command: &Command,
    shutdown: &Shutdown,
) -> Result<(), AppError> {
    match command {
        Command::Proxy(config) => {
            let statistics = roles::run_proxy(factory, config, shutdown)?;
            info!(
                downstream = statistics.downstream,
                upstream = statistics.upstream,
                "proxy finished"
            );
        }
        Command::Producer(config) => {
            let sent = roles::run_producer(factory, config, shutdown)?;
            info!(sent, "producer finished");
        }
        Command::Subscriber(config) => {
            let received = roles::run_subscriber(factory, config, shutdown)?;
            info!(received, "subscriber finished");
        }
        Command::PairServer(config) => {
            let sent = roles::run_pair_server(factory, config, shutdown)?;
            info!(sent, "pair server finished");
        }
        Command::PairClient(config) => {
            let received = roles::run_pair_client(factory, config, shutdown)?;
            info!(received, "pair client finished");
        }
        Command::PubServer(config) => {
            let sent = roles::run_pub_server(factory, config, shutdown)?;
            info!(sent, "pub server finished");
        }
        Command::SubClient(config) => {
            let received = roles::run_sub_client(factory, config, shutdown)?;
            info!(received, "sub client finished");
        }
        Command::RepServer(config) => {
            let replied = roles::run_rep_server(factory, config, shutdown)?;
            info!(replied, "rep server finished");
        }
        Command::ReqClient(config) => {
            let replies = roles::run_req_client(factory, config, shutdown)?;
            info!(replies, "req client finished");
        }
    }
    Ok(())
}
