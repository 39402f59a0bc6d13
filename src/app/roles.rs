//! The example processes. Each role opens its sockets through a [`TransportFactory`], loops
//! until `shutdown` is signaled (or its configured count is reached) and returns what it did.

use super::config::*;
use super::AppError;
use crate::core::message::RawMessage;
use crate::core::socket::{
    BidirectionalSocket, InwardSocket, OpFlag, OutwardSocket, Socket, SocketError,
};
use crate::core::transport::{TransportFactory, TransportMethod};
use crate::core::util::thread::Shutdown;
use crate::model::pair::PairSocket;
use crate::model::pubsub::{PublisherSocket, SubscriberSocket, XPublisherSocket, XSubscriberSocket};
use crate::model::reqrep::{ReplySocket, RequestSocket};
use crate::proxy::{Proxy, ProxyStatistics};

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};

/// Longest a loop blocks before checking the shutdown flag again
const POLL_INTERVAL: Duration = Duration::from_millis(100);
const RECONNECT_INTERVAL: Duration = Duration::from_secs(1);

/// `"<id> <unix time> <text>"`
pub fn stamp(id: u64, text: &str) -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0);
    format!("{} {} {}", id, now, text)
}

fn endpoint(text: &str) -> Result<TransportMethod, AppError> {
    Ok(text.parse()?)
}

fn bind<S: Socket>(socket: &mut S, endpoint_text: &str) -> Result<(), AppError> {
    socket
        .bind(endpoint(endpoint_text)?)
        .map_err(|source| AppError::Bind {
            endpoint: endpoint_text.to_string(),
            source,
        })?;
    Ok(())
}

/// Connects, retrying while the target is not reachable yet. Returns `false` if shutdown
/// was signaled first.
fn connect<S: Socket>(
    socket: &mut S,
    endpoint_text: &str,
    shutdown: &Shutdown,
) -> Result<bool, AppError> {
    let target = endpoint(endpoint_text)?;
    loop {
        match socket.connect(target.clone()) {
            Ok(_) => return Ok(true),
            Err(source) if source.is_fatal() => {
                return Err(AppError::Connect {
                    endpoint: endpoint_text.to_string(),
                    source,
                })
            }
            Err(err) => {
                warn!(endpoint = endpoint_text, error = %err, "connect failed, retrying");
                if shutdown.sleep_unless_signaled(RECONNECT_INTERVAL) {
                    return Ok(false);
                }
            }
        }
    }
}

fn below(count: Option<u64>, done: u64) -> bool {
    count.map_or(true, |count| done < count)
}

/// Sends a stamped `text` every interval, returns the number of frames sent
fn send_periodically<S: OutwardSocket>(
    socket: &mut S,
    text: &str,
    periodic: &PeriodicConfig,
    shutdown: &Shutdown,
) -> Result<u64, AppError> {
    let mut sent = 0;
    while !shutdown.is_signaled() && below(periodic.count, sent) {
        let frame = stamp(sent + 1, text);
        match socket.send(RawMessage::from(frame.as_str()), OpFlag::Timeout(POLL_INTERVAL)) {
            Ok(_) => {
                sent += 1;
                info!(message = %frame, "sending message");
            }
            Err(SocketError::Timeout) | Err(SocketError::UnknownPeer) => {
                debug!("no peer to send to")
            }
            Err(err) if err.is_fatal() => return Err(err.into()),
            Err(err) => warn!(error = %err, "send failed"),
        }
        if !below(periodic.count, sent) || shutdown.sleep_unless_signaled(periodic.interval()) {
            break;
        }
    }
    Ok(sent)
}

/// Logs every received frame, returns the number of frames received
fn receive_frames<S: InwardSocket>(
    socket: &mut S,
    receive: &ReceiveConfig,
    shutdown: &Shutdown,
) -> Result<u64, AppError> {
    let mut received = 0;
    while !shutdown.is_signaled() && below(receive.count, received) {
        match socket.receive(OpFlag::Timeout(POLL_INTERVAL)) {
            Ok(frame) => {
                received += 1;
                info!(message = %frame.payload_lossy(), "received message");
            }
            Err(SocketError::Timeout) => (),
            Err(err) if err.is_fatal() => return Err(err.into()),
            Err(err) => warn!(error = %err, "receive failed"),
        }
    }
    Ok(received)
}

pub fn run_proxy<F: TransportFactory>(
    factory: &F,
    config: &ProxyConfig,
    shutdown: &Shutdown,
) -> Result<ProxyStatistics, AppError> {
    let mut frontend = XPublisherSocket::new(factory.create());
    frontend.set_verbose(config.verbose);
    bind(&mut frontend, &config.frontend)?;
    info!(endpoint = %config.frontend, "proxy frontend bound for subscribers");

    let mut backend = XSubscriberSocket::new(factory.create());
    bind(&mut backend, &config.backend)?;
    info!(endpoint = %config.backend, "proxy backend bound for producers");

    let mut proxy = Proxy::new(frontend, backend).with_batch_size(config.poll_batch);
    if let Some(capture_endpoint) = &config.capture {
        let capture = PairSocket::new(factory.create());
        info!(endpoint = %capture_endpoint, "capturing forwarded frames");
        proxy = proxy.with_capture_at(Box::new(capture), endpoint(capture_endpoint)?);
    }

    let statistics = proxy.run(shutdown)?;
    proxy.close()?;
    Ok(statistics)
}

pub fn run_producer<F: TransportFactory>(
    factory: &F,
    config: &ProducerConfig,
    shutdown: &Shutdown,
) -> Result<u64, AppError> {
    let mut socket = PublisherSocket::new(factory.create());
    if !connect(&mut socket, &config.endpoint, shutdown)? {
        return Ok(0);
    }
    info!(endpoint = %config.endpoint, "producer is running");
    let sent = send_periodically(&mut socket, &config.message, &config.periodic, shutdown)?;
    socket.close()?;
    Ok(sent)
}

fn run_subscription<F: TransportFactory>(
    factory: &F,
    endpoint_text: &str,
    filter: &str,
    receive: &ReceiveConfig,
    shutdown: &Shutdown,
) -> Result<u64, AppError> {
    let mut socket = SubscriberSocket::new(factory.create());
    if !connect(&mut socket, endpoint_text, shutdown)? {
        return Ok(0);
    }
    socket.subscribe(filter.as_bytes())?;
    info!(endpoint = endpoint_text, filter, "subscriber is running");
    let received = receive_frames(&mut socket, receive, shutdown)?;
    socket.close()?;
    Ok(received)
}

pub fn run_subscriber<F: TransportFactory>(
    factory: &F,
    config: &SubscriberConfig,
    shutdown: &Shutdown,
) -> Result<u64, AppError> {
    run_subscription(factory, &config.endpoint, &config.filter, &config.receive, shutdown)
}

pub fn run_sub_client<F: TransportFactory>(
    factory: &F,
    config: &SubClientConfig,
    shutdown: &Shutdown,
) -> Result<u64, AppError> {
    run_subscription(factory, &config.endpoint, &config.filter, &config.receive, shutdown)
}

pub fn run_pub_server<F: TransportFactory>(
    factory: &F,
    config: &PubServerConfig,
    shutdown: &Shutdown,
) -> Result<u64, AppError> {
    let mut socket = PublisherSocket::new(factory.create());
    bind(&mut socket, &config.endpoint)?;
    info!(endpoint = %config.endpoint, "server is running");
    let sent = send_periodically(&mut socket, &config.message, &config.periodic, shutdown)?;
    socket.close()?;
    Ok(sent)
}

pub fn run_pair_server<F: TransportFactory>(
    factory: &F,
    config: &PairServerConfig,
    shutdown: &Shutdown,
) -> Result<u64, AppError> {
    let mut socket = PairSocket::new(factory.create());
    bind(&mut socket, &config.endpoint)?;
    info!(endpoint = %config.endpoint, "server is running");
    let sent = send_periodically(&mut socket, &config.message, &config.periodic, shutdown)?;
    socket.close()?;
    Ok(sent)
}

pub fn run_pair_client<F: TransportFactory>(
    factory: &F,
    config: &PairClientConfig,
    shutdown: &Shutdown,
) -> Result<u64, AppError> {
    let mut socket = PairSocket::new(factory.create());
    if !connect(&mut socket, &config.endpoint, shutdown)? {
        return Ok(0);
    }
    info!(endpoint = %config.endpoint, "client is running");
    let received = receive_frames(&mut socket, &config.receive, shutdown)?;
    socket.close()?;
    Ok(received)
}

/// Answers requests until shutdown, returns the number of replies sent
pub fn run_rep_server<F: TransportFactory>(
    factory: &F,
    config: &RepServerConfig,
    shutdown: &Shutdown,
) -> Result<u64, AppError> {
    let mut socket = ReplySocket::new(factory.create());
    bind(&mut socket, &config.endpoint)?;
    info!(endpoint = %config.endpoint, "server is running");

    let mut replied = 0;
    while !shutdown.is_signaled() && below(config.receive.count, replied) {
        let outcome = socket.respond(OpFlag::Timeout(POLL_INTERVAL), OpFlag::NoWait, |request| {
            info!(message = %request.payload_lossy(), "received message");
            RawMessage::from(config.reply.as_str())
        });
        match outcome {
            Ok(_) => {
                replied += 1;
                info!(reply = %config.reply, "sending reply");
            }
            Err(SocketError::Timeout) => (),
            Err(err) if err.is_fatal() => return Err(err.into()),
            Err(err) => warn!(error = %err, "request not answered"),
        }
    }
    socket.close()?;
    Ok(replied)
}

/// Sends requests every interval, returns the number of replies received
pub fn run_req_client<F: TransportFactory>(
    factory: &F,
    config: &ReqClientConfig,
    shutdown: &Shutdown,
) -> Result<u64, AppError> {
    let mut socket = RequestSocket::new(factory.create());
    if !connect(&mut socket, &config.endpoint, shutdown)? {
        return Ok(0);
    }
    info!(endpoint = %config.endpoint, "connecting to server");

    let mut replies = 0;
    while !shutdown.is_signaled() && below(config.periodic.count, replies) {
        match socket.send(
            RawMessage::from(config.message.as_str()),
            OpFlag::Timeout(POLL_INTERVAL),
        ) {
            Ok(_) => info!(message = %config.message, "sending message"),
            Err(SocketError::Timeout) | Err(SocketError::UnknownPeer) => {
                debug!("no server to send to");
                continue;
            }
            Err(err) if err.is_fatal() => return Err(err.into()),
            Err(err) => {
                warn!(error = %err, "request not sent");
                shutdown.sleep_unless_signaled(config.periodic.interval());
                continue;
            }
        }
        loop {
            match socket.receive(OpFlag::Timeout(POLL_INTERVAL)) {
                Ok(reply) => {
                    replies += 1;
                    info!(reply = %reply.payload_lossy(), "received reply");
                    break;
                }
                Err(SocketError::Timeout) if !shutdown.is_signaled() => (),
                Err(SocketError::Timeout) => {
                    socket.close()?;
                    return Ok(replies);
                }
                Err(err) if err.is_fatal() => return Err(err.into()),
                Err(SocketError::Disconnected) => {
                    warn!("server left before replying");
                    break;
                }
                Err(err) => warn!(error = %err, "receive failed"),
            }
        }
        shutdown.sleep_unless_signaled(config.periodic.interval());
    }
    socket.close()?;
    Ok(replies)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stamped_messages() {
        let stamped = stamp(7, "Hello from server!");
        let mut parts = stamped.splitn(3, ' ');
        assert_eq!(parts.next(), Some("7"));
        assert!(parts.next().unwrap().parse::<u64>().unwrap() > 1_600_000_000);
        assert_eq!(parts.next(), Some("Hello from server!"));
    }

    #[test]
    fn counts_limit_loops() {
        assert!(below(None, u64::MAX));
        assert!(below(Some(2), 1));
        assert!(!below(Some(2), 2));
    }
}
