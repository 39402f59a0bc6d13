use crate::core::socket::{InwardSocket, OpFlag};
use crate::core::transport::TransportMethod;

use std::thread;
use std::time::{Duration, Instant};

pub const RECEIVE_TIMEOUT: OpFlag = OpFlag::Timeout(Duration::from_secs(5));
pub const SILENCE: OpFlag = OpFlag::Timeout(Duration::from_millis(200));

/// Polls `condition` until it holds, giving up after five seconds
pub fn wait_until<F: FnMut() -> bool>(mut condition: F) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

pub fn inproc(name: &str) -> TransportMethod {
    TransportMethod::Memory(name.to_string())
}

pub fn tcp_bind(port: u16) -> TransportMethod {
    format!("tcp://*:{}", port).parse().unwrap()
}

pub fn tcp_connect(port: u16) -> TransportMethod {
    format!("tcp://localhost:{}", port).parse().unwrap()
}

/// Lets a receiving socket handle pending events, such as handshakes of new peers
pub fn pump<S: InwardSocket>(socket: &mut S) {
    let _ = socket.receive(OpFlag::NoWait);
}
