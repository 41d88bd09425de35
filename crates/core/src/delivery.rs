//! Batch delivery to the remote bulk-update endpoint.
//!
//! One [`DeliveryClient::send`] is one connection carrying one request:
//!
//! ```text
//! POST /channels/<id>/bulk_update.csv HTTP/1.1\r\n
//! Host: <host>\r\n
//! Content-Type: application/x-www-form-urlencoded\r\n
//! Content-Length: <body bytes>\r\n
//! \r\n
//! <body>\r\n
//! ```
//!
//! The numeric code from the response status line decides the outcome. The
//! client never retries; that is the batcher's job.
//!
//! # Simulation
//!
//! [`SimulatedNetwork`] stands in for the link in tests and dry runs. Its
//! outcomes come from a scripted queue first, then from a seeded ChaCha8 RNG,
//! so runs are reproducible given the same seed.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{self, BufRead, BufReader, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::rc::Rc;
use std::time::Duration;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, warn};

use crate::error::DeliveryError;

/// Default endpoint host.
pub const DEFAULT_HOST: &str = "api.thingspeak.com";

/// Default endpoint port.
pub const DEFAULT_PORT: u16 = 80;

/// Status code the bulk-update endpoint answers on success.
pub const DEFAULT_ACCEPTED_STATUS: u16 = 202;

/// An open request/response channel.
pub trait Connection {
    /// Write raw request bytes.
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Read the response status code.
    fn read_status_code(&mut self) -> io::Result<u16>;
}

/// Connection factory.
pub trait Network {
    type Conn: Connection;

    fn connect(&mut self, host: &str, port: u16) -> io::Result<Self::Conn>;
}

/// Where batches go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub channel_id: u32,
    /// The only status code treated as success
    pub accepted_status: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16, channel_id: u32) -> Self {
        Self {
            host: host.into(),
            port,
            channel_id,
            accepted_status: DEFAULT_ACCEPTED_STATUS,
        }
    }

    pub fn path(&self) -> String {
        format!("/channels/{}/bulk_update.csv", self.channel_id)
    }

    /// Full request text for `body`.
    pub fn request(&self, body: &str) -> String {
        format!(
            "POST {} HTTP/1.1\r\n\
             Host: {}\r\n\
             Content-Type: application/x-www-form-urlencoded\r\n\
             Content-Length: {}\r\n\
             \r\n\
             {}\r\n",
            self.path(),
            self.host,
            body.len(),
            body
        )
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::new(DEFAULT_HOST, DEFAULT_PORT, 0)
    }
}

/// Sends one batch per call over an injected [`Network`].
#[derive(Debug)]
pub struct DeliveryClient<N> {
    network: N,
    endpoint: Endpoint,
}

impl<N: Network> DeliveryClient<N> {
    pub fn new(network: N, endpoint: Endpoint) -> Self {
        Self { network, endpoint }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn network(&self) -> &N {
        &self.network
    }

    /// Deliver `body` as a single request.
    ///
    /// # Errors
    /// - `DeliveryError::ConnectionFailed` if the endpoint cannot be reached
    ///   or the exchange breaks off
    /// - `DeliveryError::Rejected` for any status other than the accepted one
    pub fn send(&mut self, body: &str) -> Result<(), DeliveryError> {
        let connection_failed = |e: io::Error| DeliveryError::ConnectionFailed {
            reason: e.to_string(),
        };

        let mut conn = self
            .network
            .connect(&self.endpoint.host, self.endpoint.port)
            .map_err(connection_failed)?;

        debug!(
            host = %self.endpoint.host,
            path = %self.endpoint.path(),
            bytes = body.len(),
            "sending batch"
        );
        conn.write_all(self.endpoint.request(body).as_bytes())
            .map_err(connection_failed)?;
        let code = conn.read_status_code().map_err(connection_failed)?;

        if code == self.endpoint.accepted_status {
            debug!(code, "batch accepted");
            Ok(())
        } else {
            warn!(code, "batch rejected");
            Err(DeliveryError::Rejected { code })
        }
    }
}

/// Plain TCP link with I/O timeouts.
#[derive(Debug, Clone, Copy)]
pub struct TcpNetwork {
    pub timeout: Duration,
}

impl TcpNetwork {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for TcpNetwork {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl Network for TcpNetwork {
    type Conn = TcpConnection;

    fn connect(&mut self, host: &str, port: u16) -> io::Result<TcpConnection> {
        let addr = (host, port).to_socket_addrs()?.next().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("{host} did not resolve"))
        })?;
        let stream = TcpStream::connect_timeout(&addr, self.timeout)?;
        stream.set_read_timeout(Some(self.timeout))?;
        stream.set_write_timeout(Some(self.timeout))?;
        Ok(TcpConnection { stream })
    }
}

/// Connection returned by [`TcpNetwork`]. Closed on drop.
#[derive(Debug)]
pub struct TcpConnection {
    stream: TcpStream,
}

impl Connection for TcpConnection {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.stream.write_all(bytes)?;
        self.stream.flush()
    }

    fn read_status_code(&mut self) -> io::Result<u16> {
        let mut status_line = String::new();
        BufReader::new(&self.stream).read_line(&mut status_line)?;
        parse_status_line(&status_line)
    }
}

/// Extract the code from `HTTP/1.1 202 Accepted`.
pub fn parse_status_line(line: &str) -> io::Result<u16> {
    let mut parts = line.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(version), Some(code)) if version.starts_with("HTTP/") => code
            .parse()
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, format!("bad status code {code:?}"))),
        _ => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("bad status line {:?}", line.trim_end()),
        )),
    }
}

/// Forced outcome for the next simulated request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimOutcome {
    Accept,
    Reject(u16),
    /// Refuse the connection
    Fail,
}

/// Configuration for the simulated link.
#[derive(Debug, Clone, Copy)]
pub struct SimConfig {
    /// Probability a request is rejected [0.0, 1.0]
    pub reject_rate: f64,

    /// Probability a connection is refused [0.0, 1.0]
    pub connect_failure_rate: f64,

    /// Status returned on random rejection
    pub reject_code: u16,

    /// Status returned on success
    pub accepted_status: u16,

    /// Random seed for determinism
    pub seed: u64,
}

impl SimConfig {
    /// A link that accepts everything.
    pub fn perfect(seed: u64) -> Self {
        Self {
            reject_rate: 0.0,
            connect_failure_rate: 0.0,
            reject_code: 500,
            accepted_status: DEFAULT_ACCEPTED_STATUS,
            seed,
        }
    }

    /// Moderately flaky link.
    pub fn default_with_seed(seed: u64) -> Self {
        Self {
            reject_rate: 0.1,
            connect_failure_rate: 0.05,
            ..Self::perfect(seed)
        }
    }
}

/// Statistics about simulated link behavior.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetworkStats {
    /// Connection attempts
    pub connects: u64,

    /// Connections refused
    pub connect_failures: u64,

    /// Requests answered
    pub requests: u64,

    /// Requests answered with the accepted status
    pub accepted: u64,

    /// Requests answered with any other status
    pub rejected: u64,
}

impl NetworkStats {
    /// Accepted / connection attempts.
    pub fn acceptance_rate(&self) -> f64 {
        if self.connects == 0 {
            0.0
        } else {
            self.accepted as f64 / self.connects as f64
        }
    }
}

#[derive(Debug)]
struct SimState {
    config: SimConfig,
    rng: ChaCha8Rng,
    script: VecDeque<SimOutcome>,
    accepted_bodies: Vec<String>,
    attempted_bodies: Vec<String>,
    stats: NetworkStats,
}

impl SimState {
    fn next_outcome(&mut self) -> SimOutcome {
        if let Some(outcome) = self.script.pop_front() {
            return outcome;
        }
        let roll: f64 = self.rng.gen();
        if roll < self.config.connect_failure_rate {
            return SimOutcome::Fail;
        }
        let roll: f64 = self.rng.gen();
        if roll < self.config.reject_rate {
            SimOutcome::Reject(self.config.reject_code)
        } else {
            SimOutcome::Accept
        }
    }
}

/// Seeded in-process stand-in for the endpoint. Clones share state.
#[derive(Debug, Clone)]
pub struct SimulatedNetwork {
    state: Rc<RefCell<SimState>>,
}

impl SimulatedNetwork {
    pub fn new(config: SimConfig) -> Self {
        Self {
            state: Rc::new(RefCell::new(SimState {
                config,
                rng: ChaCha8Rng::seed_from_u64(config.seed),
                script: VecDeque::new(),
                accepted_bodies: Vec::new(),
                attempted_bodies: Vec::new(),
                stats: NetworkStats::default(),
            })),
        }
    }

    /// Queue forced outcomes, consumed one per connection before any random
    /// outcome.
    pub fn script(&self, outcomes: impl IntoIterator<Item = SimOutcome>) {
        self.state.borrow_mut().script.extend(outcomes);
    }

    /// Bodies of accepted requests, in order.
    pub fn accepted_bodies(&self) -> Vec<String> {
        self.state.borrow().accepted_bodies.clone()
    }

    /// Bodies of every request that reached the endpoint, in order.
    pub fn attempted_bodies(&self) -> Vec<String> {
        self.state.borrow().attempted_bodies.clone()
    }

    pub fn stats(&self) -> NetworkStats {
        self.state.borrow().stats
    }
}

impl Network for SimulatedNetwork {
    type Conn = SimConnection;

    fn connect(&mut self, host: &str, port: u16) -> io::Result<SimConnection> {
        let mut state = self.state.borrow_mut();
        state.stats.connects += 1;
        let outcome = state.next_outcome();
        if outcome == SimOutcome::Fail {
            state.stats.connect_failures += 1;
            return Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("simulated refusal from {host}:{port}"),
            ));
        }
        Ok(SimConnection {
            state: Rc::clone(&self.state),
            outcome,
            request: Vec::new(),
        })
    }
}

/// Connection returned by [`SimulatedNetwork`].
#[derive(Debug)]
pub struct SimConnection {
    state: Rc<RefCell<SimState>>,
    outcome: SimOutcome,
    request: Vec<u8>,
}

impl SimConnection {
    /// Split the buffered request into its declared length and body.
    fn parse_request(&self) -> Option<(usize, String)> {
        let text = std::str::from_utf8(&self.request).ok()?;
        let (head, rest) = text.split_once("\r\n\r\n")?;
        let declared = head
            .lines()
            .find_map(|l| l.strip_prefix("Content-Length: "))?
            .trim()
            .parse()
            .ok()?;
        let body = rest.strip_suffix("\r\n").unwrap_or(rest);
        Some((declared, body.to_string()))
    }
}

impl Connection for SimConnection {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.request.extend_from_slice(bytes);
        Ok(())
    }

    fn read_status_code(&mut self) -> io::Result<u16> {
        let parsed = self.parse_request();
        let mut state = self.state.borrow_mut();
        state.stats.requests += 1;

        let code = match (parsed, self.outcome) {
            (Some((declared, body)), outcome) if declared == body.len() => {
                state.attempted_bodies.push(body.clone());
                match outcome {
                    SimOutcome::Accept => {
                        state.accepted_bodies.push(body);
                        state.config.accepted_status
                    }
                    SimOutcome::Reject(code) => code,
                    SimOutcome::Fail => state.config.reject_code,
                }
            }
            _ => 400,
        };

        if code == state.config.accepted_status {
            state.stats.accepted += 1;
        } else {
            state.stats.rejected += 1;
        }
        Ok(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(sim: &SimulatedNetwork) -> DeliveryClient<SimulatedNetwork> {
        DeliveryClient::new(sim.clone(), Endpoint::new("example.test", 80, 1234))
    }

    #[test]
    fn test_request_format() {
        let endpoint = Endpoint::new("api.thingspeak.com", 80, 42);
        assert_eq!(
            endpoint.request("abc"),
            "POST /channels/42/bulk_update.csv HTTP/1.1\r\n\
             Host: api.thingspeak.com\r\n\
             Content-Type: application/x-www-form-urlencoded\r\n\
             Content-Length: 3\r\n\
             \r\n\
             abc\r\n"
        );
    }

    #[test]
    fn test_parse_status_line() {
        assert_eq!(parse_status_line("HTTP/1.1 202 Accepted\r\n").unwrap(), 202);
        assert_eq!(parse_status_line("HTTP/1.0 500").unwrap(), 500);
        assert!(parse_status_line("").is_err());
        assert!(parse_status_line("garbage 202").is_err());
        assert!(parse_status_line("HTTP/1.1 OK").is_err());
    }

    #[test]
    fn test_accepted() {
        let sim = SimulatedNetwork::new(SimConfig::perfect(1));
        let mut client = client(&sim);

        client.send("body-1").unwrap();

        assert_eq!(sim.accepted_bodies(), vec!["body-1".to_string()]);
        let stats = sim.stats();
        assert_eq!(stats.connects, 1);
        assert_eq!(stats.accepted, 1);
    }

    #[test]
    fn test_rejected_with_code() {
        let sim = SimulatedNetwork::new(SimConfig::perfect(1));
        sim.script([SimOutcome::Reject(429)]);
        let mut client = client(&sim);

        assert_eq!(
            client.send("body"),
            Err(DeliveryError::Rejected { code: 429 })
        );
        assert!(sim.accepted_bodies().is_empty());
        assert_eq!(sim.attempted_bodies(), vec!["body".to_string()]);
    }

    #[test]
    fn test_connection_failure() {
        let sim = SimulatedNetwork::new(SimConfig::perfect(1));
        sim.script([SimOutcome::Fail, SimOutcome::Accept]);
        let mut client = client(&sim);

        assert!(matches!(
            client.send("body"),
            Err(DeliveryError::ConnectionFailed { .. })
        ));
        client.send("body").unwrap();

        let stats = sim.stats();
        assert_eq!(stats.connects, 2);
        assert_eq!(stats.connect_failures, 1);
        assert_eq!(stats.requests, 1);
    }

    #[test]
    fn test_non_default_accepted_status() {
        let mut config = SimConfig::perfect(1);
        config.accepted_status = 200;
        let sim = SimulatedNetwork::new(config);
        let mut client = client(&sim);

        // Endpoint still expects 202
        assert_eq!(
            client.send("body"),
            Err(DeliveryError::Rejected { code: 200 })
        );
    }

    #[test]
    fn test_content_length_mismatch_rejected() {
        let mut sim = SimulatedNetwork::new(SimConfig::perfect(1));
        let mut conn = sim.connect("h", 80).unwrap();
        conn.write_all(b"POST / HTTP/1.1\r\nContent-Length: 10\r\n\r\nshort\r\n")
            .unwrap();
        assert_eq!(conn.read_status_code().unwrap(), 400);
    }

    #[test]
    fn test_determinism() {
        let run = || {
            let sim = SimulatedNetwork::new(SimConfig::default_with_seed(12345));
            let mut client = client(&sim);
            (0..50)
                .map(|i| client.send(&format!("b{i}")).is_ok())
                .collect::<Vec<_>>()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_failure_rates() {
        let config = SimConfig {
            reject_rate: 0.5,
            connect_failure_rate: 0.0,
            ..SimConfig::perfect(42)
        };
        let sim = SimulatedNetwork::new(config);
        let mut client = client(&sim);

        for i in 0..100 {
            let _ = client.send(&format!("b{i}"));
        }

        let stats = sim.stats();
        assert_eq!(stats.requests, 100);
        assert!(stats.rejected >= 30 && stats.rejected <= 70);
        assert!(stats.acceptance_rate() > 0.3 && stats.acceptance_rate() < 0.7);
    }
}
