//! Reachability probe step.
//!
//! Probes a `host:port` by opening TCP connections, the way an ICMP ping
//! would send echo requests, and logs round-trip statistics. The step
//! reports success whatever the packet loss: it observes, it does not judge.

use super::{Step, EXAMPLE_NAMESPACE};
use crate::cancellation::CancellationToken;
use crate::context::{Request, StepContext};
use crate::core::{AtomId, StepReturn};
use crate::errors::StepError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tracing::{debug, info};

const DEFAULT_COUNT: i64 = 3;
const DEFAULT_INTERVAL_MS: i64 = 1000;
const DEFAULT_TIMEOUT_MS: i64 = 1000;

#[derive(Debug, Clone, Default)]
struct PingSettings {
    hostname: String,
    count: u32,
    interval: Duration,
    timeout: Duration,
}

/// Round-trip statistics of one probe run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PingStatistics {
    /// Address probed.
    pub addr: String,
    /// Probes attempted.
    pub packets_sent: u32,
    /// Probes that connected.
    pub packets_recv: u32,
    /// Minimum round trip.
    pub min_rtt: Duration,
    /// Average round trip.
    pub avg_rtt: Duration,
    /// Maximum round trip.
    pub max_rtt: Duration,
}

impl PingStatistics {
    /// Percentage of probes that did not connect.
    #[must_use]
    pub fn packet_loss(&self) -> f64 {
        if self.packets_sent == 0 {
            return 0.0;
        }
        f64::from(self.packets_sent - self.packets_recv) / f64::from(self.packets_sent) * 100.0
    }

    fn record(&mut self, rtt: Duration) {
        let recv = self.packets_recv;
        if recv == 0 || rtt < self.min_rtt {
            self.min_rtt = rtt;
        }
        if rtt > self.max_rtt {
            self.max_rtt = rtt;
        }
        self.avg_rtt = (self.avg_rtt * recv + rtt) / (recv + 1);
        self.packets_recv = recv + 1;
    }
}

/// Probes a host a number of times and logs the statistics.
///
/// Request arguments: `hostname` (`host:port`, required), `count`,
/// `interval_ms` and `timeout_ms`.
#[derive(Debug)]
pub struct PingStep {
    id: AtomId,
    settings: Mutex<PingSettings>,
    stats: Mutex<Option<PingStatistics>>,
    stop: CancellationToken,
}

impl PingStep {
    /// Creates a ping step. Its target is read in `create`.
    #[must_use]
    pub fn new(id: impl Into<String>, expansion_digest: impl Into<String>) -> Self {
        Self {
            id: AtomId::for_type::<Self>(EXAMPLE_NAMESPACE, id, expansion_digest),
            settings: Mutex::new(PingSettings::default()),
            stats: Mutex::new(None),
            stop: CancellationToken::new(),
        }
    }

    /// Statistics of the last completed run, if any.
    #[must_use]
    pub fn last_statistics(&self) -> Option<PingStatistics> {
        self.stats.lock().clone()
    }

    async fn probe(addr: &str, timeout: Duration) -> Option<Duration> {
        let started = Instant::now();
        match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
            Ok(Ok(_stream)) => Some(started.elapsed()),
            Ok(Err(e)) => {
                debug!(addr, error = %e, "Probe failed");
                None
            }
            Err(_) => {
                debug!(addr, "Probe timed out");
                None
            }
        }
    }
}

fn millis_arg(req: &Request, name: &str, default: i64) -> Result<Duration, StepError> {
    let ms = req.arg_i64_or(name, default)?;
    u64::try_from(ms)
        .map(Duration::from_millis)
        .map_err(|_| StepError::invalid_argument(name, "must not be negative"))
}

#[async_trait]
impl Step for PingStep {
    fn id(&self) -> &AtomId {
        &self.id
    }

    async fn create(&self, _ctx: &StepContext, req: &Request) -> Result<(), StepError> {
        let hostname = req.arg_str("hostname")?.to_string();
        let count = u32::try_from(req.arg_i64_or("count", DEFAULT_COUNT)?)
            .map_err(|_| StepError::invalid_argument("count", "must not be negative"))?;

        *self.settings.lock() = PingSettings {
            hostname,
            count,
            interval: millis_arg(req, "interval_ms", DEFAULT_INTERVAL_MS)?,
            timeout: millis_arg(req, "timeout_ms", DEFAULT_TIMEOUT_MS)?,
        };
        Ok(())
    }

    async fn run(&self, ctx: &StepContext) -> Result<StepReturn, StepError> {
        let settings = self.settings.lock().clone();
        let mut stats = PingStatistics {
            addr: settings.hostname.clone(),
            ..PingStatistics::default()
        };

        for seq in 0..settings.count {
            if seq > 0 {
                tokio::select! {
                    () = tokio::time::sleep(settings.interval) => {}
                    () = self.stop.cancelled() => break,
                }
            }
            stats.packets_sent += 1;
            let rtt = tokio::select! {
                rtt = Self::probe(&settings.hostname, settings.timeout) => rtt,
                () = self.stop.cancelled() => break,
            };
            if let Some(rtt) = rtt {
                info!(job_id = %ctx.job_id, addr = %settings.hostname, seq, rtt = ?rtt, "Probe reply");
                stats.record(rtt);
            }
        }

        info!(
            job_id = %ctx.job_id,
            addr = %stats.addr,
            transmitted = stats.packets_sent,
            received = stats.packets_recv,
            loss_pct = stats.packet_loss(),
            min_rtt = ?stats.min_rtt,
            avg_rtt = ?stats.avg_rtt,
            max_rtt = ?stats.max_rtt,
            "Ping statistics"
        );
        *self.stats.lock() = Some(stats);
        Ok(StepReturn::success())
    }

    async fn stop(&self, _ctx: &StepContext) -> Result<(), StepError> {
        self.stop.cancel("ping stopped");
        Ok(())
    }
}
