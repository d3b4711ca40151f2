use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::thread;
use std::time::{Duration, Instant};

use crate::config::{Config, ProbeProtocol};
use crate::error::{ProbeError, Result};
use crate::probe::{Outcome, ProbeStrategy, build_strategy};

/// Host being probed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// As typed by the user
    pub original: String,
    pub resolved: Ipv4Addr,
}

impl Target {
    pub fn new(original: impl Into<String>, resolved: Ipv4Addr) -> Self {
        Self {
            original: original.into(),
            resolved,
        }
    }
}

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Running,
    Done,
}

/// Aggregated round-trip statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    pub sent: u64,
    pub received: u64,
    #[serde(with = "duration_serde")]
    pub min_rtt: Duration,
    #[serde(with = "duration_serde")]
    pub max_rtt: Duration,
    #[serde(with = "duration_serde")]
    pub total_rtt: Duration,
    /// TTL of the most recent reply that carried one
    pub ttl: Option<u8>,
}

impl Default for SessionStats {
    fn default() -> Self {
        Self {
            sent: 0,
            received: 0,
            min_rtt: Duration::MAX,
            max_rtt: Duration::ZERO,
            total_rtt: Duration::ZERO,
            ttl: None,
        }
    }
}

impl SessionStats {
    pub fn record_sent(&mut self) {
        self.sent += 1;
    }

    /// Update stats with a new RTT sample
    pub fn record_response(&mut self, rtt: Duration, ttl: Option<u8>) {
        self.received += 1;
        self.total_rtt = self.total_rtt.saturating_add(rtt);

        if rtt < self.min_rtt {
            self.min_rtt = rtt;
        }
        if rtt > self.max_rtt {
            self.max_rtt = rtt;
        }
        if ttl.is_some() {
            self.ttl = ttl;
        }
    }

    /// Mean RTT; undefined until something answered
    pub fn avg_rtt(&self) -> Option<Duration> {
        u32::try_from(self.received)
            .ok()
            .filter(|&n| n > 0)
            .map(|n| self.total_rtt / n)
    }

    pub fn min_rtt_opt(&self) -> Option<Duration> {
        (self.received > 0).then_some(self.min_rtt)
    }

    pub fn max_rtt_opt(&self) -> Option<Duration> {
        (self.received > 0).then_some(self.max_rtt)
    }

    /// Loss percentage
    pub fn loss_pct(&self) -> f64 {
        if self.sent == 0 {
            0.0
        } else {
            (1.0 - (self.received as f64 / self.sent as f64)) * 100.0
        }
    }
}

fn as_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// What happened to one attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptStatus {
    Reply,
    Timeout,
    Error,
}

/// Per-attempt log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub sequence: u16,
    pub status: AttemptStatus,
    #[serde(with = "option_duration_serde")]
    pub rtt: Option<Duration>,
    pub ttl: Option<u8>,
    pub source: Option<Ipv4Addr>,
    pub bytes: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AttemptRecord {
    fn from_outcome(sequence: u16, outcome: &Outcome) -> Self {
        let mut record = Self {
            sequence,
            status: AttemptStatus::Timeout,
            rtt: None,
            ttl: None,
            source: None,
            bytes: None,
            error: None,
        };
        match outcome {
            Outcome::Reply(reply) => {
                record.status = AttemptStatus::Reply;
                record.rtt = Some(reply.delay);
                record.ttl = reply.ttl;
                record.source = Some(reply.source);
                record.bytes = Some(reply.bytes);
            }
            Outcome::Timeout => {}
            Outcome::Error(e) => {
                record.status = AttemptStatus::Error;
                record.error = Some(e.to_string());
            }
        }
        record
    }

    pub fn rtt_ms(&self) -> Option<f64> {
        self.rtt.map(as_ms)
    }
}

/// Serializable result of a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub host: String,
    pub destination_ip: Ipv4Addr,
    pub protocol: ProbeProtocol,
    pub sent: u64,
    pub received: u64,
    /// Percentage of attempts without a reply
    pub packet_loss: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_rtt: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_rtt: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_rtt: Option<f64>,
    pub ttl: Option<u8>,
}

/// A probing session against one destination.
///
/// Owns its statistics and strategy; nothing is shared between sessions.
pub struct Session {
    pub target: Target,
    pub config: Config,
    pub started_at: DateTime<Utc>,
    pub stats: SessionStats,
    pub attempts: Vec<AttemptRecord>,
    state: SessionState,
    sequence: u16,
    strategy: Box<dyn ProbeStrategy>,
}

impl Session {
    /// Create a session using the strategy selected by `config`
    pub fn new(target: Target, config: Config) -> Result<Self> {
        let strategy = build_strategy(&config, target.resolved)?;
        Ok(Self::with_strategy(target, config, strategy))
    }

    /// Create a session around an existing strategy
    pub fn with_strategy(target: Target, config: Config, strategy: Box<dyn ProbeStrategy>) -> Self {
        Self {
            target,
            config,
            started_at: Utc::now(),
            stats: SessionStats::default(),
            attempts: Vec::new(),
            state: SessionState::Idle,
            sequence: 0,
            strategy,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn protocol(&self) -> ProbeProtocol {
        self.strategy.protocol()
    }

    /// Run until `count` attempts or `deadline` of attempt time is used up
    pub fn run(&mut self, count: Option<u64>, deadline: Option<Duration>) -> Result<SessionStats> {
        self.run_with(count, deadline, |_, _| {})
    }

    /// Like [`Session::run`], calling `observe` after every attempt
    pub fn run_with<F>(
        &mut self,
        count: Option<u64>,
        deadline: Option<Duration>,
        mut observe: F,
    ) -> Result<SessionStats>
    where
        F: FnMut(u16, &Outcome),
    {
        if self.state == SessionState::Done {
            return Err(ProbeError::SessionFinished);
        }
        self.state = SessionState::Running;
        self.started_at = Utc::now();

        let count = count.filter(|&c| c > 0);
        let run_once = count.is_none() && deadline.is_none();
        let mut made = 0u64;
        let mut elapsed = Duration::ZERO;

        tracing::debug!(
            dest = %self.target.resolved,
            protocol = %self.strategy.protocol(),
            ?count,
            ?deadline,
            "session started"
        );

        loop {
            let sequence = self.sequence;
            let started = Instant::now();
            let outcome = match self.strategy.attempt(sequence) {
                Ok(outcome) => outcome,
                Err(e) => {
                    self.state = SessionState::Done;
                    tracing::debug!(error = %e, "session aborted");
                    return Err(e);
                }
            };
            elapsed += started.elapsed();

            self.record(sequence, &outcome);
            observe(sequence, &outcome);

            self.sequence = self.sequence.wrapping_add(1);
            made += 1;

            if run_once
                || count.is_some_and(|c| made >= c)
                || deadline.is_some_and(|d| elapsed >= d)
            {
                break;
            }

            // Lost attempts observe no delay and wait the full interval
            let delay = outcome.reply().map_or(Duration::ZERO, |r| r.delay);
            let pause = self.config.interval.saturating_sub(delay);
            if !pause.is_zero() {
                thread::sleep(pause);
            }
        }

        self.state = SessionState::Done;
        tracing::debug!(
            sent = self.stats.sent,
            received = self.stats.received,
            "session finished"
        );
        Ok(self.stats.clone())
    }

    /// Make exactly one attempt and hand back its outcome.
    ///
    /// Statistics and the attempt log are updated as in [`Session::run`]; the
    /// session is `Done` afterwards.
    pub fn run_single(&mut self) -> Result<Outcome> {
        if self.state == SessionState::Done {
            return Err(ProbeError::SessionFinished);
        }
        self.state = SessionState::Running;
        self.started_at = Utc::now();

        let sequence = self.sequence;
        let attempt = self.strategy.attempt(sequence);
        self.state = SessionState::Done;

        let outcome = attempt?;
        self.record(sequence, &outcome);
        self.sequence = self.sequence.wrapping_add(1);
        Ok(outcome)
    }

    fn record(&mut self, sequence: u16, outcome: &Outcome) {
        self.stats.record_sent();
        match outcome {
            Outcome::Reply(reply) => {
                self.stats.record_response(reply.delay, reply.ttl);
                tracing::debug!(seq = sequence, rtt_ms = reply.delay_ms(), ttl = ?reply.ttl, "reply");
            }
            Outcome::Timeout => tracing::debug!(seq = sequence, "timeout"),
            Outcome::Error(e) => tracing::warn!(seq = sequence, error = %e, "attempt failed"),
        }
        self.attempts.push(AttemptRecord::from_outcome(sequence, outcome));
    }

    /// Statistics in the serializable result shape (delays in milliseconds)
    pub fn summary(&self) -> Summary {
        Summary {
            host: self.target.original.clone(),
            destination_ip: self.target.resolved,
            protocol: self.strategy.protocol(),
            sent: self.stats.sent,
            received: self.stats.received,
            packet_loss: self.stats.loss_pct(),
            min_rtt: self.stats.min_rtt_opt().map(as_ms),
            max_rtt: self.stats.max_rtt_opt().map(as_ms),
            avg_rtt: self.stats.avg_rtt().map(as_ms),
            ttl: self.stats.ttl,
        }
    }
}

/// Serde helper for Duration
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        // Duration::MAX does not fit in u64 micros
        u64::try_from(duration.as_micros())
            .unwrap_or(u64::MAX)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let micros = u64::deserialize(deserializer)?;
        Ok(Duration::from_micros(micros))
    }
}

mod option_duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration
            .map(|d| u64::try_from(d.as_micros()).unwrap_or(u64::MAX))
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_micros))
    }
}
