//! Firmware provisioning workflow
//!
//! Drives a charger from idle to a finished update:
//!
//! 1. `s_hup` puts it in access-point mode and hands back Wi-Fi credentials
//! 2. `s_deb` announces the package (name, MD5, size)
//! 3. one `r_hup` checks it is ready to receive (`recv`), best effort
//! 4. the package is pushed over TCP on the hotspot (or uploaded out of band)
//! 5. `r_hup` is polled until `proc`, then until `done`
//!
//! Only a failed access-point setup aborts. Everything after it is logged and
//! the workflow moves on, since the charger reports its own progress.

use std::fmt;
use std::time::Duration;

use serde_json::{Value, json};

use wallbox_proto::{methods, status};

use crate::bulk::{self, ACK_TOKEN, TransferOutcome};
use crate::error::{ProvisioningError, Result};
use crate::session::Transact;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_TRANSFER_TIMEOUT: Duration = Duration::from_secs(120);

/// File name the charger expects in the announcement
pub const DEFAULT_PACKAGE_NAME: &str = "software.tar.gz";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Phase {
    #[default]
    Idle,
    ApSetup,
    Announce,
    AwaitReady,
    Transfer,
    Processing,
    Done,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::ApSetup => "ap_setup",
            Phase::Announce => "announce",
            Phase::AwaitReady => "await_ready",
            Phase::Transfer => "transfer",
            Phase::Processing => "processing",
            Phase::Done => "done",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hotspot details returned by `s_hup`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WifiCredentials {
    pub ssid: String,
    pub pass: Option<String>,
    pub ip: Option<String>,
    pub port: Option<u16>,
}

impl WifiCredentials {
    /// `None` unless the reply names a network
    pub fn from_reply(value: &Value) -> Option<Self> {
        let text = |key: &str| value.get(key).and_then(Value::as_str).map(str::to_string);

        // the charger sends the port as a string
        let port = value.get("port").and_then(|p| match p {
            Value::String(s) => s.trim().parse().ok(),
            Value::Number(n) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
            _ => None,
        });

        Some(Self {
            ssid: text("ssid")?,
            pass: text("pass"),
            ip: text("ip"),
            port,
        })
    }
}

/// Metadata sent with `s_deb`; trusted as given
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    pub name: String,
    /// Lowercase hex MD5 of the package
    pub md5: String,
    pub size: u64,
}

impl Announcement {
    pub fn params(&self) -> Value {
        json!({
            "deb": self.name,
            "md5": self.md5,
            "size": self.size.to_string(),
        })
    }
}

/// What to install
#[derive(Debug, Clone)]
pub struct Package {
    pub announcement: Announcement,
    /// `None` when the operator uploads the file themselves
    pub payload: Option<Vec<u8>>,
}

impl Package {
    pub fn with_payload(announcement: Announcement, payload: Vec<u8>) -> Self {
        Self { announcement, payload: Some(payload) }
    }

    pub fn external(announcement: Announcement) -> Self {
        Self { announcement, payload: None }
    }
}

#[derive(Debug, Clone)]
pub struct ProvisionConfig {
    pub poll_interval: Duration,
    /// Ceiling per polling stage; `None` polls for as long as the update takes
    pub max_polls: Option<u32>,
    pub transfer_timeout: Duration,
    pub ack_token: Vec<u8>,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_polls: None,
            transfer_timeout: DEFAULT_TRANSFER_TIMEOUT,
            ack_token: ACK_TOKEN.to_vec(),
        }
    }
}

/// State of one provisioning run
#[derive(Debug, Clone, Default)]
pub struct ProvisioningSession {
    pub phase: Phase,
    /// Last `st` value the charger reported
    pub last_status: Option<String>,
    pub credentials: Option<WifiCredentials>,
    /// Outcome of the bulk transfer, when one completed
    pub transfer: Option<TransferOutcome>,
    /// Phases in the order they were entered
    pub history: Vec<Phase>,
}

/// Hook run once the charger is ready to receive, before the bulk transfer
#[async_trait::async_trait]
pub trait Handoff: Send {
    /// `external` is set when nothing will be pushed and the operator uploads
    async fn ready_for_transfer(&mut self, _credentials: &WifiCredentials, _external: bool) {}
}

impl Handoff for () {}

pub struct Provisioner<T> {
    transact: T,
    config: ProvisionConfig,
    state: ProvisioningSession,
}

impl<T: Transact> Provisioner<T> {
    pub fn new(transact: T, config: ProvisionConfig) -> Self {
        Self {
            transact,
            config,
            state: ProvisioningSession::default(),
        }
    }

    pub fn state(&self) -> &ProvisioningSession {
        &self.state
    }

    pub fn into_inner(self) -> T {
        self.transact
    }

    /// Run the whole workflow; returns the final state on success
    pub async fn run<H: Handoff>(&mut self, package: &Package, handoff: &mut H) -> Result<ProvisioningSession> {
        let credentials = self.setup_access_point().await?;
        self.announce(&package.announcement).await?;
        self.await_ready().await?;

        handoff
            .ready_for_transfer(&credentials, package.payload.is_none())
            .await;

        self.enter(Phase::Transfer);
        match &package.payload {
            Some(payload) => self.transfer(&credentials, payload).await,
            None => tracing::info!(ssid = %credentials.ssid, "waiting for an out-of-band upload"),
        }

        self.poll_until(status::PROCESSING).await?;
        self.enter(Phase::Processing);

        self.poll_until(status::DONE).await?;
        self.enter(Phase::Done);

        Ok(self.state.clone())
    }

    async fn setup_access_point(&mut self) -> Result<WifiCredentials> {
        self.enter(Phase::ApSetup);
        let reply = self.transact.execute(methods::SET_HOTSPOT, None).await?;

        let credentials = reply.value().and_then(WifiCredentials::from_reply);
        let Some(credentials) = credentials else {
            return Err(ProvisioningError::NoCredentials {
                response: reply.into_value().unwrap_or(Value::Null),
            }
            .into());
        };

        tracing::info!(ssid = %credentials.ssid, ip = ?credentials.ip, port = ?credentials.port, "access point up");
        self.state.credentials = Some(credentials.clone());
        Ok(credentials)
    }

    async fn announce(&mut self, announcement: &Announcement) -> Result<()> {
        self.enter(Phase::Announce);
        let reply = self
            .transact
            .execute(methods::ANNOUNCE_PACKAGE, Some(announcement.params()))
            .await?;
        tracing::debug!(?reply, name = %announcement.name, size = announcement.size, "package announced");
        Ok(())
    }

    async fn await_ready(&mut self) -> Result<()> {
        self.enter(Phase::AwaitReady);
        let reply = self.transact.execute(methods::READ_HOTSPOT, None).await?;
        self.observe(reply.status());

        if reply.status() != Some(status::RECEIVED) {
            tracing::warn!(status = ?reply.status(), "charger not ready to receive, continuing anyway");
        }
        Ok(())
    }

    async fn transfer(&mut self, credentials: &WifiCredentials, payload: &[u8]) {
        let (Some(ip), Some(port)) = (credentials.ip.as_deref(), credentials.port) else {
            tracing::warn!(?credentials, "no address for bulk transfer, skipping");
            return;
        };

        let result = bulk::send_file(ip, port, payload, &self.config.ack_token, self.config.transfer_timeout).await;
        match result {
            Ok(TransferOutcome::Acknowledged) => {
                tracing::info!(len = payload.len(), "package received by charger");
                self.state.transfer = Some(TransferOutcome::Acknowledged);
            }
            Ok(outcome @ TransferOutcome::UnexpectedReply(_)) => {
                tracing::warn!(?outcome, "charger did not acknowledge the package");
                self.state.transfer = Some(outcome);
            }
            Err(e) => tracing::warn!(error = %e, "bulk transfer failed"),
        }
    }

    async fn poll_until(&mut self, wanted: &'static str) -> Result<()> {
        let mut polls = 0u32;
        loop {
            let reply = self.transact.execute(methods::READ_HOTSPOT, None).await?;
            self.observe(reply.status());
            polls += 1;

            if reply.status() == Some(wanted) {
                return Ok(());
            }

            if self.config.max_polls.is_some_and(|max| polls >= max) {
                return Err(ProvisioningError::PollLimit {
                    wanted,
                    last: self.state.last_status.clone(),
                    polls,
                }
                .into());
            }

            tracing::debug!(wanted, status = ?reply.status(), polls, "still waiting");
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    fn observe(&mut self, status: Option<&str>) {
        if let Some(status) = status {
            self.state.last_status = Some(status.to_string());
        }
    }

    fn enter(&mut self, phase: Phase) {
        tracing::info!(from = %self.state.phase, to = %phase, "provisioning phase");
        self.state.phase = phase;
        self.state.history.push(phase);
    }
}
