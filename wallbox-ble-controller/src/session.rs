//! Transaction engine: framed calls correlated with notified replies
//!
//! A [`Session`] owns the link for one connection. Notification chunks are
//! pumped into a channel that only the call currently waiting reads from, so
//! exactly one transaction is armed at a time and no state is shared with the
//! pump beyond the channel itself.

use std::time::Duration;

use futures::StreamExt;
use rand::Rng;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use wallbox_proto::ble::{LinkProfile, ProfileRegistry};
use wallbox_proto::{Accumulator, Call, Feed, REQUEST_ID_RANGE, status};

use crate::error::Result;
use crate::link::{Pairing, RadioLink};

/// How long a call waits for its reply
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);

const NOTIFICATION_BACKLOG: usize = 64;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub response_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
        }
    }
}

/// What a call produced
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// The `r` field of the matching reply (`null` when absent)
    Answered(Value),
    /// Nothing matching arrived within the response timeout
    NoResponse,
}

impl Reply {
    pub fn value(&self) -> Option<&Value> {
        match self {
            Reply::Answered(value) => Some(value),
            Reply::NoResponse => None,
        }
    }

    pub fn into_value(self) -> Option<Value> {
        match self {
            Reply::Answered(value) => Some(value),
            Reply::NoResponse => None,
        }
    }

    pub fn is_answered(&self) -> bool {
        matches!(self, Reply::Answered(_))
    }

    pub fn str_field(&self, field: &str) -> Option<&str> {
        self.value()?.get(field)?.as_str()
    }

    /// The `st` field of an `r_hup` reply
    pub fn status(&self) -> Option<&str> {
        self.str_field(status::FIELD)
    }
}

/// Anything that can run one method call to completion
#[async_trait::async_trait]
pub trait Transact: Send {
    async fn execute(&mut self, method: &str, params: Option<Value>) -> Result<Reply>;
}

/// One connection to a charger, bound to its link profile
pub struct Session<L> {
    link: L,
    profile: LinkProfile,
    config: SessionConfig,
    chunks: mpsc::Receiver<Vec<u8>>,
    accumulator: Accumulator,
    pump: JoinHandle<()>,
}

impl<L: RadioLink> Session<L> {
    /// Resolve the profile, pair if it asks for it, and arm notifications
    pub async fn connect(link: L, registry: &ProfileRegistry, config: SessionConfig) -> Result<Self> {
        let services = link.services().await?;
        let profile = registry.identify(&services)?.clone();
        tracing::info!(profile = profile.name, "identified link profile");

        if profile.pairing {
            match link.pair().await? {
                Pairing::Paired => tracing::debug!("link paired"),
                Pairing::NotApplicable => tracing::debug!("pairing not applicable on this platform"),
            }
        }

        let mut notifications = link.subscribe(profile.notify).await?;
        let (tx, chunks) = mpsc::channel(NOTIFICATION_BACKLOG);
        let pump = tokio::spawn(async move {
            while let Some(chunk) = notifications.next().await {
                tracing::trace!(len = chunk.len(), "notification chunk");
                if tx.send(chunk).await.is_err() {
                    break;
                }
            }
            tracing::debug!("notification stream ended");
        });

        Ok(Self {
            link,
            profile,
            config,
            chunks,
            accumulator: Accumulator::new(),
            pump,
        })
    }

    pub fn profile(&self) -> &LinkProfile {
        &self.profile
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Call `method` under a fresh random request id
    pub async fn execute(&mut self, method: &str, params: Option<Value>) -> Result<Reply> {
        let id = rand::thread_rng().gen_range(REQUEST_ID_RANGE);
        self.call(Call::with_params(method, params.unwrap_or(Value::Null), id)).await
    }

    /// Send an already built call and wait for the reply carrying its id
    pub async fn call(&mut self, call: Call) -> Result<Reply> {
        while self.chunks.try_recv().is_ok() {}
        self.accumulator.reset();

        let frame = call.encode()?;
        for chunk in wallbox_proto::chunks(&frame, self.profile.max_chunk) {
            self.link
                .write(self.profile.write, chunk, self.profile.write_mode)
                .await?;
        }
        tracing::debug!(method = %call.method, id = call.id, len = frame.len(), "call sent");

        let timeout = self.config.response_timeout;
        match tokio::time::timeout(timeout, self.wait_for(call.id)).await {
            Ok(Some(value)) => Ok(Reply::Answered(value)),
            Ok(None) => {
                tracing::warn!(method = %call.method, "notification stream closed before reply");
                Ok(Reply::NoResponse)
            }
            Err(_) => {
                tracing::warn!(method = %call.method, id = call.id, ?timeout, "no reply");
                Ok(Reply::NoResponse)
            }
        }
    }

    async fn wait_for(&mut self, id: u16) -> Option<Value> {
        while let Some(chunk) = self.chunks.recv().await {
            let mut feed = self.accumulator.feed(&chunk);
            while let Feed::Complete(response) = feed {
                if response.answers(id) {
                    return Some(response.result.unwrap_or(Value::Null));
                }
                tracing::debug!(other = ?response.id, id, "ignoring reply to another request");
                feed = self.accumulator.poll();
            }
        }
        None
    }

    pub async fn close(self) -> Result<()> {
        self.link.disconnect().await?;
        Ok(())
    }
}

impl<L> Drop for Session<L> {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

#[async_trait::async_trait]
impl<L: RadioLink> Transact for Session<L> {
    async fn execute(&mut self, method: &str, params: Option<Value>) -> Result<Reply> {
        Session::execute(self, method, params).await
    }
}

#[async_trait::async_trait]
impl<T: Transact + ?Sized> Transact for &mut T {
    async fn execute(&mut self, method: &str, params: Option<Value>) -> Result<Reply> {
        (**self).execute(method, params).await
    }
}
