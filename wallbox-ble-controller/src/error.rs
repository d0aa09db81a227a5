use serde_json::Value;
use uuid::Uuid;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Frame(#[from] wallbox_proto::FrameError),

    #[error(transparent)]
    NoMatchingProfile(#[from] wallbox_proto::ble::NoMatchingProfile),

    #[error(transparent)]
    Link(#[from] LinkError),

    #[error(transparent)]
    Provisioning(#[from] ProvisioningError),

    #[error("no Bluetooth adapter found")]
    NoAdapter,

    #[error("no Wallbox found{}", .0.as_deref().map(|t| format!(" matching {t:?}")).unwrap_or_default())]
    DeviceNotFound(Option<String>),
}

/// Failures of the radio link underneath a session
#[derive(thiserror::Error, Debug)]
pub enum LinkError {
    #[error("bluetooth: {0}")]
    Ble(#[from] btleplug::Error),

    #[error("characteristic {0} not found on peer")]
    CharacteristicNotFound(Uuid),

    #[error("timed out during {operation}")]
    Timeout { operation: &'static str },
}

#[derive(thiserror::Error, Debug)]
pub enum ProvisioningError {
    /// `s_hup` did not hand back a network name
    #[error("charger did not enter access-point mode (reply: {response})")]
    NoCredentials { response: Value },

    /// Only raised when a poll ceiling is configured
    #[error("gave up waiting for status {wanted:?} after {polls} polls (last status: {last:?})")]
    PollLimit {
        wanted: &'static str,
        last: Option<String>,
        polls: u32,
    },
}
