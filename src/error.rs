use crate::state::DesiredState;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: DesiredState, to: DesiredState },

    #[error("State changed underneath: expected {expected}, found {actual}")]
    StateConflict {
        expected: DesiredState,
        actual: DesiredState,
    },

    #[error("Launch failed: {reason}")]
    LaunchFailed { reason: String },

    #[error("Shutdown incomplete: {running} task(s) still running after {deadline:?}")]
    ShutdownIncomplete { running: u32, deadline: Duration },

    #[error("State store error: {0}")]
    Store(#[from] StoreError),

    #[error("Cluster error: {0}")]
    Cluster(#[from] ClusterError),

    #[error("Probe unavailable: {0}")]
    Probe(#[from] ProbeError),

    #[error("Notification error: {0}")]
    Notify(#[from] NotifyError),

    #[error("System error: {message}")]
    System { message: String },

    #[error("Component error in {component}: {message}")]
    Component { component: String, message: String },
}

impl ControllerError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn component(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Component {
            component: component.into(),
            message: message.into(),
        }
    }

    pub fn launch_failed<S: Into<String>>(reason: S) -> Self {
        Self::LaunchFailed {
            reason: reason.into(),
        }
    }

    /// Whether the failed operation may succeed if attempted again later
    pub fn is_recoverable(&self) -> bool {
        match self {
            ControllerError::Config(_) | ControllerError::InvalidTransition { .. } => false,
            ControllerError::Store(e) => e.is_recoverable(),
            _ => true,
        }
    }
}

/// Errors raised by a [`crate::store::StateStore`] backend
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to read state from {location}: {details}")]
    Read { location: String, details: String },

    #[error("Failed to write state to {location}: {details}")]
    Write { location: String, details: String },

    #[error("Corrupt state record: {details}")]
    Corrupt { details: String },

    #[error("State lock unavailable: {details}")]
    Lock { details: String },

    #[error("Backend error: {details}")]
    Backend { details: String },
}

impl StoreError {
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, StoreError::Corrupt { .. })
    }
}

/// Errors raised by a [`crate::cluster::ClusterController`]
#[derive(Error, Debug, Clone)]
pub enum ClusterError {
    #[error("Scale request to {desired} rejected: {details}")]
    ScaleRejected { desired: u32, details: String },

    #[error("Failed to describe service {service}: {details}")]
    Describe { service: String, details: String },

    #[error("Service {service} not found in cluster {cluster}")]
    ServiceNotFound { cluster: String, service: String },

    #[error("Command `{command}` failed: {details}")]
    Command { command: String, details: String },

    #[error("Unparseable running count: {output}")]
    InvalidCount { output: String },
}

/// Errors raised by an [`crate::probe::ActivityProbe`]
#[derive(Error, Debug, Clone)]
pub enum ProbeError {
    #[error("Failed to connect to {address}: {details}")]
    Connect { address: String, details: String },

    #[error("Authentication rejected by {address}")]
    AuthRejected { address: String },

    #[error("Probe timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("Malformed probe response: {details}")]
    Protocol { details: String },

    #[error("Probe unavailable: {details}")]
    Unavailable { details: String },
}

/// Errors raised by a [`crate::notify::NotificationChannel`]
#[derive(Error, Debug, Clone)]
pub enum NotifyError {
    #[error("Request to {channel} failed: {details}")]
    Request { channel: String, details: String },

    #[error("{channel} returned status {status}: {body}")]
    Status {
        channel: String,
        status: u16,
        body: String,
    },

    #[error("Channel {channel} is misconfigured: {details}")]
    Misconfigured { channel: String, details: String },

    #[error("Event bus closed")]
    ChannelClosed,

    #[error("Publish failed: {details}")]
    PublishFailed { details: String },
}

pub type Result<T> = std::result::Result<T, ControllerError>;
