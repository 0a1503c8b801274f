//! Error types for an autoscaling run
//!
//! Only configuration and authentication failures abort a run. Everything
//! else is caught where it happens and turned into an abstention, an empty
//! result or a [`ScaleEvent::Error`](crate::decision::ScaleEvent::Error).

use thiserror::Error;

use crate::cloud::CloudError;

/// Result type alias for autoscaler operations
pub type AutoscaleResult<T> = Result<T, AutoscaleError>;

#[derive(Debug, Error)]
pub enum AutoscaleError {
    /// Missing or invalid group or key; fatal before any remote call
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Credentials rejected or identity service unreachable; fatal
    #[error("authentication failed: {0}")]
    Auth(String),

    /// A single remote lookup failed; callers treat it as "no data"
    #[error("remote lookup failed for {what}: {source}")]
    RemoteLookup {
        what: String,
        #[source]
        source: CloudError,
    },

    /// Every configured plugin abstained
    #[error("no data available from any plugin")]
    NoData,

    /// Master election could not classify this node
    #[error("cluster state is indeterminate")]
    ElectionIndeterminate,

    /// The remote execute-policy call failed
    #[error("unable to execute policy {policy_id}: {source}")]
    PolicyExecution {
        policy_id: String,
        #[source]
        source: CloudError,
    },

    /// A webhook could not be delivered; always logged only
    #[error("webhook delivery to {url} failed: {reason}")]
    WebhookDelivery { url: String, reason: String },
}

impl AutoscaleError {
    pub fn config(message: impl ToString) -> Self {
        AutoscaleError::Config(message.to_string())
    }

    pub fn remote(what: impl ToString, source: CloudError) -> Self {
        AutoscaleError::RemoteLookup {
            what: what.to_string(),
            source,
        }
    }

    /// Whether this error must abort the process before any decision is made.
    pub fn is_fatal(&self) -> bool {
        matches!(self, AutoscaleError::Config(_) | AutoscaleError::Auth(_))
    }
}
