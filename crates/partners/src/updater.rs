use std::{collections::BTreeMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;

use fis_core::types::{FlightNotification, Partner};

/// Outbound contract for pushing committed flight changes to an external
/// system. Implementations must tolerate redelivery of the same
/// `event_id`: the outbox delivers at least once.
#[async_trait]
pub trait StatusUpdater: Send + Sync {
    fn partner(&self) -> Partner;

    async fn push(&self, notification: &FlightNotification) -> Result<(), NotifyError>;
}

/// Errors produced while notifying a partner.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("failed to build url: {0}")]
    Url(#[from] url::ParseError),
    #[error("failed to initialize request signer")]
    Signing,
    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("partner did not answer within {0:?}")]
    Timeout(Duration),
    #[error("no updater configured for {0}")]
    NotConfigured(Partner),
}

impl NotifyError {
    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Url(_) => "url",
            Self::Signing => "signing",
            Self::Encode(_) => "encode",
            Self::Http(_) => "http",
            Self::Status { .. } => "status",
            Self::Timeout(_) => "timeout",
            Self::NotConfigured(_) => "not_configured",
        }
    }
}

/// Updaters keyed by the partner they serve.
#[derive(Clone, Default)]
pub struct NotifierSet {
    updaters: BTreeMap<Partner, Arc<dyn StatusUpdater>>,
}

impl NotifierSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an updater, replacing any previous one for the same partner.
    pub fn with(mut self, updater: Arc<dyn StatusUpdater>) -> Self {
        self.updaters.insert(updater.partner(), updater);
        self
    }

    pub fn get(&self, partner: Partner) -> Option<Arc<dyn StatusUpdater>> {
        self.updaters.get(&partner).cloned()
    }

    /// Configured partners, in a stable order.
    pub fn partners(&self) -> impl Iterator<Item = Partner> + '_ {
        self.updaters.keys().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.updaters.is_empty()
    }
}
