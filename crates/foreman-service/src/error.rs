//! Error types for services and reconcile passes.

use serde::Serialize;
use thiserror::Error;

/// Failure of one named service during a reconcile pass.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("Construction failed: {0}")]
    Construction(String),

    #[error("Startup failed: {0}")]
    Startup(String),

    #[error("Reconfigure failed: {0}")]
    Reconfigure(String),

    #[error("Stop failed: {0}")]
    Stop(String),

    #[error("Service not found: {0}")]
    NotFound(String),
}

impl ServiceError {
    /// The lifecycle step this error belongs to.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Construction(_) => FailureKind::Construction,
            Self::Startup(_) => FailureKind::Startup,
            Self::Reconfigure(_) => FailureKind::Reconfigure,
            Self::Stop(_) => FailureKind::Stop,
            Self::NotFound(_) => FailureKind::NotFound,
        }
    }
}

/// Serializable tag of a [`ServiceError`], used in reconcile reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    Construction,
    Startup,
    Reconfigure,
    Stop,
    NotFound,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Construction => write!(f, "construction"),
            Self::Startup => write!(f, "startup"),
            Self::Reconfigure => write!(f, "reconfigure"),
            Self::Stop => write!(f, "stop"),
            Self::NotFound => write!(f, "notfound"),
        }
    }
}

/// Failure of a whole reconcile pass. No service was touched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    #[error("Reconcile aborted: {0}")]
    Aborted(String),

    #[error("A reconfiguration is already in progress")]
    InProgress,
}
