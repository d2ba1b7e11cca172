//! Readiness probe.

use std::fmt;

use serde::Serialize;
use tracing::{info, warn};

use crate::session::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Readiness {
    Ready,
    NotReady,
}

impl Readiness {
    pub fn is_ready(self) -> bool {
        self == Readiness::Ready
    }
}

impl fmt::Display for Readiness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Readiness::Ready => f.write_str("ready"),
            Readiness::NotReady => f.write_str("not-ready"),
        }
    }
}

/// Asks one server whether its cache is loaded.
///
/// Fails closed: a transport error, timeout or non-success status all read as `NotReady`.
pub async fn probe(session: &dyn Session, marker: &str) -> Readiness {
    let server = session.server();
    match session.determine().await {
        Ok(body) => {
            let readiness = if body.contains(marker) {
                Readiness::Ready
            } else {
                Readiness::NotReady
            };
            info!(server = %server.label(), %readiness, "readiness determined");
            readiness
        }
        Err(e) => {
            warn!(server = %server.label(), error = %e, "readiness check failed, treating as not ready");
            Readiness::NotReady
        }
    }
}
