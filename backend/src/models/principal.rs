//! The actor on whose behalf an operation runs.

use std::net::IpAddr;

use serde::Serialize;
use uuid::Uuid;

/// Requesting principal. Permission checks happen before the core is called;
/// the principal is carried for attribution only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Principal {
    /// `None` for operator or system initiated actions.
    pub user_id: Option<Uuid>,
    pub ip: Option<IpAddr>,
}

impl Principal {
    pub fn user(user_id: Uuid) -> Self {
        Self {
            user_id: Some(user_id),
            ip: None,
        }
    }

    pub fn system() -> Self {
        Self::default()
    }

    pub fn with_ip(mut self, ip: IpAddr) -> Self {
        self.ip = Some(ip);
        self
    }
}
