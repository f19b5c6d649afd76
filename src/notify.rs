//! License lifecycle events for the notification collaborator.
//!
//! This core only emits structured payloads on an in-process channel.
//! Delivery mechanics (webhook retry, signing) belong to the notification
//! component consuming the other end.

use chrono::Utc;
use serde::Serialize;
use strum::AsRefStr;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::models::License;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LicenseEventKind {
    Created,
    Renewed,
    Suspended,
    Reactivated,
    StatusChanged,
}

#[derive(Debug, Clone, Serialize)]
pub struct LicenseEvent {
    pub kind: LicenseEventKind,
    pub license_id: String,
    pub user_id: String,
    pub product_id: String,
    pub timestamp: i64,
}

#[derive(Clone)]
pub struct Notifier {
    tx: Option<UnboundedSender<LicenseEvent>>,
}

impl Notifier {
    pub fn new() -> (Self, UnboundedReceiver<LicenseEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A notifier that drops every event. For tests and one-shot CLI runs.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: LicenseEvent) {
        if let Some(ref tx) = self.tx
            && tx.send(event).is_err()
        {
            tracing::warn!("notification channel closed; event dropped");
        }
    }

    pub fn license_created(&self, license: &License) {
        self.emit_kind(LicenseEventKind::Created, license);
    }

    pub fn license_renewed(&self, license: &License) {
        self.emit_kind(LicenseEventKind::Renewed, license);
    }

    pub fn license_status_changed(&self, license: &License, suspended: bool, reactivated: bool) {
        let kind = if suspended {
            LicenseEventKind::Suspended
        } else if reactivated {
            LicenseEventKind::Reactivated
        } else {
            LicenseEventKind::StatusChanged
        };
        self.emit_kind(kind, license);
    }

    fn emit_kind(&self, kind: LicenseEventKind, license: &License) {
        self.emit(LicenseEvent {
            kind,
            license_id: license.id.clone(),
            user_id: license.user_id.clone(),
            product_id: license.product_id.clone(),
            timestamp: Utc::now().timestamp(),
        });
    }
}

/// Drain loop for the serve path: logs each event as it would be handed to
/// the notification collaborator.
pub async fn drain_events(mut rx: UnboundedReceiver<LicenseEvent>) {
    while let Some(event) = rx.recv().await {
        tracing::info!(
            kind = event.kind.as_ref(),
            license_id = %event.license_id,
            product_id = %event.product_id,
            "license event"
        );
    }
}
