//! Notification sink (`spec.md` §4.7): fire-and-forget delivery of
//! operational events. Mirrors the shape of the teacher's outbound
//! messaging adapters (e.g. `adapters::outbound::messaging::WebsocketBroadcaster`)
//! — a thin struct wrapping the actual transport, behind the port trait so
//! the engine and reconciler never know which sink they're talking to.

use tracing::{error, info, warn};

use crate::ports::{NotificationSink, Severity};

/// Default sink: every notification is logged at a level matching its
/// severity. Serves single-tenant mode directly and, in multi-tenant mode,
/// doubles as the fallback any future webhook/chat adapter would wrap —
/// notification failures must never propagate (`spec.md` §4.7), and a log
/// line never fails.
pub struct LoggingNotificationSink;

#[async_trait::async_trait]
impl NotificationSink for LoggingNotificationSink {
    async fn notify(&self, tenant_id: Option<&str>, title: &str, body: &str, severity: Severity) {
        match severity {
            Severity::Info => info!(tenant = ?tenant_id, title, body, "notification"),
            Severity::Warning => warn!(tenant = ?tenant_id, title, body, "notification"),
            Severity::Critical => error!(tenant = ?tenant_id, title, body, "notification"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn notify_never_panics_on_any_severity() {
        let sink = LoggingNotificationSink;
        sink.notify(Some("acct-a"), "t", "b", Severity::Info).await;
        sink.notify(None, "t", "b", Severity::Warning).await;
        sink.notify(Some("acct-a"), "t", "b", Severity::Critical).await;
    }
}
