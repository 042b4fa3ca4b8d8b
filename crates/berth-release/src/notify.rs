//! Admin notification seam. Delivery is best-effort everywhere: a
//! failed notification is logged and swallowed, never propagated.

use async_trait::async_trait;
use tracing::warn;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, subject: &str, body: &str) -> anyhow::Result<()>;
}

/// Fallback notifier that only emits a structured log line. Used when
/// no transport is configured.
#[derive(Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, subject: &str, body: &str) -> anyhow::Result<()> {
        warn!(subject = %subject, body = %body, "admin notification");
        Ok(())
    }
}
