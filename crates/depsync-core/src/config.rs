// ── Controller configuration ──

/// Runtime settings for a [`DepsController`](crate::DepsController).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Name used in log fields to tell several controllers apart.
    pub label: String,

    /// Re-fetch the snapshot when the broadcast channel reports that
    /// notifications may have been missed (lag or reconnect).
    pub resync_on_notice: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            label: "depsync".into(),
            resync_on_notice: true,
        }
    }
}
