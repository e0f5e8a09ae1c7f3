/// Receives client-side navigation side effects, such as sending a doctor
/// whose account is still pending approval to their dashboard.
pub trait Navigator: Send + Sync {
    fn redirect(&self, path: &str);
}

/// Navigator that only traces the redirect.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopNavigator;

impl Navigator for NoopNavigator {
    fn redirect(&self, path: &str) {
        tracing::debug!(target: "careers_http", path, "redirect requested");
    }
}
