//! Seams to the host application's UI.

use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum ToastLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// Side channel to the user. Every call is fire-and-forget except
/// [`Notifier::confirm_overwrite`], which waits for the user's answer.
pub trait Notifier: Send + Sync {
    fn login_dialog(
        &self,
        title: &str,
        machine_id: &str,
        client_key: &str,
    );

    fn toast(
        &self,
        level: ToastLevel,
        content: &str,
    );

    fn payment_dialog(
        &self,
        template_id: &str,
        title: &str,
    );

    /// Asks whether an already published template may be replaced.
    fn confirm_overwrite(
        &self,
        template_id: &str,
    ) -> bool;

    fn clear_user_info(&self);
}

/// Notifier for headless use: logs every message, declines every question.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn login_dialog(
        &self,
        title: &str,
        machine_id: &str,
        client_key: &str,
    ) {
        info!("login required: {} (machine {}, client key {})", title, machine_id, client_key);
    }

    fn toast(
        &self,
        level: ToastLevel,
        content: &str,
    ) {
        match level {
            ToastLevel::Warning | ToastLevel::Error => warn!("[{}] {}", level.as_ref(), content),
            ToastLevel::Info | ToastLevel::Success => info!("[{}] {}", level.as_ref(), content),
        }
    }

    fn payment_dialog(
        &self,
        template_id: &str,
        title: &str,
    ) {
        warn!("payment required for template {}: {}", template_id, title);
    }

    fn confirm_overwrite(
        &self,
        template_id: &str,
    ) -> bool {
        warn!("template {} already exists, not overwriting", template_id);
        false
    }

    fn clear_user_info(&self) {
        info!("user info cleared");
    }
}

/// The host's "was the running operation interrupted" check.
pub trait Interrupt: Send + Sync {
    fn interrupted(&self) -> bool;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NeverInterrupted;

impl Interrupt for NeverInterrupted {
    fn interrupted(&self) -> bool {
        false
    }
}

impl<F> Interrupt for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn interrupted(&self) -> bool {
        self()
    }
}
