//! Notifier capability
//!
//! Every terminal or high-severity condition produces a notifier message.
//! Delivery is best-effort with a short deadline; a notifier failure is
//! logged and never blocks a trading decision.

use crate::config::NotifierConfig;
use crate::core::NotifyError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

const NOTIFY_TIMEOUT: Duration = Duration::from_secs(5);

/// A capability to deliver one line of text to a human.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, text: &str) -> Result<(), NotifyError>;
}

/// Writes notifications to the process log only. Used when no transport is
/// configured and as the floor under every other notifier.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, text: &str) -> Result<(), NotifyError> {
        info!(target: "notify", "{text}");
        Ok(())
    }
}

/// Telegram bot transport.
pub struct TelegramNotifier {
    http: reqwest::Client,
    bot_token: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(bot_token: impl Into<String>, chat_id: impl Into<String>) -> Result<Self, NotifyError> {
        let http = reqwest::Client::builder()
            .timeout(NOTIFY_TIMEOUT)
            .build()
            .map_err(|e| NotifyError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            bot_token: bot_token.into(),
            chat_id: chat_id.into(),
        })
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, text: &str) -> Result<(), NotifyError> {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);
        let response = self
            .http
            .post(&url)
            .form(&[("chat_id", self.chat_id.as_str()), ("text", text)])
            .send()
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(NotifyError::Rejected(response.status().as_u16()));
        }
        Ok(())
    }
}

/// Fans a message out to several transports; succeeds if any one does.
pub struct CompositeNotifier {
    targets: Vec<Arc<dyn Notifier>>,
}

impl CompositeNotifier {
    pub fn new(targets: Vec<Arc<dyn Notifier>>) -> Self {
        Self { targets }
    }
}

#[async_trait]
impl Notifier for CompositeNotifier {
    async fn send(&self, text: &str) -> Result<(), NotifyError> {
        let mut delivered = false;
        for target in &self.targets {
            match target.send(text).await {
                Ok(()) => delivered = true,
                Err(e) => warn!("notifier target failed: {e}"),
            }
        }
        if delivered {
            Ok(())
        } else {
            Err(NotifyError::Transport("all notifier targets failed".into()))
        }
    }
}

/// Build the notifier stack from configuration: Telegram when configured,
/// always backed by the process log.
pub fn build_notifier(config: &NotifierConfig) -> Arc<dyn Notifier> {
    let mut targets: Vec<Arc<dyn Notifier>> = vec![Arc::new(LogNotifier)];
    if let (Some(token), Some(chat_id)) =
        (&config.telegram_bot_token, &config.telegram_chat_id)
    {
        match TelegramNotifier::new(token.clone(), chat_id.clone()) {
            Ok(telegram) => targets.push(Arc::new(telegram)),
            Err(e) => warn!("telegram notifier disabled: {e}"),
        }
    }
    Arc::new(CompositeNotifier::new(targets))
}

/// Fire-and-log helper for code paths where a notification must never turn
/// into a control-flow error.
pub async fn notify_best_effort(notifier: &dyn Notifier, text: &str) {
    if let Err(e) = notifier.send(text).await {
        error!("notification lost ({e}): {text}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Failing;

    #[async_trait]
    impl Notifier for Failing {
        async fn send(&self, _text: &str) -> Result<(), NotifyError> {
            Err(NotifyError::Transport("down".into()))
        }
    }

    struct Counting(AtomicUsize);

    #[async_trait]
    impl Notifier for Counting {
        async fn send(&self, _text: &str) -> Result<(), NotifyError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn composite_succeeds_when_any_target_delivers() {
        let counter = Arc::new(Counting(AtomicUsize::new(0)));
        let composite = CompositeNotifier::new(vec![Arc::new(Failing), counter.clone()]);
        assert!(composite.send("hello").await.is_ok());
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn composite_fails_when_all_targets_fail() {
        let composite = CompositeNotifier::new(vec![Arc::new(Failing), Arc::new(Failing)]);
        assert!(composite.send("hello").await.is_err());
    }

    #[tokio::test]
    async fn best_effort_swallows_errors() {
        notify_best_effort(&Failing, "lost").await;
    }
}
