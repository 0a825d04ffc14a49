use crate::browser::session::OrderSheetSession;
use crate::browser::{BrowserLauncher, PageDriver, SessionOptions};
use crate::domain::order_sheet::ExtractedMessage;
use crate::domain::recipient::Recipient;
use crate::error::{classify, FailureKind};
use crate::extract::{extract, ExtractOptions};
use crate::notify::{DeliveryResult, Notifier};
use crate::resolve::Resolver;
use anyhow::Context;

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub session: SessionOptions,
    pub extract: ExtractOptions,

    /// Build the message but do not hand it to the notifier.
    pub dry_run: bool,
}

#[derive(Debug)]
pub enum RunOutcome {
    /// Aborted before any browser was launched.
    NoRecipient { reason: String },
    /// The browser phase failed; nothing was sent.
    BrowserFailed {
        recipient: Recipient,
        kind: Option<FailureKind>,
        error: anyhow::Error,
    },
    Completed {
        recipient: Recipient,
        message: ExtractedMessage,
        delivery: DeliveryResult,
    },
}

impl RunOutcome {
    /// `1` only when no recipient could be resolved; every attempted run exits `0`.
    pub fn exit_code(&self) -> u8 {
        match self {
            RunOutcome::NoRecipient { .. } => 1,
            RunOutcome::BrowserFailed { .. } | RunOutcome::Completed { .. } => 0,
        }
    }
}

pub struct Pipeline<'a> {
    resolver: Option<Resolver<'a>>,
    launcher: &'a dyn BrowserLauncher,
    notifier: &'a dyn Notifier,
    opts: PipelineOptions,
}

impl<'a> Pipeline<'a> {
    /// `resolver` is `None` when the record store is not configured; such runs abort.
    pub fn new(
        resolver: Option<Resolver<'a>>,
        launcher: &'a dyn BrowserLauncher,
        notifier: &'a dyn Notifier,
        opts: PipelineOptions,
    ) -> Self {
        Self {
            resolver,
            launcher,
            notifier,
            opts,
        }
    }

    pub async fn run(&self) -> RunOutcome {
        let recipient = match self.resolve_recipient().await {
            Ok(recipient) => recipient,
            Err(reason) => {
                tracing::error!(%reason, "no recipient resolved; aborting before browser launch");
                return RunOutcome::NoRecipient { reason };
            }
        };

        let message = match self.browser_phase(&recipient).await {
            Ok(message) => message,
            Err(error) => {
                let kind = classify(&error);
                tracing::error!(
                    kind = kind.map(|k| k.as_str()).unwrap_or("unclassified"),
                    error = %format!("{error:#}"),
                    "browser phase failed; nothing delivered"
                );
                return RunOutcome::BrowserFailed {
                    recipient,
                    kind,
                    error,
                };
            }
        };

        let delivery = if self.opts.dry_run {
            tracing::info!("dry run; skipping delivery");
            DeliveryResult::Skipped {
                reason: "dry run".to_string(),
            }
        } else {
            self.notifier
                .send(&recipient.destination, &message.render_html())
                .await
        };

        if let DeliveryResult::Failed { detail } = &delivery {
            tracing::error!(
                kind = FailureKind::Delivery.as_str(),
                channel = self.notifier.channel_name(),
                %detail,
                "run finished without delivery"
            );
        }

        RunOutcome::Completed {
            recipient,
            message,
            delivery,
        }
    }

    async fn resolve_recipient(&self) -> Result<Recipient, String> {
        let Some(resolver) = &self.resolver else {
            return Err(format!(
                "{}: record store is not configured",
                FailureKind::Config.as_str()
            ));
        };

        match resolver.resolve().await {
            Ok(Some(resolved)) => {
                tracing::info!(
                    recipient_id = %resolved.recipient.id,
                    tier = ?resolved.tier,
                    "recipient resolved"
                );
                Ok(resolved.recipient)
            }
            Ok(None) => Err(format!(
                "{}: no record carries a destination",
                FailureKind::Resolution.as_str()
            )),
            Err(err) => Err(format!(
                "{}: {err:#}",
                FailureKind::Resolution.as_str()
            )),
        }
    }

    /// Launches the browser, drives it and extracts the message. The driver is closed on every
    /// path out of here.
    async fn browser_phase(&self, recipient: &Recipient) -> anyhow::Result<ExtractedMessage> {
        self.opts.session.validate_target()?;

        let driver = self
            .launcher
            .launch()
            .await
            .context("browser launch failed")?;

        let result = self.drive(driver.as_ref(), recipient).await;

        if let Err(err) = driver.close().await {
            tracing::warn!(error = %format!("{err:#}"), "browser close failed");
        }
        result
    }

    async fn drive(
        &self,
        driver: &dyn PageDriver,
        recipient: &Recipient,
    ) -> anyhow::Result<ExtractedMessage> {
        let mut session = OrderSheetSession::new(driver, &self.opts.session);
        session.open_order_sheet(&recipient.id).await?;

        let rules = self.opts.extract.rules();
        let message = extract(session.driver(), &rules).await?;
        session.finish();
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::fake::{FakeLauncher, FakePage};
    use crate::domain::recipient::StoredRecord;
    use crate::notify::recording::RecordingNotifier;
    use crate::notify::telegram::TelegramNotifier;
    use crate::resolve::ResolverOptions;
    use crate::store::memory::MemoryStore;
    use serde_json::{json, Value};
    use std::collections::BTreeMap;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn record(id: &str, v: Value) -> StoredRecord {
        StoredRecord::new(
            id,
            serde_json::from_value::<BTreeMap<String, Value>>(v).unwrap(),
        )
    }

    fn opts() -> PipelineOptions {
        let mut session = SessionOptions::new("https://sim.example.com/");
        session.navigation_timeout = Duration::from_millis(500);
        session.state_timeout = Duration::from_millis(100);
        session.modal_timeout = Duration::from_millis(100);
        session.poll_interval = Duration::from_millis(5);
        session.network_idle = Duration::from_millis(5);
        session.toggle_settle = Duration::from_millis(1);
        PipelineOptions {
            session,
            extract: ExtractOptions::default(),
            dry_run: false,
        }
    }

    fn healthy_store() -> MemoryStore {
        MemoryStore::new(vec![
            record("other", json!({"chatId": "7"})),
            record("owner", json!({"telegramChatId": "42"})),
        ])
    }

    #[tokio::test]
    async fn delivers_full_message_to_resolved_recipient() {
        let store = healthy_store();
        let launcher = FakeLauncher::new(FakePage::ready());
        let notifier = RecordingNotifier::default();
        let resolver = Resolver::new(&store, ResolverOptions::default());

        let outcome = Pipeline::new(Some(resolver), &launcher, &notifier, opts())
            .run()
            .await;

        assert_eq!(outcome.exit_code(), 0);
        assert!(matches!(
            &outcome,
            RunOutcome::Completed { delivery, .. } if delivery.is_success()
        ));
        let sent = notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "42");
        assert!(sent[0].1.starts_with("<b>📈 Daily Order Sheet</b>"));
        assert!(sent[0].1.contains("Seed: <b>150,001</b>"));
        assert!(!sent[0].1.contains("Copy Text"));
        assert!(launcher.page.closed.load(Ordering::SeqCst));
        assert!(launcher.page.called("identity"));
    }

    #[tokio::test]
    async fn no_usable_record_exits_one_without_launching() {
        let store = MemoryStore::new(vec![record("a", json!({"chatId": ""}))]);
        let launcher = FakeLauncher::new(FakePage::ready());
        let notifier = RecordingNotifier::default();
        let resolver = Resolver::new(&store, ResolverOptions::default());

        let outcome = Pipeline::new(Some(resolver), &launcher, &notifier, opts())
            .run()
            .await;

        assert!(matches!(outcome, RunOutcome::NoRecipient { .. }));
        assert_eq!(outcome.exit_code(), 1);
        assert_eq!(launcher.launches.load(Ordering::SeqCst), 0);
        assert!(notifier.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unconfigured_store_exits_one_without_launching() {
        let launcher = FakeLauncher::new(FakePage::ready());
        let notifier = RecordingNotifier::default();

        let outcome = Pipeline::new(None, &launcher, &notifier, opts()).run().await;

        assert_eq!(outcome.exit_code(), 1);
        assert_eq!(launcher.launches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn readiness_timeout_skips_delivery_and_releases_browser() {
        let store = healthy_store();
        let mut page = FakePage::ready();
        page.ready_after_polls = None;
        let launcher = FakeLauncher::new(page);
        let notifier = RecordingNotifier::default();
        let resolver = Resolver::new(&store, ResolverOptions::default());

        let outcome = Pipeline::new(Some(resolver), &launcher, &notifier, opts())
            .run()
            .await;

        match &outcome {
            RunOutcome::BrowserFailed { kind, .. } => {
                assert_eq!(*kind, Some(FailureKind::StateTimeout))
            }
            other => panic!("expected browser failure, got {other:?}"),
        }
        assert_eq!(outcome.exit_code(), 0);
        assert!(notifier.sent.lock().unwrap().is_empty());
        assert!(launcher.page.closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn navigation_timeout_skips_delivery_and_releases_browser() {
        let store = healthy_store();
        let mut page = FakePage::ready();
        page.goto_hangs = true;
        let launcher = FakeLauncher::new(page);
        let notifier = RecordingNotifier::default();
        let resolver = Resolver::new(&store, ResolverOptions::default());

        let outcome = Pipeline::new(Some(resolver), &launcher, &notifier, opts())
            .run()
            .await;

        assert!(matches!(
            &outcome,
            RunOutcome::BrowserFailed {
                kind: Some(FailureKind::NavigationTimeout),
                ..
            }
        ));
        assert_eq!(outcome.exit_code(), 0);
        assert!(notifier.sent.lock().unwrap().is_empty());
        assert!(launcher.page.closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn unusable_target_url_fails_the_attempt_without_launching() {
        let store = healthy_store();
        let launcher = FakeLauncher::new(FakePage::ready());
        let notifier = RecordingNotifier::default();
        let resolver = Resolver::new(&store, ResolverOptions::default());
        let mut o = opts();
        o.session.target_url = String::new();

        let outcome = Pipeline::new(Some(resolver), &launcher, &notifier, o).run().await;

        assert!(matches!(
            &outcome,
            RunOutcome::BrowserFailed {
                kind: Some(FailureKind::Config),
                ..
            }
        ));
        assert_eq!(outcome.exit_code(), 0);
        assert_eq!(launcher.launches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn absent_result_object_sends_body_only() {
        let store = healthy_store();
        let mut page = FakePage::ready();
        page.summary = Value::Null;
        let launcher = FakeLauncher::new(page);
        let notifier = RecordingNotifier::default();
        let resolver = Resolver::new(&store, ResolverOptions::default());

        let outcome = Pipeline::new(Some(resolver), &launcher, &notifier, opts())
            .run()
            .await;

        assert_eq!(outcome.exit_code(), 0);
        let sent = notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1.contains("AAPL  190.10  5"));
        assert!(!sent[0].1.contains("Seed"));
    }

    #[tokio::test]
    async fn missing_delivery_credential_still_exits_zero() {
        let store = healthy_store();
        let launcher = FakeLauncher::new(FakePage::ready());
        let notifier =
            TelegramNotifier::new(None, "https://api.telegram.org", Duration::from_secs(1))
                .unwrap();
        let resolver = Resolver::new(&store, ResolverOptions::default());

        let outcome = Pipeline::new(Some(resolver), &launcher, &notifier, opts())
            .run()
            .await;

        assert!(matches!(
            &outcome,
            RunOutcome::Completed {
                delivery: DeliveryResult::Skipped { .. },
                ..
            }
        ));
        assert_eq!(outcome.exit_code(), 0);
    }

    #[tokio::test]
    async fn dry_run_builds_message_without_sending() {
        let store = healthy_store();
        let launcher = FakeLauncher::new(FakePage::ready());
        let notifier = RecordingNotifier::default();
        let resolver = Resolver::new(&store, ResolverOptions::default());
        let mut o = opts();
        o.dry_run = true;

        let outcome = Pipeline::new(Some(resolver), &launcher, &notifier, o).run().await;

        assert!(matches!(&outcome, RunOutcome::Completed { message, .. } if message.summary().is_some()));
        assert!(notifier.sent.lock().unwrap().is_empty());
    }
}
