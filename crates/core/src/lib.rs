pub mod browser;
pub mod domain;
pub mod error;
pub mod extract;
pub mod notify;
pub mod pipeline;
pub mod resolve;
pub mod store;

pub mod config {
    use anyhow::Context;

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub telegram_bot_token: Option<String>,
        pub firebase_service_account: Option<String>,
        pub firestore_project_id: Option<String>,
        pub firestore_emulator_host: Option<String>,
        pub target_user_id: Option<String>,
        pub target_url: Option<String>,
        pub sentry_dsn: Option<String>,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            Ok(Self {
                telegram_bot_token: non_empty_var("TELEGRAM_BOT_TOKEN"),
                firebase_service_account: non_empty_var("FIREBASE_SERVICE_ACCOUNT"),
                firestore_project_id: non_empty_var("FIRESTORE_PROJECT_ID"),
                firestore_emulator_host: non_empty_var("FIRESTORE_EMULATOR_HOST"),
                target_user_id: non_empty_var("TARGET_USER_ID"),
                target_url: non_empty_var("TARGET_URL"),
                sentry_dsn: non_empty_var("SENTRY_DSN"),
            })
        }

        pub fn require_firebase_service_account(&self) -> anyhow::Result<&str> {
            self.firebase_service_account
                .as_deref()
                .context("FIREBASE_SERVICE_ACCOUNT is required")
        }
    }

    fn non_empty_var(key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|s| !s.trim().is_empty())
    }

    pub(crate) fn env_u64(key: &str) -> Option<u64> {
        std::env::var(key).ok().and_then(|s| s.trim().parse::<u64>().ok())
    }

    pub(crate) fn env_bool(key: &str) -> Option<bool> {
        std::env::var(key).ok().map(|s| {
            matches!(
                s.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
    }

    pub(crate) fn env_string(key: &str) -> Option<String> {
        non_empty_var(key)
    }
}
