use clap::Parser;
use ordersheet_core::browser::chromium::ChromiumLauncher;
use ordersheet_core::browser::SessionOptions;
use ordersheet_core::extract::ExtractOptions;
use ordersheet_core::notify::telegram::TelegramNotifier;
use ordersheet_core::pipeline::{Pipeline, PipelineOptions, RunOutcome};
use ordersheet_core::resolve::{Resolver, ResolverOptions};
use ordersheet_core::store::firestore::FirestoreClient;
use ordersheet_core::store::RecordStore;
use std::process::ExitCode;
use tracing::Instrument;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "ordersheet_worker")]
struct Args {
    /// Build the order sheet and print it instead of sending it.
    #[arg(long)]
    dry_run: bool,

    /// Record id tried first during recipient resolution. Overrides TARGET_USER_ID.
    #[arg(long)]
    user_id: Option<String>,

    /// Simulator page URL. Overrides TARGET_URL.
    #[arg(long)]
    url: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();

    let settings = ordersheet_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();
    let run_id = uuid::Uuid::new_v4();

    let code = run(args, settings)
        .instrument(tracing::info_span!("ordersheet_run", %run_id))
        .await;
    Ok(ExitCode::from(code))
}

async fn run(args: Args, settings: ordersheet_core::config::Settings) -> u8 {
    // An unusable URL fails the attempt after resolution, inside the pipeline.
    let target_url = args.url.as_deref().or(settings.target_url.as_deref());
    let session = SessionOptions::from_env(target_url);

    // Resolution fails closed below when the store is unavailable.
    let store = match FirestoreClient::from_settings(&settings) {
        Ok(client) => Some(client),
        Err(err) => {
            tracing::warn!(error = %format!("{err:#}"), "record store not configured");
            sentry_anyhow::capture_anyhow(&err);
            None
        }
    };
    let target_id = args.user_id.as_deref().or(settings.target_user_id.as_deref());
    let resolver = store
        .as_ref()
        .map(|s| Resolver::new(s as &dyn RecordStore, ResolverOptions::from_env(target_id)));

    let notifier = match TelegramNotifier::from_settings(&settings) {
        Ok(n) => n,
        Err(err) => {
            tracing::error!(error = %format!("{err:#}"), "failed to build telegram client");
            sentry_anyhow::capture_anyhow(&err);
            return 1;
        }
    };
    let launcher = ChromiumLauncher::from_env();

    let opts = PipelineOptions {
        session,
        extract: ExtractOptions::from_env(),
        dry_run: args.dry_run,
    };

    let outcome = Pipeline::new(resolver, &launcher, &notifier, opts).run().await;

    match &outcome {
        RunOutcome::NoRecipient { reason } => {
            tracing::error!(%reason, "run aborted");
        }
        RunOutcome::BrowserFailed { kind, error, .. } => {
            sentry_anyhow::capture_anyhow(error);
            tracing::warn!(
                kind = kind.map(|k| k.as_str()).unwrap_or("unclassified"),
                "run finished without an order sheet"
            );
        }
        RunOutcome::Completed {
            recipient,
            message,
            delivery,
        } => {
            if args.dry_run {
                println!("{message}");
            }
            tracing::info!(
                recipient_id = %recipient.id,
                delivered = delivery.is_success(),
                ?delivery,
                "run finished"
            );
        }
    }

    outcome.exit_code()
}

fn init_sentry(settings: &ordersheet_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
