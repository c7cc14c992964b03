use anyhow::Context;
use clap::Parser;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use surge_core::domain::Session;
use surge_core::error::PipelineError;
use surge_core::ingest::kis::KisClient;
use surge_core::ingest::provider::{HttpConstituentSource, HttpJsonDataProvider};
use surge_core::ingest::{ConstituentSource, MarketDataProvider};
use surge_core::pipeline::PipelineConfig;
use surge_core::time::kr_market::{self, CalendarProvider, StaticHolidayCalendar};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod output;
mod universe;

const DEFAULT_HTTP_INDEXES: &str = "kospi200,kosdaq150";

#[derive(Debug, Parser)]
#[command(name = "surge_worker")]
struct Args {
    /// Market as-of date (YYYY-MM-DD). Defaults to today's KST date, or
    /// yesterday before the 16:00 KST close cutoff.
    #[arg(long)]
    as_of_date: Option<String>,

    /// Evaluation window: morning | afternoon.
    #[arg(long)]
    session: Session,

    /// Artifact directory. Falls back to OUTPUT_DIR, then ./out.
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Print the report to stdout; write neither the artifact nor the database.
    #[arg(long)]
    dry_run: bool,
}

/// Upstream wiring chosen by `DATA_PROVIDER`.
struct Upstream {
    provider: Arc<dyn MarketDataProvider>,
    calendar: Arc<dyn CalendarProvider>,
    sources: Vec<Box<dyn ConstituentSource>>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = surge_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();

    let result = run(&settings, &args).await;
    if let Err(err) = &result {
        sentry_anyhow::capture_anyhow(err);
        let fatal = err
            .downcast_ref::<PipelineError>()
            .is_some_and(PipelineError::is_fatal);
        tracing::error!(session = %args.session, fatal, error = %format!("{err:#}"), "surge run failed");
    }
    result
}

async fn run(settings: &surge_core::config::Settings, args: &Args) -> anyhow::Result<()> {
    let upstream = build_upstream(settings)?;
    let config = PipelineConfig::from_env();
    let output_dir = args
        .output_dir
        .clone()
        .or_else(|| settings.output_dir.as_ref().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("out"));

    let job = Job {
        args,
        upstream: &upstream,
        config: &config,
        output_dir,
        database_url: settings.database_url.as_deref(),
    };

    tokio::select! {
        res = with_deadline(config.run_timeout, job.run()) => res,
        _ = tokio::signal::ctrl_c() => anyhow::bail!("interrupted; no artifact written"),
    }
}

/// Fails with [`PipelineError::Timeout`] once `work` overruns `limit`. The
/// work future is dropped at that point, so nothing is written afterwards.
async fn with_deadline<T>(
    limit: Duration,
    work: impl Future<Output = anyhow::Result<T>>,
) -> anyhow::Result<T> {
    match tokio::time::timeout(limit, work).await {
        Ok(res) => res,
        Err(_) => Err(PipelineError::Timeout(limit).into()),
    }
}

/// One session run, from date resolution to the published artifact.
struct Job<'a> {
    args: &'a Args,
    upstream: &'a Upstream,
    config: &'a PipelineConfig,
    output_dir: PathBuf,
    database_url: Option<&'a str>,
}

impl Job<'_> {
    async fn run(&self) -> anyhow::Result<()> {
        let session = self.args.session;

        let requested = match self.args.as_of_date.as_deref() {
            Some(s) => chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .with_context(|| format!("invalid --as-of-date `{s}` (expected YYYY-MM-DD)"))?,
            None => kr_market::default_requested_date(chrono::Utc::now())?,
        };
        let as_of_date = kr_market::resolve_trading_day(self.upstream.calendar.as_ref(), requested).await;
        if as_of_date != requested {
            tracing::info!(%requested, %as_of_date, "requested date is not a session; using previous session");
        }

        // The database is optional; without it only the artifact is written.
        let pool = match self.database_url {
            Some(db_url) if !self.args.dry_run => {
                let pool = sqlx::postgres::PgPoolOptions::new()
                    .max_connections(5)
                    .connect(db_url)
                    .await
                    .context("connect DATABASE_URL failed")?;
                surge_core::storage::migrate(&pool).await?;

                let acquired =
                    surge_core::storage::lock::try_acquire_run_lock(&pool, as_of_date, session).await?;
                if !acquired {
                    tracing::warn!(%as_of_date, %session, "run lock not acquired; another run in progress");
                    return Ok(());
                }
                Some(pool)
            }
            _ => None,
        };

        // On timeout the pool is dropped with this future; closing its
        // sessions releases the advisory lock.
        let outcome = self.execute(as_of_date, pool.as_ref()).await;

        if let Some(pool) = &pool {
            let _ = surge_core::storage::lock::release_run_lock(pool, as_of_date, session).await;
        }
        outcome
    }

    async fn execute(&self, as_of_date: chrono::NaiveDate, pool: Option<&sqlx::PgPool>) -> anyhow::Result<()> {
        let session = self.args.session;

        let universe_opts = universe::UniverseOptions::from_env();
        let members = universe::load_universe(&self.upstream.sources, &universe_opts).await?;
        let report = surge_core::pipeline::run_session(
            Arc::clone(&self.upstream.provider),
            &members,
            as_of_date,
            session,
            self.config,
        )
        .await?;

        if self.args.dry_run {
            let json = serde_json::to_string_pretty(&report).context("serialize selection report failed")?;
            println!("{json}");
            tracing::info!(%as_of_date, %session, dry_run = true, picks = report.items.len(), "dry run finished");
            return Ok(());
        }

        let provider_name = self.upstream.provider.provider_name();
        let path = output::publish(&self.output_dir, &report, || async {
            if let Some(pool) = pool {
                let selection_id =
                    surge_core::storage::selections::persist_report(pool, &report, provider_name).await?;
                tracing::info!(%as_of_date, %session, %selection_id, "persisted selection");
            }
            Ok::<(), anyhow::Error>(())
        })
        .await?;
        tracing::info!(%as_of_date, %session, path = %path.display(), "wrote selection artifact");

        Ok(())
    }
}

fn build_upstream(settings: &surge_core::config::Settings) -> anyhow::Result<Upstream> {
    let static_calendar = std::env::var("CALENDAR_PROVIDER")
        .map(|s| s.trim().eq_ignore_ascii_case("static"))
        .unwrap_or(false);

    let upstream = match settings.data_provider.as_str() {
        "http" => {
            let http = HttpJsonDataProvider::from_settings(settings)?;
            let indexes = std::env::var("UNIVERSE_INDEXES").unwrap_or_else(|_| DEFAULT_HTTP_INDEXES.to_string());
            let sources = indexes
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|index| Box::new(HttpConstituentSource::new(http.clone(), index)) as Box<dyn ConstituentSource>)
                .collect();
            let http = Arc::new(http);
            Upstream {
                provider: http.clone(),
                calendar: http,
                sources,
            }
        }
        _ => {
            let kis = Arc::new(KisClient::from_settings_prod(settings)?);
            let sources = kis
                .markets()
                .iter()
                .map(|m| Box::new(kis.master_source(*m)) as Box<dyn ConstituentSource>)
                .collect();
            Upstream {
                provider: kis.clone(),
                calendar: kis,
                sources,
            }
        }
    };

    if static_calendar {
        return Ok(Upstream {
            calendar: Arc::new(StaticHolidayCalendar::from_env()),
            ..upstream
        });
    }
    Ok(upstream)
}

fn init_sentry(settings: &surge_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_cli_arguments() {
        let args = Args::try_parse_from([
            "surge_worker",
            "--session",
            "afternoon",
            "--as-of-date",
            "2026-01-27",
            "--dry-run",
        ])
        .unwrap();
        assert_eq!(args.session, Session::Afternoon);
        assert_eq!(args.as_of_date.as_deref(), Some("2026-01-27"));
        assert!(args.dry_run);
        assert!(args.output_dir.is_none());
    }

    #[test]
    fn session_is_required_and_validated() {
        assert!(Args::try_parse_from(["surge_worker"]).is_err());
        assert!(Args::try_parse_from(["surge_worker", "--session", "evening"]).is_err());
    }

    /// Never answers within a test's patience.
    struct StalledProvider;

    #[async_trait::async_trait]
    impl MarketDataProvider for StalledProvider {
        fn provider_name(&self) -> &'static str {
            "stalled"
        }

        async fn fetch_daily_bars(
            &self,
            _tickers: &[String],
            _start: chrono::NaiveDate,
            _end: chrono::NaiveDate,
        ) -> anyhow::Result<std::collections::BTreeMap<String, Vec<surge_core::domain::DailyBar>>> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(Default::default())
        }

        async fn fetch_market_caps(
            &self,
            _tickers: &[String],
            _as_of_date: chrono::NaiveDate,
        ) -> anyhow::Result<std::collections::BTreeMap<String, f64>> {
            Ok(Default::default())
        }
    }

    struct SingleTicker;

    #[async_trait::async_trait]
    impl ConstituentSource for SingleTicker {
        fn source_name(&self) -> String {
            "single".to_string()
        }

        async fn fetch_constituents(&self) -> anyhow::Result<Vec<surge_core::ingest::Constituent>> {
            Ok(vec![surge_core::ingest::Constituent {
                ticker: "005930".to_string(),
                name: "삼성전자".to_string(),
            }])
        }
    }

    #[tokio::test]
    async fn overrunning_job_times_out_without_artifact() {
        let args = Args::try_parse_from(["surge_worker", "--session", "morning", "--as-of-date", "2026-01-27"])
            .unwrap();
        let upstream = Upstream {
            provider: Arc::new(StalledProvider),
            calendar: Arc::new(kr_market::WeekdayCalendar),
            sources: vec![Box::new(SingleTicker)],
        };
        let config = PipelineConfig::default();
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let output_dir = std::env::temp_dir().join(format!("surge_worker_timeout_{}_{nanos}", std::process::id()));

        let job = Job {
            args: &args,
            upstream: &upstream,
            config: &config,
            output_dir: output_dir.clone(),
            database_url: None,
        };

        let limit = Duration::from_millis(50);
        let err = with_deadline(limit, job.run()).await.unwrap_err();
        let pipeline_err = err.downcast_ref::<PipelineError>().unwrap();
        assert!(matches!(pipeline_err, PipelineError::Timeout(d) if *d == limit));
        assert!(pipeline_err.is_fatal());
        assert!(!output_dir.exists());
    }

    #[tokio::test]
    async fn deadline_passes_through_finished_work() {
        let out = with_deadline(Duration::from_secs(5), async { Ok::<_, anyhow::Error>(7) })
            .await
            .unwrap();
        assert_eq!(out, 7);
    }
}
