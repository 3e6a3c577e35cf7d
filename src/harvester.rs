//! The harvest run: attempts, the page-state gates inside an attempt, and the
//! pagination loop that feeds candidates through filter and emitter.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use rand::Rng;
use serde::Serialize;
use sqlx::PgPool;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::browser::{BrowserLauncher, ChromeLauncher, PageDriver};
use crate::classify::{self, PageClassification, PageVerdict};
use crate::config::{HarvestConfig, HarvestTuning, RuntimeSettings};
use crate::cookies;
use crate::db::PgSink;
use crate::dom::DomSnapshot;
use crate::error::HarvestError;
use crate::extract;
use crate::filter::{Admission, CrawlState};
use crate::output::{self, RunSummary};
use crate::session::{IdentityPool, Session, SessionEvent, SessionPool};
use crate::sink::{DatasetSink, JsonlSink, TeeSink};
use crate::site;

const LOAD_MORE_PATTERN: &str = "see more|more results|show more|next";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    TargetReached,
    Stalled,
    Idle,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunOutcome {
    Completed {
        stop: StopReason,
    },
    /// The site refused the identity. Not an error.
    Rejected {
        classification: PageClassification,
        evidence: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub summary: RunSummary,
    pub attempts: u32,
    pub outcome: RunOutcome,
}

enum AttemptOutcome {
    Finished(StopReason),
    Rejected(PageVerdict),
}

/// Rendered containers dropping below half of what we have already seen means the
/// page stopped growing.
pub fn is_stalled(rendered: usize, seen: usize) -> bool {
    rendered * 2 < seen
}

fn jittered(base: Duration, jitter: Duration) -> Duration {
    let extra = jitter.as_millis() as u64;
    if extra == 0 {
        return base;
    }
    base + Duration::from_millis(rand::thread_rng().gen_range(0..extra))
}

pub struct Harvester<L: BrowserLauncher> {
    config: HarvestConfig,
    tuning: HarvestTuning,
    launcher: L,
    pool: Arc<dyn IdentityPool>,
    sink: Arc<dyn DatasetSink>,
}

impl<L: BrowserLauncher> Harvester<L> {
    pub fn new(
        config: HarvestConfig,
        tuning: HarvestTuning,
        launcher: L,
        pool: Arc<dyn IdentityPool>,
        sink: Arc<dyn DatasetSink>,
    ) -> Self {
        Self {
            config,
            tuning,
            launcher,
            pool,
            sink,
        }
    }

    /// Runs attempts until one finishes or is rejected, then pushes the summary.
    /// The summary is pushed even when every attempt failed.
    pub async fn run(&self) -> Result<RunReport> {
        let mut state = CrawlState::for_config(&self.config);
        let mut attempts = 0;
        let mut last_error: Option<anyhow::Error> = None;
        let mut outcome = None;

        info!(
            query = %self.config.query,
            max_results = self.config.max_results,
            authenticated = self.config.authenticated(),
            "🔎 Starting harvest"
        );

        while attempts < self.tuning.max_attempts {
            attempts += 1;
            if attempts > 1 {
                info!("🔄 Retry attempt {}/{}...", attempts, self.tuning.max_attempts);
                sleep(self.tuning.retry_delay).await;
            }

            let mut session = self.pool.acquire().await.context("acquiring a session")?;
            let secs = self.tuning.attempt_timeout.as_secs();
            let result = match timeout(
                self.tuning.attempt_timeout,
                self.attempt(&mut session, &mut state),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(HarvestError::AttemptTimeout { secs }.into()),
            };

            match result {
                Ok(AttemptOutcome::Finished(stop)) => {
                    self.pool.release(session).await?;
                    info!(
                        total = state.total_emitted(),
                        ?stop,
                        "✅ Attempt {}/{} finished",
                        attempts,
                        self.tuning.max_attempts
                    );
                    outcome = Some(RunOutcome::Completed { stop });
                    break;
                }
                Ok(AttemptOutcome::Rejected(verdict)) => {
                    session.apply(SessionEvent::PageRejected);
                    if self.config.session.retire_on_blocked {
                        self.pool.retire(session).await?;
                    } else {
                        self.pool.release(session).await?;
                    }
                    outcome = Some(RunOutcome::Rejected {
                        classification: verdict.classification,
                        evidence: verdict.evidence,
                    });
                    break;
                }
                Err(e) => {
                    error!(
                        "❌ Attempt {}/{} failed: {:#}",
                        attempts, self.tuning.max_attempts, e
                    );
                    session.error_count += 1;
                    self.pool.release(session).await?;
                    last_error = Some(e);
                }
            }
        }

        let summary = RunSummary::new(&self.config, &state);
        self.sink
            .push_summary(&summary)
            .await
            .context("pushing run summary")?;

        match outcome {
            Some(outcome) => Ok(RunReport {
                summary,
                attempts,
                outcome,
            }),
            None => Err(HarvestError::AttemptsExhausted {
                attempts,
                last_error: last_error
                    .map(|e| format!("{:#}", e))
                    .unwrap_or_else(|| "no attempt was made".to_string()),
            }
            .into()),
        }
    }

    async fn attempt(&self, session: &mut Session, state: &mut CrawlState) -> Result<AttemptOutcome> {
        let page = self.launcher.launch(session).await?;
        let pacing = self.tuning.pacing;

        if self.config.authenticated() {
            let first_application = session.claim_cookie_application();
            if first_application {
                session.cookie_jar = self.config.cookies.clone();
                session.apply(SessionEvent::CookiesApplied);
            }
            page.add_cookies(&session.cookie_jar)
                .await
                .context("injecting cookies")?;
            if first_application {
                let visible = page.visible_cookies(site::HOME_URL).await?;
                for warning in cookies::audit_visible_cookies(&visible, Utc::now().timestamp()) {
                    warn!(session = %session.id, "🍪 {}", warning);
                }
            }

            page.navigate(site::HOME_URL).await?;
            sleep(pacing.initial_settle).await;
            let url = page.current_url().await?;
            let html = page.html().await?;
            let verdict = {
                let snapshot = DomSnapshot::parse(url, &html);
                classify::classify_home(snapshot.url(), &snapshot.root())
            };
            if !verdict.classification.is_accessible() {
                warn!(
                    session = %session.id,
                    evidence = %verdict.evidence,
                    "🚫 Homepage says {}",
                    verdict.classification
                );
                return Ok(AttemptOutcome::Rejected(verdict));
            }
            session.apply(SessionEvent::AuthVerified);
            info!(session = %session.id, "🔐 Session authenticated");
        }

        page.navigate(&site::search_url(&self.config.query)).await?;
        sleep(pacing.initial_settle).await;
        let url = page.current_url().await?;
        let html = page.html().await?;
        let verdict = {
            let snapshot = DomSnapshot::parse(url, &html);
            let containers = snapshot.result_containers().len();
            classify::classify_search(snapshot.url(), &snapshot.root(), containers)
        };
        if !verdict.classification.is_accessible() {
            warn!(
                session = %session.id,
                evidence = %verdict.evidence,
                "🚫 Search page says {}",
                verdict.classification
            );
            return Ok(AttemptOutcome::Rejected(verdict));
        }

        let stop = self.paginate(&page, state).await?;
        Ok(AttemptOutcome::Finished(stop))
    }

    async fn paginate(&self, page: &L::Page, state: &mut CrawlState) -> Result<StopReason> {
        let pacing = self.tuning.pacing;
        let mut idle_rounds = 0;

        loop {
            if state.target_reached() {
                return Ok(StopReason::TargetReached);
            }

            let url = page.current_url().await?;
            let html = page.html().await?;
            let candidates = {
                let snapshot = DomSnapshot::parse(url, &html);
                extract::extract_candidates(&snapshot)
            };

            let mut accepted = 0;
            for item in candidates {
                if state.target_reached() {
                    break;
                }
                let now = Utc::now();
                match state.admit(&item, now.timestamp()) {
                    Admission::Accept { url } => {
                        let post = output::assemble_post(item, url, now);
                        output::emit(self.sink.as_ref(), state, post)
                            .await
                            .context("pushing post")?;
                        accepted += 1;
                    }
                    Admission::Reject(reason) => {
                        debug!(url = ?item.url, %reason, "Skipped candidate");
                    }
                }
            }
            info!(
                accepted,
                total = state.total_emitted(),
                max = state.max_results(),
                "📦 Batch processed"
            );

            if state.target_reached() {
                return Ok(StopReason::TargetReached);
            }
            idle_rounds = if accepted == 0 { idle_rounds + 1 } else { 0 };
            if idle_rounds >= self.tuning.max_idle_rounds {
                info!(idle_rounds, "Nothing new for a while, stopping");
                return Ok(StopReason::Idle);
            }

            page.scroll_to_bottom().await?;
            sleep(jittered(pacing.scroll_base, pacing.scroll_jitter)).await;
            if page.activate_first_matching(LOAD_MORE_PATTERN).await? {
                debug!("Clicked a load-more control");
                sleep(jittered(pacing.load_more_base, pacing.load_more_jitter)).await;
            }

            let url = page.current_url().await?;
            let html = page.html().await?;
            let rendered = DomSnapshot::parse(url, &html).result_containers().len();
            if is_stalled(rendered, state.seen_count()) {
                info!(rendered, seen = state.seen_count(), "Result list stalled, stopping");
                return Ok(StopReason::Stalled);
            }
        }
    }
}

/// One run against real Chrome: JSON-lines dataset under `DATASET_DIR`, mirrored into
/// Postgres when a pool is given.
pub async fn harvest_with_chrome(
    settings: &RuntimeSettings,
    db: Option<PgPool>,
    run_id: Uuid,
    config: HarvestConfig,
    pool_state_path: PathBuf,
) -> Result<RunReport> {
    let jsonl = JsonlSink::create(settings.dataset_dir.join(format!("{run_id}.jsonl"))).await?;
    info!(run = %run_id, dataset = %jsonl.path().display(), "📝 Writing dataset");
    let sink: Arc<dyn DatasetSink> = match db {
        Some(pool) => Arc::new(TeeSink::new(vec![
            Box::new(jsonl),
            Box::new(PgSink::new(pool, run_id)),
        ])),
        None => Arc::new(jsonl),
    };

    let pool = SessionPool::open(&config.session, config.proxies.clone(), pool_state_path).await?;
    let identities = pool.len().await;
    debug!(identities, "Session pool ready");
    let launcher = ChromeLauncher {
        headless: settings.headless,
    };

    Harvester::new(config, settings.tuning.clone(), launcher, Arc::new(pool), sink)
        .run()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    use anyhow::anyhow;
    use async_trait::async_trait;
    use serde_json::json;

    use crate::config::{HarvestInput, Pacing};
    use crate::output::Post;
    use crate::cookies::{NormalizedCookie, VisibleCookie};
    use crate::session::SessionLifecycle;
    use crate::sink::MemorySink;

    const FEED_HOME: &str = r#"<html><body><div role="feed"><p>Welcome back</p></div></body></html>"#;
    const LOGIN_FORM: &str = r#"<form id="login_form" action="/login/"><input name="pass" type="password"></form>"#;

    fn article(id: u64) -> String {
        format!(
            r#"<article><header><a href="/author{id}">Author {id}</a></header>
               <a href="/somepage/posts/{id}">link</a>
               <div dir="auto"><p>Post number {id}</p></div>
               <span>{id} comments</span></article>"#,
            id = 1_000_000 + id
        )
    }

    fn page_of(ids: std::ops::RangeInclusive<u64>) -> String {
        let body: String = ids.map(article).collect();
        format!("<html><body>{body}</body></html>")
    }

    #[derive(Clone, Default)]
    struct Script {
        home_html: String,
        search_batches: Vec<String>,
        visible_cookies: Vec<VisibleCookie>,
        hang: bool,
        load_more: bool,
    }

    #[derive(Default)]
    struct Log {
        launches: u32,
        navigations: Vec<String>,
        cookie_injections: Vec<usize>,
        load_more_lookups: u32,
        load_more_clicks: u32,
    }

    struct FakeLauncher {
        script: Script,
        failing_launches: u32,
        log: Arc<StdMutex<Log>>,
    }

    struct FakePage {
        script: Script,
        url: StdMutex<String>,
        batch: StdMutex<usize>,
        log: Arc<StdMutex<Log>>,
    }

    #[async_trait]
    impl BrowserLauncher for FakeLauncher {
        type Page = FakePage;

        async fn launch(&self, _session: &Session) -> Result<FakePage> {
            let launches = {
                let mut log = self.log.lock().unwrap();
                log.launches += 1;
                log.launches
            };
            if launches <= self.failing_launches {
                return Err(anyhow!("chrome exited unexpectedly"));
            }
            Ok(FakePage {
                script: self.script.clone(),
                url: StdMutex::new(String::from("about:blank")),
                batch: StdMutex::new(0),
                log: self.log.clone(),
            })
        }
    }

    #[async_trait]
    impl PageDriver for FakePage {
        async fn navigate(&self, url: &str) -> Result<String> {
            if self.script.hang {
                sleep(Duration::from_secs(3600)).await;
            }
            self.log.lock().unwrap().navigations.push(url.to_string());
            *self.url.lock().unwrap() = url.to_string();
            *self.batch.lock().unwrap() = 0;
            Ok(url.to_string())
        }

        async fn current_url(&self) -> Result<String> {
            Ok(self.url.lock().unwrap().clone())
        }

        async fn html(&self) -> Result<String> {
            if *self.url.lock().unwrap() == site::HOME_URL {
                return Ok(self.script.home_html.clone());
            }
            let batches = &self.script.search_batches;
            let idx = (*self.batch.lock().unwrap()).min(batches.len().saturating_sub(1));
            Ok(batches.get(idx).cloned().unwrap_or_default())
        }

        async fn add_cookies(&self, cookies: &[NormalizedCookie]) -> Result<()> {
            self.log.lock().unwrap().cookie_injections.push(cookies.len());
            Ok(())
        }

        async fn visible_cookies(&self, _url: &str) -> Result<Vec<VisibleCookie>> {
            Ok(self.script.visible_cookies.clone())
        }

        async fn scroll_to_bottom(&self) -> Result<()> {
            *self.batch.lock().unwrap() += 1;
            Ok(())
        }

        async fn activate_first_matching(&self, _pattern: &str) -> Result<bool> {
            let mut log = self.log.lock().unwrap();
            log.load_more_lookups += 1;
            if !self.script.load_more {
                return Ok(false);
            }
            log.load_more_clicks += 1;
            *self.batch.lock().unwrap() += 1;
            Ok(true)
        }
    }

    #[derive(Default)]
    struct RecordingPool {
        released: StdMutex<Vec<Session>>,
        retired: StdMutex<Vec<Session>>,
    }

    #[async_trait]
    impl IdentityPool for RecordingPool {
        async fn acquire(&self) -> Result<Session> {
            Ok(Session::new(None))
        }

        async fn release(&self, session: Session) -> Result<()> {
            self.released.lock().unwrap().push(session);
            Ok(())
        }

        async fn retire(&self, session: Session) -> Result<()> {
            self.retired.lock().unwrap().push(session);
            Ok(())
        }
    }

    /// Refuses the first `failures` posts, then behaves like a `MemorySink`.
    struct FlakySink {
        inner: MemorySink,
        failures: StdMutex<u32>,
    }

    #[async_trait]
    impl DatasetSink for FlakySink {
        async fn push_post(&self, post: &Post) -> Result<()> {
            let refuse = {
                let mut left = self.failures.lock().unwrap();
                let refuse = *left > 0;
                *left = left.saturating_sub(1);
                refuse
            };
            if refuse {
                return Err(anyhow!("dataset write refused"));
            }
            self.inner.push_post(post).await
        }

        async fn push_summary(&self, summary: &RunSummary) -> Result<()> {
            self.inner.push_summary(summary).await
        }
    }

    struct Fixture {
        harvester: Harvester<FakeLauncher>,
        pool: Arc<RecordingPool>,
        sink: Arc<MemorySink>,
        log: Arc<StdMutex<Log>>,
    }

    fn tuning() -> HarvestTuning {
        HarvestTuning {
            attempt_timeout: Duration::from_secs(30),
            max_attempts: 3,
            max_idle_rounds: 3,
            retry_delay: Duration::ZERO,
            pacing: Pacing::instant(),
        }
    }

    fn fixture(input: serde_json::Value, script: Script, failing_launches: u32, tuning: HarvestTuning) -> Fixture {
        let config = config_for(input);
        let log = Arc::new(StdMutex::new(Log::default()));
        let pool = Arc::new(RecordingPool::default());
        let sink = Arc::new(MemorySink::default());
        let launcher = FakeLauncher {
            script,
            failing_launches,
            log: log.clone(),
        };
        Fixture {
            harvester: Harvester::new(config, tuning, launcher, pool.clone(), sink.clone()),
            pool,
            sink,
            log,
        }
    }

    fn config_for(input: serde_json::Value) -> HarvestConfig {
        let input: HarvestInput = serde_json::from_value(input).unwrap();
        HarvestConfig::from_input(input).unwrap()
    }

    fn search_script(batches: Vec<String>) -> Script {
        Script {
            search_batches: batches,
            ..Default::default()
        }
    }

    #[test]
    fn stall_heuristic() {
        assert!(is_stalled(40, 100));
        assert!(!is_stalled(50, 100));
        assert!(!is_stalled(0, 0));
        assert!(is_stalled(0, 1));
    }

    #[tokio::test]
    async fn anonymous_run_stops_mid_batch_at_target() {
        let f = fixture(
            json!({"query": "rust", "maxResults": 5}),
            search_script(vec![page_of(1..=3), page_of(1..=6)]),
            0,
            tuning(),
        );

        let report = f.harvester.run().await.unwrap();
        assert_eq!(report.outcome, RunOutcome::Completed { stop: StopReason::TargetReached });
        assert_eq!(report.attempts, 1);
        assert_eq!(report.summary.total, 5);

        let posts = f.sink.posts().await;
        let ids: Vec<_> = posts.iter().map(|p| p.post_id.clone().unwrap()).collect();
        assert_eq!(ids, ["1000001", "1000002", "1000003", "1000004", "1000005"]);
        assert_eq!(posts[0].comments_count, Some(1_000_001));
        assert_eq!(posts[0].message.as_deref(), Some("Post number 1000001"));

        let summaries = f.sink.summaries().await;
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].max_results, 5);

        let log = f.log.lock().unwrap();
        assert_eq!(log.navigations, [site::search_url("rust")]);
        assert!(log.cookie_injections.is_empty());
        assert_eq!(f.pool.released.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn shrinking_result_list_counts_as_stall() {
        let f = fixture(
            json!({"query": "rust", "maxResults": 100}),
            search_script(vec![page_of(1..=10), page_of(11..=14)]),
            0,
            tuning(),
        );

        let report = f.harvester.run().await.unwrap();
        assert_eq!(report.outcome, RunOutcome::Completed { stop: StopReason::Stalled });
        assert_eq!(f.sink.posts().await.len(), 10);
        assert_eq!(f.log.lock().unwrap().load_more_lookups, 1);
    }

    #[tokio::test]
    async fn load_more_click_reveals_the_next_batch() {
        let quiet = page_of(1..=2);
        let script = Script {
            load_more: true,
            ..search_script(vec![
                quiet.clone(),
                quiet.clone(),
                quiet.clone(),
                quiet,
                page_of(1..=6),
            ])
        };
        let f = fixture(json!({"query": "rust", "maxResults": 6}), script, 0, tuning());

        let report = f.harvester.run().await.unwrap();
        assert_eq!(report.outcome, RunOutcome::Completed { stop: StopReason::TargetReached });
        assert_eq!(report.summary.total, 6);
        // Scrolling alone would have gone idle on the repeated batches.
        assert_eq!(f.log.lock().unwrap().load_more_clicks, 2);
    }

    #[tokio::test]
    async fn post_lost_by_the_sink_is_emitted_on_retry() {
        let sink = Arc::new(FlakySink {
            inner: MemorySink::default(),
            failures: StdMutex::new(1),
        });
        let pool = Arc::new(RecordingPool::default());
        let launcher = FakeLauncher {
            script: search_script(vec![page_of(1..=2)]),
            failing_launches: 0,
            log: Arc::new(StdMutex::new(Log::default())),
        };
        let harvester = Harvester::new(
            config_for(json!({"query": "rust", "maxResults": 2})),
            tuning(),
            launcher,
            pool.clone(),
            sink.clone(),
        );

        let report = harvester.run().await.unwrap();
        assert_eq!(report.attempts, 2);
        assert_eq!(report.summary.total, 2);
        let ids: Vec<_> = sink
            .inner
            .posts()
            .await
            .into_iter()
            .map(|p| p.post_id.unwrap())
            .collect();
        assert_eq!(ids, ["1000001", "1000002"]);
        assert_eq!(pool.released.lock().unwrap()[0].error_count, 1);
    }

    #[tokio::test]
    async fn login_wall_without_results_retires_identity() {
        let wall = format!("<html><body><p>Log in to continue</p>{LOGIN_FORM}</body></html>");
        let f = fixture(json!({"query": "rust"}), search_script(vec![wall]), 0, tuning());

        let report = f.harvester.run().await.unwrap();
        match &report.outcome {
            RunOutcome::Rejected { classification, .. } => {
                assert_eq!(*classification, PageClassification::Blocked)
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(f.sink.posts().await.is_empty());
        assert_eq!(f.sink.summaries().await[0].total, 0);

        let retired = f.pool.retired.lock().unwrap();
        assert_eq!(retired.len(), 1);
        assert_eq!(retired[0].lifecycle, SessionLifecycle::Blocked);
        assert!(f.pool.released.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn login_prompt_next_to_results_is_not_a_block() {
        let page = format!("<html><body>{LOGIN_FORM}{}</body></html>", article(1));
        let f = fixture(json!({"query": "rust"}), search_script(vec![page]), 0, tuning());

        let report = f.harvester.run().await.unwrap();
        assert_eq!(report.outcome, RunOutcome::Completed { stop: StopReason::Idle });
        assert_eq!(f.sink.posts().await.len(), 1);
        assert!(f.pool.retired.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn blocked_identity_is_kept_when_retirement_is_off() {
        let wall = format!("<html><body>{LOGIN_FORM}</body></html>");
        let f = fixture(
            json!({"query": "rust", "session": {"retireOnBlocked": false}}),
            search_script(vec![wall]),
            0,
            tuning(),
        );

        f.harvester.run().await.unwrap();
        assert!(f.pool.retired.lock().unwrap().is_empty());
        let released = f.pool.released.lock().unwrap();
        assert_eq!(released[0].lifecycle, SessionLifecycle::Blocked);
    }

    #[tokio::test]
    async fn cookie_run_checks_home_before_searching() {
        let script = Script {
            home_html: FEED_HOME.to_string(),
            search_batches: vec![page_of(1..=2)],
            visible_cookies: vec![VisibleCookie {
                name: "c_user".into(),
                value: "42".into(),
            }],
            ..Default::default()
        };
        let f = fixture(
            json!({"query": "rust", "maxResults": 2, "cookies": "c_user=42; xs=abc"}),
            script,
            0,
            tuning(),
        );

        let report = f.harvester.run().await.unwrap();
        assert_eq!(report.summary.total, 2);

        let log = f.log.lock().unwrap();
        assert_eq!(log.navigations, [site::HOME_URL.to_string(), site::search_url("rust")]);
        assert_eq!(log.cookie_injections, [2]);

        let released = f.pool.released.lock().unwrap();
        assert_eq!(released[0].lifecycle, SessionLifecycle::Authenticated);
        assert!(released[0].cookies_applied);
        assert_eq!(released[0].cookie_jar.len(), 2);
    }

    #[tokio::test]
    async fn logged_out_home_ends_run_before_search() {
        let script = Script {
            home_html: format!("<html><body>{LOGIN_FORM}</body></html>"),
            search_batches: vec![page_of(1..=2)],
            ..Default::default()
        };
        let f = fixture(json!({"query": "rust", "cookies": "c_user=42; xs=abc"}), script, 0, tuning());

        let report = f.harvester.run().await.unwrap();
        assert!(matches!(
            report.outcome,
            RunOutcome::Rejected { classification: PageClassification::LoginRequired, .. }
        ));
        assert_eq!(f.log.lock().unwrap().navigations, [site::HOME_URL.to_string()]);
        assert_eq!(f.pool.retired.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_attempts_are_retried() {
        let f = fixture(
            json!({"query": "rust", "maxResults": 2}),
            search_script(vec![page_of(1..=2)]),
            2,
            tuning(),
        );

        let report = f.harvester.run().await.unwrap();
        assert_eq!(report.attempts, 3);
        assert_eq!(report.summary.total, 2);
        let released = f.pool.released.lock().unwrap();
        assert_eq!(released.len(), 3);
        assert_eq!(released[0].error_count, 1);
    }

    #[tokio::test]
    async fn exhausted_attempts_fail_but_still_summarize() {
        let f = fixture(
            json!({"query": "rust"}),
            search_script(vec![page_of(1..=2)]),
            3,
            tuning(),
        );

        let err = f.harvester.run().await.unwrap_err();
        match err.downcast_ref::<HarvestError>() {
            Some(HarvestError::AttemptsExhausted { attempts, last_error }) => {
                assert_eq!(*attempts, 3);
                assert!(last_error.contains("chrome exited"));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(f.sink.summaries().await.len(), 1);
    }

    #[tokio::test]
    async fn hung_attempt_times_out() {
        let script = Script {
            hang: true,
            ..search_script(vec![page_of(1..=2)])
        };
        let tuning = HarvestTuning {
            attempt_timeout: Duration::from_millis(50),
            max_attempts: 1,
            ..tuning()
        };
        let f = fixture(json!({"query": "rust"}), script, 0, tuning);

        let err = f.harvester.run().await.unwrap_err();
        assert!(format!("{err}").contains("timed out"));
    }

    fn assert_send<T: Send>(_: &T) {}

    #[test]
    fn chrome_harvest_can_be_spawned() {
        let settings = RuntimeSettings::from_env();
        let run = harvest_with_chrome(
            &settings,
            None,
            Uuid::new_v4(),
            config_for(json!({"query": "rust"})),
            PathBuf::from("unused_pool_state.json"),
        );
        assert_send(&run);
    }
}
