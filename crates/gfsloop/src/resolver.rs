//! Newest-usable-run selection and retrieval.
//!
//! ```text
//! now ──► candidate_runs ──► [newest, fallback]
//!                                 │
//!             for each run:  probe every (step, variable) target
//!                                 │
//!              all present? ──no──► record failures, try next run
//!                                 │yes
//!                     download every target into the store
//!                                 │
//!              any failed?  ──yes─► purge subtrees, try next run
//!                                 │no
//!                              Found
//! ```
//!
//! The category subtrees are cleared on entry, so when no run qualifies
//! the store is left empty rather than holding a previous run's files.

use crate::config::Config;
use crate::run::{candidate_runs, forecast_steps, ForecastStep, RolloverPolicy, RunIdentifier};
use crate::source::{ForecastSource, SourceError};
use crate::store::{LocalStore, StoreError};
use crate::target::{targets_for_run, RetrievalTarget};
use crate::variable::VariableSpec;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::fmt;
use std::path::PathBuf;

/// Errors that abort a resolver invocation.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("no variables configured")]
    NoVariables,
}

pub type Result<T> = std::result::Result<T, FetchError>;

/// A single target that kept its run from being usable.
#[derive(Debug)]
pub enum TargetFailure {
    /// Existence check did not succeed.
    ProbeFailed {
        target: RetrievalTarget,
        error: SourceError,
    },
    /// Probe succeeded but the download did not.
    DownloadFailed {
        target: RetrievalTarget,
        error: SourceError,
    },
}

impl TargetFailure {
    pub fn target(&self) -> &RetrievalTarget {
        match self {
            TargetFailure::ProbeFailed { target, .. } => target,
            TargetFailure::DownloadFailed { target, .. } => target,
        }
    }
}

impl fmt::Display for TargetFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetFailure::ProbeFailed { target, error } => {
                write!(f, "probe failed for {}: {}", target, error)
            }
            TargetFailure::DownloadFailed { target, error } => {
                write!(f, "download failed for {}: {}", target, error)
            }
        }
    }
}

/// What happened to one candidate run.
#[derive(Debug)]
pub struct CandidateReport {
    pub run: RunIdentifier,
    pub targets: usize,
    pub downloaded: usize,
    pub failures: Vec<TargetFailure>,
}

impl CandidateReport {
    pub fn probe_failures(&self) -> usize {
        self.failures
            .iter()
            .filter(|f| matches!(f, TargetFailure::ProbeFailed { .. }))
            .count()
    }

    pub fn download_failures(&self) -> usize {
        self.failures.len() - self.probe_failures()
    }
}

/// Per-candidate outcomes of one invocation, newest first.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub candidates: Vec<CandidateReport>,
}

/// A file written to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub category: String,
    pub step: ForecastStep,
    pub path: PathBuf,
}

/// The run selected and written to the store.
#[derive(Debug)]
pub struct FetchedRun {
    pub run: RunIdentifier,
    pub steps: Vec<ForecastStep>,
    /// Sorted by category, then step.
    pub files: Vec<StoredFile>,
    pub store_root: PathBuf,
    pub summary: RunSummary,
}

/// Outcome of `Resolver::resolve_and_fetch`.
#[derive(Debug)]
pub enum FetchOutcome {
    Found(FetchedRun),
    NoRunAvailable(RunSummary),
}

impl FetchOutcome {
    pub fn summary(&self) -> &RunSummary {
        match self {
            FetchOutcome::Found(fetched) => &fetched.summary,
            FetchOutcome::NoRunAvailable(summary) => summary,
        }
    }
}

enum Downloaded {
    Stored(PathBuf),
    Failed(SourceError),
}

enum DownloadResult {
    Complete(Vec<StoredFile>),
    Incomplete { downloaded: usize, failures: Vec<TargetFailure> },
}

/// Selects the newest complete run and mirrors it into a `LocalStore`.
pub struct Resolver<S: ForecastSource> {
    source: S,
    store: LocalStore,
    base_url: String,
    variables: Vec<VariableSpec>,
    max_horizon_hours: u16,
    rollover: RolloverPolicy,
    max_concurrent_requests: usize,
}

impl<S: ForecastSource> Resolver<S> {
    pub fn new(source: S, config: &Config) -> Self {
        Self {
            source,
            store: LocalStore::new(&config.store_root),
            base_url: config.base_url.clone(),
            variables: config.variables.clone(),
            max_horizon_hours: config.max_horizon_hours,
            rollover: config.rollover,
            max_concurrent_requests: config.max_concurrent_requests.max(1),
        }
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn variables(&self) -> &[VariableSpec] {
        &self.variables
    }

    fn categories(&self) -> Vec<&str> {
        self.variables.iter().map(|v| v.category.as_str()).collect()
    }

    /// Targets of every candidate run for `now`, newest run first.
    pub fn plan(&self, now: DateTime<Utc>) -> Vec<(RunIdentifier, Vec<RetrievalTarget>)> {
        let steps = forecast_steps(self.max_horizon_hours);
        candidate_runs(now, self.rollover)
            .into_iter()
            .map(|run| {
                let targets = targets_for_run(&self.base_url, run, &steps, &self.variables);
                (run, targets)
            })
            .collect()
    }

    /// Find the newest run whose every target is available and store it.
    ///
    /// Per-target failures are collected in the returned summary. Only
    /// store I/O errors abort the invocation.
    pub async fn resolve_and_fetch(&self, now: DateTime<Utc>) -> Result<FetchOutcome> {
        if self.variables.is_empty() {
            return Err(FetchError::NoVariables);
        }

        let categories = self.categories();
        self.store.clear(&categories).await?;

        let steps = forecast_steps(self.max_horizon_hours);
        let mut summary = RunSummary::default();

        for (run, targets) in self.plan(now) {
            log::info!("[Resolver] probing run {} ({} files)", run, targets.len());

            let failures = self.probe_all(&targets).await;
            if !failures.is_empty() {
                log::info!(
                    "[Resolver] run {} incomplete: {}/{} files unavailable",
                    run,
                    failures.len(),
                    targets.len()
                );
                summary.candidates.push(CandidateReport {
                    run,
                    targets: targets.len(),
                    downloaded: 0,
                    failures,
                });
                continue;
            }

            log::info!("[Resolver] run {} complete upstream, downloading", run);
            let downloaded = match self.download_all(&targets).await {
                Ok(downloaded) => downloaded,
                Err(e) => {
                    log::error!("[Resolver] run {} abandoned: {}", run, e);
                    if let Err(purge) = self.store.clear(&categories).await {
                        log::error!("[Resolver] purge after store failure failed: {}", purge);
                    }
                    return Err(e);
                }
            };
            match downloaded {
                DownloadResult::Complete(files) => {
                    log::info!("[Resolver] run {} stored: {} files", run, files.len());
                    summary.candidates.push(CandidateReport {
                        run,
                        targets: targets.len(),
                        downloaded: files.len(),
                        failures: Vec::new(),
                    });
                    return Ok(FetchOutcome::Found(FetchedRun {
                        run,
                        steps,
                        files,
                        store_root: self.store.root().to_path_buf(),
                        summary,
                    }));
                }
                DownloadResult::Incomplete {
                    downloaded,
                    failures,
                } => {
                    log::warn!(
                        "[Resolver] run {} abandoned: {} downloads failed after successful probes",
                        run,
                        failures.len()
                    );
                    self.store.clear(&categories).await?;
                    summary.candidates.push(CandidateReport {
                        run,
                        targets: targets.len(),
                        downloaded,
                        failures,
                    });
                }
            }
        }

        log::info!("[Resolver] no valid data found for the candidate runs");
        Ok(FetchOutcome::NoRunAvailable(summary))
    }

    async fn probe_all(&self, targets: &[RetrievalTarget]) -> Vec<TargetFailure> {
        let source = &self.source;
        stream::iter(targets)
            .map(move |target| async move { (target, source.probe(&target.url).await) })
            .buffered(self.max_concurrent_requests)
            .filter_map(|(target, result)| async move {
                match result {
                    Ok(()) => None,
                    Err(error) => {
                        log::debug!("[Resolver] unavailable: {} ({})", target, error);
                        Some(TargetFailure::ProbeFailed {
                            target: target.clone(),
                            error,
                        })
                    }
                }
            })
            .collect()
            .await
    }

    async fn download_all(&self, targets: &[RetrievalTarget]) -> Result<DownloadResult> {
        let source = &self.source;
        let store = &self.store;

        let results: Vec<_> = stream::iter(targets)
            .map(move |target| async move {
                let outcome = match source.fetch(&target.url).await {
                    Ok(bytes) => store.write(target, &bytes).await.map(Downloaded::Stored),
                    Err(error) => Ok(Downloaded::Failed(error)),
                };
                (target, outcome)
            })
            .buffered(self.max_concurrent_requests)
            .collect()
            .await;

        let mut files = Vec::with_capacity(targets.len());
        let mut failures = Vec::new();
        for (target, outcome) in results {
            match outcome? {
                Downloaded::Stored(path) => files.push(StoredFile {
                    category: target.category.clone(),
                    step: target.step,
                    path,
                }),
                Downloaded::Failed(error) => {
                    log::warn!("[Resolver] download failed: {} ({})", target, error);
                    failures.push(TargetFailure::DownloadFailed {
                        target: target.clone(),
                        error,
                    });
                }
            }
        }

        if !failures.is_empty() {
            return Ok(DownloadResult::Incomplete {
                downloaded: files.len(),
                failures,
            });
        }

        files.sort_by(|a, b| (&a.category, a.step).cmp(&(&b.category, b.step)));
        Ok(DownloadResult::Complete(files))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::mock::MockSource;
    use chrono::TimeZone;
    use std::collections::BTreeMap;
    use std::path::Path;
    use tempfile::{tempdir, TempDir};

    const BASE: &str = "http://nomads.test/cgi-bin";

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 7, 0, 0).unwrap()
    }

    fn config(root: &Path, horizon: u16) -> Config {
        Config {
            base_url: BASE.to_string(),
            store_root: root.to_path_buf(),
            max_horizon_hours: horizon,
            variables: vec![VariableSpec::temperature(), VariableSpec::pressure()],
            ..Config::default()
        }
    }

    fn setup(horizon: u16) -> (Resolver<MockSource>, TempDir) {
        let dir = tempdir().unwrap();
        let resolver = Resolver::new(MockSource::new(), &config(dir.path(), horizon));
        (resolver, dir)
    }

    /// Serve every target of the given candidate (0 = newest, 1 = fallback).
    fn publish(resolver: &Resolver<MockSource>, candidate: usize) -> Vec<RetrievalTarget> {
        let (_, targets) = resolver.plan(now()).swap_remove(candidate);
        for t in &targets {
            resolver.source().serve(&t.url, t.url.as_bytes());
        }
        targets
    }

    fn snapshot(root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
        let mut files = BTreeMap::new();
        for category in ["temp", "mslet"] {
            let dir = root.join(category);
            if let Ok(entries) = std::fs::read_dir(&dir) {
                for entry in entries {
                    let path = entry.unwrap().path();
                    files.insert(path.clone(), std::fs::read(&path).unwrap());
                }
            }
        }
        files
    }

    #[tokio::test]
    async fn newest_complete_run_is_selected_without_probing_fallback() {
        let (resolver, dir) = setup(12);
        let targets = publish(&resolver, 0);
        publish(&resolver, 1);

        let outcome = resolver.resolve_and_fetch(now()).await.unwrap();
        let FetchOutcome::Found(fetched) = outcome else {
            panic!("expected Found");
        };
        assert_eq!(fetched.run.cycle(), 6);
        assert_eq!(fetched.files.len(), targets.len());
        assert_eq!(fetched.summary.candidates.len(), 1);

        let probed = resolver.source().probed_urls();
        assert_eq!(probed.len(), targets.len());
        assert!(probed.iter().all(|u| u.contains("t06z")));

        for t in &targets {
            let path = t.local_path(dir.path());
            assert_eq!(std::fs::read(&path).unwrap(), t.url.as_bytes());
        }
    }

    #[tokio::test]
    async fn incomplete_newest_run_falls_back() {
        let (resolver, dir) = setup(12);
        let newest = publish(&resolver, 0);
        let fallback = publish(&resolver, 1);
        // newest run misses one step of one variable
        let missing = &newest[newest.len() - 1];
        resolver.source().withdraw(&missing.url);

        let outcome = resolver.resolve_and_fetch(now()).await.unwrap();
        let FetchOutcome::Found(fetched) = outcome else {
            panic!("expected Found");
        };
        assert_eq!(fetched.run.cycle(), 0);
        assert_eq!(fetched.summary.candidates.len(), 2);
        assert_eq!(fetched.summary.candidates[0].probe_failures(), 1);

        let stored = snapshot(dir.path());
        assert_eq!(stored.len(), fallback.len());
        assert!(stored.keys().all(|p| p.to_string_lossy().contains("t00z")));
    }

    #[tokio::test]
    async fn probing_continues_after_a_failure() {
        let (resolver, _dir) = setup(12);
        let newest = publish(&resolver, 0);
        resolver.source().withdraw(&newest[0].url);

        resolver.resolve_and_fetch(now()).await.unwrap();

        let probed = resolver.source().probed_urls();
        let newest_probes = probed.iter().filter(|u| u.contains("t06z")).count();
        assert_eq!(newest_probes, newest.len());
    }

    #[tokio::test]
    async fn nothing_available_leaves_empty_store() {
        let (resolver, dir) = setup(12);
        std::fs::create_dir_all(dir.path().join("temp")).unwrap();
        std::fs::write(dir.path().join("temp/gfs.t18z.pgrb2.0p25.f000.grib2"), b"old").unwrap();

        let outcome = resolver.resolve_and_fetch(now()).await.unwrap();
        let FetchOutcome::NoRunAvailable(summary) = outcome else {
            panic!("expected NoRunAvailable");
        };
        assert_eq!(summary.candidates.len(), 2);
        assert_eq!(summary.candidates[0].run.cycle(), 6);
        assert_eq!(summary.candidates[1].run.cycle(), 0);
        assert!(summary.candidates.iter().all(|c| c.downloaded == 0));
        assert!(resolver.source().fetched_urls().is_empty());
        assert!(snapshot(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn both_runs_partial_never_mixes_files() {
        let (resolver, dir) = setup(12);
        let newest = publish(&resolver, 0);
        let fallback = publish(&resolver, 1);
        resolver.source().withdraw(&newest[2].url);
        resolver.source().withdraw(&fallback[5].url);

        let outcome = resolver.resolve_and_fetch(now()).await.unwrap();
        assert!(matches!(outcome, FetchOutcome::NoRunAvailable(_)));
        assert!(snapshot(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn download_failure_abandons_run_and_purges() {
        let (resolver, dir) = setup(12);
        let newest = publish(&resolver, 0);
        resolver.source().break_download(&newest[4].url);

        let outcome = resolver.resolve_and_fetch(now()).await.unwrap();
        let FetchOutcome::NoRunAvailable(summary) = outcome else {
            panic!("expected NoRunAvailable");
        };
        let report = &summary.candidates[0];
        assert_eq!(report.download_failures(), 1);
        assert_eq!(report.downloaded, newest.len() - 1);
        assert!(matches!(
            report.failures[0],
            TargetFailure::DownloadFailed { .. }
        ));
        assert!(snapshot(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn download_failure_on_newest_then_fallback_succeeds() {
        let (resolver, dir) = setup(12);
        let newest = publish(&resolver, 0);
        let fallback = publish(&resolver, 1);
        resolver.source().break_download(&newest[0].url);

        let outcome = resolver.resolve_and_fetch(now()).await.unwrap();
        let FetchOutcome::Found(fetched) = outcome else {
            panic!("expected Found");
        };
        assert_eq!(fetched.run.cycle(), 0);
        let stored = snapshot(dir.path());
        assert_eq!(stored.len(), fallback.len());
        assert!(stored.keys().all(|p| !p.to_string_lossy().contains("t06z")));
    }

    #[tokio::test]
    async fn repeated_invocation_is_idempotent() {
        let (resolver, dir) = setup(12);
        publish(&resolver, 0);

        resolver.resolve_and_fetch(now()).await.unwrap();
        let first = snapshot(dir.path());
        resolver.resolve_and_fetch(now()).await.unwrap();
        let second = snapshot(dir.path());

        assert!(!first.is_empty());
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn stale_files_from_earlier_runs_are_removed() {
        let (resolver, dir) = setup(12);
        std::fs::create_dir_all(dir.path().join("mslet")).unwrap();
        std::fs::write(dir.path().join("mslet/gfs.t12z.pgrb2.1p00.f000.grib2"), b"old").unwrap();
        let targets = publish(&resolver, 0);

        resolver.resolve_and_fetch(now()).await.unwrap();
        assert_eq!(snapshot(dir.path()).len(), targets.len());
    }

    #[tokio::test]
    async fn fetched_files_are_sorted_by_category_then_step() {
        let (resolver, _dir) = setup(12);
        publish(&resolver, 0);

        let FetchOutcome::Found(fetched) = resolver.resolve_and_fetch(now()).await.unwrap() else {
            panic!("expected Found");
        };
        assert_eq!(fetched.steps.len(), 13);
        assert_eq!(fetched.files[0].category, "mslet");
        assert_eq!(fetched.files[0].step, ForecastStep::new(0));
        assert_eq!(fetched.files[12].step, ForecastStep::new(12));
        assert_eq!(fetched.files[13].category, "temp");
    }

    #[tokio::test]
    async fn concurrency_limit_does_not_change_outcome() {
        for limit in [1, 3, 16] {
            let dir = tempdir().unwrap();
            let mut cfg = config(dir.path(), 24);
            cfg.max_concurrent_requests = limit;
            let resolver = Resolver::new(MockSource::new(), &cfg);
            let targets = publish(&resolver, 1);

            let FetchOutcome::Found(fetched) = resolver.resolve_and_fetch(now()).await.unwrap()
            else {
                panic!("expected Found with limit {}", limit);
            };
            assert_eq!(fetched.run.cycle(), 0);
            assert_eq!(fetched.files.len(), targets.len());
        }
    }

    #[tokio::test]
    async fn empty_variable_list_is_rejected() {
        let dir = tempdir().unwrap();
        let mut cfg = config(dir.path(), 12);
        cfg.variables.clear();
        let resolver = Resolver::new(MockSource::new(), &cfg);
        assert!(matches!(
            resolver.resolve_and_fetch(now()).await,
            Err(FetchError::NoVariables)
        ));
    }

    /// Serves like `MockSource`, but occupies one target's local path with
    /// a non-empty directory while that target is being downloaded.
    struct OccupiedPathSource {
        inner: MockSource,
        url: String,
        path: PathBuf,
    }

    impl ForecastSource for OccupiedPathSource {
        async fn probe(&self, url: &str) -> crate::source::SourceResult<()> {
            self.inner.probe(url).await
        }

        async fn fetch(&self, url: &str) -> crate::source::SourceResult<Vec<u8>> {
            if url == self.url {
                std::fs::create_dir_all(self.path.join("occupied")).unwrap();
            }
            self.inner.fetch(url).await
        }
    }

    #[tokio::test]
    async fn store_failure_mid_download_purges_the_run() {
        let dir = tempdir().unwrap();
        let cfg = config(dir.path(), 12);
        let (_, targets) = Resolver::new(MockSource::new(), &cfg)
            .plan(now())
            .swap_remove(0);

        let inner = MockSource::new();
        for t in &targets {
            inner.serve(&t.url, b"GRIB");
        }
        let last_temp = targets.iter().rev().find(|t| t.category == "temp").unwrap();
        let source = OccupiedPathSource {
            inner,
            url: last_temp.url.clone(),
            path: last_temp.local_path(dir.path()),
        };
        let resolver = Resolver::new(source, &cfg);

        assert!(matches!(
            resolver.resolve_and_fetch(now()).await,
            Err(FetchError::Store(_))
        ));
        for category in ["temp", "mslet"] {
            let left = std::fs::read_dir(dir.path().join(category)).unwrap().count();
            assert_eq!(left, 0, "{} not purged", category);
        }
    }

    #[tokio::test]
    async fn store_failure_is_surfaced() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("temp"), b"not a directory").unwrap();
        let resolver = Resolver::new(MockSource::new(), &config(dir.path(), 12));
        assert!(matches!(
            resolver.resolve_and_fetch(now()).await,
            Err(FetchError::Store(_))
        ));
    }
}
