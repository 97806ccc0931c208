//! Repository statistics in the overview channels.
//!
//! Each overview channel holds one standing message (more if the repository
//! list overflows a message) listing a per-repository count, which is edited
//! in place on every update rather than reposted:
//!
//! | counter       | overview channel          | renamed channel   |
//! |---------------|---------------------------|-------------------|
//! | commits       | `CHANNEL_COMMITS_OVERVIEW`       | `N-commits`       |
//! | pull requests | `CHANNEL_PULL_REQUESTS_OVERVIEW` | `N-pull-requests` |
//! | merges        | `CHANNEL_MERGES_OVERVIEW`        | `N-merges`        |
//!
//! The main commits, pull requests and merges channels are renamed to carry
//! the totals. Handles of the standing messages are kept in
//! `stats_messages.json` next to the registry so a restart edits the same
//! messages. A message that was deleted by hand is simply posted again.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::delivery::Deliverer;
use crate::discord::MessagingPlatform;
use crate::format::{Color, Notification, NotificationChunk, PlatformLimits};
use crate::github::{RepoStats, RepositorySource};
use crate::registry::{RegistryError, store};
use crate::routing::ChannelKey;
use crate::types::{ChannelId, MessageHandle, RepoName};

/// Shown instead of a count for a repository whose query failed.
const UNAVAILABLE: &str = "unavailable";

#[derive(Debug, Error)]
pub enum StatsError {
    #[error("stats message store: {0}")]
    Store(#[from] RegistryError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Counter {
    Commits,
    PullRequests,
    Merges,
}

impl Counter {
    const ALL: [Counter; 3] = [Counter::Commits, Counter::PullRequests, Counter::Merges];

    fn count(self, stats: &RepoStats) -> u64 {
        match self {
            Counter::Commits => stats.commits,
            Counter::PullRequests => stats.pull_requests,
            Counter::Merges => stats.merges,
        }
    }

    fn overview(self) -> ChannelKey {
        match self {
            Counter::Commits => ChannelKey::CommitsOverview,
            Counter::PullRequests => ChannelKey::PullRequestsOverview,
            Counter::Merges => ChannelKey::MergesOverview,
        }
    }

    /// The event channel renamed after the total.
    fn renamed(self) -> ChannelKey {
        match self {
            Counter::Commits => ChannelKey::Commits,
            Counter::PullRequests => ChannelKey::PullRequests,
            Counter::Merges => ChannelKey::Merges,
        }
    }

    fn title(self) -> &'static str {
        match self {
            Counter::Commits => "📊 Commit Counts",
            Counter::PullRequests => "📊 Pull Request Counts",
            Counter::Merges => "📊 Merge Counts",
        }
    }

    fn color(self) -> Color {
        match self {
            Counter::Commits => Color::Blue,
            Counter::PullRequests => Color::Gold,
            Counter::Merges => Color::Green,
        }
    }

    fn channel_name(self, total: u64) -> String {
        match self {
            Counter::Commits => format!("{total}-commits"),
            Counter::PullRequests => format!("{total}-pull-requests"),
            Counter::Merges => format!("{total}-merges"),
        }
    }
}

/// Outcome of one statistics update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsReport {
    pub repos: usize,
    pub failed_repos: usize,
    pub totals: RepoStats,
    pub edited: usize,
    pub posted: usize,
    pub renamed: usize,
}

/// Standing message handles, keyed by overview channel id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct StandingMessages {
    channels: BTreeMap<String, Vec<MessageHandle>>,
}

pub struct StatsPublisher<P, S> {
    deliverer: Deliverer<P>,
    source: Arc<S>,
    repos: Vec<RepoName>,
    limits: PlatformLimits,
    path: PathBuf,
    /// Held for a whole update, which makes updates single-flight.
    standing: Mutex<StandingMessages>,
}

impl<P: MessagingPlatform, S: RepositorySource> StatsPublisher<P, S> {
    /// Loads the standing message handles from `path`. A missing or
    /// unreadable file starts from scratch: the worst case is a duplicate
    /// stats message.
    pub fn open(
        deliverer: Deliverer<P>,
        source: Arc<S>,
        repos: Vec<RepoName>,
        limits: PlatformLimits,
        path: impl Into<PathBuf>,
    ) -> Self {
        let path = path.into();
        let standing = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "Unreadable stats message file, starting fresh");
                StandingMessages::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StandingMessages::default(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Cannot read stats message file, starting fresh");
                StandingMessages::default()
            }
        };
        StatsPublisher {
            deliverer,
            source,
            repos,
            limits,
            path,
            standing: Mutex::new(standing),
        }
    }

    pub fn repos(&self) -> &[RepoName] {
        &self.repos
    }

    /// Fetches fresh counts and updates every configured overview channel.
    pub async fn publish(&self) -> Result<StatsReport, StatsError> {
        let mut standing = self.standing.lock().await;
        let mut report = StatsReport {
            repos: self.repos.len(),
            ..StatsReport::default()
        };
        if self.repos.is_empty() {
            debug!("No repositories configured, skipping statistics");
            return Ok(report);
        }

        let stats = self.fetch_all().await;
        report.failed_repos = stats.iter().filter(|s| s.is_none()).count();
        if report.failed_repos == stats.len() {
            warn!(repos = stats.len(), "Every repository query failed, statistics left unchanged");
            return Ok(report);
        }
        for s in stats.iter().flatten() {
            report.totals.commits += s.commits;
            report.totals.pull_requests += s.pull_requests;
            report.totals.merges += s.merges;
        }

        let channels = self.deliverer.router().map();
        for counter in Counter::ALL {
            let total = counter.count(&report.totals);

            if let Some(channel) = channels.get(counter.renamed()) {
                match self.deliverer.rename_channel(channel, &counter.channel_name(total)).await {
                    Ok(()) => report.renamed += 1,
                    Err(e) => warn!(channel = %channel, error = %e, "Failed to rename channel"),
                }
            }

            let Some(overview) = channels.get(counter.overview()) else {
                continue;
            };
            let chunks = self.render(counter, total, &stats);
            let previous = standing.channels.remove(&overview.to_string()).unwrap_or_default();
            let (handles, edited, posted) = self.upsert(overview, &chunks, previous).await;
            report.edited += edited;
            report.posted += posted;
            if !handles.is_empty() {
                standing.channels.insert(overview.to_string(), handles);
            }
        }

        let path = self.path.clone();
        let snapshot = standing.clone();
        tokio::task::spawn_blocking(move || store::save_atomic(&path, &snapshot))
            .await
            .map_err(RegistryError::from)??;

        info!(
            repos = report.repos,
            failed = report.failed_repos,
            commits = report.totals.commits,
            pull_requests = report.totals.pull_requests,
            merges = report.totals.merges,
            edited = report.edited,
            posted = report.posted,
            "Statistics updated"
        );
        Ok(report)
    }

    /// Updates at startup and then every `interval` until `shutdown`.
    #[instrument(skip_all, fields(interval_secs = interval.as_secs()))]
    pub async fn run(self: Arc<Self>, interval: Duration, shutdown: CancellationToken) {
        info!(repos = self.repos.len(), "Statistics publisher started");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutdown signal received, stopping statistics publisher");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.publish().await {
                        warn!(error = %e, "Statistics update failed");
                    }
                }
            }
        }
    }

    /// One result per configured repository, in configuration order.
    async fn fetch_all(&self) -> Vec<Option<RepoStats>> {
        let mut tasks = JoinSet::new();
        for (index, repo) in self.repos.iter().cloned().enumerate() {
            let source = Arc::clone(&self.source);
            tasks.spawn(async move {
                let result = source.repo_stats(&repo).await;
                (index, repo, result)
            });
        }

        let mut stats = vec![None; self.repos.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, _, Ok(s))) => stats[index] = Some(s),
                Ok((_, repo, Err(e))) => warn!(repo = %repo, error = %e, "Repository stats query failed"),
                Err(e) => warn!(error = %e, "Repository stats task failed"),
            }
        }
        stats
    }

    fn render(&self, counter: Counter, total: u64, stats: &[Option<RepoStats>]) -> Vec<NotificationChunk> {
        self.repos
            .iter()
            .zip(stats)
            .fold(
                Notification::new(counter.title(), counter.color()).description(format!("Total: {total}")),
                |note, (repo, s)| {
                    let value = s.map_or_else(|| UNAVAILABLE.to_string(), |s| counter.count(&s).to_string());
                    note.field(repo.to_string(), value, false)
                },
            )
            .into_chunks(&self.limits)
    }

    /// Edits the standing messages in place, posting where none exists or
    /// the old one is gone, and deletes leftovers. Returns the new handles
    /// with the edit and post counts.
    async fn upsert(
        &self,
        channel: ChannelId,
        chunks: &[NotificationChunk],
        previous: Vec<MessageHandle>,
    ) -> (Vec<MessageHandle>, usize, usize) {
        let mut handles = Vec::with_capacity(chunks.len());
        let (mut edited, mut posted) = (0, 0);
        let mut previous = previous.into_iter().filter(|h| h.channel_id == channel);

        for chunk in chunks {
            if let Some(handle) = previous.next() {
                match self.deliverer.edit(handle, chunk).await {
                    Ok(()) => {
                        edited += 1;
                        handles.push(handle);
                        continue;
                    }
                    Err(e) if e.is_not_found() => {
                        debug!(handle = %handle, "Stats message gone, posting a new one");
                    }
                    Err(e) => {
                        // Keep it; the next update tries the edit again.
                        warn!(handle = %handle, error = %e, "Failed to edit stats message");
                        handles.push(handle);
                        continue;
                    }
                }
            }
            let report = self.deliverer.deliver(channel, std::slice::from_ref(chunk)).await;
            posted += report.handles.len();
            handles.extend(report.handles);
        }

        let leftover: Vec<_> = previous.collect();
        if !leftover.is_empty() {
            let failed = self.deliverer.delete_all(&leftover).await;
            debug!(channel = %channel, deleted = leftover.len() - failed.len(), "Removed surplus stats messages");
        }
        (handles, edited, posted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discord::PlatformError;
    use crate::github::GitHubErrorKind;
    use crate::routing::{ChannelMap, ChannelRouter};
    use crate::test_utils::{MockPlatform, MockSource, PlatformCall};
    use tempfile::{TempDir, tempdir};

    const COMMITS: ChannelId = ChannelId(1);
    const COMMITS_OVERVIEW: ChannelId = ChannelId(11);
    const REQUESTS_OVERVIEW: ChannelId = ChannelId(12);
    const MERGES_OVERVIEW: ChannelId = ChannelId(13);

    fn repo(name: &str) -> RepoName {
        name.parse().unwrap()
    }

    fn channels() -> ChannelMap {
        ChannelMap::new()
            .with(ChannelKey::Commits, COMMITS)
            .with(ChannelKey::CommitsOverview, COMMITS_OVERVIEW)
            .with(ChannelKey::PullRequestsOverview, REQUESTS_OVERVIEW)
            .with(ChannelKey::MergesOverview, MERGES_OVERVIEW)
    }

    struct Fixture {
        dir: TempDir,
        platform: Arc<MockPlatform>,
        source: Arc<MockSource>,
    }

    impl Fixture {
        fn new() -> Self {
            let source = Arc::new(MockSource::new());
            source.set_repo_stats(&repo("octo/a"), RepoStats { commits: 10, pull_requests: 4, merges: 3 });
            source.set_repo_stats(&repo("octo/b"), RepoStats { commits: 5, pull_requests: 2, merges: 1 });
            Fixture {
                dir: tempdir().unwrap(),
                platform: Arc::new(MockPlatform::new()),
                source,
            }
        }

        fn publisher(&self, repos: &[&str]) -> StatsPublisher<MockPlatform, MockSource> {
            let deliverer = Deliverer::new(Arc::clone(&self.platform), ChannelRouter::new(channels()));
            StatsPublisher::open(
                deliverer,
                Arc::clone(&self.source),
                repos.iter().map(|r| repo(r)).collect(),
                PlatformLimits::DISCORD,
                self.dir.path().join("stats_messages.json"),
            )
        }
    }

    #[tokio::test]
    async fn first_update_posts_one_message_per_overview_channel() {
        let f = Fixture::new();

        let report = f.publisher(&["octo/a", "octo/b"]).publish().await.unwrap();

        assert_eq!(report.totals, RepoStats { commits: 15, pull_requests: 6, merges: 4 });
        assert_eq!(report.posted, 3);
        let commits = f.platform.sent_to(COMMITS_OVERVIEW);
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].description.as_deref(), Some("Total: 15"));
        let fields: Vec<_> = commits[0].fields.iter().map(|f| (f.name.as_str(), f.value.as_str())).collect();
        assert_eq!(fields, vec![("octo/a", "10"), ("octo/b", "5")]);
        assert_eq!(f.platform.sent_to(MERGES_OVERVIEW)[0].description.as_deref(), Some("Total: 4"));
    }

    #[tokio::test]
    async fn later_updates_edit_in_place() {
        let f = Fixture::new();
        let publisher = f.publisher(&["octo/a"]);
        publisher.publish().await.unwrap();
        let posted = f.platform.sent_to(REQUESTS_OVERVIEW);
        let handle = MessageHandle::new(REQUESTS_OVERVIEW, f.platform.messages_in(REQUESTS_OVERVIEW)[0]);

        f.source.set_repo_stats(&repo("octo/a"), RepoStats { commits: 11, pull_requests: 5, merges: 3 });
        let report = publisher.publish().await.unwrap();

        assert_eq!((report.edited, report.posted), (3, 0));
        assert_eq!(f.platform.sent_to(REQUESTS_OVERVIEW), posted);
        assert_eq!(
            f.platform.current(handle).unwrap().description.as_deref(),
            Some("Total: 5")
        );
    }

    #[tokio::test]
    async fn handles_survive_a_restart() {
        let f = Fixture::new();
        f.publisher(&["octo/a"]).publish().await.unwrap();

        let report = f.publisher(&["octo/a"]).publish().await.unwrap();

        assert_eq!((report.edited, report.posted), (3, 0));
        assert_eq!(f.platform.messages_in(COMMITS_OVERVIEW).len(), 1);
    }

    #[tokio::test]
    async fn deleted_message_is_posted_again() {
        let f = Fixture::new();
        let publisher = f.publisher(&["octo/a"]);
        publisher.publish().await.unwrap();
        let old = MessageHandle::new(COMMITS_OVERVIEW, f.platform.messages_in(COMMITS_OVERVIEW)[0]);
        publisher.deliverer.delete(old).await.unwrap();

        let report = publisher.publish().await.unwrap();

        assert_eq!((report.edited, report.posted), (2, 1));
        assert_eq!(f.platform.messages_in(COMMITS_OVERVIEW).len(), 1);
        assert_ne!(f.platform.messages_in(COMMITS_OVERVIEW)[0], old.message_id);
    }

    #[tokio::test]
    async fn event_channels_are_renamed_after_totals() {
        let f = Fixture::new();

        let report = f.publisher(&["octo/a", "octo/b"]).publish().await.unwrap();

        // Only the commits channel is configured among the renamed ones.
        assert_eq!(report.renamed, 1);
        assert_eq!(f.platform.channel_name(COMMITS).as_deref(), Some("15-commits"));
    }

    #[tokio::test]
    async fn rename_failure_does_not_stop_the_update() {
        let f = Fixture::new();
        f.platform.fail_renames_of(COMMITS, PlatformError::permanent("Missing Permissions"));

        let report = f.publisher(&["octo/a"]).publish().await.unwrap();

        assert_eq!(report.renamed, 0);
        assert_eq!(report.posted, 3);
    }

    #[tokio::test]
    async fn failed_repository_is_shown_as_unavailable() {
        let f = Fixture::new();
        f.source.fail_repo(&repo("octo/b"), GitHubErrorKind::Transient);

        let report = f.publisher(&["octo/a", "octo/b"]).publish().await.unwrap();

        assert_eq!(report.failed_repos, 1);
        assert_eq!(report.totals.commits, 10);
        let commits = &f.platform.sent_to(COMMITS_OVERVIEW)[0];
        assert_eq!(commits.fields[1].value, UNAVAILABLE);
    }

    #[tokio::test]
    async fn nothing_changes_when_every_query_fails() {
        let f = Fixture::new();
        f.source.fail_repo(&repo("octo/a"), GitHubErrorKind::Transient);

        let report = f.publisher(&["octo/a"]).publish().await.unwrap();

        assert_eq!(report.failed_repos, 1);
        assert!(f.platform.calls().is_empty());
    }

    #[tokio::test]
    async fn no_repositories_is_a_no_op() {
        let f = Fixture::new();

        let report = f.publisher(&[]).publish().await.unwrap();

        assert_eq!(report, StatsReport::default());
        assert!(f.platform.calls().is_empty());
        assert!(!f.dir.path().join("stats_messages.json").exists());
    }

    #[tokio::test]
    async fn surplus_messages_are_removed_when_the_list_shrinks() {
        let f = Fixture::new();
        let many: Vec<String> = (0..30).map(|i| format!("octo/r{i}")).collect();
        let names: Vec<&str> = many.iter().map(String::as_str).collect();
        f.publisher(&names).publish().await.unwrap();
        assert_eq!(f.platform.messages_in(COMMITS_OVERVIEW).len(), 2);

        f.publisher(&["octo/a"]).publish().await.unwrap();

        assert_eq!(f.platform.messages_in(COMMITS_OVERVIEW).len(), 1);
        assert!(f
            .platform
            .calls()
            .iter()
            .any(|c| matches!(c, PlatformCall::Delete { ok: true, .. })));
    }
}
