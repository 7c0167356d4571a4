use crate::broker::Publisher;
use crate::error::{HarvestError, Result};
use crate::github::{COMMITS_PER_PAGE, GitHubClient};
use crate::lock::RepositoryLock;
use gitpulse_contracts::{CommitsCommand, IntentCommand, IntentKind, IntentPayload};
use gitpulse_model::{Commit, RepoName, Repository};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Commits per outbound batch; also the capacity of the aggregation
/// channel, so a slow publisher throttles page fetching.
pub const BATCH_SIZE: usize = 100;
/// Flush a non-empty batch after this long without a new commit.
const BATCH_IDLE_FLUSH: Duration = Duration::from_secs(5);
const PUBLISH_MAX_RETRIES: u32 = 3;
const PUBLISH_RETRY_DELAY: Duration = Duration::from_secs(5);
const LOCK_TTL: Duration = Duration::from_secs(600);

/// Per-message harvest: parse, lock, fetch, and feed the resolver
/// channels. One pipeline per process; every inbound broker message runs
/// [`HarvestPipeline::handle_message`] on its own task.
pub struct HarvestPipeline {
    github: GitHubClient,
    lock: Arc<dyn RepositoryLock>,
    commits_tx: mpsc::Sender<Commit>,
    repo_info_tx: mpsc::Sender<Repository>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for HarvestPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HarvestPipeline").finish_non_exhaustive()
    }
}

impl HarvestPipeline {
    /// Builds the pipeline plus the receiver ends for the two resolver
    /// loops ([`commits_resolver`], [`repo_info_resolver`]).
    pub fn new(
        github: GitHubClient,
        lock: Arc<dyn RepositoryLock>,
        cancel: CancellationToken,
    ) -> (Self, mpsc::Receiver<Commit>, mpsc::Receiver<Repository>) {
        let (commits_tx, commits_rx) = mpsc::channel(BATCH_SIZE);
        let (repo_info_tx, repo_info_rx) = mpsc::channel(1);
        (
            Self {
                github,
                lock,
                commits_tx,
                repo_info_tx,
                cancel,
            },
            commits_rx,
            repo_info_rx,
        )
    }

    /// Handles one inbound intent command body.
    ///
    /// `received → lock-attempt → {dropped | harvesting → resolved}`:
    /// a message that loses the lock race is dropped, not retried; the
    /// scout sweep re-broadcasts the intent later.
    pub async fn handle_message(&self, body: &[u8]) -> Result<()> {
        let command: IntentCommand = serde_json::from_slice(body)?;
        let repo = command.intent.repo()?;

        if command.kind == IntentKind::CancelIntent {
            debug!(repo = %repo, "ignoring cancel command");
            return Ok(());
        }

        let Some(token) = self.lock.acquire(&repo, LOCK_TTL).await? else {
            info!(repo = %repo, "harvest already in progress, dropping command");
            return Ok(());
        };

        info!(repo = %repo, intent = %command.intent.id, "harvesting");

        // Both fetches run under one barrier; either failing is logged,
        // already-pushed partial results stand.
        let (info_res, commits_res) = tokio::join!(
            self.fetch_repo_info(&repo),
            self.fetch_commits(&repo, &command.intent),
        );
        if let Err(err) = info_res {
            warn!(repo = %repo, %err, "repository info fetch failed");
        }
        if let Err(err) = commits_res {
            warn!(repo = %repo, %err, "commit fetch failed");
        }

        if let Err(err) = self.lock.release(&token).await {
            warn!(repo = %repo, %err, "failed to release harvest lock");
        }
        Ok(())
    }

    async fn fetch_repo_info(&self, repo: &RepoName) -> Result<()> {
        let info = self.github.get_repository(repo).await?;
        tokio::select! {
            sent = self.repo_info_tx.send(info) => sent
                .map_err(|_| HarvestError::Internal("repo info channel closed".into())),
            _ = self.cancel.cancelled() => {
                Err(HarvestError::Cancelled("repo info push".into()))
            }
        }
    }

    /// Walks the commit listing page by page from the intent's `from`
    /// date. The bounded channel applies backpressure: a full batch
    /// downstream pauses pagination here.
    async fn fetch_commits(&self, repo: &RepoName, intent: &IntentPayload) -> Result<()> {
        let mut page = 1u32;
        loop {
            let commits = self.github.list_commits(repo, intent.from, page).await?;
            let exhausted = commits.len() < COMMITS_PER_PAGE as usize;

            for commit in commits {
                tokio::select! {
                    sent = self.commits_tx.send(commit) => {
                        if sent.is_err() {
                            return Err(HarvestError::Internal("commits channel closed".into()));
                        }
                    }
                    _ = self.cancel.cancelled() => {
                        return Err(HarvestError::Cancelled("commit push".into()));
                    }
                }
            }

            if exhausted {
                return Ok(());
            }
            page += 1;
        }
    }
}

/// Publishes one `new_repo_info` command per item; repository metadata
/// is low-volume so there is no batching.
pub async fn repo_info_resolver(
    mut repo_info_rx: mpsc::Receiver<Repository>,
    publisher: Arc<dyn Publisher>,
    queue: String,
    cancel: CancellationToken,
) {
    loop {
        let info = tokio::select! {
            maybe = repo_info_rx.recv() => match maybe {
                Some(info) => info,
                None => break,
            },
            _ = cancel.cancelled() => break,
        };

        let command = CommitsCommand::new_repo_info(info);
        if let Err(err) = publish_with_retry(publisher.as_ref(), &queue, &command, &cancel).await {
            warn!(%err, "failed to publish repo info after retries");
        }
    }
    debug!("repo info resolver stopped");
}

/// Accumulates commits and flushes a `new_commits` batch at
/// [`BATCH_SIZE`], after [`BATCH_IDLE_FLUSH`] of quiet with a non-empty
/// batch, and finally when the channel closes or the pipeline is
/// cancelled.
pub async fn commits_resolver(
    mut commits_rx: mpsc::Receiver<Commit>,
    publisher: Arc<dyn Publisher>,
    queue: String,
    cancel: CancellationToken,
) {
    let mut batch: Vec<Commit> = Vec::with_capacity(BATCH_SIZE);

    loop {
        tokio::select! {
            maybe = commits_rx.recv() => match maybe {
                Some(commit) => {
                    batch.push(commit);
                    if batch.len() >= BATCH_SIZE {
                        flush(&mut batch, publisher.as_ref(), &queue, &cancel).await;
                    }
                }
                None => {
                    flush(&mut batch, publisher.as_ref(), &queue, &cancel).await;
                    break;
                }
            },
            _ = tokio::time::sleep(BATCH_IDLE_FLUSH), if !batch.is_empty() => {
                flush(&mut batch, publisher.as_ref(), &queue, &cancel).await;
            }
            _ = cancel.cancelled() => {
                // Best-effort final flush of whatever was queued.
                flush(&mut batch, publisher.as_ref(), &queue, &cancel).await;
                break;
            }
        }
    }
    debug!("commits resolver stopped");
}

async fn flush(
    batch: &mut Vec<Commit>,
    publisher: &dyn Publisher,
    queue: &str,
    cancel: &CancellationToken,
) {
    if batch.is_empty() {
        return;
    }
    let commits = std::mem::take(batch);
    let count = commits.len();
    let command = CommitsCommand::new_commits(commits);
    match publish_with_retry(publisher, queue, &command, cancel).await {
        Ok(()) => debug!(count, "published commit batch"),
        // Exhausted retries lose this batch: an accepted at-most-once
        // gap, re-covered by the next sweep of the same intent.
        Err(err) => warn!(count, %err, "failed to publish commit batch after retries"),
    }
}

/// Bounded retry with a fixed delay, honoring cancellation between
/// attempts.
async fn publish_with_retry(
    publisher: &dyn Publisher,
    queue: &str,
    command: &CommitsCommand,
    cancel: &CancellationToken,
) -> Result<()> {
    let body = serde_json::to_vec(command)?;

    let mut attempt = 1;
    loop {
        match publisher.publish(queue, &body).await {
            Ok(()) => return Ok(()),
            Err(err) if attempt >= PUBLISH_MAX_RETRIES => {
                return Err(err);
            }
            Err(err) => {
                warn!(attempt, max = PUBLISH_MAX_RETRIES, %err, "publish failed, retrying");
                tokio::select! {
                    _ = tokio::time::sleep(PUBLISH_RETRY_DELAY) => {}
                    _ = cancel.cancelled() => {
                        return Err(HarvestError::Cancelled("publish retry".into()));
                    }
                }
            }
        }
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MockPublisher;
    use crate::lock::memory::InMemoryLock;
    use chrono::Utc;
    use gitpulse_model::Author;
    use std::sync::Mutex;

    fn sample_commit(n: usize) -> Commit {
        Commit {
            hash: format!("hash-{n}"),
            author: Author {
                id: 1,
                name: "Mona".into(),
                email: "mona@github.com".into(),
                username: "octocat".into(),
            },
            message: format!("commit {n}"),
            url: None,
            created_at: Utc::now(),
            repository: Repository {
                full_name: "octocat/hello-world".into(),
                ..Repository::default()
            },
        }
    }

    /// Publisher that records decoded commit batches.
    #[derive(Default)]
    struct RecordingPublisher {
        batches: Mutex<Vec<CommitsCommand>>,
    }

    #[async_trait::async_trait]
    impl Publisher for RecordingPublisher {
        async fn publish(&self, _queue: &str, body: &[u8]) -> Result<()> {
            let command = serde_json::from_slice(body)?;
            self.batches.lock().unwrap().push(command);
            Ok(())
        }
    }

    #[tokio::test]
    async fn batch_flushes_at_size_threshold() {
        let (tx, rx) = mpsc::channel(BATCH_SIZE);
        let publisher = Arc::new(RecordingPublisher::default());
        let cancel = CancellationToken::new();
        let resolver = tokio::spawn(commits_resolver(
            rx,
            publisher.clone(),
            "commits".into(),
            cancel.clone(),
        ));

        for n in 0..BATCH_SIZE {
            tx.send(sample_commit(n)).await.unwrap();
        }
        drop(tx);
        resolver.await.unwrap();

        let batches = publisher.batches.lock().unwrap();
        // Exactly one full batch; nothing left over for a final flush.
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].payload.commits.len(), BATCH_SIZE);
    }

    #[tokio::test(start_paused = true)]
    async fn partial_batch_flushes_after_idle_timeout() {
        let (tx, rx) = mpsc::channel(BATCH_SIZE);
        let publisher = Arc::new(RecordingPublisher::default());
        let cancel = CancellationToken::new();
        let resolver = tokio::spawn(commits_resolver(
            rx,
            publisher.clone(),
            "commits".into(),
            cancel.clone(),
        ));

        for n in 0..3 {
            tx.send(sample_commit(n)).await.unwrap();
        }
        tokio::time::sleep(BATCH_IDLE_FLUSH + Duration::from_millis(100)).await;

        {
            let batches = publisher.batches.lock().unwrap();
            assert_eq!(batches.len(), 1);
            assert_eq!(batches[0].payload.commits.len(), 3);
        }

        drop(tx);
        resolver.await.unwrap();
        // Nothing pending, so closing the channel adds no extra publish.
        assert_eq!(publisher.batches.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn closing_the_channel_flushes_the_remainder() {
        let (tx, rx) = mpsc::channel(BATCH_SIZE);
        let publisher = Arc::new(RecordingPublisher::default());
        let resolver = tokio::spawn(commits_resolver(
            rx,
            publisher.clone(),
            "commits".into(),
            CancellationToken::new(),
        ));

        for n in 0..7 {
            tx.send(sample_commit(n)).await.unwrap();
        }
        drop(tx);
        resolver.await.unwrap();

        let batches = publisher.batches.lock().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].payload.commits.len(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn publish_retries_then_succeeds() {
        let mut publisher = MockPublisher::new();
        let mut calls = 0u32;
        publisher.expect_publish().times(3).returning(move |_, _| {
            calls += 1;
            if calls < 3 {
                Err(HarvestError::Internal("broker hiccup".into()))
            } else {
                Ok(())
            }
        });

        let command = CommitsCommand::new_commits(vec![sample_commit(0)]);
        publish_with_retry(&publisher, "commits", &command, &CancellationToken::new())
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn publish_gives_up_after_bounded_retries() {
        let mut publisher = MockPublisher::new();
        publisher
            .expect_publish()
            .times(PUBLISH_MAX_RETRIES as usize)
            .returning(|_, _| Err(HarvestError::Internal("broker down".into())));

        let command = CommitsCommand::new_commits(vec![sample_commit(0)]);
        let err = publish_with_retry(&publisher, "commits", &command, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, HarvestError::Internal(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_the_retry_delay() {
        let mut publisher = MockPublisher::new();
        publisher
            .expect_publish()
            .times(1)
            .returning(|_, _| Err(HarvestError::Internal("broker down".into())));

        let cancel = CancellationToken::new();
        cancel.cancel();
        let command = CommitsCommand::new_commits(vec![sample_commit(0)]);
        let err = publish_with_retry(&publisher, "commits", &command, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, HarvestError::Cancelled(_)));
    }

    #[tokio::test]
    async fn concurrent_commands_for_one_repository_exclude_each_other() {
        let lock = InMemoryLock::default();
        let repo: RepoName = "octocat/hello-world".parse().unwrap();

        let first = lock.acquire(&repo, LOCK_TTL).await.unwrap();
        let second = lock.acquire(&repo, LOCK_TTL).await.unwrap();
        assert!(first.is_some());
        assert!(second.is_none(), "second worker must drop its message");

        // A different repository is unaffected.
        let other: RepoName = "octocat/other".parse().unwrap();
        assert!(lock.acquire(&other, LOCK_TTL).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn unparsable_intent_command_is_rejected() {
        let (pipeline, _commits_rx, _repo_rx) = HarvestPipeline::new(
            GitHubClient::with_base_url("", "http://localhost:0").unwrap(),
            Arc::new(InMemoryLock::default()),
            CancellationToken::new(),
        );
        let err = pipeline.handle_message(b"{garbage").await.unwrap_err();
        assert!(matches!(err, HarvestError::Serialization(_)));
    }

    #[tokio::test]
    async fn cancel_commands_do_not_trigger_a_harvest() {
        let lock = Arc::new(InMemoryLock::default());
        let (pipeline, _commits_rx, _repo_rx) = HarvestPipeline::new(
            GitHubClient::with_base_url("", "http://localhost:0").unwrap(),
            lock.clone(),
            CancellationToken::new(),
        );

        let command = IntentCommand::new(
            IntentKind::CancelIntent,
            IntentPayload {
                id: uuid::Uuid::new_v4(),
                repo_owner: "octocat".into(),
                repo_name: "hello-world".into(),
                from: Utc::now(),
                until: Utc::now(),
            },
        );
        pipeline
            .handle_message(&serde_json::to_vec(&command).unwrap())
            .await
            .unwrap();

        // The lock was never taken, so a fresh acquire succeeds.
        let repo: RepoName = "octocat/hello-world".parse().unwrap();
        assert!(lock.acquire(&repo, LOCK_TTL).await.unwrap().is_some());
    }
}
