use crate::broker::Publisher;
use crate::error::{HarvestError, Result};
use crate::store::ManagerStore;
use chrono::{DateTime, Utc};
use gitpulse_contracts::{CommitsCommand, CommitsKind, IntentCommand, IntentKind, IntentPayload};
use gitpulse_model::{
    Commit, CommitPage, CommitsFilter, Intent, IntentError, IntentFilter,
    IntentStatus, IntentUpdate, Paginated, Pagination, RepoName, Repository,
    validate_start_date,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Depth of the internal broadcast queue. Producers (HTTP handlers)
/// block once the broadcast loop falls this far behind.
const BROADCAST_BUFFER: usize = 16;

/// Intent lifecycle and commit ingestion, backed by the manager store.
///
/// Mutations enqueue an [`IntentCommand`] on an internal bounded channel
/// drained by [`run_broadcast`].
pub struct ManagerService {
    store: Arc<dyn ManagerStore>,
    intents_tx: mpsc::Sender<IntentCommand>,
}

impl std::fmt::Debug for ManagerService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagerService").finish_non_exhaustive()
    }
}

impl ManagerService {
    /// Returns the service and the receiving end of its broadcast queue,
    /// which the caller hands to [`run_broadcast`].
    pub fn new(store: Arc<dyn ManagerStore>) -> (Self, mpsc::Receiver<IntentCommand>) {
        let (intents_tx, intents_rx) = mpsc::channel(BROADCAST_BUFFER);
        (Self { store, intents_tx }, intents_rx)
    }

    /// Validates and persists a new intent (pending broadcast, active),
    /// then enqueues it for broadcast.
    pub async fn create_intent(
        &self,
        repository: &str,
        start_date: DateTime<Utc>,
    ) -> Result<Intent> {
        let repo: RepoName = repository.parse()?;
        validate_start_date(start_date)?;

        let intent = self
            .store
            .save_intent(Intent {
                id: Uuid::new_v4(),
                repository_name: repo.full_name(),
                start_date,
                until: Utc::now(),
                status: IntentStatus::PendingBroadcast,
                is_active: true,
                error: None,
            })
            .await?;

        self.enqueue(IntentKind::NewIntent, &intent, &repo).await?;
        Ok(intent)
    }

    /// Toggles `is_active`. The outbound command kind reflects the
    /// transition: deactivation cancels, reactivation re-announces.
    pub async fn toggle_intent_activation(&self, id: Uuid) -> Result<Intent> {
        let intent = self
            .store
            .find_intent(id)
            .await?
            .ok_or(HarvestError::IntentNotFound(id))?;

        let was_active = intent.is_active;
        let now_active = !was_active;
        let updated = self
            .store
            .update_intent(
                id,
                IntentUpdate {
                    is_active: Some(now_active),
                    ..Default::default()
                },
            )
            .await?;

        let kind = if was_active && !now_active {
            IntentKind::CancelIntent
        } else if !was_active && now_active {
            IntentKind::NewIntent
        } else {
            IntentKind::UpdateIntent
        };

        let repo: RepoName = updated.repository_name.parse()?;
        self.enqueue(kind, &updated, &repo).await?;
        Ok(updated)
    }

    /// Moves the harvest window's start; the new date must not be in the
    /// future.
    pub async fn reset_start_date(&self, id: Uuid, new_date: DateTime<Utc>) -> Result<Intent> {
        validate_start_date(new_date)?;

        let updated = self
            .store
            .update_intent(
                id,
                IntentUpdate {
                    start_date: Some(new_date),
                    ..Default::default()
                },
            )
            .await?;

        let repo: RepoName = updated.repository_name.parse()?;
        self.enqueue(IntentKind::UpdateIntent, &updated, &repo).await?;
        Ok(updated)
    }

    pub async fn get_intent(&self, id: Uuid) -> Result<Option<Intent>> {
        self.store.find_intent(id).await
    }

    pub async fn list_intents(
        &self,
        filter: IntentFilter,
        pagination: Pagination,
    ) -> Result<Paginated<Intent>> {
        self.store.find_intents(filter, pagination).await
    }

    pub async fn find_repository(&self, full_name: &str) -> Result<Option<Repository>> {
        self.store.get_repo(full_name).await
    }

    pub async fn top_committers(
        &self,
        full_name: &str,
        pagination: Pagination,
    ) -> Result<Paginated<gitpulse_model::AuthorStats>> {
        self.store.top_committers(full_name, pagination).await
    }

    pub async fn get_commits(
        &self,
        full_name: &str,
        start_date: Option<DateTime<Utc>>,
        end_date: Option<DateTime<Utc>>,
        pagination: Pagination,
    ) -> Result<CommitPage> {
        self.store
            .get_repo(full_name)
            .await?
            .ok_or_else(|| HarvestError::RepositoryNotFound(full_name.to_owned()))?;

        let page = self
            .store
            .find_commits(
                CommitsFilter {
                    repository_name: full_name.to_owned(),
                    start_date,
                    end_date,
                    author_username: None,
                },
                pagination,
            )
            .await?;

        Ok(CommitPage {
            commits: page.data,
            total_count: page.total_count,
            page: page.page,
            per_page: page.per_page,
        })
    }

    /// Handles one body from the commits queue. Decode failures bubble
    /// up so the consumer loop can log and drop the message.
    pub async fn process_commits_message(&self, body: &[u8]) -> Result<()> {
        let command: CommitsCommand = serde_json::from_slice(body)?;

        match command.kind {
            CommitsKind::NewRepoInfo => {
                let repo = command.payload.repo.ok_or_else(|| {
                    HarvestError::Internal("repo info missing in payload".into())
                })?;
                debug!(repo = %repo.full_name, "ingesting repository info");
                self.store.save_repo(&repo).await
            }
            CommitsKind::NewCommits => {
                if command.payload.commits.is_empty() {
                    return Err(HarvestError::Internal(
                        "commits missing in payload".into(),
                    ));
                }
                self.batch_save_commits(command.payload.commits).await
            }
        }
    }

    /// Persists a harvested batch, one transaction per repository group.
    ///
    /// A group whose repository has not been ingested yet is dropped
    /// (the scout's next sweep re-harvests it); sibling groups proceed.
    pub async fn batch_save_commits(&self, mut commits: Vec<Commit>) -> Result<()> {
        if commits.is_empty() {
            return Ok(());
        }

        commits.sort_by(|a, b| a.repository.full_name.cmp(&b.repository.full_name));

        for group in commits.chunk_by(|a, b| a.repository.full_name == b.repository.full_name) {
            let full_name = &group[0].repository.full_name;
            match self.store.get_repo(full_name).await? {
                Some(repo) => {
                    self.store.save_many_commits(repo.id, group).await?;
                    debug!(repo = %full_name, count = group.len(), "ingested commit group");
                }
                None => {
                    warn!(
                        repo = %full_name,
                        count = group.len(),
                        "dropping commit group for unknown repository"
                    );
                }
            }
        }

        Ok(())
    }

    async fn enqueue(&self, kind: IntentKind, intent: &Intent, repo: &RepoName) -> Result<()> {
        let command = IntentCommand::new(
            kind,
            IntentPayload {
                id: intent.id,
                repo_owner: repo.owner().to_owned(),
                repo_name: repo.name().to_owned(),
                from: intent.start_date,
                until: intent.until,
            },
        );
        self.intents_tx
            .send(command)
            .await
            .map_err(|_| HarvestError::Internal("broadcast queue closed".into()))
    }
}

/// Drains the broadcast queue, publishing each command and flipping the
/// source intent to `success_broadcast` on publish success.
///
/// Publish failure leaves the intent pending (the scout sweep will
/// re-broadcast it) and records an intent error. Exits when cancelled or
/// when the queue is closed and drained.
pub async fn run_broadcast(
    store: Arc<dyn ManagerStore>,
    mut commands: mpsc::Receiver<IntentCommand>,
    publisher: Arc<dyn Publisher>,
    queue: String,
    cancel: CancellationToken,
) {
    info!(queue, "broadcast loop started");
    loop {
        let command = tokio::select! {
            maybe = commands.recv() => match maybe {
                Some(command) => command,
                None => break,
            },
            _ = cancel.cancelled() => break,
        };

        let body = match serde_json::to_vec(&command) {
            Ok(body) => body,
            Err(err) => {
                error!(%err, "failed to marshal intent command");
                continue;
            }
        };

        if let Err(err) = publisher.publish(&queue, &body).await {
            warn!(intent = %command.intent.id, %err, "failed to publish intent command; left pending for re-broadcast");
            if let Err(err) = store
                .save_intent_error(IntentError {
                    id: Uuid::new_v4(),
                    intent_id: command.intent.id,
                    created_at: Utc::now(),
                    message: err.to_string(),
                })
                .await
            {
                error!(intent = %command.intent.id, %err, "failed to record intent error");
            }
            continue;
        }

        if let Err(err) = store
            .update_intent(
                command.intent.id,
                IntentUpdate {
                    status: Some(IntentStatus::SuccessBroadcast),
                    ..Default::default()
                },
            )
            .await
        {
            error!(intent = %command.intent.id, %err, "failed to mark intent as broadcast");
        }
    }
    info!("broadcast loop stopped");
}
