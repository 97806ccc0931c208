//! Shared test doubles and generators.
//!
//! [`MockPlatform`] is an in-memory messaging platform: it stores messages
//! per channel, records every call in order, and fails on request.
//! [`MockSource`] answers entity state and repository queries from a script.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use proptest::prelude::*;
use serde_json::Value;

use crate::discord::{ChannelMessage, MessagingPlatform, PlatformError};
use crate::format::NotificationChunk;
use crate::github::{
    EntityState, EntityStateSource, GitHubApiError, GitHubErrorKind, RepoStats, RepositorySource,
};
use crate::types::{ChannelId, EntityKey, MessageHandle, MessageId, RepoName};

// ─── Generators ───

pub fn arb_entity_key() -> impl Strategy<Value = EntityKey> {
    ("[a-z][a-z0-9-]{0,10}/[a-z][a-z0-9._-]{0,10}", any::<u64>())
        .prop_map(|(repo, number)| EntityKey::new(repo, number))
}

pub fn arb_handle() -> impl Strategy<Value = MessageHandle> {
    (any::<u64>(), any::<u64>())
        .prop_map(|(c, m)| MessageHandle::new(ChannelId(c), MessageId(m)))
}

// ─── Messaging platform ───

/// One recorded platform call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformCall {
    SendStarted { channel: ChannelId, title: String },
    SendFinished { channel: ChannelId, ok: bool },
    Edit { handle: MessageHandle, ok: bool },
    Delete { handle: MessageHandle, ok: bool },
    List { channel: ChannelId, before: Option<MessageId> },
    Rename { channel: ChannelId, name: String },
}

struct StoredMessage {
    timestamp: DateTime<Utc>,
    /// `None` for seeded messages.
    content: Option<NotificationChunk>,
}

#[derive(Default)]
struct PlatformState {
    next_id: u64,
    messages: BTreeMap<ChannelId, BTreeMap<MessageId, StoredMessage>>,
    calls: Vec<PlatformCall>,
    sent: Vec<(ChannelId, NotificationChunk)>,
    deleted: Vec<MessageHandle>,
    send_attempts: HashMap<ChannelId, usize>,
    failing_sends: HashMap<ChannelId, PlatformError>,
    next_send_failures: HashMap<ChannelId, VecDeque<PlatformError>>,
    failing_deletes: HashMap<MessageHandle, PlatformError>,
    failing_lists: HashMap<ChannelId, PlatformError>,
    failing_renames: HashMap<ChannelId, PlatformError>,
    channel_names: HashMap<ChannelId, String>,
    in_flight_sends: usize,
    max_in_flight_sends: usize,
}

impl PlatformState {
    fn allocate(
        &mut self,
        channel: ChannelId,
        timestamp: DateTime<Utc>,
        content: Option<NotificationChunk>,
    ) -> MessageHandle {
        self.next_id += 1;
        let id = MessageId(1_000_000 + self.next_id);
        self.messages
            .entry(channel)
            .or_default()
            .insert(id, StoredMessage { timestamp, content });
        MessageHandle::new(channel, id)
    }

    fn message_mut(&mut self, handle: MessageHandle) -> Option<&mut StoredMessage> {
        self.messages
            .get_mut(&handle.channel_id)?
            .get_mut(&handle.message_id)
    }
}

#[derive(Default)]
pub struct MockPlatform {
    state: Mutex<PlatformState>,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, PlatformState> {
        self.state.lock().unwrap()
    }

    /// Every send to `channel` fails with `error`.
    pub fn fail_sends_to(&self, channel: ChannelId, error: PlatformError) {
        self.lock().failing_sends.insert(channel, error);
    }

    /// The next send to `channel` fails with `error`; later ones succeed.
    pub fn fail_next_send(&self, channel: ChannelId, error: PlatformError) {
        self.lock()
            .next_send_failures
            .entry(channel)
            .or_default()
            .push_back(error);
    }

    pub fn fail_deletes_of(&self, handle: MessageHandle, error: PlatformError) {
        self.lock().failing_deletes.insert(handle, error);
    }

    pub fn fail_lists_of(&self, channel: ChannelId, error: PlatformError) {
        self.lock().failing_lists.insert(channel, error);
    }

    pub fn fail_renames_of(&self, channel: ChannelId, error: PlatformError) {
        self.lock().failing_renames.insert(channel, error);
    }

    /// Places a message in `channel` as if posted at `timestamp`.
    pub fn seed_message(&self, channel: ChannelId, timestamp: DateTime<Utc>) -> MessageHandle {
        self.lock().allocate(channel, timestamp, None)
    }

    /// Current content of a sent message, reflecting edits.
    pub fn current(&self, handle: MessageHandle) -> Option<NotificationChunk> {
        self.lock().message_mut(handle)?.content.clone()
    }

    pub fn channel_name(&self, channel: ChannelId) -> Option<String> {
        self.lock().channel_names.get(&channel).cloned()
    }

    pub fn edits(&self) -> Vec<MessageHandle> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                PlatformCall::Edit { handle, ok: true } => Some(*handle),
                _ => None,
            })
            .collect()
    }

    pub fn calls(&self) -> Vec<PlatformCall> {
        self.lock().calls.clone()
    }

    /// Successful sends, in order.
    pub fn sent(&self) -> Vec<(ChannelId, NotificationChunk)> {
        self.lock().sent.clone()
    }

    pub fn sent_to(&self, channel: ChannelId) -> Vec<NotificationChunk> {
        self.lock()
            .sent
            .iter()
            .filter(|(c, _)| *c == channel)
            .map(|(_, chunk)| chunk.clone())
            .collect()
    }

    /// Send attempts to `channel`, successful or not.
    pub fn send_attempts_to(&self, channel: ChannelId) -> usize {
        self.lock().send_attempts.get(&channel).copied().unwrap_or(0)
    }

    /// Successful deletes, in order.
    pub fn deleted(&self) -> Vec<MessageHandle> {
        self.lock().deleted.clone()
    }

    /// Ids of messages currently in `channel`, oldest first.
    pub fn messages_in(&self, channel: ChannelId) -> Vec<MessageId> {
        self.lock()
            .messages
            .get(&channel)
            .map(|m| m.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn max_concurrent_sends(&self) -> usize {
        self.lock().max_in_flight_sends
    }
}

impl MessagingPlatform for MockPlatform {
    async fn send_message(
        &self,
        channel: ChannelId,
        chunk: &NotificationChunk,
    ) -> Result<MessageHandle, PlatformError> {
        {
            let mut s = self.lock();
            s.calls.push(PlatformCall::SendStarted {
                channel,
                title: chunk.title.clone(),
            });
            *s.send_attempts.entry(channel).or_default() += 1;
            s.in_flight_sends += 1;
            s.max_in_flight_sends = s.max_in_flight_sends.max(s.in_flight_sends);
        }

        // Gives any concurrent send a chance to interleave.
        tokio::task::yield_now().await;

        let mut s = self.lock();
        s.in_flight_sends -= 1;
        let scripted = s
            .next_send_failures
            .get_mut(&channel)
            .and_then(VecDeque::pop_front)
            .or_else(|| s.failing_sends.get(&channel).cloned());
        let result = match scripted {
            Some(error) => Err(error),
            None => {
                let handle = s.allocate(channel, Utc::now(), Some(chunk.clone()));
                s.sent.push((channel, chunk.clone()));
                Ok(handle)
            }
        };
        s.calls.push(PlatformCall::SendFinished {
            channel,
            ok: result.is_ok(),
        });
        result
    }

    async fn edit_message(
        &self,
        handle: MessageHandle,
        chunk: &NotificationChunk,
    ) -> Result<(), PlatformError> {
        let mut s = self.lock();
        let result = match s.message_mut(handle) {
            Some(message) => {
                message.content = Some(chunk.clone());
                Ok(())
            }
            None => Err(PlatformError::not_found("Unknown Message")),
        };
        s.calls.push(PlatformCall::Edit {
            handle,
            ok: result.is_ok(),
        });
        result
    }

    async fn delete_message(&self, handle: MessageHandle) -> Result<(), PlatformError> {
        let mut s = self.lock();
        let result = if let Some(error) = s.failing_deletes.get(&handle).cloned() {
            Err(error)
        } else {
            let removed = s
                .messages
                .get_mut(&handle.channel_id)
                .and_then(|m| m.remove(&handle.message_id))
                .is_some();
            if removed {
                s.deleted.push(handle);
                Ok(())
            } else {
                Err(PlatformError::not_found("Unknown Message"))
            }
        };
        s.calls.push(PlatformCall::Delete {
            handle,
            ok: result.is_ok(),
        });
        result
    }

    async fn list_messages(
        &self,
        channel: ChannelId,
        before: Option<MessageId>,
        limit: u8,
    ) -> Result<Vec<ChannelMessage>, PlatformError> {
        let mut s = self.lock();
        s.calls.push(PlatformCall::List { channel, before });
        if let Some(error) = s.failing_lists.get(&channel).cloned() {
            return Err(error);
        }
        Ok(s.messages
            .get(&channel)
            .map(|messages| {
                messages
                    .iter()
                    .rev()
                    .filter(|(id, _)| before.is_none_or(|b| **id < b))
                    .take(usize::from(limit))
                    .map(|(id, message)| ChannelMessage {
                        id: *id,
                        timestamp: message.timestamp,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn rename_channel(&self, channel: ChannelId, name: &str) -> Result<(), PlatformError> {
        let mut s = self.lock();
        s.calls.push(PlatformCall::Rename {
            channel,
            name: name.to_string(),
        });
        if let Some(error) = s.failing_renames.get(&channel).cloned() {
            return Err(error);
        }
        s.channel_names.insert(channel, name.to_string());
        Ok(())
    }
}

// ─── Entity state source ───

#[derive(Debug, Clone, Copy)]
enum Scripted {
    State(EntityState),
    Error(GitHubErrorKind),
}

#[derive(Default)]
struct SourceState {
    scripted: HashMap<EntityKey, Scripted>,
    queries: Vec<EntityKey>,
    delay: Option<Duration>,
    repo_stats: HashMap<RepoName, RepoStats>,
    open_pulls: HashMap<RepoName, Vec<Value>>,
    failing_repos: HashMap<RepoName, GitHubErrorKind>,
}

/// Scripted entity states and repositories. Unscripted keys report as open;
/// unscripted repositories have zero counts and no open pull requests.
#[derive(Default)]
pub struct MockSource {
    state: Mutex<SourceState>,
}

impl MockSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_state(&self, key: &EntityKey, state: EntityState) {
        self.state
            .lock()
            .unwrap()
            .scripted
            .insert(key.clone(), Scripted::State(state));
    }

    pub fn set_error(&self, key: &EntityKey, kind: GitHubErrorKind) {
        self.state
            .lock()
            .unwrap()
            .scripted
            .insert(key.clone(), Scripted::Error(kind));
    }

    /// Every query sleeps this long before answering.
    pub fn set_delay(&self, delay: Duration) {
        self.state.lock().unwrap().delay = Some(delay);
    }

    pub fn queries(&self) -> Vec<EntityKey> {
        self.state.lock().unwrap().queries.clone()
    }

    pub fn set_repo_stats(&self, repo: &RepoName, stats: RepoStats) {
        self.state.lock().unwrap().repo_stats.insert(repo.clone(), stats);
    }

    pub fn set_open_pulls(&self, repo: &RepoName, pulls: Vec<Value>) {
        self.state.lock().unwrap().open_pulls.insert(repo.clone(), pulls);
    }

    /// Every repository query for `repo` fails with `kind`.
    pub fn fail_repo(&self, repo: &RepoName, kind: GitHubErrorKind) {
        self.state.lock().unwrap().failing_repos.insert(repo.clone(), kind);
    }

    fn repo_failure(&self, repo: &RepoName) -> Option<GitHubApiError> {
        let kind = self.state.lock().unwrap().failing_repos.get(repo).copied()?;
        Some(GitHubApiError::new(kind, format!("scripted failure for {repo}")))
    }
}

impl EntityStateSource for MockSource {
    async fn entity_state(&self, key: &EntityKey) -> Result<EntityState, GitHubApiError> {
        let (scripted, delay) = {
            let mut s = self.state.lock().unwrap();
            s.queries.push(key.clone());
            (s.scripted.get(key).copied(), s.delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match scripted {
            None => Ok(EntityState::OPEN),
            Some(Scripted::State(state)) => Ok(state),
            Some(Scripted::Error(GitHubErrorKind::NotFound)) => {
                Err(GitHubApiError::not_found(format!("{key} not found")))
            }
            Some(Scripted::Error(kind)) => Err(GitHubApiError::new(kind, "scripted failure")),
        }
    }
}

impl RepositorySource for MockSource {
    async fn repo_stats(&self, repo: &RepoName) -> Result<RepoStats, GitHubApiError> {
        if let Some(error) = self.repo_failure(repo) {
            return Err(error);
        }
        Ok(self
            .state
            .lock()
            .unwrap()
            .repo_stats
            .get(repo)
            .copied()
            .unwrap_or_default())
    }

    async fn open_pull_requests(&self, repo: &RepoName) -> Result<Vec<Value>, GitHubApiError> {
        if let Some(error) = self.repo_failure(repo) {
            return Err(error);
        }
        Ok(self
            .state
            .lock()
            .unwrap()
            .open_pulls
            .get(repo)
            .cloned()
            .unwrap_or_default())
    }
}
