use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

/// conversation id -> id of the job currently generating for it.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ActiveJobRegistry {
    jobs: HashMap<String, String>,
}

impl ActiveJobRegistry {
    /// Track `job_id` for the conversation, returning the job it replaced.
    pub fn register(&mut self, conversation_id: &str, job_id: &str) -> Option<String> {
        self.jobs
            .insert(conversation_id.to_string(), job_id.to_string())
    }

    pub fn get(&self, conversation_id: &str) -> Option<&str> {
        self.jobs.get(conversation_id).map(String::as_str)
    }

    pub fn contains(&self, conversation_id: &str) -> bool {
        self.jobs.contains_key(conversation_id)
    }

    pub fn remove(&mut self, conversation_id: &str) -> Option<String> {
        self.jobs.remove(conversation_id)
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn entries(&self) -> Vec<(String, String)> {
        let mut out: Vec<_> = self
            .jobs
            .iter()
            .map(|(c, j)| (c.clone(), j.clone()))
            .collect();
        out.sort();
        out
    }
}

#[derive(Default)]
struct HandleMap {
    next_generation: u64,
    open: HashMap<String, (u64, CancellationToken)>,
}

/// Cancellation handles of open streams, keyed by conversation id.
#[derive(Clone, Default)]
pub struct StreamHandles {
    inner: Arc<Mutex<HandleMap>>,
}

impl StreamHandles {
    fn lock(&self) -> std::sync::MutexGuard<'_, HandleMap> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Claim the stream slot of a conversation. `None` when a stream is
    /// already open for it.
    pub fn acquire(&self, conversation_id: &str) -> Option<StreamLease> {
        let mut map = self.lock();
        if map.open.contains_key(conversation_id) {
            return None;
        }
        map.next_generation += 1;
        let generation = map.next_generation;
        let token = CancellationToken::new();
        map.open
            .insert(conversation_id.to_string(), (generation, token.clone()));
        Some(StreamLease {
            handles: self.clone(),
            conversation_id: conversation_id.to_string(),
            generation,
            token,
        })
    }

    pub fn is_open(&self, conversation_id: &str) -> bool {
        self.lock().open.contains_key(conversation_id)
    }

    /// Signal the open stream of one conversation. The slot is released by
    /// the stream's lease once it has wound down.
    pub fn cancel(&self, conversation_id: &str) -> bool {
        match self.lock().open.get(conversation_id) {
            Some((_, token)) if !token.is_cancelled() => {
                token.cancel();
                true
            }
            _ => false,
        }
    }

    pub fn cancel_all(&self) -> usize {
        let map = self.lock();
        let mut cancelled = 0;
        for (_, token) in map.open.values() {
            if !token.is_cancelled() {
                token.cancel();
                cancelled += 1;
            }
        }
        cancelled
    }

    #[cfg(test)]
    pub fn open_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().open.keys().cloned().collect();
        ids.sort();
        ids
    }
}

/// Ownership of one conversation's stream slot. Dropping it frees the slot on
/// every exit path of the stream task.
pub struct StreamLease {
    handles: StreamHandles,
    conversation_id: String,
    generation: u64,
    token: CancellationToken,
}

impl StreamLease {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }
}

impl Drop for StreamLease {
    fn drop(&mut self) {
        let mut map = self.handles.lock();
        let owned = map
            .open
            .get(&self.conversation_id)
            .is_some_and(|(generation, _)| *generation == self.generation);
        if owned {
            map.open.remove(&self.conversation_id);
        }
    }
}
