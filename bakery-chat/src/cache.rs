//! Local Message Cache: keeps message objects stable across overlapping
//! snapshots so the view layer can skip re-rendering unchanged entries.

use std::collections::HashMap;
use std::sync::Arc;

use crate::models::ChatMessage;

#[derive(Debug, Default, Clone)]
pub struct MessageCache {
    entries: HashMap<String, Arc<ChatMessage>>,
}

impl MessageCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Arc<ChatMessage>> {
        self.entries.get(id)
    }

    /// Fold a full snapshot into the cache and return what to render, in
    /// snapshot order.
    ///
    /// An entry with the same id and timestamp is handed back as the cached
    /// `Arc` (pointer-equal to last time) unless a field such as the read flag
    /// changed. Ids missing from the snapshot are dropped, so deleted messages
    /// disappear.
    pub fn reconcile(&self, snapshot: &[ChatMessage]) -> (MessageCache, Vec<Arc<ChatMessage>>) {
        let mut entries = HashMap::with_capacity(snapshot.len());
        let mut render = Vec::with_capacity(snapshot.len());

        for message in snapshot {
            let entry = match self.entries.get(&message.id) {
                Some(cached) if cached.timestamp == message.timestamp && **cached == *message => {
                    cached.clone()
                }
                _ => Arc::new(message.clone()),
            };
            entries.insert(message.id.clone(), entry.clone());
            render.push(entry);
        }

        (MessageCache { entries }, render)
    }

    /// In-place form of [`MessageCache::reconcile`].
    pub fn apply(&mut self, snapshot: &[ChatMessage]) -> Vec<Arc<ChatMessage>> {
        let (next, render) = self.reconcile(snapshot);
        *self = next;
        render
    }
}
