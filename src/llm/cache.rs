// src/llm/cache.rs

//! Process-lifetime memoization of completions.

use super::{LlmClient, Prompt};
use crate::error::ServiceError;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

/// Wraps a client and answers repeated identical prompts from memory.
///
/// Entries are keyed by a hash of purpose, model and both prompt texts, so
/// any difference in input produces a different key. Only successful
/// completions are stored; a failed call is retried on the next request.
pub struct CachedClient<C> {
    inner: C,
    entries: Mutex<HashMap<String, String>>,
}

impl<C: LlmClient> CachedClient<C> {
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn key(&self, prompt: &Prompt<'_>) -> String {
        let mut hasher = Sha256::new();
        for part in [
            prompt.purpose.as_str(),
            self.inner.model(),
            prompt.system,
            prompt.user.as_str(),
        ] {
            hasher.update((part.len() as u64).to_le_bytes());
            hasher.update(part.as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    /// Drop every cached completion.
    #[cfg(test)]
    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }
}

#[async_trait]
impl<C: LlmClient> LlmClient for CachedClient<C> {
    async fn complete(&self, prompt: &Prompt<'_>) -> Result<String, ServiceError> {
        let key = self.key(prompt);
        let hit = self
            .entries
            .lock()
            .ok()
            .and_then(|entries| entries.get(&key).cloned());
        if let Some(cached) = hit {
            debug!(purpose = prompt.purpose.as_str(), key = &key[..12], "Cache hit");
            return Ok(cached);
        }

        debug!(purpose = prompt.purpose.as_str(), key = &key[..12], "Cache miss");
        let completion = self.inner.complete(prompt).await?;
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key, completion.clone());
        }
        Ok(completion)
    }

    fn name(&self) -> &str {
        self.inner.name()
    }

    fn model(&self) -> &str {
        self.inner.model()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Purpose;
    use crate::llm::testing::FakeLlm;

    fn prompt(purpose: Purpose, user: &str) -> Prompt<'static> {
        Prompt {
            purpose,
            system: "system",
            user: user.to_string(),
        }
    }

    #[tokio::test]
    async fn test_repeated_prompt_hits_cache() {
        let cached = CachedClient::new(FakeLlm::new().reply(Purpose::Keywords, "{}"));

        cached.complete(&prompt(Purpose::Keywords, "paper")).await.unwrap();
        cached.complete(&prompt(Purpose::Keywords, "paper")).await.unwrap();
        assert_eq!(cached.inner.calls(Purpose::Keywords), 1);
        assert_eq!(cached.len(), 1);

        cached.complete(&prompt(Purpose::Keywords, "steel")).await.unwrap();
        assert_eq!(cached.inner.calls(Purpose::Keywords), 2);
        assert_eq!(cached.len(), 2);
    }

    #[tokio::test]
    async fn test_purpose_is_part_of_key() {
        let fake = FakeLlm::new()
            .reply(Purpose::Keywords, "{}")
            .reply(Purpose::Estimation, "{}");
        let cached = CachedClient::new(fake);

        cached.complete(&prompt(Purpose::Keywords, "same")).await.unwrap();
        cached.complete(&prompt(Purpose::Estimation, "same")).await.unwrap();
        assert_eq!(cached.len(), 2);
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let cached = CachedClient::new(FakeLlm::new());
        assert!(cached.complete(&prompt(Purpose::Keywords, "x")).await.is_err());
        assert!(cached.complete(&prompt(Purpose::Keywords, "x")).await.is_err());
        assert_eq!(cached.inner.calls(Purpose::Keywords), 2);
        assert_eq!(cached.len(), 0);
    }

    #[tokio::test]
    async fn test_clear_invalidates() {
        let cached = CachedClient::new(FakeLlm::new().reply(Purpose::Keywords, "{}"));
        cached.complete(&prompt(Purpose::Keywords, "paper")).await.unwrap();
        cached.clear();
        assert_eq!(cached.len(), 0);
        cached.complete(&prompt(Purpose::Keywords, "paper")).await.unwrap();
        assert_eq!(cached.inner.calls(Purpose::Keywords), 2);
    }
}
