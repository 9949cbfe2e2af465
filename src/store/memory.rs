use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    error::{ChatError, ChatResult},
    now_ms,
};

use super::{
    Appended, BoxFuture, ChatStore, ChatThread, LastMessage, Message, MessagePage, NewMessage,
    ParticipantSet,
};

#[derive(Default)]
struct State {
    threads: HashMap<Uuid, ChatThread>,
    messages: HashMap<Uuid, Vec<Message>>,
    by_key: HashMap<(String, String), Uuid>,
}

/// Process-local store used by tests and storage-less deployments.
#[derive(Clone, Default)]
pub struct InMemoryChatStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChatStore for InMemoryChatStore {
    fn find_or_create_thread(
        &self,
        participants: ParticipantSet,
        car_ref: Option<String>,
    ) -> BoxFuture<'_, ChatResult<(ChatThread, bool)>> {
        Box::pin(async move {
            let car_ref = car_ref.filter(|car| !car.is_empty());
            let key = (participants.key(), car_ref.clone().unwrap_or_default());
            let mut state = self.state.write().await;

            if let Some(thread) = state
                .by_key
                .get(&key)
                .and_then(|id| state.threads.get(id))
            {
                return Ok((thread.clone(), false));
            }

            let now = now_ms();
            let thread = ChatThread {
                id: Uuid::now_v7(),
                participants,
                car_ref,
                last_message: None,
                is_active: true,
                created_at: now,
                updated_at: now,
            };
            state.by_key.insert(key, thread.id);
            state.messages.insert(thread.id, Vec::new());
            state.threads.insert(thread.id, thread.clone());

            Ok((thread, true))
        })
    }

    fn get_thread(&self, thread_id: Uuid) -> BoxFuture<'_, ChatResult<Option<ChatThread>>> {
        Box::pin(async move { Ok(self.state.read().await.threads.get(&thread_id).cloned()) })
    }

    fn append_message(
        &self,
        thread_id: Uuid,
        message: NewMessage,
    ) -> BoxFuture<'_, ChatResult<Appended>> {
        Box::pin(async move {
            let mut state = self.state.write().await;
            let state = &mut *state;

            let thread = state
                .threads
                .get_mut(&thread_id)
                .ok_or(ChatError::ThreadNotFound(thread_id))?;
            if !thread.is_participant(&message.sender_id) {
                return Err(ChatError::NotParticipant);
            }
            if !thread.is_active {
                return Err(ChatError::ThreadInactive(thread_id));
            }

            // keep created_at strictly increasing per thread so history
            // cursors never skip a message
            let last_at = thread.last_message.as_ref().map_or(0, |last| last.timestamp);
            let message = message.into_message(thread_id, now_ms().max(last_at + 1));

            thread.last_message = Some(LastMessage::of(&message));
            thread.updated_at = message.created_at;
            state
                .messages
                .entry(thread_id)
                .or_default()
                .push(message.clone());

            Ok(Appended {
                thread: thread.clone(),
                message,
            })
        })
    }

    fn mark_read(&self, thread_id: Uuid, reader_id: String) -> BoxFuture<'_, ChatResult<u64>> {
        Box::pin(async move {
            let mut state = self.state.write().await;
            if !state.threads.contains_key(&thread_id) {
                return Err(ChatError::ThreadNotFound(thread_id));
            }

            let mut changed = 0;
            for message in state.messages.entry(thread_id).or_default() {
                if message.sender_id != reader_id && !message.is_read {
                    message.is_read = true;
                    changed += 1;
                }
            }

            Ok(changed)
        })
    }

    fn list_for_user(&self, user_id: String) -> BoxFuture<'_, ChatResult<Vec<ChatThread>>> {
        Box::pin(async move {
            let state = self.state.read().await;
            let mut threads: Vec<ChatThread> = state
                .threads
                .values()
                .filter(|thread| thread.is_participant(&user_id))
                .cloned()
                .collect();
            threads.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id)));

            Ok(threads)
        })
    }

    fn list_messages(
        &self,
        thread_id: Uuid,
        page: MessagePage,
    ) -> BoxFuture<'_, ChatResult<Vec<Message>>> {
        Box::pin(async move {
            let state = self.state.read().await;
            let messages = state
                .messages
                .get(&thread_id)
                .ok_or(ChatError::ThreadNotFound(thread_id))?;

            let older: Vec<&Message> = messages
                .iter()
                .filter(|message| page.before.is_none_or(|before| message.created_at < before))
                .collect();
            let skip = older.len().saturating_sub(page.limit);

            Ok(older.into_iter().skip(skip).cloned().collect())
        })
    }

    fn set_active(&self, thread_id: Uuid, active: bool) -> BoxFuture<'_, ChatResult<ChatThread>> {
        Box::pin(async move {
            let mut state = self.state.write().await;
            let thread = state
                .threads
                .get_mut(&thread_id)
                .ok_or(ChatError::ThreadNotFound(thread_id))?;
            thread.is_active = active;
            thread.updated_at = now_ms().max(thread.updated_at);

            Ok(thread.clone())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MessageKind;

    fn pair(a: &str, b: &str) -> ParticipantSet {
        ParticipantSet::new([a, b]).unwrap()
    }

    #[tokio::test]
    async fn test_find_or_create_is_duplicate_free() {
        let store = InMemoryChatStore::new();
        let (first, created) = store
            .find_or_create_thread(pair("a", "b"), Some("car-1".into()))
            .await
            .unwrap();
        assert!(created);

        let (again, created) = store
            .find_or_create_thread(pair("b", "a"), Some("car-1".into()))
            .await
            .unwrap();
        assert!(!created);
        assert_eq!(first.id, again.id);

        let (other_car, created) = store
            .find_or_create_thread(pair("a", "b"), None)
            .await
            .unwrap();
        assert!(created);
        assert_ne!(first.id, other_car.id);
    }

    #[tokio::test]
    async fn test_concurrent_creation_yields_one_thread() {
        let store = InMemoryChatStore::new();
        let (left, right) = tokio::join!(
            store.find_or_create_thread(pair("a", "b"), Some("car".into())),
            store.find_or_create_thread(pair("b", "a"), Some("car".into())),
        );
        assert_eq!(left.unwrap().0.id, right.unwrap().0.id);
        assert_eq!(store.list_for_user("a".into()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_append_checks_thread_and_participant() {
        let store = InMemoryChatStore::new();
        let missing = Uuid::now_v7();
        assert_eq!(
            store.append_message(missing, NewMessage::text("a", "hi")).await,
            Err(ChatError::ThreadNotFound(missing))
        );

        let (thread, _) = store.find_or_create_thread(pair("a", "b"), None).await.unwrap();
        assert_eq!(
            store.append_message(thread.id, NewMessage::text("c", "hi")).await,
            Err(ChatError::NotParticipant)
        );
        assert!(store.list_messages(thread.id, MessagePage::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_append_updates_summary_and_round_trips() {
        let store = InMemoryChatStore::new();
        let (thread, _) = store.find_or_create_thread(pair("a", "b"), None).await.unwrap();

        let submitted = NewMessage {
            sender_id: "a".into(),
            content: "hello".into(),
            kind: MessageKind::Text,
            attachments: vec![serde_json::json!({ "url": "x" })],
        };
        let appended = store.append_message(thread.id, submitted.clone()).await.unwrap();
        assert_eq!(appended.thread.last_message.as_ref().unwrap().content, "hello");
        assert_eq!(appended.thread.updated_at, appended.message.created_at);

        let history = store.list_messages(thread.id, MessagePage::default()).await.unwrap();
        assert_eq!(history, vec![appended.message.clone()]);
        assert_eq!(history[0].sender_id, submitted.sender_id);
        assert_eq!(history[0].content, submitted.content);
        assert_eq!(history[0].attachments, submitted.attachments);
    }

    #[tokio::test]
    async fn test_mark_read_is_idempotent_and_skips_own_messages() {
        let store = InMemoryChatStore::new();
        let (thread, _) = store.find_or_create_thread(pair("a", "b"), None).await.unwrap();
        store.append_message(thread.id, NewMessage::text("a", "1")).await.unwrap();
        store.append_message(thread.id, NewMessage::text("b", "2")).await.unwrap();

        assert_eq!(store.mark_read(thread.id, "b".into()).await.unwrap(), 1);
        assert_eq!(store.mark_read(thread.id, "b".into()).await.unwrap(), 0);

        let history = store.list_messages(thread.id, MessagePage::default()).await.unwrap();
        assert!(history[0].is_read);
        assert!(!history[1].is_read);
    }

    #[tokio::test]
    async fn test_history_pages_backwards() {
        let store = InMemoryChatStore::new();
        let (thread, _) = store.find_or_create_thread(pair("a", "b"), None).await.unwrap();
        for i in 0..5 {
            store
                .append_message(thread.id, NewMessage::text("a", i.to_string()))
                .await
                .unwrap();
        }

        let latest = store
            .list_messages(thread.id, MessagePage::new(None, Some(2)))
            .await
            .unwrap();
        let contents: Vec<_> = latest.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["3", "4"]);

        let older = store
            .list_messages(thread.id, MessagePage::new(Some(latest[0].created_at), Some(10)))
            .await
            .unwrap();
        let contents: Vec<_> = older.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["0", "1", "2"]);
    }

    #[tokio::test]
    async fn test_inactive_thread_rejects_appends() {
        let store = InMemoryChatStore::new();
        let (thread, _) = store.find_or_create_thread(pair("a", "b"), None).await.unwrap();
        assert!(!store.set_active(thread.id, false).await.unwrap().is_active);
        assert_eq!(
            store.append_message(thread.id, NewMessage::text("a", "hi")).await,
            Err(ChatError::ThreadInactive(thread.id))
        );
    }

    #[tokio::test]
    async fn test_list_for_user_orders_by_recent_activity() {
        let store = InMemoryChatStore::new();
        let (first, _) = store.find_or_create_thread(pair("a", "b"), None).await.unwrap();
        let (second, _) = store.find_or_create_thread(pair("a", "c"), None).await.unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        store.append_message(first.id, NewMessage::text("a", "bump")).await.unwrap();

        let ids: Vec<_> = store
            .list_for_user("a".into())
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(ids[0], first.id);
        assert!(ids.contains(&second.id));
        assert!(store.list_for_user("z".into()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_car_ref_means_no_car() {
        let store = InMemoryChatStore::new();
        let (blank, created) = store
            .find_or_create_thread(pair("a", "b"), Some(String::new()))
            .await
            .unwrap();
        assert!(created);
        assert_eq!(blank.car_ref, None);

        let (none, created) = store.find_or_create_thread(pair("a", "b"), None).await.unwrap();
        assert!(!created);
        assert_eq!(none, blank);
    }
}
