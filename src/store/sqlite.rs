use std::str::FromStr;
use std::time::Duration;

use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    FromRow, SqlitePool,
};
use uuid::Uuid;

use crate::{
    error::{ChatError, ChatResult},
    now_ms,
};

use super::{
    Appended, BoxFuture, ChatStore, ChatThread, LastMessage, Message, MessageKind, MessagePage,
    NewMessage, ParticipantSet,
};

// car_ref is '' rather than NULL for "no car" so the unique key also covers
// car-less threads
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS chat_threads (
    id              TEXT PRIMARY KEY,
    participant_key TEXT NOT NULL,
    car_ref         TEXT NOT NULL DEFAULT '',
    last_content    TEXT,
    last_sender     TEXT,
    last_at         INTEGER,
    is_active       INTEGER NOT NULL DEFAULT 1,
    created_at      INTEGER NOT NULL,
    updated_at      INTEGER NOT NULL,
    UNIQUE (participant_key, car_ref)
);

CREATE TABLE IF NOT EXISTS chat_participants (
    thread_id TEXT NOT NULL REFERENCES chat_threads(id),
    user_id   TEXT NOT NULL,
    PRIMARY KEY (thread_id, user_id)
);

CREATE INDEX IF NOT EXISTS idx_chat_participants_user ON chat_participants(user_id);

CREATE TABLE IF NOT EXISTS chat_messages (
    id          TEXT PRIMARY KEY,
    thread_id   TEXT NOT NULL REFERENCES chat_threads(id),
    sender_id   TEXT NOT NULL,
    content     TEXT NOT NULL,
    kind        TEXT NOT NULL,
    attachments TEXT NOT NULL DEFAULT '[]',
    is_read     INTEGER NOT NULL DEFAULT 0,
    created_at  INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_chat_messages_thread ON chat_messages(thread_id, created_at);
"#;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const THREAD_COLUMNS: &str = "id,participant_key,car_ref,last_content,last_sender,last_at,is_active,created_at,updated_at";

#[derive(FromRow)]
struct ThreadRow {
    id: String,
    participant_key: String,
    car_ref: String,
    last_content: Option<String>,
    last_sender: Option<String>,
    last_at: Option<i64>,
    is_active: bool,
    created_at: i64,
    updated_at: i64,
}

impl ThreadRow {
    fn into_thread(self) -> ChatResult<ChatThread> {
        let last_message = match (self.last_content, self.last_sender, self.last_at) {
            (Some(content), Some(sender_id), Some(timestamp)) => Some(LastMessage {
                content,
                sender_id,
                timestamp,
            }),
            _ => None,
        };

        Ok(ChatThread {
            id: parse_id(&self.id)?,
            participants: ParticipantSet::from_key(&self.participant_key)?,
            car_ref: Some(self.car_ref).filter(|car| !car.is_empty()),
            last_message,
            is_active: self.is_active,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(FromRow)]
struct MessageRow {
    id: String,
    thread_id: String,
    sender_id: String,
    content: String,
    kind: String,
    attachments: String,
    is_read: bool,
    created_at: i64,
}

impl MessageRow {
    fn into_message(self) -> ChatResult<Message> {
        Ok(Message {
            id: parse_id(&self.id)?,
            thread_id: parse_id(&self.thread_id)?,
            sender_id: self.sender_id,
            content: self.content,
            kind: MessageKind::parse(&self.kind)
                .ok_or_else(|| ChatError::Storage(format!("unknown message kind {}", self.kind)))?,
            attachments: serde_json::from_str(&self.attachments)
                .map_err(|err| ChatError::Storage(format!("corrupt attachments: {err}")))?,
            is_read: self.is_read,
            created_at: self.created_at,
        })
    }
}

fn parse_id(id: &str) -> ChatResult<Uuid> {
    Uuid::parse_str(id).map_err(|err| ChatError::Storage(format!("corrupt id {id}: {err}")))
}

/// [`ChatStore`] over SQLite. Thread uniqueness is a table constraint, so
/// concurrent find-or-create calls converge on one row.
#[derive(Clone)]
pub struct SqliteChatStore {
    pool: SqlitePool,
}

impl SqliteChatStore {
    pub async fn connect(database_url: &str) -> ChatResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);
        let pool = SqlitePoolOptions::new()
            .max_connections(16)
            .connect_with(options)
            .await?;

        let store = Self::new(pool);
        store.migrate().await?;
        Ok(store)
    }

    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> ChatResult<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn fetch_thread(&self, thread_id: Uuid) -> ChatResult<Option<ChatThread>> {
        sqlx::query_as::<_, ThreadRow>(&format!(
            "SELECT {THREAD_COLUMNS} FROM chat_threads WHERE id=?"
        ))
        .bind(thread_id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .map(ThreadRow::into_thread)
        .transpose()
    }

    async fn thread_exists(&self, thread_id: Uuid) -> ChatResult<bool> {
        Ok(sqlx::query_as::<_, (i64,)>("SELECT 1 FROM chat_threads WHERE id=?")
            .bind(thread_id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .is_some())
    }
}

impl ChatStore for SqliteChatStore {
    fn find_or_create_thread(
        &self,
        participants: ParticipantSet,
        car_ref: Option<String>,
    ) -> BoxFuture<'_, ChatResult<(ChatThread, bool)>> {
        Box::pin(async move {
            let key = participants.key();
            let car = car_ref.unwrap_or_default();
            let now = now_ms();
            let id = Uuid::now_v7();

            let mut tx = self.pool.begin().await?;
            let created = sqlx::query(
                "INSERT INTO chat_threads (id,participant_key,car_ref,is_active,created_at,updated_at) \
                 VALUES (?,?,?,1,?,?) ON CONFLICT (participant_key,car_ref) DO NOTHING",
            )
            .bind(id.to_string())
            .bind(&key)
            .bind(&car)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await?
            .rows_affected()
                == 1;

            if created {
                for user_id in participants.iter() {
                    sqlx::query("INSERT INTO chat_participants (thread_id,user_id) VALUES (?,?)")
                        .bind(id.to_string())
                        .bind(user_id)
                        .execute(&mut *tx)
                        .await?;
                }
            }

            let row: ThreadRow = sqlx::query_as(&format!(
                "SELECT {THREAD_COLUMNS} FROM chat_threads WHERE participant_key=? AND car_ref=?"
            ))
            .bind(&key)
            .bind(&car)
            .fetch_one(&mut *tx)
            .await?;
            tx.commit().await?;

            Ok((row.into_thread()?, created))
        })
    }

    fn get_thread(&self, thread_id: Uuid) -> BoxFuture<'_, ChatResult<Option<ChatThread>>> {
        Box::pin(self.fetch_thread(thread_id))
    }

    fn append_message(
        &self,
        thread_id: Uuid,
        message: NewMessage,
    ) -> BoxFuture<'_, ChatResult<Appended>> {
        Box::pin(async move {
            let mut tx = self.pool.begin().await?;

            // write first: a deferred transaction that reads before writing
            // cannot wait for the lock and fails with SQLITE_BUSY instead
            let touched = sqlx::query("UPDATE chat_threads SET updated_at=updated_at WHERE id=?")
                .bind(thread_id.to_string())
                .execute(&mut *tx)
                .await?
                .rows_affected();
            if touched == 0 {
                return Err(ChatError::ThreadNotFound(thread_id));
            }

            let mut thread = sqlx::query_as::<_, ThreadRow>(&format!(
                "SELECT {THREAD_COLUMNS} FROM chat_threads WHERE id=?"
            ))
            .bind(thread_id.to_string())
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(ChatError::ThreadNotFound(thread_id))?
            .into_thread()?;

            if !thread.is_participant(&message.sender_id) {
                return Err(ChatError::NotParticipant);
            }
            if !thread.is_active {
                return Err(ChatError::ThreadInactive(thread_id));
            }

            let last_at = thread.last_message.as_ref().map_or(0, |last| last.timestamp);
            let message = message.into_message(thread_id, now_ms().max(last_at + 1));
            let attachments = serde_json::to_string(&message.attachments)
                .map_err(|err| ChatError::Storage(err.to_string()))?;

            sqlx::query(
                "INSERT INTO chat_messages (id,thread_id,sender_id,content,kind,attachments,is_read,created_at) \
                 VALUES (?,?,?,?,?,?,0,?)",
            )
            .bind(message.id.to_string())
            .bind(thread_id.to_string())
            .bind(&message.sender_id)
            .bind(&message.content)
            .bind(message.kind.as_str())
            .bind(attachments)
            .bind(message.created_at)
            .execute(&mut *tx)
            .await?;

            let summary = LastMessage::of(&message);
            sqlx::query(
                "UPDATE chat_threads SET last_content=?,last_sender=?,last_at=?,updated_at=? WHERE id=?",
            )
            .bind(&summary.content)
            .bind(&summary.sender_id)
            .bind(summary.timestamp)
            .bind(message.created_at)
            .bind(thread_id.to_string())
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;

            thread.updated_at = message.created_at;
            thread.last_message = Some(summary);

            Ok(Appended { thread, message })
        })
    }

    fn mark_read(&self, thread_id: Uuid, reader_id: String) -> BoxFuture<'_, ChatResult<u64>> {
        Box::pin(async move {
            if !self.thread_exists(thread_id).await? {
                return Err(ChatError::ThreadNotFound(thread_id));
            }

            let result = sqlx::query(
                "UPDATE chat_messages SET is_read=1 WHERE thread_id=? AND sender_id<>? AND is_read=0",
            )
            .bind(thread_id.to_string())
            .bind(&reader_id)
            .execute(&self.pool)
            .await?;

            Ok(result.rows_affected())
        })
    }

    fn list_for_user(&self, user_id: String) -> BoxFuture<'_, ChatResult<Vec<ChatThread>>> {
        Box::pin(async move {
            let columns = THREAD_COLUMNS
                .split(',')
                .map(|column| format!("t.{column}"))
                .collect::<Vec<_>>()
                .join(",");

            sqlx::query_as::<_, ThreadRow>(&format!(
                "SELECT {columns} FROM chat_threads t \
                 JOIN chat_participants p ON p.thread_id=t.id \
                 WHERE p.user_id=? ORDER BY t.updated_at DESC, t.id DESC"
            ))
            .bind(&user_id)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(ThreadRow::into_thread)
            .collect()
        })
    }

    fn list_messages(
        &self,
        thread_id: Uuid,
        page: MessagePage,
    ) -> BoxFuture<'_, ChatResult<Vec<Message>>> {
        Box::pin(async move {
            if !self.thread_exists(thread_id).await? {
                return Err(ChatError::ThreadNotFound(thread_id));
            }

            let rows: Vec<MessageRow> = sqlx::query_as(
                "SELECT id,thread_id,sender_id,content,kind,attachments,is_read,created_at \
                 FROM chat_messages WHERE thread_id=? AND (? IS NULL OR created_at<?) \
                 ORDER BY created_at DESC, id DESC LIMIT ?",
            )
            .bind(thread_id.to_string())
            .bind(page.before)
            .bind(page.before)
            .bind(page.limit as i64)
            .fetch_all(&self.pool)
            .await?;

            let mut messages = rows
                .into_iter()
                .map(MessageRow::into_message)
                .collect::<ChatResult<Vec<_>>>()?;
            messages.reverse();

            Ok(messages)
        })
    }

    fn set_active(&self, thread_id: Uuid, active: bool) -> BoxFuture<'_, ChatResult<ChatThread>> {
        Box::pin(async move {
            let result = sqlx::query(
                "UPDATE chat_threads SET is_active=?,updated_at=MAX(updated_at,?) WHERE id=?",
            )
            .bind(active)
            .bind(now_ms())
            .bind(thread_id.to_string())
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 0 {
                return Err(ChatError::ThreadNotFound(thread_id));
            }

            self.fetch_thread(thread_id)
                .await?
                .ok_or(ChatError::ThreadNotFound(thread_id))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> SqliteChatStore {
        // every connection to :memory: is its own database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let store = SqliteChatStore::new(pool);
        store.migrate().await.unwrap();
        store
    }

    fn pair(a: &str, b: &str) -> ParticipantSet {
        ParticipantSet::new([a, b]).unwrap()
    }

    #[tokio::test]
    async fn test_find_or_create_converges_on_one_row() {
        let store = store().await;
        let (first, created) = store
            .find_or_create_thread(pair("a", "b"), Some("car-9".into()))
            .await
            .unwrap();
        assert!(created);
        assert_eq!(first.car_ref.as_deref(), Some("car-9"));

        let (again, created) = store
            .find_or_create_thread(pair("b", "a"), Some("car-9".into()))
            .await
            .unwrap();
        assert!(!created);
        assert_eq!(again, first);

        let (no_car, created) = store.find_or_create_thread(pair("a", "b"), None).await.unwrap();
        assert!(created);
        assert_eq!(no_car.car_ref, None);
        let (no_car_again, _) = store.find_or_create_thread(pair("a", "b"), None).await.unwrap();
        assert_eq!(no_car.id, no_car_again.id);
    }

    #[tokio::test]
    async fn test_append_and_read_back() {
        let store = store().await;
        let (thread, _) = store.find_or_create_thread(pair("a", "b"), None).await.unwrap();

        let submitted = NewMessage {
            sender_id: "a".into(),
            content: "hello".into(),
            kind: MessageKind::File,
            attachments: vec![serde_json::json!({ "name": "title.pdf" })],
        };
        let appended = store.append_message(thread.id, submitted).await.unwrap();
        assert_eq!(appended.thread.last_message.as_ref().unwrap().content, "Sent file");

        let history = store.list_messages(thread.id, MessagePage::default()).await.unwrap();
        assert_eq!(history, vec![appended.message.clone()]);

        let stored = store.get_thread(thread.id).await.unwrap().unwrap();
        assert_eq!(stored.last_message, appended.thread.last_message);
        assert_eq!(stored.updated_at, appended.message.created_at);
    }

    #[tokio::test]
    async fn test_append_rejections() {
        let store = store().await;
        let missing = Uuid::now_v7();
        assert_eq!(
            store.append_message(missing, NewMessage::text("a", "x")).await,
            Err(ChatError::ThreadNotFound(missing))
        );

        let (thread, _) = store.find_or_create_thread(pair("a", "b"), None).await.unwrap();
        assert_eq!(
            store.append_message(thread.id, NewMessage::text("mallory", "x")).await,
            Err(ChatError::NotParticipant)
        );

        store.set_active(thread.id, false).await.unwrap();
        assert_eq!(
            store.append_message(thread.id, NewMessage::text("a", "x")).await,
            Err(ChatError::ThreadInactive(thread.id))
        );
        assert!(store.list_messages(thread.id, MessagePage::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mark_read_is_idempotent() {
        let store = store().await;
        let (thread, _) = store.find_or_create_thread(pair("a", "b"), None).await.unwrap();
        store.append_message(thread.id, NewMessage::text("a", "1")).await.unwrap();
        store.append_message(thread.id, NewMessage::text("a", "2")).await.unwrap();
        store.append_message(thread.id, NewMessage::text("b", "3")).await.unwrap();

        assert_eq!(store.mark_read(thread.id, "b".into()).await.unwrap(), 2);
        assert_eq!(store.mark_read(thread.id, "b".into()).await.unwrap(), 0);

        let read: Vec<bool> = store
            .list_messages(thread.id, MessagePage::default())
            .await
            .unwrap()
            .iter()
            .map(|m| m.is_read)
            .collect();
        assert_eq!(read, [true, true, false]);

        assert!(matches!(
            store.mark_read(Uuid::now_v7(), "b".into()).await,
            Err(ChatError::ThreadNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_for_user_and_pagination() {
        let store = store().await;
        let (ab, _) = store.find_or_create_thread(pair("a", "b"), None).await.unwrap();
        let (ac, _) = store.find_or_create_thread(pair("a", "c"), None).await.unwrap();
        for i in 0..4 {
            store
                .append_message(ac.id, NewMessage::text("c", i.to_string()))
                .await
                .unwrap();
        }

        let threads = store.list_for_user("a".into()).await.unwrap();
        assert_eq!(threads.len(), 2);
        assert_eq!(threads[0].id, ac.id);
        assert!(threads.iter().any(|t| t.id == ab.id));
        assert_eq!(store.list_for_user("b".into()).await.unwrap().len(), 1);

        let page = store
            .list_messages(ac.id, MessagePage::new(None, Some(3)))
            .await
            .unwrap();
        let contents: Vec<_> = page.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["1", "2", "3"]);

        let rest = store
            .list_messages(ac.id, MessagePage::new(Some(page[0].created_at), None))
            .await
            .unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].content, "0");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_appends_to_one_thread_all_land() {
        let path = std::env::temp_dir().join(format!("motorchat-{}.db", Uuid::now_v7()));
        let store = SqliteChatStore::connect(&format!("sqlite://{}", path.display()))
            .await
            .unwrap();
        let (thread, _) = store.find_or_create_thread(pair("a", "b"), None).await.unwrap();
        let thread_id = thread.id;

        let tasks: Vec<_> = (0..32)
            .map(|i| {
                let store = store.clone();
                let sender = if i % 2 == 0 { "a" } else { "b" };
                tokio::spawn(async move {
                    store
                        .append_message(thread_id, NewMessage::text(sender, i.to_string()))
                        .await
                })
            })
            .collect();

        let mut failures = Vec::new();
        for task in tasks {
            if let Err(err) = task.await.unwrap() {
                failures.push(err);
            }
        }

        let history = store
            .list_messages(thread_id, MessagePage::new(None, Some(100)))
            .await
            .unwrap();
        store.pool().close().await;
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{suffix}", path.display()));
        }

        assert!(failures.is_empty(), "{failures:?}");
        assert_eq!(history.len(), 32);
        assert!(history.windows(2).all(|w| w[0].created_at < w[1].created_at));
    }
}
