//! # Conversation history
//!
//! Keeps the latest conversation for each page, most recent first.
//!
//! Every [`HistoryStore`] obeys the same rules on [`save`](HistoryStore::save):
//! 1. any record with the same `page_url` is removed (last write wins per page),
//! 2. the new record goes to the front,
//! 3. the oldest records beyond the configured maximum are dropped silently.
//!
//! Two stores are provided:
//! - [`MemoryHistory`], a plain in-process list,
//! - [`SqliteHistory`], backed by SQLite through Diesel; its tables are created
//!   on open.
//!
//! ```rust
//! use homie::history::{ConversationRecord, HistoryStore, MemoryHistory};
//!
//! let mut store = MemoryHistory::new(100);
//! let mut first = ConversationRecord::example("https://a.test");
//! first.id = "r1".into();
//! let mut second = ConversationRecord::example("https://a.test");
//! second.id = "r2".into();
//!
//! store.save(first).unwrap();
//! store.save(second).unwrap();
//!
//! assert_eq!(store.list().unwrap().len(), 1);
//! assert_eq!(store.get("https://a.test").unwrap().unwrap().id, "r2");
//! ```

use chrono::{DateTime, Utc};
use diesel::{connection::SimpleConnection, prelude::*};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, VecDeque};
use tracing::{debug, info};

use crate::{
    composer::HistoryContext,
    error::Result,
    message::{Message, new_id},
    models::{HistoryMessageRow, HistoryRecordRow, NewHistoryRecord},
    registry::ModelConfig,
    schema::{history_messages, history_records},
};

/// Default cap on stored records.
pub const DEFAULT_MAX_RECORDS: usize = 100;

/// Records per page when listing.
pub const ITEMS_PER_PAGE: usize = 10;

/// One page's stored conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRecord {
    pub id: String,
    pub page_title: String,
    pub page_url: String,
    pub model_name: String,
    pub model_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assistant_name: Option<String>,
    /// The visible list, assistant replies included.
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
}

impl ConversationRecord {
    /// Record for a finished exchange.
    pub fn from_exchange(
        context: &HistoryContext,
        model: &ModelConfig,
        messages: Vec<Message>,
    ) -> Self {
        Self {
            id: new_id(),
            page_title: context.page_title.clone(),
            page_url: context.page_url.clone(),
            model_name: model.name.clone(),
            model_id: model.id.clone(),
            assistant_name: context.assistant_name.clone(),
            messages,
            created_at: Utc::now(),
        }
    }

    /// Small placeholder record, handy in examples and tests.
    pub fn example(page_url: &str) -> Self {
        Self {
            id: new_id(),
            page_title: "Example".to_string(),
            page_url: page_url.to_string(),
            model_name: "Example model".to_string(),
            model_id: "example".to_string(),
            assistant_name: None,
            messages: vec![Message::user("hello"), Message::assistant("hi")],
            created_at: Utc::now(),
        }
    }
}

/// Filter for listing history.
#[derive(Debug, Clone, Default)]
pub struct HistoryQuery {
    /// Case-insensitive substring of the page title or URL.
    pub search: Option<String>,
    /// Exact model name.
    pub model_name: Option<String>,
}

impl HistoryQuery {
    pub fn matches(&self, record: &ConversationRecord) -> bool {
        let search_ok = match self.search.as_deref().map(str::trim) {
            None | Some("") => true,
            Some(needle) => {
                let needle = needle.to_lowercase();
                record.page_title.to_lowercase().contains(&needle)
                    || record.page_url.to_lowercase().contains(&needle)
            }
        };
        let model_ok = self
            .model_name
            .as_deref()
            .is_none_or(|name| record.model_name == name);
        search_ok && model_ok
    }
}

/// Slice out page `page` (1-based) of `records`; out of range gives an empty slice.
pub fn page_of(records: &[ConversationRecord], page: usize) -> &[ConversationRecord] {
    let start = page.saturating_sub(1).saturating_mul(ITEMS_PER_PAGE);
    if start >= records.len() {
        return &[];
    }
    let end = (start + ITEMS_PER_PAGE).min(records.len());
    &records[start..end]
}

/// Number of pages needed for `count` records.
pub fn total_pages(count: usize) -> usize {
    count.div_ceil(ITEMS_PER_PAGE)
}

/// Persistence for page conversations.
pub trait HistoryStore {
    /// Insert `record`, replacing any record for the same URL, then evict past the cap.
    fn save(&mut self, record: ConversationRecord) -> Result<()>;

    /// The stored conversation for `page_url`, if any.
    fn get(&mut self, page_url: &str) -> Result<Option<ConversationRecord>>;

    /// Remove the record with `id`; `false` when there was none.
    fn delete(&mut self, id: &str) -> Result<bool>;

    fn clear(&mut self) -> Result<()>;

    /// All records, most recent first.
    fn list(&mut self) -> Result<Vec<ConversationRecord>>;

    fn search(&mut self, query: &HistoryQuery) -> Result<Vec<ConversationRecord>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|record| query.matches(record))
            .collect())
    }

    /// Distinct model names across stored records, sorted.
    fn model_names(&mut self) -> Result<Vec<String>> {
        let names: BTreeSet<String> = self.list()?.into_iter().map(|r| r.model_name).collect();
        Ok(names.into_iter().collect())
    }
}

impl<H: HistoryStore + ?Sized> HistoryStore for &mut H {
    fn save(&mut self, record: ConversationRecord) -> Result<()> {
        (**self).save(record)
    }

    fn get(&mut self, page_url: &str) -> Result<Option<ConversationRecord>> {
        (**self).get(page_url)
    }

    fn delete(&mut self, id: &str) -> Result<bool> {
        (**self).delete(id)
    }

    fn clear(&mut self) -> Result<()> {
        (**self).clear()
    }

    fn list(&mut self) -> Result<Vec<ConversationRecord>> {
        (**self).list()
    }
}

/// In-process history.
#[derive(Debug, Clone)]
pub struct MemoryHistory {
    records: VecDeque<ConversationRecord>,
    max_records: usize,
}

impl MemoryHistory {
    pub fn new(max_records: usize) -> Self {
        Self {
            records: VecDeque::new(),
            max_records,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for MemoryHistory {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RECORDS)
    }
}

impl HistoryStore for MemoryHistory {
    fn save(&mut self, record: ConversationRecord) -> Result<()> {
        self.records.retain(|r| r.page_url != record.page_url);
        self.records.push_front(record);
        self.records.truncate(self.max_records);
        Ok(())
    }

    fn get(&mut self, page_url: &str) -> Result<Option<ConversationRecord>> {
        Ok(self.records.iter().find(|r| r.page_url == page_url).cloned())
    }

    fn delete(&mut self, id: &str) -> Result<bool> {
        let before = self.records.len();
        self.records.retain(|r| r.id != id);
        Ok(self.records.len() != before)
    }

    fn clear(&mut self) -> Result<()> {
        self.records.clear();
        Ok(())
    }

    fn list(&mut self) -> Result<Vec<ConversationRecord>> {
        Ok(self.records.iter().cloned().collect())
    }
}

const CREATE_TABLES: &str = "
CREATE TABLE IF NOT EXISTS history_records (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    page_title TEXT NOT NULL,
    page_url TEXT NOT NULL,
    model_name TEXT NOT NULL,
    model_id TEXT NOT NULL,
    assistant_name TEXT,
    created_at BIGINT NOT NULL
);
CREATE INDEX IF NOT EXISTS history_records_page_url ON history_records (page_url);
CREATE TABLE IF NOT EXISTS history_messages (
    record_id TEXT NOT NULL,
    position INTEGER NOT NULL,
    message_id TEXT NOT NULL,
    role TEXT NOT NULL,
    content TEXT NOT NULL,
    created_at BIGINT NOT NULL,
    PRIMARY KEY (record_id, position)
);
";

/// History persisted in a SQLite database.
pub struct SqliteHistory {
    connection: SqliteConnection,
    max_records: usize,
}

impl SqliteHistory {
    /// Open (or create) the database at `db_url` and make sure the tables exist.
    pub fn open(db_url: &str, max_records: usize) -> Result<Self> {
        info!("Opening history database: {}", db_url);
        let mut connection = SqliteConnection::establish(db_url)?;
        connection.batch_execute(CREATE_TABLES)?;
        Ok(Self {
            connection,
            max_records,
        })
    }

    fn messages_for(
        conn: &mut SqliteConnection,
        ids: &[String],
    ) -> Result<HashMap<String, Vec<HistoryMessageRow>>> {
        let rows: Vec<HistoryMessageRow> = history_messages::table
            .filter(history_messages::record_id.eq_any(ids))
            .order((history_messages::record_id, history_messages::position))
            .select(HistoryMessageRow::as_select())
            .load(conn)?;

        let mut grouped: HashMap<String, Vec<HistoryMessageRow>> = HashMap::new();
        for row in rows {
            grouped.entry(row.record_id.clone()).or_default().push(row);
        }
        Ok(grouped)
    }
}

fn delete_records(conn: &mut SqliteConnection, ids: &[String]) -> QueryResult<usize> {
    if ids.is_empty() {
        return Ok(0);
    }
    diesel::delete(history_messages::table.filter(history_messages::record_id.eq_any(ids)))
        .execute(conn)?;
    diesel::delete(history_records::table.filter(history_records::id.eq_any(ids))).execute(conn)
}

impl HistoryStore for SqliteHistory {
    fn save(&mut self, record: ConversationRecord) -> Result<()> {
        let max_records = self.max_records;

        self.connection.transaction::<_, diesel::result::Error, _>(|conn| {
            let stale: Vec<String> = history_records::table
                .filter(history_records::page_url.eq(&record.page_url))
                .select(history_records::id)
                .load(conn)?;
            delete_records(conn, &stale)?;

            diesel::insert_into(history_records::table)
                .values(NewHistoryRecord::from(&record))
                .execute(conn)?;

            let rows: Vec<HistoryMessageRow> = record
                .messages
                .iter()
                .enumerate()
                .map(|(position, message)| {
                    HistoryMessageRow::from_message(&record.id, position, message)
                })
                .collect();
            if !rows.is_empty() {
                diesel::insert_into(history_messages::table)
                    .values(&rows)
                    .execute(conn)?;
            }

            let newest_first: Vec<String> = history_records::table
                .order(history_records::seq.desc())
                .select(history_records::id)
                .load(conn)?;
            let evicted: Vec<String> = newest_first.into_iter().skip(max_records).collect();
            if !evicted.is_empty() {
                debug!("Evicting {} history records", evicted.len());
            }
            delete_records(conn, &evicted)?;

            Ok(())
        })?;

        Ok(())
    }

    fn get(&mut self, page_url: &str) -> Result<Option<ConversationRecord>> {
        let conn = &mut self.connection;
        let row: Option<HistoryRecordRow> = history_records::table
            .filter(history_records::page_url.eq(page_url))
            .order(history_records::seq.desc())
            .select(HistoryRecordRow::as_select())
            .first(conn)
            .optional()?;

        match row {
            Some(row) => {
                let mut messages = Self::messages_for(conn, std::slice::from_ref(&row.id))?;
                let messages = messages.remove(&row.id).unwrap_or_default();
                Ok(Some(row.into_record(messages)?))
            }
            None => Ok(None),
        }
    }

    fn delete(&mut self, id: &str) -> Result<bool> {
        let ids = vec![id.to_string()];
        let removed = self
            .connection
            .transaction::<_, diesel::result::Error, _>(|conn| delete_records(conn, &ids))?;
        Ok(removed > 0)
    }

    fn clear(&mut self) -> Result<()> {
        self.connection
            .transaction::<_, diesel::result::Error, _>(|conn| {
                diesel::delete(history_messages::table).execute(conn)?;
                diesel::delete(history_records::table).execute(conn)
            })?;
        Ok(())
    }

    fn list(&mut self) -> Result<Vec<ConversationRecord>> {
        let conn = &mut self.connection;
        let rows: Vec<HistoryRecordRow> = history_records::table
            .order(history_records::seq.desc())
            .select(HistoryRecordRow::as_select())
            .load(conn)?;

        let ids: Vec<String> = rows.iter().map(|row| row.id.clone()).collect();
        let mut messages = Self::messages_for(conn, &ids)?;

        rows.into_iter()
            .map(|row| {
                let own = messages.remove(&row.id).unwrap_or_default();
                row.into_record(own)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{TempDir, tempdir};

    fn record(id: &str, url: &str, content: &str) -> ConversationRecord {
        let mut record = ConversationRecord::example(url);
        record.id = id.to_string();
        record.messages = vec![Message::system("sys"), Message::assistant(content)];
        record
    }

    fn sqlite(max: usize) -> (TempDir, SqliteHistory) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("history.db");
        let store = SqliteHistory::open(path.to_str().unwrap(), max).unwrap();
        (dir, store)
    }

    fn check_last_write_wins(store: &mut impl HistoryStore) {
        store.save(record("r1", "https://a.test", "first")).unwrap();
        store.save(record("r2", "https://a.test", "second")).unwrap();

        let all = store.list().unwrap();
        assert_eq!(all.len(), 1);
        let stored = store.get("https://a.test").unwrap().unwrap();
        assert_eq!(stored.id, "r2");
        assert_eq!(stored.messages[1].content, "second");
    }

    fn check_cap_and_order(store: &mut impl HistoryStore) {
        for i in 0..7 {
            store
                .save(record(&format!("r{i}"), &format!("https://{i}.test"), "x"))
                .unwrap();
            assert!(store.list().unwrap().len() <= 5);
        }
        let ids: Vec<_> = store.list().unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["r6", "r5", "r4", "r3", "r2"]);
        assert!(store.get("https://0.test").unwrap().is_none());
    }

    fn check_resave_moves_to_front(store: &mut impl HistoryStore) {
        store.save(record("a1", "https://a.test", "x")).unwrap();
        store.save(record("b1", "https://b.test", "x")).unwrap();
        store.save(record("a2", "https://a.test", "y")).unwrap();
        let ids: Vec<_> = store.list().unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["a2", "b1"]);
    }

    fn check_delete_and_clear(store: &mut impl HistoryStore) {
        store.save(record("a", "https://a.test", "x")).unwrap();
        store.save(record("b", "https://b.test", "x")).unwrap();

        assert!(store.delete("a").unwrap());
        assert!(!store.delete("a").unwrap());
        assert!(store.get("https://a.test").unwrap().is_none());
        assert!(store.get("https://b.test").unwrap().is_some());

        store.clear().unwrap();
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_memory_last_write_wins() {
        check_last_write_wins(&mut MemoryHistory::default());
    }

    #[test]
    fn test_memory_cap_and_order() {
        check_cap_and_order(&mut MemoryHistory::new(5));
    }

    #[test]
    fn test_memory_resave_moves_to_front() {
        check_resave_moves_to_front(&mut MemoryHistory::default());
    }

    #[test]
    fn test_memory_delete_and_clear() {
        check_delete_and_clear(&mut MemoryHistory::default());
    }

    #[test]
    fn test_sqlite_last_write_wins() {
        let (_dir, mut store) = sqlite(DEFAULT_MAX_RECORDS);
        check_last_write_wins(&mut store);
    }

    #[test]
    fn test_sqlite_cap_and_order() {
        let (_dir, mut store) = sqlite(5);
        check_cap_and_order(&mut store);
    }

    #[test]
    fn test_sqlite_resave_moves_to_front() {
        let (_dir, mut store) = sqlite(DEFAULT_MAX_RECORDS);
        check_resave_moves_to_front(&mut store);
    }

    #[test]
    fn test_sqlite_delete_and_clear() {
        let (_dir, mut store) = sqlite(DEFAULT_MAX_RECORDS);
        check_delete_and_clear(&mut store);
    }

    #[test]
    fn test_sqlite_round_trips_messages_and_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("history.db");
        let path = path.to_str().unwrap();

        let mut original = record("r1", "https://a.test", "reply");
        original.assistant_name = Some("Crisp".into());
        original.messages.insert(1, Message::user("question"));
        {
            let mut store = SqliteHistory::open(path, 10).unwrap();
            store.save(original.clone()).unwrap();
        }

        let mut store = SqliteHistory::open(path, 10).unwrap();
        let loaded = store.get("https://a.test").unwrap().unwrap();
        assert_eq!(loaded.assistant_name.as_deref(), Some("Crisp"));
        let texts: Vec<_> = loaded.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(texts, vec!["sys", "question", "reply"]);
        assert_eq!(loaded.messages[2].id, original.messages[2].id);
    }

    #[test]
    fn test_query_matches_title_url_and_model() {
        let mut rec = record("r1", "https://Clocks.test/skew", "x");
        rec.page_title = "Clock Skew".into();
        rec.model_name = "GPT".into();

        let by_title = HistoryQuery { search: Some("skew".into()), model_name: None };
        let by_url = HistoryQuery { search: Some("CLOCKS.TEST".into()), model_name: None };
        let by_model = HistoryQuery { search: None, model_name: Some("GPT".into()) };
        let miss = HistoryQuery { search: Some("skew".into()), model_name: Some("Other".into()) };

        assert!(by_title.matches(&rec));
        assert!(by_url.matches(&rec));
        assert!(by_model.matches(&rec));
        assert!(!miss.matches(&rec));
        assert!(HistoryQuery::default().matches(&rec));
    }

    #[test]
    fn test_search_and_model_names() {
        let mut store = MemoryHistory::default();
        let mut a = record("a", "https://a.test", "x");
        a.model_name = "B-model".into();
        let mut b = record("b", "https://b.test", "x");
        b.model_name = "A-model".into();
        store.save(a).unwrap();
        store.save(b).unwrap();

        assert_eq!(store.model_names().unwrap(), vec!["A-model", "B-model"]);
        let hits = store
            .search(&HistoryQuery { search: Some("a.test".into()), model_name: None })
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "a");
    }

    #[test]
    fn test_paging() {
        let records: Vec<_> = (0..23)
            .map(|i| record(&i.to_string(), &format!("https://{i}.test"), "x"))
            .collect();
        assert_eq!(total_pages(records.len()), 3);
        assert_eq!(page_of(&records, 1).len(), 10);
        assert_eq!(page_of(&records, 3).len(), 3);
        assert_eq!(page_of(&records, 3)[0].id, "20");
        assert!(page_of(&records, 4).is_empty());
        assert_eq!(page_of(&records, 0).len(), 10);
    }
}
