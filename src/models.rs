//! # Database models
//!
//! Row types for the SQLite history store, mapped with **Diesel** onto the
//! tables in [`crate::schema`]:
//!
//! - [`HistoryRecordRow`] / [`NewHistoryRecord`]: one stored page conversation.
//!   `seq` is an auto-increment column that gives the most-recent-first order.
//! - [`HistoryMessageRow`]: one message of a record, ordered by `position`.
//!
//! Timestamps are stored as Unix milliseconds. Conversion to and from the
//! domain types lives here so the store itself only deals in rows.

use chrono::{DateTime, Utc};
use diesel::prelude::*;

use crate::{
    error::{HomieError, Result},
    history::ConversationRecord,
    message::{Message, Role},
};

/// A stored record as read back from `history_records`.
#[derive(Queryable, Selectable, Debug, Clone, PartialEq)]
#[diesel(table_name = crate::schema::history_records)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct HistoryRecordRow {
    /// Insertion sequence; higher is newer.
    pub seq: i32,
    pub id: String,
    pub page_title: String,
    pub page_url: String,
    pub model_name: String,
    pub model_id: String,
    pub assistant_name: Option<String>,
    pub created_at: i64,
}

/// Insert form of [`HistoryRecordRow`]; `seq` is assigned by SQLite.
#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::history_records)]
pub struct NewHistoryRecord<'a> {
    pub id: &'a str,
    pub page_title: &'a str,
    pub page_url: &'a str,
    pub model_name: &'a str,
    pub model_id: &'a str,
    pub assistant_name: Option<&'a str>,
    pub created_at: i64,
}

/// One message row of a stored record.
#[derive(Queryable, Selectable, Insertable, Debug, Clone, PartialEq)]
#[diesel(table_name = crate::schema::history_messages)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct HistoryMessageRow {
    pub record_id: String,
    pub position: i32,
    pub message_id: String,
    pub role: String,
    pub content: String,
    pub created_at: i64,
}

impl<'a> From<&'a ConversationRecord> for NewHistoryRecord<'a> {
    fn from(record: &'a ConversationRecord) -> Self {
        Self {
            id: &record.id,
            page_title: &record.page_title,
            page_url: &record.page_url,
            model_name: &record.model_name,
            model_id: &record.model_id,
            assistant_name: record.assistant_name.as_deref(),
            created_at: record.created_at.timestamp_millis(),
        }
    }
}

impl HistoryMessageRow {
    pub fn from_message(record_id: &str, position: usize, message: &Message) -> Self {
        Self {
            record_id: record_id.to_string(),
            position: position as i32,
            message_id: message.id.clone(),
            role: message.role.to_string(),
            content: message.content.clone(),
            created_at: message.created_at.timestamp_millis(),
        }
    }

    pub fn into_message(self) -> Result<Message> {
        let role = Role::parse(&self.role).ok_or_else(|| {
            HomieError::History(format!("unknown role '{}' in stored message", self.role))
        })?;
        Ok(Message {
            id: self.message_id,
            role,
            content: self.content,
            created_at: from_millis(self.created_at),
        })
    }
}

impl HistoryRecordRow {
    /// Join with the record's messages, which must already be in position order.
    pub fn into_record(self, messages: Vec<HistoryMessageRow>) -> Result<ConversationRecord> {
        Ok(ConversationRecord {
            id: self.id,
            page_title: self.page_title,
            page_url: self.page_url,
            model_name: self.model_name,
            model_id: self.model_id,
            assistant_name: self.assistant_name,
            messages: messages
                .into_iter()
                .map(HistoryMessageRow::into_message)
                .collect::<Result<Vec<_>>>()?,
            created_at: from_millis(self.created_at),
        })
    }
}

fn from_millis(millis: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(millis).unwrap_or_default()
}
