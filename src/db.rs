use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::models::PageEventFields;
use crate::utils;

const KEY_API_TOKEN: &str = "apiToken";
const KEY_TITLE: &str = "eventTitle";
const KEY_IMAGE: &str = "eventImage";
const KEY_DATE: &str = "eventDate";
const KEY_LOCATION: &str = "eventLocation";
const KEY_DESCRIPTION: &str = "eventDescription";
const KEY_URL: &str = "eventUrl";
const KEY_LAST_UPDATED: &str = "lastUpdated";
const KEY_REMOTE_EVENTS: &str = "remoteEvents";
const KEY_REMOTE_UPDATED: &str = "remoteEventsLastUpdated";
const KEY_LAST_ERROR: &str = "remoteEventsError";

/// Everything scoped to the page the active tab is showing.
pub const PAGE_KEYS: [&str; 7] = [
    KEY_TITLE,
    KEY_IMAGE,
    KEY_DATE,
    KEY_LOCATION,
    KEY_DESCRIPTION,
    KEY_URL,
    KEY_LAST_UPDATED,
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredPageEvent {
    pub fields: PageEventFields,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorRecord {
    pub message: String,
    pub trace: Vec<String>,
    pub timestamp: DateTime<Utc>,
    pub url: Option<String>,
}

/// Process-wide key-value state. Values are JSON, one row per key.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open_default() -> rusqlite::Result<Self> {
        let path = utils::database_path();
        Self::open(&path)
    }

    pub fn open(path: &Path) -> rusqlite::Result<Self> {
        utils::ensure_parent(path);
        Self::with_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> rusqlite::Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> rusqlite::Result<Self> {
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> rusqlite::Result<()> {
        self.conn().execute_batch(
            "CREATE TABLE IF NOT EXISTS kv(
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at_utc TEXT NOT NULL
            );",
        )?;
        Ok(())
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn put_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> rusqlite::Result<()> {
        let payload = serde_json::to_string(value)
            .map_err(|err| rusqlite::Error::ToSqlConversionFailure(Box::new(err)))?;
        self.conn().execute(
            "INSERT INTO kv (key, value, updated_at_utc) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET
               value = excluded.value,
               updated_at_utc = excluded.updated_at_utc",
            params![key, payload, Utc::now()],
        )?;
        Ok(())
    }

    fn get_json<T: DeserializeOwned>(&self, key: &str) -> rusqlite::Result<Option<T>> {
        let payload: Option<String> = self
            .conn()
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        let Some(payload) = payload else {
            return Ok(None);
        };
        serde_json::from_str(&payload).map(Some).map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(
                payload.len(),
                rusqlite::types::Type::Text,
                Box::new(err),
            )
        })
    }

    fn put_opt(&self, key: &str, value: Option<&String>) -> rusqlite::Result<()> {
        match value {
            Some(value) => self.put_json(key, value),
            None => self.remove(&[key]),
        }
    }

    fn remove(&self, keys: &[&str]) -> rusqlite::Result<()> {
        let conn = self.conn();
        for key in keys {
            conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        }
        Ok(())
    }

    pub fn contains(&self, key: &str) -> rusqlite::Result<bool> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM kv WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn api_token(&self) -> rusqlite::Result<Option<String>> {
        self.get_json(KEY_API_TOKEN)
    }

    pub fn set_api_token(&self, token: &str) -> rusqlite::Result<()> {
        self.put_json(KEY_API_TOKEN, token)
    }

    pub fn put_page_event(
        &self,
        fields: &PageEventFields,
        now: DateTime<Utc>,
    ) -> rusqlite::Result<()> {
        self.put_opt(KEY_TITLE, fields.title.as_ref())?;
        self.put_opt(KEY_IMAGE, fields.image.as_ref())?;
        self.put_opt(KEY_DATE, fields.date.as_ref())?;
        self.put_opt(KEY_LOCATION, fields.location.as_ref())?;
        self.put_opt(KEY_DESCRIPTION, fields.description.as_ref())?;
        self.put_opt(KEY_URL, fields.url.as_ref())?;
        self.put_json(KEY_LAST_UPDATED, &now)
    }

    /// Writes the display fields that are present, as edits coming back from
    /// the widget do. Absent fields keep their stored value.
    pub fn update_page_display_fields(&self, fields: &PageEventFields) -> rusqlite::Result<()> {
        let updates = [
            (KEY_TITLE, &fields.title),
            (KEY_IMAGE, &fields.image),
            (KEY_DATE, &fields.date),
            (KEY_LOCATION, &fields.location),
        ];
        for (key, value) in updates {
            if let Some(value) = value {
                self.put_json(key, value)?;
            }
        }
        Ok(())
    }

    pub fn page_event(&self) -> rusqlite::Result<Option<StoredPageEvent>> {
        let fields = PageEventFields {
            title: self.get_json(KEY_TITLE)?,
            image: self.get_json(KEY_IMAGE)?,
            date: self.get_json(KEY_DATE)?,
            location: self.get_json(KEY_LOCATION)?,
            description: self.get_json(KEY_DESCRIPTION)?,
            url: self.get_json(KEY_URL)?,
        };
        let last_updated: Option<DateTime<Utc>> = self.get_json(KEY_LAST_UPDATED)?;
        Ok(last_updated.map(|last_updated| StoredPageEvent {
            fields,
            last_updated,
        }))
    }

    pub fn clear_page_event(&self) -> rusqlite::Result<()> {
        self.remove(&PAGE_KEYS)
    }

    pub fn put_remote_events(&self, events: &[Value], now: DateTime<Utc>) -> rusqlite::Result<()> {
        self.put_json(KEY_REMOTE_EVENTS, events)?;
        self.put_json(KEY_REMOTE_UPDATED, &now)
    }

    pub fn remote_events(&self) -> rusqlite::Result<Option<Vec<Value>>> {
        self.get_json(KEY_REMOTE_EVENTS)
    }

    pub fn remote_events_updated(&self) -> rusqlite::Result<Option<DateTime<Utc>>> {
        self.get_json(KEY_REMOTE_UPDATED)
    }

    pub fn put_last_error(&self, record: &ErrorRecord) -> rusqlite::Result<()> {
        self.put_json(KEY_LAST_ERROR, record)
    }

    pub fn last_error(&self) -> rusqlite::Result<Option<ErrorRecord>> {
        self.get_json(KEY_LAST_ERROR)
    }
}
