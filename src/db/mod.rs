//! Document store: one logical collection per entity type, JSON bodies.
//!
//! `DocumentStore` is the backend seam (Postgres or in-memory); `Db` is the
//! typed facade the services talk to.

pub mod memory;
pub mod postgres;

pub use self::memory::MemoryStore;
pub use self::postgres::PgStore;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("duplicate document in `{collection}`")]
    Duplicate { collection: String },
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("malformed document in `{collection}`: {message}")]
    Malformed { collection: String, message: String },
}

/// Offset/limit window for list queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub offset: u64,
    pub limit: u64,
}

impl Page {
    pub fn first(limit: u64) -> Self {
        Self { offset: 0, limit }
    }
}

/// Raw JSON document storage.
///
/// Filters are JSON objects matched by containment: every key in the filter
/// must be present in the document with an equal (or, for arrays, contained)
/// value. Results come back newest first.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fails with `StoreError::Duplicate` when another document in the
    /// collection already has the same values for all `unique` fields.
    async fn insert(
        &self,
        collection: &str,
        id: Uuid,
        body: Value,
        unique: &[&str],
    ) -> Result<(), StoreError>;

    async fn get(&self, collection: &str, id: Uuid) -> Result<Option<Value>, StoreError>;

    async fn replace(&self, collection: &str, id: Uuid, body: Value) -> Result<bool, StoreError>;

    async fn delete(&self, collection: &str, id: Uuid) -> Result<bool, StoreError>;

    async fn delete_many(&self, collection: &str, filter: &Value) -> Result<u64, StoreError>;

    async fn find(
        &self,
        collection: &str,
        filter: &Value,
        page: Option<Page>,
    ) -> Result<Vec<Value>, StoreError>;

    async fn count(&self, collection: &str, filter: &Value) -> Result<u64, StoreError>;

    /// Appends each value of each `(field, values)` pair to the array at
    /// `field` unless already present. Single atomic document update.
    async fn add_to_set(
        &self,
        collection: &str,
        id: Uuid,
        additions: &[(&str, Value)],
    ) -> Result<Option<Value>, StoreError>;

    /// Adds `by` to the integer at `field` (missing counts as 0).
    async fn increment(
        &self,
        collection: &str,
        id: Uuid,
        field: &str,
        by: i64,
    ) -> Result<Option<Value>, StoreError>;

    /// Shallow-merges `fields` (a JSON object) into the document.
    async fn set_fields(
        &self,
        collection: &str,
        id: Uuid,
        fields: &Value,
    ) -> Result<Option<Value>, StoreError>;

    /// Like `set_fields`, but only when the document contains `guard` at the
    /// moment of the update. Returns `None` otherwise.
    async fn set_fields_if(
        &self,
        collection: &str,
        id: Uuid,
        guard: &Value,
        fields: &Value,
    ) -> Result<Option<Value>, StoreError>;
}

/// An entity stored in its own collection.
pub trait Document: Serialize + DeserializeOwned + Send + Sync + 'static {
    const COLLECTION: &'static str;
    /// Fields that together must be unique within the collection.
    const UNIQUE: &'static [&'static str] = &[];

    fn id(&self) -> Uuid;
}

#[derive(Clone)]
pub struct Db {
    store: Arc<dyn DocumentStore>,
}

impl Db {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub fn memory() -> Self {
        Self::new(Arc::new(MemoryStore::default()))
    }

    pub async fn insert<T: Document>(&self, doc: &T) -> Result<(), StoreError> {
        let body = encode::<T>(doc)?;
        self.store
            .insert(T::COLLECTION, doc.id(), body, T::UNIQUE)
            .await
    }

    pub async fn get<T: Document>(&self, id: Uuid) -> Result<Option<T>, StoreError> {
        self.store
            .get(T::COLLECTION, id)
            .await?
            .map(decode::<T>)
            .transpose()
    }

    /// Replaces the whole document. Returns false when it no longer exists.
    pub async fn save<T: Document>(&self, doc: &T) -> Result<bool, StoreError> {
        let body = encode::<T>(doc)?;
        self.store.replace(T::COLLECTION, doc.id(), body).await
    }

    pub async fn delete<T: Document>(&self, id: Uuid) -> Result<bool, StoreError> {
        self.store.delete(T::COLLECTION, id).await
    }

    pub async fn delete_where<T: Document>(&self, filter: Value) -> Result<u64, StoreError> {
        self.store.delete_many(T::COLLECTION, &filter).await
    }

    pub async fn find<T: Document>(&self, filter: Value) -> Result<Vec<T>, StoreError> {
        self.store
            .find(T::COLLECTION, &filter, None)
            .await?
            .into_iter()
            .map(decode::<T>)
            .collect()
    }

    pub async fn find_one<T: Document>(&self, filter: Value) -> Result<Option<T>, StoreError> {
        self.store
            .find(T::COLLECTION, &filter, Some(Page::first(1)))
            .await?
            .into_iter()
            .next()
            .map(decode::<T>)
            .transpose()
    }

    pub async fn page<T: Document>(
        &self,
        filter: Value,
        page: Page,
    ) -> Result<(Vec<T>, u64), StoreError> {
        let total = self.store.count(T::COLLECTION, &filter).await?;
        let docs = self
            .store
            .find(T::COLLECTION, &filter, Some(page))
            .await?
            .into_iter()
            .map(decode::<T>)
            .collect::<Result<Vec<_>, _>>()?;
        Ok((docs, total))
    }

    pub async fn count<T: Document>(&self, filter: Value) -> Result<u64, StoreError> {
        self.store.count(T::COLLECTION, &filter).await
    }

    /// A scalar value is treated as a one-element set.
    pub async fn add_to_set<T: Document>(
        &self,
        id: Uuid,
        additions: &[(&str, Value)],
    ) -> Result<Option<T>, StoreError> {
        let additions: Vec<(&str, Value)> = additions
            .iter()
            .map(|(field, values)| (*field, as_set(values)))
            .collect();
        self.store
            .add_to_set(T::COLLECTION, id, &additions)
            .await?
            .map(decode::<T>)
            .transpose()
    }

    pub async fn increment<T: Document>(
        &self,
        id: Uuid,
        field: &str,
        by: i64,
    ) -> Result<Option<T>, StoreError> {
        self.store
            .increment(T::COLLECTION, id, field, by)
            .await?
            .map(decode::<T>)
            .transpose()
    }

    pub async fn set_fields<T: Document>(
        &self,
        id: Uuid,
        fields: Value,
    ) -> Result<Option<T>, StoreError> {
        self.store
            .set_fields(T::COLLECTION, id, &fields)
            .await?
            .map(decode::<T>)
            .transpose()
    }

    /// Compare-and-set: merges `fields` only while the document still
    /// contains `guard`. `None` when the guard no longer holds or the
    /// document is gone.
    pub async fn set_fields_if<T: Document>(
        &self,
        id: Uuid,
        guard: Value,
        fields: Value,
    ) -> Result<Option<T>, StoreError> {
        self.store
            .set_fields_if(T::COLLECTION, id, &guard, &fields)
            .await?
            .map(decode::<T>)
            .transpose()
    }
}

fn as_set(values: &Value) -> Value {
    match values {
        Value::Array(_) => values.clone(),
        other => Value::Array(vec![other.clone()]),
    }
}

fn encode<T: Document>(doc: &T) -> Result<Value, StoreError> {
    serde_json::to_value(doc).map_err(|e| StoreError::Malformed {
        collection: T::COLLECTION.to_string(),
        message: e.to_string(),
    })
}

fn decode<T: Document>(body: Value) -> Result<T, StoreError> {
    serde_json::from_value(body).map_err(|e| StoreError::Malformed {
        collection: T::COLLECTION.to_string(),
        message: e.to_string(),
    })
}

/// JSON containment with the same shape rules as Postgres `@>`.
pub(crate) fn contains(doc: &Value, pattern: &Value) -> bool {
    match (doc, pattern) {
        (Value::Object(d), Value::Object(p)) => p
            .iter()
            .all(|(k, pv)| d.get(k).is_some_and(|dv| contains(dv, pv))),
        (Value::Array(d), Value::Array(p)) => {
            p.iter().all(|pv| d.iter().any(|dv| contains(dv, pv)))
        }
        // a top-level array contains a bare scalar equal to one of its elements
        (Value::Array(d), p) if !p.is_object() => d.contains(p),
        (d, p) => d == p,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn containment_matches_scalars_objects_and_arrays() {
        let doc = json!({"studentId": "s1", "recipients": ["a", "b"], "isRead": false});
        assert!(contains(&doc, &json!({})));
        assert!(contains(&doc, &json!({"studentId": "s1"})));
        assert!(contains(&doc, &json!({"recipients": ["b"]})));
        assert!(contains(&doc, &json!({"isRead": false, "studentId": "s1"})));
        assert!(!contains(&doc, &json!({"studentId": "s2"})));
        assert!(!contains(&doc, &json!({"recipients": ["c"]})));
        assert!(!contains(&doc, &json!({"missing": 1})));
    }

    #[derive(Serialize, serde::Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Tracker {
        id: Uuid,
        completed_lessons: Vec<Uuid>,
    }

    impl Document for Tracker {
        const COLLECTION: &'static str = "trackers";

        fn id(&self) -> Uuid {
            self.id
        }
    }

    #[tokio::test]
    async fn add_to_set_accepts_a_single_value() {
        let db = Db::memory();
        let tracker = Tracker {
            id: Uuid::new_v4(),
            completed_lessons: Vec::new(),
        };
        db.insert(&tracker).await.unwrap();

        let lesson = Uuid::new_v4();
        for _ in 0..2 {
            db.add_to_set::<Tracker>(tracker.id, &[("completedLessons", json!(lesson))])
                .await
                .unwrap();
        }
        let stored = db.get::<Tracker>(tracker.id).await.unwrap().unwrap();
        assert_eq!(stored.completed_lessons, vec![lesson]);
    }
}
