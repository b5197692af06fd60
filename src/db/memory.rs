//! In-process document store for development runs and tests.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use uuid::Uuid;

use super::{contains, DocumentStore, Page, StoreError};

struct Record {
    id: Uuid,
    body: Value,
}

/// Each collection is a vector in insertion order behind one shard lock, so
/// every single-document operation is atomic.
#[derive(Default)]
pub struct MemoryStore {
    collections: DashMap<String, Vec<Record>>,
}

impl MemoryStore {
    fn update<F>(&self, collection: &str, id: Uuid, f: F) -> Option<Value>
    where
        F: FnOnce(&mut Value),
    {
        let mut docs = self.collections.get_mut(collection)?;
        let record = docs.iter_mut().find(|r| r.id == id)?;
        f(&mut record.body);
        Some(record.body.clone())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn insert(
        &self,
        collection: &str,
        id: Uuid,
        body: Value,
        unique: &[&str],
    ) -> Result<(), StoreError> {
        let mut docs = self.collections.entry(collection.to_string()).or_default();
        let clash = docs.iter().any(|r| {
            r.id == id
                || (!unique.is_empty()
                    && unique.iter().all(|f| r.body.get(*f) == body.get(*f)))
        });
        if clash {
            return Err(StoreError::Duplicate {
                collection: collection.to_string(),
            });
        }
        docs.push(Record { id, body });
        Ok(())
    }

    async fn get(&self, collection: &str, id: Uuid) -> Result<Option<Value>, StoreError> {
        Ok(self.collections.get(collection).and_then(|docs| {
            docs.iter()
                .find(|r| r.id == id)
                .map(|r| r.body.clone())
        }))
    }

    async fn replace(&self, collection: &str, id: Uuid, body: Value) -> Result<bool, StoreError> {
        Ok(self.update(collection, id, |doc| *doc = body).is_some())
    }

    async fn delete(&self, collection: &str, id: Uuid) -> Result<bool, StoreError> {
        let Some(mut docs) = self.collections.get_mut(collection) else {
            return Ok(false);
        };
        let before = docs.len();
        docs.retain(|r| r.id != id);
        Ok(docs.len() != before)
    }

    async fn delete_many(&self, collection: &str, filter: &Value) -> Result<u64, StoreError> {
        let Some(mut docs) = self.collections.get_mut(collection) else {
            return Ok(0);
        };
        let before = docs.len();
        docs.retain(|r| !contains(&r.body, filter));
        Ok((before - docs.len()) as u64)
    }

    async fn find(
        &self,
        collection: &str,
        filter: &Value,
        page: Option<Page>,
    ) -> Result<Vec<Value>, StoreError> {
        let Some(docs) = self.collections.get(collection) else {
            return Ok(Vec::new());
        };
        let matching = docs
            .iter()
            .rev()
            .filter(|r| contains(&r.body, filter))
            .map(|r| r.body.clone());
        Ok(match page {
            Some(p) => matching
                .skip(p.offset as usize)
                .take(p.limit as usize)
                .collect(),
            None => matching.collect(),
        })
    }

    async fn count(&self, collection: &str, filter: &Value) -> Result<u64, StoreError> {
        Ok(self
            .collections
            .get(collection)
            .map(|docs| docs.iter().filter(|r| contains(&r.body, filter)).count() as u64)
            .unwrap_or(0))
    }

    async fn add_to_set(
        &self,
        collection: &str,
        id: Uuid,
        additions: &[(&str, Value)],
    ) -> Result<Option<Value>, StoreError> {
        Ok(self.update(collection, id, |doc| {
            let Some(obj) = doc.as_object_mut() else {
                return;
            };
            for (field, values) in additions {
                let slot = obj
                    .entry(field.to_string())
                    .or_insert_with(|| Value::Array(Vec::new()));
                if !slot.is_array() {
                    *slot = Value::Array(Vec::new());
                }
                if let (Value::Array(set), Value::Array(new)) = (slot, values) {
                    for v in new {
                        if !set.contains(v) {
                            set.push(v.clone());
                        }
                    }
                }
            }
        }))
    }

    async fn increment(
        &self,
        collection: &str,
        id: Uuid,
        field: &str,
        by: i64,
    ) -> Result<Option<Value>, StoreError> {
        Ok(self.update(collection, id, |doc| {
            if let Some(obj) = doc.as_object_mut() {
                let current = obj.get(field).and_then(Value::as_i64).unwrap_or(0);
                obj.insert(field.to_string(), Value::from(current + by));
            }
        }))
    }

    async fn set_fields(
        &self,
        collection: &str,
        id: Uuid,
        fields: &Value,
    ) -> Result<Option<Value>, StoreError> {
        Ok(self.update(collection, id, |doc| merge(doc, fields)))
    }

    async fn set_fields_if(
        &self,
        collection: &str,
        id: Uuid,
        guard: &Value,
        fields: &Value,
    ) -> Result<Option<Value>, StoreError> {
        let Some(mut docs) = self.collections.get_mut(collection) else {
            return Ok(None);
        };
        let Some(record) = docs.iter_mut().find(|r| r.id == id) else {
            return Ok(None);
        };
        if !contains(&record.body, guard) {
            return Ok(None);
        }
        merge(&mut record.body, fields);
        Ok(Some(record.body.clone()))
    }
}

fn merge(doc: &mut Value, fields: &Value) {
    if let (Some(obj), Some(new)) = (doc.as_object_mut(), fields.as_object()) {
        for (k, v) in new {
            obj.insert(k.clone(), v.clone());
        }
    }
}
