//! In-memory Store used by tests

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Mutex;

use super::{Kind, Record, Result, Store, StoreError};

type Key = (Kind, String, String);

/// Store keeping every record in a map, ordered by insertion within a kind
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<BTreeMap<u64, (Key, Record)>>,
    next_id: Mutex<u64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn position(records: &BTreeMap<u64, (Key, Record)>, key: &Key) -> Option<u64> {
        records
            .iter()
            .find(|(_, (k, _))| k == key)
            .map(|(id, _)| *id)
    }
}

fn key(kind: Kind, namespace: &str, name: &str) -> Key {
    (kind, namespace.to_string(), name.to_string())
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, kind: Kind, namespace: &str, name: &str) -> Result<Record> {
        let records = self.records.lock().unwrap();
        let key = key(kind, namespace, name);
        Self::position(&records, &key)
            .and_then(|id| records.get(&id))
            .map(|(_, record)| record.clone())
            .ok_or_else(|| StoreError::not_found(kind, namespace, name))
    }

    async fn list(&self, kind: Kind, namespace: Option<&str>) -> Result<Vec<Record>> {
        let records = self.records.lock().unwrap();
        Ok(records
            .values()
            .filter(|((k, ns, _), _)| *k == kind && namespace.is_none_or(|n| n == ns))
            .map(|(_, record)| record.clone())
            .collect())
    }

    async fn create(&self, kind: Kind, record: Record) -> Result<()> {
        let mut records = self.records.lock().unwrap();
        let key = key(kind, &record.namespace, &record.name);
        if Self::position(&records, &key).is_some() {
            return Err(StoreError::already_exists(kind, &record.namespace, &record.name));
        }

        let mut next_id = self.next_id.lock().unwrap();
        *next_id += 1;
        records.insert(*next_id, (key, record));
        Ok(())
    }

    async fn update(&self, kind: Kind, record: Record, expected_version: i64) -> Result<()> {
        let mut records = self.records.lock().unwrap();
        let key = key(kind, &record.namespace, &record.name);
        let id = Self::position(&records, &key)
            .ok_or_else(|| StoreError::not_found(kind, &record.namespace, &record.name))?;

        let slot = records
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found(kind, &record.namespace, &record.name))?;
        if slot.1.resource_version != expected_version {
            return Err(StoreError::conflict(kind, &record.namespace, &record.name));
        }
        slot.1 = record;
        Ok(())
    }

    async fn delete(&self, kind: Kind, namespace: &str, name: &str) -> Result<()> {
        let mut records = self.records.lock().unwrap();
        let key = key(kind, namespace, name);
        let id = Self::position(&records, &key)
            .ok_or_else(|| StoreError::not_found(kind, namespace, name))?;
        records.remove(&id);
        Ok(())
    }
}
