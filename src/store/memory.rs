//! # 内存存储后端
//!
//! 单进程内的键值存储实现，语义与 Redis 后端对齐（含 TTL 与原子操作）。
//! 供测试与单机开发使用。

use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use crate::error::Result;
use crate::store_error;

/// 存储值类型
#[derive(Debug, Clone)]
enum Value {
    Raw(String),
    Hash(HashMap<String, String>),
    Set(BTreeSet<String>),
}

impl Value {
    const fn type_name(&self) -> &'static str {
        match self {
            Self::Raw(_) => "string",
            Self::Hash(_) => "hash",
            Self::Set(_) => "set",
        }
    }
}

/// 带过期时间的存储项
#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: Value, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|t| Instant::now() + t),
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() > at)
    }
}

/// 内存存储
///
/// 单把写锁保证每个操作原子；所有接口与 `RedisStore` 一一对应。
pub struct MemoryStore {
    data: RwLock<HashMap<String, Entry>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
        }
    }

    /// 读取存活的项，过期项视为不存在
    fn live<'a>(
        data: &'a HashMap<String, Entry>,
        key: &str,
    ) -> Option<&'a Entry> {
        data.get(key).filter(|entry| !entry.is_expired())
    }

    pub fn get_string(&self, key: &str) -> Result<Option<String>> {
        let data = self.data.read().unwrap();
        match Self::live(&data, key) {
            Some(Entry {
                value: Value::Raw(raw),
                ..
            }) => Ok(Some(raw.clone())),
            Some(entry) => Err(store_error!(
                "键 {key} 类型为 {}，不是 string",
                entry.value.type_name()
            )),
            None => Ok(None),
        }
    }

    pub fn set_string(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut data = self.data.write().unwrap();
        data.insert(
            key.to_string(),
            Entry::new(Value::Raw(value.to_string()), ttl),
        );
        Ok(())
    }

    pub fn delete(&self, key: &str) -> Result<bool> {
        let mut data = self.data.write().unwrap();
        let existed = data
            .remove(key)
            .is_some_and(|entry| !entry.is_expired());
        Ok(existed)
    }

    pub fn exists(&self, key: &str) -> Result<bool> {
        let data = self.data.read().unwrap();
        Ok(Self::live(&data, key).is_some())
    }

    pub fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut data = self.data.write().unwrap();
        match data.get_mut(key) {
            Some(entry) if !entry.is_expired() => {
                entry.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    pub fn incr_by(&self, key: &str, delta: i64) -> Result<i64> {
        let mut data = self.data.write().unwrap();
        let current = match Self::live(&data, key) {
            Some(Entry {
                value: Value::Raw(raw),
                ..
            }) => raw
                .parse::<i64>()
                .map_err(|_| store_error!("键 {} 的值不是整数", key))?,
            Some(entry) => {
                return Err(store_error!(
                    "键 {key} 类型为 {}，无法自增",
                    entry.value.type_name()
                ));
            }
            None => 0,
        };
        let next = current + delta;
        // 保留已有 TTL
        let expires_at = data.get(key).and_then(|e| e.expires_at);
        data.insert(
            key.to_string(),
            Entry {
                value: Value::Raw(next.to_string()),
                expires_at,
            },
        );
        Ok(next)
    }

    pub fn hash_incr_by(&self, key: &str, field: &str, delta: i64) -> Result<i64> {
        let mut data = self.data.write().unwrap();
        if data.get(key).is_some_and(Entry::is_expired) {
            data.remove(key);
        }
        let entry = data
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(Value::Hash(HashMap::new()), None));
        let Value::Hash(hash) = &mut entry.value else {
            return Err(store_error!(
                "键 {key} 类型为 {}，不是 hash",
                entry.value.type_name()
            ));
        };
        let current = hash
            .get(field)
            .map_or(Ok(0), |raw| {
                raw.parse::<i64>()
                    .map_err(|_| store_error!("hash {} 字段 {} 不是整数", key, field))
            })?;
        let next = current + delta;
        hash.insert(field.to_string(), next.to_string());
        Ok(next)
    }

    pub fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<()> {
        self.hash_set_multiple(key, &[(field.to_string(), value.to_string())])
    }

    pub fn hash_set_multiple(&self, key: &str, fields: &[(String, String)]) -> Result<()> {
        let mut data = self.data.write().unwrap();
        if data.get(key).is_some_and(Entry::is_expired) {
            data.remove(key);
        }
        let entry = data
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(Value::Hash(HashMap::new()), None));
        let Value::Hash(hash) = &mut entry.value else {
            return Err(store_error!(
                "键 {key} 类型为 {}，不是 hash",
                entry.value.type_name()
            ));
        };
        for (field, value) in fields {
            hash.insert(field.clone(), value.clone());
        }
        Ok(())
    }

    pub fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>> {
        let data = self.data.read().unwrap();
        match Self::live(&data, key) {
            Some(Entry {
                value: Value::Hash(hash),
                ..
            }) => Ok(hash.get(field).cloned()),
            Some(entry) => Err(store_error!(
                "键 {key} 类型为 {}，不是 hash",
                entry.value.type_name()
            )),
            None => Ok(None),
        }
    }

    pub fn hash_delete(&self, key: &str, field: &str) -> Result<()> {
        let mut data = self.data.write().unwrap();
        if let Some(entry) = data.get_mut(key)
            && !entry.is_expired()
            && let Value::Hash(hash) = &mut entry.value
        {
            hash.remove(field);
        }
        Ok(())
    }

    pub fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>> {
        let data = self.data.read().unwrap();
        match Self::live(&data, key) {
            Some(Entry {
                value: Value::Hash(hash),
                ..
            }) => Ok(hash.clone()),
            Some(entry) => Err(store_error!(
                "键 {key} 类型为 {}，不是 hash",
                entry.value.type_name()
            )),
            None => Ok(HashMap::new()),
        }
    }

    pub fn set_add(&self, key: &str, member: &str) -> Result<()> {
        let mut data = self.data.write().unwrap();
        if data.get(key).is_some_and(Entry::is_expired) {
            data.remove(key);
        }
        let entry = data
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(Value::Set(BTreeSet::new()), None));
        let Value::Set(set) = &mut entry.value else {
            return Err(store_error!(
                "键 {key} 类型为 {}，不是 set",
                entry.value.type_name()
            ));
        };
        set.insert(member.to_string());
        Ok(())
    }

    pub fn set_remove(&self, key: &str, member: &str) -> Result<()> {
        let mut data = self.data.write().unwrap();
        if let Some(entry) = data.get_mut(key)
            && !entry.is_expired()
            && let Value::Set(set) = &mut entry.value
        {
            set.remove(member);
        }
        Ok(())
    }

    pub fn set_members(&self, key: &str) -> Result<Vec<String>> {
        let data = self.data.read().unwrap();
        match Self::live(&data, key) {
            Some(Entry {
                value: Value::Set(set),
                ..
            }) => Ok(set.iter().cloned().collect()),
            Some(entry) => Err(store_error!(
                "键 {key} 类型为 {}，不是 set",
                entry.value.type_name()
            )),
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_roundtrip_and_ttl() {
        let store = MemoryStore::new();
        store.set_string("k1", "v1", None).unwrap();
        assert_eq!(store.get_string("k1").unwrap().as_deref(), Some("v1"));

        // 立即过期的 TTL
        store
            .set_string("k2", "v2", Some(Duration::from_nanos(1)))
            .unwrap();
        std::thread::sleep(Duration::from_millis(2));
        assert_eq!(store.get_string("k2").unwrap(), None);
        assert!(!store.exists("k2").unwrap());
    }

    #[test]
    fn test_incr_preserves_ttl() {
        let store = MemoryStore::new();
        assert_eq!(store.incr_by("cnt", 1).unwrap(), 1);
        assert_eq!(store.incr_by("cnt", 5).unwrap(), 6);
        assert_eq!(store.incr_by("cnt", -2).unwrap(), 4);

        store.expire("cnt", Duration::from_secs(60)).unwrap();
        store.incr_by("cnt", 1).unwrap();
        // TTL 仍然存在（值未被替换为永久项）
        let data = store.data.read().unwrap();
        assert!(data.get("cnt").unwrap().expires_at.is_some());
    }

    #[test]
    fn test_hash_ops() {
        let store = MemoryStore::new();
        assert_eq!(store.hash_incr_by("h", "requests", 1).unwrap(), 1);
        assert_eq!(store.hash_incr_by("h", "requests", 2).unwrap(), 3);
        store.hash_set("h", "name", "alpha").unwrap();

        let all = store.hash_get_all("h").unwrap();
        assert_eq!(all.get("requests").map(String::as_str), Some("3"));
        assert_eq!(all.get("name").map(String::as_str), Some("alpha"));

        store.hash_delete("h", "name").unwrap();
        assert_eq!(store.hash_get("h", "name").unwrap(), None);
    }

    #[test]
    fn test_type_mismatch_is_error() {
        let store = MemoryStore::new();
        store.set_string("s", "plain", None).unwrap();
        assert!(store.hash_incr_by("s", "f", 1).is_err());
        assert!(store.set_members("s").is_err());
    }

    #[test]
    fn test_set_ops_sorted() {
        let store = MemoryStore::new();
        store.set_add("ids", "b").unwrap();
        store.set_add("ids", "a").unwrap();
        store.set_add("ids", "a").unwrap();
        assert_eq!(store.set_members("ids").unwrap(), vec!["a", "b"]);

        store.set_remove("ids", "a").unwrap();
        assert_eq!(store.set_members("ids").unwrap(), vec!["b"]);
    }
}
