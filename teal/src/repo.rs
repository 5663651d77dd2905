use crate::error::{TealError, TealResult};
use crate::lexicon::{from_record_value, to_record_value, Lexicon};
use crate::types::Did;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Location of a record written to a repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordRef {
    pub uri: String,
    pub cid: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecordOutput {
    pub uri: String,
    #[serde(default)]
    pub cid: Option<String>,
    pub value: Value,
}

/// Write access to the repository of one account.
#[async_trait]
pub trait RecordStore: Send + Sync {
    fn repo_did(&self) -> &Did;

    async fn create_record(&self, collection: &str, record: Value) -> TealResult<RecordRef>;

    async fn put_record(&self, collection: &str, rkey: &str, record: Value)
        -> TealResult<RecordRef>;

    /// Returns `None` when the record does not exist.
    async fn get_record(&self, repo: &Did, collection: &str, rkey: &str)
        -> TealResult<Option<Value>>;
}

/// Typed record helpers for every [`RecordStore`].
#[async_trait]
pub trait RecordStoreExt: RecordStore {
    async fn create<T>(&self, record: &T) -> TealResult<RecordRef>
    where
        T: Lexicon + Serialize + Sync,
    {
        let value = to_record_value(record)?;
        self.create_record(T::NSID, value).await
    }

    async fn put<T>(&self, rkey: &str, record: &T) -> TealResult<RecordRef>
    where
        T: Lexicon + Serialize + Sync,
    {
        let value = to_record_value(record)?;
        self.put_record(T::NSID, rkey, value).await
    }

    async fn get<T>(&self, repo: &Did, rkey: &str) -> TealResult<Option<T>>
    where
        T: Lexicon + DeserializeOwned + Send,
    {
        match self.get_record(repo, T::NSID, rkey).await? {
            Some(value) => Ok(Some(from_record_value(value)?)),
            None => Ok(None),
        }
    }
}

impl<S: RecordStore + ?Sized> RecordStoreExt for S {}

/// Maps a missing record onto `Ok(None)`.
pub(crate) fn found<T>(result: TealResult<T>) -> TealResult<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(TealError::NotFound { .. }) => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexicon::{Play, PLAY_NSID};
    use std::sync::Mutex;

    struct MockStore {
        did: Did,
        records: Mutex<Vec<(String, String, Value)>>,
    }

    impl MockStore {
        fn new() -> Self {
            Self {
                did: Did::new("did:plc:mock").unwrap(),
                records: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl RecordStore for MockStore {
        fn repo_did(&self) -> &Did {
            &self.did
        }

        async fn create_record(&self, collection: &str, record: Value) -> TealResult<RecordRef> {
            let mut records = self.records.lock().unwrap();
            let rkey = format!("rkey{}", records.len());
            records.push((collection.to_string(), rkey.clone(), record));
            Ok(RecordRef {
                uri: format!("at://{}/{}/{}", self.did, collection, rkey),
                cid: "bafy".to_string(),
            })
        }

        async fn put_record(
            &self,
            collection: &str,
            rkey: &str,
            record: Value,
        ) -> TealResult<RecordRef> {
            let mut records = self.records.lock().unwrap();
            records.retain(|(c, k, _)| !(c == collection && k == rkey));
            records.push((collection.to_string(), rkey.to_string(), record));
            Ok(RecordRef {
                uri: format!("at://{}/{}/{}", self.did, collection, rkey),
                cid: "bafy".to_string(),
            })
        }

        async fn get_record(
            &self,
            _repo: &Did,
            collection: &str,
            rkey: &str,
        ) -> TealResult<Option<Value>> {
            let records = self.records.lock().unwrap();
            Ok(records
                .iter()
                .find(|(c, k, _)| c == collection && k == rkey)
                .map(|(_, _, v)| v.clone()))
        }
    }

    #[tokio::test]
    async fn test_typed_create_and_get() {
        let store = MockStore::new();
        let play = Play {
            track_name: "Song".to_string(),
            ..Default::default()
        };

        let record = store.create(&play).await.unwrap();
        assert_eq!(record.uri, "at://did:plc:mock/fm.teal.alpha.feed.play/rkey0");

        {
            let records = store.records.lock().unwrap();
            assert_eq!(records[0].0, PLAY_NSID);
            assert_eq!(records[0].2["$type"], PLAY_NSID);
        }

        let did = store.repo_did().clone();
        let fetched: Option<Play> = store.get(&did, "rkey0").await.unwrap();
        assert_eq!(fetched, Some(play));

        let missing: Option<Play> = store.get(&did, "nope").await.unwrap();
        assert_eq!(missing, None);
    }

    #[tokio::test]
    async fn test_typed_put_replaces() {
        let store = MockStore::new();
        let first = Play {
            track_name: "First".to_string(),
            ..Default::default()
        };
        let second = Play {
            track_name: "Second".to_string(),
            ..Default::default()
        };

        store.put("self", &first).await.unwrap();
        store.put("self", &second).await.unwrap();

        let did = store.repo_did().clone();
        let fetched: Option<Play> = store.get(&did, "self").await.unwrap();
        assert_eq!(fetched.unwrap().track_name, "Second");
        assert_eq!(store.records.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_found() {
        assert_eq!(found(Ok(1)).unwrap(), Some(1));
        let missing: TealResult<i32> = Err(TealError::NotFound {
            message: "gone".to_string(),
        });
        assert_eq!(found(missing).unwrap(), None);
        assert!(found::<i32>(Err(TealError::RateLimit)).is_err());
    }
}
