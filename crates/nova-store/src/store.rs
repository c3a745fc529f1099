//! MongoDB-backed document store.

use futures::TryStreamExt;
use mongodb::bson::{doc, oid::ObjectId, to_document, Bson, Document};
use mongodb::options::{IndexOptions, UpdateOptions};
use mongodb::{Client, Collection, IndexModel};
use nova_core::{JobId, SessionId};
use tracing::{info, warn};

use crate::error::{StoreError, StoreResult};
use crate::types::{FileMeta, ThreadDoc, TurnRecord};

const THREADS: &str = "threads";
const USER_THREAD: &str = "user_thread";
const AI_LOG: &str = "ai_log";
const VECTORSTORE: &str = "vectorstore";

fn parse_object_id(id: &str) -> StoreResult<ObjectId> {
    ObjectId::parse_str(id).map_err(|_| StoreError::InvalidId(id.to_string()))
}

/// Typed access to the tenant database.
pub struct DocumentStore {
    db: mongodb::Database,
}

impl DocumentStore {
    /// Connect to the tenant database.
    ///
    /// # Errors
    ///
    /// Returns the driver's connection error; fatal at startup.
    pub async fn connect(uri: &str, db_name: &str) -> StoreResult<Self> {
        let client = Client::with_uri_str(uri).await?;
        Ok(Self {
            db: client.database(db_name),
        })
    }

    fn collection(&self, name: &str) -> Collection<Document> {
        self.db.collection::<Document>(name)
    }

    /// Ensure all indexes, de-duplicating `files.file_hash` first so the
    /// partial unique index can be built.
    ///
    /// # Errors
    ///
    /// Propagates index-creation failures.
    pub async fn ensure_indexes(&self) -> StoreResult<()> {
        let unique = |name: &str| {
            IndexOptions::builder()
                .unique(true)
                .name(name.to_string())
                .build()
        };

        self.collection(USER_THREAD)
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "user_id": 1 })
                    .options(unique("uniq_user_id"))
                    .build(),
                None,
            )
            .await?;

        let threads = self.collection(THREADS);
        threads
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "user_id": 1, "last_timestamp": -1 })
                    .build(),
                None,
            )
            .await?;
        threads
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "function_name": 1 })
                    .build(),
                None,
            )
            .await?;

        let ai_log = self.collection(AI_LOG);
        ai_log
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "thread_id": 1, "timestamp": 1 })
                    .build(),
                None,
            )
            .await?;
        ai_log
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "job_id": 1 })
                    .options(
                        IndexOptions::builder()
                            .unique(true)
                            .name("uniq_job_id".to_string())
                            .partial_filter_expression(doc! { "job_id": { "$exists": true } })
                            .build(),
                    )
                    .build(),
                None,
            )
            .await?;

        let vectorstore = self.collection(VECTORSTORE);
        vectorstore
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "created_at": 1 })
                    .build(),
                None,
            )
            .await?;

        let removed = self.dedup_file_hashes().await?;
        if removed > 0 {
            info!(removed, "removed duplicate file_hash registrations");
        }
        if let Err(err) = vectorstore
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "files.file_hash": 1 })
                    .options(
                        IndexOptions::builder()
                            .unique(true)
                            .name("uniq_files_file_hash".to_string())
                            .partial_filter_expression(
                                doc! { "files.file_hash": { "$exists": true } },
                            )
                            .build(),
                    )
                    .build(),
                None,
            )
            .await
        {
            // Leftover duplicates (concurrent writers) must not block boot.
            warn!(error = %err, "partial unique index on files.file_hash not ensured");
        }
        Ok(())
    }

    /// Remove all but the first vectorstore registration of each file hash.
    ///
    /// # Errors
    ///
    /// Propagates aggregation and delete failures.
    pub async fn dedup_file_hashes(&self) -> StoreResult<u64> {
        let collection = self.collection(VECTORSTORE);
        let pipeline = vec![
            doc! { "$unwind": { "path": "$files", "preserveNullAndEmptyArrays": false } },
            doc! { "$match": { "files.file_hash": { "$exists": true, "$type": "string", "$ne": "" } } },
            doc! { "$group": {
                "_id": "$files.file_hash",
                "ids": { "$push": "$_id" },
                "count": { "$sum": 1 },
            } },
            doc! { "$match": { "count": { "$gt": 1 } } },
        ];
        let mut cursor = collection.aggregate(pipeline, None).await?;
        let mut removed = 0;
        while let Some(group) = cursor.try_next().await? {
            let Some(Bson::String(hash)) = group.get("_id").cloned() else {
                continue;
            };
            let ids: Vec<ObjectId> = group
                .get_array("ids")
                .map(|ids| {
                    ids.iter()
                        .filter_map(Bson::as_object_id)
                        .skip(1)
                        .collect()
                })
                .unwrap_or_default();
            if ids.is_empty() {
                continue;
            }
            let result = collection
                .update_many(
                    doc! { "_id": { "$in": ids } },
                    doc! { "$pull": { "files": { "file_hash": &hash } } },
                    None,
                )
                .await?;
            removed += result.modified_count;
        }
        Ok(removed)
    }

    /// Create a thread and point `user_thread` at it. Returns the thread id.
    ///
    /// # Errors
    ///
    /// Propagates driver failures.
    pub async fn create_thread(&self, thread: &ThreadDoc) -> StoreResult<String> {
        let result = self
            .collection(THREADS)
            .insert_one(to_document(thread)?, None)
            .await?;
        let thread_id = result
            .inserted_id
            .as_object_id()
            .map(|oid| oid.to_hex())
            .ok_or_else(|| StoreError::InvalidId("inserted thread id".to_string()))?;
        self.collection(USER_THREAD)
            .update_one(
                doc! { "user_id": &thread.user_id },
                doc! { "$set": { "thread_id": &thread_id } },
                UpdateOptions::builder().upsert(true).build(),
            )
            .await?;
        Ok(thread_id)
    }

    /// Append a turn to the log.
    ///
    /// When the record carries a `job_id` the write is idempotent: replaying
    /// the same job appends at most once (`$setOnInsert` + the unique
    /// `job_id` index). Returns whether a new document was written.
    ///
    /// # Errors
    ///
    /// Propagates driver failures.
    pub async fn log_turn(&self, record: &TurnRecord) -> StoreResult<bool> {
        let document = to_document(record)?;
        let inserted = match &record.job_id {
            Some(job_id) => {
                let result = self
                    .collection(AI_LOG)
                    .update_one(
                        doc! { "job_id": job_id },
                        doc! { "$setOnInsert": document },
                        UpdateOptions::builder().upsert(true).build(),
                    )
                    .await?;
                result.upserted_id.is_some()
            }
            None => {
                self.collection(AI_LOG).insert_one(document, None).await?;
                true
            }
        };
        if let Some(thread_id) = &record.thread_id {
            self.collection(THREADS)
                .update_one(
                    doc! { "_id": parse_object_id(thread_id)? },
                    doc! { "$set": { "last_timestamp": record.timestamp.to_rfc3339() } },
                    None,
                )
                .await?;
        }
        Ok(inserted)
    }

    /// Record the rubric score and feedback produced on session close.
    ///
    /// # Errors
    ///
    /// Propagates driver failures.
    pub async fn record_session_score(
        &self,
        session_id: &SessionId,
        score: f64,
        feedback: &str,
    ) -> StoreResult<()> {
        self.collection(AI_LOG)
            .insert_one(
                doc! {
                    "session_id": session_id.as_str(),
                    "role": "analysis",
                    "content": feedback,
                    "score": score,
                    "timestamp": chrono::Utc::now().to_rfc3339(),
                },
                None,
            )
            .await?;
        Ok(())
    }

    /// Whether a terminal result was already logged for the job.
    ///
    /// # Errors
    ///
    /// Propagates driver failures.
    pub async fn job_logged(&self, job_id: &JobId) -> StoreResult<bool> {
        let found = self
            .collection(AI_LOG)
            .find_one(doc! { "job_id": job_id.as_str() }, None)
            .await?;
        Ok(found.is_some())
    }

    /// Create an empty vectorstore document. Returns its id.
    ///
    /// # Errors
    ///
    /// Propagates driver failures.
    pub async fn create_vectorstore(&self) -> StoreResult<String> {
        let result = self
            .collection(VECTORSTORE)
            .insert_one(
                doc! { "files": [], "created_at": chrono::Utc::now().to_rfc3339() },
                None,
            )
            .await?;
        result
            .inserted_id
            .as_object_id()
            .map(|oid| oid.to_hex())
            .ok_or_else(|| StoreError::InvalidId("inserted vectorstore id".to_string()))
    }

    /// Whether a vectorstore document exists.
    ///
    /// # Errors
    ///
    /// [`StoreError::InvalidId`] for a malformed id; driver failures
    /// otherwise.
    pub async fn vectorstore_exists(&self, vectorstore_id: &str) -> StoreResult<bool> {
        let oid = parse_object_id(vectorstore_id)?;
        let found = self
            .collection(VECTORSTORE)
            .find_one(doc! { "_id": oid }, None)
            .await?;
        Ok(found.is_some())
    }

    /// Register a file under a vectorstore, replacing any previous entry
    /// with the same hash.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] when the vectorstore does not exist.
    pub async fn register_file(&self, vectorstore_id: &str, meta: &FileMeta) -> StoreResult<()> {
        let oid = parse_object_id(vectorstore_id)?;
        let collection = self.collection(VECTORSTORE);
        collection
            .update_one(
                doc! { "_id": oid },
                doc! { "$pull": { "files": { "file_hash": &meta.file_hash } } },
                None,
            )
            .await?;
        let result = collection
            .update_one(
                doc! { "_id": oid },
                doc! { "$push": { "files": to_document(meta)? } },
                None,
            )
            .await?;
        if result.matched_count == 0 {
            return Err(StoreError::NotFound(format!(
                "vectorstore {vectorstore_id}"
            )));
        }
        Ok(())
    }

    /// Ids of all vectorstores (other than `exclude`) holding a file hash.
    ///
    /// # Errors
    ///
    /// Propagates driver failures.
    pub async fn vectorstores_with_hash(
        &self,
        file_hash: &str,
        exclude: &str,
    ) -> StoreResult<Vec<String>> {
        let mut cursor = self
            .collection(VECTORSTORE)
            .find(doc! { "files.file_hash": file_hash }, None)
            .await?;
        let mut ids = Vec::new();
        while let Some(document) = cursor.try_next().await? {
            if let Ok(oid) = document.get_object_id("_id") {
                let id = oid.to_hex();
                if id != exclude {
                    ids.push(id);
                }
            }
        }
        Ok(ids)
    }

    /// Files registered under a vectorstore.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] when the vectorstore does not exist.
    pub async fn list_files(&self, vectorstore_id: &str) -> StoreResult<Vec<FileMeta>> {
        let oid = parse_object_id(vectorstore_id)?;
        let document = self
            .collection(VECTORSTORE)
            .find_one(doc! { "_id": oid }, None)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("vectorstore {vectorstore_id}")))?;
        let Ok(files) = document.get_array("files") else {
            return Ok(Vec::new());
        };
        Ok(files
            .iter()
            .filter_map(|entry| {
                entry
                    .as_document()
                    .and_then(|doc| mongodb::bson::from_document(doc.clone()).ok())
            })
            .collect())
    }

    /// Remove a file hash from a vectorstore's registry.
    ///
    /// # Errors
    ///
    /// [`StoreError::InvalidId`] for a malformed id; driver failures
    /// otherwise.
    pub async fn remove_file_hash(
        &self,
        vectorstore_id: &str,
        file_hash: &str,
    ) -> StoreResult<()> {
        let oid = parse_object_id(vectorstore_id)?;
        self.collection(VECTORSTORE)
            .update_one(
                doc! { "_id": oid },
                doc! { "$pull": { "files": { "file_hash": file_hash } } },
                None,
            )
            .await?;
        Ok(())
    }
}

impl std::fmt::Debug for DocumentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentStore")
            .field("db", &self.db.name())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_id_parsing_rejects_garbage() {
        assert!(parse_object_id("not-an-oid").is_err());
        let oid = ObjectId::new();
        assert_eq!(parse_object_id(&oid.to_hex()).unwrap(), oid);
    }
}
