//! Source reader (C2): filtered, paginated document retrieval.

use async_trait::async_trait;
use bson::{Bson, Document as BsonDocument};
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::options::FindOptions;
use mongodb::{Client, Database};

use crate::error::Result;
use crate::value::{Document, document_from_bson};

/// Build the incremental-sync filter: `creation_date ≥ watermark OR
/// update_date ≥ watermark`. Empty filter (matches everything) when no
/// watermark is present, per §4.2. Uses `≥`, not `>`: a record modified
/// exactly at the boundary must be re-examined; upserts make the repeat
/// read idempotent.
#[must_use]
pub fn build_date_filter(after_date: Option<DateTime<Utc>>) -> BsonDocument {
    match after_date {
        None => bson::doc! {},
        Some(ts) => {
            let bson_ts = Bson::DateTime(bson::DateTime::from_chrono(ts));
            bson::doc! {
                "$or": [
                    { "creation_date": { "$gte": bson_ts.clone() } },
                    { "update_date": { "$gte": bson_ts } },
                ]
            }
        }
    }
}

/// Merge a per-table filter (e.g. "array field exists and is non-empty")
/// with the watermark filter produced by `build_date_filter`.
#[must_use]
pub fn merge_filters(mut base: BsonDocument, watermark: BsonDocument) -> BsonDocument {
    base.extend(watermark);
    base
}

/// A document-oriented source store: filtered, paginated retrieval plus a
/// count operation, over an opaque collection name. Implementors must be
/// connection-pool aware and tolerate a per-operation timeout (the
/// `mongodb` driver provides both natively).
#[async_trait]
pub trait SourceStore: Send + Sync {
    async fn count(&self, collection: &str, filter: &BsonDocument) -> Result<u64>;

    /// Ascending by `creation_date` for a stable pagination stream, unless
    /// `sort` overrides it.
    async fn find(
        &self,
        collection: &str,
        filter: &BsonDocument,
        projection: Option<&BsonDocument>,
        sort: Option<&BsonDocument>,
        skip: u64,
        limit: i64,
    ) -> Result<Vec<Document>>;

    /// Bulk fetch by identifier set, used by `ArrayExtractionStrategy` to
    /// resolve a parent batch's child references in one round trip.
    async fn find_by_ids(
        &self,
        collection: &str,
        ids: &[Bson],
        projection: Option<&BsonDocument>,
    ) -> Result<Vec<Document>>;
}

/// A `mongodb`-backed source store. Holds a `Database` handle; the
/// underlying `Client` is internally connection-pool aware, so no pooling
/// logic is duplicated here.
pub struct MongoSourceStore {
    database: Database,
}

impl MongoSourceStore {
    /// Connect to `url` and select `database_name`.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection string cannot be parsed or the
    /// client cannot be constructed.
    pub async fn connect(url: &str, database_name: &str) -> Result<Self> {
        let client = Client::with_uri_str(url).await?;
        Ok(Self {
            database: client.database(database_name),
        })
    }

    #[must_use]
    pub const fn database(&self) -> &Database {
        &self.database
    }
}

#[async_trait]
impl SourceStore for MongoSourceStore {
    async fn count(&self, collection: &str, filter: &BsonDocument) -> Result<u64> {
        let coll = self.database.collection::<BsonDocument>(collection);
        let count = coll.count_documents(filter.clone()).await?;
        Ok(count)
    }

    async fn find(
        &self,
        collection: &str,
        filter: &BsonDocument,
        projection: Option<&BsonDocument>,
        sort: Option<&BsonDocument>,
        skip: u64,
        limit: i64,
    ) -> Result<Vec<Document>> {
        let coll = self.database.collection::<BsonDocument>(collection);
        let mut opts = FindOptions::default();
        opts.projection = projection.cloned();
        opts.sort = sort.cloned().or_else(|| Some(bson::doc! { "creation_date": 1 }));
        opts.skip = Some(skip);
        opts.limit = Some(limit);

        let cursor = coll.find(filter.clone()).with_options(opts).await?;
        let docs: Vec<BsonDocument> = cursor.try_collect().await?;
        Ok(docs.into_iter().map(document_from_bson).collect())
    }

    async fn find_by_ids(
        &self,
        collection: &str,
        ids: &[Bson],
        projection: Option<&BsonDocument>,
    ) -> Result<Vec<Document>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let coll = self.database.collection::<BsonDocument>(collection);
        let filter = bson::doc! { "_id": { "$in": ids.to_vec() } };
        let mut opts = FindOptions::default();
        opts.projection = projection.cloned();
        let cursor = coll.find(filter).with_options(opts).await?;
        let docs: Vec<BsonDocument> = cursor.try_collect().await?;
        Ok(docs.into_iter().map(document_from_bson).collect())
    }
}
