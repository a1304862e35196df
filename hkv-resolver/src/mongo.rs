//! # MongoDB-backed document store
//!
//! Implements [`DocumentStore`] against the fixed source-document schema,
//! using the synchronous `mongodb` driver. The document store is an
//! external collaborator with only its interface fixed; this is the one
//! concrete implementation this workspace ships.

use bson::{doc, Bson, Document};
use mongodb::options::FindOneOptions;
use mongodb::sync::{Client, Collection};

use crate::collaborators::DocumentStore;
use crate::error::{ResolverError, ResolverResult};

pub struct MongoDocumentStore {
    collection: Collection<Document>,
}

impl MongoDocumentStore {
    /// Connects to `uri` and selects `database.collection`.
    pub fn connect(uri: &str, database: &str, collection: &str) -> ResolverResult<Self> {
        let client =
            Client::with_uri_str(uri).map_err(|e| ResolverError::DocumentStore(e.to_string()))?;
        let collection = client.database(database).collection::<Document>(collection);
        Ok(MongoDocumentStore { collection })
    }

    /// Wraps an already-constructed collection handle (used by tests and
    /// by callers that manage their own `mongodb::sync::Client`).
    pub fn from_collection(collection: Collection<Document>) -> Self {
        MongoDocumentStore { collection }
    }
}

impl DocumentStore for MongoDocumentStore {
    fn query_one(
        &self,
        uid: &str,
        projection: &[String],
    ) -> ResolverResult<Option<serde_json::Value>> {
        let filter = doc! { "_id": uid };
        let mut projection_doc = Document::new();
        for field in projection {
            projection_doc.insert(field.clone(), 1);
        }
        let options = FindOneOptions::builder().projection(projection_doc).build();

        let document = self
            .collection
            .find_one(filter, options)
            .map_err(|e| ResolverError::DocumentStore(e.to_string()))?;

        Ok(document.map(bson_document_to_json))
    }
}

/// Converts a BSON document into a plain `serde_json::Value`, the shape
/// [`crate::schema`] decodes from. Scalars and containers map to their
/// natural JSON form rather than MongoDB's extended-JSON wrapper types.
fn bson_document_to_json(document: Document) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    for (key, value) in document {
        map.insert(key, bson_to_json(value));
    }
    serde_json::Value::Object(map)
}

fn bson_to_json(value: Bson) -> serde_json::Value {
    match value {
        Bson::Double(d) => serde_json::json!(d),
        Bson::String(s) => serde_json::json!(s),
        Bson::Array(items) => {
            serde_json::Value::Array(items.into_iter().map(bson_to_json).collect())
        }
        Bson::Document(doc) => bson_document_to_json(doc),
        Bson::Boolean(b) => serde_json::json!(b),
        Bson::Int32(i) => serde_json::json!(i),
        Bson::Int64(i) => serde_json::json!(i),
        Bson::Null => serde_json::Value::Null,
        other => serde_json::Value::String(other.to_string()),
    }
}
