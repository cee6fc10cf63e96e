use chrono::{DateTime, Utc};

use crate::{Collection, Document};

/// Builder for constructing document queries.
///
/// Allows filtering documents of one collection by status, by last update
/// time and by a top-level body field.
#[derive(Debug, Clone)]
pub struct DocumentQuery {
    /// The collection to search.
    pub collection: Collection,

    /// Filter by status (any of these).
    pub statuses: Option<Vec<String>>,

    /// Filter to documents last updated strictly before this instant.
    pub updated_before: Option<DateTime<Utc>>,

    /// Filter by a top-level body field rendered as a string.
    pub field: Option<(String, String)>,

    /// Maximum number of documents to return.
    pub limit: Option<usize>,
}

impl DocumentQuery {
    /// Creates a query over every document in a collection.
    pub fn new(collection: Collection) -> Self {
        Self {
            collection,
            statuses: None,
            updated_before: None,
            field: None,
            limit: None,
        }
    }

    /// Filters by status.
    pub fn status(mut self, status: impl Into<String>) -> Self {
        self.statuses = Some(vec![status.into()]);
        self
    }

    /// Filters by several statuses (any of these).
    pub fn statuses(mut self, statuses: Vec<String>) -> Self {
        self.statuses = Some(statuses);
        self
    }

    /// Filters to documents not updated since `instant`.
    pub fn updated_before(mut self, instant: DateTime<Utc>) -> Self {
        self.updated_before = Some(instant);
        self
    }

    /// Filters by a top-level body field, e.g. `customer_id`.
    pub fn field_equals(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.field = Some((name.into(), value.into()));
        self
    }

    /// Limits the number of results.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Returns true if a document satisfies every filter of this query.
    ///
    /// Used by stores that evaluate queries in process.
    pub fn matches(&self, document: &Document) -> bool {
        if document.collection != self.collection {
            return false;
        }
        if let Some(ref statuses) = self.statuses
            && !statuses.contains(&document.status)
        {
            return false;
        }
        if let Some(before) = self.updated_before
            && document.updated_at >= before
        {
            return false;
        }
        if let Some((ref name, ref value)) = self.field {
            let actual = match document.body.get(name) {
                Some(serde_json::Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => return false,
            };
            if &actual != value {
                return false;
            }
        }
        true
    }
}
