use crate::{CorrelationStore, DeliveredResult};
use std::sync::Arc;

/// Why a lookup produced no result.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum LookupError {
    /// The caller did not provide a request id. A client error.
    #[error("Missing request identifier")]
    MissingIdentifier,

    /// No result has been recorded for this id (yet).
    #[error("No result for request `{request_id}`")]
    NotFound { request_id: String },

    /// The store could not be read.
    #[error("Store error: {context}")]
    Store { context: String },
}

/// Read-only view of the correlation store used by the pull path.
#[derive(Clone)]
pub struct Lookup {
    store: Arc<dyn CorrelationStore>,
}

impl Lookup {
    pub fn new(store: Arc<dyn CorrelationStore>) -> Self {
        Self { store }
    }

    /// Returns the result recorded for `request_id`.
    ///
    /// A blank id is rejected before the store is touched, so "malformed
    /// request" and "not arrived yet" stay distinguishable.
    pub fn lookup(&self, request_id: &str) -> Result<DeliveredResult, LookupError> {
        if request_id.trim().is_empty() {
            return Err(LookupError::MissingIdentifier);
        }

        match self.store.get(request_id) {
            Ok(Some(result)) => Ok(result),
            Ok(None) => Err(LookupError::NotFound {
                request_id: request_id.to_owned(),
            }),
            Err(e) => Err(LookupError::Store {
                context: e.to_string(),
            }),
        }
    }
}
