//! Shared application state.

use std::sync::Arc;

use crate::checker::Checker;
use crate::content::ContentStore;

/// Shared application state. Execution is stateless per call, so the
/// state only carries the content store and the grading pipeline.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<ContentStore>,
    pub checker: Arc<Checker>,
}

impl AppState {
    pub fn new(store: ContentStore, checker: Checker) -> Self {
        Self {
            store: Arc::new(store),
            checker: Arc::new(checker),
        }
    }
}
