use std::fmt;
use std::sync::Arc;

use crate::error::PolybaseError;

pub type NextFn<T> = Arc<dyn Fn(&T) + Send + Sync + 'static>;
pub type ErrorFn = Arc<dyn Fn(&PolybaseError) + Send + Sync + 'static>;

/// A listener pair: the value callback and an optional error callback.
pub struct Observer<T> {
    pub next: NextFn<T>,
    pub error: Option<ErrorFn>,
}

impl<T> Observer<T> {
    pub fn new<F>(next: F) -> Self
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        Self {
            next: Arc::new(next),
            error: None,
        }
    }

    pub fn with_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&PolybaseError) + Send + Sync + 'static,
    {
        self.error = Some(Arc::new(callback));
        self
    }
}

impl<T> Clone for Observer<T> {
    fn clone(&self) -> Self {
        Self {
            next: Arc::clone(&self.next),
            error: self.error.clone(),
        }
    }
}

impl<T> fmt::Debug for Observer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer")
            .field("error", &self.error.is_some())
            .finish()
    }
}
