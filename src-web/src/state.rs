use std::sync::Arc;

use tokio::sync::Mutex;

use crate::tryon::TryOnEngine;

/// Shared router state. The single engine lock queues generations one at a time.
#[derive(Debug)]
pub struct AppState<I, M> {
    pub engine: Arc<Mutex<TryOnEngine<I, M>>>,
}

impl<I, M> AppState<I, M> {
    pub fn new(engine: TryOnEngine<I, M>) -> Self {
        Self {
            engine: Arc::new(Mutex::new(engine)),
        }
    }
}

// derive(Clone) would require `I: Clone` and `M: Clone`
impl<I, M> Clone for AppState<I, M> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
        }
    }
}
