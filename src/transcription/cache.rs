//! # Model Cache
//!
//! Process-wide cache of loaded models keyed by size. A size is loaded the
//! first time a request needs it and reused for the life of the process.
//!
//! ## Concurrency:
//! Each size has its own `OnceCell`. Concurrent first requests for one size
//! wait on a single load instead of racing duplicate downloads; requests for
//! other sizes are not held up. A failed load leaves the cell empty so the
//! next request retries.

use crate::transcription::engine::{ModelHandle, ModelLoader};
use crate::transcription::model::ModelSize;
use anyhow::Result;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::sync::OnceCell;

pub struct ModelCache {
    loader: Arc<dyn ModelLoader>,
    slots: Mutex<HashMap<ModelSize, Arc<OnceCell<ModelHandle>>>>,
}

impl ModelCache {
    pub fn new(loader: Arc<dyn ModelLoader>) -> Self {
        Self {
            loader,
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn slot(&self, size: ModelSize) -> Arc<OnceCell<ModelHandle>> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.entry(size).or_default().clone()
    }

    /// Return the model for `size`, loading it on first use.
    ///
    /// Loading may download weights and take minutes; callers wait.
    pub async fn get_model(&self, size: ModelSize) -> Result<ModelHandle> {
        let slot = self.slot(size);
        let model = slot
            .get_or_try_init(|| async {
                tracing::info!(model = %size, "Loading Whisper model (this may take a moment on first use)");
                let start_time = Instant::now();
                let model = self.loader.load(size).await?;
                tracing::info!(
                    model = %size,
                    "Model ready after {:.2}s",
                    start_time.elapsed().as_secs_f64()
                );
                Ok::<_, anyhow::Error>(model)
            })
            .await?;

        Ok(Arc::clone(model))
    }

    /// Sizes currently held in memory, smallest first.
    pub fn loaded_sizes(&self) -> Vec<ModelSize> {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let mut sizes: Vec<ModelSize> = slots
            .iter()
            .filter(|(_, cell)| cell.initialized())
            .map(|(size, _)| *size)
            .collect();
        sizes.sort();
        sizes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StubLoader;
    use std::time::Duration;

    #[tokio::test]
    async fn test_model_loaded_once_and_reused() {
        let loader = Arc::new(StubLoader::default());
        let cache = ModelCache::new(loader.clone());

        let first = cache.get_model(ModelSize::Small).await.unwrap();
        let second = cache.get_model(ModelSize::Small).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(loader.loads(), vec![ModelSize::Small]);
        assert_eq!(cache.loaded_sizes(), vec![ModelSize::Small]);
    }

    #[tokio::test]
    async fn test_concurrent_first_requests_share_one_load() {
        let loader = Arc::new(StubLoader::with_delay(Duration::from_millis(50)));
        let cache = ModelCache::new(loader.clone());

        let (a, b, c) = tokio::join!(
            cache.get_model(ModelSize::Medium),
            cache.get_model(ModelSize::Medium),
            cache.get_model(ModelSize::Tiny),
        );

        assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
        assert!(c.is_ok());

        let mut loads = loader.loads();
        loads.sort();
        assert_eq!(loads, vec![ModelSize::Tiny, ModelSize::Medium]);
    }

    #[tokio::test]
    async fn test_unknown_name_loads_base() {
        let loader = Arc::new(StubLoader::default());
        let cache = ModelCache::new(loader.clone());

        cache.get_model(ModelSize::from_form(Some("gigantic"))).await.unwrap();
        cache.get_model(ModelSize::from_form(Some("base"))).await.unwrap();

        assert_eq!(loader.loads(), vec![ModelSize::Base]);
    }

    #[tokio::test]
    async fn test_failed_load_is_retried() {
        let loader = Arc::new(StubLoader::failing_once());
        let cache = ModelCache::new(loader.clone());

        assert!(cache.get_model(ModelSize::Base).await.is_err());
        assert!(cache.loaded_sizes().is_empty());

        assert!(cache.get_model(ModelSize::Base).await.is_ok());
        assert_eq!(loader.loads().len(), 2);
    }
}
