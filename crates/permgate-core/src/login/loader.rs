use crate::errors::LoadError;
use crate::host::DataSource;
use crate::model::{SubjectData, SubjectId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

type LoadSlot = Arc<OnceLock<Result<Arc<SubjectData>, LoadError>>>;

/// Single-flight wrapper around the data source: concurrent loads of one id
/// share one underlying `load` call.
#[derive(Clone)]
pub struct SubjectLoader {
    inner: Arc<LoaderInner>,
}

struct LoaderInner {
    source: Arc<dyn DataSource>,
    in_flight: Mutex<HashMap<SubjectId, LoadSlot>>,
}

impl SubjectLoader {
    pub fn new(source: Arc<dyn DataSource>) -> Self {
        Self {
            inner: Arc::new(LoaderInner {
                source,
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn source(&self) -> &Arc<dyn DataSource> {
        &self.inner.source
    }

    /// Blocks the calling thread for the duration of the load.
    pub fn load_blocking(&self, id: SubjectId, name: &str) -> Result<Arc<SubjectData>, LoadError> {
        let slot = self
            .inner
            .in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(id)
            .or_insert_with(|| Arc::new(OnceLock::new()))
            .clone();

        let result = slot
            .get_or_init(|| self.inner.source.load(id, name))
            .clone();

        let mut in_flight = self.inner.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if in_flight.get(&id).is_some_and(|s| Arc::ptr_eq(s, &slot)) {
            in_flight.remove(&id);
        }
        result
    }

    /// Runs the load on tokio's blocking pool.
    pub async fn load(&self, id: SubjectId, name: &str) -> Result<Arc<SubjectData>, LoadError> {
        let this = self.clone();
        let name = name.to_string();
        tokio::task::spawn_blocking(move || this.load_blocking(id, &name))
            .await
            .map_err(|e| LoadError::Interrupted(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct Slow {
        calls: AtomicUsize,
        fail: bool,
    }

    impl DataSource for Slow {
        fn load(&self, id: SubjectId, name: &str) -> Result<Arc<SubjectData>, LoadError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(50));
            if self.fail {
                return Err(LoadError::Backend {
                    id,
                    detail: "offline".to_string(),
                });
            }
            Ok(Arc::new(SubjectData::new(id, name)))
        }

        fn get_if_loaded(&self, _id: SubjectId) -> Option<Arc<SubjectData>> {
            None
        }

        fn unload(&self, _id: SubjectId) {}
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_loads_share_one_call() {
        let source = Arc::new(Slow::default());
        let loader = SubjectLoader::new(source.clone());
        let id = SubjectId::offline("alice");

        let (a, b, c) = tokio::join!(
            loader.load(id, "alice"),
            loader.load(id, "alice"),
            loader.load(id, "alice"),
        );
        let a = a.unwrap();
        assert!(Arc::ptr_eq(&a, &b.unwrap()));
        assert!(Arc::ptr_eq(&a, &c.unwrap()));
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_failed_load_is_retried_on_next_call() {
        let source = Arc::new(Slow {
            calls: AtomicUsize::new(0),
            fail: true,
        });
        let loader = SubjectLoader::new(source.clone());
        let id = SubjectId::offline("bob");

        assert!(loader.load(id, "bob").await.is_err());
        assert!(loader.load(id, "bob").await.is_err());
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }
}
