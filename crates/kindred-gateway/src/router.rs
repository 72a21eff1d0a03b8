use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, PoisonError, RwLock};

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde_json::Value;
use tracing::{debug, error, warn};

type BoxedHandler<C> = Arc<dyn Fn(C, Value) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Maps a push event type to at most one handler.
///
/// Registration is last-registrant-wins: registering a type that already has
/// a handler replaces it. Screens re-register their handlers every time they
/// mount, and this keeps that from growing a handler list.
///
/// Handlers receive a clone of the context `C` (typically a cheap handle to
/// shared application state) and the event payload. Handler errors and panics
/// are logged here and never reach the caller of [`EventRouter::dispatch`].
pub struct EventRouter<C> {
    handlers: RwLock<HashMap<String, BoxedHandler<C>>>,
}

impl<C: Send + 'static> EventRouter<C> {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    pub fn register<F, Fut>(&self, event_type: impl Into<String>, handler: F)
    where
        F: Fn(C, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let event_type = event_type.into();
        let boxed: BoxedHandler<C> = Arc::new(move |ctx, payload| handler(ctx, payload).boxed());

        let replaced = self
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(event_type.clone(), boxed)
            .is_some();

        if replaced {
            debug!("Replaced push handler for {}", event_type);
        } else {
            debug!("Registered push handler for {}", event_type);
        }
    }

    /// Returns whether a handler was removed.
    pub fn unregister(&self, event_type: &str) -> bool {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(event_type)
            .is_some()
    }

    pub fn is_registered(&self, event_type: &str) -> bool {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(event_type)
    }

    pub fn len(&self) -> usize {
        self.handlers.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run the handler registered for `event_type`, if any.
    ///
    /// Returns whether a handler was found. Unknown types are a no-op.
    pub async fn dispatch(&self, event_type: &str, payload: Value, context: C) -> bool {
        // Clone out so the lock is not held across the handler's await points.
        let handler = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event_type)
            .cloned();

        let Some(handler) = handler else {
            debug!("No push handler for {}", event_type);
            return false;
        };

        let outcome = AssertUnwindSafe(async move { handler(context, payload).await })
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Push handler for {} failed: {:#}", event_type, e),
            Err(panic) => error!("Push handler for {} panicked: {}", event_type, panic_message(&panic)),
        }

        true
    }
}

impl<C: Send + 'static> Default for EventRouter<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> fmt::Debug for EventRouter<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
        let mut types: Vec<&String> = handlers.keys().collect();
        types.sort();
        f.debug_struct("EventRouter").field("handlers", &types).finish()
    }
}

fn panic_message(panic: &Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Default)]
    struct Hits(Arc<AtomicUsize>);

    #[tokio::test]
    async fn dispatches_to_registered_handler() {
        let router = EventRouter::new();
        router.register("PING", |hits: Hits, payload| async move {
            assert_eq!(payload, json!({ "n": 1 }));
            hits.0.fetch_add(1, Ordering::SeqCst);
            Ok::<_, anyhow::Error>(())
        });

        let hits = Hits::default();
        assert!(router.dispatch("PING", json!({ "n": 1 }), hits.clone()).await);
        assert_eq!(hits.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_event_type_is_noop() {
        let router: EventRouter<Hits> = EventRouter::new();
        assert!(!router.dispatch("NOPE", Value::Null, Hits::default()).await);
    }

    #[tokio::test]
    async fn re_registering_replaces_handler() {
        let router = EventRouter::new();
        router.register("PING", |hits: Hits, _| async move {
            hits.0.fetch_add(100, Ordering::SeqCst);
            Ok::<_, anyhow::Error>(())
        });
        for _ in 0..3 {
            router.register("PING", |hits: Hits, _| async move {
                hits.0.fetch_add(1, Ordering::SeqCst);
                Ok::<_, anyhow::Error>(())
            });
        }
        assert_eq!(router.len(), 1);

        let hits = Hits::default();
        router.dispatch("PING", Value::Null, hits.clone()).await;
        assert_eq!(hits.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn handler_errors_and_panics_are_contained() {
        let router = EventRouter::new();
        router.register("FAIL", |_: Hits, _| async move { Err::<(), _>(anyhow::anyhow!("boom")) });
        router.register("PANIC", |_: Hits, payload: Value| async move {
            if payload.is_null() {
                panic!("handler exploded");
            }
            Ok::<_, anyhow::Error>(())
        });

        assert!(router.dispatch("FAIL", Value::Null, Hits::default()).await);
        assert!(router.dispatch("PANIC", Value::Null, Hits::default()).await);

        // Router is still usable afterwards.
        assert!(router.is_registered("PANIC"));
        assert!(router.unregister("PANIC"));
        assert!(!router.is_registered("PANIC"));
    }
}
