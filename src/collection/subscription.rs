use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use futures::future::AbortHandle;
use futures::StreamExt;
use serde::de::DeserializeOwned;

use crate::client::logger::LOGGER;
use crate::client::{Client, LiveStream, Request};
use crate::collection::types::decode_payload;
use crate::error::{transport_error, PolybaseResult};
use crate::platform::runtime::spawn_abortable;
use crate::util::Observer;

/// Multiplexes listeners over one live stream per canonical key.
pub struct SubscriptionRegistry<T> {
    inner: Arc<RegistryInner<T>>,
}

struct RegistryInner<T> {
    client: Client,
    entries: Mutex<HashMap<String, Arc<Entry<T>>>>,
    next_listener_id: AtomicU64,
}

struct Entry<T> {
    listeners: Mutex<Vec<(u64, Observer<T>)>>,
    pump: Mutex<Option<AbortHandle>>,
}

impl<T> Clone for SubscriptionRegistry<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for SubscriptionRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("streams", &self.stream_count())
            .finish()
    }
}

impl<T> SubscriptionRegistry<T>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(client: Client) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                client,
                entries: Mutex::new(HashMap::new()),
                next_listener_id: AtomicU64::new(1),
            }),
        }
    }

    /// Adds `observer` under `key`, opening the live stream for `request`
    /// when no other listener shares the key.
    pub fn register(
        &self,
        key: impl Into<String>,
        request: Request,
        observer: Observer<T>,
    ) -> ListenerRegistration {
        let key = key.into();
        let id = self.inner.next_listener_id.fetch_add(1, Ordering::SeqCst);

        let mut entries = self.inner.entries.lock().unwrap();
        if let Some(entry) = entries.get(&key) {
            entry.listeners.lock().unwrap().push((id, observer));
        } else {
            LOGGER.debug(format!("opening live stream for {key}"));
            let entry = Arc::new(Entry {
                listeners: Mutex::new(vec![(id, observer)]),
                pump: Mutex::new(None),
            });
            let stream = self.inner.client.stream(request);
            let handle = spawn_abortable(pump(
                Arc::downgrade(&self.inner),
                key.clone(),
                Arc::downgrade(&entry),
                stream,
            ));
            *entry.pump.lock().unwrap() = Some(handle);
            entries.insert(key.clone(), entry);
        }
        drop(entries);

        ListenerRegistration::new(self.inner.clone(), key, id)
    }
}

impl<T> SubscriptionRegistry<T> {
    /// Number of keys with an open stream.
    pub fn stream_count(&self) -> usize {
        self.inner.entries.lock().unwrap().len()
    }

    pub fn listener_count(&self, key: &str) -> usize {
        self.inner
            .entries
            .lock()
            .unwrap()
            .get(key)
            .map(|entry| entry.listeners.lock().unwrap().len())
            .unwrap_or(0)
    }
}

trait ListenerSet: Send + Sync {
    fn remove_listener(&self, key: &str, id: u64);
}

impl<T> ListenerSet for RegistryInner<T>
where
    T: Send + Sync,
{
    fn remove_listener(&self, key: &str, id: u64) {
        let closed = {
            let mut entries = self.entries.lock().unwrap();
            let Some(entry) = entries.get(key).cloned() else {
                return;
            };
            let mut listeners = entry.listeners.lock().unwrap();
            listeners.retain(|(listener_id, _)| *listener_id != id);
            if !listeners.is_empty() {
                return;
            }
            entries.remove(key);
            let handle = entry.pump.lock().unwrap().take();
            handle
        };

        if let Some(handle) = closed {
            LOGGER.debug(format!("closing live stream for {key}"));
            handle.abort();
        }
    }
}

impl<T> Entry<T> {
    fn is_listening(&self, id: u64) -> bool {
        self.listeners
            .lock()
            .unwrap()
            .iter()
            .any(|(listener_id, _)| *listener_id == id)
    }

    fn deliver(&self, event: &PolybaseResult<T>) {
        let listeners: Vec<(u64, Observer<T>)> = self.listeners.lock().unwrap().clone();
        for (id, observer) in listeners {
            // skip listeners detached by an earlier callback of this event
            if !self.is_listening(id) {
                continue;
            }
            match event {
                Ok(value) => (observer.next)(value),
                Err(err) => {
                    if let Some(callback) = &observer.error {
                        callback(err);
                    }
                }
            }
        }
    }
}

async fn pump<T>(
    registry: Weak<RegistryInner<T>>,
    key: String,
    entry: Weak<Entry<T>>,
    mut stream: LiveStream,
) where
    T: DeserializeOwned,
{
    while let Some(event) = stream.next().await {
        let Some(live) = entry.upgrade() else {
            return;
        };
        let event = event.and_then(|payload| decode_payload::<T>(payload, "live update"));
        if let Err(err) = &event {
            LOGGER.debug(format!("live stream reported an error: {err}"));
        }
        live.deliver(&event);
    }

    // The stream ended on its own: unlink the entry so the next
    // registration for this key opens a fresh stream.
    let (Some(registry), Some(live)) = (registry.upgrade(), entry.upgrade()) else {
        return;
    };
    {
        let mut entries = registry.entries.lock().unwrap();
        if entries
            .get(&key)
            .is_some_and(|current| Arc::ptr_eq(current, &live))
        {
            entries.remove(&key);
        }
    }
    LOGGER.debug(format!("live stream for {key} ended"));
    live.deliver(&Err(transport_error(format!("Live stream for {key} ended"))));
}

/// RAII-style listener registration; dropping the handle detaches the
/// listener. The last detach for a key closes its stream.
#[must_use = "dropping the registration detaches the listener"]
pub struct ListenerRegistration {
    registry: Arc<dyn ListenerSet>,
    key: String,
    id: Option<u64>,
}

impl ListenerRegistration {
    fn new(registry: Arc<dyn ListenerSet>, key: String, id: u64) -> Self {
        Self {
            registry,
            key,
            id: Some(id),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn detach(mut self) {
        if let Some(id) = self.id.take() {
            self.registry.remove_listener(&self.key, id);
        }
    }
}

impl Drop for ListenerRegistration {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            self.registry.remove_listener(&self.key, id);
        }
    }
}

impl fmt::Debug for ListenerRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistration")
            .field("key", &self.key)
            .field("id", &self.id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::transport::SenderError;
    use crate::client::ClientConfig;
    use crate::collection::types::CollectionDocument;
    use crate::error::PolybaseErrorCode;
    use crate::test_support::{ok_response, wait_until, MockSender};
    use serde_json::{json, Value as JsonValue};

    const KEY: &str = "doc:users/a";

    fn registry() -> (Arc<MockSender>, SubscriptionRegistry<CollectionDocument>) {
        let sender = Arc::new(MockSender::new(|_| Ok(ok_response(JsonValue::Null))).with_streams());
        let client = Client::new(sender.clone(), None, ClientConfig::default());
        (sender, SubscriptionRegistry::new(client))
    }

    fn recorder() -> (Arc<Mutex<Vec<JsonValue>>>, Observer<CollectionDocument>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let observer = Observer::new(move |doc: &CollectionDocument| {
            sink.lock().unwrap().push(doc.data.clone());
        });
        (seen, observer)
    }

    fn request() -> Request {
        Request::get("/data/users/a")
    }

    #[tokio::test(flavor = "current_thread")]
    async fn shares_one_stream_per_key() {
        let (sender, registry) = registry();
        let (first_seen, first) = recorder();
        let (second_seen, second) = recorder();

        let _first = registry.register(KEY, request(), first);
        let _second = registry.register(KEY, request(), second);

        assert_eq!(sender.streams().len(), 1);
        assert_eq!(registry.stream_count(), 1);
        assert_eq!(registry.listener_count(KEY), 2);

        sender.streams()[0].emit(json!({ "data": { "id": "a" } }));
        wait_until(|| first_seen.lock().unwrap().len() == 1 && second_seen.lock().unwrap().len() == 1)
            .await;
        assert_eq!(first_seen.lock().unwrap()[0], json!({ "id": "a" }));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn last_detach_closes_stream_and_reregistration_reopens() {
        let (sender, registry) = registry();
        let (_, first) = recorder();
        let (_, second) = recorder();

        let first = registry.register(KEY, request(), first);
        let second = registry.register(KEY, request(), second);
        let stream = sender.streams()[0].clone();

        first.detach();
        assert_eq!(registry.listener_count(KEY), 1);
        tokio::task::yield_now().await;
        assert!(!stream.is_closed());

        drop(second);
        assert_eq!(registry.stream_count(), 0);
        wait_until(|| stream.is_closed()).await;

        let (seen, third) = recorder();
        let _third = registry.register(KEY, request(), third);
        assert_eq!(sender.streams().len(), 2);
        sender.streams()[1].emit(json!({ "data": { "id": "b" } }));
        wait_until(|| seen.lock().unwrap().len() == 1).await;
    }

    #[tokio::test(flavor = "current_thread")]
    async fn late_listener_sees_only_later_events() {
        let (sender, registry) = registry();
        let (early_seen, early) = recorder();
        let _early = registry.register(KEY, request(), early);
        let stream = sender.streams()[0].clone();

        stream.emit(json!({ "data": { "n": 1 } }));
        wait_until(|| early_seen.lock().unwrap().len() == 1).await;

        let (late_seen, late) = recorder();
        let _late = registry.register(KEY, request(), late);
        stream.emit(json!({ "data": { "n": 2 } }));
        wait_until(|| early_seen.lock().unwrap().len() == 2).await;

        assert_eq!(*late_seen.lock().unwrap(), vec![json!({ "n": 2 })]);
        assert_eq!(
            *early_seen.lock().unwrap(),
            vec![json!({ "n": 1 }), json!({ "n": 2 })]
        );
    }

    #[tokio::test(flavor = "current_thread")]
    async fn errors_reach_error_listeners_without_teardown() {
        let (sender, registry) = registry();
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = errors.clone();
        let (seen, observer) = recorder();
        let observer = observer.with_error(move |err| sink.lock().unwrap().push(err.code));
        let _registration = registry.register(KEY, request(), observer);
        let stream = sender.streams()[0].clone();

        stream.fail(SenderError::Status {
            status: 500,
            body: None,
        });
        stream.emit(json!("not a document"));
        stream.emit(json!({ "data": { "id": "a" } }));
        wait_until(|| seen.lock().unwrap().len() == 1).await;

        assert_eq!(
            *errors.lock().unwrap(),
            vec![PolybaseErrorCode::TransportError, PolybaseErrorCode::Internal]
        );
        assert_eq!(registry.stream_count(), 1);
        assert!(!stream.is_closed());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn ended_stream_is_reported_and_reopened_on_next_registration() {
        let (sender, registry) = registry();
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = errors.clone();
        let (_, observer) = recorder();
        let observer = observer.with_error(move |err| sink.lock().unwrap().push(err.code));
        let first = registry.register(KEY, request(), observer);

        sender.streams()[0].close();
        wait_until(|| registry.stream_count() == 0).await;
        assert_eq!(
            *errors.lock().unwrap(),
            vec![PolybaseErrorCode::TransportError]
        );

        let (seen, second) = recorder();
        let _second = registry.register(KEY, request(), second);
        assert_eq!(sender.streams().len(), 2);
        assert_eq!(registry.listener_count(KEY), 1);

        first.detach();
        assert_eq!(registry.listener_count(KEY), 1);
        sender.streams()[1].emit(json!({ "data": { "id": "a" } }));
        wait_until(|| seen.lock().unwrap().len() == 1).await;
    }

    #[tokio::test(flavor = "current_thread")]
    async fn listener_can_detach_itself_during_delivery() {
        let (sender, registry) = registry();
        let slot: Arc<Mutex<Option<ListenerRegistration>>> = Arc::new(Mutex::new(None));
        let calls = Arc::new(AtomicU64::new(0));

        let own_slot = slot.clone();
        let counter = calls.clone();
        let observer = Observer::new(move |_: &CollectionDocument| {
            counter.fetch_add(1, Ordering::SeqCst);
            let registration = own_slot.lock().unwrap().take();
            if let Some(registration) = registration {
                registration.detach();
            }
        });
        let (other_seen, other) = recorder();
        *slot.lock().unwrap() = Some(registry.register(KEY, request(), observer));
        let _other = registry.register(KEY, request(), other);
        let stream = sender.streams()[0].clone();

        stream.emit(json!({ "data": { "n": 1 } }));
        wait_until(|| other_seen.lock().unwrap().len() == 1).await;
        stream.emit(json!({ "data": { "n": 2 } }));
        wait_until(|| other_seen.lock().unwrap().len() == 2).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(registry.listener_count(KEY), 1);
    }
}
