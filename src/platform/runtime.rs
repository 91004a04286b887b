use std::future::Future;
#[cfg(not(target_arch = "wasm32"))]
use std::sync::LazyLock;
use std::time::Duration;

use futures::future::{AbortHandle, Abortable};

#[cfg(not(target_arch = "wasm32"))]
use crate::logger::Logger;

#[cfg(not(target_arch = "wasm32"))]
static LOGGER: LazyLock<Logger> = LazyLock::new(|| Logger::new("@polybase/runtime"));

/// Spawns `future` in the background and returns a handle that stops it.
/// Aborting drops the future at its next suspension point.
#[cfg(not(target_arch = "wasm32"))]
pub fn spawn_abortable<F>(future: F) -> AbortHandle
where
    F: Future<Output = ()> + Send + 'static,
{
    let (handle, registration) = AbortHandle::new_pair();
    spawn_detached(async move {
        let _ = Abortable::new(future, registration).await;
    });
    handle
}

#[cfg(target_arch = "wasm32")]
pub fn spawn_abortable<F>(future: F) -> AbortHandle
where
    F: Future<Output = ()> + 'static,
{
    let (handle, registration) = AbortHandle::new_pair();
    spawn_detached(async move {
        let _ = Abortable::new(future, registration).await;
    });
    handle
}

#[cfg(target_arch = "wasm32")]
pub fn spawn_detached<F>(future: F)
where
    F: Future<Output = ()> + 'static,
{
    wasm_bindgen_futures::spawn_local(future);
}

/// Runs on the caller's Tokio runtime when there is one, otherwise on a
/// shared background runtime.
#[cfg(not(target_arch = "wasm32"))]
pub fn spawn_detached<F>(future: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    use tokio::runtime::{Builder, Handle, Runtime};

    static BACKGROUND_RUNTIME: LazyLock<Option<Runtime>> = LazyLock::new(|| {
        match Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("polybase-background")
            .enable_all()
            .build()
        {
            Ok(runtime) => Some(runtime),
            Err(err) => {
                LOGGER.error(format!("failed to start background runtime: {err}"));
                None
            }
        }
    });

    let handle = Handle::try_current().ok().or_else(|| {
        BACKGROUND_RUNTIME
            .as_ref()
            .map(|runtime| runtime.handle().clone())
    });
    spawn_with(handle, future);
}

#[cfg(not(target_arch = "wasm32"))]
fn spawn_with<F>(handle: Option<tokio::runtime::Handle>, future: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    match handle {
        Some(handle) => {
            handle.spawn(future);
        }
        None => LOGGER.error("no Tokio runtime available, background task dropped"),
    }
}

pub async fn sleep(duration: Duration) {
    if duration.is_zero() {
        return;
    }

    #[cfg(target_arch = "wasm32")]
    gloo_timers::future::sleep(duration).await;

    #[cfg(not(target_arch = "wasm32"))]
    tokio::time::sleep(duration).await;
}
