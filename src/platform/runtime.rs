use std::future::Future;

/// Runs `future` in the background without waiting for it.
#[cfg(target_arch = "wasm32")]
pub fn spawn_detached<F>(future: F)
where
    F: Future<Output = ()> + 'static,
{
    wasm_bindgen_futures::spawn_local(future);
}

/// Runs `future` in the background without waiting for it.
///
/// Inside a Tokio runtime the future becomes a task on that runtime, so a current-thread runtime
/// keeps the cooperative single-threaded model. Outside of one it is spawned onto a shared
/// background runtime driven by a single dedicated thread.
#[cfg(not(target_arch = "wasm32"))]
pub fn spawn_detached<F>(future: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    use tokio::runtime::Handle;

    if let Ok(handle) = Handle::try_current() {
        handle.spawn(future);
    } else if let Some(handle) = background_handle() {
        handle.spawn(future);
    } else {
        log::warn!("background runtime unavailable; driving task on its own thread");
        std::thread::spawn(move || futures::executor::block_on(future));
    }
}

#[cfg(not(target_arch = "wasm32"))]
const BACKGROUND_THREAD_NAME: &str = "gtag-gateway-runtime";

#[cfg(not(target_arch = "wasm32"))]
fn background_handle() -> Option<&'static tokio::runtime::Handle> {
    use std::sync::LazyLock;
    use tokio::runtime::{Builder, Handle};

    static BACKGROUND_RUNTIME: LazyLock<Option<Handle>> = LazyLock::new(|| {
        let runtime = match Builder::new_current_thread().enable_all().build() {
            Ok(runtime) => runtime,
            Err(err) => {
                log::error!("failed to build background tokio runtime: {err}");
                return None;
            }
        };
        let handle = runtime.handle().clone();
        // The runtime only makes progress while its thread is blocked on it.
        let spawned = std::thread::Builder::new()
            .name(BACKGROUND_THREAD_NAME.to_string())
            .spawn(move || runtime.block_on(std::future::pending::<()>()));
        match spawned {
            Ok(_) => Some(handle),
            Err(err) => {
                log::error!("failed to start background runtime thread: {err}");
                None
            }
        }
    });

    BACKGROUND_RUNTIME.as_ref()
}

#[cfg(all(test, not(target_arch = "wasm32")))]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[tokio::test(flavor = "current_thread")]
    async fn spawns_onto_ambient_runtime() {
        let (tx, rx) = futures::channel::oneshot::channel();
        spawn_detached(async move {
            let _ = tx.send(7);
        });
        assert_eq!(rx.await.unwrap(), 7);
    }

    #[test]
    fn falls_back_to_the_background_runtime() {
        let (tx, rx) = mpsc::channel();
        spawn_detached(async move {
            let _ = tx.send("done");
        });
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "done");
    }

    #[test]
    fn parked_tasks_share_one_background_thread() {
        let (release_tx, release_rx) = futures::channel::oneshot::channel::<()>();
        let release = futures::FutureExt::shared(release_rx);
        let (tx, rx) = mpsc::channel();
        for _ in 0..300 {
            let release = release.clone();
            let tx = tx.clone();
            spawn_detached(async move {
                let _ = release.await;
                let _ = tx.send(std::thread::current().name().map(str::to_string));
            });
        }
        drop(tx);

        release_tx.send(()).unwrap();
        let names: Vec<_> = (0..300)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        assert!(names
            .iter()
            .all(|name| name.as_deref() == Some(BACKGROUND_THREAD_NAME)));
    }
}
