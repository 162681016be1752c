//! Async runtime abstraction. With the `tokio-runtime` feature the engine
//! shares one global multi-thread runtime (or the caller's, when already
//! inside one); without it, tasks run on detached threads via the futures
//! executor so the tile loader keeps working in minimal builds.

use crate::prelude::Duration;
use futures::Future;

#[cfg(feature = "tokio-runtime")]
mod tokio_impl {
    use once_cell::sync::Lazy;

    pub(super) static RUNTIME: Lazy<tokio::runtime::Runtime> = Lazy::new(|| {
        tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("tilescape-worker")
            .build()
            .expect("failed to build tilescape runtime")
    });
}

/// Spawns a detached task.
pub fn spawn<F>(future: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    #[cfg(feature = "tokio-runtime")]
    {
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(future);
        } else {
            tokio_impl::RUNTIME.spawn(future);
        }
    }
    #[cfg(not(feature = "tokio-runtime"))]
    {
        std::thread::spawn(move || futures::executor::block_on(future));
    }
}

/// Sleeps inside a task. The thread fallback blocks its own worker thread,
/// which is acceptable for the detached tasks this module spawns.
pub async fn sleep(duration: Duration) {
    #[cfg(feature = "tokio-runtime")]
    {
        tokio::time::sleep(duration).await;
    }
    #[cfg(not(feature = "tokio-runtime"))]
    {
        std::thread::sleep(duration);
    }
}
