use tokio::task::{AbortHandle, JoinHandle};

/// Aborts the wrapped task when dropped; used for timers that must not outlive their owner.
#[derive(Debug)]
pub(crate) struct AbortOnDrop(Option<AbortHandle>);

impl AbortOnDrop {
    pub(crate) fn spawn<F>(future: F) -> Self
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        Self::from_join_handle(tokio::spawn(future))
    }

    pub(crate) fn from_join_handle(handle: JoinHandle<()>) -> Self {
        Self(Some(handle.abort_handle()))
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.0.as_ref().is_none_or(AbortHandle::is_finished)
    }

    /// Lets the task run to completion even after this guard is dropped.
    pub(crate) fn disarm(mut self) {
        self.0.take();
    }
}

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        if let Some(handle) = self.0.take() {
            handle.abort();
        }
    }
}
