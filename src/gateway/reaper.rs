use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::watch;

use super::observability::Observability;
use crate::types::{UploadStatus, UploadedFile};
use crate::utils::task::AbortOnDrop;

struct TrackedFile {
    file: UploadedFile,
    readers: Arc<watch::Sender<usize>>,
    timer: Option<AbortOnDrop>,
}

struct ReaperInner {
    files: Mutex<HashMap<String, TrackedFile>>,
    delay: Duration,
    observability: Arc<Observability>,
}

impl ReaperInner {
    fn files(&self) -> MutexGuard<'_, HashMap<String, TrackedFile>> {
        self.files.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Deletes stored uploads after a delay, but never while a [`FileLease`] is outstanding.
///
/// Pending timers are aborted when the last handle to the reaper is dropped.
#[derive(Clone)]
pub struct FileReaper {
    inner: Arc<ReaperInner>,
}

impl std::fmt::Debug for FileReaper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileReaper")
            .field("delay", &self.inner.delay)
            .field("tracked", &self.tracked())
            .finish()
    }
}

/// A reader's claim on an uploaded file; deletion waits until every lease is dropped.
#[derive(Debug)]
pub struct FileLease {
    file: UploadedFile,
    readers: Arc<watch::Sender<usize>>,
}

impl FileLease {
    pub fn file(&self) -> &UploadedFile {
        &self.file
    }
}

impl Drop for FileLease {
    fn drop(&mut self) {
        self.readers.send_modify(|count| *count = count.saturating_sub(1));
    }
}

impl FileReaper {
    pub fn new(delay: Duration, observability: Arc<Observability>) -> Self {
        Self {
            inner: Arc::new(ReaperInner {
                files: Mutex::new(HashMap::new()),
                delay,
                observability,
            }),
        }
    }

    pub fn register(&self, file: UploadedFile) {
        let (readers, _) = watch::channel(0usize);
        self.inner.files().insert(
            file.id.clone(),
            TrackedFile {
                file,
                readers: Arc::new(readers),
                timer: None,
            },
        );
    }

    pub fn lookup(&self, id: &str) -> Option<UploadedFile> {
        self.inner.files().get(id).map(|tracked| tracked.file.clone())
    }

    pub fn set_status(&self, id: &str, status: UploadStatus) {
        if let Some(tracked) = self.inner.files().get_mut(id) {
            tracked.file.status = status;
        }
    }

    pub fn lease(&self, id: &str) -> Option<FileLease> {
        let files = self.inner.files();
        let tracked = files.get(id)?;
        tracked.readers.send_modify(|count| *count += 1);
        Some(FileLease {
            file: tracked.file.clone(),
            readers: tracked.readers.clone(),
        })
    }

    pub fn schedule(&self, id: &str) {
        self.schedule_after(id, self.inner.delay);
    }

    /// (Re)starts the deletion timer for `id`, replacing any pending one.
    pub fn schedule_after(&self, id: &str, delay: Duration) {
        let mut files = self.inner.files();
        let Some(tracked) = files.get_mut(id) else {
            return;
        };

        let weak = Arc::downgrade(&self.inner);
        let readers = tracked.readers.subscribe();
        let id_owned = id.to_string();
        tracked.timer = Some(AbortOnDrop::spawn(reap_after(
            weak, id_owned, readers, delay,
        )));
        tracing::debug!(file_id = id, delay_ms = delay.as_millis() as u64, "scheduled file deletion");
    }

    /// Stops a pending deletion. Returns whether a timer was pending.
    pub fn cancel(&self, id: &str) -> bool {
        self.inner
            .files()
            .get_mut(id)
            .and_then(|tracked| tracked.timer.take())
            .is_some_and(|timer| !timer.is_finished())
    }

    pub fn pending(&self) -> usize {
        self.inner
            .files()
            .values()
            .filter(|tracked| tracked.timer.as_ref().is_some_and(|timer| !timer.is_finished()))
            .count()
    }

    pub fn tracked(&self) -> usize {
        self.inner.files().len()
    }
}

async fn reap_after(
    inner: Weak<ReaperInner>,
    id: String,
    mut readers: watch::Receiver<usize>,
    delay: Duration,
) {
    tokio::time::sleep(delay).await;
    loop {
        if readers.wait_for(|count| *count == 0).await.is_err() {
            return;
        }
        let Some(inner) = inner.upgrade() else {
            return;
        };

        // A lease may have been taken between the wakeup and here; re-check under the lock.
        let removed = {
            let mut files = inner.files();
            let idle = match files.get(&id) {
                Some(tracked) => *tracked.readers.borrow() == 0,
                None => return,
            };
            if idle { files.remove(&id) } else { None }
        };
        let Some(mut removed) = removed else {
            continue;
        };
        if let Some(timer) = removed.timer.take() {
            timer.disarm();
        }

        match tokio::fs::remove_file(&removed.file.storage_location).await {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                tracing::warn!(file_id = %id, error = %err, "failed to delete uploaded file");
            }
        }
        inner.observability.record_file_reaped();
        tracing::debug!(file_id = %id, "reaped uploaded file");
        return;
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    fn stored(dir: &Path, id: &str) -> UploadedFile {
        let path = dir.join(id);
        std::fs::write(&path, b"payload").unwrap();
        UploadedFile {
            id: id.to_string(),
            file_name: format!("{id}.txt"),
            mimetype: "text/plain".to_string(),
            byte_size: 7,
            storage_location: path,
            status: UploadStatus::Pending,
        }
    }

    async fn settle(reaper: &FileReaper, id: &str) {
        for _ in 0..100 {
            if reaper.lookup(id).is_none() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn deletes_after_delay() {
        let dir = tempfile::tempdir().unwrap();
        let observability = Arc::new(Observability::default());
        let reaper = FileReaper::new(Duration::from_millis(20), observability.clone());
        let file = stored(dir.path(), "a");
        let path = file.storage_location.clone();
        reaper.register(file);

        reaper.schedule("a");
        assert_eq!(reaper.pending(), 1);
        settle(&reaper, "a").await;

        assert!(reaper.lookup("a").is_none());
        assert!(!path.exists());
        assert_eq!(observability.snapshot().files_reaped, 1);
    }

    #[tokio::test]
    async fn waits_for_outstanding_leases() {
        let dir = tempfile::tempdir().unwrap();
        let reaper = FileReaper::new(Duration::from_millis(10), Arc::default());
        let file = stored(dir.path(), "b");
        let path = file.storage_location.clone();
        reaper.register(file);

        let lease = reaper.lease("b").unwrap();
        reaper.schedule("b");
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(path.exists());
        assert_eq!(lease.file().id, "b");

        drop(lease);
        settle(&reaper, "b").await;
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn cancel_keeps_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let reaper = FileReaper::new(Duration::from_millis(10), Arc::default());
        let file = stored(dir.path(), "c");
        let path = file.storage_location.clone();
        reaper.register(file);

        reaper.schedule("c");
        assert!(reaper.cancel("c"));
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(path.exists());
        assert!(reaper.lookup("c").is_some());
        assert_eq!(reaper.pending(), 0);
    }

    #[tokio::test]
    async fn rescheduling_replaces_the_timer() {
        let dir = tempfile::tempdir().unwrap();
        let reaper = FileReaper::new(Duration::from_millis(10), Arc::default());
        let file = stored(dir.path(), "d");
        let path = file.storage_location.clone();
        reaper.register(file);

        reaper.schedule("d");
        reaper.schedule_after("d", Duration::from_secs(60));
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(path.exists());
        assert_eq!(reaper.pending(), 1);
    }
}
