use bytes::Bytes;
use futures_util::StreamExt as _;
use futures_util::stream::BoxStream;
use tokio_util::sync::CancellationToken;

pub type RelayBodyStream = BoxStream<'static, Result<Bytes, std::io::Error>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelayEnd {
    Completed,
    Error,
    Aborted,
}

type CloseHook = Box<dyn FnOnce(RelayEnd, u64) + Send>;

struct RelayState {
    upstream: RelayBodyStream,
    cancel: CancellationToken,
    bytes_sent: u64,
    on_close: Option<CloseHook>,
}

impl RelayState {
    fn finish(&mut self, end: RelayEnd) {
        if let Some(on_close) = self.on_close.take() {
            on_close(end, self.bytes_sent);
        }
    }
}

impl Drop for RelayState {
    // Dropped before the upstream ended: the client went away.
    fn drop(&mut self) {
        self.finish(RelayEnd::Aborted);
    }
}

/// Adapts a reqwest body into the relay's byte stream.
pub fn upstream_body(response: reqwest::Response) -> RelayBodyStream {
    response
        .bytes_stream()
        .map(|chunk| chunk.map_err(std::io::Error::other))
        .boxed()
}

/// Forwards `upstream` chunk by chunk, in order, without buffering.
///
/// `on_close` runs exactly once with how the relay ended and the bytes forwarded. Dropping
/// the returned stream or cancelling `cancel` drops the upstream read.
pub fn relay(
    upstream: RelayBodyStream,
    cancel: CancellationToken,
    on_close: impl FnOnce(RelayEnd, u64) + Send + 'static,
) -> RelayBodyStream {
    let state = RelayState {
        upstream,
        cancel,
        bytes_sent: 0,
        on_close: Some(Box::new(on_close)),
    };

    futures_util::stream::try_unfold(state, |mut state| async move {
        let polled = tokio::select! {
            biased;
            _ = state.cancel.cancelled() => None,
            next = state.upstream.next() => Some(next),
        };
        let Some(next) = polled else {
            state.finish(RelayEnd::Aborted);
            return Ok(None);
        };
        match next {
            Some(Ok(chunk)) => {
                state.bytes_sent = state.bytes_sent.saturating_add(chunk.len() as u64);
                Ok(Some((chunk, state)))
            }
            Some(Err(err)) => {
                tracing::warn!(error = %err, bytes = state.bytes_sent, "upstream stream failed");
                state.finish(RelayEnd::Error);
                Err(err)
            }
            None => {
                state.finish(RelayEnd::Completed);
                Ok(None)
            }
        }
    })
    .boxed()
}
