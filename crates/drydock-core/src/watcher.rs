use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{stream, Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::session::Session;
use crate::Error;

/// Delay between forwarded items, to avoid busy-spinning tight inner
/// sequences.
pub const WATCH_DELAY: Duration = Duration::from_millis(10);

struct WatchState<S> {
    inner: Pin<Box<S>>,
    session: Arc<Session>,
    client_gone: CancellationToken,
    done: bool,
}

/// Wraps a sequence of partial results so it aborts the moment the session
/// turns adverse or the client goes away.
///
/// After consuming each inner item the wrapper checks, in order: client
/// transport closed ([`Error::ClientGone`]), session timed out
/// ([`Error::SessionTimeout`] carrying the session's reason), session closed
/// ([`Error::SessionClosed`]). The first failure ends the stream; otherwise
/// the item is forwarded after [`WATCH_DELAY`]. The inner sequence's last
/// item is the wrapped operation's result to whoever consumes it.
pub fn watch<S, T>(
    inner: S,
    session: Arc<Session>,
    client_gone: CancellationToken,
) -> impl Stream<Item = Result<T, Error>>
where
    S: Stream<Item = T> + Send + 'static,
    T: Send + 'static,
{
    let state = WatchState {
        inner: Box::pin(inner),
        session,
        client_gone,
        done: false,
    };
    stream::unfold(state, |mut state| async move {
        if state.done {
            return None;
        }
        let item = state.inner.next().await?;
        if state.client_gone.is_cancelled() {
            state.done = true;
            return Some((Err(Error::ClientGone), state));
        }
        if state.session.is_timeouted() {
            state.done = true;
            let message = format!(
                "Session {} timeout ({})",
                state.session.id(),
                state.session.reason().unwrap_or_default()
            );
            return Some((Err(Error::SessionTimeout(message)), state));
        }
        if state.session.is_closed() {
            state.done = true;
            let message = format!(
                "Session {} closed ({})",
                state.session.id(),
                state.session.reason().unwrap_or_default()
            );
            return Some((Err(Error::SessionClosed(message)), state));
        }
        tokio::time::sleep(WATCH_DELAY).await;
        Some((Ok(item), state))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{make_session, ScriptedDriver};
    use tokio_stream::wrappers::ReceiverStream;

    #[tokio::test]
    async fn forwards_the_whole_inner_sequence_when_nothing_goes_wrong() {
        let session = make_session(ScriptedDriver::unused());
        let inner = stream::iter(vec![1, 2, 3]);
        let watched = watch(inner, session, CancellationToken::new());

        let items: Vec<_> = watched.collect().await;
        assert_eq!(items.len(), 3);
        assert_eq!(items.into_iter().map(Result::unwrap).collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn client_disconnect_aborts_after_the_current_item() {
        let session = make_session(ScriptedDriver::unused());
        let token = CancellationToken::new();
        let (tx, rx) = tokio::sync::mpsc::channel(8);
        for item in [1, 2, 3] {
            tx.send(item).await.unwrap();
        }
        drop(tx);

        let watched = watch(ReceiverStream::new(rx), session, token.clone());
        tokio::pin!(watched);

        let first = watched.next().await.unwrap();
        assert_eq!(first.unwrap(), 1);

        token.cancel();
        let second = watched.next().await.unwrap();
        assert!(matches!(second, Err(Error::ClientGone)));
        assert!(watched.next().await.is_none());
    }

    #[tokio::test]
    async fn session_timeout_aborts_with_the_reason() {
        let session = make_session(ScriptedDriver::unused());
        let watched = watch(
            stream::iter(vec![1, 2, 3]),
            Arc::clone(&session),
            CancellationToken::new(),
        );
        tokio::pin!(watched);

        assert_eq!(watched.next().await.unwrap().unwrap(), 1);
        session.timeout().await;

        match watched.next().await.unwrap() {
            Err(Error::SessionTimeout(message)) => {
                assert!(message.contains(&session.id().to_string()));
                assert!(message.contains("Session timeout. No activity since"));
            }
            other => panic!("expected timeout abort, got {other:?}"),
        }
        assert!(watched.next().await.is_none());
    }

    #[tokio::test]
    async fn session_close_aborts_the_stream() {
        let session = make_session(ScriptedDriver::unused());
        let watched = watch(
            stream::iter(vec![1, 2]),
            Arc::clone(&session),
            CancellationToken::new(),
        );
        tokio::pin!(watched);

        assert_eq!(watched.next().await.unwrap().unwrap(), 1);
        session.succeed().await;

        assert!(matches!(
            watched.next().await.unwrap(),
            Err(Error::SessionClosed(_))
        ));
    }
}
