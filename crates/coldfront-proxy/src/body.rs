//! Bounded inspect-then-forward body buffering.
//!
//! Deciding whether a 503 is retryable means reading the front of its
//! body, but the response may still need to reach the client verbatim.
//! [`peek_body`] reads up to a limit, then hands back both the buffered
//! prefix and a replacement body that replays the prefix before
//! streaming whatever was not consumed.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use http_body::{Body, Frame, SizeHint};
use http_body_util::BodyExt;

/// Read up to `limit` bytes from the front of `body`.
///
/// Returns the buffered prefix and a [`PeekedBody`] that yields the
/// prefix first and then the rest of the original body, so the response
/// stays readable downstream.
pub async fn peek_body<B>(body: B, limit: usize) -> Result<(Bytes, PeekedBody<B>), B::Error>
where
    B: Body<Data = Bytes> + Unpin,
{
    let mut buffered = BytesMut::new();
    let mut pending = None;
    let mut rest = Some(body);

    while buffered.len() < limit {
        let frame = match rest.as_mut() {
            Some(body) => body.frame().await,
            None => break,
        };
        match frame {
            None => {
                rest = None;
            }
            Some(Err(e)) => return Err(e),
            Some(Ok(frame)) => match frame.into_data() {
                Ok(data) => buffered.extend_from_slice(&data),
                // A non-data frame (trailers) ends the data section.
                Err(frame) => {
                    pending = Some(frame);
                    break;
                }
            },
        }
    }

    let prefix = buffered.freeze();
    let replay = PeekedBody {
        prefix: (!prefix.is_empty()).then(|| prefix.clone()),
        pending,
        rest,
    };
    Ok((prefix, replay))
}

/// A body that replays a buffered prefix before the unconsumed
/// remainder of the original body.
pub struct PeekedBody<B> {
    prefix: Option<Bytes>,
    pending: Option<Frame<Bytes>>,
    rest: Option<B>,
}

impl<B> Body for PeekedBody<B>
where
    B: Body<Data = Bytes> + Unpin,
{
    type Data = Bytes;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, B::Error>>> {
        let this = self.get_mut();
        if let Some(prefix) = this.prefix.take() {
            return Poll::Ready(Some(Ok(Frame::data(prefix))));
        }
        if let Some(frame) = this.pending.take() {
            return Poll::Ready(Some(Ok(frame)));
        }
        match this.rest.as_mut() {
            Some(rest) => Pin::new(rest).poll_frame(cx),
            None => Poll::Ready(None),
        }
    }

    fn is_end_stream(&self) -> bool {
        self.prefix.is_none()
            && self.pending.is_none()
            && self.rest.as_ref().is_none_or(|rest| rest.is_end_stream())
    }

    fn size_hint(&self) -> SizeHint {
        let buffered = self.prefix.as_ref().map(|p| p.len() as u64).unwrap_or(0);
        match &self.rest {
            Some(rest) => {
                let mut hint = rest.size_hint();
                hint.set_lower(hint.lower() + buffered);
                if let Some(upper) = hint.upper() {
                    hint.set_upper(upper + buffered);
                }
                hint
            }
            None => SizeHint::with_exact(buffered),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::Full;

    async fn collect<B>(body: B) -> Bytes
    where
        B: Body<Data = Bytes> + Unpin,
        B::Error: std::fmt::Debug,
    {
        body.collect().await.unwrap().to_bytes()
    }

    #[tokio::test]
    async fn short_body_is_fully_buffered() {
        let body = Full::new(Bytes::from_static(b"hello"));
        let (prefix, replay) = peek_body(body, 1024).await.unwrap();

        assert_eq!(&prefix[..], b"hello");
        assert_eq!(&collect(replay).await[..], b"hello");
    }

    #[tokio::test]
    async fn long_body_is_peeked_and_replayed_in_full() {
        let payload = vec![b'x'; 4096];
        let body = Full::new(Bytes::from(payload.clone()));
        let (prefix, replay) = peek_body(body, 16).await.unwrap();

        assert!(prefix.len() >= 16);
        assert_eq!(collect(replay).await.len(), payload.len());
    }

    #[tokio::test]
    async fn empty_body_peeks_empty() {
        let body = Full::new(Bytes::new());
        let (prefix, replay) = peek_body(body, 1024).await.unwrap();

        assert!(prefix.is_empty());
        assert!(collect(replay).await.is_empty());
    }

    #[tokio::test]
    async fn prefix_match_is_checkable() {
        let body = Full::new(Bytes::from_static(b"upstream says no"));
        let (prefix, _replay) = peek_body(body, 8).await.unwrap();

        assert!(prefix.starts_with(b"upstream"));
        assert!(!prefix.starts_with(b"anything else"));
    }
}
