use std::fmt::Debug;
use std::io;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Sink, Stream};
use thiserror::Error;

use crate::app::MessageId;

/// Synchronous outbound half used by [`crate::app::CoapContext`].  Implementations queue or
/// write datagrams immediately and must not call back into the context.
pub trait Transmitter<Endpoint> {
    /// Best-effort delivery: responses and non-confirmable notifications.
    fn send(&mut self, peer: &Endpoint, datagram: Bytes) -> Result<(), TransportError>;

    /// Delivery with acknowledgement and retransmission.  The transport must eventually report
    /// exactly one [`Completion`] for `(message_id, peer)` via [`Self::poll_completion`].
    fn send_confirmable(
        &mut self,
        peer: &Endpoint,
        datagram: Bytes,
        message_id: MessageId,
    ) -> Result<(), TransportError>;

    /// Next completion the transport has determined, if any.  Polled by the context between
    /// sends, so completions may surface in the middle of a notification pass.
    fn poll_completion(&mut self) -> Option<Completion<Endpoint>> {
        None
    }
}

/// Final fate of a confirmable message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransmissionOutcome {
    Acked,
    TimedOut,
    ResetByPeer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion<Endpoint> {
    pub message_id: MessageId,
    pub peer: Endpoint,
    pub outcome: TransmissionOutcome,
}

/// Generalization of the underlying CoAP transport, intended primarily to make it easy to support a
/// wide range of datagram protocols while keeping the core engine runtime agnostic.
#[async_trait]
pub trait Transport {
    type Endpoint: Debug + Send + Clone;

    /// Perform the binding, that is, begin accepting new datagrams from this transport even if
    /// there isn't yet a handler serving the data source yet.  We expect a continuous async
    /// stream of (datagram, Endpoint) pairs which distinguish each individual peer.
    async fn bind(self) -> Result<BoxedFramedBinding<Self::Endpoint>, TransportError>;
}

pub type BoxedFramedBinding<Endpoint> = Pin<Box<dyn FramedBinding<Endpoint>>>;

/// Trait generalizing a common feature of async libraries like tokio where a socket is exposed
/// as both a stream and a sink.  It should be possible even for libraries that have them split
/// to unify in the bridging layer with this crate.
pub trait FramedBinding<Endpoint>:
    Send
    + Stream<Item = Result<FramedItem<Endpoint>, FramedReadError<Endpoint>>>
    + Sink<FramedItem<Endpoint>, Error = FramedWriteError>
{
    /// Access the link's MTU.  The server shrinks its datagram budget to fit when this is
    /// smaller than the configured maximum.
    fn mtu(&self) -> Option<u32>;
}

/// Raw datagram exchanged with a remote peer, as designated by [`Endpoint`].  Parsing happens in
/// the engine so that malformed input is counted and dropped in one place.
pub type FramedItem<Endpoint> = (Bytes, Endpoint);

/// Error when receiving from a remote peer.  Note that here [`Endpoint`] is optional as there may
/// be a generic read error unrelated to any remote peer, for example if the underlying bound
/// socket is closed.
pub type FramedReadError<Endpoint> = (TransportError, Option<Endpoint>);

/// Error when sending to a remote peer.  Note that [`Endpoint`] is omitted in this case as the
/// endpoint is provided to the send APIs themselves so we can easily tell which peer generated
/// the error.
pub type FramedWriteError = TransportError;

/// Generalized errors indicating a range of transport-related issues such as being unable to bind,
/// disconnections from remote peers, etc.  Most of these errors are non-fatal and the server can
/// happily continue serving other customers.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("generic I/O error: {0}")]
    IoError(#[from] io::Error),

    #[error("unspecified: {0}")]
    Unspecified(String),
}

impl TransportError {
    /// Errors that leave the underlying socket unusable.  Per-peer ICMP feedback surfacing as
    /// refused or reset connections is not among them.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::IoError(e) => !matches!(
                e.kind(),
                io::ErrorKind::ConnectionRefused
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::Interrupted
                    | io::ErrorKind::WouldBlock
            ),
            Self::Unspecified(_) => false,
        }
    }
}
