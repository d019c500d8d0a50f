use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{Sink, Stream};
use pin_project::pin_project;
use tokio::net::{ToSocketAddrs, UdpSocket};
use tokio_util::codec::{Decoder, Encoder};
use tokio_util::udp::UdpFramed;

use crate::transport::{BoxedFramedBinding, FramedBinding, Transport, TransportError};

/// Default CoAP transport as originally defined in RFC 7252.  Likely this is what you want if
/// you're new to CoAP.
pub struct UdpTransport<A: ToSocketAddrs> {
    addresses: A,
    mtu: Option<u32>,
}

impl<A: ToSocketAddrs> UdpTransport<A> {
    pub fn new(addresses: A) -> Self {
        Self {
            addresses,
            mtu: None,
        }
    }

    /// Manually set the link MTU.  Responses and notifications larger than this are not sent.
    pub fn set_mtu(mut self, mtu: u32) -> Self {
        self.mtu = Some(mtu);
        self
    }
}

#[async_trait]
impl<A: ToSocketAddrs + Sync + Send> Transport for UdpTransport<A> {
    type Endpoint = SocketAddr;

    async fn bind(self) -> Result<BoxedFramedBinding<Self::Endpoint>, TransportError> {
        let socket = UdpSocket::bind(self.addresses).await?;
        let local_addr = socket.local_addr()?;
        log::debug!("Bound UDP socket to {local_addr}");
        let framed_socket = UdpFramed::new(socket, DatagramCodec);
        let binding = UdpBinding {
            framed_socket,
            mtu: self.mtu,
        };
        Ok(Box::pin(binding))
    }
}

#[pin_project]
struct UdpBinding {
    #[pin]
    framed_socket: UdpFramed<DatagramCodec>,
    mtu: Option<u32>,
}

impl FramedBinding<SocketAddr> for UdpBinding {
    fn mtu(&self) -> Option<u32> {
        self.mtu
    }
}

impl Stream for UdpBinding {
    type Item = Result<(Bytes, SocketAddr), (TransportError, Option<SocketAddr>)>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.project()
            .framed_socket
            .poll_next(cx)
            .map(|item| item.map(|result| result.map_err(|e| (e, None))))
    }
}

impl Sink<(Bytes, SocketAddr)> for UdpBinding {
    type Error = TransportError;

    fn poll_ready(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.project().framed_socket.poll_ready(cx)
    }

    fn start_send(self: Pin<&mut Self>, item: (Bytes, SocketAddr)) -> Result<(), Self::Error> {
        self.project().framed_socket.start_send(item)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.project().framed_socket.poll_flush(cx)
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.project().framed_socket.poll_close(cx)
    }
}

/// Passes whole datagrams through untouched; parsing belongs to the engine.
#[derive(Debug, Default, Clone, Copy)]
struct DatagramCodec;

impl Decoder for DatagramCodec {
    type Item = Bytes;
    type Error = TransportError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Bytes>, TransportError> {
        if buf.is_empty() {
            return Ok(None);
        }
        Ok(Some(buf.split().freeze()))
    }
}

impl Encoder<Bytes> for DatagramCodec {
    type Error = TransportError;

    fn encode(&mut self, datagram: Bytes, buf: &mut BytesMut) -> Result<(), TransportError> {
        buf.extend_from_slice(&datagram);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use bytes::{Bytes, BytesMut};
    use tokio_util::codec::{Decoder, Encoder};

    use super::DatagramCodec;

    #[test]
    fn test_codec_passthrough() {
        let mut codec = DatagramCodec;
        let mut buf = BytesMut::new();
        assert_eq!(codec.decode(&mut buf).unwrap(), None);

        codec.encode(Bytes::from_static(b"\x40\x01\x00\x01"), &mut buf).unwrap();
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Bytes::from_static(b"\x40\x01\x00\x01"))
        );
        assert!(buf.is_empty());
    }
}
