use std::collections::VecDeque;
use std::fmt::Debug;
use std::hash::Hash;

use bytes::Bytes;
use coap_lite::MessageClass;
use futures::stream::Fuse;
use futures::{SinkExt, StreamExt};
use log::{debug, error, trace, warn};
use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::app::codec;
use crate::app::retransmission_manager::{RetransmissionManager, TransmissionParameters};
use crate::app::{CoapContext, MessageId, ResourceHandle};
use crate::transport::{
    BoxedFramedBinding, Completion, FramedItem, FramedReadError, Transmitter, Transport,
    TransportError,
};

/// Primary server API to bind a transport and run a [`CoapContext`] on it.
pub struct CoapServer<Endpoint> {
    binding: Fuse<BoxedFramedBinding<Endpoint>>,
    parameters: TransmissionParameters,
    notify_tx: UnboundedSender<ResourceHandle>,
    notify_rx: UnboundedReceiver<ResourceHandle>,
}

/// Cloneable handle for announcing out-of-band state changes to a running server, for example
/// from a task watching a button.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: UnboundedSender<ResourceHandle>,
}

impl Notifier {
    /// Asks the server to notify all observers of `resource` right away.  Returns false once the
    /// server has stopped.
    pub fn notify_change(&self, resource: ResourceHandle) -> bool {
        self.tx.send(resource).is_ok()
    }
}

impl<Endpoint: Debug + Send + Clone + Eq + Hash + 'static> CoapServer<Endpoint> {
    /// Bind the server to a specific source of incoming datagrams in a transport-agnostic way.
    /// Most customers will wish to use [`crate::udp::UdpTransport`].
    pub async fn bind<T: Transport<Endpoint = Endpoint>>(
        transport: T,
    ) -> Result<Self, TransportError> {
        let binding = transport.bind().await?;
        Ok(Self::from_binding(binding))
    }

    pub(crate) fn from_binding(binding: BoxedFramedBinding<Endpoint>) -> Self {
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        Self {
            binding: binding.fuse(),
            parameters: TransmissionParameters::default(),
            notify_tx,
            notify_rx,
        }
    }

    /// Override the confirmable retransmission policy used for notifications.
    pub fn with_transmission_parameters(mut self, parameters: TransmissionParameters) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn notifier(&self) -> Notifier {
        Notifier {
            tx: self.notify_tx.clone(),
        }
    }

    /// Run the server "forever".  Note that the function may return a fatal error if the server
    /// encounters unrecoverable issues, typically transport errors not related to a specific
    /// peer.  Nothing the context does while handling traffic can stop the loop.
    pub async fn serve(mut self, mut context: CoapContext<Endpoint>) -> Result<(), FatalServerError> {
        if let Some(mtu) = self.binding.get_ref().mtu() {
            context.limit_datagram_size(mtu as usize);
        }
        let mut outbox = ReliableOutbox::new(self.parameters);
        let mut ticker = time::interval(context.config().tick_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick of an interval completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                event = self.binding.select_next_some() => {
                    self.handle_rx_event(event, &mut context, &mut outbox)?;
                }
                _ = ticker.tick() => {
                    outbox.poll_expired(Instant::now());
                    context.tick(&mut outbox);
                }
                Some(resource) = self.notify_rx.recv() => {
                    context.process_completions(&mut outbox);
                    context.notify_now(resource, &mut outbox);
                }
            }
            self.flush(&mut outbox).await?;
        }
    }

    fn handle_rx_event(
        &self,
        result: Result<FramedItem<Endpoint>, FramedReadError<Endpoint>>,
        context: &mut CoapContext<Endpoint>,
        outbox: &mut ReliableOutbox<Endpoint>,
    ) -> Result<(), FatalServerError> {
        match result {
            Ok((datagram, peer)) => {
                trace!("Incoming datagram from {peer:?}: {} bytes", datagram.len());
                if !outbox.intercept_reply(&datagram, &peer) {
                    context.handle_datagram(&datagram, peer, outbox);
                }
                context.process_completions(outbox);
            }
            Err((transport_err, peer)) => {
                warn!("Error from {peer:?}: {transport_err}");
                if peer.is_none() && transport_err.is_fatal() {
                    return Err(transport_err.into());
                }
            }
        }
        Ok(())
    }

    async fn flush(&mut self, outbox: &mut ReliableOutbox<Endpoint>) -> Result<(), FatalServerError> {
        while let Some((datagram, peer)) = outbox.outgoing.pop_front() {
            trace!("Outgoing datagram to {peer:?}: {} bytes", datagram.len());
            if let Err(e) = self.binding.send((datagram, peer.clone())).await {
                if e.is_fatal() {
                    return Err(e.into());
                }
                error!("Error sending to {peer:?}: {e}");
            }
        }
        Ok(())
    }
}

/// [`Transmitter`] handed to the context: queues datagrams for the next flush and tracks
/// confirmable ones until they are acknowledged or given up on.
struct ReliableOutbox<Endpoint: Debug + Clone + Eq + Hash> {
    manager: RetransmissionManager<Endpoint>,
    outgoing: VecDeque<FramedItem<Endpoint>>,
    completions: VecDeque<Completion<Endpoint>>,
}

impl<Endpoint: Debug + Clone + Eq + Hash> ReliableOutbox<Endpoint> {
    fn new(parameters: TransmissionParameters) -> Self {
        Self {
            manager: RetransmissionManager::new(parameters),
            outgoing: VecDeque::new(),
            completions: VecDeque::new(),
        }
    }

    /// Claims empty ACK/RST messages answering one of our confirmable notifications.
    fn intercept_reply(&mut self, datagram: &[u8], peer: &Endpoint) -> bool {
        let header = match codec::peek_header(datagram) {
            Ok(header) if matches!(header.code, MessageClass::Empty) => header,
            _ => return false,
        };
        match self
            .manager
            .maybe_handle_reply(header.msg_type, header.message_id, peer)
        {
            Some(completion) => {
                debug!(
                    "{:?} for message ID {} from {peer:?}",
                    completion.outcome, completion.message_id
                );
                self.completions.push_back(completion);
                true
            }
            None => false,
        }
    }

    fn poll_expired(&mut self, now: Instant) {
        let expired = self.manager.poll_expired(now);
        self.outgoing.extend(expired.retransmit);
        self.completions.extend(expired.completions);
    }
}

impl<Endpoint: Debug + Clone + Eq + Hash> Transmitter<Endpoint> for ReliableOutbox<Endpoint> {
    fn send(&mut self, peer: &Endpoint, datagram: Bytes) -> Result<(), TransportError> {
        self.outgoing.push_back((datagram, peer.clone()));
        Ok(())
    }

    fn send_confirmable(
        &mut self,
        peer: &Endpoint,
        datagram: Bytes,
        message_id: MessageId,
    ) -> Result<(), TransportError> {
        self.manager
            .send_reliably(datagram.clone(), peer.clone(), message_id, Instant::now());
        self.outgoing.push_back((datagram, peer.clone()));
        Ok(())
    }

    fn poll_completion(&mut self) -> Option<Completion<Endpoint>> {
        self.completions.pop_front()
    }
}

/// Fatal error preventing the server from continuing.
#[derive(Error, Debug)]
pub enum FatalServerError {
    /// Transport error that is not related to any individual peer but would prevent any future
    /// packet exchanges on the transport.  Must abort the server.
    #[error("fatal transport error: {0}")]
    Transport(#[from] TransportError),
}

#[cfg(test)]
mod tests {
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use std::time::Duration;

    use bytes::Bytes;
    use coap_lite::{CoapOption, MessageType, RequestType};
    use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
    use futures::{Sink, Stream, StreamExt};
    use tokio::task::JoinHandle;

    use super::*;
    use crate::app::codec;
    use crate::app::test_util::{led_context, request, TestEndpoint};
    use crate::app::Message;
    use crate::transport::FramedBinding;

    const PEER: TestEndpoint = TestEndpoint(7);

    /// In-memory binding: the test writes inbound datagrams to one channel and reads the
    /// server's output from the other.
    struct ChannelBinding {
        inbound: UnboundedReceiver<FramedItem<TestEndpoint>>,
        outbound: UnboundedSender<FramedItem<TestEndpoint>>,
    }

    impl FramedBinding<TestEndpoint> for ChannelBinding {
        fn mtu(&self) -> Option<u32> {
            None
        }
    }

    impl Stream for ChannelBinding {
        type Item = Result<FramedItem<TestEndpoint>, FramedReadError<TestEndpoint>>;

        fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            self.inbound.poll_next_unpin(cx).map(|item| item.map(Ok))
        }
    }

    impl Sink<FramedItem<TestEndpoint>> for ChannelBinding {
        type Error = TransportError;

        fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn start_send(self: Pin<&mut Self>, item: FramedItem<TestEndpoint>) -> Result<(), Self::Error> {
            self.outbound
                .unbounded_send(item)
                .map_err(|e| TransportError::Unspecified(e.to_string()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }
    }

    struct Harness {
        inbound: UnboundedSender<FramedItem<TestEndpoint>>,
        outbound: UnboundedReceiver<FramedItem<TestEndpoint>>,
        notifier: Notifier,
        led3: ResourceHandle,
        _server: JoinHandle<Result<(), FatalServerError>>,
    }

    impl Harness {
        fn start(parameters: TransmissionParameters) -> Self {
            let _ = env_logger::builder().is_test(true).try_init();
            let (inbound_tx, inbound_rx) = unbounded();
            let (outbound_tx, outbound_rx) = unbounded();
            let binding = ChannelBinding {
                inbound: inbound_rx,
                outbound: outbound_tx,
            };
            let server =
                CoapServer::from_binding(Box::pin(binding)).with_transmission_parameters(parameters);
            let notifier = server.notifier();
            let (context, led3, _) = led_context(4);
            Self {
                inbound: inbound_tx,
                outbound: outbound_rx,
                notifier,
                led3,
                _server: tokio::spawn(server.serve(context)),
            }
        }

        fn send(&self, message: &Message) {
            let datagram = codec::encode(message, 1152).unwrap();
            self.inbound.unbounded_send((datagram, PEER)).unwrap();
        }

        async fn next(&mut self) -> Message {
            let (datagram, peer) = self.outbound.next().await.unwrap();
            assert_eq!(peer, PEER);
            codec::decode(&datagram).unwrap()
        }
    }

    fn observe_request() -> Message {
        let mut message = request(MessageType::Confirmable, RequestType::Get, "lights/led3", 1);
        message.set_uint_option(CoapOption::Observe, 0);
        message
    }

    #[tokio::test(start_paused = true)]
    async fn test_observe_over_binding() {
        let mut harness = Harness::start(TransmissionParameters::default());
        harness.send(&observe_request());
        let registered = harness.next().await;
        assert_eq!(registered.msg_type, MessageType::Acknowledgement);
        assert!(registered.observe().is_some());

        assert!(harness.notifier.notify_change(harness.led3));
        let notification = harness.next().await;
        assert_eq!(notification.msg_type, MessageType::NonConfirmable);
        assert_eq!(notification.token.as_slice(), &[1]);
        assert!(notification.observe().is_some());
        assert_ne!(notification.observe(), registered.observe());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unacknowledged_notification_cancels_observer() {
        let parameters = TransmissionParameters::new(Duration::from_secs(2), 1.0, 1).unwrap();
        let mut harness = Harness::start(parameters);
        harness.send(&observe_request());
        harness.next().await;

        // The first scheduled pass is confirmable: Max-Age 15 with the default low-water mark
        // fires on the 13th tick.
        let notification = harness.next().await;
        assert_eq!(notification.msg_type, MessageType::Confirmable);

        // One retransmission, then the observer is dropped and later passes stay silent.
        let retransmission = harness.next().await;
        assert_eq!(retransmission.message_id, notification.message_id);
        time::sleep(Duration::from_secs(10)).await;

        harness.notifier.notify_change(harness.led3);
        time::sleep(Duration::from_secs(30)).await;
        assert!(harness.outbound.try_next().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_acknowledged_notification_keeps_observer() {
        let mut harness = Harness::start(TransmissionParameters::default());
        harness.send(&observe_request());
        harness.next().await;

        let notification = harness.next().await;
        assert_eq!(notification.msg_type, MessageType::Confirmable);
        harness.send(&Message::empty(
            MessageType::Acknowledgement,
            notification.message_id,
        ));

        harness.notifier.notify_change(harness.led3);
        let next = harness.next().await;
        assert_eq!(next.msg_type, MessageType::NonConfirmable);
        assert_ne!(next.observe(), notification.observe());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ping() {
        let mut harness = Harness::start(TransmissionParameters::default());
        harness.send(&Message::empty(MessageType::Confirmable, 0x77));
        let pong = harness.next().await;
        assert_eq!(pong.msg_type, MessageType::Reset);
        assert_eq!(pong.message_id, 0x77);
    }

    #[test]
    fn test_outbox_claims_only_known_replies() {
        let mut outbox = ReliableOutbox::<TestEndpoint>::new(TransmissionParameters::default());
        outbox
            .send_confirmable(&PEER, Bytes::from_static(b"con"), 5)
            .unwrap();
        assert_eq!(outbox.outgoing.len(), 1);

        let stranger = codec::encode(&Message::empty(MessageType::Acknowledgement, 6), 16).unwrap();
        assert!(!outbox.intercept_reply(&stranger, &PEER));

        let reset = codec::encode(&Message::empty(MessageType::Reset, 5), 16).unwrap();
        assert!(outbox.intercept_reply(&reset, &PEER));
        let completion = outbox.poll_completion().unwrap();
        assert_eq!(completion.message_id, 5);
        assert_eq!(
            completion.outcome,
            crate::transport::TransmissionOutcome::ResetByPeer
        );
        assert!(outbox.poll_completion().is_none());
    }
}
