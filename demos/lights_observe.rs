use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use coap_lite::link_format::LINK_ATTR_RESOURCE_TYPE;
use log::info;
use tokio::time;

use coap_observe_server::app::{
    self, CoapError, ContentType, Permissions, ResourceEvent, ResourceHandler, ResourceReply,
    ResourceTree,
};
use coap_observe_server::{CoapServer, UdpTransport};

const COMMAND_OFF: u8 = b'0';
const COMMAND_ON: u8 = b'1';
const COMMAND_TOGGLE: u8 = b'2';

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let led = Led::default();
    let state = led.on.clone();

    let mut tree = ResourceTree::<SocketAddr>::new();
    let lights = tree.create(app::resource("lights"));
    // Try `coap-client -s 60 -m get coap://localhost/lights/led3`, then in parallel
    // `coap-client -m put -e 2 coap://localhost/lights/led3` to toggle it.
    let led3 = tree.create(
        app::resource("led3")
            .permissions(Permissions::GET | Permissions::PUT)
            .observable()
            .content_types(ContentType::Json | ContentType::TextPlain)
            .max_age(15)
            .link_attr(LINK_ATTR_RESOURCE_TYPE, "light")
            .handler(led),
    );
    let root = tree.root();
    tree.add_child(root, lights)?;
    tree.add_child(lights, led3)?;
    let context = app::new().build(tree)?;

    let server = CoapServer::bind(UdpTransport::new("[::]:5683")).await?;

    // Stand-in for a physical push button on the board.
    let notifier = server.notifier();
    tokio::spawn(async move {
        let mut presses = time::interval(Duration::from_secs(20));
        presses.tick().await;
        loop {
            presses.tick().await;
            let on = !state.fetch_xor(true, Ordering::SeqCst);
            info!("Button pressed, led3 is now {}", if on { "on" } else { "off" });
            if !notifier.notify_change(led3) {
                return;
            }
        }
    });

    server.serve(context).await?;
    Ok(())
}

#[derive(Default)]
struct Led {
    on: Arc<AtomicBool>,
}

impl ResourceHandler<SocketAddr> for Led {
    fn on_event(&mut self, event: ResourceEvent<'_, SocketAddr>) -> Result<ResourceReply, CoapError> {
        match event {
            ResourceEvent::Read { content_type, .. } => {
                let on = self.on.load(Ordering::SeqCst);
                let payload = match content_type {
                    ContentType::Json => format!("{{\"led3\": {on}}}"),
                    _ => String::from(if on { "1" } else { "0" }),
                };
                Ok(ResourceReply::Content(payload.into_bytes()))
            }
            ResourceEvent::Write { payload, peer, .. } => {
                match payload {
                    [COMMAND_OFF] => self.on.store(false, Ordering::SeqCst),
                    [COMMAND_ON] => self.on.store(true, Ordering::SeqCst),
                    [COMMAND_TOGGLE] => {
                        self.on.fetch_xor(true, Ordering::SeqCst);
                    }
                    _ => return Err(CoapError::bad_request("Expected 0, 1 or 2")),
                }
                info!("{peer} switched led3 {}", if self.on.load(Ordering::SeqCst) { "on" } else { "off" });
                Ok(ResourceReply::Changed { notify: true })
            }
            ResourceEvent::NotificationCompleted { peer, outcome } => {
                info!("Notification to {peer}: {outcome:?}");
                Ok(ResourceReply::Done)
            }
        }
    }
}
