//! CoAP (RFC 7252) server built around a resource tree whose resources can be observed
//! (RFC 7641).
//!
//! [`app::CoapContext`] is the single-threaded engine: it decodes datagrams, serves requests,
//! keeps the observer registry and schedules notifications.  [`CoapServer`] runs it on tokio
//! over any [`transport::Transport`], usually [`UdpTransport`].

pub use server::{CoapServer, FatalServerError, Notifier};
pub use udp::UdpTransport;

pub mod app;
pub mod server;
pub mod transport;
pub mod udp;
