//! Shared helpers

pub mod net;
pub mod throttle;

pub use net::{bind_tcp_listener, bind_udp_receiver};
pub use throttle::LogThrottler;
