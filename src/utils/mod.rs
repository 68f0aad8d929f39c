//! Small utilities shared across modules: socket binding and log throttling.

pub mod net;
pub mod throttle;

pub use net::{bind_tcp_listener, bind_udp_socket};
pub use throttle::LogThrottler;
