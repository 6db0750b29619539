//! Device session: serial transport, protocol client and clock sync

pub mod protocol;
pub mod timesync;
pub mod transport;

pub use protocol::{DeviceTime, GmcClient};
pub use timesync::TimeSync;
pub use transport::{SerialTransport, SerialTransportConfig, Transport};
