//! The `transport` module is responsible for the MQTT wire format spoken
//! between beacons, clients and the broker.
//!
//! `codec` handles framing (fixed header and remaining length) over any async
//! byte stream; `packet` gives the framed bodies their MQTT meaning.

pub mod codec;
pub mod packet;

pub use codec::{MAX_REMAINING_LENGTH, RawPacket, read_packet};
pub use packet::{Packet, encode_publish};

#[cfg(test)]
mod tests;
