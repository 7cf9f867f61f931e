//! Addresses, packet codecs, interfaces, address resolution and raw-socket I/O.

pub mod addr;
pub mod interface;
pub mod packet;
pub mod protocols;
pub mod resolver;
pub mod socket;
