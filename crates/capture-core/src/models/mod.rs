mod counters;
mod flow_key;
mod packet;

pub use counters::{CounterKey, PacketCounter, PortCounterRow, TopNEntry};
pub use flow_key::{Direction, FlowKey};
pub use packet::{DecodeError, LinkType, Packet, TcpFlagsSet, TransportHeader};
