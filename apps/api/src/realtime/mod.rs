// Real-time layer: authenticated WebSocket connections, room membership, and
// fire-and-forget event fan-out. Disconnected users miss events and re-fetch over REST.

pub mod events;
pub mod fanout;
pub mod registry;
pub mod socket;
