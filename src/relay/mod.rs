//! Cross-context session relay.
//!
//! Three participants, one protocol:
//!
//! - **Background Relay** ([`background`]): owns the sole live backend
//!   connection, persists every auth change, answers peer requests.
//! - **Peer Messaging Client** ([`peer`]): best-effort bridge for
//!   contexts without their own backend connection.
//! - **Message bus** ([`bus`]): the request/response + broadcast
//!   transport between them.
//!
//! Wire shapes live in [`protocol`].

pub mod background;
pub mod bus;
pub mod peer;
pub mod protocol;

pub use background::{start, RelayHandle};
pub use bus::{message_bus, BusListener, MessageBus, SendOutcome, UpdateBroadcast, DEFAULT_BUS_CAPACITY};
pub use peer::{PeerClient, SessionUpdates};
pub use protocol::{RelayRequest, RelayResponse, SessionUpdate};
