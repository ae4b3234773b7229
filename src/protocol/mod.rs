//! Native wire protocol.
//!
//! This module holds everything that is specific to the packet level of the native TCP
//! protocol: packet codes, the protocol revisions that gate optional fields, the client packets
//! we send ([`request`]), the server packets we decode ([`response`]) and the transport the
//! bytes travel over ([`transport`]).
//!
//! # Packets
//!
//! Every packet starts with a single type byte followed by a packet specific body. Type bytes
//! are assigned independently for each direction, see [`client`] and [`server`].
//!
//! # Revisions
//!
//! During the handshake both sides announce a protocol revision and the lower one wins. Many
//! fields only exist from a given revision on; the `DBMS_*` constants below name those gates.
//! The working revision of a connection never increases once negotiated.
//!
//! # Compression
//!
//! Only block payloads are compressed: the packet type byte and the temporary table name that
//! precede a block always travel uncompressed, as do exceptions, progress and control packets.
//!
//! # See Also
//!
//! - [`block`](crate::block): columnar block layout carried by data packets.
//! - [`compress`](crate::compress): frame format used when compression is enabled.
pub mod request;
pub mod response;
pub(crate) mod thread;
pub mod transport;

#[cfg(feature = "tls")]
pub(crate) mod tls;

pub use transport::{Socket, Stream, Transport};

/// Revision announced by this client.
pub const CLIENT_REVISION: u64 = 54460;
pub const CLIENT_VERSION_MAJOR: u64 = 0;
pub const CLIENT_VERSION_MINOR: u64 = 1;
pub const CLIENT_VERSION_PATCH: u64 = 0;

/// Servers older than this cannot decode the client info section of a query.
pub const DBMS_MIN_REVISION_WITH_CLIENT_INFO: u64 = 54032;
pub const DBMS_MIN_REVISION_WITH_SERVER_TIMEZONE: u64 = 54058;
pub const DBMS_MIN_REVISION_WITH_QUOTA_KEY_IN_CLIENT_INFO: u64 = 54060;
pub const DBMS_MIN_REVISION_WITH_SERVER_DISPLAY_NAME: u64 = 54372;
pub const DBMS_MIN_REVISION_WITH_VERSION_PATCH: u64 = 54401;
pub const DBMS_MIN_REVISION_WITH_CLIENT_WRITE_INFO: u64 = 54420;
pub const DBMS_MIN_REVISION_WITH_SETTINGS_SERIALIZED_AS_STRINGS: u64 = 54429;
pub const DBMS_MIN_REVISION_WITH_INTERSERVER_SECRET: u64 = 54441;
pub const DBMS_MIN_REVISION_WITH_OPENTELEMETRY: u64 = 54442;
pub const DBMS_MIN_PROTOCOL_VERSION_WITH_DISTRIBUTED_DEPTH: u64 = 54448;
pub const DBMS_MIN_PROTOCOL_VERSION_WITH_INITIAL_QUERY_START_TIME: u64 = 54449;
pub const DBMS_MIN_REVISION_WITH_PARALLEL_REPLICAS: u64 = 54453;
pub const DBMS_MIN_REVISION_WITH_CUSTOM_SERIALIZATION: u64 = 54454;
pub const DBMS_MIN_PROTOCOL_VERSION_WITH_ADDENDUM: u64 = 54458;
pub const DBMS_MIN_PROTOCOL_VERSION_WITH_PARAMETERS: u64 = 54459;
pub const DBMS_MIN_PROTOCOL_VERSION_WITH_SERVER_QUERY_TIME_IN_PROGRESS: u64 = 54460;

/// Packet types sent by the client.
pub mod client {
    pub const HELLO: u8 = 0;
    pub const QUERY: u8 = 1;
    pub const DATA: u8 = 2;
    pub const CANCEL: u8 = 3;
    pub const PING: u8 = 4;
}

/// Packet types sent by the server.
pub mod server {
    pub const HELLO: u8 = 0;
    pub const DATA: u8 = 1;
    pub const EXCEPTION: u8 = 2;
    pub const PROGRESS: u8 = 3;
    pub const PONG: u8 = 4;
    pub const END_OF_STREAM: u8 = 5;
    pub const PROFILE_INFO: u8 = 6;
    pub const TOTALS: u8 = 7;
    pub const EXTREMES: u8 = 8;
    pub const TABLES_STATUS: u8 = 9;
    pub const LOG: u8 = 10;
    pub const TABLE_COLUMNS: u8 = 11;
    pub const PART_UUIDS: u8 = 12;
    pub const READ_TASK_REQUEST: u8 = 13;
    pub const PROFILE_EVENTS: u8 = 14;

    pub fn name(packet: u8) -> &'static str {
        match packet {
            HELLO => "hello",
            DATA => "data",
            EXCEPTION => "exception",
            PROGRESS => "progress",
            PONG => "pong",
            END_OF_STREAM => "end of stream",
            PROFILE_INFO => "profile info",
            TOTALS => "totals",
            EXTREMES => "extremes",
            TABLES_STATUS => "tables status",
            LOG => "log",
            TABLE_COLUMNS => "table columns",
            PART_UUIDS => "part uuids",
            READ_TASK_REQUEST => "read task request",
            PROFILE_EVENTS => "profile events",
            _ => "unknown",
        }
    }
}

/// Query processing stage requested from the server.
pub(crate) const STAGE_COMPLETE: u64 = 2;

/// Query kind inside the client info section.
pub(crate) const QUERY_KIND_INITIAL: u8 = 1;

/// Interface inside the client info section.
pub(crate) const INTERFACE_TCP: u8 = 1;
