//! Wire format of the disguised session: constants and record layouts.

// Record layer:
// ```text
// | content_type | version | length | payload  |
// |      1B      |    2B   |   2B   | variable |
// |          <- header ->           | <- body ->|
// ```
pub(crate) const RECORD_HDR_LEN: usize = 1 + 2 + 2; // 5
pub(crate) const RECORD_PAYLOAD_MAX_LEN: usize = 16384 + 2048;

pub(crate) const CHANGE_CIPHER_SPEC: u8 = 0x14;
pub(crate) const HANDSHAKE: u8 = 0x16;
pub(crate) const APPLICATION_DATA: u8 = 0x17;

pub(crate) const TLS10: [u8; 2] = [0x03, 0x01];
pub(crate) const TLS12: [u8; 2] = [0x03, 0x03];

// ClientHello body (inside a handshake record):
// ```text
// | msg_type | len | version | random | sid_len | session_id | suites | comp | exts |
// |    1B    | 3B  |    2B   |  32B   |    1B   |    32B     |   var  |  2B  | var  |
//
// random:
// | nonce | auth |
// |  16B  |  16B |
//
// session_ticket extension body:
// | nonce |            sealed            | tag |
// |  12B  | opaque 32B | window 8B | pad |  16B |
// ```
pub(crate) const CLIENT_HELLO: u8 = 0x01;
pub(crate) const RANDOM_LEN: usize = 32;
pub(crate) const RANDOM_NONCE_LEN: usize = 16;
pub(crate) const SESSION_ID_LEN: usize = 32;
pub(crate) const TICKET_LEN: usize = 192;
pub(crate) const TICKET_NONCE_LEN: usize = 12;
pub(crate) const TICKET_TAG_LEN: usize = 16;
pub(crate) const TICKET_PLAINTEXT_LEN: usize = TICKET_LEN - TICKET_NONCE_LEN - TICKET_TAG_LEN;

// Client reply after the server's disguise response:
// ```text
// | ChangeCipherSpec record | handshake record carrying a disguised Finished |
// |     14 03 03 00 01 01   |          16 03 03 00 28 | 40 random bytes      |
// ```
pub(crate) const FINISHED_LEN: usize = 40;

/// Granularity of the time window mixed into the ClientHello random field.
pub(crate) const RANDOM_WINDOW_SECS: u64 = 12 * 60 * 60;

/// Longest server name the ClientHello carries, as a DNS name.
pub(crate) const SERVER_NAME_MAX_LEN: usize = 255;

/// Default lifetime of one session ticket, in seconds.
pub(crate) const DEFAULT_TICKET_TIME_HINT_SECS: u64 = 3600;

/// Number of immediate attempts made to reach the remote server.
pub const DIAL_ATTEMPTS: usize = 3;

/// Size of the single read that consumes the server's disguise response.
pub const HANDSHAKE_DISCARD_LEN: usize = 500;

/// Largest chunk read from the local socket per upstream record.
pub const RELAY_BUF_LEN: usize = 1500;
