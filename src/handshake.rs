//! Disguised handshake messages.
//!
//! The client opens every session with a ClientHello that matches what a
//! browser would send, except that two fields carry keyed material: the
//! random field authenticates the client to the server, and the session
//! ticket carries the sealed opaque token. After the server's disguise
//! response the client answers with a ChangeCipherSpec and a Finished-sized
//! blob, which completes the picture of a resumed TLS 1.2 session.

use rand::RngCore;

use crate::{
    codec::add_record_layer,
    config::Browser,
    crypto::random_field,
    specification::{
        CHANGE_CIPHER_SPEC, CLIENT_HELLO, FINISHED_LEN, HANDSHAKE, RANDOM_NONCE_LEN,
        RANDOM_WINDOW_SECS, SESSION_ID_LEN, TICKET_LEN, TLS10, TLS12,
    },
    state::SessionState,
};

const EXT_SERVER_NAME: u16 = 0x0000;
const EXT_STATUS_REQUEST: u16 = 0x0005;
const EXT_SUPPORTED_GROUPS: u16 = 0x000a;
const EXT_EC_POINT_FORMATS: u16 = 0x000b;
const EXT_SIGNATURE_ALGORITHMS: u16 = 0x000d;
const EXT_ALPN: u16 = 0x0010;
const EXT_SIGNED_CERTIFICATE_TIMESTAMP: u16 = 0x0012;
const EXT_EXTENDED_MASTER_SECRET: u16 = 0x0017;
const EXT_SESSION_TICKET: u16 = 0x0023;
const EXT_RENEGOTIATION_INFO: u16 = 0xff01;

const ALPN_PROTOCOLS: &[&[u8]] = &[b"h2", b"http/1.1"];

/// Cipher suites, groups and extension order of one browser.
#[derive(Debug)]
struct Fingerprint {
    cipher_suites: &'static [u16],
    groups: &'static [u16],
    signature_algorithms: &'static [u16],
    extensions: &'static [u16],
}

static CHROME: Fingerprint = Fingerprint {
    cipher_suites: &[
        0xc02b, 0xc02f, 0xc02c, 0xc030, 0xcca9, 0xcca8, 0xc013, 0xc014, 0x009c, 0x009d, 0x002f,
        0x0035, 0x000a,
    ],
    groups: &[0x001d, 0x0017, 0x0018],
    signature_algorithms: &[
        0x0403, 0x0804, 0x0401, 0x0503, 0x0805, 0x0501, 0x0806, 0x0601, 0x0201,
    ],
    extensions: &[
        EXT_SERVER_NAME,
        EXT_EXTENDED_MASTER_SECRET,
        EXT_RENEGOTIATION_INFO,
        EXT_SUPPORTED_GROUPS,
        EXT_EC_POINT_FORMATS,
        EXT_SESSION_TICKET,
        EXT_ALPN,
        EXT_STATUS_REQUEST,
        EXT_SIGNATURE_ALGORITHMS,
        EXT_SIGNED_CERTIFICATE_TIMESTAMP,
    ],
};

static FIREFOX: Fingerprint = Fingerprint {
    cipher_suites: &[
        0xc02b, 0xc02f, 0xcca9, 0xcca8, 0xc02c, 0xc030, 0xc00a, 0xc009, 0xc013, 0xc014, 0x0033,
        0x0039, 0x002f, 0x0035, 0x000a,
    ],
    groups: &[0x001d, 0x0017, 0x0018, 0x0019],
    signature_algorithms: &[
        0x0403, 0x0503, 0x0603, 0x0804, 0x0805, 0x0806, 0x0401, 0x0501, 0x0601, 0x0203, 0x0201,
    ],
    extensions: &[
        EXT_SERVER_NAME,
        EXT_EXTENDED_MASTER_SECRET,
        EXT_RENEGOTIATION_INFO,
        EXT_SUPPORTED_GROUPS,
        EXT_EC_POINT_FORMATS,
        EXT_SESSION_TICKET,
        EXT_ALPN,
        EXT_STATUS_REQUEST,
        EXT_SIGNATURE_ALGORITHMS,
    ],
};

impl Fingerprint {
    fn of(browser: Browser) -> &'static Fingerprint {
        match browser {
            Browser::Chrome => &CHROME,
            Browser::Firefox => &FIREFOX,
        }
    }

    fn put_extensions(&self, buf: &mut Vec<u8>, server_name: &str, ticket: &[u8; TICKET_LEN]) {
        let start = buf.len();
        buf.extend_from_slice(&[0, 0]);
        for &ext in self.extensions {
            let mut data = Vec::new();
            match ext {
                EXT_SERVER_NAME => {
                    let name = server_name.as_bytes();
                    data.extend_from_slice(&(name.len() as u16 + 3).to_be_bytes());
                    data.push(0x00); // host_name
                    data.extend_from_slice(&(name.len() as u16).to_be_bytes());
                    data.extend_from_slice(name);
                }
                EXT_RENEGOTIATION_INFO => data.push(0x00),
                EXT_SUPPORTED_GROUPS => put_u16_list(&mut data, self.groups),
                EXT_EC_POINT_FORMATS => data.extend_from_slice(&[0x01, 0x00]),
                EXT_SESSION_TICKET => data.extend_from_slice(ticket),
                EXT_ALPN => {
                    let len: usize = ALPN_PROTOCOLS.iter().map(|p| p.len() + 1).sum();
                    data.extend_from_slice(&(len as u16).to_be_bytes());
                    for protocol in ALPN_PROTOCOLS {
                        data.push(protocol.len() as u8);
                        data.extend_from_slice(protocol);
                    }
                }
                EXT_STATUS_REQUEST => data.extend_from_slice(&[0x01, 0x00, 0x00, 0x00, 0x00]),
                EXT_SIGNATURE_ALGORITHMS => put_u16_list(&mut data, self.signature_algorithms),
                // extended_master_secret, signed_certificate_timestamp
                _ => {}
            }
            buf.extend_from_slice(&ext.to_be_bytes());
            buf.extend_from_slice(&(data.len() as u16).to_be_bytes());
            buf.extend_from_slice(&data);
        }
        let len = (buf.len() - start - 2) as u16;
        buf[start..start + 2].copy_from_slice(&len.to_be_bytes());
    }
}

fn put_u16_list(buf: &mut Vec<u8>, values: &[u16]) {
    buf.extend_from_slice(&((values.len() * 2) as u16).to_be_bytes());
    for value in values {
        buf.extend_from_slice(&value.to_be_bytes());
    }
}

/// Composes the disguised ClientHello, wrapped in one handshake record.
///
/// `rng` supplies the random-field nonce and the session id; everything else
/// is derived from `state`.
pub fn compose_client_hello<R: RngCore>(state: &SessionState, rng: &mut R) -> Vec<u8> {
    let config = state.config();
    let now = state.unix_time();

    let mut nonce = [0u8; RANDOM_NONCE_LEN];
    rng.fill_bytes(&mut nonce);
    let random = random_field(&config.shared_key, now / RANDOM_WINDOW_SECS, nonce);
    let ticket = state
        .ticket_cipher()
        .seal(state.opaque(), now / config.ticket_time_hint.as_secs());
    let mut session_id = [0u8; SESSION_ID_LEN];
    rng.fill_bytes(&mut session_id);

    let fingerprint = Fingerprint::of(config.browser);
    let mut hello = Vec::with_capacity(512);
    hello.extend_from_slice(&TLS12);
    hello.extend_from_slice(&random);
    hello.push(SESSION_ID_LEN as u8);
    hello.extend_from_slice(&session_id);
    put_u16_list(&mut hello, fingerprint.cipher_suites);
    hello.extend_from_slice(&[0x01, 0x00]); // null compression only
    fingerprint.put_extensions(&mut hello, &config.server_name, &ticket);

    let mut handshake = Vec::with_capacity(4 + hello.len());
    handshake.push(CLIENT_HELLO);
    handshake.extend_from_slice(&(hello.len() as u32).to_be_bytes()[1..]);
    handshake.extend_from_slice(&hello);
    add_record_layer(&handshake, HANDSHAKE, TLS10)
}

/// Composes the client's answer to the server's disguise response: a
/// ChangeCipherSpec record followed by a handshake record that looks like
/// an encrypted Finished message.
pub fn compose_reply<R: RngCore>(rng: &mut R) -> Vec<u8> {
    let mut finished = [0u8; FINISHED_LEN];
    rng.fill_bytes(&mut finished);

    let mut reply = add_record_layer(&[0x01], CHANGE_CIPHER_SPEC, TLS12);
    reply.extend_from_slice(&add_record_layer(&finished, HANDSHAKE, TLS12));
    reply
}

#[cfg(test)]
mod test {
    use std::{
        collections::HashMap,
        time::{Duration, UNIX_EPOCH},
    };

    use rand::{SeedableRng, rngs::StdRng};

    use super::*;
    use crate::{
        codec::peel_record_layer,
        config::{Config, Endpoint},
        crypto::Opaque,
        specification::{RANDOM_LEN, RECORD_HDR_LEN},
    };

    const NOW: u64 = 1_700_000_000;

    fn state(browser: Browser) -> SessionState {
        let config = Config::builder(Endpoint::new("127.0.0.1", 0), Endpoint::new("127.0.0.1", 443))
            .with_password("handshake test")
            .with_server_name("www.example.com")
            .with_browser(browser)
            .build();
        SessionState::with_opaque_and_clock(config, Opaque::from_be_bytes([7u8; 32]), || {
            UNIX_EPOCH + Duration::from_secs(NOW)
        })
    }

    #[derive(Debug)]
    struct ParsedHello {
        random: [u8; RANDOM_LEN],
        cipher_suites: Vec<u16>,
        extension_order: Vec<u16>,
        extensions: HashMap<u16, Vec<u8>>,
    }

    fn take<'a>(buf: &mut &'a [u8], n: usize) -> &'a [u8] {
        let (head, tail) = buf.split_at(n);
        *buf = tail;
        head
    }

    fn take_u16(buf: &mut &[u8]) -> usize {
        let b = take(buf, 2);
        u16::from_be_bytes([b[0], b[1]]) as usize
    }

    fn parse_hello(record: &[u8]) -> ParsedHello {
        assert_eq!(&record[..3], &[HANDSHAKE, TLS10[0], TLS10[1]]);
        let mut buf = peel_record_layer(record).unwrap();

        assert_eq!(take(&mut buf, 1), &[CLIENT_HELLO]);
        let len = take(&mut buf, 3);
        assert_eq!(
            u32::from_be_bytes([0, len[0], len[1], len[2]]) as usize,
            buf.len()
        );
        assert_eq!(take(&mut buf, 2), &TLS12);
        let random: [u8; RANDOM_LEN] = take(&mut buf, RANDOM_LEN).try_into().unwrap();
        assert_eq!(take(&mut buf, 1), &[SESSION_ID_LEN as u8]);
        take(&mut buf, SESSION_ID_LEN);

        let suites_len = take_u16(&mut buf);
        let cipher_suites = take(&mut buf, suites_len)
            .chunks(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect();
        assert_eq!(take(&mut buf, 2), &[0x01, 0x00]);

        let ext_len = take_u16(&mut buf);
        assert_eq!(ext_len, buf.len());
        let mut extension_order = Vec::new();
        let mut extensions = HashMap::new();
        while !buf.is_empty() {
            let ty = take_u16(&mut buf) as u16;
            let len = take_u16(&mut buf);
            extension_order.push(ty);
            extensions.insert(ty, take(&mut buf, len).to_vec());
        }
        ParsedHello {
            random,
            cipher_suites,
            extension_order,
            extensions,
        }
    }

    #[test]
    fn test_client_hello_structure() {
        let state = state(Browser::Chrome);
        let record = compose_client_hello(&state, &mut StdRng::from_seed([0u8; 32]));
        let hello = parse_hello(&record);

        assert_eq!(hello.cipher_suites, CHROME.cipher_suites);
        assert_eq!(hello.extension_order, CHROME.extensions);

        let sni = &hello.extensions[&EXT_SERVER_NAME];
        assert_eq!(&sni[5..], b"www.example.com");
        assert_eq!(u16::from_be_bytes([sni[3], sni[4]]), 15);

        assert_eq!(hello.extensions[&EXT_EC_POINT_FORMATS], vec![0x01, 0x00]);
        assert_eq!(
            hello.extensions[&EXT_ALPN],
            b"\x00\x0c\x02h2\x08http/1.1".to_vec()
        );
        assert!(hello.extensions[&EXT_EXTENDED_MASTER_SECRET].is_empty());
    }

    #[test]
    fn test_client_hello_keyed_fields() {
        let state = state(Browser::Chrome);
        let record = compose_client_hello(&state, &mut StdRng::from_seed([1u8; 32]));
        let hello = parse_hello(&record);

        let nonce: [u8; RANDOM_NONCE_LEN] = hello.random[..RANDOM_NONCE_LEN].try_into().unwrap();
        assert_eq!(
            hello.random,
            random_field(&state.config().shared_key, NOW / RANDOM_WINDOW_SECS, nonce)
        );

        let window = NOW / state.config().ticket_time_hint().as_secs();
        assert_eq!(
            hello.extensions[&EXT_SESSION_TICKET],
            state.ticket_cipher().seal(state.opaque(), window).to_vec()
        );
    }

    #[test]
    fn test_ticket_reused_across_connections() {
        let state = state(Browser::Chrome);
        let mut rng = StdRng::from_seed([2u8; 32]);
        let first = parse_hello(&compose_client_hello(&state, &mut rng));
        let second = parse_hello(&compose_client_hello(&state, &mut rng));

        assert_eq!(
            first.extensions[&EXT_SESSION_TICKET],
            second.extensions[&EXT_SESSION_TICKET]
        );
        assert_ne!(first.random, second.random);
    }

    #[test]
    fn test_firefox_fingerprint() {
        let state = state(Browser::Firefox);
        let record = compose_client_hello(&state, &mut StdRng::from_seed([0u8; 32]));
        let hello = parse_hello(&record);

        assert_eq!(hello.cipher_suites, FIREFOX.cipher_suites);
        assert_eq!(hello.extension_order, FIREFOX.extensions);
        assert!(!hello.extensions.contains_key(&EXT_SIGNED_CERTIFICATE_TIMESTAMP));
    }

    #[test]
    fn test_reply_layout() {
        let reply = compose_reply(&mut StdRng::from_seed([0u8; 32]));
        assert_eq!(reply.len(), 6 + RECORD_HDR_LEN + FINISHED_LEN);
        assert_eq!(&reply[..6], &[0x14, 0x03, 0x03, 0x00, 0x01, 0x01]);
        assert_eq!(&reply[6..11], &[0x16, 0x03, 0x03, 0x00, 0x28]);
        assert_ne!(
            compose_reply(&mut StdRng::from_seed([0u8; 32]))[11..],
            compose_reply(&mut StdRng::from_seed([1u8; 32]))[11..]
        );
    }
}
