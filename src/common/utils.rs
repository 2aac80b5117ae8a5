//! Utility functions for replikv

use crate::common::{Error, PeerHandle, Result};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use std::net::{IpAddr, SocketAddr, UdpSocket};

/// Percent-encoding set for keys (includes /, %, and control chars)
const KEY_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b'/')
    .add(b'%')
    .add(b' ')
    .add(b'?')
    .add(b'#')
    .add(b'&');

/// Encode a key for use as a URL path segment
pub fn encode_key(key: &str) -> String {
    utf8_percent_encode(key, KEY_ENCODE_SET).to_string()
}

/// Node identity: `<ip>_<port>`, unique as long as addresses are.
pub fn server_id(ip: IpAddr, port: u16) -> String {
    format!("{}_{}", ip, port)
}

/// Turn a `host:port` seed (or a full URL) into a peer handle.
pub fn parse_seed(seed: &str) -> Result<PeerHandle> {
    let seed = seed.trim();
    let authority = seed
        .strip_prefix("http://")
        .unwrap_or(seed)
        .trim_end_matches('/');

    let (host, port) = authority
        .rsplit_once(':')
        .ok_or_else(|| Error::InvalidConfig(format!("seed {} is not host:port", seed)))?;
    if host.is_empty() {
        return Err(Error::InvalidConfig(format!("seed {} has no host", seed)));
    }
    port.parse::<u16>()
        .map_err(|_| Error::InvalidConfig(format!("seed {} has an invalid port", seed)))?;

    Ok(PeerHandle::new(format!("http://{}:{}", host, port)))
}

/// Address other hosts can reach us on.
///
/// Connecting a UDP socket sends nothing; it only makes the kernel pick the
/// outbound interface.
pub fn local_ip() -> Result<IpAddr> {
    let socket = UdpSocket::bind(SocketAddr::from(([0, 0, 0, 0], 0)))?;
    socket.connect(SocketAddr::from(([192, 0, 2, 1], 9)))?;
    Ok(socket.local_addr()?.ip())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_encoding() {
        let key = "user/42 profile?x";
        let encoded = encode_key(key);
        assert!(!encoded.contains('/'));
        assert!(!encoded.contains(' '));
        assert_eq!(encoded, "user%2F42%20profile%3Fx");
    }

    #[test]
    fn test_parse_seed() {
        assert_eq!(
            parse_seed("127.0.0.1:5000").unwrap(),
            PeerHandle::new("http://127.0.0.1:5000")
        );
        assert_eq!(
            parse_seed("http://node-b:6000/").unwrap(),
            PeerHandle::new("http://node-b:6000")
        );
        assert!(parse_seed("127.0.0.1").is_err());
        assert!(parse_seed("host:notaport").is_err());
        assert!(parse_seed(":5000").is_err());
    }

    #[test]
    fn test_server_id() {
        let ip: IpAddr = "10.1.2.3".parse().unwrap();
        assert_eq!(server_id(ip, 5000), "10.1.2.3_5000");
    }
}
