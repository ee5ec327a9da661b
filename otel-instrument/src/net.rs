use thiserror::Error;

/// Error returned when an address has a colon but no numeric port suffix.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid address {addr:?}: port is not numeric")]
pub struct InvalidAddress {
    /// The offending address string.
    pub addr: String,
}

/// Splits an `addr` of the form `host:port` on its last colon.
///
/// An address without a colon is treated as a bare host with port `0`. A
/// non-numeric port is a construction-time error for the adapter holding
/// the address.
pub fn split_host_port(addr: &str) -> Result<(String, u16), InvalidAddress> {
    match addr.rsplit_once(':') {
        None => Ok((addr.to_owned(), 0)),
        Some((host, port)) => port
            .parse::<u16>()
            .map(|port| (host.to_owned(), port))
            .map_err(|_| InvalidAddress {
                addr: addr.to_owned(),
            }),
    }
}

/// Network transport kind for the `network.transport` attribute.
///
/// Maps the wrapped drivers' network names (`tcp4`, `unixgram`, ...) onto
/// the fixed attribute vocabulary, defaulting to [`Transport::Other`] for
/// anything unrecognized.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transport {
    Tcp,
    Udp,
    Ip,
    Unix,
    Other,
}

impl Transport {
    /// Classifies a driver network name.
    pub fn from_network(network: &str) -> Transport {
        match network.to_ascii_lowercase().as_str() {
            "tcp" | "tcp4" | "tcp6" => Transport::Tcp,
            "udp" | "udp4" | "udp6" => Transport::Udp,
            "ip" | "ip4" | "ip6" => Transport::Ip,
            "unix" | "unixgram" | "unixpacket" => Transport::Unix,
            _ => Transport::Other,
        }
    }

    /// The attribute value for this transport.
    pub fn as_str(self) -> &'static str {
        match self {
            Transport::Tcp => "tcp",
            Transport::Udp => "udp",
            Transport::Ip => "ip",
            Transport::Unix => "unix",
            Transport::Other => "other",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_host_and_port() {
        assert_eq!(
            split_host_port("127.0.0.1:6379"),
            Ok(("127.0.0.1".to_owned(), 6379))
        );
    }

    #[test]
    fn bare_host_gets_port_zero() {
        assert_eq!(split_host_port("redis-host"), Ok(("redis-host".to_owned(), 0)));
    }

    #[test]
    fn splits_on_the_last_colon() {
        assert_eq!(
            split_host_port("::1:6379"),
            Ok(("::1".to_owned(), 6379))
        );
    }

    #[test]
    fn non_numeric_port_is_an_error() {
        let err = split_host_port("db:sock").unwrap_err();
        assert_eq!(err.addr, "db:sock");
    }

    #[test]
    fn transport_classification() {
        assert_eq!(Transport::from_network("tcp"), Transport::Tcp);
        assert_eq!(Transport::from_network("TCP6"), Transport::Tcp);
        assert_eq!(Transport::from_network("udp4"), Transport::Udp);
        assert_eq!(Transport::from_network("ip6"), Transport::Ip);
        assert_eq!(Transport::from_network("unixgram"), Transport::Unix);
        assert_eq!(Transport::from_network("quic"), Transport::Other);
        assert_eq!(Transport::from_network("").as_str(), "other");
    }
}
