//! Network extension library.
//!
//! Value constructors and predicates over IP addresses and CIDR prefixes:
//!
//! - `ip(string)`, `isIP(string)`, `ip.isCanonical(string)`
//! - `ip.family()`, `ip.isUnspecified()`, `ip.isLoopback()`,
//!   `ip.isGlobalUnicast()`, `ip.isLinkLocalMulticast()`,
//!   `ip.isLinkLocalUnicast()`
//! - `cidr(string)`, `cidr.containsIP(ip|string)`,
//!   `cidr.containsCIDR(cidr|string)`, `cidr.masked()`,
//!   `cidr.prefixLength()`, `cidr.ip()`
//!
//! The string parsers reject zone identifiers (`fe80::1%eth0`) and IPv6
//! with an embedded dotted-decimal quad (`::ffff:1.2.3.4`); the
//! hex-spelled IPv4-mapped form remains valid and compares equal to the
//! corresponding IPv4 address.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::eval::{CidrValue, EvalError, FunctionRegistry, IpValue, Overload, Value};

/// Register the network extension.
pub fn install(registry: &mut FunctionRegistry) {
    registry.register(
        "ip",
        Overload::global("ip_string", 1, |args| match &args[0] {
            Value::String(s) => match parse_ip(s) {
                Ok(ip) => Value::Ip(ip),
                Err(e) => Value::error(e),
            },
            Value::Ip(ip) => Value::Ip(ip.clone()),
            other => Value::error(EvalError::type_mismatch("string", &other.type_name())),
        }),
    );

    registry.register(
        "isIP",
        Overload::global("is_ip_string", 1, |args| match &args[0] {
            Value::String(s) => Value::Bool(parse_ip(s).is_ok()),
            other => Value::error(EvalError::type_mismatch("string", &other.type_name())),
        }),
    );

    registry.register(
        "ip.isCanonical",
        Overload::global("ip_is_canonical", 1, |args| match &args[0] {
            Value::String(s) => match parse_ip(s) {
                Ok(ip) => Value::Bool(ip.canonical() == s.as_ref()),
                Err(_) => Value::Bool(false),
            },
            other => Value::error(EvalError::type_mismatch("string", &other.type_name())),
        }),
    );

    registry.register(
        "cidr",
        Overload::global("cidr_string", 1, |args| match &args[0] {
            Value::String(s) => match parse_cidr(s) {
                Ok(cidr) => Value::Cidr(cidr),
                Err(e) => Value::error(e),
            },
            Value::Cidr(c) => Value::Cidr(c.clone()),
            other => Value::error(EvalError::type_mismatch("string", &other.type_name())),
        }),
    );

    registry.register(
        "family",
        Overload::member("ip_family", 1, |args| {
            with_ip(&args[0], "family", |ip| Value::Int(ip.family()))
        }),
    );
    registry.register(
        "isUnspecified",
        Overload::member("ip_is_unspecified", 1, |args| {
            with_ip(&args[0], "isUnspecified", |ip| {
                Value::Bool(ip.addr().is_unspecified())
            })
        }),
    );
    registry.register(
        "isLoopback",
        Overload::member("ip_is_loopback", 1, |args| {
            with_ip(&args[0], "isLoopback", |ip| {
                Value::Bool(ip.addr().is_loopback())
            })
        }),
    );
    registry.register(
        "isGlobalUnicast",
        Overload::member("ip_is_global_unicast", 1, |args| {
            with_ip(&args[0], "isGlobalUnicast", |ip| {
                Value::Bool(is_global_unicast(ip.addr()))
            })
        }),
    );
    registry.register(
        "isLinkLocalMulticast",
        Overload::member("ip_is_link_local_multicast", 1, |args| {
            with_ip(&args[0], "isLinkLocalMulticast", |ip| {
                Value::Bool(is_link_local_multicast(ip.addr()))
            })
        }),
    );
    registry.register(
        "isLinkLocalUnicast",
        Overload::member("ip_is_link_local_unicast", 1, |args| {
            with_ip(&args[0], "isLinkLocalUnicast", |ip| {
                Value::Bool(is_link_local_unicast(ip.addr()))
            })
        }),
    );

    registry.register(
        "containsIP",
        Overload::member("cidr_contains_ip", 2, |args| {
            with_cidr(&args[0], "containsIP", |cidr| {
                let candidate = match &args[1] {
                    Value::Ip(ip) => ip.clone(),
                    Value::String(s) => match parse_ip(s) {
                        Ok(ip) => ip,
                        Err(e) => return Value::error(e),
                    },
                    other => {
                        return Value::error(EvalError::type_mismatch("ip", &other.type_name()))
                    }
                };
                Value::Bool(contains_ip(cidr, &candidate))
            })
        }),
    );

    registry.register(
        "containsCIDR",
        Overload::member("cidr_contains_cidr", 2, |args| {
            with_cidr(&args[0], "containsCIDR", |cidr| {
                let candidate = match &args[1] {
                    Value::Cidr(c) => c.clone(),
                    Value::String(s) => match parse_cidr(s) {
                        Ok(c) => c,
                        Err(e) => return Value::error(e),
                    },
                    other => {
                        return Value::error(EvalError::type_mismatch("cidr", &other.type_name()))
                    }
                };
                Value::Bool(contains_cidr(cidr, &candidate))
            })
        }),
    );

    registry.register(
        "masked",
        Overload::member("cidr_masked", 1, |args| {
            with_cidr(&args[0], "masked", |cidr| {
                Value::Cidr(CidrValue::new(
                    IpValue::new(mask_addr(cidr.ip.addr(), cidr.prefix_len)),
                    cidr.prefix_len,
                ))
            })
        }),
    );

    registry.register(
        "prefixLength",
        Overload::member("cidr_prefix_length", 1, |args| {
            with_cidr(&args[0], "prefixLength", |cidr| {
                Value::Int(cidr.prefix_len as i64)
            })
        }),
    );

    registry.register(
        "ip",
        Overload::member("cidr_ip", 1, |args| {
            with_cidr(&args[0], "ip", |cidr| Value::Ip(cidr.ip.clone()))
        }),
    );
}

fn with_ip(value: &Value, name: &str, f: impl FnOnce(&IpValue) -> Value) -> Value {
    match value {
        Value::Ip(ip) => f(ip),
        other => Value::error(EvalError::no_matching_overload(&format!(
            "{} on {}",
            name,
            other.type_name()
        ))),
    }
}

fn with_cidr(value: &Value, name: &str, f: impl FnOnce(&CidrValue) -> Value) -> Value {
    match value {
        Value::Cidr(cidr) => f(cidr),
        other => Value::error(EvalError::no_matching_overload(&format!(
            "{} on {}",
            name,
            other.type_name()
        ))),
    }
}

/// Parse an IP address string. Zone identifiers and IPv6 with embedded
/// dotted-decimal are rejected.
pub fn parse_ip(s: &str) -> Result<IpValue, EvalError> {
    if s.contains('%') {
        return Err(EvalError::range_error(format!(
            "invalid IP address (zone identifiers are not supported): {}",
            s
        )));
    }
    if s.contains(':') && s.contains('.') {
        return Err(EvalError::range_error(format!(
            "invalid IP address (IPv6 with dotted-decimal is not supported): {}",
            s
        )));
    }
    s.parse::<IpAddr>()
        .map(IpValue::new)
        .map_err(|_| EvalError::range_error(format!("invalid IP address: {}", s)))
}

/// Parse a CIDR string of the form `address/prefix`.
pub fn parse_cidr(s: &str) -> Result<CidrValue, EvalError> {
    let (addr, prefix) = s
        .split_once('/')
        .ok_or_else(|| EvalError::range_error(format!("invalid CIDR (missing prefix): {}", s)))?;

    let ip = parse_ip(addr)?;
    let prefix_len: u8 = prefix
        .parse()
        .map_err(|_| EvalError::range_error(format!("invalid CIDR prefix length: {}", s)))?;

    let max = match ip.addr() {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    };
    if prefix_len > max {
        return Err(EvalError::range_error(format!(
            "CIDR prefix length out of range: {}",
            s
        )));
    }

    Ok(CidrValue::new(ip, prefix_len))
}

fn mask_addr(addr: IpAddr, prefix: u8) -> IpAddr {
    match addr {
        IpAddr::V4(v4) => {
            let mask = if prefix == 0 {
                0
            } else {
                u32::MAX << (32 - prefix.min(32) as u32)
            };
            IpAddr::V4(Ipv4Addr::from(u32::from(v4) & mask))
        }
        IpAddr::V6(v6) => {
            let mask = if prefix == 0 {
                0
            } else {
                u128::MAX << (128 - prefix.min(128) as u32)
            };
            IpAddr::V6(Ipv6Addr::from(u128::from(v6) & mask))
        }
    }
}

fn contains_ip(cidr: &CidrValue, candidate: &IpValue) -> bool {
    if cidr.ip.family() != candidate.family() {
        return false;
    }
    mask_addr(candidate.addr(), cidr.prefix_len) == mask_addr(cidr.ip.addr(), cidr.prefix_len)
}

fn contains_cidr(cidr: &CidrValue, candidate: &CidrValue) -> bool {
    if cidr.ip.family() != candidate.ip.family() {
        return false;
    }
    candidate.prefix_len >= cidr.prefix_len
        && mask_addr(candidate.ip.addr(), cidr.prefix_len)
            == mask_addr(cidr.ip.addr(), cidr.prefix_len)
}

fn is_link_local_unicast(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => v4.is_link_local(),
        // fe80::/10
        IpAddr::V6(v6) => (v6.segments()[0] & 0xffc0) == 0xfe80,
    }
}

fn is_link_local_multicast(addr: IpAddr) -> bool {
    match addr {
        // 224.0.0.0/24
        IpAddr::V4(v4) => {
            let octets = v4.octets();
            octets[0] == 224 && octets[1] == 0 && octets[2] == 0
        }
        // ffx2::/16
        IpAddr::V6(v6) => {
            let segments = v6.segments();
            (segments[0] & 0xff0f) == 0xff02
        }
    }
}

fn is_global_unicast(addr: IpAddr) -> bool {
    let multicast = match addr {
        IpAddr::V4(v4) => v4.is_multicast() || v4.is_broadcast(),
        IpAddr::V6(v6) => v6.is_multicast(),
    };
    !addr.is_unspecified() && !addr.is_loopback() && !multicast && !is_link_local_unicast(addr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ip() {
        assert_eq!(parse_ip("192.168.0.1").unwrap().family(), 4);
        assert_eq!(parse_ip("2001:db8::1").unwrap().family(), 6);
        assert!(parse_ip("not an ip").is_err());
        assert!(parse_ip("256.0.0.1").is_err());
        // Zone identifiers are rejected
        assert!(parse_ip("fe80::1%eth0").is_err());
        // IPv6 with dotted-decimal is rejected
        assert!(parse_ip("::ffff:1.2.3.4").is_err());
        // The hex spelling of the mapped form is fine
        assert!(parse_ip("::ffff:102:304").is_ok());
    }

    #[test]
    fn test_canonical_forms() {
        let ip = parse_ip("2001:DB8::1");
        // std's parser accepts uppercase; canonical output is lowercase
        assert_eq!(ip.unwrap().canonical(), "2001:db8::1");
    }

    #[test]
    fn test_parse_cidr() {
        let cidr = parse_cidr("192.168.0.0/24").unwrap();
        assert_eq!(cidr.prefix_len, 24);
        assert!(parse_cidr("192.168.0.0").is_err());
        assert!(parse_cidr("192.168.0.0/33").is_err());
        assert!(parse_cidr("2001:db8::/129").is_err());
        assert!(parse_cidr("bad/24").is_err());
    }

    #[test]
    fn test_contains_ip() {
        let cidr = parse_cidr("192.168.0.0/24").unwrap();
        assert!(contains_ip(&cidr, &parse_ip("192.168.0.42").unwrap()));
        assert!(!contains_ip(&cidr, &parse_ip("192.168.1.1").unwrap()));
        // Cross-family containment is false, not an error
        assert!(!contains_ip(&cidr, &parse_ip("2001:db8::1").unwrap()));

        let v6 = parse_cidr("2001:db8::/32").unwrap();
        assert!(contains_ip(&v6, &parse_ip("2001:db8::1").unwrap()));
        assert!(!contains_ip(&v6, &parse_ip("2001:db9::1").unwrap()));
    }

    #[test]
    fn test_contains_cidr() {
        let outer = parse_cidr("10.0.0.0/8").unwrap();
        assert!(contains_cidr(&outer, &parse_cidr("10.1.0.0/16").unwrap()));
        assert!(!contains_cidr(&outer, &parse_cidr("11.0.0.0/16").unwrap()));
        // A wider prefix is not contained
        assert!(!contains_cidr(&outer, &parse_cidr("10.0.0.0/4").unwrap()));
    }

    #[test]
    fn test_masked() {
        let cidr = parse_cidr("192.168.0.55/24").unwrap();
        let masked = mask_addr(cidr.ip.addr(), cidr.prefix_len);
        assert_eq!(masked, "192.168.0.0".parse::<IpAddr>().unwrap());

        // /0 masks everything
        assert_eq!(
            mask_addr("255.255.255.255".parse().unwrap(), 0),
            "0.0.0.0".parse::<IpAddr>().unwrap()
        );
    }

    #[test]
    fn test_predicates() {
        assert!(is_link_local_unicast("169.254.1.1".parse().unwrap()));
        assert!(is_link_local_unicast("fe80::1".parse().unwrap()));
        assert!(!is_link_local_unicast("10.0.0.1".parse().unwrap()));

        assert!(is_link_local_multicast("224.0.0.251".parse().unwrap()));
        assert!(is_link_local_multicast("ff02::1".parse().unwrap()));
        assert!(!is_link_local_multicast("224.1.0.1".parse().unwrap()));

        assert!(is_global_unicast("8.8.8.8".parse().unwrap()));
        assert!(is_global_unicast("2001:db8::1".parse().unwrap()));
        assert!(!is_global_unicast("127.0.0.1".parse().unwrap()));
        assert!(!is_global_unicast("0.0.0.0".parse().unwrap()));
        assert!(!is_global_unicast("fe80::1".parse().unwrap()));
        assert!(!is_global_unicast("255.255.255.255".parse().unwrap()));
    }
}
