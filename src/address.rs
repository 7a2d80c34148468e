//! Strict syntactic checks for the addresses found in relay documents.
//!
//! Stricter than `std::net`: octets with leading zeros and unbracketed IPv6 addresses are
//! rejected.

/// Split an `address:port` entry on its last colon. IPv6 addresses keep their brackets.
pub fn split_address_port(entry: &str) -> Option<(&str, u16)> {
    let (address, port) = entry.rsplit_once(':')?;
    let port = port.parse::<u16>().ok()?;
    Some((address, port))
}

/// Four dot-separated decimal octets in 0..=255, without leading zeros.
pub fn is_valid_ipv4_address(address: &str) -> bool {
    if address.matches('.').count() != 3 {
        return false;
    }
    address.split('.').all(|octet| {
        if octet.is_empty() || octet.len() > 3 || !octet.bytes().all(|b| b.is_ascii_digit()) {
            return false;
        }
        // "1.2.3.001"
        if octet.len() > 1 && octet.starts_with('0') {
            return false;
        }
        matches!(octet.parse::<u16>(), Ok(value) if value <= 255)
    })
}

/// A bracketed IPv6 address: at most 7 colons, either 8 groups or exactly one `::`, hex groups of
/// up to 4 digits, and optionally an IPv4 literal as the final group.
pub fn is_valid_ipv6_address(address: &str) -> bool {
    let Some(body) = address
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
    else {
        return false;
    };

    let colon_count = body.matches(':').count();
    if colon_count > 7 {
        return false;
    }
    if colon_count != 7 && !body.contains("::") {
        return false;
    }
    if body.matches("::").count() > 1 || body.contains(":::") {
        return false;
    }

    let mut found_ipv4 = false;
    for group in body.split(':') {
        // an embedded IPv4 address must be the last group
        if found_ipv4 {
            return false;
        }
        if group.len() <= 4 && group.bytes().all(|b| b.is_ascii_hexdigit()) {
            continue;
        }
        if !is_valid_ipv4_address(group) {
            return false;
        }
        found_ipv4 = true;
    }
    true
}
