use chrono::{DateTime, Utc};
use tracing::debug;

use crate::address::{is_valid_ipv4_address, is_valid_ipv6_address, split_address_port};
use crate::document::{parse_timestamp, Flag, RawRelayDetails, UptimeDocument};
use crate::{history, Error, Normalized, Result, Weight};

/// Time-decayed flag fractions. `None` means no history has been merged for that flag, which is
/// distinct from a history showing the flag was never held.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FlagFractions {
    pub running: Option<Normalized>,
    pub guard: Option<Normalized>,
    pub v2dir: Option<Normalized>,
    pub badexit: Option<Normalized>,
}

impl FlagFractions {
    pub fn get(&self, flag: Flag) -> Option<Normalized> {
        match flag {
            Flag::Running => self.running,
            Flag::Guard => self.guard,
            Flag::V2Dir => self.v2dir,
            Flag::BadExit => self.badexit,
        }
    }

    fn slot(&mut self, flag: Flag) -> &mut Option<Normalized> {
        match flag {
            Flag::Running => &mut self.running,
            Flag::Guard => &mut self.guard,
            Flag::V2Dir => &mut self.v2dir,
            Flag::BadExit => &mut self.badexit,
        }
    }
}

/// A relay's static attributes from the details document, the addresses derived from them, and
/// the flag fractions merged in from its uptime document.
#[derive(Clone, Debug)]
pub struct RelayRecord {
    fingerprint: String,
    nickname: String,
    contact: Option<String>,
    last_changed_address_or_port: DateTime<Utc>,
    consensus_weight: Weight,
    /// `or_addresses` as received.
    or_addresses_raw: Vec<String>,
    /// The primary address followed by the secondaries in string order.
    or_addresses: Vec<String>,
    dir_address: String,
    recommended_version: Option<bool>,
    or_port: u16,
    ipv6_address: Option<String>,
    flags: FlagFractions,
}

fn missing(fingerprint: &str, field: &str) -> Error {
    Error::MalformedRecord {
        fingerprint: fingerprint.to_string(),
        reason: format!("document has no {field} field"),
    }
}

impl RelayRecord {
    pub fn new(details: RawRelayDetails) -> Result<Self> {
        let fingerprint = details
            .fingerprint
            .ok_or_else(|| missing("<unknown>", "fingerprint"))?;
        let nickname = details
            .nickname
            .ok_or_else(|| missing(&fingerprint, "nickname"))?;
        let last_changed = details
            .last_changed_address_or_port
            .ok_or_else(|| missing(&fingerprint, "last_changed_address_or_port"))?;
        let last_changed_address_or_port =
            parse_timestamp(&last_changed).ok_or_else(|| Error::MalformedRecord {
                fingerprint: fingerprint.clone(),
                reason: format!("unparseable last_changed_address_or_port {last_changed:?}"),
            })?;
        let consensus_weight = details
            .consensus_weight
            .ok_or_else(|| missing(&fingerprint, "consensus_weight"))?;
        let consensus_weight =
            Weight::new(consensus_weight).ok_or_else(|| Error::MalformedRecord {
                fingerprint: fingerprint.clone(),
                reason: format!("invalid consensus_weight {consensus_weight}"),
            })?;
        let or_addresses_raw = details
            .or_addresses
            .filter(|addresses| !addresses.is_empty())
            .ok_or_else(|| missing(&fingerprint, "or_addresses"))?;
        let dir_address = details
            .dir_address
            .ok_or_else(|| missing(&fingerprint, "dir_address"))?;

        let or_addresses = stable_order(&or_addresses_raw);
        let or_port = choose_or_port(&fingerprint, &or_addresses, &dir_address).ok_or_else(|| {
            Error::MalformedRecord {
                fingerprint: fingerprint.clone(),
                reason: format!("no IPv4 OR port on the directory address {dir_address}"),
            }
        })?;
        let ipv6_address = choose_ipv6_address(&or_addresses, or_port);
        if ipv6_address.is_none() {
            debug!(%fingerprint, "no IPv6 address");
        }

        Ok(Self {
            fingerprint,
            nickname,
            contact: details.contact,
            last_changed_address_or_port,
            consensus_weight,
            or_addresses_raw,
            or_addresses,
            dir_address,
            recommended_version: details.recommended_version,
            or_port,
            ipv6_address,
            flags: FlagFractions::default(),
        })
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn nickname(&self) -> &str {
        &self.nickname
    }

    pub fn contact(&self) -> Option<&str> {
        self.contact.as_deref()
    }

    pub fn last_changed_address_or_port(&self) -> DateTime<Utc> {
        self.last_changed_address_or_port
    }

    pub fn consensus_weight(&self) -> Weight {
        self.consensus_weight
    }

    pub fn or_addresses_raw(&self) -> &[String] {
        &self.or_addresses_raw
    }

    pub fn or_addresses(&self) -> &[String] {
        &self.or_addresses
    }

    pub fn dir_address(&self) -> &str {
        &self.dir_address
    }

    pub fn recommended_version(&self) -> Option<bool> {
        self.recommended_version
    }

    pub fn or_port(&self) -> u16 {
        self.or_port
    }

    pub fn ipv6_address(&self) -> Option<&str> {
        self.ipv6_address.as_deref()
    }

    pub fn flags(&self) -> &FlagFractions {
        &self.flags
    }

    pub fn running(&self) -> Normalized {
        self.flags.running.unwrap_or(Normalized::ZERO)
    }

    pub fn guard(&self) -> Normalized {
        self.flags.guard.unwrap_or(Normalized::ZERO)
    }

    pub fn v2dir(&self) -> Normalized {
        self.flags.v2dir.unwrap_or(Normalized::ZERO)
    }

    pub fn badexit(&self) -> Option<Normalized> {
        self.flags.badexit
    }

    /// Record the fraction for one flag. Each flag may be merged once.
    pub fn merge_flag(&mut self, flag: Flag, fraction: Normalized) -> Result<()> {
        let slot = self.flags.slot(flag);
        if slot.is_some() {
            return Err(Error::DuplicateHistory {
                fingerprint: self.fingerprint.clone(),
                flag,
            });
        }
        *slot = Some(fraction);
        Ok(())
    }

    /// Merge the flag histories of `uptime`. If any of Running, Guard or V2Dir is missing nothing
    /// is merged, leaving the record to fail eligibility. BadExit is optional.
    pub fn merge_uptime(&mut self, uptime: &UptimeDocument, now: DateTime<Utc>) -> Result<()> {
        debug!(fingerprint = %self.fingerprint, "adding uptime");
        if let Some(flag) = Flag::REQUIRED
            .into_iter()
            .find(|flag| uptime.flag(*flag).is_none())
        {
            return Err(Error::IncompleteFlagData {
                fingerprint: self.fingerprint.clone(),
                flag,
            });
        }

        let mut fractions = Vec::with_capacity(4);
        for flag in [Flag::Running, Flag::Guard, Flag::V2Dir, Flag::BadExit] {
            let Some(history) = uptime.flag(flag) else {
                continue;
            };
            let subject = format!("{}-{}", self.fingerprint, flag);
            let fraction = history::flag_fraction(history, now, &subject).map_err(|reason| {
                Error::MalformedHistory {
                    fingerprint: self.fingerprint.clone(),
                    flag,
                    reason,
                }
            })?;
            // Required flags without any values count as never held.
            match (fraction, flag) {
                (Some(fraction), _) => fractions.push((flag, fraction)),
                (None, Flag::BadExit) => (),
                (None, _) => fractions.push((flag, Normalized::ZERO)),
            }
        }
        // Check every slot first so a duplicate leaves the record untouched.
        if let Some((flag, _)) = fractions
            .iter()
            .find(|(flag, _)| self.flags.get(*flag).is_some())
        {
            return Err(Error::DuplicateHistory {
                fingerprint: self.fingerprint.clone(),
                flag: *flag,
            });
        }
        for (flag, fraction) in fractions {
            self.merge_flag(flag, fraction)?;
        }
        Ok(())
    }
}

/// The primary address, then the remaining addresses in string order. Secondary addresses
/// arrive in arbitrary order, and this keeps the derived ports stable across runs.
fn stable_order(or_addresses: &[String]) -> Vec<String> {
    let Some((primary, secondaries)) = or_addresses.split_first() else {
        return Vec::new();
    };
    let mut secondaries = secondaries.to_vec();
    secondaries.sort();
    std::iter::once(primary.clone()).chain(secondaries).collect()
}

/// The port of the first address on the directory address's IPv4 address. In rare cases this is
/// not the primary address.
fn choose_or_port(fingerprint: &str, or_addresses: &[String], dir_address: &str) -> Option<u16> {
    let (dir_ip, _) = dir_address.split_once(':')?;
    or_addresses.iter().enumerate().find_map(|(index, entry)| {
        let (ip, port) = split_address_port(entry)?;
        if ip != dir_ip || !is_valid_ipv4_address(ip) {
            return None;
        }
        if index > 0 {
            debug!(%fingerprint, address = %entry, "secondary IPv4 address used");
        }
        Some(port)
    })
}

/// The first IPv6 address using the OR port, or failing that the first IPv6 address.
fn choose_ipv6_address(or_addresses: &[String], or_port: u16) -> Option<String> {
    let ipv6: Vec<(&str, u16)> = or_addresses
        .iter()
        .filter_map(|entry| split_address_port(entry))
        .filter(|(ip, _)| is_valid_ipv6_address(ip))
        .collect();
    ipv6.iter()
        .find(|(_, port)| *port == or_port)
        .or_else(|| ipv6.first())
        .map(|(ip, _)| ip.to_string())
}
