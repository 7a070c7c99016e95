// Address range and port range values used by configuration

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use crate::error::ConfigError;

/// A CIDR block such as `10.0.0.0/24` or `fd00::/108`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct IpNet {
    network: IpAddr,
    prefix_len: u8,
}

impl IpNet {
    pub fn network(&self) -> IpAddr {
        self.network
    }

    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    pub fn is_ipv4(&self) -> bool {
        self.network.is_ipv4()
    }

    pub fn contains(&self, ip: &IpAddr) -> bool {
        match (self.network, ip) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = v4_mask(self.prefix_len);
                u32::from(net) & mask == u32::from(*ip) & mask
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = v6_mask(self.prefix_len);
                u128::from(net) & mask == u128::from(*ip) & mask
            }
            _ => false,
        }
    }

    /// First usable address after the network address, if the block has one
    pub fn first_host(&self) -> Option<IpAddr> {
        match self.network {
            IpAddr::V4(net) => {
                let host_bits = 32 - u32::from(self.prefix_len);
                if host_bits < 2 {
                    return None;
                }
                Some(IpAddr::V4(Ipv4Addr::from(u32::from(net) + 1)))
            }
            IpAddr::V6(net) => {
                if self.prefix_len >= 127 {
                    return None;
                }
                Some(IpAddr::V6(Ipv6Addr::from(u128::from(net) + 1)))
            }
        }
    }
}

fn v4_mask(prefix_len: u8) -> u32 {
    u32::MAX.checked_shl(32 - u32::from(prefix_len)).unwrap_or(0)
}

fn v6_mask(prefix_len: u8) -> u128 {
    u128::MAX.checked_shl(128 - u32::from(prefix_len)).unwrap_or(0)
}

impl FromStr for IpNet {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ConfigError::InvalidIpRange(s.to_string(), reason.to_string());

        let (addr, len) = s.trim().split_once('/').ok_or_else(|| invalid("missing prefix length"))?;
        let addr: IpAddr = addr.parse().map_err(|_| invalid("invalid address"))?;
        let prefix_len: u8 = len.parse().map_err(|_| invalid("invalid prefix length"))?;

        let network = match addr {
            IpAddr::V4(v4) => {
                if prefix_len > 32 {
                    return Err(invalid("prefix length exceeds 32"));
                }
                IpAddr::V4(Ipv4Addr::from(u32::from(v4) & v4_mask(prefix_len)))
            }
            IpAddr::V6(v6) => {
                if prefix_len > 128 {
                    return Err(invalid("prefix length exceeds 128"));
                }
                IpAddr::V6(Ipv6Addr::from(u128::from(v6) & v6_mask(prefix_len)))
            }
        };

        Ok(Self {
            network,
            prefix_len,
        })
    }
}

impl fmt::Display for IpNet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix_len)
    }
}

/// An inclusive port range, written `min-max` or `base+offset`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PortRange {
    min: u16,
    max: u16,
}

impl PortRange {
    pub fn new(min: u16, max: u16) -> Option<Self> {
        (min <= max).then_some(Self { min, max })
    }

    pub fn min(&self) -> u16 {
        self.min
    }

    pub fn max(&self) -> u16 {
        self.max
    }

    pub fn contains(&self, port: u16) -> bool {
        (self.min..=self.max).contains(&port)
    }
}

impl FromStr for PortRange {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidPortRange(s.to_string());
        let s = s.trim();

        if let Some((min, max)) = s.split_once('-') {
            let min: u16 = min.trim().parse().map_err(|_| invalid())?;
            let max: u16 = max.trim().parse().map_err(|_| invalid())?;
            return PortRange::new(min, max).ok_or_else(invalid);
        }

        if let Some((base, offset)) = s.split_once('+') {
            let base: u16 = base.trim().parse().map_err(|_| invalid())?;
            let offset: u16 = offset.trim().parse().map_err(|_| invalid())?;
            let max = base.checked_add(offset).ok_or_else(invalid)?;
            return PortRange::new(base, max).ok_or_else(invalid);
        }

        let port: u16 = s.parse().map_err(|_| invalid())?;
        Ok(Self {
            min: port,
            max: port,
        })
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.min(), self.max())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ipv4_net() {
        let net: IpNet = "10.0.0.7/24".parse().unwrap();
        assert_eq!(net.to_string(), "10.0.0.0/24");
        assert!(net.contains(&"10.0.0.255".parse().unwrap()));
        assert!(!net.contains(&"10.0.1.1".parse().unwrap()));
        assert!(!net.contains(&"fd00::1".parse().unwrap()));
        assert_eq!(net.first_host(), Some("10.0.0.1".parse().unwrap()));
    }

    #[test]
    fn test_parse_ipv6_net() {
        let net: IpNet = "fd00::/108".parse().unwrap();
        assert!(!net.is_ipv4());
        assert!(net.contains(&"fd00::ff".parse().unwrap()));
        assert_eq!(net.first_host(), Some("fd00::1".parse().unwrap()));
    }

    #[test]
    fn test_degenerate_nets() {
        let single: IpNet = "10.0.0.1/32".parse().unwrap();
        assert_eq!(single.first_host(), None);
        let all: IpNet = "0.0.0.0/0".parse().unwrap();
        assert!(all.contains(&"192.168.1.1".parse().unwrap()));
    }

    #[test]
    fn test_invalid_nets() {
        assert!(matches!(
            "10.0.0.0".parse::<IpNet>(),
            Err(ConfigError::InvalidIpRange(..))
        ));
        assert!("10.0.0.0/33".parse::<IpNet>().is_err());
        assert!("bogus/8".parse::<IpNet>().is_err());
    }

    #[test]
    fn test_port_range_forms() {
        let range: PortRange = "30000-32767".parse().unwrap();
        assert_eq!((range.min(), range.max()), (30000, 32767));
        assert!(range.contains(30000));
        assert!(!range.contains(32768));
        assert_eq!(range.to_string(), "30000-32767");

        let offset: PortRange = "30000+2767".parse().unwrap();
        assert_eq!(offset, range);

        let single: PortRange = "8080".parse().unwrap();
        assert_eq!((single.min(), single.max()), (8080, 8080));
    }

    #[test]
    fn test_invalid_port_ranges() {
        assert!("32767-30000".parse::<PortRange>().is_err());
        assert!("65000+1000".parse::<PortRange>().is_err());
        assert!("a-b".parse::<PortRange>().is_err());
    }
}
