use std::net::IpAddr;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IpFamily {
    V4,
    V6,
}

impl IpFamily {
    pub fn from_ipv6(is_ipv6: bool) -> IpFamily {
        if is_ipv6 {
            IpFamily::V6
        } else {
            IpFamily::V4
        }
    }

    pub fn is_ipv6(self) -> bool {
        self == IpFamily::V6
    }

    // None for anything that does not parse as an address.
    pub fn of(ip: &str) -> Option<IpFamily> {
        match ip.parse::<IpAddr>().ok()? {
            IpAddr::V4(_) => Some(IpFamily::V4),
            IpAddr::V6(_) => Some(IpFamily::V6),
        }
    }

    // Service spec spelling: "IPv4" / "IPv6".
    pub fn parse_service_family(family: &str) -> Option<IpFamily> {
        if family.eq_ignore_ascii_case("IPv4") {
            Some(IpFamily::V4)
        } else if family.eq_ignore_ascii_case("IPv6") {
            Some(IpFamily::V6)
        } else {
            None
        }
    }
}
