//
// port_range.rs
//
// Copyright (C) 2024-2025 Posit Software, PBC. All rights reserved.
//
//

use std::fmt;
use std::net::{IpAddr, SocketAddr, TcpListener};
use std::str::FromStr;

use rand::Rng;

/// The number of random candidates tried before scanning a range in order.
const RANDOM_TRIES: usize = 10;

/// A range of ports, written `lower..upper` (both inclusive). `0..0` means
/// "any port the OS hands out".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    pub lower: u16,
    pub upper: u16,
}

impl PortRange {
    /// The unrestricted range.
    pub const ANY: PortRange = PortRange { lower: 0, upper: 0 };

    pub fn new(lower: u16, upper: u16) -> Result<Self, String> {
        if lower == 0 && upper == 0 {
            return Ok(Self::ANY);
        }
        if lower == 0 || upper < lower {
            return Err(format!(
                "Invalid port range '{}..{}': lower bound must be positive and not exceed the upper bound",
                lower, upper
            ));
        }
        Ok(Self { lower, upper })
    }

    pub fn is_any(&self) -> bool {
        self.lower == 0 && self.upper == 0
    }

    pub fn contains(&self, port: u16) -> bool {
        self.is_any() || (self.lower..=self.upper).contains(&port)
    }

    /// Binds a listener on `ip` to a port inside this range.
    ///
    /// Random ports are tried first so concurrent launches are unlikely to
    /// collide; the range is then scanned in order.
    pub fn bind(&self, ip: IpAddr) -> Option<TcpListener> {
        if self.is_any() {
            return TcpListener::bind(SocketAddr::new(ip, 0)).ok();
        }

        let mut rng = rand::thread_rng();
        for _ in 0..RANDOM_TRIES {
            let candidate = rng.gen_range(self.lower..=self.upper);
            if let Ok(listener) = TcpListener::bind(SocketAddr::new(ip, candidate)) {
                return Some(listener);
            }
            log::trace!("Port {} is in use; trying again", candidate);
        }

        (self.lower..=self.upper)
            .find_map(|port| TcpListener::bind(SocketAddr::new(ip, port)).ok())
    }
}

impl Default for PortRange {
    fn default() -> Self {
        Self::ANY
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}..{}", self.lower, self.upper)
    }
}

impl FromStr for PortRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (lower, upper) = s
            .split_once("..")
            .ok_or_else(|| format!("Invalid port range '{}': expected 'lower..upper'", s))?;
        let lower = lower
            .trim()
            .parse::<u16>()
            .map_err(|e| format!("Invalid lower port in '{}': {}", s, e))?;
        let upper = upper
            .trim()
            .parse::<u16>()
            .map_err(|e| format!("Invalid upper port in '{}': {}", s, e))?;
        PortRange::new(lower, upper)
    }
}
