//! Credential store: configured users and the registration IP allowlist.

use std::collections::HashMap;
use std::net::IpAddr;

use subtle::ConstantTimeEq;

/// Constant-time string comparison.
///
/// Strings of different length compare unequal without short-circuiting on content.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let a_bytes = a.as_bytes();
    let b_bytes = b.as_bytes();
    if a_bytes.len() == b_bytes.len() {
        a_bytes.ct_eq(b_bytes).into()
    } else {
        let _ = a_bytes.ct_eq(a_bytes);
        false
    }
}

/// Users allowed to log in and the IPs allowed to register clients.
#[derive(Debug, Clone, Default)]
pub struct CredentialStore {
    users: HashMap<String, String>,
    allowed_ips: Vec<String>,
}

impl CredentialStore {
    pub fn new(users: HashMap<String, String>, allowed_ips: Vec<String>) -> Self {
        Self { users, allowed_ips }
    }

    /// Whether any user is configured at all.
    pub fn has_users(&self) -> bool {
        !self.users.is_empty()
    }

    /// Check a username/password pair.
    ///
    /// Unknown users still run a comparison so that timing does not reveal
    /// whether the username exists.
    pub fn verify(&self, username: &str, password: &str) -> bool {
        match self.users.get(username) {
            Some(expected) => constant_time_eq(expected, password),
            None => {
                let _ = constant_time_eq(password, password);
                false
            }
        }
    }

    /// Whether the registration allowlist is active.
    pub fn restricts_registration(&self) -> bool {
        !self.allowed_ips.is_empty()
    }

    /// Check a resolved client IP against the registration allowlist.
    ///
    /// An empty allowlist admits everyone. With a non-empty allowlist an
    /// unresolvable IP is denied.
    pub fn is_ip_allowed(&self, ip: Option<IpAddr>) -> bool {
        if self.allowed_ips.is_empty() {
            return true;
        }
        let Some(ip) = ip else {
            return false;
        };
        let rendered = ip.to_string();
        self.allowed_ips.iter().any(|entry| {
            let entry = entry.trim();
            match entry.parse::<IpAddr>() {
                Ok(allowed) => allowed == ip,
                Err(_) => entry == rendered,
            }
        })
    }
}
