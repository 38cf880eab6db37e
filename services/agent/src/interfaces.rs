//! Interface allowlist resolution.
//!
//! Expands a configured interface-name allowlist against the system's
//! actual network interfaces (`pnet::datalink::interfaces`), the way the
//! forwarder's `discovery.rs` expanded a reader-target range against
//! explicit config — here the "range" is names, not IP octets.

use pnet::datalink;

/// A capture-eligible interface, resolved from the configured allowlist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedInterface {
    pub name: String,
    pub is_up: bool,
    pub is_loopback: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum InterfaceError {
    #[error("no interface named '{0}' found on this host")]
    NotFound(String),
    #[error("interface '{0}' is administratively down")]
    Down(String),
}

/// Resolve every name in `allowlist` against the live interface set.
/// Order is preserved so the caller's capture-task fan-out order is
/// deterministic and matches the config file.
pub fn resolve(allowlist: &[String]) -> Result<Vec<ResolvedInterface>, InterfaceError> {
    let live = datalink::interfaces();
    let mut out = Vec::with_capacity(allowlist.len());
    for name in allowlist {
        let found = live
            .iter()
            .find(|i| &i.name == name)
            .ok_or_else(|| InterfaceError::NotFound(name.clone()))?;
        if !found.is_up() {
            return Err(InterfaceError::Down(name.clone()));
        }
        out.push(ResolvedInterface {
            name: found.name.clone(),
            is_up: found.is_up(),
            is_loopback: found.is_loopback(),
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_interface_name_is_reported() {
        let err = resolve(&["definitely-not-a-real-nic-0".to_string()]).unwrap_err();
        assert!(matches!(err, InterfaceError::NotFound(_)));
    }
}
