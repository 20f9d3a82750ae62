//! ID generation utilities for cyclr
//!
//! Driver owner IDs identify the lease holder of a cycle.

use rand::Rng;

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Generate a unique driver owner ID
///
/// Format: `drv-{timestamp_ms}-{pid}-{random_hex}`
/// Example: `drv-1738300800123-4242-a1b2`
pub fn generate_owner_id() -> String {
    let timestamp = now_ms();
    let random: u16 = rand::rng().random();
    format!("drv-{}-{}-{:04x}", timestamp, std::process::id(), random)
}

/// Lease holder for a single drive: the driver's owner ID plus a random suffix
///
/// Two concurrent drives by the same driver hold different tokens, so the store
/// admits only one of them.
///
/// Format: `{owner}#{random_hex}`
pub fn generate_lease_token(owner: &str) -> String {
    let random: u32 = rand::rng().random();
    format!("{}#{:08x}", owner, random)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_ms_returns_reasonable_timestamp() {
        let ts = now_ms();
        assert!(ts > 1577836800000); // 2020-01-01
        assert!(ts < 4102444800000); // 2100-01-01
    }

    #[test]
    fn test_generate_owner_id_format() {
        let id = generate_owner_id();
        let parts: Vec<&str> = id.split('-').collect();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0], "drv");
        assert!(parts[1].chars().all(|c| c.is_ascii_digit()));
        assert_eq!(parts[2], std::process::id().to_string());
        assert_eq!(parts[3].len(), 4);
        assert!(parts[3].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_lease_token_keeps_owner() {
        let token = generate_lease_token("drv-test");
        let (owner, suffix) = token.split_once('#').unwrap();
        assert_eq!(owner, "drv-test");
        assert_eq!(suffix.len(), 8);
        assert_ne!(token, generate_lease_token("drv-test"));
    }

    #[test]
    fn test_owner_ids_are_unique() {
        let ids: std::collections::HashSet<String> = (0..32).map(|_| generate_owner_id()).collect();
        // 16 bits of randomness plus a timestamp: collisions in 32 draws are vanishingly rare
        assert!(ids.len() >= 31);
    }
}
