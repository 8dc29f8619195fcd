//! Control-Plane IP Allocator (`spec.md` §4.4). For a given target, returns
//! the lowest unused address in its prefix, skipping the reserved server
//! IP, and persists the new connection row atomically.
//!
//! Concurrent callers are serialized per target by taking a `FOR UPDATE`
//! row lock on the target row itself before computing the next free
//! address and inserting the connection row in the same transaction —
//! `spec.md` §5 additionally wants the unique constraint on
//! `(target, client_ip)` as a last-line defense, which
//! `migrations/0001_init.sql` already declares, so a racing insert that
//! slips past the row lock (e.g. a concurrent request against a
//! differently-cased target name) still fails loudly instead of silently
//! double-assigning an address.

use std::net::Ipv4Addr;

use ipnetwork::IpNetwork;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::ApiError;
use crate::models::Target;

/// Allocates the next free client IP for `target` and inserts the
/// connection row, returning it. Fails with `ApiError::AllocatorExhausted`
/// if the prefix has no free host left.
pub async fn allocate_connection(
    pool: &PgPool,
    target: &Target,
    device_id: Uuid,
    pubkey: &str,
) -> Result<crate::models::Connection, ApiError> {
    let mut tx = pool.begin().await?;

    sqlx::query("SELECT name FROM targets WHERE name = $1 FOR UPDATE")
        .bind(&target.name)
        .fetch_one(&mut *tx)
        .await?;

    let used: Vec<IpNetwork> =
        sqlx::query_scalar("SELECT client_ip FROM connections WHERE target = $1")
            .bind(&target.name)
            .fetch_all(&mut *tx)
            .await?;
    let used: std::collections::HashSet<Ipv4Addr> = used
        .into_iter()
        .filter_map(|n| match n.ip() {
            std::net::IpAddr::V4(v4) => Some(v4),
            std::net::IpAddr::V6(_) => None,
        })
        .collect();

    let server_ip = target.server_internal_addr();
    let network = ipnetwork::Ipv4Network::new(target.network_address(), target.network_cidr as u8)
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let candidate = next_free_ip(network, server_ip, &used).ok_or(ApiError::AllocatorExhausted)?;

    let client_ip: IpNetwork = IpNetwork::new(candidate.into(), 32).expect("valid host prefix");
    let row = sqlx::query_as::<_, crate::models::Connection>(
        "INSERT INTO connections (target, device_id, pubkey, client_ip, client_cidr)
         VALUES ($1, $2, $3, $4, $5)
         RETURNING *",
    )
    .bind(&target.name)
    .bind(device_id)
    .bind(pubkey)
    .bind(client_ip)
    .bind(target.network_cidr)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(row)
}

/// Iterates from `server_ip.next()` upward within `network`, returning the
/// first address not already in `used`. Deterministic per §4.4.
fn next_free_ip(
    network: ipnetwork::Ipv4Network,
    server_ip: Ipv4Addr,
    used: &std::collections::HashSet<Ipv4Addr>,
) -> Option<Ipv4Addr> {
    let start = u32::from(server_ip) + 1;
    let broadcast = u32::from(network.broadcast());
    for candidate in start..broadcast {
        let addr = Ipv4Addr::from(candidate);
        if addr == server_ip {
            continue;
        }
        if !used.contains(&addr) {
            return Some(addr);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocator_skips_server_ip_and_is_deterministic() {
        // spec.md §8 scenario 5: prefix 10.8.0.0/30 has exactly two usable
        // hosts (.1, .2); with the server on .1, only .2 is ever available.
        let network = ipnetwork::Ipv4Network::new(Ipv4Addr::new(10, 8, 0, 0), 30).unwrap();
        let server_ip = Ipv4Addr::new(10, 8, 0, 1);
        let mut used = std::collections::HashSet::new();

        let first = next_free_ip(network, server_ip, &used).unwrap();
        assert_eq!(first, Ipv4Addr::new(10, 8, 0, 2));

        used.insert(first);
        assert!(next_free_ip(network, server_ip, &used).is_none());
    }

    #[test]
    fn allocator_has_room_in_a_larger_prefix() {
        let network = ipnetwork::Ipv4Network::new(Ipv4Addr::new(10, 8, 0, 0), 23).unwrap();
        let server_ip = Ipv4Addr::new(10, 8, 0, 1);
        let mut used = std::collections::HashSet::new();

        let first = next_free_ip(network, server_ip, &used).unwrap();
        assert_eq!(first, Ipv4Addr::new(10, 8, 0, 2));

        used.insert(first);
        let second = next_free_ip(network, server_ip, &used).unwrap();
        assert_eq!(second, Ipv4Addr::new(10, 8, 0, 3));
    }
}
