//! Persistence layer (`spec.md` §3, §6). Grounded on
//! `examples/original_source/cmd/control-plane/db.go`/`target.go`/
//! `device.go`: `ON CONFLICT DO NOTHING` insert idiom for get-or-create
//! rows, `Option`-returning lookups instead of the source's
//! empty-string-as-not-found convention. Crate: `sqlx` against Postgres,
//! the same combination `other_examples/manifests/Twister915-wirewarden`
//! pins for an adjacent WireGuard control tool.

use std::net::Ipv4Addr;

use ipnetwork::IpNetwork;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{Connection, Device, Target, DEFAULT_DNS_IP, DEFAULT_NETWORK_CIDR};

pub async fn connect(database_url: &str) -> Result<PgPool, sqlx::Error> {
    let pool = PgPool::connect(database_url).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    Ok(pool)
}

pub async fn get_target(pool: &PgPool, name: &str) -> Result<Option<Target>, sqlx::Error> {
    sqlx::query_as::<_, Target>("SELECT * FROM targets WHERE name = $1")
        .bind(name)
        .fetch_optional(pool)
        .await
}

pub async fn list_targets_for_principal(
    pool: &PgPool,
    principal: &str,
) -> Result<Vec<Target>, sqlx::Error> {
    sqlx::query_as::<_, Target>(
        "SELECT t.* FROM targets t
         LEFT JOIN target_acl a ON a.target = t.name
         WHERE t.owner = $1 OR a.principal = $1
         GROUP BY t.name",
    )
    .bind(principal)
    .fetch_all(pool)
    .await
}

/// `PUT /api/v1/target/{name}`, default network 10.8.0.0/23, DNS 1.1.1.1,
/// server internal 10.8.0.1/23 per `spec.md` §4.6. Returns `Ok(None)` if
/// the target already exists (caller maps that to a 400).
pub async fn create_target(
    pool: &PgPool,
    name: &str,
    owner: &str,
    network_ip: Ipv4Addr,
) -> Result<Option<Target>, sqlx::Error> {
    let network: IpNetwork = IpNetwork::new(network_ip.into(), DEFAULT_NETWORK_CIDR as u8)
        .expect("valid default prefix length");
    let dns: IpNetwork = IpNetwork::new(DEFAULT_DNS_IP.into(), 32).expect("valid host prefix");
    let server_internal_ip = first_host(network_ip);
    let server_internal: IpNetwork =
        IpNetwork::new(server_internal_ip.into(), DEFAULT_NETWORK_CIDR as u8)
            .expect("valid default prefix length");

    let result = sqlx::query(
        "INSERT INTO targets (name, owner, network_ip, network_cidr, dns_ip,
                               server_internal_ip, server_internal_cidr)
         VALUES ($1, $2, $3, $4, $5, $6, $7)
         ON CONFLICT (name) DO NOTHING",
    )
    .bind(name)
    .bind(owner)
    .bind(network)
    .bind(DEFAULT_NETWORK_CIDR)
    .bind(dns)
    .bind(server_internal)
    .bind(DEFAULT_NETWORK_CIDR)
    .execute(pool)
    .await?;

    if result.rows_affected() == 1 {
        get_target(pool, name).await
    } else {
        Ok(None)
    }
}

pub async fn is_authorized(pool: &PgPool, target: &Target, principal: &str) -> Result<bool, sqlx::Error> {
    if target.owner == principal {
        return Ok(true);
    }
    let row: Option<(String,)> =
        sqlx::query_as("SELECT principal FROM target_acl WHERE target = $1 AND principal = $2")
            .bind(&target.name)
            .bind(principal)
            .fetch_optional(pool)
            .await?;
    Ok(row.is_some())
}

pub async fn update_serve_info(
    pool: &PgPool,
    target: &str,
    pubkey: &str,
    public_ip: Ipv4Addr,
    public_port: i32,
) -> Result<(), sqlx::Error> {
    let ip: IpNetwork = IpNetwork::new(public_ip.into(), 32).expect("valid host prefix");
    sqlx::query(
        "UPDATE targets SET server_pubkey = $1, server_public_ip = $2,
                             server_public_vpn_port = $3, server_heartbeat = now()
         WHERE name = $4",
    )
    .bind(pubkey)
    .bind(ip)
    .bind(public_port)
    .bind(target)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn touch_heartbeat(pool: &PgPool, target: &str) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE targets SET server_heartbeat = now() WHERE name = $1")
        .bind(target)
        .execute(pool)
        .await?;
    Ok(())
}

/// Get-or-create a device row, following the source's `ON CONFLICT DO
/// NOTHING` + re-select idiom rather than `RETURNING`, so a racing insert
/// and an existing row both resolve to the same device-ID.
pub async fn get_or_create_device(
    pool: &PgPool,
    principal: &str,
    hardware_id: &str,
) -> Result<Device, sqlx::Error> {
    sqlx::query(
        "INSERT INTO devices (principal, hardware_id) VALUES ($1, $2)
         ON CONFLICT (principal, hardware_id) DO NOTHING",
    )
    .bind(principal)
    .bind(hardware_id)
    .execute(pool)
    .await?;

    sqlx::query_as::<_, Device>(
        "SELECT * FROM devices WHERE principal = $1 AND hardware_id = $2",
    )
    .bind(principal)
    .bind(hardware_id)
    .fetch_one(pool)
    .await
}

pub async fn get_device_by_id(pool: &PgPool, device_id: Uuid) -> Result<Option<Device>, sqlx::Error> {
    sqlx::query_as::<_, Device>("SELECT * FROM devices WHERE device_id = $1")
        .bind(device_id)
        .fetch_optional(pool)
        .await
}

pub async fn get_connection_by_device(
    pool: &PgPool,
    target: &str,
    device_id: Uuid,
) -> Result<Option<Connection>, sqlx::Error> {
    sqlx::query_as::<_, Connection>(
        "SELECT * FROM connections WHERE target = $1 AND device_id = $2",
    )
    .bind(target)
    .bind(device_id)
    .fetch_optional(pool)
    .await
}

pub async fn list_connections_for_target(
    pool: &PgPool,
    target: &str,
) -> Result<Vec<Connection>, sqlx::Error> {
    sqlx::query_as::<_, Connection>("SELECT * FROM connections WHERE target = $1")
        .bind(target)
        .fetch_all(pool)
        .await
}

pub async fn update_connection_pubkey(
    pool: &PgPool,
    id: Uuid,
    pubkey: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE connections SET pubkey = $1 WHERE id = $2")
        .bind(pubkey)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn delete_connection(
    pool: &PgPool,
    target: &str,
    device_id: Uuid,
) -> Result<Option<Connection>, sqlx::Error> {
    sqlx::query_as::<_, Connection>(
        "DELETE FROM connections WHERE target = $1 AND device_id = $2 RETURNING *",
    )
    .bind(target)
    .bind(device_id)
    .fetch_optional(pool)
    .await
}

fn first_host(network: Ipv4Addr) -> Ipv4Addr {
    let bits = u32::from(network);
    Ipv4Addr::from(bits | 1)
}
