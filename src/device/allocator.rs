/// Deterministic device address allocation
///
/// Addresses are a pure function of (device id, public key, creation
/// timestamp): no persisted counter, and the same tuple always re-derives
/// the same pair. Collisions are possible because the mapping is a hash,
/// so callers must run `ensure_unique` before persisting; a hit is a loud
/// error, never a silent reassignment.
use crate::error::{VpnError, VpnResult};
use crate::words::{ADJECTIVES, NOUNS};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::net::{Ipv4Addr, Ipv6Addr};

/// Assigned block: 10.0.0.0/8, with 10.0.0.0/24 reserved for infrastructure
const IPV4_BLOCK: u8 = 10;

/// Fixed unique-local /48 prefix for device IPv6 addresses
const IPV6_PREFIX: [u16; 3] = [0xfd74, 0x7761, 0x7264];

/// Fixed subnet id under the /48
const IPV6_SUBNET: u16 = 0x0001;

/// Salt that separates the IPv6 interface-id derivation from the IPv4 one
const IPV6_SALT: &[u8] = b"ifid";

/// Bounded attempts at a word-list device name before the hex fallback
const NAME_ATTEMPTS: usize = 10;

/// Derived address pair for a device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceAddresses {
    pub ipv4: Ipv4Addr,
    pub ipv6: Ipv6Addr,
}

impl DeviceAddresses {
    /// CIDR strings as consumed by tunnel config generation
    pub fn ipv4_cidr(&self) -> String {
        format!("{}/32", self.ipv4)
    }

    pub fn ipv6_cidr(&self) -> String {
        format!("{}/128", self.ipv6)
    }
}

/// Derive both addresses from the device's stable identity tuple
pub fn allocate(
    device_id: &str,
    public_key: &str,
    created_at: DateTime<Utc>,
) -> DeviceAddresses {
    DeviceAddresses {
        ipv4: derive_ipv4(device_id, public_key, created_at),
        ipv6: derive_ipv6(device_id, public_key, created_at),
    }
}

fn tuple_digest(salt: &[u8], device_id: &str, public_key: &str, created_at: DateTime<Utc>) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(device_id.as_bytes());
    hasher.update(public_key.as_bytes());
    hasher.update(created_at.timestamp_micros().to_be_bytes());
    hasher.finalize().into()
}

/// Map hash bits into 10.0.0.0/8, keeping out of the reserved first /24
/// and of host-reserved final octets
fn derive_ipv4(device_id: &str, public_key: &str, created_at: DateTime<Utc>) -> Ipv4Addr {
    let hash = tuple_digest(b"", device_id, public_key, created_at);

    let b = hash[0];
    let mut c = hash[1];
    let mut d = hash[2];

    // 10.0.0.0/24 is infrastructure; remap deterministically
    if b == 0 && c == 0 {
        c = 1;
    }
    // Avoid network/broadcast-style host octets
    if d == 0 {
        d = 1;
    } else if d == 255 {
        d = 254;
    }

    Ipv4Addr::new(IPV4_BLOCK, b, c, d)
}

/// 64-bit interface id from a differently-salted hash of the same tuple,
/// under the fixed ULA /48 plus subnet id
fn derive_ipv6(device_id: &str, public_key: &str, created_at: DateTime<Utc>) -> Ipv6Addr {
    let hash = tuple_digest(IPV6_SALT, device_id, public_key, created_at);

    let seg = |i: usize| u16::from_be_bytes([hash[i], hash[i + 1]]);

    Ipv6Addr::new(
        IPV6_PREFIX[0],
        IPV6_PREFIX[1],
        IPV6_PREFIX[2],
        IPV6_SUBNET,
        seg(0),
        seg(2),
        seg(4),
        seg(6),
    )
}

/// Reject the pair if either derived address is already taken by another
/// device. The UNIQUE constraints on the device table remain the backstop
/// for the scan-then-insert race.
pub async fn ensure_unique(
    db: &SqlitePool,
    addresses: &DeviceAddresses,
    exclude_device_id: Option<&str>,
) -> VpnResult<()> {
    let ipv4 = addresses.ipv4.to_string();
    let ipv6 = addresses.ipv6.to_string();

    let clash: Option<String> = sqlx::query_scalar(
        "SELECT id FROM device
         WHERE (ipv4 = ?1 OR ipv6 = ?2) AND id != ?3
         LIMIT 1",
    )
    .bind(&ipv4)
    .bind(&ipv6)
    .bind(exclude_device_id.unwrap_or(""))
    .fetch_optional(db)
    .await?;

    if let Some(existing) = clash {
        return Err(VpnError::AddressCollision(format!(
            "derived address {} / {} already assigned to device {}",
            ipv4, ipv6, existing
        )));
    }

    Ok(())
}

/// Generate a human-friendly device name, unique among existing devices.
/// Naming never blocks device creation: after bounded attempts, fall back
/// to a random hex suffix.
pub async fn allocate_name(db: &SqlitePool) -> VpnResult<String> {
    for _ in 0..NAME_ATTEMPTS {
        let candidate = random_name();

        let taken: Option<String> = sqlx::query_scalar("SELECT id FROM device WHERE name = ?1")
            .bind(&candidate)
            .fetch_optional(db)
            .await?;

        if taken.is_none() {
            return Ok(candidate);
        }
    }

    Ok(fallback_name())
}

// The thread-local rng is not Send, so it must not live across an await
fn random_name() -> String {
    use rand::seq::SliceRandom;
    use rand::Rng;

    let mut rng = rand::thread_rng();
    let adjective = ADJECTIVES.choose(&mut rng).unwrap_or(&"swift");
    let noun = NOUNS.choose(&mut rng).unwrap_or(&"otter");
    let number: u16 = rng.gen_range(1..100);
    format!("{}-{}-{}", adjective, noun, number)
}

fn fallback_name() -> String {
    use rand::RngCore;

    let mut bytes = [0u8; 4];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("device-{}", hex::encode(bytes))
}
