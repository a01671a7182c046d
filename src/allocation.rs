//! Deterministic visitor bucketing.
//!
//! The hash function is part of the artifact contract: changing it reshuffles every visitor's
//! bucket, so it may only change together with the supported rule set major version.

const TOTAL_BUCKETS: u32 = 10_000;

pub trait Hasher {
    fn hash32(&self, input: &str) -> i32;
}

/// MurmurHash3 (x86, 32-bit, seed 0) over the UTF-16 code units of the input. This is the
/// default (and only) hasher.
pub struct Murmur3Hasher;

impl Hasher for Murmur3Hasher {
    fn hash32(&self, input: &str) -> i32 {
        murmur3_32_utf16(input, 0)
    }
}

/// Allocation of `visitor_id` within activity `seed`, as a percentage in `[0, 100)`.
///
/// Anything after the first `.` of the visitor id (a location hint such as `.28_0`) is ignored so
/// the bucket stays stable across edge clusters.
pub fn compute_allocation(hasher: &impl Hasher, client: &str, seed: &str, visitor_id: &str) -> f64 {
    let visitor_id = match visitor_id.find('.') {
        Some(index) if index > 0 => &visitor_id[..index],
        _ => visitor_id,
    };
    let hash = hasher.hash32(&format!("{client}.{seed}.{visitor_id}"));
    let bucket = hash.unsigned_abs() % TOTAL_BUCKETS;
    (f64::from(bucket) / f64::from(TOTAL_BUCKETS)) * 100.0
}

const C1: u32 = 0xcc9e_2d51;
const C2: u32 = 0x1b87_3593;

fn murmur3_32_utf16(input: &str, seed: u32) -> i32 {
    let units: Vec<u16> = input.encode_utf16().collect();

    let mut h1 = seed;
    let mut pairs = units.chunks_exact(2);
    for pair in &mut pairs {
        let k1 = u32::from(pair[0]) | (u32::from(pair[1]) << 16);
        h1 = mix_h1(h1, mix_k1(k1));
    }
    if let [last] = pairs.remainder() {
        h1 ^= mix_k1(u32::from(*last));
    }

    // Length is in bytes.
    fmix(h1, 2 * units.len() as u32) as i32
}

fn mix_k1(k1: u32) -> u32 {
    k1.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2)
}

fn mix_h1(h1: u32, k1: u32) -> u32 {
    (h1 ^ k1)
        .rotate_left(13)
        .wrapping_mul(5)
        .wrapping_add(0xe654_6b64)
}

fn fmix(mut h1: u32, length: u32) -> u32 {
    h1 ^= length;
    h1 ^= h1 >> 16;
    h1 = h1.wrapping_mul(0x85eb_ca6b);
    h1 ^= h1 >> 13;
    h1 = h1.wrapping_mul(0xc2b2_ae35);
    h1 ^= h1 >> 16;
    h1
}

#[cfg(test)]
mod tests {
    use super::{compute_allocation, Hasher, Murmur3Hasher};

    #[test]
    fn murmur3_known_values() {
        assert_eq!(Murmur3Hasher.hash32(""), 0);
        assert_eq!(Murmur3Hasher.hash32("a"), 1867108634);
        assert_eq!(Murmur3Hasher.hash32("ab"), 374890698);
        assert_eq!(Murmur3Hasher.hash32("hello"), -675079799);
        assert_eq!(
            Murmur3Hasher.hash32("someClientId.123456.tntId123"),
            -466158993
        );
    }

    #[test]
    fn allocation_known_values() {
        assert_eq!(
            compute_allocation(&Murmur3Hasher, "someClientId", "123456", "tntId123"),
            89.92999999999999
        );
        assert_eq!(
            compute_allocation(
                &Murmur3Hasher,
                "targettesting",
                "125880",
                "338e3c1e51f7416a8e1ccba4f81acea0"
            ),
            92.81
        );
        assert_eq!(
            compute_allocation(&Murmur3Hasher, "acme", "42", "visitor-1"),
            13.0
        );
    }

    #[test]
    fn location_hint_is_ignored() {
        assert_eq!(
            compute_allocation(&Murmur3Hasher, "someClientId", "123456", "tntId123.28_0"),
            compute_allocation(&Murmur3Hasher, "someClientId", "123456", "tntId123")
        );
    }

    #[test]
    fn allocation_is_deterministic_and_in_range() {
        for i in 0..500 {
            let visitor = format!("visitor-{i}");
            let first = compute_allocation(&Murmur3Hasher, "acme", "7", &visitor);
            let second = compute_allocation(&Murmur3Hasher, "acme", "7", &visitor);
            assert_eq!(first, second);
            assert!((0.0..100.0).contains(&first), "{first} out of range");
        }
    }

    #[test]
    fn min_hash_does_not_overflow() {
        struct MinHasher;
        impl Hasher for MinHasher {
            fn hash32(&self, _input: &str) -> i32 {
                i32::MIN
            }
        }
        // |i32::MIN| = 2147483648, 2147483648 % 10000 = 3648
        let allocation = compute_allocation(&MinHasher, "c", "1", "v");
        assert!((allocation - 36.48).abs() < 1e-9, "{allocation}");
    }
}
