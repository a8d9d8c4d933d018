use std::cmp::Reverse;
use std::collections::HashSet;

use foldhash::fast::RandomState;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{BuildError, Result};
use crate::hasher::{EMPTY_BUCKET, bucket_index, seeded_hash, slot_index};
use crate::{ChdBuildConfig, ChdTable};

/// Builds CHD tables from key-value pairs.
///
/// Keys are hashed into `bucket_ratio * N` buckets. Buckets are then placed
/// largest first: each one gets the first displacement value (existing ones
/// before freshly drawn random ones) that sends all of its keys to free
/// slots. The result maps the `N` keys onto `N` slots without collisions.
///
/// The produced table is fully compatible with [`ChdLookup`](crate::ChdLookup)
/// and with tables from other CHD builders using the same hash and layout.
#[derive(Debug, Default, Clone)]
pub struct ChdBuilder {
    config: ChdBuildConfig,
}

struct Bucket {
    index: usize,
    entries: Vec<usize>,
}

impl ChdBuilder {
    /// Replaces the whole build configuration.
    pub fn with_config(mut self, config: ChdBuildConfig) -> Self {
        self.config = config;
        self
    }

    /// Makes the build deterministic for a given input order.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.config.seed = Some(seed);
        self
    }

    /// Sets the number of buckets allocated per key.
    ///
    /// More buckets means smaller buckets that are easier to place, at the
    /// cost of a larger bucket table.
    pub fn with_bucket_ratio(mut self, ratio: f64) -> Self {
        self.config.bucket_ratio = ratio;
        self
    }

    /// Caps how many fresh displacement values are tried per bucket.
    pub fn with_max_attempts(mut self, attempts: u64) -> Self {
        self.config.max_attempts = attempts;
        self
    }

    pub fn config(&self) -> &ChdBuildConfig {
        &self.config
    }

    /// Consumes the builder and constructs a table from `entries`.
    ///
    /// # Errors
    ///
    /// Fails on duplicate keys, an invalid configuration, or when no
    /// collision-free displacement can be found for some bucket.
    pub fn build<K, V>(self, entries: impl IntoIterator<Item = (K, V)>) -> Result<ChdTable>
    where
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        self.config.validate()?;
        let entries: Vec<(K, V)> = entries.into_iter().collect();
        let n = entries.len();
        let m = self.config.bucket_count(n);
        if m > u32::MAX as usize {
            return Err(
                BuildError::InvalidConfig(format!("{m} buckets exceed the table format")).into(),
            );
        }

        let mut rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let mut r: Vec<u64> = vec![rng.random()];

        let mut seen: HashSet<&[u8], RandomState> =
            HashSet::with_capacity_and_hasher(n, RandomState::default());
        let mut hashes = Vec::with_capacity(n);
        let mut buckets: Vec<Bucket> = (0..m)
            .map(|index| Bucket {
                index,
                entries: Vec::new(),
            })
            .collect();
        for (pos, (key, _)) in entries.iter().enumerate() {
            let key = key.as_ref();
            if !seen.insert(key) {
                return Err(BuildError::DuplicateKey(key.to_vec()).into());
            }
            let h0 = seeded_hash(key, r[0]);
            hashes.push(h0);
            buckets[bucket_index(h0, m)].entries.push(pos);
        }
        buckets.sort_by_key(|b| Reverse(b.entries.len()));

        let mut slots: Vec<Option<usize>> = vec![None; n];
        let mut indices = vec![EMPTY_BUCKET; m];
        let mut targets = Vec::new();
        'next_bucket: for bucket in buckets.iter().filter(|b| !b.entries.is_empty()) {
            for (ri, &d) in r.iter().enumerate() {
                if try_place(bucket, &hashes, d, &slots, &mut targets) {
                    commit(bucket, &targets, &mut slots);
                    indices[bucket.index] = ri as u16;
                    continue 'next_bucket;
                }
            }

            for _ in 0..self.config.max_attempts {
                let d: u64 = rng.random();
                if try_place(bucket, &hashes, d, &slots, &mut targets) {
                    if r.len() >= EMPTY_BUCKET as usize {
                        return Err(BuildError::TooManyDisplacements(r.len()).into());
                    }
                    commit(bucket, &targets, &mut slots);
                    indices[bucket.index] = r.len() as u16;
                    r.push(d);
                    tracing::trace!(
                        bucket = bucket.index,
                        size = bucket.entries.len(),
                        displacements = r.len(),
                        "added displacement"
                    );
                    continue 'next_bucket;
                }
            }

            return Err(BuildError::DisplacementNotFound {
                bucket: bucket.index,
                size: bucket.entries.len(),
                attempts: self.config.max_attempts,
            }
            .into());
        }

        // Every key has a slot and there are as many slots as keys.
        let ordered = slots.into_iter().flatten().map(|pos| {
            let (key, value) = &entries[pos];
            (key.as_ref(), value.as_ref())
        });
        let table = ChdTable::new(r, indices, ordered)?;
        tracing::debug!(
            entries = table.len(),
            buckets = table.bucket_count(),
            displacements = table.r().len(),
            "built CHD table"
        );
        Ok(table)
    }
}

/// Computes the slots `bucket` would occupy under displacement `d` into
/// `targets`; true when all of them are free and distinct.
fn try_place(
    bucket: &Bucket,
    hashes: &[u64],
    d: u64,
    slots: &[Option<usize>],
    targets: &mut Vec<usize>,
) -> bool {
    targets.clear();
    for &pos in &bucket.entries {
        let t = slot_index(hashes[pos], d, slots.len());
        if slots[t].is_some() || targets.contains(&t) {
            return false;
        }
        targets.push(t);
    }
    true
}

fn commit(bucket: &Bucket, targets: &[usize], slots: &mut [Option<usize>]) {
    for (&pos, &t) in bucket.entries.iter().zip(targets) {
        slots[t] = Some(pos);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ChdError, ChdLookup};

    #[test]
    fn test_build_sample() {
        let data = [
            ("one", "1"),
            ("two", "2"),
            ("three", "3"),
            ("four", "4"),
            ("five", "5"),
            ("six", "6"),
            ("seven", "7"),
        ];
        let table = ChdBuilder::default().build(data).unwrap();
        assert_eq!(table.len(), 7);
        assert_eq!(table.bucket_count(), 3);

        let lookup = ChdLookup::new(&table);
        for (k, v) in data {
            assert_eq!(lookup.get(k), Some(v.as_bytes()));
        }
        assert_eq!(lookup.get("monkey"), None);
    }

    #[test]
    fn test_seeded_build_is_deterministic() {
        let data: Vec<_> = (0..300u32).map(|i| (i.to_be_bytes(), i.to_le_bytes())).collect();
        let a = ChdBuilder::default().with_seed(11).build(data.clone()).unwrap();
        let b = ChdBuilder::default().with_seed(11).build(data).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_single_and_empty() {
        let table = ChdBuilder::default().build([("k", "v")]).unwrap();
        assert_eq!(table.r().len(), 1);
        assert_eq!(table.indices(), &[0]);
        assert_eq!(table.lookup().get("k"), Some(&b"v"[..]));

        let table = ChdBuilder::default()
            .with_seed(1)
            .build(Vec::<(&str, &str)>::new())
            .unwrap();
        assert_eq!(table.r().len(), 1);
        assert_eq!(table.indices(), &[EMPTY_BUCKET]);
        assert!(table.is_empty());
    }

    #[test]
    fn test_duplicate_key() {
        let err = ChdBuilder::default()
            .build([("a", "1"), ("b", "2"), ("a", "3")])
            .unwrap_err();
        assert!(matches!(err, ChdError::Build(BuildError::DuplicateKey(ref k)) if k == b"a"));
    }

    #[test]
    fn test_bucket_ratio() {
        let data: Vec<_> = (0..100u32).map(|i| (format!("k{i}"), format!("v{i}"))).collect();
        let table = ChdBuilder::default()
            .with_seed(2)
            .with_bucket_ratio(1.0)
            .build(data.iter().map(|(k, v)| (k, v)))
            .unwrap();
        assert_eq!(table.bucket_count(), 100);
        assert!(table.info().empty_buckets > 0);
        for (k, v) in &data {
            assert_eq!(table.lookup().get(k), Some(v.as_bytes()));
        }
    }

    #[test]
    fn test_displacement_not_found() {
        // One bucket of 64 keys into 64 slots: neither the seed nor a random
        // displacement is likely to yield a permutation.
        let data: Vec<_> = (0..64u32).map(|i| (format!("key-{i}"), "")).collect();
        let err = ChdBuilder::default()
            .with_seed(3)
            .with_bucket_ratio(0.001)
            .with_max_attempts(4)
            .build(data)
            .unwrap_err();
        assert!(matches!(
            err,
            ChdError::Build(BuildError::DisplacementNotFound {
                bucket: 0,
                size: 64,
                attempts: 4
            })
        ));
    }

    #[test]
    fn test_invalid_config() {
        let err = ChdBuilder::default()
            .with_bucket_ratio(-1.0)
            .build([("a", "1")])
            .unwrap_err();
        assert!(matches!(err, ChdError::Build(BuildError::InvalidConfig(_))));

        for ratio in [1e30, f64::INFINITY, f64::NAN] {
            let err = ChdBuilder::default()
                .with_bucket_ratio(ratio)
                .build([("a", "1")])
                .unwrap_err();
            assert!(matches!(err, ChdError::Build(BuildError::InvalidConfig(_))));
        }
    }
}
