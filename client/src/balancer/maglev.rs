//! Maglev lookup-table selection

use parking_lot::Mutex;

use polaris_core::{Instance, LoadBalanceType, LoadBalancer, SelectionCriteria};

use super::{fmix64, hash_str};

/// Prime table size; the usual Maglev choice, large enough that backend
/// churn disturbs at most a ~1/M share of the keyspace per change
const TABLE_SIZE: usize = 65537;

struct LookupTable {
    /// Order-insensitive fingerprint of the backend set
    signature: u64,
    backends: Vec<String>,
    /// Slot -> index into `backends`
    slots: Vec<u32>,
}

/// Maglev consistent hashing with a cached lookup table
///
/// The table is rebuilt only when the backend set changes; selections in
/// between are a single modulo and an array read.
pub struct MaglevBalancer {
    table: Mutex<Option<LookupTable>>,
}

impl MaglevBalancer {
    pub fn new() -> Self {
        Self {
            table: Mutex::new(None),
        }
    }
}

impl Default for MaglevBalancer {
    fn default() -> Self {
        Self::new()
    }
}

fn signature_of(instances: &[Instance]) -> u64 {
    instances
        .iter()
        .fold(instances.len() as u64, |acc, instance| {
            acc.wrapping_add(fmix64(hash_str(&instance.id)))
        })
}

fn build_table(instances: &[Instance]) -> LookupTable {
    let mut backends: Vec<String> = instances.iter().map(|i| i.id.clone()).collect();
    backends.sort_unstable();

    let n = backends.len();
    let mut offsets = Vec::with_capacity(n);
    let mut skips = Vec::with_capacity(n);
    for backend in &backends {
        let h = hash_str(backend);
        offsets.push((h % TABLE_SIZE as u64) as usize);
        skips.push((fmix64(h) % (TABLE_SIZE as u64 - 1) + 1) as usize);
    }

    let mut next = vec![0usize; n];
    let mut slots = vec![u32::MAX; TABLE_SIZE];
    let mut filled = 0usize;
    while filled < TABLE_SIZE {
        for backend in 0..n {
            // Walk this backend's permutation until a free slot shows up
            let slot = loop {
                let candidate = (offsets[backend] + next[backend] * skips[backend]) % TABLE_SIZE;
                next[backend] += 1;
                if slots[candidate] == u32::MAX {
                    break candidate;
                }
            };
            slots[slot] = backend as u32;
            filled += 1;
            if filled == TABLE_SIZE {
                break;
            }
        }
    }

    LookupTable {
        signature: signature_of(instances),
        backends,
        slots,
    }
}

impl LoadBalancer for MaglevBalancer {
    fn name(&self) -> &str {
        "maglev"
    }

    fn load_balance_type(&self) -> LoadBalanceType {
        LoadBalanceType::Maglev
    }

    fn choose_instance(
        &self,
        criteria: &SelectionCriteria,
        instances: &[Instance],
    ) -> Option<Instance> {
        if instances.is_empty() {
            return None;
        }
        let signature = signature_of(instances);
        let mut cached = self.table.lock();
        if !cached
            .as_ref()
            .is_some_and(|table| table.signature == signature)
        {
            *cached = Some(build_table(instances));
        }
        let table = cached.as_ref()?;
        let slot = (criteria.hash_key % TABLE_SIZE as u64) as usize;
        let backend_id = table.backends.get(table.slots[slot] as usize)?;
        instances
            .iter()
            .find(|instance| &instance.id == backend_id)
            .cloned()
    }
}
