//! Profitability registry.
//!
//! Rates and the stable set sit behind separate locks that are never held
//! together. Force mode reports a fixed high rate for every known algorithm
//! and is checked on every read and write.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::cache::{read_cache, write_cache};
use super::{AlgorithmId, ProfitabilityError};
use crate::telemetry;

/// Rate reported for every known algorithm while force mode is on.
pub const FORCED_PAYING_RATE: f64 = 10_000.0;

/// Algorithms treated as stable before the first stable-set update arrives.
pub const BASELINE_STABLE_ALGORITHMS: [u16; 17] =
    [40, 20, 44, 39, 50, 36, 14, 52, 53, 55, 48, 51, 8, 54, 24, 47, 43];

/// Rate snapshot applied before the cache so a cold start is not all zeros.
pub const BOOTSTRAP_RATES: &[(u16, f64)] = &[
    (40, 4.317857648e-06),
    (20, 0.00198938141),
    (44, 226.2915601),
    (21, 7.563976343e-10),
    (39, 45325.19832),
    (50, 146090.0511),
    (36, 570.5138002),
    (14, 5.106136802e-06),
    (52, 0.002518868836),
    (53, 20.26181287),
    (55, 9564.047443),
    (28, 9.67893707e-10),
    (5, 3.055966374e-06),
    (48, 1.45517891e-07),
    (51, 0.0),
    (33, 0.0001772506288),
    (42, 1.9),
    (23, 6.620672934e-07),
    (46, 0.001228682944),
    (8, 0.005096720781),
    (54, 2267.308038),
    (7, 1e-07),
    (32, 6.552168258e-05),
    (24, 2.705435444),
];

#[derive(Debug, Clone)]
pub struct ProfitabilityConfig {
    /// Every algorithm the host can mine. Updates for other ids are ignored.
    pub known_algorithms: Vec<AlgorithmId>,
    pub baseline_stable: Vec<AlgorithmId>,
    pub bootstrap: Vec<(AlgorithmId, f64)>,
    pub cache_path: Option<PathBuf>,
    /// Persist rates on every bulk update.
    pub use_cache: bool,
    pub force_override: bool,
}

impl Default for ProfitabilityConfig {
    fn default() -> Self {
        let bootstrap: Vec<(AlgorithmId, f64)> =
            BOOTSTRAP_RATES.iter().map(|(id, rate)| (AlgorithmId(*id), *rate)).collect();
        let baseline_stable: Vec<AlgorithmId> =
            BASELINE_STABLE_ALGORITHMS.iter().copied().map(AlgorithmId).collect();
        let mut known: Vec<AlgorithmId> =
            bootstrap.iter().map(|(id, _)| *id).chain(baseline_stable.iter().copied()).collect();
        known.sort();
        known.dedup();
        Self {
            known_algorithms: known,
            baseline_stable,
            bootstrap,
            cache_path: None,
            use_cache: true,
            force_override: false,
        }
    }
}

/// Change applied to the stable set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StableSetDiff {
    pub added: Vec<AlgorithmId>,
    pub removed: Vec<AlgorithmId>,
}

impl StableSetDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

impl fmt::Display for StableSetDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("no change");
        }
        let join = |ids: &[AlgorithmId]| ids.iter().map(|id| id.to_string()).collect::<Vec<_>>().join(", ");
        write!(f, "added [{}], removed [{}]", join(&self.added), join(&self.removed))
    }
}

pub struct ProfitabilityRegistry {
    rates: Mutex<HashMap<AlgorithmId, f64>>,
    stable: Mutex<HashSet<AlgorithmId>>,
    has_data: AtomicBool,
    force_override: AtomicBool,
    use_cache: bool,
    cache_path: Option<PathBuf>,
}

impl ProfitabilityRegistry {
    /// Rates start at zero, then the bootstrap snapshot and the cache (if any)
    /// are applied in that order.
    pub fn new(config: ProfitabilityConfig) -> Self {
        let mut rates: HashMap<AlgorithmId, f64> =
            config.known_algorithms.iter().map(|id| (*id, 0.0)).collect();
        for (id, rate) in &config.bootstrap {
            if let Some(slot) = rates.get_mut(id) {
                *slot = *rate;
            }
        }

        let mut has_data = false;
        if let Some(path) = &config.cache_path {
            match read_cache(path) {
                Ok(Some(cached)) => {
                    for (id, rate) in cached {
                        if let Some(slot) = rates.get_mut(&id) {
                            *slot = rate;
                            has_data = true;
                        }
                    }
                    debug!(path = %path.display(), "profitability cache applied");
                }
                Ok(None) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "ignoring profitability cache"),
            }
        }

        Self {
            rates: Mutex::new(rates),
            stable: Mutex::new(config.baseline_stable.iter().copied().collect()),
            has_data: AtomicBool::new(has_data),
            force_override: AtomicBool::new(config.force_override),
            use_cache: config.use_cache,
            cache_path: config.cache_path,
        }
    }

    pub fn is_forced(&self) -> bool {
        self.force_override.load(Ordering::SeqCst)
    }

    pub fn set_force_override(&self, forced: bool) {
        self.force_override.store(forced, Ordering::SeqCst);
    }

    /// Replace the rates of every known algorithm present in `rates`.
    ///
    /// Unknown ids are ignored. Returns how many rates were applied.
    pub fn update_all(&self, rates: &HashMap<AlgorithmId, f64>) -> usize {
        let forced = self.is_forced();
        let mut applied = 0;
        {
            let mut current = self.rates.lock();
            for (id, rate) in rates {
                if let Some(slot) = current.get_mut(id) {
                    *slot = if forced { FORCED_PAYING_RATE } else { *rate };
                    applied += 1;
                }
            }
            if self.use_cache && !forced {
                if let Some(path) = &self.cache_path {
                    if let Err(e) = write_cache(path, &current) {
                        warn!(path = %path.display(), error = %e, "failed to write profitability cache");
                    }
                }
            }
        }
        self.has_data.store(true, Ordering::SeqCst);
        telemetry::record_profitability_update("bulk");
        debug!(applied, "paying rates updated");
        applied
    }

    pub fn update_one(&self, id: AlgorithmId, rate: f64) -> Result<(), ProfitabilityError> {
        let forced = self.is_forced();
        {
            let mut current = self.rates.lock();
            let slot = current.get_mut(&id).ok_or(ProfitabilityError::UnknownAlgorithm(id))?;
            *slot = if forced { FORCED_PAYING_RATE } else { rate };
        }
        self.has_data.store(true, Ordering::SeqCst);
        telemetry::record_profitability_update("single");
        Ok(())
    }

    /// Replace the stable set and report what changed.
    pub fn update_stable_set(&self, ids: impl IntoIterator<Item = AlgorithmId>) -> StableSetDiff {
        let next: HashSet<AlgorithmId> = ids.into_iter().collect();
        let mut diff = {
            let mut stable = self.stable.lock();
            let diff = StableSetDiff {
                added: next.difference(&stable).copied().collect(),
                removed: stable.difference(&next).copied().collect(),
            };
            *stable = next;
            diff
        };
        diff.added.sort();
        diff.removed.sort();
        info!(added = ?diff.added, removed = ?diff.removed, "stable algorithms updated: {}", diff);
        diff
    }

    pub fn try_get(&self, id: AlgorithmId) -> Option<f64> {
        let rate = self.rates.lock().get(&id).copied()?;
        Some(if self.is_forced() { FORCED_PAYING_RATE } else { rate })
    }

    pub fn is_stable(&self, id: AlgorithmId) -> bool {
        self.stable.lock().contains(&id)
    }

    pub fn stable_set(&self) -> HashSet<AlgorithmId> {
        self.stable.lock().clone()
    }

    /// Rates of the stable (`stable = true`) or unstable algorithms.
    pub fn filtered_by_stability(&self, stable: bool) -> HashMap<AlgorithmId, f64> {
        let stable_set = self.stable_set();
        let forced = self.is_forced();
        self.rates
            .lock()
            .iter()
            .filter(|(id, _)| stable_set.contains(*id) == stable)
            .map(|(id, rate)| (*id, if forced { FORCED_PAYING_RATE } else { *rate }))
            .collect()
    }

    pub fn snapshot(&self) -> HashMap<AlgorithmId, f64> {
        let forced = self.is_forced();
        self.rates
            .lock()
            .iter()
            .map(|(id, rate)| (*id, if forced { FORCED_PAYING_RATE } else { *rate }))
            .collect()
    }

    pub fn has_data(&self) -> bool {
        self.is_forced() || self.has_data.load(Ordering::SeqCst)
    }

    /// Poll once a second until data arrives or `seconds` polls have passed.
    pub async fn wait_on_data(&self, seconds: u64) -> bool {
        for _ in 0..seconds {
            if self.has_data() {
                return true;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        self.has_data()
    }
}
