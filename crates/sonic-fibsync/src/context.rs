//! Shared hardware handle for the L3 tables.

use crate::config::PlatformConfig;
use crate::warm_boot::WarmBootCache;
use parking_lot::{Mutex, MutexGuard};
use sonic_asic::{AsicL3Api, EgressId};
use std::sync::Arc;

/// Whether the caller already holds the hardware lock.
///
/// Operations that can be reached both from the routing path (lock held for
/// the whole update) and from asynchronous notifications (lock not held)
/// take this instead of having two copies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HwLockState {
    Held,
    NotHeld,
}

/// The ASIC handle plus everything that goes with it: the hardware-wide
/// lock, platform capabilities and the warm-boot cache.
pub struct HwContext {
    asic: Arc<dyn AsicL3Api>,
    hw_lock: Mutex<()>,
    platform: PlatformConfig,
    warm_boot: Mutex<WarmBootCache>,
}

impl HwContext {
    pub fn new(
        asic: Arc<dyn AsicL3Api>,
        platform: PlatformConfig,
        warm_boot: WarmBootCache,
    ) -> Arc<Self> {
        Arc::new(Self {
            asic,
            hw_lock: Mutex::new(()),
            platform,
            warm_boot: Mutex::new(warm_boot),
        })
    }

    pub fn asic(&self) -> &dyn AsicL3Api {
        self.asic.as_ref()
    }

    pub fn platform(&self) -> &PlatformConfig {
        &self.platform
    }

    /// Acquires the hardware-wide lock.
    pub fn lock(&self) -> MutexGuard<'_, ()> {
        self.hw_lock.lock()
    }

    pub fn is_locked(&self) -> bool {
        self.hw_lock.is_locked()
    }

    /// Runs `f` with the hardware lock held, taking it only if `state` says
    /// the caller does not already have it.
    pub fn run_locked<T>(&self, state: HwLockState, f: impl FnOnce() -> T) -> T {
        match state {
            HwLockState::Held => {
                debug_assert!(self.is_locked(), "caller claims hardware lock it does not hold");
                f()
            }
            HwLockState::NotHeld => {
                let _guard = self.hw_lock.lock();
                f()
            }
        }
    }

    /// Short-lived access to the warm-boot cache. Do not hold across calls
    /// back into the tables.
    pub fn warm_boot(&self) -> MutexGuard<'_, WarmBootCache> {
        self.warm_boot.lock()
    }

    /// Drop and to-CPU egress ids are pre-created by the chip, shared by
    /// every owner and never reference counted.
    pub fn is_fixed_egress(&self, id: EgressId) -> bool {
        id == self.asic.drop_egress_id() || id == self.asic.to_cpu_egress_id()
    }
}

impl std::fmt::Debug for HwContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HwContext")
            .field("platform", &self.platform)
            .field("locked", &self.is_locked())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sonic_asic::{SimAsic, SIM_DROP_EGRESS_ID, SIM_TO_CPU_EGRESS_ID};

    fn ctx() -> Arc<HwContext> {
        HwContext::new(
            Arc::new(SimAsic::new()),
            PlatformConfig::default(),
            WarmBootCache::cold(),
        )
    }

    #[test]
    fn test_run_locked_not_held_takes_lock() {
        let ctx = ctx();
        let held_inside = ctx.run_locked(HwLockState::NotHeld, || ctx.is_locked());
        assert!(held_inside);
        assert!(!ctx.is_locked());
    }

    #[test]
    fn test_run_locked_held_does_not_relock() {
        let ctx = ctx();
        let _guard = ctx.lock();
        let value = ctx.run_locked(HwLockState::Held, || 5);
        assert_eq!(value, 5);
        assert!(ctx.is_locked());
    }

    #[test]
    fn test_fixed_egress_ids() {
        let ctx = ctx();
        assert!(ctx.is_fixed_egress(SIM_DROP_EGRESS_ID));
        assert!(ctx.is_fixed_egress(SIM_TO_CPU_EGRESS_ID));
        assert!(!ctx.is_fixed_egress(EgressId(100_002)));
    }
}
