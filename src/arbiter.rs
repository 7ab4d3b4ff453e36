use crate::insts::ExeUnitClass;
use crate::wavefront::{WavefrontPool, Wavefronts, WfId, WfState};

/// Selects wavefronts from the pools for one scheduler step.
pub trait WfArbiter {
    fn arbitrate(&mut self, pools: &[WavefrontPool], wavefronts: &Wavefronts) -> Vec<WfId>;
}

/// Picks at most one wavefront to fetch for: the one that has waited
/// longest since its last fetch.
#[derive(Debug, Clone)]
pub struct FetchArbiter {
    inst_buffer_capacity: usize,
}

impl FetchArbiter {
    pub fn new(inst_buffer_capacity: usize) -> Self {
        FetchArbiter {
            inst_buffer_capacity,
        }
    }

    pub fn select(&self, pools: &[WavefrontPool], wavefronts: &Wavefronts) -> Option<WfId> {
        let mut oldest: Option<(WfId, u64)> = None;
        for pool in pools {
            for id in pool.iter() {
                let wf = match wavefronts.get(id) {
                    Some(wf) => wf,
                    None => continue,
                };
                if wf.state != WfState::Ready
                    || wf.is_fetching
                    || wf.inst_to_issue.is_some()
                    || wf.inst_buffer.len() >= self.inst_buffer_capacity
                {
                    continue;
                }
                match oldest {
                    Some((_, time)) if time <= wf.last_fetch_time => {}
                    _ => oldest = Some((id, wf.last_fetch_time)),
                }
            }
        }
        oldest.map(|(id, _)| id)
    }
}

impl WfArbiter for FetchArbiter {
    fn arbitrate(&mut self, pools: &[WavefrontPool], wavefronts: &Wavefronts) -> Vec<WfId> {
        self.select(pools, wavefronts).into_iter().collect()
    }
}

/// Picks decoded wavefronts to issue, at most one per execution-unit
/// class, rotating the starting pool every cycle.
#[derive(Debug, Clone, Default)]
pub struct IssueArbiter {
    next_pool: usize,
}

impl IssueArbiter {
    pub fn new() -> Self {
        IssueArbiter::default()
    }
}

impl WfArbiter for IssueArbiter {
    fn arbitrate(&mut self, pools: &[WavefrontPool], wavefronts: &Wavefronts) -> Vec<WfId> {
        if pools.is_empty() {
            return Vec::new();
        }
        let start = self.next_pool % pools.len();
        self.next_pool = (start + 1) % pools.len();

        let mut taken = [false; ExeUnitClass::NUM_ISSUE_SLOTS];
        let mut selected = Vec::new();
        for i in 0..pools.len() {
            let pool = &pools[(start + i) % pools.len()];
            for id in pool.iter() {
                let wf = match wavefronts.get(id) {
                    Some(wf) => wf,
                    None => continue,
                };
                if wf.state != WfState::Ready {
                    continue;
                }
                let slot = match wf.inst_to_issue.as_ref() {
                    Some(inst) => inst.exe_unit.issue_slot(),
                    None => continue,
                };
                if !taken[slot] {
                    taken[slot] = true;
                    selected.push(id);
                }
            }
        }
        selected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CuConfig;
    use crate::insts::SpecialOp;
    use crate::testing::{add_wavefront, inst_with_class, test_context};
    use proptest::prelude::*;

    #[test]
    fn fetch_prefers_oldest_fetch_time() {
        let config = CuConfig::default();
        let mut ctx = test_context(&config);
        let a = add_wavefront(&mut ctx, 0, 0);
        let b = add_wavefront(&mut ctx, 1, 0);
        let c = add_wavefront(&mut ctx, 2, 0);
        ctx.wavefronts[a].last_fetch_time = 10;
        ctx.wavefronts[b].last_fetch_time = 3;
        ctx.wavefronts[c].last_fetch_time = 3;

        let mut arbiter = FetchArbiter::new(256);
        assert_eq!(arbiter.arbitrate(&ctx.wf_pools, &ctx.wavefronts), vec![b]);

        ctx.wavefronts[b].is_fetching = true;
        assert_eq!(arbiter.arbitrate(&ctx.wf_pools, &ctx.wavefronts), vec![c]);

        ctx.wavefronts[c].inst_buffer = vec![0; 256];
        assert_eq!(arbiter.arbitrate(&ctx.wf_pools, &ctx.wavefronts), vec![a]);

        ctx.wavefronts[a].state = WfState::AtBarrier;
        assert!(arbiter.arbitrate(&ctx.wf_pools, &ctx.wavefronts).is_empty());
    }

    #[test]
    fn issue_takes_one_per_class_and_rotates() {
        let config = CuConfig::default();
        let mut ctx = test_context(&config);
        let a = add_wavefront(&mut ctx, 0, 0);
        let b = add_wavefront(&mut ctx, 1, 0);
        let c = add_wavefront(&mut ctx, 1, 0);
        ctx.wavefronts[a].inst_to_issue = Some(inst_with_class(ExeUnitClass::Simd));
        ctx.wavefronts[b].inst_to_issue = Some(inst_with_class(ExeUnitClass::Simd));
        ctx.wavefronts[c].inst_to_issue =
            Some(inst_with_class(ExeUnitClass::Special(SpecialOp::Nop)));

        let mut arbiter = IssueArbiter::new();
        assert_eq!(arbiter.arbitrate(&ctx.wf_pools, &ctx.wavefronts), vec![a, c]);
        assert_eq!(arbiter.arbitrate(&ctx.wf_pools, &ctx.wavefronts), vec![b, c]);
    }

    fn class_strategy() -> impl Strategy<Value = Option<ExeUnitClass>> {
        prop::option::of(prop::sample::select(vec![
            ExeUnitClass::Branch,
            ExeUnitClass::Scalar,
            ExeUnitClass::Simd,
            ExeUnitClass::Lds,
            ExeUnitClass::VectorMem,
            ExeUnitClass::Special(SpecialOp::WaitCnt),
            ExeUnitClass::Special(SpecialOp::Barrier),
        ]))
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(128))]

        #[test]
        fn issue_never_picks_two_of_a_class(
            waves in prop::collection::vec((0usize..4, class_strategy(), any::<bool>()), 0..40),
            rounds in 1usize..5,
        ) {
            let config = CuConfig::default();
            let mut ctx = test_context(&config);
            for (pool, class, ready) in waves {
                if ctx.wf_pools[pool].is_full() {
                    continue;
                }
                let id = add_wavefront(&mut ctx, pool, 0);
                let wf = &mut ctx.wavefronts[id];
                wf.inst_to_issue = class.map(inst_with_class);
                if !ready {
                    wf.state = WfState::Running;
                }
            }

            let mut arbiter = IssueArbiter::new();
            for _ in 0..rounds {
                let picked = arbiter.arbitrate(&ctx.wf_pools, &ctx.wavefronts);
                let mut seen = [false; ExeUnitClass::NUM_ISSUE_SLOTS];
                for id in picked {
                    let wf = &ctx.wavefronts[id];
                    prop_assert_eq!(wf.state, WfState::Ready);
                    let slot = match wf.inst_to_issue.as_ref() {
                        Some(inst) => inst.exe_unit.issue_slot(),
                        None => return Err(TestCaseError::fail("picked wavefront without instruction")),
                    };
                    prop_assert!(!seen[slot]);
                    seen[slot] = true;
                }
            }
        }

        #[test]
        fn fetch_picks_an_eligible_minimum(
            times in prop::collection::vec((0u64..20, any::<bool>()), 1..30),
        ) {
            let config = CuConfig::default();
            let mut ctx = test_context(&config);
            for (i, (time, fetching)) in times.iter().enumerate() {
                let pool = i % 4;
                if ctx.wf_pools[pool].is_full() {
                    continue;
                }
                let id = add_wavefront(&mut ctx, pool, 0);
                ctx.wavefronts[id].last_fetch_time = *time;
                ctx.wavefronts[id].is_fetching = *fetching;
            }
            let arbiter = FetchArbiter::new(256);
            let eligible: Vec<u64> = ctx
                .wavefronts
                .iter()
                .filter(|(_, wf)| !wf.is_fetching)
                .map(|(_, wf)| wf.last_fetch_time)
                .collect();
            match arbiter.select(&ctx.wf_pools, &ctx.wavefronts) {
                Some(id) => {
                    let wf = &ctx.wavefronts[id];
                    prop_assert!(!wf.is_fetching);
                    prop_assert_eq!(Some(wf.last_fetch_time), eligible.iter().copied().min());
                }
                None => prop_assert!(eligible.is_empty()),
            }
        }
    }
}
