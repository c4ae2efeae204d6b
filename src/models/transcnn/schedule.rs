//! The stochastic-depth schedule.
//!
//! Block drop rates increase linearly from 0 to a configured maximum over
//! the full ordered block sequence, stage-major and depth-minor. The
//! schedule is a pure function of `(max_rate, depths)`, so it can be
//! recomputed on demand to reschedule an existing model.

/// Linearly spaced values from `start` to `end` inclusive.
///
/// A single point degenerates to `start`.
#[must_use]
fn linspace(
    start: f64,
    end: f64,
    points: usize,
) -> Vec<f64> {
    match points {
        0 => vec![],
        1 => vec![start],
        _ => {
            let step = (end - start) / (points - 1) as f64;
            (0..points).map(|i| start + step * i as f64).collect()
        }
    }
}

/// The progressive drop rates for a block sequence of the given total
/// depth: 0 at the first block, `drop_path_rate` at the last.
#[inline(always)]
#[must_use]
pub fn progressive_drop_rates(
    drop_path_rate: f64,
    total_depth: usize,
) -> Vec<f64> {
    linspace(0.0, drop_path_rate, total_depth)
}

/// The per-stage view of a progressive stochastic-depth schedule.
pub struct StochasticDepthSchedule {
    rates: Vec<f64>,
    stage_depths: Vec<usize>,
}

impl StochasticDepthSchedule {
    /// Creates a schedule for stages of the given depths.
    ///
    /// ## Arguments
    ///
    /// * `drop_path_rate`: The rate reached by the final block.
    /// * `stage_depths`: Block count per stage, in stage order.
    #[must_use]
    pub fn new(
        drop_path_rate: f64,
        stage_depths: &[usize],
    ) -> Self {
        let stage_depths = stage_depths.to_vec();
        let rates = progressive_drop_rates(drop_path_rate, stage_depths.iter().sum());
        Self {
            rates,
            stage_depths,
        }
    }

    /// The number of stages.
    #[must_use]
    pub fn num_stages(&self) -> usize {
        self.stage_depths.len()
    }

    /// The total number of blocks.
    #[must_use]
    pub fn total_depth(&self) -> usize {
        self.stage_depths.iter().sum()
    }

    /// The drop rates for one stage, in block order.
    ///
    /// # Panics
    ///
    /// If the stage index is out of bounds.
    #[must_use]
    pub fn stage_dprs(
        &self,
        stage: usize,
    ) -> Vec<f64> {
        if stage >= self.num_stages() {
            panic!(
                "Stage index {} out of bounds for {} stages",
                stage,
                self.num_stages()
            );
        }
        let start = self.stage_depths[..stage].iter().sum::<usize>();
        let end = start + self.stage_depths[stage];

        self.rates[start..end].to_vec()
    }

    /// The drop rates for every stage.
    #[inline(always)]
    #[must_use]
    pub fn stage_rates(&self) -> Vec<Vec<f64>> {
        (0..self.num_stages()).map(|s| self.stage_dprs(s)).collect()
    }

    /// Convenience: the per-stage rates for the given maximum and depths.
    #[must_use]
    pub fn rates_for(
        drop_path_rate: f64,
        stage_depths: &[usize],
    ) -> Vec<Vec<f64>> {
        Self::new(drop_path_rate, stage_depths).stage_rates()
    }
}
