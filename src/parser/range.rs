/// Tolerance when comparing authored ranges against the paging ranges.
pub const RANGE_EPSILON: f64 = 1e-4;

/// Collapse an authored minimum visible range to zero when it matches
/// the paging layer's real minimum. A tile re-hosted under a paging
/// node already has its coarser-to-finer swap distance enforced there,
/// so the authored minimum loses its meaning.
pub fn remap_min_range(range: f64, real_min: f64) -> f64 {
    if range - real_min < RANGE_EPSILON {
        0.0
    } else {
        range
    }
}

/// Substitute the paging layer's actual maximum for an authored maximum
/// that matches the archive's real maximum.
pub fn remap_max_range(range: f64, real_max: f64, used_max: f64) -> f64 {
    if range - real_max < RANGE_EPSILON {
        used_max
    } else {
        range
    }
}

/// Per-parse range parameters: the archive's authored extremes and the
/// maximum the paging layer actually uses.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeRemap {
    pub real_min: f64,
    pub real_max: f64,
    pub used_max: f64,
}

impl RangeRemap {
    pub fn new(real_min: f64, real_max: f64, used_max: f64) -> Self {
        Self {
            real_min,
            real_max,
            used_max,
        }
    }

    pub fn min_range(&self, range: f64) -> f64 {
        remap_min_range(range, self.real_min)
    }

    pub fn max_range(&self, range: f64) -> f64 {
        remap_max_range(range, self.real_max, self.used_max)
    }
}
