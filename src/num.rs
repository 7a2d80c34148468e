use ordered_float::NotNan;

/// Relative tolerance used when comparing sums of weights.
pub const TOLERANCE: f64 = 1e-9;

/// A non-NaN f64 value in the range [0, 1].
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Normalized(NotNan<f64>);

impl Normalized {
    pub const ZERO: Self = Self(unsafe { NotNan::new_unchecked(0.0) });
    pub const ONE: Self = Self(unsafe { NotNan::new_unchecked(1.0) });

    pub fn new(value: f64) -> Option<Self> {
        let value = NotNan::new(value).ok()?;
        if value.is_sign_negative() || *value > 1.0 {
            return None;
        }
        Some(Self(value))
    }

    pub fn clamp(value: f64, min: f64, max: f64) -> Option<Self> {
        Self::new(value.clamp(min, max))
    }

    pub fn as_f64(&self) -> f64 {
        self.0.into_inner()
    }
}

impl std::cmp::PartialOrd for Normalized {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.0.cmp(&other.0))
    }
}

impl std::cmp::Ord for Normalized {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl std::fmt::Debug for Normalized {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A non-negative, non-NaN f64 value
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Weight(NotNan<f64>);

impl Weight {
    pub const ZERO: Self = Self(unsafe { NotNan::new_unchecked(0.0) });

    pub fn new(value: f64) -> Option<Self> {
        let value = NotNan::new(value).ok()?;
        if value.is_sign_negative() {
            return None;
        }
        Some(Self(value))
    }

    pub fn as_f64(&self) -> f64 {
        self.0.into_inner()
    }

    /// This weight as a fraction of `total`. A zero total yields zero.
    pub fn fraction_of(&self, total: f64) -> f64 {
        if total <= 0.0 {
            return 0.0;
        }
        self.as_f64() / total
    }
}

impl std::fmt::Debug for Weight {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Display for Weight {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The weight a fallback is served with, together with the consensus weight it started from.
/// Reweighting replaces `current` and never touches `original`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RelayWeight {
    current: Weight,
    original: Weight,
}

impl RelayWeight {
    pub fn new(weight: Weight) -> Self {
        Self {
            current: weight,
            original: weight,
        }
    }

    pub fn current(&self) -> Weight {
        self.current
    }

    pub fn original(&self) -> Weight {
        self.original
    }

    pub fn is_adjusted(&self) -> bool {
        self.current != self.original
    }

    pub fn reweighted(self, current: Weight) -> Self {
        Self {
            current,
            original: self.original,
        }
    }
}

/// Returns true when `value` matches `expected` to within [`TOLERANCE`], relative to the larger
/// magnitude (or absolute, for magnitudes below 1).
pub fn within_tolerance(value: f64, expected: f64) -> bool {
    let scale = value.abs().max(expected.abs()).max(1.0);
    (value - expected).abs() <= TOLERANCE * scale
}
