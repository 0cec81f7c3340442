//! Membrane coefficients for the default two-region kernel.

/// Largest propagation coefficient for which the explicit 2D update is
/// stable (Courant number `1/sqrt(2)`, squared).
pub const MAX_STABLE_LAMBDA: f32 = 0.5;

/// Propagation (`lambda`) and damping (`mu`) coefficients for the two
/// material regions of the default membrane kernel.
///
/// `lambda` is the squared Courant number `(c * dt / dx)^2`. `mu` is the
/// per-step loss term.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MembraneCoefficients {
    /// Propagation in region 1.
    pub lambda_one: f32,
    /// Damping in region 1.
    pub mu_one: f32,
    /// Propagation in region 2.
    pub lambda_two: f32,
    /// Damping in region 2.
    pub mu_two: f32,
}

impl Default for MembraneCoefficients {
    fn default() -> Self {
        Self {
            lambda_one: 0.0018,
            mu_one: 0.0001,
            lambda_two: 0.12,
            mu_two: 0.0008,
        }
    }
}

impl MembraneCoefficients {
    /// Create coefficients with the same values in both regions.
    pub fn uniform(lambda: f32, mu: f32) -> Self {
        Self {
            lambda_one: lambda,
            mu_one: mu,
            lambda_two: lambda,
            mu_two: mu,
        }
    }

    /// Derive a propagation coefficient from physical quantities.
    ///
    /// # Arguments
    /// * `wave_speed` - Transverse wave speed in m/s
    /// * `cell_size` - Spatial step in meters
    /// * `sample_rate` - Steps per second
    pub fn lambda_from_physical(wave_speed: f32, cell_size: f32, sample_rate: f32) -> f32 {
        let courant = wave_speed / (sample_rate * cell_size);
        courant * courant
    }

    /// Set the damping of both regions.
    pub fn with_damping(mut self, mu: f32) -> Self {
        self.mu_one = mu.max(0.0);
        self.mu_two = mu.max(0.0);
        self
    }

    /// Check both propagation coefficients against the stability limit.
    pub fn is_stable(&self) -> bool {
        [self.lambda_one, self.lambda_two]
            .iter()
            .all(|&l| (0.0..=MAX_STABLE_LAMBDA).contains(&l))
            && self.mu_one >= 0.0
            && self.mu_two >= 0.0
    }

    /// Clamp propagation into the stable range and damping to non-negative.
    pub fn clamped(self) -> Self {
        Self {
            lambda_one: self.lambda_one.clamp(0.0, MAX_STABLE_LAMBDA),
            mu_one: self.mu_one.max(0.0),
            lambda_two: self.lambda_two.clamp(0.0, MAX_STABLE_LAMBDA),
            mu_two: self.mu_two.max(0.0),
        }
    }

    /// Coefficient `(name, value)` pairs as the default kernel declares them.
    pub fn as_pairs(&self) -> [(&'static str, f32); 4] {
        [
            ("mu_one", self.mu_one),
            ("lambda_one", self.lambda_one),
            ("lambda_two", self.lambda_two),
            ("mu_two", self.mu_two),
        ]
    }

    /// `(lambda, mu)` for a region id. Id 2 uses region two, every other
    /// positive id uses region one, and ids up to 0 are inert.
    pub fn for_region(&self, id: i32) -> Option<(f32, f32)> {
        match id {
            i32::MIN..=0 => None,
            2 => Some((self.lambda_two, self.mu_two)),
            _ => Some((self.lambda_one, self.mu_one)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_stable() {
        assert!(MembraneCoefficients::default().is_stable());
    }

    #[test]
    fn test_unstable_lambda() {
        let coeffs = MembraneCoefficients::uniform(0.6, 0.0);
        assert!(!coeffs.is_stable());
        assert!(coeffs.clamped().is_stable());
        assert_eq!(coeffs.clamped().lambda_one, MAX_STABLE_LAMBDA);
    }

    #[test]
    fn test_lambda_from_physical() {
        // 100 m/s over 1 cm cells at 44.1 kHz: courant ~= 0.2268
        let lambda = MembraneCoefficients::lambda_from_physical(100.0, 0.01, 44_100.0);
        assert!((lambda - 0.05144).abs() < 1e-4);
    }

    #[test]
    fn test_region_lookup() {
        let coeffs = MembraneCoefficients::default().with_damping(0.01);
        assert_eq!(coeffs.for_region(2), Some((0.12, 0.01)));
        assert_eq!(coeffs.for_region(0), None);
        assert_eq!(coeffs.for_region(-1), None);
        assert_eq!(coeffs.for_region(1), Some((0.0018, 0.01)));
        assert_eq!(coeffs.for_region(7), coeffs.for_region(1));
    }
}
