//! Two-sample significance tests.
//!
//! Both tests report two-sided p-values from the normal approximation,
//! which is what experiment arm sizes gated by `min_sample_size` call for.

/// Outcome of a two-sample test.
#[derive(Debug, Clone, Copy)]
pub struct TestResult {
    /// Two-sided p-value
    pub p_value: f64,
    /// Difference in means (treatment minus control)
    pub effect_size: f64,
}

/// Sample mean.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Unbiased sample variance.
pub fn variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64
}

/// Welch's t-test for continuous metrics (unequal variances).
pub fn welch_t_test(control: &[f64], treatment: &[f64]) -> TestResult {
    let effect = mean(treatment) - mean(control);
    if control.len() < 2 || treatment.len() < 2 {
        return TestResult {
            p_value: 1.0,
            effect_size: effect,
        };
    }

    let se = (variance(control) / control.len() as f64
        + variance(treatment) / treatment.len() as f64)
        .sqrt();
    if se == 0.0 {
        // Degenerate: identical constants in both arms.
        let p_value = if effect == 0.0 { 1.0 } else { 0.0 };
        return TestResult {
            p_value,
            effect_size: effect,
        };
    }

    let t = effect / se;
    TestResult {
        p_value: two_sided_p(t),
        effect_size: effect,
    }
}

/// Two-proportion z-test for binary success metrics. Inputs are success
/// counts and arm sizes.
pub fn two_proportion_test(
    successes_control: u64,
    n_control: u64,
    successes_treatment: u64,
    n_treatment: u64,
) -> TestResult {
    if n_control == 0 || n_treatment == 0 {
        return TestResult {
            p_value: 1.0,
            effect_size: 0.0,
        };
    }

    let p_c = successes_control as f64 / n_control as f64;
    let p_t = successes_treatment as f64 / n_treatment as f64;
    let effect = p_t - p_c;

    let pooled =
        (successes_control + successes_treatment) as f64 / (n_control + n_treatment) as f64;
    let se =
        (pooled * (1.0 - pooled) * (1.0 / n_control as f64 + 1.0 / n_treatment as f64)).sqrt();
    if se == 0.0 {
        let p_value = if effect == 0.0 { 1.0 } else { 0.0 };
        return TestResult {
            p_value,
            effect_size: effect,
        };
    }

    let z = effect / se;
    TestResult {
        p_value: two_sided_p(z),
        effect_size: effect,
    }
}

fn two_sided_p(statistic: f64) -> f64 {
    (2.0 * (1.0 - normal_cdf(statistic.abs()))).clamp(0.0, 1.0)
}

/// Standard normal CDF via the Abramowitz & Stegun 7.1.26 erf polynomial
/// (absolute error below 1.5e-7, plenty for experiment gating).
fn normal_cdf(x: f64) -> f64 {
    0.5 * (1.0 + erf(x / std::f64::consts::SQRT_2))
}

fn erf(x: f64) -> f64 {
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();

    let a1 = 0.254829592;
    let a2 = -0.284496736;
    let a3 = 1.421413741;
    let a4 = -1.453152027;
    let a5 = 1.061405429;
    let p = 0.3275911;

    let t = 1.0 / (1.0 + p * x);
    let y = 1.0 - (((((a5 * t + a4) * t) + a3) * t + a2) * t + a1) * t * (-x * x).exp();
    sign * y
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_and_variance() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert!((mean(&values) - 5.0).abs() < 1e-9);
        assert!((variance(&values) - 32.0 / 7.0).abs() < 1e-9);
    }

    #[test]
    fn test_normal_cdf_known_points() {
        assert!((normal_cdf(0.0) - 0.5).abs() < 1e-7);
        assert!((normal_cdf(1.96) - 0.975).abs() < 1e-3);
        assert!((normal_cdf(-1.96) - 0.025).abs() < 1e-3);
    }

    #[test]
    fn test_proportion_test_detects_large_lift() {
        // 50% vs 70% over 2000 trials per arm.
        let result = two_proportion_test(1000, 2000, 1400, 2000);
        assert!(result.p_value < 0.001);
        assert!((result.effect_size - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_proportion_test_no_difference() {
        let result = two_proportion_test(500, 1000, 500, 1000);
        assert!(result.p_value > 0.99);
        assert_eq!(result.effect_size, 0.0);
    }

    #[test]
    fn test_welch_detects_shifted_mean() {
        let control: Vec<f64> = (0..200).map(|i| (i % 10) as f64).collect();
        let treatment: Vec<f64> = (0..200).map(|i| (i % 10) as f64 + 3.0).collect();
        let result = welch_t_test(&control, &treatment);
        assert!(result.p_value < 0.001);
        assert!((result.effect_size - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_welch_identical_samples() {
        let values = [1.0, 2.0, 3.0, 4.0];
        let result = welch_t_test(&values, &values);
        assert!(result.p_value > 0.99);
        assert_eq!(result.effect_size, 0.0);
    }

    #[test]
    fn test_tiny_samples_are_inconclusive() {
        let result = welch_t_test(&[1.0], &[5.0]);
        assert_eq!(result.p_value, 1.0);
    }
}
