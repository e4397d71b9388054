//! Fitness evaluation seam.
//!
//! Production wiring scores candidates through the usage/effectiveness
//! pipeline; cheaper configured proxies (or test stubs) plug in through
//! the same trait.

use async_trait::async_trait;
use promptforge_core::Result;

/// Scores a candidate prompt. Higher is better.
#[async_trait]
pub trait FitnessEvaluator: Send + Sync {
    /// Evaluate the candidate content. An `Err` is absorbed by the
    /// optimizer as worst fitness; it never aborts a run.
    async fn evaluate(&self, content: &str) -> Result<f64>;
}

/// Adapter turning a plain function into an evaluator. Useful for
/// configured proxies and tests.
pub struct FitnessFn<F>(pub F);

#[async_trait]
impl<F> FitnessEvaluator for FitnessFn<F>
where
    F: Fn(&str) -> Result<f64> + Send + Sync,
{
    async fn evaluate(&self, content: &str) -> Result<f64> {
        (self.0)(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fitness_fn_adapts_closures() {
        let evaluator = FitnessFn(|content: &str| Ok(content.len() as f64));
        assert_eq!(evaluator.evaluate("abcd").await.unwrap(), 4.0);
    }
}
