//! Generation loop.
//!
//! Population state is an explicit value threaded through each step.
//! Fitness evaluation fans out on a semaphore-bounded pool; each
//! generation boundary is a join barrier, so selection for generation
//! N+1 never starts before every candidate of N has a fitness or a
//! recorded failure.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use promptforge_core::{
    Error, GenerationRecord, OptimizationRun, Result, RunStatus, TemplateMetadata,
    TemplateVersion, TemplateVersionId, TerminationReason,
};
use promptforge_registry::TemplateRepository;
use promptforge_storage::Store;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::{FitnessEvaluator, MutationOperator};

/// Tuning knobs for an optimization run.
#[derive(Debug, Clone)]
pub struct OptimizerConfig {
    /// Population size
    pub population: usize,
    /// Generation cap
    pub max_generations: u32,
    /// Probability of mutation (vs. crossover) when refilling
    pub mutation_rate: f64,
    /// Fraction of the population carried over unchanged
    pub elite_fraction: f64,
    /// Minimum best-fitness improvement counted as progress
    pub epsilon: f64,
    /// Generations without progress before the run converges
    pub stall_window: u32,
    /// Total fitness evaluations allowed, if bounded
    pub eval_budget: Option<u64>,
    /// Maximum concurrent fitness evaluations
    pub max_parallel: usize,
    /// Metric name recorded on the run
    pub goal_metric: String,
    /// Seed for selection randomness (operators carry their own)
    pub seed: u64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            population: 8,
            max_generations: 10,
            mutation_rate: 0.3,
            elite_fraction: 0.25,
            epsilon: 1e-3,
            stall_window: 3,
            eval_budget: None,
            max_parallel: 4,
            goal_metric: "effectiveness".to_string(),
            seed: 0,
        }
    }
}

/// Cooperative cancellation flag, checked at generation barriers.
/// In-flight evaluations drain; their results are discarded.
#[derive(Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Create an unset flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Clone)]
struct Candidate {
    content: String,
    fitness: Option<f64>,
    failed: bool,
}

/// Evolutionary search over prompt variants of a base template.
pub struct Optimizer {
    store: Arc<dyn Store>,
    repository: Arc<TemplateRepository>,
    operator: Arc<dyn MutationOperator>,
    evaluator: Arc<dyn FitnessEvaluator>,
    config: OptimizerConfig,
}

impl Optimizer {
    /// Create an optimizer.
    pub fn new(
        store: Arc<dyn Store>,
        repository: Arc<TemplateRepository>,
        operator: Arc<dyn MutationOperator>,
        evaluator: Arc<dyn FitnessEvaluator>,
        config: OptimizerConfig,
    ) -> Self {
        Self {
            store,
            repository,
            operator,
            evaluator,
            config,
        }
    }

    /// Run to termination without external cancellation.
    pub async fn run(&self, base: TemplateVersionId) -> Result<OptimizationRun> {
        self.run_with(base, CancelFlag::new()).await
    }

    /// Run to termination, checking `cancel` at each generation barrier.
    ///
    /// Returns the terminal run record; the winning candidate (if any) is
    /// proposed to the repository as a new draft version.
    pub async fn run_with(
        &self,
        base_id: TemplateVersionId,
        cancel: CancelFlag,
    ) -> Result<OptimizationRun> {
        if self.config.population == 0 {
            return Err(Error::Validation("population must be positive".into()));
        }
        if self.config.max_generations == 0 {
            return Err(Error::Validation("max generations must be positive".into()));
        }
        if let Some(budget) = self.config.eval_budget {
            if budget < self.config.population as u64 {
                return Err(Error::Exhausted(
                    "evaluation budget cannot cover the initial population".into(),
                ));
            }
        }

        let base = self.repository.get_by_id(base_id).await?;
        let required = required_placeholders(&base);

        let mut run = OptimizationRun::new(
            base.id,
            &self.config.goal_metric,
            self.config.population,
            self.config.max_generations,
            self.config.mutation_rate,
            self.config.elite_fraction,
        );
        run.status = RunStatus::Running;
        self.store.save_run(&run).await?;
        info!(run = %run.id, base = %base.name, "optimization run started");

        let mut population: Vec<Candidate> = (0..self.config.population)
            .map(|index| Candidate {
                content: self.spawn_variant(&base.content, &required, 0, index),
                fitness: None,
                failed: false,
            })
            .collect();

        let mut evals_used: u64 = 0;
        let mut best_history: Vec<f64> = Vec::new();
        let mut termination: Option<TerminationReason> = None;
        let mut all_failed = false;

        for generation in 0..self.config.max_generations {
            if cancel.is_cancelled() {
                termination = Some(TerminationReason::Cancelled);
                break;
            }

            let pending = population
                .iter()
                .filter(|c| c.fitness.is_none() && !c.failed)
                .count() as u64;
            if let Some(budget) = self.config.eval_budget {
                if evals_used + pending > budget {
                    termination = Some(TerminationReason::BudgetExhausted);
                    break;
                }
            }

            let (evaluated, failures) = self.evaluate_generation(&mut population).await;
            evals_used += evaluated as u64;

            if cancel.is_cancelled() {
                // In-flight work drained above; discard it and stop.
                termination = Some(TerminationReason::Cancelled);
                break;
            }

            let scores: Vec<f64> = population.iter().filter_map(|c| c.fitness).collect();
            if scores.is_empty() {
                all_failed = true;
                break;
            }
            let best = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let mean = scores.iter().sum::<f64>() / scores.len() as f64;

            if run.best_score.map(|s| best > s).unwrap_or(true) {
                run.best_score = Some(best);
                run.best_content = population
                    .iter()
                    .find(|c| c.fitness == Some(best))
                    .map(|c| c.content.clone());
            }
            best_history.push(run.best_score.unwrap_or(best));

            run.current_generation = generation;
            run.history.push(GenerationRecord {
                generation,
                best_fitness: best,
                mean_fitness: mean,
                evaluated,
                failed: failures,
                recorded_at: Utc::now(),
            });
            run.updated_at = Utc::now();
            self.store.save_run(&run).await?;
            debug!(run = %run.id, generation, best, mean, "generation recorded");

            if generation + 1 >= self.config.max_generations {
                termination = Some(TerminationReason::MaxGenerations);
                break;
            }
            if stalled(&best_history, self.config.stall_window, self.config.epsilon) {
                termination = Some(TerminationReason::Converged);
                break;
            }

            population = self.next_generation(population, &base, &required, generation + 1);
        }

        if all_failed {
            run.status = RunStatus::Failed;
            run.updated_at = Utc::now();
            self.store.save_run(&run).await?;
            warn!(run = %run.id, "every candidate failed evaluation; run failed");
            return Ok(run);
        }

        match termination {
            Some(TerminationReason::Cancelled) => {
                run.status = RunStatus::Cancelled;
                run.termination = Some(TerminationReason::Cancelled);
                run.updated_at = Utc::now();
                self.store.save_run(&run).await?;
                info!(run = %run.id, "optimization run cancelled");
                Ok(run)
            }
            Some(reason) => {
                run.termination = Some(reason);
                run.converged = reason == TerminationReason::Converged;
                run.status = RunStatus::Completed;

                if let Some(content) = run.best_content.clone() {
                    let meta = TemplateMetadata {
                        engine: base.engine.clone(),
                        category: base.category.clone(),
                        variables: base.variables.clone(),
                    };
                    let proposed = self.repository.propose(&base.name, &content, meta).await?;
                    run.proposed_version = Some(proposed.id);
                    info!(
                        run = %run.id,
                        proposed = %proposed.id,
                        score = run.best_score.unwrap_or(f64::NEG_INFINITY),
                        "winner proposed as draft"
                    );
                }

                run.updated_at = Utc::now();
                self.store.save_run(&run).await?;
                Ok(run)
            }
            // The loop always breaks with a reason before exhausting.
            None => {
                run.status = RunStatus::Failed;
                run.updated_at = Utc::now();
                self.store.save_run(&run).await?;
                Ok(run)
            }
        }
    }

    /// Evaluate every pending candidate; returns (evaluated, failed)
    /// counts. This is the generation barrier: it returns only after
    /// every spawned evaluation has joined.
    async fn evaluate_generation(&self, population: &mut [Candidate]) -> (usize, usize) {
        let semaphore = Arc::new(Semaphore::new(self.config.max_parallel.max(1)));
        let mut join = JoinSet::new();

        for (index, candidate) in population.iter().enumerate() {
            if candidate.fitness.is_some() || candidate.failed {
                continue;
            }
            let content = candidate.content.clone();
            let evaluator = self.evaluator.clone();
            let semaphore = semaphore.clone();
            join.spawn(async move {
                let permit = semaphore.acquire_owned().await;
                if permit.is_err() {
                    return (index, Err(Error::Storage("evaluation pool closed".into())));
                }
                let result = evaluator.evaluate(&content).await;
                drop(permit);
                (index, result)
            });
        }

        let mut evaluated = 0;
        let mut failures = 0;
        while let Some(joined) = join.join_next().await {
            match joined {
                Ok((index, Ok(score))) => {
                    population[index].fitness = Some(score);
                    evaluated += 1;
                }
                Ok((index, Err(e))) => {
                    // Absorbed: worst fitness, dropped at selection.
                    warn!(index, error = %e, "fitness evaluation failed; candidate dropped");
                    population[index].failed = true;
                    evaluated += 1;
                    failures += 1;
                }
                Err(e) => {
                    warn!(error = %e, "evaluation task aborted");
                    failures += 1;
                }
            }
        }
        (evaluated, failures)
    }

    /// Elitist selection plus mutation/crossover refill.
    fn next_generation(
        &self,
        population: Vec<Candidate>,
        base: &TemplateVersion,
        required: &[String],
        generation: u32,
    ) -> Vec<Candidate> {
        let mut survivors: Vec<Candidate> = population
            .into_iter()
            .filter(|c| c.fitness.is_some())
            .collect();
        survivors.sort_by(|a, b| {
            b.fitness
                .partial_cmp(&a.fitness)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let elite_count = ((self.config.population as f64 * self.config.elite_fraction).ceil()
            as usize)
            .clamp(1, survivors.len());

        let mut next: Vec<Candidate> = survivors[..elite_count].to_vec();
        let mut rng = StdRng::seed_from_u64(self.config.seed ^ (generation as u64) << 8);

        while next.len() < self.config.population {
            let index = next.len();
            let parent_a = &survivors[rng.gen_range(0..survivors.len())];
            let content = if survivors.len() == 1 || rng.gen::<f64>() < self.config.mutation_rate {
                self.operator.mutate(&parent_a.content, generation, index)
            } else {
                let parent_b = &survivors[rng.gen_range(0..survivors.len())];
                self.operator
                    .crossover(&parent_a.content, &parent_b.content, generation, index)
            };

            let content = if satisfies_contract(&content, required) {
                content
            } else {
                // Broken variable contract; regenerate from the base.
                self.spawn_variant(&base.content, required, generation, index)
            };
            next.push(Candidate {
                content,
                fitness: None,
                failed: false,
            });
        }
        next
    }

    /// Mutate the base into a contract-satisfying variant, falling back to
    /// the base content itself when the operator keeps breaking it.
    fn spawn_variant(
        &self,
        base_content: &str,
        required: &[String],
        generation: u32,
        index: usize,
    ) -> String {
        for attempt in 0..3 {
            let candidate = self
                .operator
                .mutate(base_content, generation, index + attempt * 10_000);
            if satisfies_contract(&candidate, required) {
                return candidate;
            }
        }
        base_content.to_string()
    }
}

fn required_placeholders(base: &TemplateVersion) -> Vec<String> {
    base.variables
        .iter()
        .filter(|v| v.required)
        .map(|v| format!("{{{{{}}}}}", v.name))
        .collect()
}

fn satisfies_contract(content: &str, required: &[String]) -> bool {
    required.iter().all(|p| content.contains(p.as_str()))
}

/// No improvement greater than epsilon over the trailing window.
fn stalled(best_history: &[f64], window: u32, epsilon: f64) -> bool {
    let window = window as usize;
    if best_history.len() <= window {
        return false;
    }
    let current = best_history[best_history.len() - 1];
    let then = best_history[best_history.len() - 1 - window];
    current - then <= epsilon
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FitnessFn, SeededMutation};
    use promptforge_core::{TemplateMetadata, VariableSpec};
    use promptforge_storage::MemoryStore;

    async fn base_template(repository: &TemplateRepository) -> TemplateVersion {
        let meta = TemplateMetadata {
            engine: "simple".into(),
            category: "review".into(),
            variables: vec![VariableSpec::required("code", "Code under review")],
        };
        repository
            .propose(
                "code_review",
                "Review the following code:\n{{code}}\nList problems.",
                meta,
            )
            .await
            .unwrap()
    }

    fn optimizer(
        store: Arc<dyn Store>,
        repository: Arc<TemplateRepository>,
        config: OptimizerConfig,
    ) -> Optimizer {
        Optimizer::new(
            store,
            repository,
            Arc::new(SeededMutation::new(42)),
            Arc::new(FitnessFn(|content: &str| Ok(content.len() as f64))),
            config,
        )
    }

    fn fixture() -> (Arc<dyn Store>, Arc<TemplateRepository>) {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let repository = Arc::new(TemplateRepository::new(store.clone()));
        (store, repository)
    }

    #[tokio::test]
    async fn test_single_generation_terminates() {
        let (store, repository) = fixture();
        let base = base_template(&repository).await;

        let config = OptimizerConfig {
            max_generations: 1,
            ..Default::default()
        };
        let run = optimizer(store, repository, config).run(base.id).await.unwrap();

        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.termination, Some(TerminationReason::MaxGenerations));
        assert_eq!(run.history.len(), 1);
        assert_eq!(run.history[0].generation, 0);
    }

    #[tokio::test]
    async fn test_identical_seeds_reproduce_trajectories() {
        let (store_a, repo_a) = fixture();
        let base_a = base_template(&repo_a).await;
        let (store_b, repo_b) = fixture();
        let base_b = base_template(&repo_b).await;

        let config = OptimizerConfig {
            max_generations: 5,
            stall_window: 10, // disable convergence for the comparison
            ..Default::default()
        };

        let run_a = optimizer(store_a, repo_a, config.clone())
            .run(base_a.id)
            .await
            .unwrap();
        let run_b = optimizer(store_b, repo_b, config)
            .run(base_b.id)
            .await
            .unwrap();

        let scores_a: Vec<f64> = run_a.history.iter().map(|g| g.best_fitness).collect();
        let scores_b: Vec<f64> = run_b.history.iter().map(|g| g.best_fitness).collect();
        assert_eq!(scores_a, scores_b);
        assert_eq!(run_a.best_score, run_b.best_score);
    }

    #[tokio::test]
    async fn test_constant_fitness_converges() {
        let (store, repository) = fixture();
        let base = base_template(&repository).await;

        let config = OptimizerConfig {
            max_generations: 50,
            stall_window: 3,
            ..Default::default()
        };
        let opt = Optimizer::new(
            store,
            repository,
            Arc::new(SeededMutation::new(1)),
            Arc::new(FitnessFn(|_: &str| Ok(10.0))),
            config,
        );
        let run = opt.run(base.id).await.unwrap();

        assert_eq!(run.termination, Some(TerminationReason::Converged));
        assert!(run.converged);
        assert!(run.history.len() < 50);
    }

    #[tokio::test]
    async fn test_failed_evaluations_are_absorbed() {
        let (store, repository) = fixture();
        let base = base_template(&repository).await;

        // Fail any candidate that drifted from the base length.
        let base_len = base.content.len();
        let config = OptimizerConfig {
            max_generations: 3,
            ..Default::default()
        };
        let opt = Optimizer::new(
            store,
            repository,
            Arc::new(SeededMutation::new(9)),
            Arc::new(FitnessFn(move |content: &str| {
                if content.len() == base_len {
                    Ok(1.0)
                } else {
                    Err(Error::Storage("evaluation backend down".into()))
                }
            })),
            config,
        );

        // The run never aborts, whatever individual evaluations do.
        let run = opt.run(base.id).await.unwrap();
        assert!(run.status == RunStatus::Completed || run.status == RunStatus::Failed);
    }

    #[tokio::test]
    async fn test_budget_exhaustion_is_terminal_not_failure() {
        let (store, repository) = fixture();
        let base = base_template(&repository).await;

        let config = OptimizerConfig {
            population: 4,
            max_generations: 10,
            eval_budget: Some(5),
            ..Default::default()
        };
        let run = optimizer(store, repository, config).run(base.id).await.unwrap();

        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.termination, Some(TerminationReason::BudgetExhausted));
        assert!(run.best_score.is_some());
    }

    #[tokio::test]
    async fn test_budget_below_population_is_rejected() {
        let (store, repository) = fixture();
        let base = base_template(&repository).await;

        let config = OptimizerConfig {
            population: 8,
            eval_budget: Some(2),
            ..Default::default()
        };
        let err = optimizer(store, repository, config)
            .run(base.id)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Exhausted(_)));
    }

    #[tokio::test]
    async fn test_winner_is_proposed_as_draft() {
        let (store, repository) = fixture();
        let base = base_template(&repository).await;

        let config = OptimizerConfig {
            max_generations: 2,
            ..Default::default()
        };
        let run = optimizer(store.clone(), repository.clone(), config)
            .run(base.id)
            .await
            .unwrap();

        let proposed_id = run.proposed_version.expect("winner must be proposed");
        let proposed = repository.get_by_id(proposed_id).await.unwrap();
        assert_eq!(proposed.name, "code_review");
        // The contract survives optimization.
        assert!(proposed.content.contains("{{code}}"));

        // Lineage is auditable from the persisted run.
        let persisted = store.load_run(run.id).await.unwrap().unwrap();
        assert_eq!(persisted.base, base.id);
        assert!(!persisted.history.is_empty());
        assert_eq!(persisted.proposed_version, Some(proposed_id));
    }

    #[tokio::test]
    async fn test_cancellation_is_cooperative() {
        let (store, repository) = fixture();
        let base = base_template(&repository).await;

        let cancel = CancelFlag::new();
        let trigger = cancel.clone();
        let config = OptimizerConfig {
            max_generations: 100,
            stall_window: 100,
            ..Default::default()
        };
        let opt = Optimizer::new(
            store,
            repository,
            Arc::new(SeededMutation::new(3)),
            Arc::new(FitnessFn(move |content: &str| {
                // Request cancellation from inside the first evaluation wave.
                trigger.cancel();
                Ok(content.len() as f64)
            })),
            config,
        );

        let run = opt.run_with(base.id, cancel).await.unwrap();
        assert_eq!(run.status, RunStatus::Cancelled);
        assert_eq!(run.termination, Some(TerminationReason::Cancelled));
        assert!(run.proposed_version.is_none());
    }

    #[test]
    fn test_stall_detection() {
        assert!(!stalled(&[1.0, 1.0], 3, 0.001));
        assert!(stalled(&[1.0, 1.0, 1.0, 1.0], 3, 0.001));
        assert!(!stalled(&[1.0, 1.5, 2.0, 3.0], 3, 0.001));
    }
}
