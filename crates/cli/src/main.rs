//! PromptForge CLI - prompt lifecycle and optimization engine.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use promptforge_core::{
    ContextDescriptor, MatchRule, TemplateMetadata, TemplateStatus, UsageMetrics, VariableSpec,
};
use promptforge_evolve::{FitnessFn, OptimizerConfig};
use promptforge_service::PromptService;
use promptforge_storage::JsonStore;
use tracing::Level;

#[derive(Parser)]
#[command(name = "promptforge")]
#[command(about = "Prompt lifecycle and optimization engine", long_about = None)]
struct Cli {
    /// Storage directory
    #[arg(long, default_value = ".promptforge")]
    store: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Propose template content (no-op if identical to the latest version)
    Propose {
        /// Template name
        name: String,
        /// Template content; "-" reads stdin
        content: String,
        /// Category used for fallback selection
        #[arg(long, default_value = "general")]
        category: String,
        /// Render engine tag
        #[arg(long, default_value = "simple")]
        engine: String,
        /// Required variable, repeatable (name or name:description)
        #[arg(long = "var")]
        vars: Vec<String>,
        /// Optional variable with default, repeatable (name=default)
        #[arg(long = "opt")]
        opts: Vec<String>,
    },
    /// Promote a version one lifecycle step
    Promote {
        /// Version ID
        id: String,
    },
    /// Deprecate an active version
    Deprecate {
        /// Version ID
        id: String,
    },
    /// Archive a deprecated version
    Archive {
        /// Version ID
        id: String,
    },
    /// List template versions
    List {
        /// Only versions of this name
        #[arg(long)]
        name: Option<String>,
    },
    /// Show one version with its statistics
    Show {
        /// Template name
        name: String,
        /// Version number (defaults to the latest active)
        #[arg(long)]
        version: Option<u32>,
    },
    /// Register a context descriptor
    Context {
        /// Context type the descriptor applies to
        context_type: String,
        /// Recommended template name
        #[arg(long)]
        recommended: String,
        /// Fallback template name
        #[arg(long)]
        fallback: Option<String>,
        /// Equality rule, repeatable (field=value)
        #[arg(long = "rule")]
        rules: Vec<String>,
        /// Descriptor priority
        #[arg(long, default_value = "0")]
        priority: u8,
    },
    /// Rank templates for a context
    Select {
        /// Context type
        context_type: String,
        /// Context payload as JSON
        #[arg(long, default_value = "{}")]
        payload: String,
        /// Maximum results
        #[arg(long, default_value = "3")]
        k: usize,
    },
    /// Select the best template, render it and open a usage record
    Use {
        /// Context type
        context_type: String,
        /// Context payload as JSON
        #[arg(long, default_value = "{}")]
        payload: String,
        /// Variable value, repeatable (key=value)
        #[arg(long = "var")]
        vars: Vec<String>,
    },
    /// Close a usage record with its outcome
    Complete {
        /// Usage ID
        id: String,
        /// Response text
        response: String,
        /// Whether the invocation succeeded
        #[arg(long)]
        success: bool,
        /// Overall quality score (0-1)
        #[arg(long)]
        quality: Option<f64>,
    },
    /// Attach a rating to a completed usage
    Feedback {
        /// Usage ID
        id: String,
        /// Rating (1-5)
        rating: u8,
        /// Free-form notes
        #[arg(long, default_value = "")]
        notes: String,
    },
    /// A/B experiments
    Experiment {
        #[command(subcommand)]
        command: ExperimentCommands,
    },
    /// Evolve a template version with an offline heuristic fitness proxy
    Optimize {
        /// Base version ID
        id: String,
        /// Generation cap
        #[arg(long, default_value = "10")]
        generations: u32,
        /// Population size
        #[arg(long, default_value = "8")]
        population: usize,
        /// Random seed for reproducible runs
        #[arg(long, default_value = "0")]
        seed: u64,
    },
}

#[derive(Subcommand)]
enum ExperimentCommands {
    /// Start an experiment between a base version and variants
    Start {
        /// Experiment name (idempotency key)
        name: String,
        /// Base (control) version ID
        base: String,
        /// Variant version IDs
        variants: Vec<String>,
        /// Traffic fractions for base + each variant, e.g. 0.5,0.25,0.25
        #[arg(long, default_value = "0.5,0.5")]
        split: String,
        /// Samples required per arm before a decision
        #[arg(long, default_value = "30")]
        min_samples: u64,
        /// Confidence level for significance
        #[arg(long, default_value = "0.95")]
        confidence: f64,
    },
    /// Assign a subject to an arm (sticky)
    Assign {
        /// Experiment ID
        id: String,
        /// Subject identifier
        subject: String,
    },
    /// Record a metric value for an assignment
    Record {
        /// Assignment ID
        id: String,
        /// Metric name
        metric: String,
        /// Observed value
        value: f64,
    },
    /// Evaluate a running experiment
    Evaluate {
        /// Experiment ID
        id: String,
    },
    /// Freeze the experiment and pick the winner
    Complete {
        /// Experiment ID
        id: String,
    },
    /// Cancel a running experiment
    Cancel {
        /// Experiment ID
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .init();

    let cli = Cli::parse();

    let store = Arc::new(JsonStore::new(&cli.store).await?);
    let service = PromptService::new(store);

    match cli.command {
        Commands::Propose {
            name,
            content,
            category,
            engine,
            vars,
            opts,
        } => {
            let content = if content == "-" {
                std::io::read_to_string(std::io::stdin())?
            } else {
                content
            };

            let mut variables: Vec<VariableSpec> = vars
                .iter()
                .map(|v| match v.split_once(':') {
                    Some((name, desc)) => VariableSpec::required(name, desc),
                    None => VariableSpec::required(v, ""),
                })
                .collect();
            for opt in &opts {
                let (name, default) = opt
                    .split_once('=')
                    .ok_or_else(|| anyhow::anyhow!("--opt expects name=default"))?;
                variables.push(VariableSpec::optional(name, "", default));
            }

            let meta = TemplateMetadata {
                engine,
                category,
                variables,
            };
            let version = service.propose_template(&name, &content, meta).await?;
            println!(
                "Proposed {} v{} ({}) - {}",
                version.name, version.version, version.status, version.id
            );
        }
        Commands::Promote { id } => {
            let version = service.promote_template(parse_id(&id)?).await?;
            println!("{} v{} is now {}", version.name, version.version, version.status);
        }
        Commands::Deprecate { id } => {
            let version = service.deprecate_template(parse_id(&id)?).await?;
            println!("{} v{} is now {}", version.name, version.version, version.status);
        }
        Commands::Archive { id } => {
            let version = service.archive_template(parse_id(&id)?).await?;
            println!("{} v{} is now {}", version.name, version.version, version.status);
        }
        Commands::List { name } => {
            let mut versions = match name {
                Some(name) => service.list_versions(&name).await?,
                None => service.list_templates().await?,
            };
            versions.sort_by(|a, b| a.name.cmp(&b.name).then(a.version.cmp(&b.version)));

            println!("Versions ({})", versions.len());
            for v in versions {
                println!(
                    "  {} | {} v{} | {} | eff {:.1} | used {}{}",
                    v.id,
                    v.name,
                    v.version,
                    format_status(v.status),
                    v.effectiveness,
                    v.usage_count,
                    if v.is_latest { " | latest" } else { "" },
                );
            }
        }
        Commands::Show { name, version } => {
            let v = match version {
                Some(number) => service.template_version(&name, number).await?,
                None => service.latest_template(&name).await?,
            };

            println!("Template: {} v{}", v.name, v.version);
            println!("  ID: {}", v.id);
            println!("  Status: {}", format_status(v.status));
            println!("  Category: {}", v.category);
            println!("  Engine: {}", v.engine);
            println!("  Usage count: {}", v.usage_count);
            println!("  Success rate: {:.1}%", v.success_rate);
            println!("  Avg quality: {:.2}", v.avg_quality);
            println!("  Avg rating: {:.2}", v.avg_rating);
            println!("  Effectiveness: {:.1}", v.effectiveness);
            if let Some(rate) = service.windowed_success_rate(v.id, 7).await? {
                println!("  Success rate (7d): {:.1}%", rate);
            }
            println!("  Created: {}", v.created_at);
            println!("---");
            println!("{}", v.content);
        }
        Commands::Context {
            context_type,
            recommended,
            fallback,
            rules,
            priority,
        } => {
            let mut descriptor = ContextDescriptor::new(&context_type)
                .with_recommended(&recommended)
                .with_priority(priority);
            if let Some(fallback) = fallback {
                descriptor = descriptor.with_fallback(&fallback);
            }
            for rule in &rules {
                let (field, value) = rule
                    .split_once('=')
                    .ok_or_else(|| anyhow::anyhow!("--rule expects field=value"))?;
                descriptor = descriptor.with_rule(MatchRule::equals(field, value, 1.0));
            }
            service.register_context(&descriptor).await?;
            println!("Registered context {} ({})", context_type, descriptor.id);
        }
        Commands::Select {
            context_type,
            payload,
            k,
        } => {
            let payload: serde_json::Value = serde_json::from_str(&payload)?;
            let ranked = service.select_template(&context_type, &payload, k).await?;

            for (rank, m) in ranked.iter().enumerate() {
                println!(
                    "  {}. {} v{} | confidence {:.3} | eff {:.1} | {}",
                    rank + 1,
                    m.template.name,
                    m.template.version,
                    m.confidence,
                    m.template.effectiveness,
                    m.template.id,
                );
            }
        }
        Commands::Use {
            context_type,
            payload,
            vars,
        } => {
            let payload: serde_json::Value = serde_json::from_str(&payload)?;
            let vars = parse_vars(&vars)?;
            let rendered = service.select_and_render(&context_type, &payload, vars).await?;
            println!("Usage: {}", rendered.usage_id);
            println!("---");
            println!("{}", rendered.prompt_text);
        }
        Commands::Complete {
            id,
            response,
            success,
            quality,
        } => {
            let metrics = UsageMetrics {
                quality: quality
                    .map(|q| promptforge_core::QualityScores::new(q, q, q, q)),
                ..Default::default()
            };
            service
                .complete_usage(parse_id(&id)?, response, success, metrics)
                .await?;
            println!("Usage {} completed (success: {})", id, success);
        }
        Commands::Feedback { id, rating, notes } => {
            service.submit_feedback(parse_id(&id)?, rating, notes).await?;
            println!("Feedback recorded on usage {}", id);
        }
        Commands::Experiment { command } => run_experiment(&service, command).await?,
        Commands::Optimize {
            id,
            generations,
            population,
            seed,
        } => {
            let config = OptimizerConfig {
                population,
                max_generations: generations,
                seed,
                ..Default::default()
            };
            let run = service
                .optimize(parse_id(&id)?, Arc::new(FitnessFn(heuristic_fitness)), config)
                .await?;

            println!("Run: {} ({})", run.id, run.status);
            for record in &run.history {
                println!(
                    "  gen {} | best {:.2} | mean {:.2} | evaluated {}",
                    record.generation, record.best_fitness, record.mean_fitness, record.evaluated,
                );
            }
            if let Some(version) = run.proposed_version {
                println!("Proposed draft: {}", version);
            }
        }
    }

    Ok(())
}

async fn run_experiment(service: &PromptService, command: ExperimentCommands) -> Result<()> {
    match command {
        ExperimentCommands::Start {
            name,
            base,
            variants,
            split,
            min_samples,
            confidence,
        } => {
            let variants = variants
                .iter()
                .map(|v| parse_id(v))
                .collect::<Result<Vec<_>>>()?;
            let split = split
                .split(',')
                .map(|f| f.trim().parse::<f64>())
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let experiment = service
                .start_experiment(&name, parse_id(&base)?, variants, split, min_samples, confidence)
                .await?;
            println!("Experiment: {} ({})", experiment.id, experiment.status);
        }
        ExperimentCommands::Assign { id, subject } => {
            let assignment = service.assign_subject(parse_id(&id)?, &subject).await?;
            println!(
                "Assignment: {} | subject {} -> arm {}",
                assignment.id, assignment.subject, assignment.arm,
            );
        }
        ExperimentCommands::Record { id, metric, value } => {
            service.record_outcome(parse_id(&id)?, &metric, value).await?;
            println!("Recorded {} = {} on {}", metric, value, id);
        }
        ExperimentCommands::Evaluate { id } => {
            let evaluation = service.evaluate_experiment(parse_id(&id)?).await?;
            println!("Decision metric: {}", evaluation.metric);
            for arm in &evaluation.arms {
                println!(
                    "  arm {} | n {} | mean {:.3} | var {:.3}",
                    arm.arm, arm.count, arm.mean, arm.variance,
                );
            }
            for variant in &evaluation.variants {
                println!(
                    "  variant arm {} | p {:.4} | effect {:+.3} | significant: {}",
                    variant.arm, variant.p_value, variant.effect_size, variant.significant,
                );
            }
            println!("Decided: {}", evaluation.decided);
        }
        ExperimentCommands::Complete { id } => {
            let experiment = service.complete_experiment(parse_id(&id)?).await?;
            match experiment.winner {
                Some(winner) => println!("Completed; winner version {}", winner),
                None => println!("Completed; no winner"),
            }
        }
        ExperimentCommands::Cancel { id } => {
            service.cancel_experiment(parse_id(&id)?).await?;
            println!("Experiment {} cancelled", id);
        }
    }
    Ok(())
}

fn parse_id<T: std::str::FromStr>(s: &str) -> Result<T> {
    s.parse()
        .map_err(|_| anyhow::anyhow!("invalid ID: {}", s))
}

fn parse_vars(pairs: &[String]) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("--var expects key=value"))?;
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}

/// Offline fitness proxy for CLI runs: rewards structured, terse prompts.
/// Real deployments score candidates through recorded usage instead.
fn heuristic_fitness(content: &str) -> promptforge_core::Result<f64> {
    let lines = content.lines().filter(|l| !l.trim().is_empty()).count() as f64;
    let chars = content.chars().count() as f64;
    Ok(lines * 10.0 - chars / 40.0)
}

fn format_status(status: TemplateStatus) -> &'static str {
    match status {
        TemplateStatus::Draft => "DRAFT",
        TemplateStatus::Testing => "TESTING",
        TemplateStatus::Active => "ACTIVE",
        TemplateStatus::Deprecated => "DEPRECATED",
        TemplateStatus::Archived => "ARCHIVED",
    }
}
