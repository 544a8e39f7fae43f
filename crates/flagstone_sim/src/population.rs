//! Seeded synthetic populations.

use flagstone_model::EvaluationContext;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use serde_json::Value;

/// A property drawn uniformly from a fixed set of values.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertySpec {
    /// Property name.
    pub name: String,
    /// Candidate values.
    pub values: Vec<Value>,
}

impl PropertySpec {
    /// Creates a property spec.
    pub fn new(name: impl Into<String>, values: impl IntoIterator<Item = Value>) -> Self {
        Self {
            name: name.into(),
            values: values.into_iter().collect(),
        }
    }
}

/// Configuration for population generation.
#[derive(Debug, Clone, PartialEq)]
pub struct PopulationConfig {
    /// Random seed for reproducibility.
    pub seed: u64,
    /// Number of subjects.
    pub size: usize,
    /// Properties assigned to every subject.
    pub properties: Vec<PropertySpec>,
    /// Groups a subject may join.
    pub groups: Vec<String>,
    /// Chance of joining each group.
    pub group_probability: f64,
    /// Value of the reserved `environment` property, if any.
    pub environment: Option<String>,
}

impl Default for PopulationConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            size: 1000,
            properties: vec![
                PropertySpec::new(
                    "plan",
                    ["free", "pro", "team", "enterprise"].map(Value::from),
                ),
                PropertySpec::new("country", ["NZ", "US", "DE", "JP", "BR"].map(Value::from)),
                PropertySpec::new("age", (18..=70).map(Value::from)),
            ],
            groups: vec!["beta-testers".to_string(), "staff".to_string()],
            group_probability: 0.05,
            environment: None,
        }
    }
}

impl PopulationConfig {
    /// Sets the seed.
    #[must_use]
    pub const fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Sets the number of subjects.
    #[must_use]
    pub const fn with_size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    /// Adds a property.
    #[must_use]
    pub fn with_property(mut self, spec: PropertySpec) -> Self {
        self.properties.push(spec);
        self
    }

    /// Sets the environment every subject is evaluated in.
    #[must_use]
    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }
}

/// A reproducible set of evaluation contexts.
#[derive(Debug, Clone, PartialEq)]
pub struct Population {
    contexts: Vec<EvaluationContext>,
}

impl Population {
    /// Generates a population. The same config always yields the same
    /// population.
    pub fn generate(config: &PopulationConfig) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
        let group_probability = config.group_probability.clamp(0.0, 1.0);

        let contexts = (0..config.size)
            .map(|n| {
                let mut context =
                    EvaluationContext::new(format!("subject-{n}-{:08x}", rng.gen::<u32>()));
                for spec in &config.properties {
                    if let Some(value) = spec.values.choose(&mut rng) {
                        context = context.with_property(spec.name.clone(), value.clone());
                    }
                }
                for group in &config.groups {
                    if rng.gen_bool(group_probability) {
                        context = context.with_group(group.clone());
                    }
                }
                if let Some(environment) = &config.environment {
                    context = context.with_environment(environment.clone());
                }
                context
            })
            .collect();

        Self { contexts }
    }

    /// Wraps existing contexts.
    pub const fn from_contexts(contexts: Vec<EvaluationContext>) -> Self {
        Self { contexts }
    }

    /// The generated contexts.
    pub fn contexts(&self) -> &[EvaluationContext] {
        &self.contexts
    }

    /// Number of subjects.
    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    /// Returns true if there are no subjects.
    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }
}
