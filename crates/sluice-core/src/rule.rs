//! Rule table. Maps a caller classification to bucket parameters.
//!
//! The table is built once from config. Classes may override the limiter's
//! capacity and rate; anything they leave out comes from `[limiter]`.
//! Unknown or missing classes get the default class's rule.

use std::collections::HashMap;
use std::time::Instant;

use crate::bucket::LeakyBucket;
use crate::config::{ConfigError, LimiterConfig, RulesConfig, SluiceConfig};

/// What one request costs and the bucket it is charged against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rule {
    pub amount: u64,
    pub capacity: u64,
    pub rate: f64,
}

#[derive(Debug, Clone)]
pub struct RuleTable {
    default_class: String,
    default_rule: Rule,
    rules: HashMap<String, Rule>,
}

impl Default for RuleTable {
    fn default() -> Self {
        let config = SluiceConfig::default();
        // The built-in config always lists its default class.
        Self::from_config(&config.limiter, &config.rules).unwrap_or_else(|_| Self {
            default_class: crate::config::DEFAULT_CLASS.to_string(),
            default_rule: Rule {
                amount: 1 << 20,
                capacity: config.limiter.capacity,
                rate: config.limiter.rate,
            },
            rules: HashMap::new(),
        })
    }
}

impl RuleTable {
    /// Build the table, rejecting any class a bucket could not serve: a
    /// rate the bucket refuses, a capacity that cannot drain within the
    /// clock's range, or an amount larger than the capacity (such a request
    /// could never be admitted in full).
    pub fn from_config(limiter: &LimiterConfig, rules: &RulesConfig) -> Result<Self, ConfigError> {
        let now = Instant::now();
        let mut table = HashMap::with_capacity(rules.classes.len());

        for (name, class) in &rules.classes {
            let rule = Rule {
                amount: class.amount,
                capacity: class.capacity.unwrap_or(limiter.capacity),
                rate: class.rate.unwrap_or(limiter.rate),
            };
            LeakyBucket::check(rule.capacity, rule.rate, now).map_err(|source| {
                ConfigError::InvalidClass {
                    class: name.clone(),
                    source,
                }
            })?;
            if rule.amount > rule.capacity {
                return Err(ConfigError::Invalid(format!(
                    "class {name:?} charges {} per request but its bucket holds only {}",
                    rule.amount, rule.capacity
                )));
            }
            table.insert(name.clone(), rule);
        }

        let default_rule = *table.get(&rules.default_class).ok_or_else(|| {
            ConfigError::Invalid(format!(
                "default class {:?} has no rule",
                rules.default_class
            ))
        })?;

        Ok(Self {
            default_class: rules.default_class.clone(),
            default_rule,
            rules: table,
        })
    }

    /// Rule for `class`, or the default rule if the class is unknown.
    pub fn lookup(&self, class: &str) -> &Rule {
        self.rules.get(class).unwrap_or(&self.default_rule)
    }

    /// Rule for an optional, possibly blank classification header.
    pub fn resolve(&self, class: Option<&str>) -> (&str, &Rule) {
        match class.map(str::trim).filter(|c| !c.is_empty()) {
            Some(c) => match self.rules.get_key_value(c) {
                Some((name, rule)) => (name.as_str(), rule),
                None => (self.default_class.as_str(), &self.default_rule),
            },
            None => (self.default_class.as_str(), &self.default_rule),
        }
    }

    pub fn default_class(&self) -> &str {
        &self.default_class
    }

    /// Class names, sorted.
    pub fn classes(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.rules.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
