use std::{fmt::Write, path::Path, str::FromStr};

use anyhow::{Context, bail};
use serde::Deserialize;
use serde_dynamic_string::DynamicString;
use toml::Value;

use crate::{Config, RuleSetConfig, ThresholdUnit};

pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let path = path.as_ref();

    let content =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config file {}", path.display()))?;

    let mut raw_config: Value = toml::from_str(&content)?;
    expand_dynamic_strings(&mut Vec::new(), &mut raw_config)?;

    let config = Config::deserialize(raw_config)?;

    for warning in validate(&config)? {
        log::warn!("{warning}");
    }

    Ok(config)
}

/// Checks the rule sets against each other and returns warnings for settings that are accepted
/// but probably not what the operator meant.
pub(crate) fn validate(config: &Config) -> anyhow::Result<Vec<String>> {
    let mut warnings = Vec::new();

    if config.rate_limit.is_none() && config.token_rate_limit.is_none() {
        warnings.push(
            "No rate_limit or token_rate_limit configured, every request will be forwarded without limits".to_string(),
        );
    }

    if let Some(rule_set) = &config.rate_limit {
        check_unit(rule_set, "rate_limit", ThresholdUnit::Requests)?;
        warnings.extend(rule_set.duplicate_rules());
    }

    if let Some(rule_set) = &config.token_rate_limit {
        check_unit(rule_set, "token_rate_limit", ThresholdUnit::Tokens)?;
        warnings.extend(rule_set.duplicate_rules());
    }

    if let (Some(requests), Some(tokens)) = (&config.rate_limit, &config.token_rate_limit)
        && requests.rule_name == tokens.rule_name
    {
        bail!(
            "rate_limit and token_rate_limit must use different rule names, both are named '{}'",
            requests.rule_name
        );
    }

    Ok(warnings)
}

fn check_unit(rule_set: &RuleSetConfig, section: &str, expected: ThresholdUnit) -> anyhow::Result<()> {
    if let Some(threshold) = rule_set.thresholds().into_iter().find(|t| t.unit != expected) {
        bail!(
            "{section} '{}' only accepts {expected} thresholds, found {}",
            rule_set.rule_name,
            threshold.unit
        );
    }

    Ok(())
}

fn expand_dynamic_strings<'a>(path: &mut Vec<Result<&'a str, usize>>, value: &'a mut Value) -> anyhow::Result<()> {
    match value {
        Value::String(s) => match DynamicString::<String>::from_str(s) {
            Ok(out) => *s = out.into_inner(),
            Err(err) => {
                let mut p = String::new();

                for segment in path {
                    match segment {
                        Ok(s) => {
                            p.push_str(s);
                            p.push('.');
                        }
                        Err(i) => write!(p, "[{i}]")?,
                    }
                }

                if p.ends_with('.') {
                    p.pop();
                }

                bail!("Failed to expand dynamic string at path '{p}': {err}");
            }
        },
        Value::Array(values) => {
            for (i, value) in values.iter_mut().enumerate() {
                path.push(Err(i));
                expand_dynamic_strings(path, value)?;
                path.pop();
            }
        }
        Value::Table(map) => {
            for (key, value) in map {
                path.push(Ok(key.as_str()));
                expand_dynamic_strings(path, value)?;
                path.pop();
            }
        }
        Value::Integer(_) | Value::Float(_) | Value::Boolean(_) | Value::Datetime(_) => (),
    }

    Ok(())
}
