use crate::error::{EngineError, Result};
use crate::models::{ParameterBag, ParameterDomain};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::BTreeMap;

/// Extract a parameter as f64 with a default value
pub fn get_param_f64(params: &ParameterBag, key: &str, default: f64) -> f64 {
    params
        .get(key)
        .copied()
        .filter(|v| v.is_finite())
        .unwrap_or(default)
}

/// Extract a parameter as usize, rounded, with a default and a minimum
pub fn get_param_usize(
    params: &ParameterBag,
    key: &str,
    default: usize,
    min: usize,
) -> usize {
    params
        .get(key)
        .copied()
        .filter(|v| v.is_finite())
        .map(|v| v.round().max(min as f64) as usize)
        .unwrap_or(default)
}

/// Extract a boolean parameter; any value >= 0.5 counts as true
pub fn get_param_bool(params: &ParameterBag, key: &str, default: bool) -> bool {
    params
        .get(key)
        .copied()
        .filter(|v| v.is_finite())
        .map(|v| v >= 0.5)
        .unwrap_or(default)
}

/// Extract a parameter as a positive distance, `None` when absent or unusable
pub fn get_param_distance(params: &ParameterBag, key: &str) -> Option<f64> {
    params
        .get(key)
        .copied()
        .filter(|v| v.is_finite() && *v > 0.0)
}

/// Canonical text form of a parameter combination, used for deduplication
/// and as the final ranking tie-break. Bags iterate in key order, so the
/// signature is stable.
pub fn parameter_signature(parameters: &ParameterBag) -> String {
    format!("{:?}", parameters)
}

/// Enumerate one domain into concrete values.
pub fn expand_domain(name: &str, domain: &ParameterDomain) -> Result<Vec<f64>> {
    match domain {
        ParameterDomain::Values(values) => {
            if values.is_empty() {
                return Err(EngineError::Configuration(format!(
                    "parameter '{}' has an empty value list",
                    name
                )));
            }
            if values.iter().any(|v| !v.is_finite()) {
                return Err(EngineError::Configuration(format!(
                    "parameter '{}' contains a non-finite value",
                    name
                )));
            }
            Ok(values.clone())
        }
        ParameterDomain::Range { min, max, step } => {
            if !min.is_finite() || !max.is_finite() || !step.is_finite() {
                return Err(EngineError::Configuration(format!(
                    "parameter '{}' has a non-finite range bound",
                    name
                )));
            }
            if *step <= 0.0 || max < min {
                return Err(EngineError::Configuration(format!(
                    "parameter '{}' has an invalid range (min {}, max {}, step {})",
                    name, min, max, step
                )));
            }
            let mut values = Vec::new();
            let mut current = *min;
            while current <= max + 1e-9 {
                values.push(current.min(*max));
                current += step;
            }
            Ok(values)
        }
    }
}

/// Full Cartesian product over the space, in deterministic order: parameter
/// names sorted (BTreeMap order), domain values in declaration order.
pub fn cartesian_product(
    space: &BTreeMap<String, ParameterDomain>,
) -> Result<Vec<ParameterBag>> {
    if space.is_empty() {
        return Err(EngineError::Configuration(
            "parameter space must not be empty".into(),
        ));
    }

    let mut expanded: Vec<(String, Vec<f64>)> = Vec::with_capacity(space.len());
    for (name, domain) in space {
        expanded.push((name.clone(), expand_domain(name, domain)?));
    }

    let mut combinations: Vec<ParameterBag> = vec![ParameterBag::new()];
    for (name, values) in &expanded {
        let mut next = Vec::with_capacity(combinations.len() * values.len());
        for combination in &combinations {
            for value in values {
                let mut extended = combination.clone();
                extended.insert(name.clone(), *value);
                next.push(extended);
            }
        }
        combinations = next;
    }
    Ok(combinations)
}

/// Uniform draw of `count` combinations without replacement, reproducible
/// for a given seed. Returns everything when `count` covers the grid.
pub fn sample_without_replacement(
    mut combinations: Vec<ParameterBag>,
    count: usize,
    seed: u64,
) -> Vec<ParameterBag> {
    if count >= combinations.len() {
        return combinations;
    }
    let mut rng = StdRng::seed_from_u64(seed);
    combinations.shuffle(&mut rng);
    combinations.truncate(count);
    combinations
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_size_is_product_of_domains() {
        let mut space = BTreeMap::new();
        space.insert(
            "fastPeriod".to_string(),
            ParameterDomain::Values(vec![5.0, 8.0, 10.0, 12.0]),
        );
        space.insert(
            "slowPeriod".to_string(),
            ParameterDomain::Range {
                min: 20.0,
                max: 40.0,
                step: 5.0,
            },
        );

        let combinations = cartesian_product(&space).unwrap();
        assert_eq!(combinations.len(), 20);
        let signatures: std::collections::HashSet<_> =
            combinations.iter().map(parameter_signature).collect();
        assert_eq!(signatures.len(), 20);
    }

    #[test]
    fn empty_domain_is_a_configuration_error() {
        let mut space = BTreeMap::new();
        space.insert("period".to_string(), ParameterDomain::Values(Vec::new()));
        assert!(matches!(
            cartesian_product(&space),
            Err(EngineError::Configuration(_))
        ));
    }

    #[test]
    fn range_expansion_includes_both_ends() {
        let values = expand_domain(
            "period",
            &ParameterDomain::Range {
                min: 10.0,
                max: 30.0,
                step: 10.0,
            },
        )
        .unwrap();
        assert_eq!(values, vec![10.0, 20.0, 30.0]);
    }

    #[test]
    fn sampling_is_deterministic_per_seed() {
        let mut space = BTreeMap::new();
        space.insert(
            "period".to_string(),
            ParameterDomain::Range {
                min: 1.0,
                max: 50.0,
                step: 1.0,
            },
        );
        let combinations = cartesian_product(&space).unwrap();

        let first = sample_without_replacement(combinations.clone(), 10, 7);
        let second = sample_without_replacement(combinations.clone(), 10, 7);
        assert_eq!(
            first.iter().map(parameter_signature).collect::<Vec<_>>(),
            second.iter().map(parameter_signature).collect::<Vec<_>>()
        );

        let unique: std::collections::HashSet<_> =
            first.iter().map(parameter_signature).collect();
        assert_eq!(unique.len(), 10);
    }

    #[test]
    fn bag_helpers_apply_defaults_and_minimums() {
        let mut params = ParameterBag::new();
        params.insert("period".to_string(), 3.4);
        params.insert("enabled".to_string(), 1.0);
        params.insert("broken".to_string(), f64::NAN);

        assert_eq!(get_param_usize(&params, "period", 14, 1), 3);
        assert_eq!(get_param_usize(&params, "missing", 14, 1), 14);
        assert!(get_param_bool(&params, "enabled", false));
        assert_eq!(get_param_f64(&params, "broken", 2.0), 2.0);
        assert_eq!(get_param_distance(&params, "broken"), None);
    }
}
