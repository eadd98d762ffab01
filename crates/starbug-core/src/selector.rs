use crate::error::{Result, StarbugError};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Set-based operator of a label requirement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Requirement {
    key: String,
    operator: Operator,
    values: BTreeSet<String>,
}

impl Requirement {
    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match self.operator {
            Operator::In => labels.get(&self.key).is_some_and(|v| self.values.contains(v)),
            Operator::NotIn => labels.get(&self.key).is_none_or(|v| !self.values.contains(v)),
            Operator::Exists => labels.contains_key(&self.key),
            Operator::DoesNotExist => !labels.contains_key(&self.key),
        }
    }
}

/// A compiled label selector.
///
/// All requirements must hold for a match. An empty selector matches every
/// label set; callers that must not act on "everything" check [`Selector::is_empty`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selector {
    requirements: Vec<Requirement>,
}

impl Selector {
    /// Selector requiring every given label to be present with the given value
    pub fn from_labels(labels: &BTreeMap<String, String>) -> Self {
        let requirements = labels
            .iter()
            .map(|(k, v)| Requirement {
                key: k.clone(),
                operator: Operator::In,
                values: BTreeSet::from([v.clone()]),
            })
            .collect();
        Self { requirements }
    }

    /// Compile a `LabelSelector`; `None` compiles to the empty selector
    pub fn from_label_selector(selector: Option<&LabelSelector>) -> Result<Self> {
        let Some(selector) = selector else {
            return Ok(Self::default());
        };

        let mut compiled = selector
            .match_labels
            .as_ref()
            .map(Self::from_labels)
            .unwrap_or_default();

        for expr in selector.match_expressions.iter().flatten() {
            let values: BTreeSet<String> = expr.values.iter().flatten().cloned().collect();
            let operator = match expr.operator.as_str() {
                "In" => Operator::In,
                "NotIn" => Operator::NotIn,
                "Exists" => Operator::Exists,
                "DoesNotExist" => Operator::DoesNotExist,
                other => {
                    return Err(StarbugError::invalid_selector(format!(
                        "unknown operator '{}' for key '{}'",
                        other, expr.key
                    )))
                }
            };

            let needs_values = matches!(operator, Operator::In | Operator::NotIn);
            if needs_values == values.is_empty() {
                return Err(StarbugError::invalid_selector(format!(
                    "operator '{}' for key '{}' {} values",
                    expr.operator,
                    expr.key,
                    if needs_values { "requires" } else { "does not take" }
                )));
            }

            compiled.requirements.push(Requirement {
                key: expr.key.clone(),
                operator,
                values,
            });
        }

        Ok(compiled)
    }

    /// True when the selector has no requirements
    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    /// Check a label set against every requirement
    pub fn matches(&self, labels: Option<&BTreeMap<String, String>>) -> bool {
        let empty = BTreeMap::new();
        let labels = labels.unwrap_or(&empty);
        self.requirements.iter().all(|r| r.matches(labels))
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .requirements
            .iter()
            .map(|r| {
                let values = r.values.iter().cloned().collect::<Vec<_>>().join(",");
                match r.operator {
                    Operator::In if r.values.len() == 1 => format!("{}={}", r.key, values),
                    Operator::In => format!("{} in ({})", r.key, values),
                    Operator::NotIn => format!("{} notin ({})", r.key, values),
                    Operator::Exists => r.key.clone(),
                    Operator::DoesNotExist => format!("!{}", r.key),
                }
            })
            .collect();
        write!(f, "{}", parts.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelectorRequirement;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn expr(key: &str, operator: &str, values: &[&str]) -> LabelSelectorRequirement {
        LabelSelectorRequirement {
            key: key.to_string(),
            operator: operator.to_string(),
            values: if values.is_empty() {
                None
            } else {
                Some(values.iter().map(|v| v.to_string()).collect())
            },
        }
    }

    #[test]
    fn test_match_labels() {
        let selector = Selector::from_labels(&labels(&[("foo", "bar")]));
        assert!(selector.matches(Some(&labels(&[("foo", "bar"), ("x", "y")]))));
        assert!(!selector.matches(Some(&labels(&[("foo", "baz")]))));
        assert!(!selector.matches(None));
        assert_eq!(selector.to_string(), "foo=bar");
    }

    #[test]
    fn test_empty_selector() {
        let selector = Selector::from_label_selector(None).unwrap();
        assert!(selector.is_empty());
        assert!(selector.matches(None));

        let selector = Selector::from_label_selector(Some(&LabelSelector::default())).unwrap();
        assert!(selector.is_empty());
    }

    #[test]
    fn test_match_expressions() {
        let selector = Selector::from_label_selector(Some(&LabelSelector {
            match_labels: Some(labels(&[("app", "pi")])),
            match_expressions: Some(vec![
                expr("tier", "In", &["batch", "compute"]),
                expr("canary", "DoesNotExist", &[]),
                expr("zone", "NotIn", &["z1"]),
                expr("owner", "Exists", &[]),
            ]),
        }))
        .unwrap();

        assert!(selector.matches(Some(&labels(&[
            ("app", "pi"),
            ("tier", "batch"),
            ("owner", "team-a"),
        ]))));
        assert!(!selector.matches(Some(&labels(&[
            ("app", "pi"),
            ("tier", "batch"),
            ("owner", "team-a"),
            ("canary", "true"),
        ]))));
        assert!(!selector.matches(Some(&labels(&[
            ("app", "pi"),
            ("tier", "batch"),
            ("owner", "team-a"),
            ("zone", "z1"),
        ]))));
        assert!(!selector.matches(Some(&labels(&[("app", "pi"), ("tier", "batch")]))));
    }

    #[test]
    fn test_invalid_expressions() {
        let unknown = LabelSelector {
            match_expressions: Some(vec![expr("a", "Gt", &["1"])]),
            ..Default::default()
        };
        assert!(matches!(
            Selector::from_label_selector(Some(&unknown)).unwrap_err(),
            StarbugError::InvalidSelector { .. }
        ));

        let missing_values = LabelSelector {
            match_expressions: Some(vec![expr("a", "In", &[])]),
            ..Default::default()
        };
        assert!(Selector::from_label_selector(Some(&missing_values)).is_err());

        let extra_values = LabelSelector {
            match_expressions: Some(vec![expr("a", "Exists", &["x"])]),
            ..Default::default()
        };
        assert!(Selector::from_label_selector(Some(&extra_values)).is_err());
    }
}
