//! Duplicate-detection query over the experiment index

use std::fmt;

use thiserror::Error;

use crate::config::{Configuration, Scalar};
use crate::registry::index::ExperimentIndex;

/// Why a query could not be answered as asked
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    /// The index has never seen these keys
    #[error("undefined column(s): {}", .0.join(", "))]
    UndefinedColumn(Vec<String>),

    /// A key that can never be stored as an index column
    #[error("invalid column name {0:?}")]
    InvalidColumn(String),
}

/// One `column == value` comparison
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    /// Index column
    pub column: String,
    /// Expected value
    pub value: Scalar,
}

/// Conjunction of equality predicates, one per retained configuration key
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    predicates: Vec<Predicate>,
}

impl Query {
    /// Build `k1 == v1 & k2 == v2 & ...` from a configuration
    pub fn from_config(config: &Configuration) -> Result<Self, QueryError> {
        let predicates = config
            .iter()
            .map(|(column, value)| {
                if column.is_empty() || column.contains(['\t', '\n', '\r']) {
                    return Err(QueryError::InvalidColumn(column.clone()));
                }
                Ok(Predicate {
                    column: column.clone(),
                    value: value.clone(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { predicates })
    }

    /// The comparisons making up this query
    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    /// Same query restricted to columns the index knows about
    pub fn restricted_to(&self, index: &ExperimentIndex) -> Self {
        Self {
            predicates: self
                .predicates
                .iter()
                .filter(|p| index.has_column(&p.column))
                .cloned()
                .collect(),
        }
    }

    /// Row positions matching every predicate.
    ///
    /// Fails with [`QueryError::UndefinedColumn`] when the index lacks a
    /// column instead of quietly reporting no match.
    pub fn evaluate(&self, index: &ExperimentIndex) -> Result<Vec<usize>, QueryError> {
        let missing: Vec<String> = self
            .predicates
            .iter()
            .filter(|p| !index.has_column(&p.column))
            .map(|p| p.column.clone())
            .collect();
        if !missing.is_empty() {
            return Err(QueryError::UndefinedColumn(missing));
        }

        Ok(index
            .rows()
            .iter()
            .enumerate()
            .filter(|(_, row)| {
                self.predicates
                    .iter()
                    .all(|p| p.value.matches_cell(row.get(&p.column).map_or("", String::as_str)))
            })
            .map(|(i, _)| i)
            .collect())
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, p) in self.predicates.iter().enumerate() {
            if i > 0 {
                f.write_str(" & ")?;
            }
            match &p.value {
                Scalar::Str(s) => write!(f, "{} == {:?}", p.column, s)?,
                other => write!(f, "{} == {}", p.column, other)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EXPERIMENT_NAME_KEY;

    fn config() -> Configuration {
        Configuration::new()
            .with(EXPERIMENT_NAME_KEY, "baseline")
            .with("lr", 0.1)
            .with("amp", true)
    }

    #[test]
    fn test_rendered_form_quotes_strings() {
        let query = Query::from_config(&config()).unwrap();
        assert_eq!(
            query.to_string(),
            "experiment_name == \"baseline\" & lr == 0.1 & amp == true"
        );
    }

    #[test]
    fn test_evaluate_matches_rows() {
        let mut index = ExperimentIndex::empty();
        index.append(&config(), "16 Oct 2026, 09:00");
        index.append(&config().with("lr", 0.2), "16 Oct 2026, 09:05");

        let query = Query::from_config(&config()).unwrap();
        assert_eq!(query.evaluate(&index).unwrap(), vec![0]);
    }

    #[test]
    fn test_undefined_column_is_explicit() {
        let mut index = ExperimentIndex::empty();
        index.append(&config(), "16 Oct 2026, 09:00");

        let query = Query::from_config(&config().with("warmup", 10)).unwrap();
        assert_eq!(
            query.evaluate(&index),
            Err(QueryError::UndefinedColumn(vec!["warmup".to_string()]))
        );
        assert_eq!(query.restricted_to(&index).evaluate(&index).unwrap(), vec![0]);
    }

    #[test]
    fn test_invalid_column_rejected() {
        let bad = Configuration::new().with("bad\tkey", 1);
        assert_eq!(
            Query::from_config(&bad),
            Err(QueryError::InvalidColumn("bad\tkey".to_string()))
        );
    }
}
