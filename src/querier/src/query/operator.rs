use serde::{Deserialize, Serialize};

/// Comparison operators a filter leaf can use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    Equal,
    NotEqual,
    GreaterThan,
    GreaterThanOrEq,
    LessThan,
    LessThanOrEq,
    Like,
    NotLike,
    ILike,
    NotILike,
    Between,
    NotBetween,
    In,
    NotIn,
    Exists,
    NotExists,
    Regexp,
    NotRegexp,
    Contains,
    NotContains,
}

impl FilterOperator {
    /// Operators that match rows where the key is absent or differs.
    pub fn is_negative(&self) -> bool {
        matches!(
            self,
            FilterOperator::NotEqual
                | FilterOperator::NotLike
                | FilterOperator::NotILike
                | FilterOperator::NotBetween
                | FilterOperator::NotIn
                | FilterOperator::NotExists
                | FilterOperator::NotRegexp
                | FilterOperator::NotContains
        )
    }

    /// Positive operators only match rows that carry the key at all.
    pub fn implies_existence(&self) -> bool {
        !self.is_negative()
    }

    /// The operator with the opposite truth value, used for `NOT <op>` forms.
    pub fn negate(&self) -> Self {
        match self {
            FilterOperator::Equal => FilterOperator::NotEqual,
            FilterOperator::NotEqual => FilterOperator::Equal,
            FilterOperator::GreaterThan => FilterOperator::LessThanOrEq,
            FilterOperator::GreaterThanOrEq => FilterOperator::LessThan,
            FilterOperator::LessThan => FilterOperator::GreaterThanOrEq,
            FilterOperator::LessThanOrEq => FilterOperator::GreaterThan,
            FilterOperator::Like => FilterOperator::NotLike,
            FilterOperator::NotLike => FilterOperator::Like,
            FilterOperator::ILike => FilterOperator::NotILike,
            FilterOperator::NotILike => FilterOperator::ILike,
            FilterOperator::Between => FilterOperator::NotBetween,
            FilterOperator::NotBetween => FilterOperator::Between,
            FilterOperator::In => FilterOperator::NotIn,
            FilterOperator::NotIn => FilterOperator::In,
            FilterOperator::Exists => FilterOperator::NotExists,
            FilterOperator::NotExists => FilterOperator::Exists,
            FilterOperator::Regexp => FilterOperator::NotRegexp,
            FilterOperator::NotRegexp => FilterOperator::Regexp,
            FilterOperator::Contains => FilterOperator::NotContains,
            FilterOperator::NotContains => FilterOperator::Contains,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOperator::Equal => "=",
            FilterOperator::NotEqual => "!=",
            FilterOperator::GreaterThan => ">",
            FilterOperator::GreaterThanOrEq => ">=",
            FilterOperator::LessThan => "<",
            FilterOperator::LessThanOrEq => "<=",
            FilterOperator::Like => "LIKE",
            FilterOperator::NotLike => "NOT LIKE",
            FilterOperator::ILike => "ILIKE",
            FilterOperator::NotILike => "NOT ILIKE",
            FilterOperator::Between => "BETWEEN",
            FilterOperator::NotBetween => "NOT BETWEEN",
            FilterOperator::In => "IN",
            FilterOperator::NotIn => "NOT IN",
            FilterOperator::Exists => "EXISTS",
            FilterOperator::NotExists => "NOT EXISTS",
            FilterOperator::Regexp => "REGEXP",
            FilterOperator::NotRegexp => "NOT REGEXP",
            FilterOperator::Contains => "CONTAINS",
            FilterOperator::NotContains => "NOT CONTAINS",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negation_is_an_involution() {
        let all = [
            FilterOperator::Equal,
            FilterOperator::GreaterThan,
            FilterOperator::Like,
            FilterOperator::ILike,
            FilterOperator::Between,
            FilterOperator::In,
            FilterOperator::Exists,
            FilterOperator::Regexp,
            FilterOperator::Contains,
        ];
        for op in all {
            assert_eq!(op.negate().negate(), op);
        }
    }

    #[test]
    fn test_positive_operators_imply_existence() {
        assert!(FilterOperator::Equal.implies_existence());
        assert!(FilterOperator::Exists.implies_existence());
        assert!(!FilterOperator::NotEqual.implies_existence());
        assert!(!FilterOperator::NotIn.implies_existence());
        // comparison negations stay positive
        assert!(!FilterOperator::GreaterThan.negate().is_negative());
    }
}
