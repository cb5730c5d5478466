use thiserror::Error;

/// Fatal setup problems. Raised before any simulation stepping and always
/// naming the offending group, region or column.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigurationError {
    #[error("mesh has no tet group named '{group}'")]
    MissingGroup { group: String },

    #[error("required region '{region}' is empty")]
    EmptyRegion { region: String },

    #[error("malformed initial value table, column '{column}'{}: {detail}", row_suffix(.row))]
    MalformedTable {
        column: String,
        row: Option<usize>,
        detail: String,
    },

    #[error("initial value factor must be finite and non-negative, got {factor}")]
    InvalidFactor { factor: f64 },

    #[error("invalid predicate: {detail}")]
    InvalidPredicate { detail: String },
}

fn row_suffix(row: &Option<usize>) -> String {
    match row {
        Some(r) => format!(" (row {})", r),
        None => String::new(),
    }
}

impl ConfigurationError {
    pub(crate) fn table(column: impl Into<String>, row: Option<usize>, detail: impl Into<String>) -> Self {
        ConfigurationError::MalformedTable {
            column: column.into(),
            row,
            detail: detail.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_offender() {
        let err = ConfigurationError::MissingGroup { group: "Volume3".into() };
        assert!(err.to_string().contains("Volume3"));

        let err = ConfigurationError::table("cyt init count", Some(4), "not a number: 'abc'");
        let msg = err.to_string();
        assert!(msg.contains("cyt init count"));
        assert!(msg.contains("row 4"));
    }
}
