use std::fmt;

/// Machine-readable error codes for operator-facing output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigParseError,
    RowsOutOfOrder,
    TaskEntryNotFound,
    TaskIdMismatch,
    StudentNotFound,
    UnexpectedProblemUrl,
    StorageFailure,
    InternalUnexpected,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::ConfigParseError => "E1002",
            Self::RowsOutOfOrder => "E2001",
            Self::TaskEntryNotFound => "E3001",
            Self::TaskIdMismatch => "E3002",
            Self::StudentNotFound => "E3003",
            Self::UnexpectedProblemUrl => "E3004",
            Self::StorageFailure => "E5001",
            Self::InternalUnexpected => "E9001",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::ConfigParseError => "Config file parse error",
            Self::RowsOutOfOrder => "History rows out of chronological order",
            Self::TaskEntryNotFound => "Task entry not found",
            Self::TaskIdMismatch => "Requested task did not match running task",
            Self::StudentNotFound => "Student not found",
            Self::UnexpectedProblemUrl => "problem_url not expected for this operation",
            Self::StorageFailure => "Storage operation failed",
            Self::InternalUnexpected => "Internal unexpected error",
        }
    }

    /// Optional remediation hint that can be surfaced to operators.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::ConfigParseError => Some("Fix syntax in coursekeeper.toml and retry."),
            Self::RowsOutOfOrder => {
                Some("The history fetch must order rows ascending by created.")
            }
            Self::TaskEntryNotFound => None,
            Self::TaskIdMismatch => None,
            Self::StudentNotFound => Some("Use a registered username or email address."),
            Self::UnexpectedProblemUrl => {
                Some("Whole-course sweeps do not take a problem_url; drop it from the task input.")
            }
            Self::StorageFailure => Some("Check disk space and database permissions."),
            Self::InternalUnexpected => Some("Retry once. If persistent, report a bug with logs."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::ErrorCode;
    use std::collections::HashSet;

    #[test]
    fn all_codes_are_unique() {
        let all = [
            ErrorCode::ConfigParseError,
            ErrorCode::RowsOutOfOrder,
            ErrorCode::TaskEntryNotFound,
            ErrorCode::TaskIdMismatch,
            ErrorCode::StudentNotFound,
            ErrorCode::UnexpectedProblemUrl,
            ErrorCode::StorageFailure,
            ErrorCode::InternalUnexpected,
        ];

        let mut seen = HashSet::new();
        for code in all {
            assert!(seen.insert(code.code()), "duplicate code {}", code.code());
        }
    }

    #[test]
    fn code_format_is_machine_friendly() {
        let code = ErrorCode::RowsOutOfOrder.code();
        assert_eq!(code.len(), 5);
        assert!(code.starts_with('E'));
        assert!(code.chars().skip(1).all(|c| c.is_ascii_digit()));
    }
}
