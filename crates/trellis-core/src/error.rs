use std::fmt;

/// Machine-readable error codes for agent-friendly decision making.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NotInitialized,
    ConfigParseError,
    MalformedId,
    MalformedCombinedId,
    ColumnNotFound,
    ItemNotFound,
    EmptyTitle,
    UnknownIdentity,
    AmbiguousId,
    DanglingParent,
    MultipleRoots,
    UnresolvableHistory,
    HashMismatch,
    UnsupportedVersion,
    ObjectNotFound,
    StorageIo,
    CommitConflict,
    LockContention,
    InternalUnexpected,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::NotInitialized => "E1001",
            Self::ConfigParseError => "E1002",
            Self::MalformedId => "E2001",
            Self::MalformedCombinedId => "E2002",
            Self::ColumnNotFound => "E2003",
            Self::ItemNotFound => "E2004",
            Self::EmptyTitle => "E2005",
            Self::UnknownIdentity => "E2006",
            Self::AmbiguousId => "E2007",
            Self::DanglingParent => "E3001",
            Self::MultipleRoots => "E3002",
            Self::UnresolvableHistory => "E3003",
            Self::HashMismatch => "E3004",
            Self::UnsupportedVersion => "E3005",
            Self::ObjectNotFound => "E4001",
            Self::StorageIo => "E5001",
            Self::CommitConflict => "E5002",
            Self::LockContention => "E5003",
            Self::InternalUnexpected => "E9001",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::NotInitialized => "Repository not initialized",
            Self::ConfigParseError => "Config file parse error",
            Self::MalformedId => "Malformed id",
            Self::MalformedCombinedId => "Malformed combined id",
            Self::ColumnNotFound => "Column not found",
            Self::ItemNotFound => "Item not found",
            Self::EmptyTitle => "Empty title",
            Self::UnknownIdentity => "Unknown identity",
            Self::AmbiguousId => "Ambiguous id prefix",
            Self::DanglingParent => "Operation references a missing parent",
            Self::MultipleRoots => "Operation log would have more than one root",
            Self::UnresolvableHistory => "Fetched history references missing objects",
            Self::HashMismatch => "Object content does not match its address",
            Self::UnsupportedVersion => "Unsupported operation format version",
            Self::ObjectNotFound => "Object not found",
            Self::StorageIo => "Storage I/O failure",
            Self::CommitConflict => "Commit lost the ref race too many times",
            Self::LockContention => "Lock contention",
            Self::InternalUnexpected => "Internal unexpected error",
        }
    }

    /// Optional remediation hint that can be surfaced to operators and agents.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::NotInitialized => Some("Run `trellis init` to initialize this repository."),
            Self::ConfigParseError => Some("Fix syntax in .trellis/config.toml and retry."),
            Self::MalformedId | Self::MalformedCombinedId => {
                Some("Ids are lowercase hex; use `trellis board show` to list them.")
            }
            Self::ColumnNotFound | Self::ItemNotFound => None,
            Self::EmptyTitle => Some("Provide a non-empty --title."),
            Self::UnknownIdentity => Some("Sync identities from the remote and retry."),
            Self::AmbiguousId => Some("Use a longer id prefix to disambiguate."),
            Self::DanglingParent | Self::UnresolvableHistory => {
                Some("Fetch the missing objects from the remote before merging.")
            }
            Self::MultipleRoots => Some("Every operation after the first must cite a parent."),
            Self::HashMismatch => Some("The object store is corrupt; re-fetch the object."),
            Self::UnsupportedVersion => Some("Upgrade trellis to read this history."),
            Self::ObjectNotFound => None,
            Self::StorageIo => Some("Check disk space and write permissions."),
            Self::CommitConflict => Some("Another writer keeps advancing the ref; retry later."),
            Self::LockContention => Some("Retry after the other `trellis` process releases its lock."),
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

    const ALL: [ErrorCode; 19] = [
        ErrorCode::NotInitialized,
        ErrorCode::ConfigParseError,
        ErrorCode::MalformedId,
        ErrorCode::MalformedCombinedId,
        ErrorCode::ColumnNotFound,
        ErrorCode::ItemNotFound,
        ErrorCode::EmptyTitle,
        ErrorCode::UnknownIdentity,
        ErrorCode::AmbiguousId,
        ErrorCode::DanglingParent,
        ErrorCode::MultipleRoots,
        ErrorCode::UnresolvableHistory,
        ErrorCode::HashMismatch,
        ErrorCode::UnsupportedVersion,
        ErrorCode::ObjectNotFound,
        ErrorCode::StorageIo,
        ErrorCode::CommitConflict,
        ErrorCode::LockContention,
        ErrorCode::InternalUnexpected,
    ];

    #[test]
    fn all_codes_are_unique() {
        let mut seen = HashSet::new();
        for code in ALL {
            assert!(seen.insert(code.code()), "duplicate code {}", code.code());
        }
    }

    #[test]
    fn code_format_is_machine_friendly() {
        for code in ALL {
            let s = code.code();
            assert_eq!(s.len(), 5);
            assert!(s.starts_with('E'));
            assert!(s.chars().skip(1).all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn display_matches_code() {
        assert_eq!(ErrorCode::CommitConflict.to_string(), "E5002");
    }
}
