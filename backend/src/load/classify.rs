//! Database error classification.
//!
//! SQL Server reports constraint and conversion failures with stable
//! message numbers and wording; both are checked.

use crate::error::LoadErrorKind;
use crate::load::cursor::DbError;

const TYPE_COERCION_PATTERNS: &[&str] = &[
    "cast specification",
    "converting",
    "conversion failed",
    "invalid character value",
    "string data, right truncation",
    "would be truncated",
    "out of range",
    "arithmetic overflow",
];

/// Classify a cursor error into a load error kind.
pub fn classify(error: &DbError) -> LoadErrorKind {
    let message = error.message.to_lowercase();

    match error.code {
        Some(2627) | Some(2601) => return LoadErrorKind::PrimaryKeyViolation,
        Some(515) => return LoadErrorKind::NotNullViolation,
        Some(547) if message.contains("check constraint") => return LoadErrorKind::CheckConstraintViolation,
        Some(547) => return LoadErrorKind::ForeignKeyViolation,
        Some(245) | Some(8114) | Some(8115) | Some(241) | Some(242) | Some(2628) | Some(8152) => {
            return LoadErrorKind::TypeCoercion
        }
        _ => {}
    }

    if message.contains("primary key constraint")
        || message.contains("unique key constraint")
        || message.contains("duplicate key")
    {
        LoadErrorKind::PrimaryKeyViolation
    } else if message.contains("foreign key constraint") || message.contains("reference constraint") {
        LoadErrorKind::ForeignKeyViolation
    } else if message.contains("check constraint") {
        LoadErrorKind::CheckConstraintViolation
    } else if message.contains("cannot insert the value null") || message.contains("does not allow nulls") {
        LoadErrorKind::NotNullViolation
    } else if TYPE_COERCION_PATTERNS.iter().any(|p| message.contains(p)) {
        LoadErrorKind::TypeCoercion
    } else {
        LoadErrorKind::System
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_by_message() {
        let cases = [
            (
                "Violation of PRIMARY KEY constraint 'PK_scores'. Cannot insert duplicate key in object 'dbo.scores'.",
                LoadErrorKind::PrimaryKeyViolation,
            ),
            (
                "The INSERT statement conflicted with the FOREIGN KEY constraint \"FK_contact_app\".",
                LoadErrorKind::ForeignKeyViolation,
            ),
            (
                "The INSERT statement conflicted with the CHECK constraint \"CK_status\".",
                LoadErrorKind::CheckConstraintViolation,
            ),
            (
                "Cannot insert the value NULL into column 'app_id', table 'dbo.app_base'; column does not allow nulls.",
                LoadErrorKind::NotNullViolation,
            ),
            ("[22018] Invalid character value for cast specification", LoadErrorKind::TypeCoercion),
            ("Error converting data type nvarchar to numeric.", LoadErrorKind::TypeCoercion),
            ("Communication link failure", LoadErrorKind::System),
        ];

        for (message, expected) in cases {
            assert_eq!(classify(&DbError::new(message)), expected, "{message}");
        }
    }

    #[test]
    fn test_classify_by_code() {
        assert_eq!(classify(&DbError::new("x").with_code(2627)), LoadErrorKind::PrimaryKeyViolation);
        assert_eq!(
            classify(&DbError::new("conflicted with the CHECK constraint").with_code(547)),
            LoadErrorKind::CheckConstraintViolation
        );
        assert_eq!(classify(&DbError::new("conflicted").with_code(547)), LoadErrorKind::ForeignKeyViolation);
        assert_eq!(classify(&DbError::new("x").with_code(8114)), LoadErrorKind::TypeCoercion);
    }
}
