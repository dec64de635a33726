//! Tabular export — renders user records as an in-memory CSV file.

use chrono::SecondsFormat;

use crate::store::UserRecord;

/// Fixed column order of the export file.
pub const EXPORT_COLUMNS: [&str; 10] = [
    "id",
    "username",
    "first_name",
    "last_name",
    "phone",
    "company",
    "request",
    "registered_at",
    "active",
    "last_seen_at",
];

/// File name the export goes out under.
pub const EXPORT_FILE_NAME: &str = "users.csv";

/// Render one row per user, header first.
pub fn export_users(users: &[UserRecord]) -> Vec<u8> {
    let mut out = String::new();
    out.push_str(&EXPORT_COLUMNS.join(","));
    out.push('\n');

    for user in users {
        let row = [
            user.id.to_string(),
            user.username.clone().unwrap_or_default(),
            user.first_name.clone().unwrap_or_default(),
            user.last_name.clone().unwrap_or_default(),
            user.phone.clone().unwrap_or_default(),
            user.company.clone().unwrap_or_default(),
            user.request.clone().unwrap_or_default(),
            user.registered_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            user.active.to_string(),
            user.last_seen_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        ];
        let escaped: Vec<String> = row.iter().map(|field| csv_field(field)).collect();
        out.push_str(&escaped.join(","));
        out.push('\n');
    }

    out.into_bytes()
}

/// Quote a field when it contains a delimiter, quote, or newline.
fn csv_field(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') || field.contains('\r') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    fn sample_user() -> UserRecord {
        let ts = Utc.with_ymd_and_hms(2026, 8, 30, 12, 0, 0).unwrap();
        UserRecord {
            id: 42,
            username: Some("alice".into()),
            first_name: Some("Alice".into()),
            last_name: None,
            phone: Some("+155501".into()),
            company: Some("Acme, Inc.".into()),
            request: Some("Need \"urgent\" help\nASAP".into()),
            registered_at: ts,
            active: true,
            last_seen_at: ts,
        }
    }

    #[test]
    fn header_has_fixed_column_order() {
        let bytes = export_users(&[]);
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(
            text,
            "id,username,first_name,last_name,phone,company,request,registered_at,active,last_seen_at\n"
        );
    }

    #[test]
    fn row_quotes_delimiters_and_quotes() {
        let bytes = export_users(&[sample_user()]);
        let text = String::from_utf8(bytes).unwrap();
        let row = text.lines().nth(1).unwrap();

        assert!(row.starts_with("42,alice,Alice,,+155501,"));
        assert!(row.contains("\"Acme, Inc.\""));
        assert!(text.contains("\"Need \"\"urgent\"\" help\nASAP\""));
        assert!(row.ends_with("2026-08-30T12:00:00Z"));
    }

    #[test]
    fn one_row_per_user() {
        let mut second = sample_user();
        second.id = 43;
        second.request = None;
        let bytes = export_users(&[sample_user(), second]);
        let text = String::from_utf8(bytes).unwrap();
        // Header + 2 rows; the embedded newline in user 42's request adds one line
        assert_eq!(text.lines().count(), 4);
        assert!(text.lines().last().unwrap().starts_with("43,"));
    }

    #[test]
    fn plain_fields_stay_unquoted() {
        assert_eq!(csv_field("hello"), "hello");
        assert_eq!(csv_field(""), "");
        assert_eq!(csv_field("a,b"), "\"a,b\"");
    }
}
