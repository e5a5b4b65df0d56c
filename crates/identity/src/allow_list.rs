//! Allow-list policy: email domain suffix or explicit address list.
//!
//! The address list is a comma-delimited file read once at startup. Lines
//! starting with `#` are comments, fields are trimmed, and only the first
//! field of each record is used.

use std::collections::HashSet;
use std::future::Future;
use std::io::Read;
use std::path::Path;
use std::pin::Pin;

use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::{IdentityValidator, Principal};

/// Approves principals whose email ends in `@<domain>` or is listed explicitly.
#[derive(Debug, Clone, Default)]
pub struct AllowListValidator {
    /// `@domain`, lowercased
    email_suffix: Option<String>,
    /// Lowercased addresses
    emails: HashSet<String>,
}

impl AllowListValidator {
    pub fn new(email_domain: Option<&str>, emails: HashSet<String>) -> Self {
        let email_suffix = email_domain
            .map(|d| d.trim().trim_start_matches('@'))
            .filter(|d| !d.is_empty())
            .map(|d| format!("@{}", d.to_ascii_lowercase()));
        Self {
            email_suffix,
            emails: emails.into_iter().map(|e| e.to_ascii_lowercase()).collect(),
        }
    }

    /// Build the validator, loading the explicit address list if a path is given.
    pub fn load(email_domain: Option<&str>, emails_file: Option<&Path>) -> Result<Self> {
        let emails = match emails_file {
            Some(path) => {
                let file = std::fs::File::open(path).map_err(|e| Error::AllowList {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                })?;
                let emails = parse_emails(file).map_err(|e| Error::AllowList {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                })?;
                info!(path = %path.display(), count = emails.len(), "loaded authenticated emails");
                emails
            }
            None => HashSet::new(),
        };

        let validator = Self::new(email_domain, emails);
        if validator.email_suffix.is_none() && validator.emails.is_empty() {
            warn!("allow list has neither an email domain nor any addresses; every account will be denied");
        }
        Ok(validator)
    }

    /// Whether `email` passes the domain rule or the explicit list.
    /// Both comparisons ignore ASCII case.
    pub fn allows(&self, email: &str) -> bool {
        let email = email.to_ascii_lowercase();
        let by_domain = self
            .email_suffix
            .as_deref()
            .is_some_and(|suffix| email.ends_with(suffix));
        by_domain || self.emails.contains(&email)
    }
}

/// Parse the comment-tolerant address list.
pub fn parse_emails<R: Read>(reader: R) -> std::result::Result<HashSet<String>, csv::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .comment(Some(b'#'))
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    let mut emails = HashSet::new();
    for record in reader.records() {
        let record = record?;
        if let Some(email) = record.get(0).filter(|e| !e.is_empty()) {
            emails.insert(email.to_string());
        }
    }
    Ok(emails)
}

impl IdentityValidator for AllowListValidator {
    fn id(&self) -> &str {
        "allow_list"
    }

    fn validate<'a>(
        &'a self,
        principal: &'a Principal,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
        let valid = match principal.email.as_deref() {
            Some(email) => {
                let valid = self.allows(email);
                info!(email, valid, "validated principal");
                valid
            }
            None => {
                warn!("provider returned no email; allow list cannot approve");
                false
            }
        };
        Box::pin(async move { valid })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Secret;
    use std::io::Write;

    fn principal(email: Option<&str>) -> Principal {
        Principal::new(Secret::new("at_test".into()), email.map(str::to_string))
    }

    #[test]
    fn domain_suffix_approves() {
        let v = AllowListValidator::new(Some("example.com"), HashSet::new());
        assert!(v.allows("alice@example.com"));
        assert!(v.allows("Bob@EXAMPLE.com"));
        assert!(!v.allows("alice@example.com.evil.test"));
        assert!(!v.allows("alice@notexample.com"));
    }

    #[test]
    fn explicit_list_approves() {
        let emails = HashSet::from(["contractor@gmail.com".to_string()]);
        let v = AllowListValidator::new(None, emails);
        assert!(v.allows("contractor@gmail.com"));
        assert!(!v.allows("someone@gmail.com"));
    }

    #[test]
    fn explicit_list_ignores_case() {
        let emails = HashSet::from(["Contractor@Gmail.com".to_string()]);
        let v = AllowListValidator::new(None, emails);
        assert!(v.allows("contractor@gmail.com"));
        assert!(v.allows("CONTRACTOR@GMAIL.COM"));

        let listed = parse_emails("contractor@gmail.com\n".as_bytes()).unwrap();
        let v = AllowListValidator::new(None, listed);
        assert!(v.allows("Contractor@Gmail.com"));
    }

    #[test]
    fn leading_at_in_domain_is_ignored() {
        let v = AllowListValidator::new(Some("@example.com"), HashSet::new());
        assert!(v.allows("alice@example.com"));
    }

    #[test]
    fn parse_skips_comments_and_trims() {
        let input = "# staff\n  alice@example.com , Alice\nbob@example.com\n\n#carol@example.com\n";
        let emails = parse_emails(input.as_bytes()).unwrap();
        assert_eq!(emails.len(), 2);
        assert!(emails.contains("alice@example.com"));
        assert!(emails.contains("bob@example.com"));
        assert!(!emails.contains("carol@example.com"));
    }

    #[test]
    fn load_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# allowed").unwrap();
        writeln!(file, "dave@partner.test").unwrap();

        let v = AllowListValidator::load(Some("example.com"), Some(file.path())).unwrap();
        assert!(v.allows("dave@partner.test"));
        assert!(v.allows("erin@example.com"));
        assert!(!v.allows("frank@partner.test"));
    }

    #[test]
    fn load_missing_file_is_an_error() {
        let err = AllowListValidator::load(None, Some(Path::new("/nonexistent/emails.csv")))
            .unwrap_err();
        assert!(matches!(err, Error::AllowList { .. }), "got: {err:?}");
        assert!(err.to_string().contains("/nonexistent/emails.csv"));
    }

    #[tokio::test]
    async fn validate_uses_principal_email() {
        let v = AllowListValidator::new(Some("example.com"), HashSet::new());
        assert!(v.validate(&principal(Some("alice@example.com"))).await);
        assert!(!v.validate(&principal(Some("alice@other.test"))).await);
    }

    #[tokio::test]
    async fn validate_denies_without_email() {
        let v = AllowListValidator::new(Some("example.com"), HashSet::new());
        assert!(!v.validate(&principal(None)).await);
    }

    #[tokio::test]
    async fn empty_policy_denies_everyone() {
        let v = AllowListValidator::load(None, None).unwrap();
        assert!(!v.validate(&principal(Some("alice@example.com"))).await);
        assert_eq!(v.id(), "allow_list");
    }
}
