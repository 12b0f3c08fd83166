//! Offline classification of connection strings, API keys and branch names.
//!
//! Everything here is pure and total: no I/O, no panics, a boolean (or a
//! typed rejection) for every input. Unknown cloud hosts are treated as
//! production; unknown key formats are allowed.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::NeonError;

/// Provider-generated Neon endpoint hostnames, e.g. `ep-cool-darkness-123456`.
static NEON_BRANCH_ENDPOINT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^ep-[a-z]+-[a-z]+-[a-z0-9]+(-pooler)?\.[a-z0-9.-]*neon\.tech$").unwrap()
});

static TEST_BRANCH_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(test|unit|e2e|integration)-").unwrap());

/// Managed Postgres hosts with no branch exception.
const CLOUD_DATABASE_HOSTS: [&str; 10] = [
    ".rds.amazonaws.com",
    ".compute.amazonaws.com",
    ".supabase.co",
    ".supabase.com",
    ".database.azure.com",
    ".aivencloud.com",
    ".cockroachlabs.cloud",
    ".psdb.cloud",
    ".render.com",
    ".railway.app",
];

const TEST_KEY_PREFIXES: [&str; 4] = ["test_", "sk_test_", "fake_", "mock_"];

const PLACEHOLDER_KEYS: [&str; 7] = [
    "your-api-key",
    "your_api_key",
    "placeholder",
    "changeme",
    "dummy",
    "test",
    "xxx",
];

/// Stripe live keys, OpenAI (`sk-`, `sk-proj-`), Resend, Google AI.
const LIVE_KEY_PREFIXES: [&str; 6] = ["sk_live_", "rk_live_", "pk_live_", "sk-", "re_", "AIza"];

/// Does this connection string point at something that could be production?
pub fn is_production_database_url(url: &str) -> bool {
    let url = url.trim().to_ascii_lowercase();
    if url.is_empty() {
        return false;
    }

    // Anywhere in the string: libpq honours `host=` overrides in the query.
    if CLOUD_DATABASE_HOSTS.iter().any(|suffix| url.contains(suffix)) {
        return true;
    }
    if url.contains(".neon.tech") {
        let branch_host = url_host(&url).is_some_and(|host| NEON_BRANCH_ENDPOINT.is_match(host));
        return !(branch_host && url.matches(".neon.tech").count() == 1);
    }
    false
}

/// Byte offset where the host begins in `scheme://[userinfo@]host...`.
pub(crate) fn host_start(url: &str) -> Option<usize> {
    let scheme_end = url.find("://")? + 3;
    let authority_len = url[scheme_end..]
        .find(['/', '?', '#'])
        .unwrap_or(url.len() - scheme_end);
    let authority = &url[scheme_end..scheme_end + authority_len];
    Some(scheme_end + authority.rfind('@').map_or(0, |at| at + 1))
}

/// Host of a URL, without userinfo, port, path or query.
fn url_host(url: &str) -> Option<&str> {
    let rest = &url[host_start(url)?..];
    let end = rest.find([':', '/', '?', '#']).unwrap_or(rest.len());
    Some(&rest[..end])
}

/// Does this API key look live? Unrecognized formats are allowed.
pub fn is_production_api_key(key: &str) -> bool {
    let key = key.trim();
    if key.is_empty() {
        return false;
    }

    let lower = key.to_ascii_lowercase();
    if TEST_KEY_PREFIXES.iter().any(|p| lower.starts_with(p)) {
        return false;
    }
    if PLACEHOLDER_KEYS.contains(&lower.as_str()) {
        return false;
    }

    LIVE_KEY_PREFIXES.iter().any(|p| key.starts_with(p))
}

/// Test branches must carry a recognizable prefix so sweeps can find them.
pub fn validate_branch_name(name: &str) -> Result<(), NeonError> {
    if TEST_BRANCH_NAME.is_match(name) {
        Ok(())
    } else {
        Err(NeonError::InvalidBranchName {
            name: name.to_string(),
        })
    }
}

pub fn is_test_branch_name(name: &str) -> bool {
    TEST_BRANCH_NAME.is_match(name)
}

/// Reject `branch_id` when it is the configured primary branch.
pub fn validate_not_production_branch(
    branch_id: &str,
    primary_branch_id: Option<&str>,
) -> Result<(), NeonError> {
    match primary_branch_id {
        Some(primary) if !primary.is_empty() && primary == branch_id => {
            Err(NeonError::ProductionParent {
                branch_id: branch_id.to_string(),
            })
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn neon_branch_endpoints_are_not_production() {
        assert!(!is_production_database_url(
            "postgresql://app:pw@ep-cool-darkness-123456.us-east-2.aws.neon.tech/neondb?sslmode=require"
        ));
        assert!(!is_production_database_url(
            "postgresql://app:pw@ep-cool-darkness-123456-pooler.us-east-2.aws.neon.tech/neondb"
        ));
    }

    #[test]
    fn other_neon_hosts_are_production() {
        assert!(is_production_database_url(
            "postgresql://app:pw@main-db.us-east-2.aws.neon.tech/neondb"
        ));
        assert!(is_production_database_url(
            "postgresql://app:pw@prod.neon.tech/neondb"
        ));
    }

    #[test]
    fn branch_lookalikes_outside_the_host_do_not_clear_it() {
        assert!(is_production_database_url(
            "postgresql://app:pw@main-prod.us-east-2.aws.neon.tech/neondb?options=ep-cool-darkness-123456.us-east-2.aws.neon.tech"
        ));
        assert!(is_production_database_url(
            "postgresql://ep-cool-darkness-123456.us-east-2.aws.neon.tech:pw@main-prod.us-east-2.aws.neon.tech/neondb"
        ));
        assert!(is_production_database_url(
            "postgresql://app:pw@ep-cool-darkness-123456.us-east-2.aws.neon.tech/neondb?host=main-prod.neon.tech"
        ));
        assert!(is_production_database_url(
            "postgres://u:p@db.internal.example/app?host=x.rds.amazonaws.com"
        ));
    }

    #[test]
    fn hosts_are_read_past_userinfo_and_port() {
        assert_eq!(url_host("postgres://u:p@Host.example:5432/db"), Some("Host.example"));
        assert_eq!(url_host("postgres://localhost/db"), Some("localhost"));
        assert_eq!(url_host("not a url"), None);
    }

    #[test]
    fn local_and_empty_urls_are_not_production() {
        assert!(!is_production_database_url(""));
        assert!(!is_production_database_url("postgres://localhost/db"));
        assert!(!is_production_database_url("postgres://postgres@127.0.0.1:5432/app"));
        assert!(!is_production_database_url("not a url"));
    }

    #[test]
    fn rds_is_always_production() {
        assert!(is_production_database_url(
            "postgres://u:p@mydb.abc123.us-east-1.rds.amazonaws.com:5432/app"
        ));
        assert!(is_production_database_url(
            "postgres://u:p@ep-cool-darkness-123456.rds.amazonaws.com/app"
        ));
        assert!(is_production_database_url("MYDB.RDS.AMAZONAWS.COM"));
    }

    #[test]
    fn api_key_classification() {
        assert!(!is_production_api_key(""));
        assert!(!is_production_api_key("test_abc123"));
        assert!(!is_production_api_key("SK_TEST_abc"));
        assert!(!is_production_api_key("mock_key"));
        assert!(!is_production_api_key("placeholder"));
        assert!(is_production_api_key("sk_live_abcdef"));
        assert!(is_production_api_key("sk-abcdef"));
        assert!(is_production_api_key("sk-proj-abcdef"));
        assert!(is_production_api_key("re_123456"));
        assert!(is_production_api_key("AIzaSyExample"));
        assert!(!is_production_api_key("xyz123"));
    }

    #[test]
    fn branch_names_need_a_test_prefix() {
        for ok in ["test-1", "unit-1700000000000", "e2e-run", "integration-x"] {
            assert!(validate_branch_name(ok).is_ok(), "{ok}");
        }
        for bad in ["prod-run", "main", "unit_1", "my-unit-1", ""] {
            assert!(
                matches!(validate_branch_name(bad), Err(NeonError::InvalidBranchName { .. })),
                "{bad}"
            );
        }
    }

    #[test]
    fn primary_branch_is_rejected_as_parent() {
        assert!(validate_not_production_branch("br-main", Some("br-main")).is_err());
        assert!(validate_not_production_branch("br-staging", Some("br-main")).is_ok());
        assert!(validate_not_production_branch("br-staging", None).is_ok());
        assert!(validate_not_production_branch("", Some("")).is_ok());
    }
}
