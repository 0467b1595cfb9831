use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use tracing::debug;

use super::Middleware;
use crate::context::Context;

/// Context key holding the authenticated user name.
pub const AUTH_USER_KEY: &str = "user";

const DEFAULT_REALM: &str = "Authorization Required";

/// HTTP Basic authentication.
///
/// Credentials are encoded once at construction; each request compares its
/// `Authorization` header against every account without short-circuiting.
/// On success the user name is stored under [`AUTH_USER_KEY`]; on failure the
/// chain is aborted with 401 and a `WWW-Authenticate` challenge.
#[derive(Clone)]
pub struct BasicAuth {
    accounts: Vec<(String, String)>,
    challenge: String,
}

impl std::fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicAuth")
            .field("users", &self.accounts.iter().map(|(u, _)| u).collect::<Vec<_>>())
            .field("challenge", &self.challenge)
            .finish()
    }
}

impl BasicAuth {
    /// # Panics
    ///
    /// Panics if an account has an empty user name.
    #[track_caller]
    pub fn new<I, U, P>(accounts: I) -> Self
    where
        I: IntoIterator<Item = (U, P)>,
        U: Into<String>,
        P: AsRef<str>,
    {
        let accounts = accounts
            .into_iter()
            .map(|(user, password)| {
                let user = user.into();
                assert!(!user.is_empty(), "basic auth user name can not be empty");
                let encoded = STANDARD.encode(format!("{user}:{}", password.as_ref()));
                (format!("Basic {encoded}"), user)
            })
            .collect();
        Self {
            accounts,
            challenge: challenge(DEFAULT_REALM),
        }
    }

    #[must_use]
    pub fn with_realm(mut self, realm: &str) -> Self {
        self.challenge = challenge(realm);
        self
    }

    fn search(&self, header: &str) -> Option<&str> {
        let mut found = None;
        for (expected, user) in &self.accounts {
            if constant_time_eq(expected.as_bytes(), header.as_bytes()) && found.is_none() {
                found = Some(user.as_str());
            }
        }
        found
    }
}

fn challenge(realm: &str) -> String {
    let realm = if realm.is_empty() { DEFAULT_REALM } else { realm };
    format!("Basic realm={}", serde_json::Value::from(realm))
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

impl Middleware for BasicAuth {
    fn handle(&self, c: &mut Context) {
        let user = c
            .get_header("Authorization")
            .and_then(|header| self.search(header))
            .map(str::to_owned);
        match user {
            Some(user) => c.set(AUTH_USER_KEY, user),
            None => {
                debug!(path = %c.uri(), "Basic auth rejected request");
                c.header("WWW-Authenticate", &self.challenge);
                c.abort_with_status(401);
            }
        }
    }

    fn name(&self) -> &'static str {
        "brrtframe::middleware::BasicAuth"
    }
}
