use secrecy::SecretString;
use std::fmt;

/// Connection strings and signing material shared by every action.
#[derive(Clone)]
pub struct GlobalArgs {
    pub dsn: SecretString,
    pub cache_url: SecretString,
    pub jwt_secret: SecretString,
}

impl GlobalArgs {
    #[must_use]
    pub fn new(dsn: String, cache_url: String, jwt_secret: SecretString) -> Self {
        Self {
            dsn: SecretString::from(dsn),
            cache_url: SecretString::from(cache_url),
            jwt_secret,
        }
    }
}

impl fmt::Debug for GlobalArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlobalArgs")
            .field("dsn", &"[REDACTED]")
            .field("cache_url", &"[REDACTED]")
            .field("jwt_secret", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_global_args() {
        let args = GlobalArgs::new(
            "postgres://localhost/authgate".to_string(),
            "redis://:hunter2@localhost:6379".to_string(),
            SecretString::from("s".repeat(32)),
        );
        assert_eq!(args.cache_url.expose_secret(), "redis://:hunter2@localhost:6379");
        assert_eq!(args.jwt_secret.expose_secret().len(), 32);
    }

    #[test]
    fn debug_redacts_secrets() {
        let args = GlobalArgs::new(
            "postgres://user:pw@localhost/authgate".to_string(),
            "redis://:hunter2@localhost:6379".to_string(),
            SecretString::from("top-secret-signing-key-0123456789"),
        );
        let debug = format!("{args:?}");
        assert!(!debug.contains("hunter2"));
        assert!(!debug.contains("top-secret"));
        assert!(!debug.contains("pw@"));
    }
}
