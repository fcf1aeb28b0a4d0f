//! OAuth2 mail provider discovery from email domains.
//!
//! A provider bundles the IMAP host that accepts `XOAUTH2` and the token endpoint
//! that exchanges refresh tokens. Unknown domains fall back to the Microsoft
//! consumer endpoints, which is where `hotmail`/`outlook` refresh tokens come from.
//!
//! # Example
//!
//! ```
//! use mail_otp::providers::{OAuthProvider, ProviderRegistry};
//!
//! let registry = ProviderRegistry::with_defaults();
//! assert_eq!(registry.discover("user@gmail.com"), OAuthProvider::google());
//! assert_eq!(registry.discover("user@hotmail.com").imap_host, "outlook.office365.com");
//! ```

use std::collections::HashMap;
use std::sync::LazyLock;

/// Microsoft identity platform token endpoint (consumer and work accounts).
pub const MICROSOFT_TOKEN_URL: &str = "https://login.microsoftonline.com/common/oauth2/v2.0/token";

/// Microsoft IMAP host for OAuth-enabled mailboxes.
pub const MICROSOFT_IMAP_HOST: &str = "outlook.office365.com";

/// Google OAuth2 token endpoint.
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Google IMAP host.
pub const GOOGLE_IMAP_HOST: &str = "imap.gmail.com";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
    Microsoft,
    Google,
}

/// Map of email domains to their provider family.
static KNOWN_PROVIDERS: LazyLock<HashMap<&'static str, Family>> = LazyLock::new(|| {
    let mut m = HashMap::new();

    // Microsoft
    for domain in [
        "hotmail.com",
        "hotmail.co.uk",
        "hotmail.fr",
        "hotmail.de",
        "hotmail.it",
        "hotmail.es",
        "outlook.com",
        "outlook.fr",
        "outlook.de",
        "outlook.es",
        "live.com",
        "live.fr",
        "live.co.uk",
        "msn.com",
    ] {
        m.insert(domain, Family::Microsoft);
    }

    // Google
    m.insert("gmail.com", Family::Google);
    m.insert("googlemail.com", Family::Google);

    m
});

/// IMAP host and token endpoint for one mail provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthProvider {
    /// IMAP server hostname (implicit TLS).
    pub imap_host: String,
    /// OAuth2 token endpoint URL.
    pub token_url: String,
}

impl OAuthProvider {
    /// Creates a provider from explicit endpoints.
    #[must_use]
    pub fn new(imap_host: impl Into<String>, token_url: impl Into<String>) -> Self {
        Self {
            imap_host: imap_host.into(),
            token_url: token_url.into(),
        }
    }

    /// Microsoft (Outlook, Hotmail, Live).
    #[must_use]
    pub fn microsoft() -> Self {
        Self::new(MICROSOFT_IMAP_HOST, MICROSOFT_TOKEN_URL)
    }

    /// Google (Gmail).
    #[must_use]
    pub fn google() -> Self {
        Self::new(GOOGLE_IMAP_HOST, GOOGLE_TOKEN_URL)
    }

    fn for_family(family: Family) -> Self {
        match family {
            Family::Microsoft => Self::microsoft(),
            Family::Google => Self::google(),
        }
    }
}

/// A customizable registry for provider discovery.
///
/// Custom registrations take precedence over the built-in table.
///
/// # Example
///
/// ```
/// use mail_otp::providers::{OAuthProvider, ProviderRegistry};
///
/// let mut registry = ProviderRegistry::with_defaults();
/// registry.register(
///     "corp.example",
///     OAuthProvider::new("imap.corp.example", "https://sso.corp.example/token"),
/// );
///
/// assert_eq!(registry.discover("a@corp.example").imap_host, "imap.corp.example");
/// assert_eq!(registry.discover("a@gmail.com").imap_host, "imap.gmail.com");
/// ```
#[derive(Debug, Clone)]
pub struct ProviderRegistry {
    custom: HashMap<String, OAuthProvider>,
    use_defaults: bool,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl ProviderRegistry {
    /// Creates an empty registry without built-in defaults.
    ///
    /// Every unregistered domain resolves to [`OAuthProvider::microsoft`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            custom: HashMap::new(),
            use_defaults: false,
        }
    }

    /// Creates a registry that includes the built-in domain table.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self {
            custom: HashMap::new(),
            use_defaults: true,
        }
    }

    /// Registers a provider for a domain, overriding any existing mapping.
    pub fn register(&mut self, domain: impl Into<String>, provider: OAuthProvider) {
        self.custom.insert(domain.into().to_lowercase(), provider);
    }

    /// Removes a custom mapping. Built-in defaults are unaffected.
    pub fn unregister(&mut self, domain: &str) -> Option<OAuthProvider> {
        self.custom.remove(&domain.to_lowercase())
    }

    /// Resolves the provider for an email address.
    ///
    /// Resolution order:
    /// 1. Custom mappings (added via [`Self::register`])
    /// 2. Built-in defaults (if [`Self::with_defaults`] was used)
    /// 3. Microsoft
    #[must_use]
    pub fn discover(&self, email: &str) -> OAuthProvider {
        let domain = domain_of(email);

        if let Some(provider) = self.custom.get(&domain) {
            return provider.clone();
        }

        if self.use_defaults {
            if let Some(&family) = KNOWN_PROVIDERS.get(domain.as_str()) {
                return OAuthProvider::for_family(family);
            }
        }

        OAuthProvider::microsoft()
    }

    /// Returns `true` if the domain has an explicit or built-in mapping.
    #[must_use]
    pub fn is_known(&self, domain: &str) -> bool {
        let domain = domain.to_lowercase();
        self.custom.contains_key(&domain)
            || (self.use_defaults && KNOWN_PROVIDERS.contains_key(domain.as_str()))
    }
}

fn domain_of(email: &str) -> String {
    email.rsplit_once('@').map_or(email, |(_, d)| d).to_lowercase()
}
