/// Secret string types that redact values in debug output for security.
pub use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

/// Key pair used to authenticate against the eToro public API, for both the REST endpoints
/// (`x-api-key` / `x-user-key` headers) and the streaming `Authenticate` operation.
#[derive(Clone, Debug, Deserialize)]
pub struct Credentials {
    #[serde(alias = "apiKey")]
    pub(crate) api_key: SecretString,
    #[serde(alias = "userKey")]
    pub(crate) user_key: SecretString,
}

impl Credentials {
    #[must_use]
    pub fn new(api_key: String, user_key: String) -> Self {
        Self {
            api_key: SecretString::from(api_key),
            user_key: SecretString::from(user_key),
        }
    }

    /// Returns the API key.
    #[must_use]
    pub fn api_key(&self) -> &SecretString {
        &self.api_key
    }

    /// Returns the user key.
    #[must_use]
    pub fn user_key(&self) -> &SecretString {
        &self.user_key
    }
}
