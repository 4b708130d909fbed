use anyhow::{Context, Result};
use keyring::Entry;

const SERVICE_NAME: &str = "basecamp";

/// OS keychain storage for the document store API key, one entry per
/// remote base URL.
pub struct ApiKeyStore;

impl ApiKeyStore {
    /// Store the API key for a remote in the OS keychain
    pub fn store(remote: &str, api_key: &str) -> Result<()> {
        let entry = Entry::new(SERVICE_NAME, remote).context("Failed to create keyring entry")?;
        entry
            .set_password(api_key)
            .context("Failed to store API key in keychain")?;
        Ok(())
    }

    /// Retrieve the API key for a remote
    pub fn get(remote: &str) -> Result<String> {
        let entry = Entry::new(SERVICE_NAME, remote).context("Failed to create keyring entry")?;
        entry
            .get_password()
            .context("Failed to retrieve API key from keychain")
    }

    pub fn delete(remote: &str) -> Result<()> {
        let entry = Entry::new(SERVICE_NAME, remote).context("Failed to create keyring entry")?;
        entry
            .delete_credential()
            .context("Failed to delete API key from keychain")?;
        Ok(())
    }
}
