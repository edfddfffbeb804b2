use keyring::Entry;
use tracing::debug;

use crate::error::Result;
use crate::platform::SessionTokenProvider;

const SERVICE_NAME: &str = "Relock";
const TOKEN_KEY: &str = "session_token";

fn token_entry(profile: &str) -> Result<Entry> {
    Ok(Entry::new(SERVICE_NAME, &format!("{}:{}", TOKEN_KEY, profile))?)
}

pub fn store_session_token(profile: &str, token: &str) -> Result<()> {
    token_entry(profile)?.set_password(token)?;
    Ok(())
}

pub fn get_session_token(profile: &str) -> Result<Option<String>> {
    match token_entry(profile)?.get_password() {
        Ok(token) => Ok(Some(token)),
        Err(keyring::Error::NoEntry) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn delete_session_token(profile: &str) -> Result<()> {
    match token_entry(profile)?.delete_password() {
        Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Any non-empty stored value counts as a session, whitespace included.
fn token_present(token: &str) -> bool {
    !token.is_empty()
}

/// Session token presence backed by the OS credential store.
#[derive(Debug, Clone)]
pub struct KeyringSessionTokens {
    profile: String,
}

impl KeyringSessionTokens {
    pub fn new(profile: impl Into<String>) -> Self {
        Self {
            profile: profile.into(),
        }
    }
}

impl SessionTokenProvider for KeyringSessionTokens {
    fn has_token(&self) -> bool {
        match get_session_token(&self.profile) {
            Ok(Some(token)) => token_present(&token),
            Ok(None) => false,
            Err(err) => {
                debug!(error = %err, profile = %self.profile, "session token unreadable");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_empty_token_is_absent() {
        assert!(!token_present(""));
        assert!(token_present("abc"));
        assert!(token_present("   "));
    }
}
