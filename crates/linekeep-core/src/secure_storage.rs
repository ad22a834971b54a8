use crate::codec::Password;
use crate::error::{Result, StoreError};
use keyring::Entry;
use zeroize::Zeroizing;

const SERVICE_NAME: &str = "Linekeep";
const PASSWORD_KEY: &str = "default_password";

fn entry(profile: &str) -> Result<Entry> {
    Entry::new(SERVICE_NAME, &format!("{}:{}", PASSWORD_KEY, profile))
        .map_err(|e| StoreError::Config(format!("keyring init: {e}")))
}

pub fn store_default_password(profile: &str, password: &str) -> Result<()> {
    if password.is_empty() {
        return Err(StoreError::Encryption("refusing to store an empty password".into()));
    }
    entry(profile)?
        .set_password(password)
        .map_err(|e| StoreError::Config(format!("store password: {e}")))
}

/// Returns `None` when no password has been stored for `profile`.
pub fn load_default_password(profile: &str) -> Result<Option<Password>> {
    match entry(profile)?.get_password() {
        Ok(secret) => Ok(Some(Password::from_zeroizing(Zeroizing::new(secret)))),
        Err(keyring::Error::NoEntry) => Ok(None),
        Err(e) => Err(StoreError::Config(format!("load password: {e}"))),
    }
}

pub fn delete_default_password(profile: &str) -> Result<()> {
    match entry(profile)?.delete_password() {
        Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
        Err(e) => Err(StoreError::Config(format!("delete password: {e}"))),
    }
}
