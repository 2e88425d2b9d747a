// SPDX-License-Identifier: GPL-3.0-only

//! Passphrase input from the environment or the terminal

use anyhow::{Context, Result, bail};
use partcrypt_types::Passphrase;

pub const PASSPHRASE_ENV: &str = "PARTCRYPT_PASSPHRASE";
pub const NEW_PASSPHRASE_ENV: &str = "PARTCRYPT_NEW_PASSPHRASE";

fn from_env(var: &str) -> Option<Passphrase> {
    std::env::var(var)
        .ok()
        .filter(|value| !value.is_empty())
        .map(Passphrase::new)
}

fn read(prompt: &str) -> Result<Passphrase> {
    let value = rpassword::prompt_password(format!("{prompt}: "))
        .with_context(|| format!("failed to read {}", prompt.to_lowercase()))?;
    if value.is_empty() {
        bail!("{prompt} must not be empty");
    }
    Ok(Passphrase::new(value))
}

/// An existing passphrase
pub fn existing(var: &str, prompt: &str) -> Result<Passphrase> {
    match from_env(var) {
        Some(passphrase) => Ok(passphrase),
        None => read(prompt),
    }
}

/// A passphrase about to be set; typed twice when prompted
pub fn new(var: &str, prompt: &str) -> Result<Passphrase> {
    if let Some(passphrase) = from_env(var) {
        return Ok(passphrase);
    }

    let first = read(prompt)?;
    let second = read(&format!("Confirm {}", prompt.to_lowercase()))?;
    if first != second {
        bail!("Passphrases do not match");
    }
    Ok(first)
}
