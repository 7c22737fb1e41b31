//! Well-known file locations

use camino::Utf8PathBuf;

pub fn config_dir() -> anyhow::Result<Utf8PathBuf> {
    let dir = dirs::config_dir().ok_or_else(|| anyhow::anyhow!("Can't get config directory"))?;
    let dir = Utf8PathBuf::try_from(dir)?;
    Ok(dir.join("drivesync"))
}

pub fn cache_dir() -> anyhow::Result<Utf8PathBuf> {
    let dir = dirs::cache_dir().ok_or_else(|| anyhow::anyhow!("Can't get cache directory"))?;
    let dir = Utf8PathBuf::try_from(dir)?;
    Ok(dir.join("drivesync"))
}

/// Default location of the OAuth application secret
pub fn secret_file() -> anyhow::Result<Utf8PathBuf> {
    Ok(config_dir()?.join("client_secret.json"))
}

/// Default location of the cached tokens
pub fn token_cache_file() -> anyhow::Result<Utf8PathBuf> {
    Ok(cache_dir()?.join("token_cache.json"))
}
