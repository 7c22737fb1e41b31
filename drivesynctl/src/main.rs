use anyhow::Context;
use camino::Utf8PathBuf;
use clap::Parser;
use drivesync::{
    drive::GoogleDrive,
    loc, oauth,
    oauth::TokenPersist,
    sync::{Mode, Syncer},
};

#[derive(Parser)]
#[command(name = "drivesynctl")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path of the local file
    #[arg(short = 'l', value_name = "LOCAL_PATH")]
    local_path: Utf8PathBuf,

    /// Name of the remote file on Google Drive
    #[arg(short = 'r', value_name = "REMOTE_NAME")]
    remote_name: String,

    /// Path to the OAuth client secret file
    /// [default: the drivesync config directory]
    #[arg(long, value_name = "FILE")]
    secret: Option<Utf8PathBuf>,

    /// Path to the cached token file
    /// [default: the drivesync cache directory]
    #[arg(long, value_name = "FILE")]
    token_cache: Option<Utf8PathBuf>,

    /// Transfer mode. Two-way sync when omitted.
    mode: Option<ModeArg>,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum ModeArg {
    /// Push the local file to Google Drive if it is newer
    Upload,
    /// Fetch the remote file from Google Drive if it is newer
    Download,
    /// Delete the remote file
    Delete,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    let secret_path = match cli.secret {
        Some(path) => path,
        None => loc::secret_file()?,
    };
    let token_cache_path = match cli.token_cache {
        Some(path) => path,
        None => loc::token_cache_file()?,
    };
    if let Some(dir) = token_cache_path.parent() {
        std::fs::create_dir_all(dir)?;
    }

    let secret = oauth::load_secret(&secret_path)
        .await
        .with_context(|| format!("Failed to load the OAuth secret from {secret_path}"))?;
    let auth = oauth::Client::new(
        secret,
        TokenPersist::MemoryAndDisk(token_cache_path.clone()),
        None,
    )
    .await?;
    let drive = GoogleDrive::new(auth, reqwest::Client::new()).await;
    let drive = match drive {
        Ok(drive) => drive,
        Err(err) => {
            hint_on_auth_error(&err, &token_cache_path);
            return Err(err.into());
        }
    };

    let syncer = Syncer::new(drive, cli.local_path, cli.remote_name);
    let res = match cli.mode {
        None => syncer.run(Mode::Sync).await,
        Some(ModeArg::Upload) => syncer.run(Mode::Upload).await,
        Some(ModeArg::Download) => syncer.run(Mode::Download).await,
        Some(ModeArg::Delete) => syncer.delete_remote().await,
    };
    if let Err(err) = res {
        hint_on_auth_error(&err, &token_cache_path);
        return Err(err.into());
    }
    Ok(())
}

fn hint_on_auth_error(err: &drivesync::Error, token_cache_path: &Utf8PathBuf) {
    if matches!(err, drivesync::Error::Auth(_)) {
        log::error!("authorization failed; if this persists, try to delete {token_cache_path}");
    }
}
