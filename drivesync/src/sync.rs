//! Reconciliation of a local file with a named remote file.

use std::{cmp::Ordering, fmt};

use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};
use tokio::io;

use crate::{compare_mtime, fs, PersistCache};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Two-way: the newest side wins
    Sync,
    /// One-way: local to remote only
    Upload,
    /// One-way: remote to local only
    Download,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Sync => f.write_str("sync"),
            Mode::Upload => f.write_str("upload"),
            Mode::Download => f.write_str("download"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The remote file doesn't exist, create it from the local file
    CreateRemote,
    /// The local file is authoritative, overwrite the remote content
    SendLocal,
    /// The remote file is authoritative, overwrite the local content
    FetchRemote,
    /// Nothing to transfer
    UpToDate,
}

/// A side required by the mode is missing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Missing {
    Local,
    Remote,
    Both,
}

/// Picks the action for a file pair from its modification times.
///
/// `None` stands for an absent file on that side. One-way modes report the
/// missing mandatory side instead of deciding; they also never transfer
/// against their direction, even when the other side is newer.
pub fn decide(
    mode: Mode,
    local: Option<DateTime<Utc>>,
    remote: Option<DateTime<Utc>>,
) -> Result<Decision, Missing> {
    match mode {
        Mode::Sync => match (local, remote) {
            (None, None) => Err(Missing::Both),
            (Some(_), None) => Ok(Decision::CreateRemote),
            (None, Some(_)) => Ok(Decision::FetchRemote),
            (Some(ml), Some(mr)) => Ok(match compare_mtime(ml, mr) {
                Ordering::Greater => Decision::SendLocal,
                Ordering::Less => Decision::FetchRemote,
                Ordering::Equal => Decision::UpToDate,
            }),
        },
        Mode::Upload => match (local, remote) {
            (None, _) => Err(Missing::Local),
            (Some(_), None) => Ok(Decision::CreateRemote),
            (Some(ml), Some(mr)) => Ok(match compare_mtime(ml, mr) {
                Ordering::Greater => Decision::SendLocal,
                _ => Decision::UpToDate,
            }),
        },
        Mode::Download => match (local, remote) {
            (_, None) => Err(Missing::Remote),
            (None, Some(_)) => Ok(Decision::FetchRemote),
            (Some(ml), Some(mr)) => Ok(match compare_mtime(ml, mr) {
                Ordering::Less => Decision::FetchRemote,
                _ => Decision::UpToDate,
            }),
        },
    }
}

/// Metadata of the remote file
#[derive(Debug, Clone)]
pub struct RemoteFile {
    pub id: String,
    pub name: String,
    pub size: Option<u64>,
    pub mtime: DateTime<Utc>,
}

/// Remote storage hosting a file that is looked up by name.
pub trait Remote {
    async fn find_by_name(&self, name: &str) -> crate::Result<Option<RemoteFile>>;

    async fn metadata(&self, id: &str) -> crate::Result<RemoteFile>;

    async fn create(
        &self,
        name: &str,
        mtime: Option<DateTime<Utc>>,
        size: u64,
        data: impl io::AsyncRead + Send,
    ) -> crate::Result<RemoteFile>;

    async fn update(
        &self,
        id: &str,
        mtime: DateTime<Utc>,
        size: u64,
        data: impl io::AsyncRead + Send,
    ) -> crate::Result<RemoteFile>;

    async fn download(&self, id: &str) -> crate::Result<impl io::AsyncRead + Send>;

    async fn delete(&self, id: &str) -> crate::Result<()>;
}

/// Drives the reconciliation of one local path with one remote name.
pub struct Syncer<R> {
    remote: R,
    local_path: Utf8PathBuf,
    remote_name: String,
}

impl<R> Syncer<R>
where
    R: Remote + PersistCache,
{
    pub fn new(remote: R, local_path: Utf8PathBuf, remote_name: String) -> Self {
        Self {
            remote,
            local_path,
            remote_name,
        }
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    pub async fn run(&self, mode: Mode) -> crate::Result<()> {
        let local = fs::stat(&self.local_path).await?;
        let remote = self.remote.find_by_name(&self.remote_name).await?;

        let decision = decide(
            mode,
            local.as_ref().map(|l| l.mtime()),
            remote.as_ref().map(|r| r.mtime),
        )
        .map_err(|missing| self.missing_error(missing))?;

        log::debug!(
            "{mode} '{}' <-> '{}': {decision:?}",
            self.local_path,
            self.remote_name
        );

        match decision {
            Decision::CreateRemote => {
                // decide() only creates when the local file exists
                let local = local.expect("local side checked by decide");
                let data = local.open().await?;
                self.remote
                    .create(&self.remote_name, Some(local.mtime()), local.size(), data)
                    .await?;
            }
            Decision::SendLocal => {
                let local = local.expect("local side checked by decide");
                let remote = remote.expect("remote side checked by decide");
                let data = local.open().await?;
                self.remote
                    .update(&remote.id, local.mtime(), local.size(), data)
                    .await?;
            }
            Decision::FetchRemote => {
                let remote = remote.expect("remote side checked by decide");
                // re-read the metadata by id: the name query is not
                // authoritative for the mtime stamped on the local file
                let meta = self.remote.metadata(&remote.id).await?;
                let data = self.remote.download(&remote.id).await?;
                fs::write_from(&self.local_path, data, Some(meta.mtime)).await?;
            }
            Decision::UpToDate => {
                log::info!(
                    "'{}' and '{}' are in sync",
                    self.local_path,
                    self.remote_name
                );
            }
        }

        self.remote.persist_cache().await
    }

    /// Deletes the remote file. The local file is left untouched.
    pub async fn delete_remote(&self) -> crate::Result<()> {
        let remote = self.remote.find_by_name(&self.remote_name).await?;
        match remote {
            Some(remote) => self.remote.delete(&remote.id).await?,
            None => return Err(self.missing_error(Missing::Remote)),
        }
        self.remote.persist_cache().await
    }

    fn missing_error(&self, missing: Missing) -> crate::Error {
        match missing {
            Missing::Local => crate::io_error!("no local file at '{}'", self.local_path),
            Missing::Remote => crate::api_error!("no remote file named '{}'", self.remote_name),
            Missing::Both => crate::io_error!(
                "neither '{}' nor '{}' exists",
                self.local_path,
                self.remote_name
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;

    #[test]
    fn sync_mode_table() {
        let t = Utc::now();
        let newer = t + TimeDelta::seconds(5);

        assert_eq!(decide(Mode::Sync, None, None), Err(Missing::Both));
        assert_eq!(decide(Mode::Sync, Some(t), None), Ok(Decision::CreateRemote));
        assert_eq!(decide(Mode::Sync, None, Some(t)), Ok(Decision::FetchRemote));
        assert_eq!(
            decide(Mode::Sync, Some(newer), Some(t)),
            Ok(Decision::SendLocal)
        );
        assert_eq!(
            decide(Mode::Sync, Some(t), Some(newer)),
            Ok(Decision::FetchRemote)
        );
        assert_eq!(decide(Mode::Sync, Some(t), Some(t)), Ok(Decision::UpToDate));
    }

    #[test]
    fn upload_mode_table() {
        let t = Utc::now();
        let newer = t + TimeDelta::seconds(5);

        assert_eq!(decide(Mode::Upload, None, None), Err(Missing::Local));
        assert_eq!(decide(Mode::Upload, None, Some(t)), Err(Missing::Local));
        assert_eq!(
            decide(Mode::Upload, Some(t), None),
            Ok(Decision::CreateRemote)
        );
        assert_eq!(
            decide(Mode::Upload, Some(newer), Some(t)),
            Ok(Decision::SendLocal)
        );
        // never transfers against its direction
        assert_eq!(
            decide(Mode::Upload, Some(t), Some(newer)),
            Ok(Decision::UpToDate)
        );
        assert_eq!(
            decide(Mode::Upload, Some(t), Some(t)),
            Ok(Decision::UpToDate)
        );
    }

    #[test]
    fn download_mode_table() {
        let t = Utc::now();
        let newer = t + TimeDelta::seconds(5);

        assert_eq!(decide(Mode::Download, None, None), Err(Missing::Remote));
        assert_eq!(decide(Mode::Download, Some(t), None), Err(Missing::Remote));
        assert_eq!(
            decide(Mode::Download, None, Some(t)),
            Ok(Decision::FetchRemote)
        );
        assert_eq!(
            decide(Mode::Download, Some(t), Some(newer)),
            Ok(Decision::FetchRemote)
        );
        // never transfers against its direction
        assert_eq!(
            decide(Mode::Download, Some(newer), Some(t)),
            Ok(Decision::UpToDate)
        );
        assert_eq!(
            decide(Mode::Download, Some(t), Some(t)),
            Ok(Decision::UpToDate)
        );
    }

    #[test]
    fn mtimes_within_tolerance_are_in_sync() {
        let t = Utc::now();
        let slightly_later = t + TimeDelta::milliseconds(300);
        assert_eq!(
            decide(Mode::Sync, Some(slightly_later), Some(t)),
            Ok(Decision::UpToDate)
        );
        assert_eq!(
            decide(Mode::Sync, Some(t), Some(slightly_later)),
            Ok(Decision::UpToDate)
        );
    }
}
