//! Local side of the synchronization

use std::io::ErrorKind;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use tokio::{fs, io};

/// A local regular file together with the metadata relevant for
/// reconciliation.
#[derive(Debug, Clone)]
pub struct LocalFile {
    path: Utf8PathBuf,
    size: u64,
    mtime: DateTime<Utc>,
}

impl LocalFile {
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn mtime(&self) -> DateTime<Utc> {
        self.mtime
    }

    pub async fn open(&self) -> crate::Result<fs::File> {
        Ok(fs::File::open(&self.path).await?)
    }
}

/// Stats a local file. An absent file is a regular outcome, not an error.
pub async fn stat(path: &Utf8Path) -> crate::Result<Option<LocalFile>> {
    match fs::metadata(path).await {
        Ok(metadata) if metadata.is_file() => {
            let mtime = metadata.modified()?;
            Ok(Some(LocalFile {
                path: path.to_owned(),
                size: metadata.len(),
                mtime: DateTime::<Utc>::from(mtime),
            }))
        }
        Ok(_) => crate::io_bail!("{path} is not a regular file"),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// Writes `data` to `path` and stamps the file with `mtime`, so that a
/// downloaded file carries the remote modification time.
pub async fn write_from(
    path: &Utf8Path,
    data: impl io::AsyncRead,
    mtime: Option<DateTime<Utc>>,
) -> crate::Result<()> {
    tokio::pin!(data);

    let mut f = fs::File::create(path).await?;
    io::copy(&mut data, &mut f).await?;

    if let Some(mtime) = mtime {
        let f = f.into_std().await;
        f.set_modified(mtime.into())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use chrono::{TimeDelta, TimeZone, Utc};

    use super::{stat, write_from};

    fn temp_path(ext: &str) -> camino::Utf8PathBuf {
        use rand::{distributions::Alphanumeric, Rng};

        let rnd: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(7)
            .map(char::from)
            .collect();
        let mut p = std::env::temp_dir();
        p.push(format!("drivesync-{rnd}.{ext}"));
        p.try_into().unwrap()
    }

    #[tokio::test]
    async fn stat_absent_file() -> anyhow::Result<()> {
        let path = temp_path("txt");
        assert!(stat(&path).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn write_then_stat() -> anyhow::Result<()> {
        let path = temp_path("txt");
        let mtime = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap();

        write_from(&path, Cursor::new(b"some content".to_vec()), Some(mtime)).await?;

        let local = stat(&path).await?.expect("file was just written");
        assert_eq!(local.size(), 12);
        assert!((local.mtime() - mtime).abs() < TimeDelta::seconds(1));

        tokio::fs::remove_file(&path).await?;
        Ok(())
    }
}
