//! Runs the syncer against an in-memory remote and real files on disk.

use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use camino::Utf8PathBuf;
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use drivesync::sync::{Mode, Remote, RemoteFile, Syncer};
use drivesync::PersistCache;
use tokio::io::{self, AsyncReadExt};

#[derive(Debug, Clone)]
struct StubFile {
    id: String,
    name: String,
    mtime: DateTime<Utc>,
    content: Vec<u8>,
}

#[derive(Debug, Default)]
struct StubRemote {
    files: Mutex<Vec<StubFile>>,
    next_id: AtomicUsize,
}

impl StubRemote {
    fn with_file(name: &str, mtime: DateTime<Utc>, content: &[u8]) -> Self {
        let stub = StubRemote::default();
        stub.files.lock().unwrap().push(StubFile {
            id: "id-0".to_string(),
            name: name.to_string(),
            mtime,
            content: content.to_vec(),
        });
        stub.next_id.store(1, Ordering::SeqCst);
        stub
    }

    fn file(&self, name: &str) -> Option<StubFile> {
        self.files
            .lock()
            .unwrap()
            .iter()
            .find(|f| f.name == name)
            .cloned()
    }

    fn entry(f: &StubFile) -> RemoteFile {
        RemoteFile {
            id: f.id.clone(),
            name: f.name.clone(),
            size: Some(f.content.len() as u64),
            mtime: f.mtime,
        }
    }
}

impl Remote for StubRemote {
    async fn find_by_name(&self, name: &str) -> drivesync::Result<Option<RemoteFile>> {
        let files = self.files.lock().unwrap();
        Ok(files.iter().find(|f| f.name == name).map(Self::entry))
    }

    async fn metadata(&self, id: &str) -> drivesync::Result<RemoteFile> {
        let files = self.files.lock().unwrap();
        files
            .iter()
            .find(|f| f.id == id)
            .map(Self::entry)
            .ok_or_else(|| drivesync::Error::Api(format!("no file with id {id}")))
    }

    async fn create(
        &self,
        name: &str,
        mtime: Option<DateTime<Utc>>,
        size: u64,
        data: impl io::AsyncRead + Send,
    ) -> drivesync::Result<RemoteFile> {
        let mut content = Vec::new();
        tokio::pin!(data);
        data.read_to_end(&mut content).await?;
        assert_eq!(content.len() as u64, size);

        let id = format!("id-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let file = StubFile {
            id,
            name: name.to_string(),
            mtime: mtime.unwrap_or_else(Utc::now),
            content,
        };
        let entry = Self::entry(&file);
        self.files.lock().unwrap().push(file);
        Ok(entry)
    }

    async fn update(
        &self,
        id: &str,
        mtime: DateTime<Utc>,
        size: u64,
        data: impl io::AsyncRead + Send,
    ) -> drivesync::Result<RemoteFile> {
        let mut content = Vec::new();
        tokio::pin!(data);
        data.read_to_end(&mut content).await?;
        assert_eq!(content.len() as u64, size);

        let mut files = self.files.lock().unwrap();
        let file = files
            .iter_mut()
            .find(|f| f.id == id)
            .ok_or_else(|| drivesync::Error::Api(format!("no file with id {id}")))?;
        file.mtime = mtime;
        file.content = content;
        Ok(Self::entry(file))
    }

    async fn download(&self, id: &str) -> drivesync::Result<impl io::AsyncRead + Send> {
        let files = self.files.lock().unwrap();
        files
            .iter()
            .find(|f| f.id == id)
            .map(|f| Cursor::new(f.content.clone()))
            .ok_or_else(|| drivesync::Error::Api(format!("no file with id {id}")))
    }

    async fn delete(&self, id: &str) -> drivesync::Result<()> {
        let mut files = self.files.lock().unwrap();
        let before = files.len();
        files.retain(|f| f.id != id);
        if files.len() == before {
            return Err(drivesync::Error::Api(format!("no file with id {id}")));
        }
        Ok(())
    }
}

impl PersistCache for StubRemote {}

fn temp_path() -> Utf8PathBuf {
    use rand::{distributions::Alphanumeric, Rng};

    let rnd: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(7)
        .map(char::from)
        .collect();
    let mut p = std::env::temp_dir();
    p.push(format!("drivesync-test-{rnd}.txt"));
    p.try_into().unwrap()
}

fn write_local(path: &Utf8PathBuf, content: &[u8], mtime: DateTime<Utc>) -> anyhow::Result<()> {
    std::fs::write(path, content)?;
    let f = std::fs::File::options().write(true).open(path)?;
    f.set_modified(mtime.into())?;
    Ok(())
}

fn past(secs: i64) -> DateTime<Utc> {
    // with second resolution to stay clear of filesystem rounding
    let t = Utc.timestamp_opt(Utc::now().timestamp() - secs, 0).unwrap();
    t
}

struct TempFile(Utf8PathBuf);

impl Drop for TempFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

#[tokio::test]
async fn sync_creates_remote_when_absent() -> anyhow::Result<()> {
    let path = temp_path();
    let _guard = TempFile(path.clone());
    let mtime = past(60);
    write_local(&path, b"local content", mtime)?;

    let syncer = Syncer::new(StubRemote::default(), path, "notes.txt".to_string());
    syncer.run(Mode::Sync).await?;

    let file = syncer.remote().file("notes.txt").expect("file was created");
    assert_eq!(file.content, b"local content");
    assert!((file.mtime - mtime).abs() < TimeDelta::seconds(1));
    Ok(())
}

#[tokio::test]
async fn sync_downloads_when_local_absent() -> anyhow::Result<()> {
    let path = temp_path();
    let _guard = TempFile(path.clone());
    let mtime = past(60);
    let remote = StubRemote::with_file("notes.txt", mtime, b"remote content");

    let syncer = Syncer::new(remote, path.clone(), "notes.txt".to_string());
    syncer.run(Mode::Sync).await?;

    assert_eq!(std::fs::read(&path)?, b"remote content");
    let local = drivesync::fs::stat(&path).await?.expect("file was written");
    // the local file carries the remote modification time
    assert!((local.mtime() - mtime).abs() < TimeDelta::seconds(1));
    Ok(())
}

#[tokio::test]
async fn sync_uploads_when_local_newer() -> anyhow::Result<()> {
    let path = temp_path();
    let _guard = TempFile(path.clone());
    let local_mtime = past(10);
    write_local(&path, b"new local", local_mtime)?;
    let remote = StubRemote::with_file("notes.txt", past(120), b"old remote");

    let syncer = Syncer::new(remote, path.clone(), "notes.txt".to_string());
    syncer.run(Mode::Sync).await?;

    let file = syncer.remote().file("notes.txt").unwrap();
    assert_eq!(file.content, b"new local");
    assert!((file.mtime - local_mtime).abs() < TimeDelta::seconds(1));
    // local side untouched
    assert_eq!(std::fs::read(&path)?, b"new local");
    Ok(())
}

#[tokio::test]
async fn sync_downloads_when_remote_newer() -> anyhow::Result<()> {
    let path = temp_path();
    let _guard = TempFile(path.clone());
    write_local(&path, b"old local", past(120))?;
    let remote_mtime = past(10);
    let remote = StubRemote::with_file("notes.txt", remote_mtime, b"new remote");

    let syncer = Syncer::new(remote, path.clone(), "notes.txt".to_string());
    syncer.run(Mode::Sync).await?;

    assert_eq!(std::fs::read(&path)?, b"new remote");
    let local = drivesync::fs::stat(&path).await?.unwrap();
    assert!((local.mtime() - remote_mtime).abs() < TimeDelta::seconds(1));
    Ok(())
}

#[tokio::test]
async fn sync_does_nothing_when_mtimes_are_equal() -> anyhow::Result<()> {
    let path = temp_path();
    let _guard = TempFile(path.clone());
    let mtime = past(60);
    write_local(&path, b"local content", mtime)?;
    let remote = StubRemote::with_file("notes.txt", mtime, b"remote content");

    let syncer = Syncer::new(remote, path.clone(), "notes.txt".to_string());
    syncer.run(Mode::Sync).await?;

    // no transfer happened in either direction
    assert_eq!(std::fs::read(&path)?, b"local content");
    assert_eq!(
        syncer.remote().file("notes.txt").unwrap().content,
        b"remote content"
    );
    Ok(())
}

#[tokio::test]
async fn sync_fails_when_both_sides_are_absent() {
    let path = temp_path();
    let syncer = Syncer::new(StubRemote::default(), path, "notes.txt".to_string());
    assert!(syncer.run(Mode::Sync).await.is_err());
}

#[tokio::test]
async fn upload_requires_a_local_file() {
    let path = temp_path();
    let remote = StubRemote::with_file("notes.txt", past(60), b"remote content");
    let syncer = Syncer::new(remote, path, "notes.txt".to_string());

    let res = syncer.run(Mode::Upload).await;
    assert!(matches!(res, Err(drivesync::Error::Io(_))));
}

#[tokio::test]
async fn upload_never_downloads() -> anyhow::Result<()> {
    let path = temp_path();
    let _guard = TempFile(path.clone());
    write_local(&path, b"old local", past(120))?;
    let remote = StubRemote::with_file("notes.txt", past(10), b"new remote");

    let syncer = Syncer::new(remote, path.clone(), "notes.txt".to_string());
    syncer.run(Mode::Upload).await?;

    assert_eq!(std::fs::read(&path)?, b"old local");
    Ok(())
}

#[tokio::test]
async fn download_requires_a_remote_file() -> anyhow::Result<()> {
    let path = temp_path();
    let _guard = TempFile(path.clone());
    write_local(&path, b"local content", past(60))?;

    let syncer = Syncer::new(StubRemote::default(), path, "notes.txt".to_string());
    let res = syncer.run(Mode::Download).await;
    assert!(matches!(res, Err(drivesync::Error::Api(_))));
    Ok(())
}

#[tokio::test]
async fn download_never_uploads() -> anyhow::Result<()> {
    let path = temp_path();
    let _guard = TempFile(path.clone());
    write_local(&path, b"new local", past(10))?;
    let remote = StubRemote::with_file("notes.txt", past(120), b"old remote");

    let syncer = Syncer::new(remote, path.clone(), "notes.txt".to_string());
    syncer.run(Mode::Download).await?;

    assert_eq!(syncer.remote().file("notes.txt").unwrap().content, b"old remote");
    Ok(())
}

#[tokio::test]
async fn delete_removes_the_remote_file() -> anyhow::Result<()> {
    let path = temp_path();
    let remote = StubRemote::with_file("notes.txt", past(60), b"remote content");

    let syncer = Syncer::new(remote, path, "notes.txt".to_string());
    syncer.delete_remote().await?;

    assert!(syncer.remote().file("notes.txt").is_none());
    Ok(())
}

#[tokio::test]
async fn delete_fails_when_remote_is_absent() {
    let path = temp_path();
    let syncer = Syncer::new(StubRemote::default(), path, "notes.txt".to_string());
    assert!(syncer.delete_remote().await.is_err());
}
