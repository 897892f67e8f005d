use std::fs::{self, File};
use std::io::{Error, ErrorKind, Result};
use std::path::{Path, PathBuf};

/// Number of versions kept on disk for every atomic file.
pub const MAX_VERSION_FILES: usize = 10;

const TMP_PREFIX: &str = ".tmp-";

/// Scratch file removed on drop unless it was linked as a new version.
pub struct TmpFile {
    file: File,
    path: PathBuf,
}

impl TmpFile {
    fn create_in(directory: &Path) -> Result<Self> {
        let suffix: String = std::iter::repeat_with(fastrand::alphanumeric)
            .take(10)
            .collect();
        let path = directory.join(format!("{}{}", TMP_PREFIX, suffix));
        let file = File::create(&path)?;
        Ok(Self { file, path })
    }
}

impl std::io::Write for &TmpFile {
    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        (&self.file).write(buf)
    }

    fn flush(&mut self) -> Result<()> {
        (&self.file).flush()
    }
}

impl Drop for TmpFile {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// One version of an [`AtomicFile`]. Version `0` means nothing was
/// written yet.
#[derive(Clone, Debug)]
pub struct Snapshot {
    pub version: usize,
    path: PathBuf,
}

impl Snapshot {
    pub fn open(&self) -> Result<Option<File>> {
        if self.version == 0 {
            return Ok(None);
        }
        Ok(Some(File::open(&self.path)?))
    }

    #[cfg(test)]
    pub fn read_content(&self) -> Result<Vec<u8>> {
        use std::io::Read;

        let mut file = self.open()?.ok_or_else(|| {
            Error::new(ErrorKind::NotFound, "no version written yet")
        })?;
        let mut buf = vec![];
        file.read_to_end(&mut buf)?;
        Ok(buf)
    }
}

/// A file stored as a series of numbered versions inside its own
/// directory: `<directory>/<name>.<version>`.
///
/// A new version only becomes visible through a hard link, which fails
/// when another writer already took that version number.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct AtomicFile {
    directory: PathBuf,
    prefix: String,
}

fn version_of(filename: &str, prefix: &str) -> Option<usize> {
    filename.strip_prefix(prefix)?.parse().ok()
}

impl AtomicFile {
    pub fn new(directory: impl Into<PathBuf>) -> Result<Self> {
        let directory = directory.into();
        let name = directory
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                Error::new(
                    ErrorKind::InvalidInput,
                    "`directory` must end with a UTF-8 name",
                )
            })?
            .to_owned();
        fs::create_dir_all(&directory)?;

        Ok(Self {
            directory,
            prefix: format!("{}.", name),
        })
    }

    #[cfg(test)]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn path(&self, version: usize) -> PathBuf {
        self.directory
            .join(format!("{}{}", self.prefix, version))
    }

    pub fn latest_version(&self) -> Result<usize> {
        let latest = fs::read_dir(&self.directory)?
            .flatten()
            .filter_map(|entry| {
                version_of(entry.file_name().to_str()?, &self.prefix)
            })
            .max()
            .unwrap_or(0);
        Ok(latest)
    }

    pub fn load(&self) -> Result<Snapshot> {
        let version = self.latest_version()?;
        Ok(Snapshot {
            version,
            path: self.path(version),
        })
    }

    pub fn make_temp(&self) -> Result<TmpFile> {
        TmpFile::create_in(&self.directory)
    }

    /// Publish `new` as the version following `current`.
    ///
    /// # Errors
    /// `ErrorKind::AlreadyExists` means another writer got there first and
    /// the caller must retry from a fresh [`Snapshot`].
    pub fn compare_and_swap(
        &self,
        current: &Snapshot,
        new: TmpFile,
    ) -> Result<()> {
        new.file.sync_data()?;
        if self.latest_version()? > current.version {
            return Err(Error::new(
                ErrorKind::AlreadyExists,
                "the `current` snapshot is not the latest version",
            ));
        }
        let next = current.version + 1;
        fs::hard_link(&new.path, self.path(next))?;

        let pruned = self.prune_before(next);
        log::trace!("pruned {} old versions in {:?}", pruned, self.directory);
        Ok(())
    }

    fn prune_before(&self, latest: usize) -> usize {
        let Ok(entries) = fs::read_dir(&self.directory) else {
            return 0;
        };
        entries
            .flatten()
            .filter(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .and_then(|name| version_of(name, &self.prefix))
                    .map(|version| version + MAX_VERSION_FILES <= latest)
                    .unwrap_or(false)
            })
            .filter(|entry| fs::remove_file(entry.path()).is_ok())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::initialize;
    use rstest::rstest;
    use std::io::Write;
    use tempdir::TempDir;

    fn write_version(file: &AtomicFile, content: &str) -> Result<()> {
        let current = file.load()?;
        let temp = file.make_temp()?;
        (&temp).write_all(content.as_bytes())?;
        file.compare_and_swap(&current, temp)
    }

    #[test]
    fn empty_file_has_no_content() {
        initialize();
        let dir = TempDir::new("atomic_empty").unwrap();
        let file = AtomicFile::new(dir.path().join("thing")).unwrap();

        let snapshot = file.load().unwrap();
        assert_eq!(snapshot.version, 0);
        assert!(snapshot.open().unwrap().is_none());
        assert_eq!(
            snapshot.read_content().unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn stale_snapshot_is_rejected() {
        initialize();
        let dir = TempDir::new("atomic_stale").unwrap();
        let file = AtomicFile::new(dir.path().join("thing")).unwrap();

        let stale = file.load().unwrap();
        write_version(&file, "first").unwrap();

        let temp = file.make_temp().unwrap();
        (&temp).write_all(b"second").unwrap();
        let err = file.compare_and_swap(&stale, temp).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);

        let latest = file.load().unwrap();
        assert_eq!(latest.version, 1);
        assert_eq!(latest.read_content().unwrap(), b"first");
    }

    #[test]
    fn temp_files_do_not_linger() {
        initialize();
        let dir = TempDir::new("atomic_tmp").unwrap();
        let file = AtomicFile::new(dir.path().join("thing")).unwrap();
        write_version(&file, "content").unwrap();

        let names: Vec<String> = fs::read_dir(file.directory())
            .unwrap()
            .flatten()
            .filter_map(|entry| entry.file_name().into_string().ok())
            .collect();
        assert_eq!(names, vec!["thing.1".to_owned()]);
    }

    #[rstest]
    #[case(1, 1)]
    #[case(MAX_VERSION_FILES, MAX_VERSION_FILES)]
    #[case(MAX_VERSION_FILES + 1, MAX_VERSION_FILES)]
    #[case(25, MAX_VERSION_FILES)]
    fn old_versions_are_pruned(#[case] writes: usize, #[case] kept: usize) {
        initialize();
        let dir = TempDir::new("atomic_prune").unwrap();
        let file = AtomicFile::new(dir.path().join("thing")).unwrap();
        for i in 0..writes {
            write_version(&file, &format!("Version {}", i + 1)).unwrap();
        }

        assert_eq!(fs::read_dir(file.directory()).unwrap().count(), kept);
        let latest = file.load().unwrap();
        assert_eq!(latest.version, writes);
        assert_eq!(
            latest.read_content().unwrap(),
            format!("Version {}", writes).into_bytes()
        );
    }
}
