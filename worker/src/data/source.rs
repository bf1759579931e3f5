use std::{
    collections::HashMap,
    fs::File,
    io::{self, Read, Seek, SeekFrom},
    ops::Range,
    path::PathBuf,
    sync::Arc,
};

/// A store of immutable objects that can be read by byte range.
pub trait RangeSource: Send {
    /// Returns the size in bytes of the object.
    fn object_size(&self, key: &str, bucket: &str) -> io::Result<u64>;

    /// Reads exactly the bytes in `range` of the object.
    ///
    /// # Errors
    /// An `io::Error` if the object doesn't exist or holds fewer bytes than requested.
    fn fetch_range(&self, key: &str, bucket: &str, range: Range<u64>) -> io::Result<Vec<u8>>;
}

fn range_len(range: &Range<u64>) -> io::Result<usize> {
    let len = range.end.checked_sub(range.start).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("inverted range {range:?}"),
        )
    })?;

    usize::try_from(len).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("range {range:?} doesn't fit in memory"),
        )
    })
}

/// Objects stored as files, the bucket is a directory under `root`.
#[derive(Debug, Clone)]
pub struct FileSource {
    root: PathBuf,
}

impl FileSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path(&self, key: &str, bucket: &str) -> PathBuf {
        self.root.join(bucket).join(key)
    }
}

impl RangeSource for FileSource {
    fn object_size(&self, key: &str, bucket: &str) -> io::Result<u64> {
        Ok(self.path(key, bucket).metadata()?.len())
    }

    fn fetch_range(&self, key: &str, bucket: &str, range: Range<u64>) -> io::Result<Vec<u8>> {
        let mut buf = vec![0; range_len(&range)?];

        let mut file = File::open(self.path(key, bucket))?;
        file.seek(SeekFrom::Start(range.start))?;
        file.read_exact(&mut buf)?;
        Ok(buf)
    }
}

/// Objects held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    objects: HashMap<(String, String), Arc<[u8]>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `data` as the object `key` of `bucket`, replacing any previous one.
    pub fn insert(&mut self, key: &str, bucket: &str, data: impl Into<Arc<[u8]>>) {
        self.objects
            .insert((bucket.to_string(), key.to_string()), data.into());
    }

    fn object(&self, key: &str, bucket: &str) -> io::Result<&[u8]> {
        self.objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|data| &data[..])
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no object {bucket}/{key}"),
                )
            })
    }
}

impl RangeSource for MemorySource {
    fn object_size(&self, key: &str, bucket: &str) -> io::Result<u64> {
        Ok(self.object(key, bucket)?.len() as u64)
    }

    fn fetch_range(&self, key: &str, bucket: &str, range: Range<u64>) -> io::Result<Vec<u8>> {
        let len = range_len(&range)?;
        let data = self.object(key, bucket)?;

        let start = usize::try_from(range.start).unwrap_or(usize::MAX);
        data.get(start..)
            .and_then(|tail| tail.get(..len))
            .map(<[u8]>::to_vec)
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("range {range:?} past the end of {bucket}/{key}"),
                )
            })
    }
}
