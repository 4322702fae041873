use core::fmt;

/// Everything a filesystem operation can fail with. One kind per
/// caller-distinguishable condition; device faults are never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    NotFound,
    /// Repeated separators, empty component, or descent through a
    /// non-directory.
    InvalidPath,
    NameTooLong,
    AlreadyExists,
    /// Expected a file and found a directory, or vice versa.
    WrongEntryType,
    /// The parent directory has no free entry slot left.
    DirectoryFull,
    DescriptorPoolExhausted,
    OutOfContiguousSpace,
    /// A short transfer from the block device; unrecoverable for the
    /// in-flight operation.
    BlockDeviceIo,
    /// Bad descriptor, bad whence directive, negative or unrepresentable
    /// offset.
    InvalidArgument,
    /// Root/cwd protection, self-referential move, non-empty directory
    /// removal and similar refusals.
    PolicyViolation,
}

pub type FsResult<T> = Result<T, FsError>;

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::NotFound => "entry not found",
            Self::InvalidPath => "invalid path",
            Self::NameTooLong => "entry name too long",
            Self::AlreadyExists => "entry already exists",
            Self::WrongEntryType => "wrong entry type",
            Self::DirectoryFull => "directory is full",
            Self::DescriptorPoolExhausted => "open file limit reached",
            Self::OutOfContiguousSpace => "not enough contiguous free blocks",
            Self::BlockDeviceIo => "block device I/O error",
            Self::InvalidArgument => "invalid argument",
            Self::PolicyViolation => "operation not permitted",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for FsError {}
