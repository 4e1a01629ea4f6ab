//! Process-wide choice of backing storage.
//!
//! Both settings are meant to be made once, early, before the first ring is allocated. Each
//! falls back to an environment variable and then to a built-in default:
//!
//! | setting        | explicit           | environment         | default               |
//! |----------------|--------------------|---------------------|-----------------------|
//! | temp directory | [`set_tmpdir`]     | `INFINIRAY_TMPDIR`  | [`std::env::temp_dir`] |
//! | provider       | [`set_backing`]    | `INFINIRAY_BACKING` | [`BackingKind::Auto`] |
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{PoisonError, RwLock};

pub const TMPDIR_VAR: &str = "INFINIRAY_TMPDIR";
pub const BACKING_VAR: &str = "INFINIRAY_BACKING";

static TMPDIR: RwLock<Option<PathBuf>> = RwLock::new(None);
static BACKING: RwLock<Option<BackingKind>> = RwLock::new(None);

/// Which [`Provider`](crate::Provider) creates shared storage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum BackingKind {
    /// Memory files where the platform allows them, temporary files otherwise.
    #[default]
    Auto,
    Memfd,
    TempFile,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown backing `{0}`, expected one of `auto`, `memfd`, `tmpfile`")]
pub struct ParseBackingError(String);

impl FromStr for BackingKind {
    type Err = ParseBackingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(BackingKind::Auto),
            "memfd" => Ok(BackingKind::Memfd),
            "tmpfile" | "tempfile" => Ok(BackingKind::TempFile),
            _ => Err(ParseBackingError(s.to_owned())),
        }
    }
}

/// Set the directory for [`TempFile`](crate::TempFile) storage.
pub fn set_tmpdir(path: impl AsRef<Path>) {
    let mut dir = TMPDIR.write().unwrap_or_else(PoisonError::into_inner);
    *dir = Some(path.as_ref().to_path_buf());
}

/// Forget an explicit directory, returning to the environment and default.
pub fn reset_tmpdir() {
    let mut dir = TMPDIR.write().unwrap_or_else(PoisonError::into_inner);
    *dir = None;
}

/// The directory temporary storage is created in.
pub fn tmpdir() -> PathBuf {
    let explicit = TMPDIR.read().unwrap_or_else(PoisonError::into_inner);
    resolve_tmpdir(explicit.as_deref(), std::env::var_os(TMPDIR_VAR))
}

/// Select the provider used by [`create`](crate::create).
pub fn set_backing(kind: BackingKind) {
    let mut backing = BACKING.write().unwrap_or_else(PoisonError::into_inner);
    *backing = Some(kind);
}

/// The configured provider choice.
pub fn backing() -> BackingKind {
    let explicit = *BACKING.read().unwrap_or_else(PoisonError::into_inner);
    resolve_backing(explicit, std::env::var_os(BACKING_VAR))
}

/// An explicit directory, else a non-empty variable value, else the system default.
fn resolve_tmpdir(explicit: Option<&Path>, var: Option<OsString>) -> PathBuf {
    if let Some(dir) = explicit {
        return dir.to_path_buf();
    }

    let Some(dir) = var else {
        return std::env::temp_dir();
    };

    if dir.is_empty() {
        return std::env::temp_dir();
    }

    PathBuf::from(dir)
}

/// An explicit kind, else the parsed variable value, else `Auto`.
fn resolve_backing(explicit: Option<BackingKind>, var: Option<OsString>) -> BackingKind {
    if let Some(kind) = explicit {
        return kind;
    }

    let Some(var) = var else {
        return BackingKind::Auto;
    };

    let Some(var) = var.to_str() else {
        tracing::warn!(var = BACKING_VAR, "value is not unicode, using auto");
        return BackingKind::Auto;
    };

    match var.parse() {
        Ok(kind) => kind,
        Err(err) => {
            tracing::warn!(var = BACKING_VAR, %err, "using auto");
            BackingKind::Auto
        }
    }
}
