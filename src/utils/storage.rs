use crate::utils::ExtractError;
use regex::Regex;
use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;

/// Logical storage areas under the storage root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Area {
    Uploads,
    Crops,
    Preprocessed,
}

impl Area {
    pub fn dir_name(&self) -> &'static str {
        match self {
            Area::Uploads => "uploads",
            Area::Crops => "crops",
            Area::Preprocessed => "preprocessed",
        }
    }
}

/// Owns the on-disk layout for uploaded photos, crops and preprocessed derivatives,
/// and maps stored files to caller-facing references under a fixed public prefix.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
    public_prefix: String,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>, public_prefix: impl Into<String>) -> Self {
        let public_prefix = public_prefix.into().trim_end_matches('/').to_string();
        ArtifactStore {
            root: root.into(),
            public_prefix,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn area_dir(&self, area: Area) -> PathBuf {
        self.root.join(area.dir_name())
    }

    /// Creates every storage area that does not exist yet.
    pub fn ensure_dirs(&self) -> Result<(), ExtractError> {
        for area in [Area::Uploads, Area::Crops, Area::Preprocessed] {
            fs::create_dir_all(self.area_dir(area))?;
        }
        Ok(())
    }

    /// Persists an uploaded file under a name that is unique across concurrent requests.
    pub fn store_upload(&self, file_name: &str, bytes: &[u8]) -> Result<PathBuf, ExtractError> {
        if bytes.is_empty() {
            return Err(ExtractError::MissingInput(format!(
                "upload '{}' is empty",
                file_name
            )));
        }
        let dir = self.area_dir(Area::Uploads);
        fs::create_dir_all(&dir)?;

        let suffix = format!("_{}", sanitize_file_name(file_name));
        let mut file = tempfile::Builder::new()
            .prefix("")
            .suffix(&suffix)
            .rand_bytes(12)
            .tempfile_in(&dir)?;
        file.write_all(bytes)?;
        let (_, path) = file.keep().map_err(|e| ExtractError::IoError(e.error))?;

        log::info!("Stored upload {} ({} bytes)", path.display(), bytes.len());
        Ok(path)
    }

    /// Caller-facing reference for a stored file, always rooted under the public prefix.
    pub fn public_url(&self, path: &Path) -> String {
        let relative = path
            .strip_prefix(&self.root)
            .ok()
            .map(Path::to_path_buf)
            .or_else(|| {
                let root = fs::canonicalize(&self.root).ok()?;
                let full = fs::canonicalize(path).ok()?;
                full.strip_prefix(root).ok().map(Path::to_path_buf)
            });

        match relative {
            Some(rel) => format!("{}/{}", self.public_prefix, to_url_path(&rel)),
            None => {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                format!("{}/{}/{}", self.public_prefix, Area::Crops.dir_name(), name)
            }
        }
    }
}

fn to_url_path(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Creates a new directory with a random name under `parent` and keeps it on disk.
pub fn unique_subdir(parent: &Path, prefix: &str) -> Result<PathBuf, ExtractError> {
    fs::create_dir_all(parent)?;
    let dir = tempfile::Builder::new()
        .prefix(prefix)
        .rand_bytes(10)
        .tempdir_in(parent)?;
    Ok(dir.keep())
}

fn unsafe_chars() -> Option<&'static Regex> {
    static UNSAFE: OnceLock<Option<Regex>> = OnceLock::new();
    UNSAFE
        .get_or_init(|| Regex::new(r"[^A-Za-z0-9._-]+").ok())
        .as_ref()
}

/// Reduces a client-supplied file name to a safe single path component.
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned = match unsafe_chars() {
        Some(re) => re.replace_all(base, "_").into_owned(),
        None => base
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || "._-".contains(c) { c } else { '_' })
            .collect(),
    };
    let cleaned = cleaned.trim_start_matches(['.', '_']);
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned.to_string()
    }
}
