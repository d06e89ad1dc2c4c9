//! Locating debug info stored next to an object instead of inside it.
//!
//! Two conventions are understood:
//! - macOS `.dSYM` bundles: `<obj>.dSYM/Contents/Resources/DWARF/<basename>`
//! - GNU `.gnu_debuglink`: a file name plus CRC-32, searched in the object's
//!   directory, its `.debug/` subdirectory and under `/usr/lib/debug`

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use object::Object;
use tracing::{debug, warn};

const GLOBAL_DEBUG_DIR: &str = "/usr/lib/debug";

/// Path of the dSYM payload for `object_path`, if such a bundle exists.
pub(crate) fn dsym_companion(object_path: &Path) -> Option<PathBuf>
{
    let basename = object_path.file_name()?;
    let mut bundle = object_path.as_os_str().to_owned();
    bundle.push(".dSYM");
    let candidate = PathBuf::from(bundle)
        .join("Contents")
        .join("Resources")
        .join("DWARF")
        .join(basename);
    candidate.is_file().then_some(candidate)
}

/// Resolve the `.gnu_debuglink` of `file` to an existing file with a matching CRC.
pub(crate) fn find_debuglink_companion(object_path: &Path, file: &object::File<'_>) -> Option<PathBuf>
{
    let (name, expected_crc) = match file.gnu_debuglink() {
        Ok(Some(link)) => link,
        Ok(None) => return None,
        Err(err) => {
            warn!(path = %object_path.display(), "failed to read .gnu_debuglink: {err}");
            return None;
        }
    };
    let name = String::from_utf8_lossy(name).into_owned();

    for candidate in debuglink_candidates(object_path, Path::new(&name)) {
        if !candidate.is_file() {
            continue;
        }
        match fs::read(&candidate) {
            Ok(bytes) if crc32fast::hash(&bytes) == expected_crc => return Some(candidate),
            Ok(_) => warn!(path = %candidate.display(), "debuglink candidate has mismatched CRC"),
            Err(err) => debug!(path = %candidate.display(), "unable to read debuglink candidate: {err}"),
        }
    }
    debug!(path = %object_path.display(), link = %name, "debuglink target not found");
    None
}

fn debuglink_candidates(object_path: &Path, link: &Path) -> Vec<PathBuf>
{
    let mut paths = Vec::new();
    let mut seen = HashSet::new();
    let mut add = |path: PathBuf| {
        if seen.insert(path.clone()) {
            paths.push(path);
        }
    };

    if link.is_absolute() {
        add(link.to_path_buf());
    }
    let basename = link.file_name().map_or(link, Path::new);
    if let Some(dir) = object_path.parent() {
        add(dir.join(basename));
        add(dir.join(".debug").join(basename));
        let relative = dir.strip_prefix("/").unwrap_or(dir);
        add(Path::new(GLOBAL_DEBUG_DIR).join(relative).join(basename));
    }
    paths
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_debuglink_candidates_order()
    {
        let candidates = debuglink_candidates(Path::new("/opt/app/bin/server"), Path::new("server.debug"));
        assert_eq!(
            candidates,
            vec![
                PathBuf::from("/opt/app/bin/server.debug"),
                PathBuf::from("/opt/app/bin/.debug/server.debug"),
                PathBuf::from("/usr/lib/debug/opt/app/bin/server.debug"),
            ]
        );
    }

    #[test]
    fn test_debuglink_candidates_absolute_first()
    {
        let candidates = debuglink_candidates(Path::new("/opt/app/server"), Path::new("/srv/debug/server.debug"));
        assert_eq!(candidates[0], PathBuf::from("/srv/debug/server.debug"));
        assert_eq!(candidates[1], PathBuf::from("/opt/app/server.debug"));
    }

    #[test]
    fn test_dsym_companion_found()
    {
        let dir = tempfile::tempdir().unwrap();
        let object = dir.path().join("app");
        let payload = dir.path().join("app.dSYM/Contents/Resources/DWARF");
        fs::create_dir_all(&payload).unwrap();
        fs::write(payload.join("app"), b"payload").unwrap();

        assert_eq!(dsym_companion(&object), Some(payload.join("app")));
        assert_eq!(dsym_companion(&dir.path().join("other")), None);
    }
}
