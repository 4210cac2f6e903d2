//! Background clip library and non-repeating selection.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use rand::seq::IndexedRandom;
use rand::Rng;

use crate::error::AssemblyError;

const VIDEO_EXTENSIONS: [&str; 4] = ["mp4", "mov", "avi", "mkv"];

/// Background clips grouped by their folder name.
pub type ClipLibrary = BTreeMap<String, Vec<PathBuf>>;

/// Scan `root` for one level of folders containing video files.
///
/// Folders without videos are omitted.
pub fn scan_library(root: &Path) -> Result<ClipLibrary, AssemblyError> {
    if !root.is_dir() {
        return Err(AssemblyError::NoBackgroundClips(root.to_path_buf()));
    }
    let mut library = ClipLibrary::new();
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let folder = entry.path();
        if !folder.is_dir() {
            continue;
        }
        let mut videos: Vec<PathBuf> = fs::read_dir(&folder)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| is_video(p))
            .collect();
        if videos.is_empty() {
            continue;
        }
        videos.sort();
        library.insert(entry.file_name().to_string_lossy().to_string(), videos);
    }
    if library.is_empty() {
        return Err(AssemblyError::NoBackgroundClips(root.to_path_buf()));
    }
    Ok(library)
}

fn is_video(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| VIDEO_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Pick `count` clips such that:
/// - no clip is used twice,
/// - two consecutive clips never come from the same folder unless it is the
///   only one left,
/// - a folder is reused only after every other folder with unused clips has
///   contributed once in the current round.
pub fn pick_non_repeating<R: Rng>(
    library: &ClipLibrary,
    count: usize,
    rng: &mut R,
) -> Result<Vec<PathBuf>, AssemblyError> {
    let available: usize = library.values().map(Vec::len).sum();
    if count > available {
        return Err(AssemblyError::NotEnoughClips {
            requested: count,
            available,
        });
    }

    let mut used: HashSet<&PathBuf> = HashSet::new();
    let mut picked = Vec::with_capacity(count);
    let mut last_folder: Option<&str> = None;
    let mut round: BTreeSet<&str> = BTreeSet::new();

    while picked.len() < count {
        round.retain(|f| !unused_in(library, f, &used).is_empty());
        if round.is_empty() {
            round = library
                .keys()
                .map(String::as_str)
                .filter(|f| !unused_in(library, f, &used).is_empty())
                .collect();
            if round.is_empty() {
                break;
            }
        }

        let mut candidates: Vec<&str> = round.iter().copied().collect();
        if candidates.len() > 1 {
            candidates.retain(|f| Some(*f) != last_folder);
        }
        let Some(folder) = candidates.choose(rng).copied() else {
            break;
        };
        let Some(clip) = unused_in(library, folder, &used).choose(rng).copied() else {
            break;
        };

        used.insert(clip);
        picked.push(clip.clone());
        round.remove(folder);
        last_folder = Some(folder);
    }

    Ok(picked)
}

fn unused_in<'a>(
    library: &'a ClipLibrary,
    folder: &str,
    used: &HashSet<&'a PathBuf>,
) -> Vec<&'a PathBuf> {
    library
        .get(folder)
        .map(|v| v.iter().filter(|p| !used.contains(p)).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use tempfile::TempDir;

    fn library(folders: &[(&str, usize)]) -> ClipLibrary {
        folders.iter()
            .map(|(folder, n)| {
                let clips = (0..*n)
                    .map(|i| PathBuf::from(format!("/videos/{folder}/{i}.mp4")))
                    .collect();
                (folder.to_string(), clips)
            })
            .collect()
    }

    fn folder_of(p: &Path) -> String {
        p.parent().unwrap().file_name().unwrap().to_string_lossy().to_string()
    }

    #[test]
    fn test_no_repeats_and_no_consecutive_folders() {
        let lib = library(&[("city", 4), ("forest", 4), ("ocean", 4)]);
        let mut rng = StdRng::seed_from_u64(42);
        let picked = pick_non_repeating(&lib, 12, &mut rng).unwrap();

        assert_eq!(picked.len(), 12);
        let unique: HashSet<_> = picked.iter().collect();
        assert_eq!(unique.len(), 12);
        for pair in picked.windows(2) {
            assert_ne!(folder_of(&pair[0]), folder_of(&pair[1]));
        }
    }

    #[test]
    fn test_round_robin_uses_every_folder_before_repeating() {
        let lib = library(&[("a", 3), ("b", 3), ("c", 3)]);
        let mut rng = StdRng::seed_from_u64(1);
        let picked = pick_non_repeating(&lib, 6, &mut rng).unwrap();
        for round in picked.chunks(3) {
            let folders: HashSet<_> = round.iter().map(|p| folder_of(p)).collect();
            assert_eq!(folders.len(), 3);
        }
    }

    #[test]
    fn test_too_many_requested() {
        let lib = library(&[("a", 1), ("b", 1)]);
        let mut rng = StdRng::seed_from_u64(0);
        assert!(matches!(
            pick_non_repeating(&lib, 3, &mut rng),
            Err(AssemblyError::NotEnoughClips {
                requested: 3,
                available: 2
            })
        ));
    }

    #[test]
    fn test_scan_library() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("rain")).unwrap();
        fs::create_dir(dir.path().join("empty")).unwrap();
        fs::write(dir.path().join("rain").join("one.MP4"), b"").unwrap();
        fs::write(dir.path().join("rain").join("notes.txt"), b"").unwrap();

        let lib = scan_library(dir.path()).unwrap();
        assert_eq!(lib.len(), 1);
        assert_eq!(lib["rain"].len(), 1);

        let missing = scan_library(&dir.path().join("nope"));
        assert!(matches!(missing, Err(AssemblyError::NoBackgroundClips(_))));
    }
}
