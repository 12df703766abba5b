use crate::library::{Library, Mod, Profile};
use anyhow::{anyhow, bail, Context, Result};
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Mutex,
};

const PREVIEW_DIR: &str = "previews";
const PREVIEW_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "webp"];

/// Source of the mod list and the sink for applied changes.
pub trait ModCatalog: Send + Sync {
    fn list_mods(&self) -> Result<Vec<Mod>>;
    fn list_profiles(&self) -> Result<Vec<Profile>>;
    fn current_profile_name(&self) -> Result<String>;
    fn preview_artifact(&self, hash: &str) -> Option<PathBuf>;
    /// Persists order, enabled flags and enabled options. Must not hand back a
    /// different arrangement than the one it was given.
    fn apply(&self, mods: &[Mod]) -> Result<()>;
}

/// Catalog backed by a `library.json` document in a library directory.
pub struct LibraryCatalog {
    data_dir: PathBuf,
    library: Mutex<Library>,
}

impl LibraryCatalog {
    pub fn open(data_dir: &Path) -> Result<Self> {
        let library = Library::load_or_create(data_dir)
            .with_context(|| format!("open library at {}", data_dir.display()))?;
        log::debug!(
            "Library {} has {} mod(s) and {} profile(s)",
            data_dir.display(),
            library.mods.len(),
            library.profiles.len()
        );
        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            library: Mutex::new(library),
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn with_library<T>(&self, f: impl FnOnce(&mut Library) -> Result<T>) -> Result<T> {
        let mut library = self
            .library
            .lock()
            .map_err(|_| anyhow!("library lock poisoned"))?;
        f(&mut library)
    }
}

impl ModCatalog for LibraryCatalog {
    fn list_mods(&self) -> Result<Vec<Mod>> {
        self.with_library(|library| Ok(library.mods.clone()))
    }

    fn list_profiles(&self) -> Result<Vec<Profile>> {
        self.with_library(|library| Ok(library.profiles.clone()))
    }

    fn current_profile_name(&self) -> Result<String> {
        self.with_library(|library| Ok(library.current_profile.clone()))
    }

    fn preview_artifact(&self, hash: &str) -> Option<PathBuf> {
        if hash.is_empty() || hash.contains(['/', '\\']) || hash.contains("..") {
            return None;
        }
        let dir = self.data_dir.join(PREVIEW_DIR);
        PREVIEW_EXTENSIONS
            .iter()
            .map(|ext| dir.join(format!("{hash}.{ext}")))
            .find(|path| path.is_file())
    }

    fn apply(&self, mods: &[Mod]) -> Result<()> {
        self.with_library(|library| {
            let mut stored: HashMap<&str, &Mod> = library
                .mods
                .iter()
                .map(|mod_| (mod_.hash.as_str(), mod_))
                .collect();
            let mut ordered = Vec::with_capacity(library.mods.len());
            for mod_ in mods {
                let Some(entry) = stored.remove(mod_.hash.as_str()) else {
                    bail!("Unknown mod {} ({})", mod_.name(), mod_.hash);
                };
                if !entry.state_eq(mod_) {
                    log::debug!("Updating state of {}", mod_.name());
                }
                let mut entry = entry.clone();
                entry.enabled = mod_.enabled;
                entry.enabled_options = mod_.enabled_options.clone();
                ordered.push(entry);
            }
            if !stored.is_empty() {
                log::warn!(
                    "{} stored mod(s) were not part of the applied list; keeping them at the end",
                    stored.len()
                );
                let mut rest: Vec<Mod> = stored.into_values().cloned().collect();
                rest.sort_by(|a, b| a.hash.cmp(&b.hash));
                ordered.extend(rest);
            }
            let updated = Library {
                mods: ordered,
                profiles: library.profiles.clone(),
                current_profile: library.current_profile.clone(),
            };
            updated
                .save(&self.data_dir)
                .context("Failed to save mod configuration for current profile")?;
            *library = updated;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        controller::ModController,
        library::{ModMeta, LIBRARY_FILE},
    };
    use std::fs;
    use tempfile::tempdir;

    const LIBRARY: &str = r#"{
        "mods": [
            {"hash": "aaa", "enabled": true, "meta": {"name": "Alpha"}},
            {"hash": "bbb", "enabled": false, "meta": {"name": "Beta"}},
            {"hash": "ccc", "enabled": true, "meta": {"name": "Gamma"}}
        ],
        "profiles": [{"name": "Default"}, {"name": "Speedrun"}],
        "current_profile": "Speedrun"
    }"#;

    fn open_fixture() -> (tempfile::TempDir, LibraryCatalog) {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(LIBRARY_FILE), LIBRARY).unwrap();
        let catalog = LibraryCatalog::open(dir.path()).unwrap();
        (dir, catalog)
    }

    fn hashes(mods: &[Mod]) -> Vec<&str> {
        mods.iter().map(|mod_| mod_.hash.as_str()).collect()
    }

    #[test]
    fn lists_library_contents() {
        let (_dir, catalog) = open_fixture();

        assert_eq!(hashes(&catalog.list_mods().unwrap()), ["aaa", "bbb", "ccc"]);
        assert_eq!(catalog.list_profiles().unwrap().len(), 2);
        assert_eq!(catalog.current_profile_name().unwrap(), "Speedrun");
    }

    #[test]
    fn preview_lookup_finds_first_existing_extension() {
        let (dir, catalog) = open_fixture();
        let previews = dir.path().join(PREVIEW_DIR);
        fs::create_dir_all(&previews).unwrap();
        fs::write(previews.join("bbb.jpg"), b"jpeg").unwrap();
        fs::write(previews.join("bbb.webp"), b"webp").unwrap();

        assert_eq!(catalog.preview_artifact("bbb"), Some(previews.join("bbb.jpg")));
        assert_eq!(catalog.preview_artifact("aaa"), None);
        assert_eq!(catalog.preview_artifact("../bbb"), None);
    }

    #[test]
    fn apply_persists_order_and_state() {
        let (dir, catalog) = open_fixture();
        let mut mods = catalog.list_mods().unwrap();
        mods.reverse();
        mods[0].enabled = false;
        mods[1].enabled_options.insert("Extra".to_string());

        catalog.apply(&mods).unwrap();

        let reopened = LibraryCatalog::open(dir.path()).unwrap();
        let stored = reopened.list_mods().unwrap();
        assert_eq!(hashes(&stored), ["ccc", "bbb", "aaa"]);
        assert!(!stored[0].enabled);
        assert!(stored[1].is_option_enabled("Extra"));
        assert_eq!(stored[2].meta.name, "Alpha");
    }

    #[test]
    fn apply_keeps_unlisted_mods_at_the_end_sorted_by_hash() {
        let (dir, catalog) = open_fixture();
        let mods = catalog.list_mods().unwrap();
        let beta_only = vec![mods[1].clone()];

        catalog.apply(&beta_only).unwrap();

        assert_eq!(hashes(&catalog.list_mods().unwrap()), ["bbb", "aaa", "ccc"]);
        let reopened = LibraryCatalog::open(dir.path()).unwrap();
        assert_eq!(hashes(&reopened.list_mods().unwrap()), ["bbb", "aaa", "ccc"]);
    }

    #[test]
    fn failed_save_leaves_library_untouched() {
        let (dir, catalog) = open_fixture();
        let mut mods = catalog.list_mods().unwrap();
        mods.reverse();
        mods[0].enabled = false;

        let library_file = dir.path().join(LIBRARY_FILE);
        fs::remove_file(&library_file).unwrap();
        fs::create_dir(&library_file).unwrap();

        let err = catalog.apply(&mods).unwrap_err();
        assert!(format!("{err:#}").contains("Failed to save mod configuration"));
        let stored = catalog.list_mods().unwrap();
        assert_eq!(hashes(&stored), ["aaa", "bbb", "ccc"]);
        assert!(stored[2].enabled);
    }

    #[test]
    fn identical_entries_still_load_into_controller() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join(LIBRARY_FILE),
            r#"{"mods": [{"meta": {"name": "Same"}}, {"meta": {"name": "Same"}}]}"#,
        )
        .unwrap();

        let catalog = LibraryCatalog::open(dir.path()).unwrap();
        let mut controller = ModController::from_catalog(&catalog).unwrap();
        assert_eq!(controller.counts(), (2, 0));

        let second = controller.mods()[1].hash.clone();
        controller.toggle(&second).unwrap();
        assert!(!controller.mods()[0].enabled);
        assert!(controller.mods()[1].enabled);
        controller.apply(&catalog).unwrap();

        let reopened = LibraryCatalog::open(dir.path()).unwrap();
        let stored = reopened.list_mods().unwrap();
        assert_eq!(stored[1].hash, second);
        assert!(stored[1].enabled);
    }

    #[test]
    fn apply_rejects_unknown_mod_and_keeps_library() {
        let (_dir, catalog) = open_fixture();
        let mut mods = catalog.list_mods().unwrap();
        mods.push(Mod {
            hash: "zzz".to_string(),
            enabled: true,
            path: None,
            meta: ModMeta {
                name: "Stranger".to_string(),
                ..Default::default()
            },
            enabled_options: Default::default(),
        });

        let err = catalog.apply(&mods).unwrap_err();
        assert!(err.to_string().contains("Stranger"));
        assert_eq!(hashes(&catalog.list_mods().unwrap()), ["aaa", "bbb", "ccc"]);
    }
}
