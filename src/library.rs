use anyhow::{bail, Context, Result};
use blake3::Hasher;
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeSet, HashMap},
    fs, io,
    path::{Path, PathBuf},
};

pub const LIBRARY_FILE: &str = "library.json";
pub const DEFAULT_PROFILE: &str = "Default";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Library {
    #[serde(default)]
    pub mods: Vec<Mod>,
    #[serde(default)]
    pub profiles: Vec<Profile>,
    #[serde(default)]
    pub current_profile: String,
}

impl Library {
    pub fn load_or_create(data_dir: &Path) -> Result<Self> {
        let library_path = data_dir.join(LIBRARY_FILE);
        if library_path.exists() {
            let raw = fs::read_to_string(&library_path).context("read library.json")?;
            let mut library: Library = serde_json::from_str(&raw).context("parse library.json")?;
            library.ensure_current_profile();
            library.fill_missing_hashes(data_dir)?;
            return Ok(library);
        }

        fs::create_dir_all(data_dir).context("create library dir")?;
        let library = Library {
            mods: Vec::new(),
            profiles: vec![Profile::new(DEFAULT_PROFILE)],
            current_profile: DEFAULT_PROFILE.to_string(),
        };
        library.save(data_dir)?;
        Ok(library)
    }

    pub fn save(&self, data_dir: &Path) -> Result<()> {
        let library_path = data_dir.join(LIBRARY_FILE);
        let raw = serde_json::to_string_pretty(self).context("serialize library.json")?;
        fs::write(library_path, raw).context("write library.json")?;
        Ok(())
    }

    pub fn current_profile(&self) -> Option<&Profile> {
        self.profiles
            .iter()
            .find(|profile| profile.name == self.current_profile)
    }

    /// Guarantees a non-empty profile set and a current profile that names one of them.
    pub fn ensure_current_profile(&mut self) {
        if self.profiles.is_empty() {
            self.profiles.push(Profile::new(DEFAULT_PROFILE));
        }
        if self.current_profile().is_none() {
            self.current_profile = self.profiles[0].name.clone();
        }
    }

    /// Gives every mod a unique hash. Stored hashes must already be unique; computed ones
    /// that collide with an earlier mod are salted with their position.
    fn fill_missing_hashes(&mut self, data_dir: &Path) -> Result<()> {
        let mut owners: HashMap<String, usize> = HashMap::new();
        for (index, mod_) in self.mods.iter().enumerate() {
            if mod_.hash.trim().is_empty() {
                continue;
            }
            if let Some(&first) = owners.get(&mod_.hash) {
                bail!(
                    "Mods {:?} and {:?} share the hash {} in {LIBRARY_FILE}",
                    self.mods[first].name(),
                    mod_.name(),
                    mod_.hash
                );
            }
            owners.insert(mod_.hash.clone(), index);
        }

        for (index, mod_) in self.mods.iter_mut().enumerate() {
            if !mod_.hash.trim().is_empty() {
                continue;
            }
            let archive = mod_.path.as_ref().map(|path| resolve_path(data_dir, path));
            let mut hash = match archive.as_deref().map(hash_file) {
                Some(Ok(hash)) => hash,
                _ => hash_meta(&mod_.meta),
            };
            if owners.contains_key(&hash) {
                log::debug!("Hash of {} collides with another mod; salting it", mod_.name());
                hash = salted_hash(&hash, index, &owners);
            }
            owners.insert(hash.clone(), index);
            mod_.hash = hash;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
}

impl Profile {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mod {
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    pub meta: ModMeta,
    #[serde(default)]
    pub enabled_options: BTreeSet<String>,
}

impl Mod {
    pub fn name(&self) -> &str {
        &self.meta.name
    }

    pub fn has_option(&self, name: &str) -> bool {
        self.option_names().any(|option| option == name)
    }

    pub fn option_names(&self) -> impl Iterator<Item = &str> {
        self.meta
            .option_groups
            .iter()
            .flat_map(|group| group.options.iter())
            .map(|option| option.name.as_str())
    }

    pub fn is_option_enabled(&self, name: &str) -> bool {
        self.enabled_options.contains(name)
    }

    /// Same identity and same user-controlled state (enabled flag and options).
    pub fn state_eq(&self, other: &Mod) -> bool {
        self.hash == other.hash
            && self.enabled == other.enabled
            && self.enabled_options == other.enabled_options
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModMeta {
    pub name: String,
    #[serde(default)]
    pub version: f32,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub author: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub option_groups: Vec<OptionGroup>,
}

impl ModMeta {
    pub fn version_label(&self) -> String {
        format!("{}", self.version)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptionGroup {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub options: Vec<ModOption>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModOption {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

pub fn resolve_path(data_dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        data_dir.join(path)
    }
}

pub fn hash_file(path: &Path) -> io::Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Hasher::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hasher.finalize().to_hex().to_string())
}

fn salted_hash(base: &str, index: usize, taken: &HashMap<String, usize>) -> String {
    let mut salt = index;
    loop {
        let mut hasher = Hasher::new();
        hasher.update(base.as_bytes());
        hasher.update(&(salt as u64).to_le_bytes());
        let hash = hasher.finalize().to_hex().to_string();
        if !taken.contains_key(&hash) {
            return hash;
        }
        salt += 1;
    }
}

fn hash_meta(meta: &ModMeta) -> String {
    let mut hasher = Hasher::new();
    match serde_json::to_vec(meta) {
        Ok(bytes) => {
            hasher.update(&bytes);
        }
        Err(_) => {
            hasher.update(meta.name.as_bytes());
            hasher.update(&meta.version.to_le_bytes());
        }
    }
    hasher.finalize().to_hex().to_string()
}
