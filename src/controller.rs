use crate::{
    activity::{log_channel, ActivityLog, LogRecord, LogSender},
    catalog::ModCatalog,
    library::{Mod, Profile, DEFAULT_PROFILE},
};
use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::{collections::HashSet, sync::mpsc::Receiver};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControllerError {
    #[error("no mod with hash {0}")]
    NotFound(String),
    #[error("invalid index: {0}")]
    InvalidIndex(#[from] IndexError),
    #[error("mod {hash} has no option named {option}")]
    UnknownOption { hash: String, option: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IndexError {
    #[error("no mods selected")]
    EmptySelection,
    #[error("index {index} is out of bounds for {len} mod(s)")]
    OutOfBounds { index: usize, len: usize },
    #[error("index {0} is selected more than once")]
    Duplicate(usize),
    #[error("target position {target} is out of bounds for {remaining} remaining mod(s)")]
    TargetOutOfBounds { target: usize, remaining: usize },
}

/// Intents raised by the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Toggle { hash: String },
    ToggleOption { hash: String, option: String },
    Reorder { indices: Vec<usize>, target: usize },
    Select { index: Option<usize> },
    SelectAlso { index: usize },
    Deselect { index: usize },
    ClearSelection,
    MoveSelected { target: usize },
}

/// Owned, read-only copy of the controller state for rendering.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub mods: Vec<Mod>,
    pub selected: Option<usize>,
    pub selection: Vec<usize>,
    pub dirty: bool,
    pub profiles: Vec<Profile>,
    pub current_profile: String,
    pub log: Vec<LogRecord>,
}

impl Snapshot {
    pub fn selected_mod(&self) -> Option<&Mod> {
        self.selected.and_then(|index| self.mods.get(index))
    }

    pub fn enabled_count(&self) -> usize {
        self.mods.iter().filter(|mod_| mod_.enabled).count()
    }
}

pub struct ModController {
    mods: Vec<Mod>,
    // Hashes, primary selection first. Positions are always resolved against `mods`.
    selection: Vec<String>,
    dirty: bool,
    profiles: Vec<Profile>,
    current_profile: String,
    log: ActivityLog,
    log_rx: Option<Receiver<LogRecord>>,
}

impl ModController {
    pub fn from_catalog(catalog: &dyn ModCatalog) -> Result<Self> {
        let mods = catalog.list_mods().context("Failed to list mods")?;
        let profiles = catalog.list_profiles().context("Failed to list profiles")?;
        let current_profile = catalog
            .current_profile_name()
            .context("Failed to read current profile")?;
        let controller = Self::new(mods, profiles, current_profile)?;
        log::info!(
            "Loaded {} mod(s), profile {}",
            controller.mods.len(),
            controller.current_profile
        );
        Ok(controller)
    }

    pub fn new(mods: Vec<Mod>, mut profiles: Vec<Profile>, current_profile: String) -> Result<Self> {
        let mut seen = HashSet::with_capacity(mods.len());
        for mod_ in &mods {
            if !seen.insert(mod_.hash.as_str()) {
                bail!("Duplicate mod hash {} ({})", mod_.hash, mod_.name());
            }
        }

        if profiles.is_empty() {
            profiles.push(Profile::new(DEFAULT_PROFILE));
        }
        let current_profile = if profiles.iter().any(|profile| profile.name == current_profile) {
            current_profile
        } else {
            log::warn!(
                "Profile {current_profile:?} not found, using {}",
                profiles[0].name
            );
            profiles[0].name.clone()
        };

        Ok(Self {
            selection: mods.first().map(|mod_| mod_.hash.clone()).into_iter().collect(),
            mods,
            dirty: false,
            profiles,
            current_profile,
            log: ActivityLog::new(),
            log_rx: None,
        })
    }

    pub fn mods(&self) -> &[Mod] {
        &self.mods
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn profiles(&self) -> &[Profile] {
        &self.profiles
    }

    pub fn current_profile(&self) -> &str {
        &self.current_profile
    }

    pub fn log(&self) -> &ActivityLog {
        &self.log
    }

    /// (total, enabled)
    pub fn counts(&self) -> (usize, usize) {
        let enabled = self.mods.iter().filter(|mod_| mod_.enabled).count();
        (self.mods.len(), enabled)
    }

    pub fn position(&self, hash: &str) -> Option<usize> {
        self.mods.iter().position(|mod_| mod_.hash == hash)
    }

    pub fn selected_index(&self) -> Option<usize> {
        self.selection.first().and_then(|hash| self.position(hash))
    }

    pub fn selected_mod(&self) -> Option<&Mod> {
        self.selected_index().map(|index| &self.mods[index])
    }

    pub fn selection_indices(&self) -> Vec<usize> {
        self.selection
            .iter()
            .filter_map(|hash| self.position(hash))
            .collect()
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            mods: self.mods.clone(),
            selected: self.selected_index(),
            selection: self.selection_indices(),
            dirty: self.dirty,
            profiles: self.profiles.clone(),
            current_profile: self.current_profile.clone(),
            log: self.log.snapshot(),
        }
    }

    pub fn dispatch(&mut self, command: Command) -> Result<(), ControllerError> {
        match command {
            Command::Toggle { hash } => self.toggle(&hash),
            Command::ToggleOption { hash, option } => self.toggle_option(&hash, &option),
            Command::Reorder { indices, target } => self.reorder(&indices, target),
            Command::Select { index } => self.select(index),
            Command::SelectAlso { index } => self.select_also(index),
            Command::Deselect { index } => self.deselect(index),
            Command::ClearSelection => {
                self.clear_selection();
                Ok(())
            }
            Command::MoveSelected { target } => self.move_selected(target),
        }
    }

    pub fn toggle(&mut self, hash: &str) -> Result<(), ControllerError> {
        let index = self
            .position(hash)
            .ok_or_else(|| ControllerError::NotFound(hash.to_string()))?;
        let mod_ = &mut self.mods[index];
        mod_.enabled = !mod_.enabled;
        log::debug!(
            "{} {}",
            if mod_.enabled { "Enabled" } else { "Disabled" },
            mod_.name()
        );
        self.dirty = true;
        Ok(())
    }

    pub fn toggle_option(&mut self, hash: &str, option: &str) -> Result<(), ControllerError> {
        let index = self
            .position(hash)
            .ok_or_else(|| ControllerError::NotFound(hash.to_string()))?;
        let mod_ = &mut self.mods[index];
        if !mod_.has_option(option) {
            return Err(ControllerError::UnknownOption {
                hash: hash.to_string(),
                option: option.to_string(),
            });
        }
        if !mod_.enabled_options.remove(option) {
            mod_.enabled_options.insert(option.to_string());
        }
        self.dirty = true;
        Ok(())
    }

    /// Moves the mods at `indices` as one contiguous block. The block keeps the mods'
    /// original relative order, whatever order `indices` lists them in. `target` counts
    /// positions among the mods that are *not* moved: 0 is the front, the number of
    /// remaining mods is the back.
    pub fn reorder(&mut self, indices: &[usize], target: usize) -> Result<(), ControllerError> {
        let len = self.mods.len();
        if indices.is_empty() {
            return Err(IndexError::EmptySelection.into());
        }
        let mut picked = vec![false; len];
        for &index in indices {
            if index >= len {
                return Err(IndexError::OutOfBounds { index, len }.into());
            }
            if picked[index] {
                return Err(IndexError::Duplicate(index).into());
            }
            picked[index] = true;
        }
        let remaining = len - indices.len();
        if target > remaining {
            return Err(IndexError::TargetOutOfBounds { target, remaining }.into());
        }

        let mut moved = Vec::with_capacity(indices.len());
        let mut rest = Vec::with_capacity(remaining);
        for (mod_, picked) in std::mem::take(&mut self.mods).into_iter().zip(picked) {
            if picked {
                moved.push(mod_);
            } else {
                rest.push(mod_);
            }
        }
        rest.splice(target..target, moved);
        self.mods = rest;
        self.dirty = true;
        log::debug!("Moved {} mod(s) to position {target}", indices.len());
        Ok(())
    }

    pub fn select(&mut self, index: Option<usize>) -> Result<(), ControllerError> {
        match index {
            Some(index) => {
                let hash = self.hash_at(index)?;
                self.selection = vec![hash];
            }
            None => self.selection.clear(),
        }
        Ok(())
    }

    pub fn select_also(&mut self, index: usize) -> Result<(), ControllerError> {
        let hash = self.hash_at(index)?;
        if !self.selection.contains(&hash) {
            self.selection.push(hash);
        }
        Ok(())
    }

    pub fn deselect(&mut self, index: usize) -> Result<(), ControllerError> {
        let hash = self.hash_at(index)?;
        self.selection.retain(|selected| *selected != hash);
        Ok(())
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    pub fn move_selected(&mut self, target: usize) -> Result<(), ControllerError> {
        let indices = self.selection_indices();
        self.reorder(&indices, target)
    }

    /// Hands the current arrangement to the catalog and clears the dirty flag.
    pub fn apply(&mut self, catalog: &dyn ModCatalog) -> Result<()> {
        if !self.dirty {
            log::info!("No pending changes to apply");
            return Ok(());
        }
        log::info!("Applying pending changes to mod configuration");
        catalog
            .apply(&self.mods)
            .context("Failed to apply pending mod changes")?;
        self.dirty = false;
        log::info!("Done");
        Ok(())
    }

    pub fn append_log(&mut self, record: LogRecord) {
        self.log.append(record);
    }

    /// Returns the sender the host uses to deliver log records. Replaces any earlier
    /// channel; records still queued on it are drained first.
    pub fn attach_log_channel(&mut self) -> LogSender {
        self.pump_logs();
        let (sender, rx) = log_channel();
        self.log_rx = Some(rx);
        sender
    }

    /// Moves every record waiting on the channel into the activity log, in arrival order.
    pub fn pump_logs(&mut self) -> usize {
        let Some(rx) = self.log_rx.as_ref() else {
            return 0;
        };
        let mut count = 0;
        for record in rx.try_iter() {
            self.log.append(record);
            count += 1;
        }
        count
    }

    fn hash_at(&self, index: usize) -> Result<String, ControllerError> {
        self.mods
            .get(index)
            .map(|mod_| mod_.hash.clone())
            .ok_or(ControllerError::InvalidIndex(IndexError::OutOfBounds {
                index,
                len: self.mods.len(),
            }))
    }
}
