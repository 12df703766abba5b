//! Text renderers over a [`Snapshot`]. Nothing here mutates state.

use crate::{activity::LogRecord, controller::Snapshot, library::Mod};
use std::path::Path;

pub fn toolbar(snapshot: &Snapshot) -> String {
    let mut line = format!(
        "Profile: {} | {} Mods / {} Active",
        snapshot.current_profile,
        snapshot.mods.len(),
        snapshot.enabled_count()
    );
    if snapshot.dirty {
        line.push_str(" | unsaved changes");
    }
    line
}

/// One line per mod, in load order. `>` marks the primary selection, `+` other selected mods.
pub fn mod_lines(snapshot: &Snapshot, filter: Option<&str>) -> Vec<String> {
    let needle = filter.map(str::to_ascii_lowercase);
    snapshot
        .mods
        .iter()
        .enumerate()
        .filter(|(_, mod_)| match &needle {
            Some(needle) => mod_.name().to_ascii_lowercase().contains(needle),
            None => true,
        })
        .map(|(index, mod_)| {
            let marker = if snapshot.selected == Some(index) {
                '>'
            } else if snapshot.selection.contains(&index) {
                '+'
            } else {
                ' '
            };
            mod_line(marker, index, mod_)
        })
        .collect()
}

fn mod_line(marker: char, index: usize, mod_: &Mod) -> String {
    let enabled = if mod_.enabled { "x" } else { " " };
    let mut line = format!(
        "{marker}{index:>3} [{enabled}] {name} v{version}",
        name = mod_.name(),
        version = mod_.meta.version_label()
    );
    if !mod_.meta.category.is_empty() {
        line.push_str(&format!(" ({})", mod_.meta.category));
    }
    line
}

pub fn profile_lines(snapshot: &Snapshot) -> Vec<String> {
    snapshot
        .profiles
        .iter()
        .map(|profile| {
            if profile.name == snapshot.current_profile {
                format!("* {}", profile.name)
            } else {
                format!("  {}", profile.name)
            }
        })
        .collect()
}

pub fn info_lines(mod_: &Mod, preview: Option<&Path>) -> Vec<String> {
    let meta = &mod_.meta;
    let mut lines = Vec::new();
    if let Some(preview) = preview {
        lines.push(format!("Preview:  {}", preview.display()));
    }
    lines.push(format!("Name:     {}", meta.name));
    lines.push(format!("Version:  {}", meta.version_label()));
    lines.push(format!("Category: {}", meta.category));
    lines.push(format!("Author:   {}", meta.author));
    if let Some(url) = &meta.url {
        lines.push(format!("Webpage:  {url}"));
    }
    lines.push("Description:".to_string());
    lines.extend(meta.description.lines().map(|line| format!("  {line}")));

    let options: Vec<&str> = mod_.option_names().collect();
    if !options.is_empty() {
        lines.push("Options:".to_string());
        for option in options {
            let enabled = if mod_.is_option_enabled(option) { "x" } else { " " };
            lines.push(format!("  [{enabled}] {option}"));
        }
    }
    lines
}

pub fn log_lines(records: &[LogRecord]) -> Vec<String> {
    records.iter().map(LogRecord::line).collect()
}
