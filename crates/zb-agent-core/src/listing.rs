//! Filesystem enumeration: turns raw engine listing rows into the report
//! the coordinator reads for `-l`.

use crate::config::Config;
use crate::snapshot::SNAPSHOT_DELIMITER;
use std::collections::BTreeMap;

/// One row of `zfs list -H` output, with `-` columns mapped to `None`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ListEntry {
    pub name: String,
    pub exclude: Option<String>,
    pub class: Option<String>,
    pub parent_be: Option<String>,
    pub be_uuid: Option<String>,
}

impl ListEntry {
    /// Parses a tab separated row of name, exclude, class, parentbe, uuid.
    /// Missing trailing columns are treated as unset.
    pub fn parse_line(line: &str) -> Option<Self> {
        let mut cols = line.split('\t');
        let name = cols.next()?.trim();
        if name.is_empty() {
            return None;
        }
        let mut next = || cols.next().and_then(property_value);
        Some(Self {
            name: name.to_string(),
            exclude: next(),
            class: next(),
            parent_be: next(),
            be_uuid: next(),
        })
    }

    /// Splits the row name into its filesystem and optional snapshot suffix.
    pub fn split_name(&self) -> (&str, Option<&str>) {
        match self.name.split_once(SNAPSHOT_DELIMITER) {
            Some((fs, suffix)) => (fs, Some(suffix)),
            None => (self.name.as_str(), None),
        }
    }

    fn excluded(&self) -> bool {
        self.exclude.as_deref() == Some("on")
    }

    fn belongs_to_inactive_be(&self, active_be: Option<&str>) -> bool {
        [self.parent_be.as_deref(), self.be_uuid.as_deref()]
            .into_iter()
            .flatten()
            .any(|id| Some(id) != active_be)
    }
}

fn property_value(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() || raw == "-" {
        None
    } else {
        Some(raw.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Filesystem {
    pub name: String,
    pub snapshots: Vec<String>,
    pub class: Option<String>,
}

/// Filters and groups rows by filesystem, sorted by name. Snapshot order
/// within a filesystem is the order the rows arrived in.
///
/// `active_be` is only consulted when `config.exclude_inactive_be` is set.
pub fn collect(entries: &[ListEntry], config: &Config, active_be: Option<&str>) -> Vec<Filesystem> {
    let mut by_name: BTreeMap<&str, Filesystem> = BTreeMap::new();

    for entry in entries {
        if config.exclude_inactive_be && entry.belongs_to_inactive_be(active_be) {
            continue;
        }
        let (fs_name, suffix) = entry.split_name();
        if entry.excluded() || !config.pattern.is_match(fs_name) {
            continue;
        }
        let fs = by_name.entry(fs_name).or_insert_with(|| Filesystem {
            name: fs_name.to_string(),
            ..Filesystem::default()
        });
        if let Some(suffix) = suffix {
            fs.snapshots.push(suffix.to_string());
        }
        if let Some(class) = &entry.class {
            fs.class = Some(class.clone());
        }
    }

    by_name.into_values().collect()
}

pub fn render(filesystems: &[Filesystem]) -> String {
    filesystems
        .iter()
        .map(|fs| {
            let snapshots = fs.snapshots.join(",");
            match &fs.class {
                Some(class) => format!("{} [{snapshots}] {{{class}}}\n", fs.name),
                None => format!("{} [{snapshots}]\n", fs.name),
            }
        })
        .collect()
}
