//! Printer profile registry.
//!
//! Profiles are keyed by name and indexed by dialect. Built-in profiles are
//! always present; custom ones can be loaded from and saved to JSON.

use fdmlink_core::Dialect;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

use crate::builtin::{builtin_profiles, generic_marlin, FALLBACK_PROFILE};
use crate::error::{DeviceError, DeviceResult};
use crate::model::PrinterProfile;

/// Outcome of a profile lookup for a detected printer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileMatch {
    pub profile: PrinterProfile,
    /// True when the explicit fallback profile was substituted for an
    /// unclassified printer
    pub fallback: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct ProfileFile {
    profiles: Vec<PrinterProfile>,
}

#[derive(Debug, Clone)]
pub struct ProfileRegistry {
    profiles: BTreeMap<String, PrinterProfile>,
    by_dialect: HashMap<Dialect, Vec<String>>,
    builtin: BTreeSet<String>,
    fallback: PrinterProfile,
}

impl ProfileRegistry {
    /// Registry holding only the built-in catalog
    pub fn new() -> Self {
        let mut registry = Self {
            profiles: BTreeMap::new(),
            by_dialect: HashMap::new(),
            builtin: BTreeSet::new(),
            fallback: generic_marlin(),
        };
        for profile in builtin_profiles() {
            registry.builtin.insert(profile.name.clone());
            registry.index(profile);
        }
        registry
    }

    fn index(&mut self, profile: PrinterProfile) {
        let names = self.by_dialect.entry(profile.dialect).or_default();
        if !names.contains(&profile.name) {
            names.push(profile.name.clone());
        }
        self.profiles.insert(profile.name.clone(), profile);
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&PrinterProfile> {
        self.profiles.get(name)
    }

    /// All profiles ordered by name
    pub fn all(&self) -> impl Iterator<Item = &PrinterProfile> {
        self.profiles.values()
    }

    pub fn is_builtin(&self, name: &str) -> bool {
        self.builtin.contains(name)
    }

    /// Profiles for a dialect in registration order
    pub fn for_dialect(&self, dialect: Dialect) -> Vec<&PrinterProfile> {
        self.by_dialect
            .get(&dialect)
            .map(|names| names.iter().filter_map(|n| self.profiles.get(n)).collect())
            .unwrap_or_default()
    }

    /// The profile flagged `default_for_dialect`, else the first registered one
    pub fn default_for(&self, dialect: Dialect) -> Option<&PrinterProfile> {
        let candidates = self.for_dialect(dialect);
        candidates
            .iter()
            .find(|p| p.default_for_dialect)
            .or_else(|| candidates.first())
            .copied()
    }

    /// The explicit fallback used for unclassified firmware
    pub fn fallback(&self) -> &PrinterProfile {
        self.profiles.get(FALLBACK_PROFILE).unwrap_or(&self.fallback)
    }

    /// Add a custom profile; fails if the name is taken
    pub fn add(&mut self, profile: PrinterProfile) -> DeviceResult<()> {
        profile.validate()?;
        if self.profiles.contains_key(&profile.name) {
            return Err(DeviceError::ProfileAlreadyExists(profile.name));
        }
        tracing::debug!("Registered profile {}", profile.name);
        self.index(profile);
        Ok(())
    }

    /// Add or replace a custom profile. Built-ins cannot be replaced.
    pub fn upsert(&mut self, profile: PrinterProfile) -> DeviceResult<()> {
        profile.validate()?;
        if self.is_builtin(&profile.name) {
            return Err(DeviceError::BuiltinProfile(profile.name));
        }
        if let Some(old) = self.profiles.get(&profile.name) {
            if old.dialect != profile.dialect {
                let old_dialect = old.dialect;
                if let Some(names) = self.by_dialect.get_mut(&old_dialect) {
                    names.retain(|n| n != &profile.name);
                }
            }
        }
        self.index(profile);
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> DeviceResult<PrinterProfile> {
        if self.is_builtin(name) {
            return Err(DeviceError::BuiltinProfile(name.to_string()));
        }
        let profile = self
            .profiles
            .remove(name)
            .ok_or_else(|| DeviceError::ProfileNotFound(name.to_string()))?;
        if let Some(names) = self.by_dialect.get_mut(&profile.dialect) {
            names.retain(|n| n != name);
        }
        Ok(profile)
    }

    /// Pick the profile for a classified printer.
    ///
    /// Unknown dialects get the fallback profile with `fallback = true`.
    /// Otherwise the longest name/model/alias contained in `machine_type`
    /// wins, preferring profiles of the same dialect, then the dialect's
    /// default profile.
    pub fn best_match(&self, dialect: Dialect, machine_type: Option<&str>) -> ProfileMatch {
        if !dialect.is_known() {
            return ProfileMatch {
                profile: self.fallback().clone(),
                fallback: true,
            };
        }

        if let Some(profile) = machine_type.and_then(|m| self.match_machine_type(dialect, m)) {
            return ProfileMatch {
                profile: profile.clone(),
                fallback: false,
            };
        }

        match self.default_for(dialect) {
            Some(profile) => ProfileMatch {
                profile: profile.clone(),
                fallback: false,
            },
            None => ProfileMatch {
                profile: self.fallback().clone(),
                fallback: true,
            },
        }
    }

    fn match_machine_type(&self, dialect: Dialect, machine_type: &str) -> Option<&PrinterProfile> {
        let target = normalize(machine_type);
        if target.is_empty() {
            return None;
        }

        let mut best: Option<(bool, usize, &PrinterProfile)> = None;
        for profile in self.profiles.values() {
            let longest = profile
                .match_keys()
                .map(normalize)
                .filter(|key| !key.is_empty() && target.contains(key.as_str()))
                .map(|key| key.len())
                .max();
            let Some(len) = longest else { continue };
            let candidate = (profile.dialect == dialect, len, profile);
            if best.is_none_or(|(same, l, _)| (candidate.0, candidate.1) > (same, l)) {
                best = Some(candidate);
            }
        }
        best.map(|(_, _, profile)| profile)
    }

    /// Merge profiles from a JSON file (`{"profiles": [...]}`) as custom
    /// profiles. Returns how many were loaded.
    pub fn load_from_file(&mut self, path: &Path) -> DeviceResult<usize> {
        let content = std::fs::read_to_string(path)?;
        let file: ProfileFile = serde_json::from_str(&content)
            .map_err(|e| DeviceError::LoadError(format!("{}: {}", path.display(), e)))?;
        let mut loaded = 0;
        for profile in file.profiles {
            self.upsert(profile)?;
            loaded += 1;
        }
        tracing::info!("Loaded {} profiles from {}", loaded, path.display());
        Ok(loaded)
    }

    /// Write every custom (non built-in) profile to a JSON file
    pub fn save_custom(&self, path: &Path) -> DeviceResult<()> {
        let file = ProfileFile {
            profiles: self
                .profiles
                .values()
                .filter(|p| !self.is_builtin(&p.name))
                .cloned()
                .collect(),
        };
        let json = serde_json::to_string_pretty(&file)?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, json)
            .map_err(|e| DeviceError::SaveError(format!("{}: {}", path.display(), e)))?;
        Ok(())
    }
}

impl Default for ProfileRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_lookup() {
        let registry = ProfileRegistry::new();
        assert!(registry.get("creality-ender-3").is_some());
        assert_eq!(registry.fallback().name, FALLBACK_PROFILE);
        assert!(registry.for_dialect(Dialect::Klipper).len() >= 2);
        assert_eq!(
            registry.default_for(Dialect::Klipper).map(|p| p.name.as_str()),
            Some("generic-klipper")
        );
    }

    #[test]
    fn test_best_match_prefers_longest_alias() {
        let registry = ProfileRegistry::new();
        let m = registry.best_match(Dialect::Marlin, Some("Ender-3"));
        assert_eq!(m.profile.name, "creality-ender-3");
        assert!(!m.fallback);

        let m = registry.best_match(Dialect::Marlin, Some("Ender-3 V2"));
        assert_eq!(m.profile.name, "creality-ender-3-v2");
    }

    #[test]
    fn test_best_match_defaults() {
        let registry = ProfileRegistry::new();
        let m = registry.best_match(Dialect::Klipper, Some("mystery box"));
        assert_eq!(m.profile.name, "generic-klipper");
        assert!(!m.fallback);

        let m = registry.best_match(Dialect::Unknown, Some("Ender-3"));
        assert_eq!(m.profile.name, FALLBACK_PROFILE);
        assert!(m.fallback);
    }

    #[test]
    fn test_custom_profiles() {
        let mut registry = ProfileRegistry::new();
        let profile = PrinterProfile::new("my-corexy", Dialect::Klipper);
        registry.add(profile.clone()).unwrap();
        assert!(matches!(
            registry.add(profile),
            Err(DeviceError::ProfileAlreadyExists(_))
        ));
        assert!(matches!(
            registry.remove(FALLBACK_PROFILE),
            Err(DeviceError::BuiltinProfile(_))
        ));
        registry.remove("my-corexy").unwrap();
        assert!(registry.get("my-corexy").is_none());
        assert!(registry
            .for_dialect(Dialect::Klipper)
            .iter()
            .all(|p| p.name != "my-corexy"));
    }
}
