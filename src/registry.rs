//! # Module Registry
//!
//! Maps module identifiers to implementations and their declared
//! configuration. Modules are registered once during start-up; afterwards the
//! registry is only read, and [`ModuleRegistry::get_enabled`] always answers
//! in registration order, which is the canonical module start order of a scan.
//!
//! ## Example
//!
//! ```rust,no_run
//! use reconmap::modules;
//! use reconmap::registry::{ModuleRegistry, Selection};
//!
//! let mut registry = ModuleRegistry::new();
//! modules::register_builtin(&mut registry)?;
//!
//! let selected = registry.get_enabled(&Selection::parse("dns_resolve")?)?;
//! assert_eq!(selected[0].descriptor.id, "dns_resolve");
//! # Ok::<(), reconmap::error::ReconError>(())
//! ```

use crate::error::{ReconError, Result};
use crate::module::{ModuleDescriptor, ReconModule};
use crate::validation;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

/// Which registered modules a scan should run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Every enabled module
    All,
    /// Exactly these module ids, duplicates collapsed
    Only(Vec<String>),
}

impl Selection {
    /// Parse `"all"` or a comma separated list of module ids
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.eq_ignore_ascii_case("all") {
            return Ok(Self::All);
        }
        Ok(Self::only(input.split(',').map(str::trim).filter(|s| !s.is_empty())))
    }

    pub fn only<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = HashSet::new();
        let ids = ids
            .into_iter()
            .map(Into::into)
            .filter(|id: &String| seen.insert(id.clone()))
            .collect();
        Self::Only(ids)
    }

    pub fn is_all(&self) -> bool {
        matches!(self, Self::All)
    }
}

impl Default for Selection {
    fn default() -> Self {
        Self::All
    }
}

impl FromStr for Selection {
    type Err = ReconError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("all"),
            Self::Only(ids) => f.write_str(&ids.join(",")),
        }
    }
}

impl Serialize for Selection {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Selection {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// A registered module: its declaration plus the implementation
#[derive(Clone)]
pub struct RegisteredModule {
    pub descriptor: ModuleDescriptor,
    pub module: Arc<dyn ReconModule>,
}

impl fmt::Debug for RegisteredModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredModule")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

/// Registry of all modules known to this process
#[derive(Debug, Default)]
pub struct ModuleRegistry {
    modules: Vec<RegisteredModule>,
    index: HashMap<String, usize>,
    disabled: HashSet<String>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an implementation under `descriptor`
    ///
    /// Fails on a malformed or duplicate id, a zero timeout or a zero rate
    /// cost.
    pub fn register(
        &mut self,
        descriptor: ModuleDescriptor,
        module: Arc<dyn ReconModule>,
    ) -> Result<()> {
        validation::validate_module_id(&descriptor.id)?;
        if self.index.contains_key(&descriptor.id) {
            return Err(ReconError::config(format!(
                "Module '{}' is already registered",
                descriptor.id
            )));
        }
        if descriptor.timeout.is_zero() {
            return Err(ReconError::config(format!(
                "Module '{}' declares a zero timeout",
                descriptor.id
            )));
        }
        if descriptor.rate_cost == 0 {
            return Err(ReconError::config(format!(
                "Module '{}' declares a zero rate cost",
                descriptor.id
            )));
        }

        debug!(
            module = %descriptor.id,
            timeout_ms = descriptor.timeout.as_millis() as u64,
            rate_cost = descriptor.rate_cost,
            "Module registered"
        );
        self.index.insert(descriptor.id.clone(), self.modules.len());
        self.modules.push(RegisteredModule { descriptor, module });
        Ok(())
    }

    /// Register a module under its own declared descriptor
    pub fn register_module(&mut self, module: Arc<dyn ReconModule>) -> Result<()> {
        let descriptor = module.descriptor();
        self.register(descriptor, module)
    }

    /// Toggle whether a module takes part in `all` selections
    pub fn set_enabled(&mut self, id: &str, enabled: bool) -> Result<()> {
        if !self.index.contains_key(id) {
            return Err(ReconError::unknown_module(id));
        }
        if enabled {
            self.disabled.remove(id);
        } else {
            self.disabled.insert(id.to_string());
        }
        Ok(())
    }

    pub fn is_enabled(&self, id: &str) -> bool {
        self.index.contains_key(id) && !self.disabled.contains(id)
    }

    pub fn get(&self, id: &str) -> Option<&RegisteredModule> {
        self.index.get(id).map(|&i| &self.modules[i])
    }

    /// Registered ids in registration order
    pub fn ids(&self) -> Vec<&str> {
        self.modules.iter().map(|m| m.descriptor.id.as_str()).collect()
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &ModuleDescriptor> {
        self.modules.iter().map(|m| &m.descriptor)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Resolve a selection into modules, in registration order
    ///
    /// `All` yields every enabled module. `Only` yields exactly the named
    /// modules, including disabled ones, and fails with
    /// [`ReconError::UnknownModule`] on the first id never registered.
    pub fn get_enabled(&self, selection: &Selection) -> Result<Vec<RegisteredModule>> {
        match selection {
            Selection::All => Ok(self
                .modules
                .iter()
                .filter(|m| !self.disabled.contains(&m.descriptor.id))
                .cloned()
                .collect()),
            Selection::Only(ids) => {
                if let Some(unknown) = ids.iter().find(|id| !self.index.contains_key(*id)) {
                    return Err(ReconError::unknown_module(unknown.as_str()));
                }
                let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();
                Ok(self
                    .modules
                    .iter()
                    .filter(|m| wanted.contains(m.descriptor.id.as_str()))
                    .cloned()
                    .collect())
            }
        }
    }
}
