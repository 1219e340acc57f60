//! Hook binding table.
//!
//! Every extension owns an active and at most one staged binding list. A
//! list is built whole for one generation and replaced whole on promotion,
//! all under one lock, so a lookup sees either the old or the new bindings
//! of an extension and never a mix.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use regex::Regex;
use tracing::debug;

use exthost_protocols::{ExtensionError, HookSpec, ManifestError};

/// One hook bound for one generation.
#[derive(Debug, Clone)]
pub struct HookBinding {
    pub extension: String,
    pub generation: u64,
    pub install_seq: u64,
    pub spec: HookSpec,
    matcher: Option<Regex>,
}

impl HookBinding {
    pub fn event(&self) -> &str {
        &self.spec.event
    }

    pub fn command(&self) -> &str {
        &self.spec.command
    }

    /// Whether the binding applies to an event context.
    ///
    /// Bindings without a matcher apply to every context; a matcher only
    /// matches a string `target` field.
    pub fn matches(&self, context: &serde_json::Value) -> bool {
        match self.matcher {
            None => true,
            Some(ref re) => context
                .get("target")
                .and_then(|t| t.as_str())
                .is_some_and(|target| re.is_match(target)),
        }
    }
}

/// The bindings of one extension generation, in manifest order.
#[derive(Debug)]
pub struct GenerationHooks {
    pub generation: u64,
    pub bindings: Vec<HookBinding>,
}

#[derive(Default)]
struct ExtensionHooks {
    install_seq: u64,
    active: Option<Arc<GenerationHooks>>,
    staged: Option<Arc<GenerationHooks>>,
}

/// Event name to ordered hook bindings, across extensions.
#[derive(Default)]
pub struct HookBindingTable {
    entries: RwLock<BTreeMap<String, ExtensionHooks>>,
}

impl HookBindingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage the bindings of a generation without making them visible.
    pub fn bind(
        &self,
        extension: &str,
        generation: u64,
        install_seq: u64,
        specs: &[HookSpec],
    ) -> Result<usize, ExtensionError> {
        let bindings = specs
            .iter()
            .map(|spec| -> Result<HookBinding, ExtensionError> {
                let matcher = spec
                    .matcher
                    .as_deref()
                    .map(Regex::new)
                    .transpose()
                    .map_err(|e| {
                        ExtensionError::invalid_manifest(
                            extension,
                            ManifestError::InvalidHook {
                                event: spec.event.clone(),
                                reason: e.to_string(),
                            },
                        )
                    })?;
                Ok(HookBinding {
                    extension: extension.to_string(),
                    generation,
                    install_seq,
                    spec: spec.clone(),
                    matcher,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let count = bindings.len();
        let mut entries = self.entries.write();
        let entry = entries.entry(extension.to_string()).or_default();
        entry.install_seq = install_seq;
        entry.staged = Some(Arc::new(GenerationHooks {
            generation,
            bindings,
        }));

        debug!("Staged {} hooks for {} (generation {})", count, extension, generation);
        Ok(count)
    }

    /// Make a staged generation the active one. Returns false when nothing
    /// was staged for it.
    pub fn promote(&self, extension: &str, generation: u64) -> bool {
        let mut entries = self.entries.write();
        let Some(entry) = entries.get_mut(extension) else {
            return false;
        };

        match entry.staged.take() {
            Some(staged) if staged.generation == generation => {
                entry.active = Some(staged);
                true
            }
            other => {
                entry.staged = other;
                false
            }
        }
    }

    /// Drop the bindings of a generation, staged or active.
    pub fn unbind(&self, extension: &str, generation: u64) {
        let mut entries = self.entries.write();
        let Some(entry) = entries.get_mut(extension) else {
            return;
        };

        if entry.staged.as_ref().is_some_and(|h| h.generation == generation) {
            entry.staged = None;
        }
        if entry.active.as_ref().is_some_and(|h| h.generation == generation) {
            entry.active = None;
        }
        if entry.staged.is_none() && entry.active.is_none() {
            entries.remove(extension);
        }
    }

    /// Active bindings for an event, by extension install order then
    /// manifest order.
    pub fn lookup(&self, event: &str) -> Vec<HookBinding> {
        let entries = self.entries.read();
        let mut active: Vec<_> = entries
            .values()
            .filter_map(|e| e.active.as_ref().map(|hooks| (e.install_seq, hooks.clone())))
            .collect();
        drop(entries);

        active.sort_by_key(|(seq, _)| *seq);
        active
            .iter()
            .flat_map(|(_, hooks)| hooks.bindings.iter().filter(|b| b.spec.event == event))
            .cloned()
            .collect()
    }

    /// The active bindings of one extension.
    pub fn active(&self, extension: &str) -> Option<Arc<GenerationHooks>> {
        self.entries
            .read()
            .get(extension)
            .and_then(|e| e.active.clone())
    }

    pub fn active_generation(&self, extension: &str) -> Option<u64> {
        self.active(extension).map(|h| h.generation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hooks(commands: &[(&str, &str)]) -> Vec<HookSpec> {
        commands
            .iter()
            .map(|(event, command)| HookSpec::new(*event, *command))
            .collect()
    }

    #[test]
    fn test_bind_is_invisible_until_promote() {
        let table = HookBindingTable::new();
        table
            .bind("ext", 1, 0, &hooks(&[("BeforeAgent", "echo 1")]))
            .unwrap();
        assert!(table.lookup("BeforeAgent").is_empty());

        assert!(table.promote("ext", 1));
        assert_eq!(table.lookup("BeforeAgent").len(), 1);
        assert_eq!(table.active_generation("ext"), Some(1));
    }

    #[test]
    fn test_promote_swaps_whole_list() {
        let table = HookBindingTable::new();
        table
            .bind("ext", 1, 0, &hooks(&[("BeforeAgent", "old a"), ("BeforeAgent", "old b")]))
            .unwrap();
        table.promote("ext", 1);
        table
            .bind("ext", 2, 0, &hooks(&[("BeforeAgent", "new")]))
            .unwrap();

        let before: Vec<_> = table.lookup("BeforeAgent").into_iter().map(|b| b.spec.command).collect();
        assert_eq!(before, vec!["old a", "old b"]);

        table.promote("ext", 2);
        let after = table.lookup("BeforeAgent");
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].command(), "new");
        assert_eq!(after[0].generation, 2);
    }

    #[test]
    fn test_promote_wrong_generation() {
        let table = HookBindingTable::new();
        table.bind("ext", 2, 0, &hooks(&[("E", "x")])).unwrap();
        assert!(!table.promote("ext", 3));
        assert!(!table.promote("missing", 1));
        // The staged generation is still promotable.
        assert!(table.promote("ext", 2));
    }

    #[test]
    fn test_lookup_orders_by_install_then_manifest() {
        let table = HookBindingTable::new();
        table
            .bind("zeta", 1, 0, &hooks(&[("E", "z1"), ("Other", "zo"), ("E", "z2")]))
            .unwrap();
        table.bind("alpha", 1, 1, &hooks(&[("E", "a1")])).unwrap();
        table.promote("zeta", 1);
        table.promote("alpha", 1);

        let commands: Vec<_> = table.lookup("E").into_iter().map(|b| b.spec.command).collect();
        assert_eq!(commands, vec!["z1", "z2", "a1"]);
    }

    #[test]
    fn test_unbind_staged_keeps_active() {
        let table = HookBindingTable::new();
        table.bind("ext", 1, 0, &hooks(&[("E", "old")])).unwrap();
        table.promote("ext", 1);
        table.bind("ext", 2, 0, &hooks(&[("E", "new")])).unwrap();

        table.unbind("ext", 2);
        assert!(!table.promote("ext", 2));
        assert_eq!(table.lookup("E")[0].command(), "old");
    }

    #[test]
    fn test_unbind_active() {
        let table = HookBindingTable::new();
        table.bind("ext", 1, 0, &hooks(&[("E", "old")])).unwrap();
        table.promote("ext", 1);

        table.unbind("ext", 1);
        assert!(table.lookup("E").is_empty());
        assert!(table.active("ext").is_none());
    }

    #[test]
    fn test_invalid_matcher_rejected() {
        let table = HookBindingTable::new();
        let spec = HookSpec::new("E", "x").with_matcher("(");
        let result = table.bind("ext", 1, 0, &[spec]);
        assert!(matches!(result, Err(ExtensionError::InvalidManifest { .. })));
    }

    #[test]
    fn test_matcher() {
        let table = HookBindingTable::new();
        let spec = HookSpec::new("BeforeTool", "x").with_matcher("^write_.*");
        table.bind("ext", 1, 0, &[spec]).unwrap();
        table.promote("ext", 1);
        let binding = &table.lookup("BeforeTool")[0];

        assert!(binding.matches(&serde_json::json!({"target": "write_file"})));
        assert!(!binding.matches(&serde_json::json!({"target": "read_file"})));
        assert!(!binding.matches(&serde_json::json!({})));

        let unfiltered = HookBindingTable::new();
        unfiltered.bind("ext", 1, 0, &hooks(&[("E", "x")])).unwrap();
        unfiltered.promote("ext", 1);
        assert!(unfiltered.lookup("E")[0].matches(&serde_json::json!({})));
    }
}
