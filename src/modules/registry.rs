use super::Module;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Loaded modules keyed by prompt. Keys are kept sorted so listings are stable.
#[derive(Default)]
pub struct ModuleRegistry {
    modules: BTreeMap<String, Arc<dyn Module>>,
}

impl ModuleRegistry {
    /// Insert by prompt; a module registered under the same prompt is replaced and returned.
    pub fn register(&mut self, module: Arc<dyn Module>) -> Option<Arc<dyn Module>> {
        self.modules.insert(module.prompt().to_string(), module)
    }

    pub fn get(&self, prompt: &str) -> Option<Arc<dyn Module>> {
        self.modules.get(prompt).cloned()
    }

    /// Prompts in lexicographic order.
    pub fn list(&self) -> Vec<String> {
        self.modules.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Module>> {
        self.modules.values()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::dnsbrute::DnsBrute;
    use crate::modules::portscanner::PortScanner;

    #[test]
    fn list_is_sorted_and_stable() {
        let mut registry = ModuleRegistry::default();
        registry.register(Arc::new(PortScanner::new()));
        registry.register(Arc::new(DnsBrute::new()));

        let first = registry.list();
        assert_eq!(first, vec!["dnsbrute", "portscanner"]);
        assert_eq!(first, registry.list());
    }

    #[test]
    fn last_registration_wins() {
        let mut registry = ModuleRegistry::default();
        let first: Arc<dyn Module> = Arc::new(DnsBrute::new());
        let second: Arc<dyn Module> = Arc::new(DnsBrute::new());

        assert!(registry.register(first.clone()).is_none());
        let replaced = registry.register(second.clone()).unwrap();

        assert!(Arc::ptr_eq(&replaced, &first));
        assert!(Arc::ptr_eq(&registry.get("dnsbrute").unwrap(), &second));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn unknown_prompt_is_not_found() {
        assert!(ModuleRegistry::default().get("nope").is_none());
    }
}
