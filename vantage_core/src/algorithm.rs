//! Fusion algorithm trait and the plugin registry.

use crate::context::AlgorithmContext;
use parking_lot::RwLock;
use std::collections::HashMap;
use vantage_bus::messages::L1ToL2;

/// A pluggable fusion algorithm.
///
/// The manager invokes every method under its exclusive host lock, so
/// implementations are free to mutate the context and their own state
/// without further synchronization. Long-running work inside a callback
/// blocks the calling worker, nothing else.
pub trait FusionAlgorithm: Send {
    fn name(&self) -> &str;
    fn version(&self) -> &str;
    fn description(&self) -> &str;

    /// Builds the state machine, seeds the typed store, and enters the
    /// initial state. Called once before any traffic is delivered.
    fn initialize(&mut self, ctx: &mut AlgorithmContext);

    /// Handles one inbound edge-node message.
    fn process_message(&mut self, ctx: &mut AlgorithmContext, msg: &L1ToL2);

    /// Periodic update, driven by the manager's tick thread.
    fn update(&mut self, ctx: &mut AlgorithmContext);

    /// Handles an external trigger (`reset`, `node_timeout`, a raw state
    /// machine trigger, ...). `data` carries the trigger's argument, e.g.
    /// the timed-out node id.
    fn handle_trigger(&mut self, ctx: &mut AlgorithmContext, trigger: &str, data: Option<&str>);

    /// Final callback before the manager stops; emit farewell traffic here.
    fn shutdown(&mut self, ctx: &mut AlgorithmContext);
}

/// Factory producing fresh algorithm instances.
pub type AlgorithmFactory = Box<dyn Fn() -> Box<dyn FusionAlgorithm> + Send + Sync>;

/// Name-to-factory directory for algorithm plugins.
#[derive(Default)]
pub struct AlgorithmRegistry {
    factories: RwLock<HashMap<String, AlgorithmFactory>>,
}

impl AlgorithmRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory under the name its instances report.
    pub fn register<F>(&self, factory: F)
    where
        F: Fn() -> Box<dyn FusionAlgorithm> + Send + Sync + 'static,
    {
        let name = factory().name().to_string();
        self.factories.write().insert(name, Box::new(factory));
    }

    /// Instantiates the named algorithm, or `None` if unregistered.
    pub fn create(&self, name: &str) -> Option<Box<dyn FusionAlgorithm>> {
        self.factories.read().get(name).map(|f| f())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.read().contains_key(name)
    }

    /// Registered algorithm names, sorted.
    pub fn available(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.read().keys().cloned().collect();
        names.sort();
        names
    }
}
