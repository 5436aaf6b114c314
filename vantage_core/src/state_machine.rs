//! Declarative state machine engine.
//!
//! One engine serves both levels of the controller: the algorithm-level
//! machine (IDLE/ACQUIRING/...) and each task's private machine
//! (INITIALIZING/EXECUTING/...). Hooks receive the algorithm context plus an
//! optional task id; the algorithm-level machine passes `None`, a task's
//! machine passes its own id.
//!
//! Transition evaluation is strictly declaration-ordered: `try_trigger` takes
//! the first transition whose source state and trigger match and whose guard
//! (if any) passes. Declaration order is therefore the tie-break rule.

use crate::context::AlgorithmContext;
use std::collections::HashMap;
use std::sync::Arc;

/// Callback attached to a state or a transition action.
pub type StateHook = Arc<dyn Fn(&mut AlgorithmContext, Option<&str>) + Send + Sync>;

/// Predicate gating a transition.
pub type TransitionGuard = Arc<dyn Fn(&AlgorithmContext, Option<&str>) -> bool + Send + Sync>;

/// A named state with optional lifecycle hooks.
#[derive(Clone)]
pub struct State {
    pub name: String,
    on_enter: Option<StateHook>,
    on_exit: Option<StateHook>,
    on_update: Option<StateHook>,
}

impl State {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            on_enter: None,
            on_exit: None,
            on_update: None,
        }
    }

    pub fn on_enter(mut self, hook: impl Fn(&mut AlgorithmContext, Option<&str>) + Send + Sync + 'static) -> Self {
        self.on_enter = Some(Arc::new(hook));
        self
    }

    pub fn on_exit(mut self, hook: impl Fn(&mut AlgorithmContext, Option<&str>) + Send + Sync + 'static) -> Self {
        self.on_exit = Some(Arc::new(hook));
        self
    }

    pub fn on_update(mut self, hook: impl Fn(&mut AlgorithmContext, Option<&str>) + Send + Sync + 'static) -> Self {
        self.on_update = Some(Arc::new(hook));
        self
    }
}

/// A trigger-driven edge between two states.
#[derive(Clone)]
pub struct Transition {
    pub from: String,
    pub to: String,
    pub trigger: String,
    guard: Option<TransitionGuard>,
    action: Option<StateHook>,
}

impl Transition {
    pub fn new(from: impl Into<String>, to: impl Into<String>, trigger: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            trigger: trigger.into(),
            guard: None,
            action: None,
        }
    }

    pub fn guard(mut self, guard: impl Fn(&AlgorithmContext, Option<&str>) -> bool + Send + Sync + 'static) -> Self {
        self.guard = Some(Arc::new(guard));
        self
    }

    pub fn action(mut self, action: impl Fn(&mut AlgorithmContext, Option<&str>) + Send + Sync + 'static) -> Self {
        self.action = Some(Arc::new(action));
        self
    }
}

/// Declarative states + transitions with a current-state cursor.
#[derive(Clone, Default)]
pub struct StateMachine {
    states: HashMap<String, State>,
    transitions: Vec<Transition>,
    initial: String,
    current: String,
}

impl StateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a state. The first state added becomes the initial (and current)
    /// state unless `set_initial` overrides it.
    pub fn add_state(&mut self, state: State) {
        if self.initial.is_empty() {
            self.initial = state.name.clone();
            self.current = state.name.clone();
        }
        self.states.insert(state.name.clone(), state);
    }

    pub fn add_transition(&mut self, transition: Transition) {
        self.transitions.push(transition);
    }

    pub fn set_initial(&mut self, name: impl Into<String>) {
        let name = name.into();
        self.initial = name.clone();
        self.current = name;
    }

    pub fn current(&self) -> &str {
        &self.current
    }

    pub fn initial(&self) -> &str {
        &self.initial
    }

    pub fn state(&self, name: &str) -> Option<&State> {
        self.states.get(name)
    }

    /// Fires the initial state's `on_enter` hook. Called once at algorithm
    /// (or task) initialization.
    pub fn enter_initial(&self, ctx: &mut AlgorithmContext, task_id: Option<&str>) {
        if let Some(hook) = self.states.get(&self.initial).and_then(|s| s.on_enter.clone()) {
            hook(ctx, task_id);
        }
    }

    /// Runs the current state's `on_update` hook, if any.
    pub fn run_update(&self, ctx: &mut AlgorithmContext, task_id: Option<&str>) {
        if let Some(hook) = self.states.get(&self.current).and_then(|s| s.on_update.clone()) {
            hook(ctx, task_id);
        }
    }

    /// Attempts to fire `trigger`: scans transitions in declaration order and
    /// takes the first whose source matches the current state and whose guard
    /// passes. Fires `on_exit`, the transition action, then `on_enter` of the
    /// destination. Returns whether a transition fired.
    pub fn try_trigger(&mut self, ctx: &mut AlgorithmContext, trigger: &str, task_id: Option<&str>) -> bool {
        let matched = self.transitions.iter().find(|t| {
            t.from == self.current
                && t.trigger == trigger
                && t.guard.as_ref().map_or(true, |g| g(ctx, task_id))
        });

        let Some(transition) = matched else {
            return false;
        };

        let to = transition.to.clone();
        let action = transition.action.clone();
        let exit_hook = self.states.get(&self.current).and_then(|s| s.on_exit.clone());
        let enter_hook = self.states.get(&to).and_then(|s| s.on_enter.clone());

        if let Some(hook) = exit_hook {
            hook(ctx, task_id);
        }
        if let Some(hook) = action {
            hook(ctx, task_id);
        }
        self.current = to;
        if let Some(hook) = enter_hook {
            hook(ctx, task_id);
        }
        true
    }
}
