//! Tasks and the target/device/task assignment registry.
//!
//! A task is a unit of work handed to an effector device in service of a
//! target: track it, point a gimbal at it, calibrate a sensor. Each task
//! carries its own small state machine (INITIALIZING → EXECUTING →
//! COMPLETING, with ERROR/retry) driven by the shared engine in
//! [`crate::state_machine`], parameterized with the task id.
//!
//! The manager owns the tasks and keeps three secondary indices consistent
//! with them: tasks per target, tasks per device, and the primary device per
//! target. Task state machines sit behind their own per-task locks so their
//! hooks can call back into the manager without deadlocking.

use crate::context::AlgorithmContext;
use crate::state_machine::{State, StateMachine, Transition};
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// How often terminal tasks are swept.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(5 * 60);
/// Terminal tasks older than this are dropped by the sweep.
const CLEANUP_AGE: Duration = Duration::from_secs(60 * 60);

// ============================================================================
// TASK
// ============================================================================

/// Kind of work a task asks a device to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskType {
    TrackTarget,
    ScanArea,
    PointGimbal,
    CalibrateSensor,
    MonitorStatus,
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::TrackTarget => "TRACK_TARGET",
            Self::ScanArea => "SCAN_AREA",
            Self::PointGimbal => "POINT_GIMBAL",
            Self::CalibrateSensor => "CALIBRATE_SENSOR",
            Self::MonitorStatus => "MONITOR_STATUS",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TaskPriority {
    Low = 1,
    Normal = 5,
    High = 8,
    Critical = 10,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Created,
    Assigned,
    Active,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Terminal statuses are sinks; nothing transitions out of them.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Allowed forward transitions. Everything else is rejected.
    fn can_become(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Created, Assigned)
                | (Assigned, Active)
                | (Active, Paused)
                | (Paused, Active)
                | (Assigned, Completed | Failed | Cancelled)
                | (Active, Completed | Failed | Cancelled)
                | (Paused, Completed | Failed | Cancelled)
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Created => "CREATED",
            Self::Assigned => "ASSIGNED",
            Self::Active => "ACTIVE",
            Self::Paused => "PAUSED",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        };
        write!(f, "{name}")
    }
}

/// Builds the default per-task state machine.
fn default_task_state_machine() -> StateMachine {
    let mut sm = StateMachine::new();
    sm.add_state(State::new("INITIALIZING"));
    sm.add_state(State::new("EXECUTING"));
    sm.add_state(State::new("COMPLETING"));
    sm.add_state(State::new("ERROR"));
    sm.set_initial("INITIALIZING");

    sm.add_transition(Transition::new("INITIALIZING", "EXECUTING", "start"));
    sm.add_transition(Transition::new("EXECUTING", "COMPLETING", "complete"));
    sm.add_transition(Transition::new("INITIALIZING", "ERROR", "error"));
    sm.add_transition(Transition::new("EXECUTING", "ERROR", "error"));
    sm.add_transition(Transition::new("ERROR", "INITIALIZING", "retry"));
    sm
}

/// A unit of work assigned to a device for a specific target.
pub struct Task {
    pub task_id: String,
    pub target_id: String,
    /// Empty until the task is assigned
    pub device_id: String,
    pub task_type: TaskType,
    pub priority: TaskPriority,
    status: TaskStatus,

    pub created_at: Instant,
    pub assigned_at: Option<Instant>,
    pub started_at: Option<Instant>,
    pub completed_at: Option<Instant>,

    progress: f32,
    pub status_message: String,
    parameters: HashMap<String, Box<dyn Any + Send + Sync>>,

    /// Per-task sub-state machine, individually locked so hooks may re-enter
    /// the owning manager.
    pub sm: Arc<Mutex<StateMachine>>,
}

impl Task {
    pub fn new(
        task_id: impl Into<String>,
        target_id: impl Into<String>,
        task_type: TaskType,
        priority: TaskPriority,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            target_id: target_id.into(),
            device_id: String::new(),
            task_type,
            priority,
            status: TaskStatus::Created,
            created_at: Instant::now(),
            assigned_at: None,
            started_at: None,
            completed_at: None,
            progress: 0.0,
            status_message: String::new(),
            parameters: HashMap::new(),
            sm: Arc::new(Mutex::new(default_task_state_machine())),
        }
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn progress(&self) -> f32 {
        self.progress
    }

    pub fn is_active(&self) -> bool {
        self.status == TaskStatus::Active
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Applies a status transition. Illegal transitions (including any
    /// attempt to leave a terminal status) are no-ops logged at debug.
    pub fn set_status(&mut self, next: TaskStatus) -> bool {
        if self.status == next {
            return true;
        }
        if !self.status.can_become(next) {
            debug!(
                task_id = %self.task_id,
                from = %self.status,
                to = %next,
                "ignoring illegal task status transition"
            );
            return false;
        }
        let now = Instant::now();
        match next {
            TaskStatus::Assigned => self.assigned_at = Some(now),
            TaskStatus::Active => {
                if self.started_at.is_none() {
                    self.started_at = Some(now);
                }
            }
            TaskStatus::Completed => {
                self.completed_at = Some(now);
                self.progress = 100.0;
            }
            TaskStatus::Failed | TaskStatus::Cancelled => self.completed_at = Some(now),
            _ => {}
        }
        self.status = next;
        true
    }

    /// Sets progress, clamped to [0, 100].
    pub fn set_progress(&mut self, percent: f32) {
        self.progress = percent.clamp(0.0, 100.0);
    }

    pub fn set_parameter<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.parameters.insert(key.into(), Box::new(value));
    }

    /// Typed parameter lookup; `None` on missing key or type mismatch.
    pub fn parameter<T: Any + Clone>(&self, key: &str) -> Option<T> {
        self.parameters.get(key).and_then(|v| v.downcast_ref::<T>()).cloned()
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Wall time spent executing (zero until started).
    pub fn execution_time(&self) -> Duration {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => end.duration_since(start),
            (Some(start), None) => start.elapsed(),
            _ => Duration::ZERO,
        }
    }
}

/// Read-only copy of a task's externally visible fields.
#[derive(Debug, Clone)]
pub struct TaskSnapshot {
    pub task_id: String,
    pub target_id: String,
    pub device_id: String,
    pub task_type: TaskType,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub progress: f32,
    pub status_message: String,
    pub sm_state: String,
}

impl TaskSnapshot {
    fn of(task: &Task) -> Self {
        Self {
            task_id: task.task_id.clone(),
            target_id: task.target_id.clone(),
            device_id: task.device_id.clone(),
            task_type: task.task_type,
            priority: task.priority,
            status: task.status,
            progress: task.progress,
            status_message: task.status_message.clone(),
            sm_state: task.sm.lock().current().to_string(),
        }
    }
}

// ============================================================================
// TASK MANAGER
// ============================================================================

/// Aggregate counters over the task table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskStats {
    pub total: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
    pub devices: usize,
    pub targets_assigned: usize,
}

struct TaskManagerInner {
    tasks: HashMap<String, Task>,
    target_to_tasks: HashMap<String, Vec<String>>,
    device_to_tasks: HashMap<String, Vec<String>>,
    target_primary_device: HashMap<String, String>,
    device_capabilities: HashMap<String, Vec<String>>,
    next_task_id: u64,
    last_cleanup: Instant,
}

/// Thread-safe registry of tasks and their target/device assignments.
pub struct TaskManager {
    inner: RwLock<TaskManagerInner>,
}

impl TaskManager {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(TaskManagerInner {
                tasks: HashMap::new(),
                target_to_tasks: HashMap::new(),
                device_to_tasks: HashMap::new(),
                target_primary_device: HashMap::new(),
                device_capabilities: HashMap::new(),
                next_task_id: 1,
                last_cleanup: Instant::now(),
            }),
        }
    }

    /// Creates a task for a target. Task ids are instance-local and
    /// monotonically increasing.
    pub fn create(&self, target_id: &str, task_type: TaskType, priority: TaskPriority) -> String {
        let mut inner = self.inner.write();
        let task_id = format!("task_{}", inner.next_task_id);
        inner.next_task_id += 1;

        inner.tasks.insert(task_id.clone(), Task::new(&task_id, target_id, task_type, priority));
        inner
            .target_to_tasks
            .entry(target_id.to_string())
            .or_default()
            .push(task_id.clone());
        task_id
    }

    /// Assigns (or reassigns) a task to a device. Atomically moves the task
    /// between device indices, records the target's primary device, and
    /// advances CREATED tasks to ASSIGNED. Returns false for unknown tasks.
    pub fn assign(&self, task_id: &str, device_id: &str) -> bool {
        let mut inner = self.inner.write();
        let Some(task) = inner.tasks.get_mut(task_id) else {
            return false;
        };

        let previous_device = std::mem::replace(&mut task.device_id, device_id.to_string());
        task.set_status(TaskStatus::Assigned);
        let target_id = task.target_id.clone();

        if !previous_device.is_empty() {
            if let Some(list) = inner.device_to_tasks.get_mut(&previous_device) {
                list.retain(|id| id != task_id);
                if list.is_empty() {
                    inner.device_to_tasks.remove(&previous_device);
                }
            }
        }
        inner
            .device_to_tasks
            .entry(device_id.to_string())
            .or_default()
            .push(task_id.to_string());
        inner.target_primary_device.insert(target_id, device_id.to_string());
        true
    }

    /// Snapshot of one task, if it exists.
    pub fn get(&self, task_id: &str) -> Option<TaskSnapshot> {
        self.inner.read().tasks.get(task_id).map(TaskSnapshot::of)
    }

    pub fn tasks_for_target(&self, target_id: &str) -> Vec<TaskSnapshot> {
        let inner = self.inner.read();
        inner
            .target_to_tasks
            .get(target_id)
            .into_iter()
            .flatten()
            .filter_map(|id| inner.tasks.get(id))
            .map(TaskSnapshot::of)
            .collect()
    }

    pub fn tasks_for_device(&self, device_id: &str) -> Vec<TaskSnapshot> {
        let inner = self.inner.read();
        inner
            .device_to_tasks
            .get(device_id)
            .into_iter()
            .flatten()
            .filter_map(|id| inner.tasks.get(id))
            .map(TaskSnapshot::of)
            .collect()
    }

    pub fn primary_device(&self, target_id: &str) -> Option<String> {
        self.inner.read().target_primary_device.get(target_id).cloned()
    }

    /// Overwrites a device's advertised capabilities.
    pub fn register_capabilities(&self, device_id: &str, capabilities: Vec<String>) {
        self.inner.write().device_capabilities.insert(device_id.to_string(), capabilities);
    }

    pub fn capabilities(&self, device_id: &str) -> Vec<String> {
        self.inner.read().device_capabilities.get(device_id).cloned().unwrap_or_default()
    }

    /// Ids of devices with registered capabilities, sorted for deterministic
    /// iteration.
    pub fn known_devices(&self) -> Vec<String> {
        let mut devices: Vec<String> = self.inner.read().device_capabilities.keys().cloned().collect();
        devices.sort();
        devices
    }

    /// Removes a task from the table and every index. Returns false for
    /// unknown tasks.
    pub fn remove(&self, task_id: &str) -> bool {
        let mut inner = self.inner.write();
        let Some(task) = inner.tasks.remove(task_id) else {
            return false;
        };

        if let Some(list) = inner.target_to_tasks.get_mut(&task.target_id) {
            list.retain(|id| id != task_id);
            if list.is_empty() {
                inner.target_to_tasks.remove(&task.target_id);
                inner.target_primary_device.remove(&task.target_id);
            }
        }
        if !task.device_id.is_empty() {
            if let Some(list) = inner.device_to_tasks.get_mut(&task.device_id) {
                list.retain(|id| id != task_id);
                if list.is_empty() {
                    inner.device_to_tasks.remove(&task.device_id);
                }
            }
        }
        true
    }

    /// Applies a status transition to a task.
    pub fn set_status(&self, task_id: &str, status: TaskStatus) -> bool {
        self.inner.write().tasks.get_mut(task_id).map_or(false, |t| t.set_status(status))
    }

    pub fn set_progress(&self, task_id: &str, percent: f32) -> bool {
        let mut inner = self.inner.write();
        match inner.tasks.get_mut(task_id) {
            Some(task) => {
                task.set_progress(percent);
                true
            }
            None => false,
        }
    }

    /// Runs `f` against the task under the write lock. `f` must not call
    /// back into the manager.
    pub fn with_task_mut<R>(&self, task_id: &str, f: impl FnOnce(&mut Task) -> R) -> Option<R> {
        self.inner.write().tasks.get_mut(task_id).map(f)
    }

    /// Fires a trigger on a task's state machine. The machine is cloned out
    /// by handle and driven without the manager lock held, so hooks may call
    /// back in. `start` additionally advances the task status to ACTIVE and
    /// `complete` to COMPLETED.
    pub fn fire(&self, ctx: &mut AlgorithmContext, task_id: &str, trigger: &str) -> bool {
        let sm = match self.inner.read().tasks.get(task_id) {
            Some(task) => task.sm.clone(),
            None => return false,
        };
        let fired = sm.lock().try_trigger(ctx, trigger, Some(task_id));
        if fired {
            match trigger {
                "start" => {
                    self.set_status(task_id, TaskStatus::Active);
                }
                "complete" => {
                    self.set_status(task_id, TaskStatus::Completed);
                }
                _ => {}
            }
        }
        fired
    }

    /// Runs every active task's current-state update hook, then periodically
    /// sweeps terminal tasks that finished over an hour ago.
    pub fn update_all(&self, ctx: &mut AlgorithmContext) {
        let active: Vec<(String, Arc<Mutex<StateMachine>>)> = {
            let inner = self.inner.read();
            inner
                .tasks
                .values()
                .filter(|t| t.is_active())
                .map(|t| (t.task_id.clone(), t.sm.clone()))
                .collect()
        };
        for (task_id, sm) in active {
            let sm = sm.lock();
            sm.run_update(ctx, Some(&task_id));
        }

        let due = {
            let inner = self.inner.read();
            inner.last_cleanup.elapsed() >= CLEANUP_INTERVAL
        };
        if due {
            self.sweep_terminal();
        }
    }

    fn sweep_terminal(&self) {
        let stale: Vec<String> = {
            let mut inner = self.inner.write();
            inner.last_cleanup = Instant::now();
            inner
                .tasks
                .values()
                .filter(|t| t.is_terminal() && t.completed_at.map_or(false, |at| at.elapsed() >= CLEANUP_AGE))
                .map(|t| t.task_id.clone())
                .collect()
        };
        for task_id in stale {
            debug!(%task_id, "sweeping aged-out terminal task");
            self.remove(&task_id);
        }
    }

    pub fn stats(&self) -> TaskStats {
        let inner = self.inner.read();
        let mut stats = TaskStats {
            total: inner.tasks.len(),
            devices: inner.device_capabilities.len(),
            targets_assigned: inner.target_primary_device.len(),
            ..TaskStats::default()
        };
        for task in inner.tasks.values() {
            match task.status() {
                TaskStatus::Active => stats.active += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed | TaskStatus::Cancelled => stats.failed += 1,
                _ => {}
            }
        }
        stats
    }

    /// Drops every task and assignment. Device capabilities persist; they
    /// describe hardware, not workload.
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.tasks.clear();
        inner.target_to_tasks.clear();
        inner.device_to_tasks.clear();
        inner.target_primary_device.clear();
    }

    /// Verifies the secondary indices agree with the task table. Test aid.
    #[cfg(test)]
    fn indices_consistent(&self) -> bool {
        let inner = self.inner.read();
        let target_ok = inner.target_to_tasks.iter().all(|(target, ids)| {
            ids.iter().all(|id| inner.tasks.get(id).map_or(false, |t| &t.target_id == target))
        });
        let device_ok = inner.device_to_tasks.iter().all(|(device, ids)| {
            ids.iter().all(|id| inner.tasks.get(id).map_or(false, |t| &t.device_id == device))
        });
        target_ok && device_ok
    }
}

impl Default for TaskManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_starts_in_created() {
        let tm = TaskManager::new();
        let id = tm.create("target_0", TaskType::TrackTarget, TaskPriority::High);
        assert_eq!(id, "task_1");

        let snap = tm.get(&id).unwrap();
        assert_eq!(snap.status, TaskStatus::Created);
        assert_eq!(snap.target_id, "target_0");
        assert!(snap.device_id.is_empty(), "device id empty iff CREATED");
        assert_eq!(snap.sm_state, "INITIALIZING");
    }

    #[test]
    fn test_task_ids_are_monotone() {
        let tm = TaskManager::new();
        let a = tm.create("t", TaskType::ScanArea, TaskPriority::Normal);
        let b = tm.create("t", TaskType::ScanArea, TaskPriority::Normal);
        assert_eq!(a, "task_1");
        assert_eq!(b, "task_2");
    }

    #[test]
    fn test_assign_moves_between_devices() {
        let tm = TaskManager::new();
        let id = tm.create("target_0", TaskType::TrackTarget, TaskPriority::Normal);

        assert!(tm.assign(&id, "dev_a"));
        assert_eq!(tm.get(&id).unwrap().status, TaskStatus::Assigned);
        assert_eq!(tm.tasks_for_device("dev_a").len(), 1);
        assert_eq!(tm.primary_device("target_0").as_deref(), Some("dev_a"));

        assert!(tm.assign(&id, "dev_b"));
        assert!(tm.tasks_for_device("dev_a").is_empty(), "old device index must forget the task");
        assert_eq!(tm.tasks_for_device("dev_b").len(), 1);
        assert_eq!(tm.primary_device("target_0").as_deref(), Some("dev_b"));
        assert!(tm.indices_consistent());
    }

    #[test]
    fn test_assign_unknown_task_fails() {
        let tm = TaskManager::new();
        assert!(!tm.assign("task_99", "dev_a"));
    }

    #[test]
    fn test_status_progression_and_terminal_sink() {
        let tm = TaskManager::new();
        let id = tm.create("target_0", TaskType::TrackTarget, TaskPriority::Normal);

        assert!(!tm.set_status(&id, TaskStatus::Active), "CREATED cannot jump to ACTIVE");
        tm.assign(&id, "dev_a");
        assert!(tm.set_status(&id, TaskStatus::Active));
        assert!(tm.set_status(&id, TaskStatus::Paused));
        assert!(tm.set_status(&id, TaskStatus::Active));
        assert!(tm.set_status(&id, TaskStatus::Completed));

        assert!(!tm.set_status(&id, TaskStatus::Active), "terminal statuses are sinks");
        let snap = tm.get(&id).unwrap();
        assert_eq!(snap.status, TaskStatus::Completed);
        assert_eq!(snap.progress, 100.0);
    }

    #[test]
    fn test_progress_is_clamped() {
        let tm = TaskManager::new();
        let id = tm.create("target_0", TaskType::ScanArea, TaskPriority::Low);
        tm.set_progress(&id, 150.0);
        assert_eq!(tm.get(&id).unwrap().progress, 100.0);
        tm.set_progress(&id, -5.0);
        assert_eq!(tm.get(&id).unwrap().progress, 0.0);
    }

    #[test]
    fn test_remove_cleans_every_index() {
        let tm = TaskManager::new();
        let id = tm.create("target_0", TaskType::TrackTarget, TaskPriority::Normal);
        tm.assign(&id, "dev_a");

        assert!(tm.remove(&id));
        assert!(tm.get(&id).is_none());
        assert!(tm.tasks_for_target("target_0").is_empty());
        assert!(tm.tasks_for_device("dev_a").is_empty());
        assert!(tm.primary_device("target_0").is_none());
        assert!(!tm.remove(&id), "second remove is a no-op");
        assert!(tm.indices_consistent());
    }

    #[test]
    fn test_task_sm_start_activates_task() {
        let tm = TaskManager::new();
        let mut ctx = AlgorithmContext::new();
        let id = tm.create("target_0", TaskType::TrackTarget, TaskPriority::High);
        tm.assign(&id, "dev_a");

        assert!(tm.fire(&mut ctx, &id, "start"));
        let snap = tm.get(&id).unwrap();
        assert_eq!(snap.status, TaskStatus::Active);
        assert_eq!(snap.sm_state, "EXECUTING");
    }

    #[test]
    fn test_task_sm_error_and_retry() {
        let tm = TaskManager::new();
        let mut ctx = AlgorithmContext::new();
        let id = tm.create("target_0", TaskType::CalibrateSensor, TaskPriority::Normal);
        tm.assign(&id, "dev_a");
        tm.fire(&mut ctx, &id, "start");

        assert!(tm.fire(&mut ctx, &id, "error"));
        assert_eq!(tm.get(&id).unwrap().sm_state, "ERROR");

        assert!(tm.fire(&mut ctx, &id, "retry"));
        assert_eq!(tm.get(&id).unwrap().sm_state, "INITIALIZING");

        assert!(!tm.fire(&mut ctx, &id, "complete"), "complete is invalid from INITIALIZING");
    }

    #[test]
    fn test_task_parameters_round_trip() {
        let mut task = Task::new("task_1", "target_0", TaskType::ScanArea, TaskPriority::Normal);
        task.set_parameter("scan_radius", 100.0f32);
        task.set_parameter("scan_mode", String::from("continuous"));

        assert_eq!(task.parameter::<f32>("scan_radius"), Some(100.0));
        assert_eq!(task.parameter::<String>("scan_mode").as_deref(), Some("continuous"));
        assert_eq!(task.parameter::<i32>("scan_radius"), None, "type mismatch yields None");
        assert_eq!(task.parameter::<f32>("absent"), None);
    }

    #[test]
    fn test_capabilities_overwrite() {
        let tm = TaskManager::new();
        tm.register_capabilities("dev_a", vec!["radar".into()]);
        tm.register_capabilities("dev_a", vec!["lidar".into(), "gimbal_control".into()]);
        assert_eq!(tm.capabilities("dev_a"), vec!["lidar".to_string(), "gimbal_control".to_string()]);
        assert!(tm.capabilities("ghost").is_empty());
    }

    #[test]
    fn test_known_devices_sorted() {
        let tm = TaskManager::new();
        tm.register_capabilities("zeta", vec![]);
        tm.register_capabilities("alpha", vec![]);
        assert_eq!(tm.known_devices(), vec!["alpha".to_string(), "zeta".to_string()]);
    }

    #[test]
    fn test_stats_counts() {
        let tm = TaskManager::new();
        tm.register_capabilities("dev_a", vec!["radar".into()]);

        let a = tm.create("t1", TaskType::TrackTarget, TaskPriority::High);
        let b = tm.create("t2", TaskType::ScanArea, TaskPriority::Normal);
        let c = tm.create("t3", TaskType::PointGimbal, TaskPriority::Critical);
        for id in [&a, &b, &c] {
            tm.assign(id, "dev_a");
            tm.set_status(id, TaskStatus::Active);
        }
        tm.set_status(&b, TaskStatus::Completed);
        tm.set_status(&c, TaskStatus::Failed);

        let stats = tm.stats();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.active, 1);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.devices, 1);
        assert_eq!(stats.targets_assigned, 3);
    }

    #[test]
    fn test_update_all_runs_only_active_tasks() {
        let tm = TaskManager::new();
        let mut ctx = AlgorithmContext::new();
        ctx.set("updated", Vec::<String>::new());

        let active = tm.create("t1", TaskType::TrackTarget, TaskPriority::High);
        let idle = tm.create("t2", TaskType::TrackTarget, TaskPriority::High);
        for id in [&active, &idle] {
            tm.with_task_mut(id, |task| {
                let mut sm = StateMachine::new();
                sm.add_state(State::new("INITIALIZING").on_update(|ctx, task_id| {
                    ctx.get_mut::<Vec<String>>("updated")
                        .unwrap()
                        .push(task_id.unwrap().to_string());
                }));
                task.sm = Arc::new(Mutex::new(sm));
            });
            tm.assign(id, "dev_a");
        }
        tm.set_status(&active, TaskStatus::Active);

        tm.update_all(&mut ctx);
        assert_eq!(ctx.get::<Vec<String>>("updated").unwrap(), vec![active]);
    }

    #[test]
    fn test_clear_keeps_capabilities() {
        let tm = TaskManager::new();
        tm.register_capabilities("dev_a", vec!["radar".into()]);
        let id = tm.create("t1", TaskType::TrackTarget, TaskPriority::High);
        tm.assign(&id, "dev_a");

        tm.clear();
        assert_eq!(tm.stats().total, 0);
        assert!(tm.primary_device("t1").is_none());
        assert_eq!(tm.capabilities("dev_a"), vec!["radar".to_string()]);
    }
}
