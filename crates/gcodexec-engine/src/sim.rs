//! Simulated collaborators
//!
//! Enough of a machine to run the engine without hardware: the demo binary,
//! the integration tests and the benchmarks all drive these.

use crate::collaborators::{Collaborators, FileStore, HeaterController, MotionSink, ToolInfo, ToolRegistry};
use crate::kinematics::CartesianKinematics;
use crate::motion::{Segment, SegmentSource};
use crate::restore::RestorePoint;
use gcodexec_core::{thread_safe, thread_safe_map, Coords, ThreadSafe, ThreadSafeMap, MAX_AXES};
use gcodexec_settings::EngineConfig;
use std::collections::VecDeque;
use std::fmt::Write;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Segments the simulated planner holds before it stops pulling
pub const DEFAULT_QUEUE_CAPACITY: usize = 8;

#[derive(Debug)]
struct MotionState {
    position: Coords,
    queue: VecDeque<Segment>,
    executed: Vec<Segment>,
    last_can_pause_after: bool,
    auto_execute: bool,
    capacity: usize,
}

/// A planner that pulls segments into a queue and "executes" them instantly
///
/// In auto-execute mode every segment is finished as soon as it is pulled.
/// Otherwise segments wait in the queue until [`SimMotion::execute`] is
/// called, which lets tests pause with moves still in flight.
#[derive(Debug)]
pub struct SimMotion {
    state: ThreadSafe<MotionState>,
    emergency_stops: AtomicUsize,
}

impl Default for SimMotion {
    fn default() -> Self {
        Self::new()
    }
}

impl SimMotion {
    /// Auto-executing planner at the origin
    pub fn new() -> Self {
        Self {
            state: thread_safe(MotionState {
                position: [0.0; MAX_AXES],
                queue: VecDeque::new(),
                executed: Vec::new(),
                last_can_pause_after: true,
                auto_execute: true,
                capacity: DEFAULT_QUEUE_CAPACITY,
            }),
            emergency_stops: AtomicUsize::new(0),
        }
    }

    /// Planner that only executes on request
    pub fn manual() -> Self {
        let motion = Self::new();
        motion.set_auto_execute(false);
        motion
    }

    /// Switch auto-execution on or off
    pub fn set_auto_execute(&self, auto: bool) {
        self.state.lock().auto_execute = auto;
    }

    /// Set how many segments may wait in the queue
    pub fn set_capacity(&self, capacity: usize) {
        self.state.lock().capacity = capacity.max(1);
    }

    /// Execute up to `count` queued segments, returning how many ran
    pub fn execute(&self, count: usize) -> usize {
        let mut state = self.state.lock();
        let mut done = 0;
        while done < count {
            let Some(segment) = state.queue.pop_front() else {
                break;
            };
            Self::finish(&mut state, segment);
            done += 1;
        }
        done
    }

    /// Execute everything queued
    pub fn execute_all(&self) -> usize {
        self.execute(usize::MAX)
    }

    /// Segments waiting in the queue
    pub fn queued(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Every segment executed so far
    pub fn executed(&self) -> Vec<Segment> {
        self.state.lock().executed.clone()
    }

    /// Take the executed-segment log
    pub fn take_executed(&self) -> Vec<Segment> {
        std::mem::take(&mut self.state.lock().executed)
    }

    /// Where the head is after the last executed segment
    pub fn head_position(&self) -> Coords {
        self.state.lock().position
    }

    /// Number of emergency stops seen
    pub fn emergency_stops(&self) -> usize {
        self.emergency_stops.load(Ordering::Acquire)
    }

    fn finish(state: &mut MotionState, segment: Segment) {
        state.position = segment.coords;
        state.last_can_pause_after = segment.can_pause_after;
        state.executed.push(segment);
    }

    /// Drop queued segments from `first` on, filling in the restore point
    fn discard_from(state: &mut MotionState, first: usize, rp: &mut RestorePoint) -> bool {
        let Some(segment) = state.queue.get(first) else {
            return false;
        };
        rp.move_coords = match first {
            0 => state.position,
            n => state.queue[n - 1].coords,
        };
        rp.feed_rate = segment.feed_rate * 60.0;
        rp.virtual_extruder_position = segment.move_start_virtual_extruder;
        rp.proportion_done = segment.start_proportion;
        rp.file_pos = segment.file_pos;
        rp.initial_user_c0 = segment.initial_user_c0;
        rp.initial_user_c1 = segment.initial_user_c1;
        rp.laser_pwm = segment.laser_pwm;
        rp.io_bits = segment.io_bits;
        let dropped = state.queue.len() - first;
        state.queue.truncate(first);
        tracing::debug!("discarded {} queued segments", dropped);
        true
    }
}

impl MotionSink for SimMotion {
    fn poll(&self, source: &SegmentSource) {
        let mut state = self.state.lock();
        while state.queue.len() < state.capacity {
            match source.try_take_next_segment() {
                Some(segment) => state.queue.push_back(segment),
                None => break,
            }
        }
        if state.auto_execute {
            while let Some(segment) = state.queue.pop_front() {
                Self::finish(&mut state, segment);
            }
        }
    }

    fn all_moves_finished(&self) -> bool {
        self.state.lock().queue.is_empty()
    }

    fn machine_position(&self) -> Coords {
        let state = self.state.lock();
        state.queue.back().map_or(state.position, |segment| segment.coords)
    }

    fn set_machine_position(&self, coords: &Coords) {
        self.state.lock().position = *coords;
    }

    fn pause_print(&self, rp: &mut RestorePoint) -> bool {
        let mut state = self.state.lock();
        let mut first = 0;
        let mut can_pause = state.last_can_pause_after;
        while first < state.queue.len() && !can_pause {
            can_pause = state.queue[first].can_pause_after;
            first += 1;
        }
        Self::discard_from(&mut state, first, rp)
    }

    fn low_power_or_stall_pause(&self, rp: &mut RestorePoint) -> bool {
        let mut state = self.state.lock();
        Self::discard_from(&mut state, 0, rp)
    }

    fn emergency_stop(&self) {
        self.state.lock().queue.clear();
        self.emergency_stops.fetch_add(1, Ordering::AcqRel);
    }
}

/// Tools and fans held in memory
#[derive(Debug)]
pub struct SimTools {
    tools: ThreadSafeMap<u32, ToolInfo>,
    current: ThreadSafe<Option<u32>>,
    fans: ThreadSafe<Vec<f64>>,
}

impl Default for SimTools {
    fn default() -> Self {
        Self::new()
    }
}

impl SimTools {
    /// No tools, one fan
    pub fn new() -> Self {
        Self {
            tools: thread_safe_map(),
            current: thread_safe(None),
            fans: thread_safe(vec![0.0]),
        }
    }

    /// `count` single-drive tools; tool n uses drive n and heater n + 1
    pub fn with_tools(count: u32) -> Self {
        let registry = Self::new();
        for number in 0..count {
            registry.add_tool(ToolInfo::new(number, number as usize, number as usize + 1));
        }
        registry
    }

    /// Define or replace a tool
    pub fn add_tool(&self, tool: ToolInfo) {
        self.tools.lock().insert(tool.number, tool);
    }
}

impl ToolRegistry for SimTools {
    fn current_tool(&self) -> Option<u32> {
        *self.current.lock()
    }

    fn tool(&self, number: u32) -> Option<ToolInfo> {
        self.tools.lock().get(&number).cloned()
    }

    fn select_tool(&self, number: Option<u32>) {
        *self.current.lock() = number;
    }

    fn set_fan_speed(&self, fan: usize, speed: f64) {
        let mut fans = self.fans.lock();
        if fans.len() <= fan {
            fans.resize(fan + 1, 0.0);
        }
        fans[fan] = speed;
    }

    fn fan_speed(&self, fan: usize) -> f64 {
        self.fans.lock().get(fan).copied().unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct SimHeater {
    target: f64,
    current: f64,
}

/// Heaters that reach their target as soon as it is set, unless told otherwise
#[derive(Debug)]
pub struct SimHeaters {
    heaters: ThreadSafe<Vec<SimHeater>>,
    bed: Option<usize>,
    instant: AtomicBool,
    fail_resume_write: AtomicBool,
}

/// Heaters start at room temperature
const AMBIENT: f64 = 20.0;

/// Within this many degrees a heater counts as at temperature
const TEMPERATURE_TOLERANCE: f64 = 1.0;

impl SimHeaters {
    /// `count` heaters, heater 0 being the bed when `bed` is set
    pub fn new(count: usize, bed: bool) -> Self {
        let heater = SimHeater {
            target: 0.0,
            current: AMBIENT,
        };
        Self {
            heaters: thread_safe(vec![heater; count.max(1)]),
            bed: bed.then_some(0),
            instant: AtomicBool::new(true),
            fail_resume_write: AtomicBool::new(false),
        }
    }

    /// Make heaters wait for [`SimHeaters::settle`] instead of heating instantly
    pub fn set_instant(&self, instant: bool) {
        self.instant.store(instant, Ordering::Release);
    }

    /// Bring every heater to its target
    pub fn settle(&self) {
        for heater in self.heaters.lock().iter_mut() {
            heater.current = heater.target.max(AMBIENT);
        }
    }

    /// Make the next resume-state writes fail
    pub fn set_resume_write_fails(&self, fails: bool) {
        self.fail_resume_write.store(fails, Ordering::Release);
    }

    fn reached(heater: &SimHeater) -> bool {
        heater.target <= 0.0 || (heater.current - heater.target).abs() <= TEMPERATURE_TOLERANCE
    }
}

impl HeaterController for SimHeaters {
    fn set_active_temperature(&self, heater: usize, temperature: f64) {
        let instant = self.instant.load(Ordering::Acquire);
        if let Some(h) = self.heaters.lock().get_mut(heater) {
            h.target = temperature;
            if instant {
                h.current = temperature.max(AMBIENT);
            }
        }
    }

    fn target_temperature(&self, heater: usize) -> f64 {
        self.heaters.lock().get(heater).map_or(0.0, |h| h.target)
    }

    fn current_temperature(&self, heater: usize) -> f64 {
        self.heaters.lock().get(heater).map_or(0.0, |h| h.current)
    }

    fn at_temperature(&self, heater: usize) -> bool {
        self.heaters.lock().get(heater).is_some_and(Self::reached)
    }

    fn all_at_temperature(&self) -> bool {
        self.heaters.lock().iter().all(Self::reached)
    }

    fn switch_off_all(&self) {
        for heater in self.heaters.lock().iter_mut() {
            heater.target = 0.0;
        }
    }

    fn bed_heater(&self) -> Option<usize> {
        self.bed
    }

    fn temperature_report(&self) -> String {
        let heaters = self.heaters.lock();
        let mut parts = Vec::new();
        let mut tool_heater = 0;
        for (i, h) in heaters.iter().enumerate() {
            if Some(i) == self.bed {
                parts.push(format!("B:{:.1} /{:.1}", h.current, h.target));
            } else {
                let label = if tool_heater == 0 {
                    "T".to_string()
                } else {
                    format!("T{}", tool_heater)
                };
                parts.push(format!("{}:{:.1} /{:.1}", label, h.current, h.target));
                tool_heater += 1;
            }
        }
        parts.join(" ")
    }

    fn write_resume_settings(&self, out: &mut String) -> bool {
        if self.fail_resume_write.load(Ordering::Acquire) {
            return false;
        }
        let heaters = self.heaters.lock();
        if let Some(bed) = self.bed.and_then(|b| heaters.get(b)) {
            let _ = writeln!(out, "M140 S{:.1}", bed.target);
        }
        true
    }
}

/// Files held in memory, keyed by engine path
#[derive(Debug)]
pub struct MemoryFileStore {
    files: ThreadSafeMap<String, String>,
    fail_writes: AtomicBool,
}

impl Default for MemoryFileStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryFileStore {
    /// Empty store
    pub fn new() -> Self {
        Self {
            files: thread_safe_map(),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Add or replace a file
    pub fn insert(&self, path: impl Into<String>, contents: impl Into<String>) {
        self.files.lock().insert(path.into(), contents.into());
    }

    /// Contents of a file, if present
    pub fn contents(&self, path: &str) -> Option<String> {
        self.files.lock().get(path).cloned()
    }

    /// Make every write fail
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Release);
    }
}

impl FileStore for MemoryFileStore {
    fn read(&self, path: &str) -> io::Result<String> {
        self.contents(path)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.to_string()))
    }

    fn write(&self, path: &str, contents: &str) -> io::Result<()> {
        if self.fail_writes.load(Ordering::Acquire) {
            return Err(io::Error::new(io::ErrorKind::Other, "write refused"));
        }
        self.insert(path, contents);
        Ok(())
    }

    fn delete(&self, path: &str) -> io::Result<()> {
        self.files
            .lock()
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.to_string()))
    }

    fn exists(&self, path: &str) -> bool {
        self.files.lock().contains_key(path)
    }

    fn list(&self, dir: &str) -> io::Result<Vec<String>> {
        let prefix = format!("{}/", dir.trim_end_matches('/'));
        let mut names: Vec<String> = self
            .files
            .lock()
            .keys()
            .filter_map(|path| path.strip_prefix(&prefix))
            .filter(|name| !name.contains('/'))
            .map(str::to_string)
            .collect();
        if names.is_empty() {
            return Err(io::Error::new(io::ErrorKind::NotFound, dir.to_string()));
        }
        names.sort();
        Ok(names)
    }
}

/// A complete simulated machine
///
/// Keeps typed handles to every simulated part so callers can poke them
/// while the engine holds the same parts as trait objects.
#[derive(Debug, Clone)]
pub struct SimMachine {
    /// Planner
    pub motion: Arc<SimMotion>,
    /// Tools and fans
    pub tools: Arc<SimTools>,
    /// Heaters
    pub heaters: Arc<SimHeaters>,
    /// File store
    pub files: Arc<MemoryFileStore>,
    /// Geometry
    pub kinematics: Arc<CartesianKinematics>,
}

impl SimMachine {
    /// One tool, a bed and a tool heater, an empty file store
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            motion: Arc::new(SimMotion::new()),
            tools: Arc::new(SimTools::with_tools(1)),
            heaters: Arc::new(SimHeaters::new(2, true)),
            files: Arc::new(MemoryFileStore::new()),
            kinematics: Arc::new(CartesianKinematics::from_config(config)),
        }
    }

    /// The same parts as engine collaborators
    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            motion: self.motion.clone(),
            tools: self.tools.clone(),
            heaters: self.heaters.clone(),
            files: self.files.clone(),
            kinematics: self.kinematics.clone(),
        }
    }
}
