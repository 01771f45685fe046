//! The kernel object: ready/suspended indexes, the tick, the active task,
//! and the wait/post/tick services that mutate them.
//!
//! None of this is modeled as free-standing statics. It is encapsulated
//! behind a single `Kernel` object whose methods are the only things allowed
//! to touch it, and every one of those methods runs with the critical
//! section held.

use crate::arch::{Arch, EntryFn, IdleFn};
use crate::events::{EventConfig, EventSet};
use crate::task::{Location, Task};
use crate::time::{CyclicOrder, TickWidth};

/// Application-supplied callbacks invoked once by [`Kernel::start`]: the
/// idle loop entry, a one-time setup routine, and the enablers for the two
/// optional external-ISR event sources. All are optional; an application
/// that doesn't use one just leaves it `None`.
#[derive(Default)]
pub struct Hooks {
    pub setup: Option<fn()>,
    pub idle: Option<IdleFn>,
    pub isr0_enable: Option<fn()>,
    pub isr1_enable: Option<fn()>,
}

/// Scheduling outcome of a service call: whether the caller needs to hand
/// off to a different task, simplified to the two cases this core's
/// single-priority-scan selection ever produces.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum NextTask {
    /// Keep running whatever was active.
    Same,
    /// Switch to the task at this index (`NTASKS` means the idle task).
    Switch(usize),
}

/// The fixed-size, statically-configured kernel object.
///
/// - `W`: tick counter width (`u8`, `u16`, or `u32`).
/// - `A`: architecture backend.
/// - `NTASKS`: number of configured tasks; the idle task is the implicit
///   `NTASKS`-th entry and needs no slot of its own in the arrays below.
/// - `NPRIO`: number of priority classes; class `NPRIO - 1` is most
///   important.
/// - `MAX_PER_CLASS`: ready-list capacity per class.
/// - `NMUTEX`, `NSEM`: event-bit partition sizes (see `EventConfig`).
/// - `ROUND_ROBIN`: whether same-priority tasks are time-sliced.
pub struct Kernel<
    A: Arch,
    W: TickWidth,
    const NTASKS: usize,
    const NPRIO: usize,
    const MAX_PER_CLASS: usize,
    const NMUTEX: usize,
    const NSEM: usize,
    const ROUND_ROBIN: bool,
> {
    tasks: [Task<W, A>; NTASKS],
    idle_save: A::SavedState,
    idle_hook: Option<IdleFn>,
    active: usize,

    ready_ids: [[u8; MAX_PER_CLASS]; NPRIO],
    ready_count: [u8; NPRIO],
    suspended_ids: [u8; NTASKS],
    suspended_count: usize,

    tick: W,
    event_cfg: EventConfig,
    mutex_owner: [Option<u8>; NMUTEX],
    sem_counters: [u32; NSEM],

    round_robin_slice: u16,
    switch_count: u32,
}

/// Outcome of a `wait` call: either it resolved immediately (mutex/semaphore
/// already available, or the requested condition already held) or the
/// caller is now suspended and `next` says who to run instead.
pub struct WaitOutcome {
    pub immediate: Option<EventSet>,
    pub next: NextTask,
}

impl<
        A: Arch,
        W: TickWidth,
        const NTASKS: usize,
        const NPRIO: usize,
        const MAX_PER_CLASS: usize,
        const NMUTEX: usize,
        const NSEM: usize,
        const ROUND_ROBIN: bool,
    > Kernel<A, W, NTASKS, NPRIO, MAX_PER_CLASS, NMUTEX, NSEM, ROUND_ROBIN>
{
    pub const IDLE: usize = NTASKS;

    pub fn new(event_cfg: EventConfig, round_robin_slice: u16) -> Self {
        assert!(NTASKS < u8::MAX as usize, "task count must fit in a u8 id");
        assert!(NPRIO >= 1, "at least one priority class is required");
        Kernel {
            tasks: core::array::from_fn(|_| Task::default()),
            idle_save: A::SavedState::default(),
            idle_hook: None,
            active: Self::IDLE,
            ready_ids: [[0; MAX_PER_CLASS]; NPRIO],
            ready_count: [0; NPRIO],
            suspended_ids: [0; NTASKS],
            suspended_count: 0,
            tick: W::default(),
            event_cfg,
            mutex_owner: [None; NMUTEX],
            sem_counters: [0; NSEM],
            round_robin_slice,
            switch_count: 0,
        }
    }

    /// Configures task `idx`'s static fields and initial wait condition.
    /// Must be called for every task index before the kernel starts.
    #[allow(clippy::too_many_arguments)]
    pub fn init_task(
        &mut self,
        idx: usize,
        priority: u8,
        entry: EntryFn,
        stack: &'static mut [u8],
        initial_wait_mask: EventSet,
        wait_all: bool,
        initial_timeout: u32,
        start_event: u16,
    ) {
        assert!(priority < NPRIO as u8, "priority class out of range");
        self.tasks[idx].configure(priority, stack, entry, start_event);
        if initial_wait_mask.is_empty() {
            self.tasks[idx].location = Location::Ready;
            self.push_ready(idx, priority);
            return;
        }
        // A non-empty initial wait condition goes through the same
        // immediate-grant path as `wait` -- a task configured to start by
        // acquiring a free mutex or a positive semaphore must not block on
        // it just because the request came from initialization rather than
        // a running task.
        let mask = Self::effective_wait_mask(initial_wait_mask, initial_timeout);
        self.grant_available_resources(idx, mask);
        self.tasks[idx].wait_mask = mask;
        self.tasks[idx].wait_all = wait_all;
        if self.try_release(idx, false).is_some() {
            self.tasks[idx].location = Location::Ready;
            self.push_ready(idx, priority);
            return;
        }
        self.apply_timeout(idx, mask, initial_timeout);
        self.push_suspended(idx);
    }

    pub fn task(&self, idx: usize) -> &Task<W, A> {
        &self.tasks[idx]
    }

    /// Runs once, after every task is configured and before the first tick:
    /// runs the one-time setup callback, records the idle loop entry point,
    /// and unmasks whichever external-ISR sources `event_cfg` names.
    pub fn start(&mut self, hooks: Hooks) {
        crate::klog!("kernel starting");
        if let Some(setup) = hooks.setup {
            setup();
        }
        self.idle_hook = hooks.idle;
        if self.event_cfg.isr0_enabled() {
            if let Some(enable) = hooks.isr0_enable {
                enable();
            }
        }
        if self.event_cfg.isr1_enabled() {
            if let Some(enable) = hooks.isr1_enable {
                enable();
            }
        }
    }

    /// The idle loop entry point recorded by `start`, if the application
    /// supplied one. A dispatch trampoline landing on the idle task calls
    /// this directly; idle has no saved state to restore into on its first
    /// entry.
    pub fn idle_hook(&self) -> Option<IdleFn> {
        self.idle_hook
    }

    /// The idle task's saved machine state. The idle task has no `Task`
    /// slot of its own (`IDLE == NTASKS`), so a dispatch trampoline switching
    /// to or from idle reads/writes this directly instead of indexing into
    /// `tasks`.
    pub fn idle_save(&self) -> &A::SavedState {
        &self.idle_save
    }

    pub fn idle_save_mut(&mut self) -> &mut A::SavedState {
        &mut self.idle_save
    }

    pub fn active(&self) -> usize {
        self.active
    }

    pub fn tick_count(&self) -> W {
        self.tick
    }

    pub fn switch_count(&self) -> u32 {
        self.switch_count
    }

    pub fn stack_reserve(&self, idx: usize) -> usize {
        crate::diag::stack_reserve(&self.tasks[idx])
    }

    pub fn overrun_count(&self, idx: usize) -> u32 {
        self.tasks[idx].overrun_count()
    }

    pub fn reset_overrun_count(&mut self, idx: usize) {
        self.tasks[idx].reset_overrun_count();
    }

    /// Runs `f` with the architecture's critical section held. The core
    /// never nests this call: every public service acquires it
    /// exactly once, at its own entry.
    fn critical<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        let token = A::enter_critical();
        let result = f(self);
        unsafe { A::leave_critical(token) };
        result
    }

    // ---- Ready/suspended index maintenance -----------------------------

    fn push_ready(&mut self, idx: usize, priority: u8) {
        let p = priority as usize;
        let n = self.ready_count[p] as usize;
        if n >= MAX_PER_CLASS {
            crate::klog!("priority class {} ready list full, dropping task {}", p, idx);
        }
        crate::kassert!(n < MAX_PER_CLASS, "ready list full for priority class");
        if n < MAX_PER_CLASS {
            self.ready_ids[p][n] = idx as u8;
            self.ready_count[p] = n as u8 + 1;
        }
        self.tasks[idx].location = Location::Ready;
    }

    fn remove_ready(&mut self, idx: usize, priority: u8) {
        let p = priority as usize;
        let n = self.ready_count[p] as usize;
        if let Some(pos) = self.ready_ids[p][..n].iter().position(|&id| id as usize == idx) {
            for i in pos..n - 1 {
                self.ready_ids[p][i] = self.ready_ids[p][i + 1];
            }
            self.ready_count[p] = n as u8 - 1;
        }
    }

    fn push_suspended(&mut self, idx: usize) {
        crate::kassert!(self.suspended_count < NTASKS, "suspended list overflow");
        self.suspended_ids[self.suspended_count] = idx as u8;
        self.suspended_count += 1;
        self.tasks[idx].location = Location::Suspended;
    }

    fn remove_suspended_at(&mut self, pos: usize) -> usize {
        let idx = self.suspended_ids[pos] as usize;
        for i in pos..self.suspended_count - 1 {
            self.suspended_ids[i] = self.suspended_ids[i + 1];
        }
        self.suspended_count -= 1;
        idx
    }

    /// Scans priority classes from highest to lowest; returns the head of
    /// the first non-empty ready list, or idle if all are empty. This is the
    /// *candidate* from the ready lists alone -- the currently active task
    /// (if any) is never itself in a ready list, so callers that may keep the
    /// active task running must additionally consult `should_preempt_active`.
    fn best_ready_candidate(&self) -> usize {
        for p in (0..NPRIO).rev() {
            if self.ready_count[p] > 0 {
                return self.ready_ids[p][0] as usize;
            }
        }
        Self::IDLE
    }

    /// Whether `candidate` (as returned by `best_ready_candidate`) should
    /// take over from whatever is currently active. Idle never preempts
    /// anything; idle is always preempted by any real candidate; otherwise
    /// strictly-higher priority wins.
    fn should_preempt_active(&self, candidate: usize) -> bool {
        if candidate == Self::IDLE {
            return false;
        }
        if self.active == Self::IDLE {
            return true;
        }
        self.priority_of(candidate) > self.priority_of(self.active)
    }

    fn priority_of(&self, idx: usize) -> u8 {
        if idx == Self::IDLE {
            0
        } else {
            self.tasks[idx].priority
        }
    }

    // ---- Timeout/delay bookkeeping shared by init and wait --------------

    /// A timeout is modeled as the delay-timer bit being implicitly OR-ed
    /// into the wait mask whenever `timeout > 0`, so that a wait
    /// on an arbitrary event can still be bounded even if the caller never
    /// named the delay-timer bit itself.
    fn effective_wait_mask(mask: EventSet, timeout: u32) -> EventSet {
        if timeout > 0 {
            mask | EventSet::DELAY_TIMER
        } else {
            mask
        }
    }

    fn apply_timeout(&mut self, idx: usize, mask: EventSet, timeout: u32) {
        if mask.contains(EventSet::DELAY_TIMER) {
            // +1 guards the delay being a lower bound against an
            // un-synchronized caller.
            self.tasks[idx].delay_ticks = timeout + 1;
        }
        if mask.contains(EventSet::ABS_TIMER) {
            self.tasks[idx].time_due_at = self.tasks[idx].time_due_at.advance(timeout);
        }
    }

    // ---- Mutex/semaphore immediate-grant helpers -------------------------

    /// Grants any mutex/semaphore bits in `mask` that are immediately
    /// available (lock free, or semaphore counter positive), OR-ing them
    /// into the task's posted mask. Used both by `wait` and by task initialization.
    fn grant_available_resources(&mut self, idx: usize, mask: EventSet) {
        for i in 0..NMUTEX {
            let bit = EventSet::bit(i as u8);
            if mask.intersects(bit) && self.mutex_owner[i].is_none() {
                self.mutex_owner[i] = Some(idx as u8);
                self.tasks[idx].posted |= bit;
            }
        }
        for i in 0..NSEM {
            let bit_index = self.event_cfg.num_mutex() + i;
            let bit = EventSet::bit(bit_index as u8);
            if mask.intersects(bit) && self.sem_counters[i] > 0 {
                self.sem_counters[i] -= 1;
                self.tasks[idx].posted |= bit;
            }
        }
    }

    /// Computes whether `idx`'s wait condition is now satisfied and, if so,
    /// clears the consumed bits and records them as `last_release`. Shared by
    /// wait's immediate-grant path, `post`, and `tick`.
    fn try_release(&mut self, idx: usize, delay_fired: bool) -> Option<EventSet> {
        let eff = if delay_fired {
            // Timeout is an unconditional alternate release path: it
            // satisfies the wait regardless of the wait-all flag, and the
            // caller sees only the delay-timer bit.
            EventSet::DELAY_TIMER
        } else {
            let task = &self.tasks[idx];
            let eff = task.posted & task.wait_mask;
            let satisfied = if task.wait_all {
                eff == task.wait_mask && !task.wait_mask.is_empty()
            } else {
                !eff.is_empty()
            };
            if !satisfied {
                return None;
            }
            eff
        };
        let task = &mut self.tasks[idx];
        task.posted = task.posted & !eff;
        task.last_release = eff;
        Some(eff)
    }

    // ---- Public services --------------------------------------------------

    /// The idle task must never call this; checked as a fatal assertion in
    /// debug builds.
    pub fn wait(
        &mut self,
        caller: usize,
        mask: EventSet,
        wait_all: bool,
        timeout: u32,
    ) -> WaitOutcome {
        crate::kassert!(caller != Self::IDLE, "idle task must not call wait");
        let mask = Self::effective_wait_mask(mask, timeout);
        self.critical(|k| {
            k.grant_available_resources(caller, mask);
            k.tasks[caller].wait_mask = mask;
            k.tasks[caller].wait_all = wait_all;
            if let Some(eff) = k.try_release(caller, false) {
                return WaitOutcome {
                    immediate: Some(eff),
                    next: NextTask::Same,
                };
            }

            k.apply_timeout(caller, mask, timeout);

            k.push_suspended(caller);
            let next = k.best_ready_candidate();
            if next != Self::IDLE {
                k.remove_ready(next, k.priority_of(next));
            }
            k.tasks_set_active(next);
            WaitOutcome {
                immediate: None,
                next: NextTask::Switch(next),
            }
        })
    }

    fn tasks_set_active(&mut self, next: usize) {
        if next != Self::IDLE {
            self.tasks[next].location = Location::Active;
            if ROUND_ROBIN {
                self.tasks[next].round_robin_remaining = self.round_robin_slice;
            }
        }
        if next != self.active {
            self.switch_count += 1;
        }
        self.active = next;
    }

    /// `caller`: `Some(idx)` when called from a task (enables the
    /// yield-on-higher-priority-release rule); `None` from an ISR.
    pub fn post(&mut self, caller: Option<usize>, bits: EventSet) -> NextTask {
        crate::kassert!(
            !bits.intersects(EventSet::ABS_TIMER | EventSet::DELAY_TIMER),
            "timer bits are per-task and must never be posted directly"
        );
        self.critical(|k| k.post_locked(caller, bits))
    }

    fn post_locked(&mut self, caller: Option<usize>, bits: EventSet) -> NextTask {
        let mutex_bits = bits & self.event_cfg.mutex_mask();
        let sem_bits = bits & self.event_cfg.sem_mask();
        let broadcast_bits = bits & self.event_cfg.broadcast_mask();

        for i in 0..NMUTEX {
            let bit = EventSet::bit(i as u8);
            if !mutex_bits.intersects(bit) {
                continue;
            }
            // A release from a task that isn't the current owner is a
            // contract violation even when the mutex is already free --
            // "released without ownership" covers both cases.
            let owner = self.mutex_owner[i].map(|o| o as usize);
            crate::kassert_eq!(owner, caller, "mutex released without ownership");
            if owner != caller {
                continue;
            }
            self.mutex_owner[i] = None;
            if let Some(winner) = self.pick_waiter(bit) {
                self.tasks[winner].posted |= bit;
                self.mutex_owner[i] = Some(winner as u8);
                crate::klog!("mutex {} reassigned to task {}", i, winner);
            }
        }

        for i in 0..NSEM {
            let bit_index = self.event_cfg.num_mutex() + i;
            let bit = EventSet::bit(bit_index as u8);
            if !sem_bits.intersects(bit) {
                continue;
            }
            if let Some(winner) = self.pick_waiter(bit) {
                self.tasks[winner].posted |= bit;
            } else {
                self.sem_counters[i] = self.sem_counters[i].saturating_add(1);
            }
        }

        if !broadcast_bits.is_empty() {
            for pos in 0..self.suspended_count {
                let idx = self.suspended_ids[pos] as usize;
                self.tasks[idx].posted |= broadcast_bits;
            }
        }

        self.release_satisfied_suspended_tasks();
        self.reschedule_after_post(caller)
    }

    /// Finds the oldest (lowest index in the FIFO-ordered suspended list)
    /// waiter among those at the highest priority class present, for a
    /// single mutex/semaphore bit.
    fn pick_waiter(&self, bit: EventSet) -> Option<usize> {
        let mut best: Option<(usize, u8)> = None;
        for pos in 0..self.suspended_count {
            let idx = self.suspended_ids[pos] as usize;
            if !self.tasks[idx].wait_mask.intersects(bit) {
                continue;
            }
            let prio = self.tasks[idx].priority;
            match best {
                Some((_, best_prio)) if prio <= best_prio => {}
                _ => best = Some((idx, prio)),
            }
        }
        best.map(|(idx, _)| idx)
    }

    fn release_satisfied_suspended_tasks(&mut self) {
        let mut pos = 0;
        while pos < self.suspended_count {
            let idx = self.suspended_ids[pos] as usize;
            if self.try_release(idx, false).is_some() {
                self.remove_suspended_at(pos);
                let p = self.tasks[idx].priority;
                self.push_ready(idx, p);
            } else {
                pos += 1;
            }
        }
    }

    fn reschedule_after_post(&mut self, caller: Option<usize>) -> NextTask {
        debug_assert!(caller.is_none() || caller == Some(self.active));
        let candidate = self.best_ready_candidate();
        if !self.should_preempt_active(candidate) {
            return NextTask::Same;
        }
        self.remove_ready(candidate, self.priority_of(candidate));
        if self.active != Self::IDLE {
            let p = self.tasks[self.active].priority;
            self.push_ready(self.active, p);
        }
        self.tasks_set_active(candidate);
        NextTask::Switch(candidate)
    }

    /// Convenience wrapper for `wait` with only the delay-timer bit in the
    /// mask.
    pub fn delay(&mut self, caller: usize, timeout: u32) -> WaitOutcome {
        self.wait(caller, EventSet::DELAY_TIMER, false, timeout)
    }

    /// Runs once per timer tick, from the timer ISR only.
    pub fn tick(&mut self) -> NextTask {
        self.critical(|k| k.tick_locked())
    }

    fn tick_locked(&mut self) -> NextTask {
        self.tick = self.tick.succ();

        let mut pos = 0;
        while pos < self.suspended_count {
            let idx = self.suspended_ids[pos] as usize;
            let mut delay_fired = false;

            if self.tasks[idx].delay_ticks > 0 {
                self.tasks[idx].delay_ticks -= 1;
                if self.tasks[idx].delay_ticks == 0 {
                    self.tasks[idx].posted |= EventSet::DELAY_TIMER;
                    delay_fired = true;
                }
            }

            if self.tasks[idx].wait_mask.contains(EventSet::ABS_TIMER) {
                let due = self.tasks[idx].time_due_at;
                match self.tick.cyclic_cmp(due) {
                    CyclicOrder::Same => {
                        self.tasks[idx].posted |= EventSet::ABS_TIMER;
                    }
                    CyclicOrder::After => {
                        if self.tasks[idx].posted.contains(EventSet::ABS_TIMER) {
                            self.tasks[idx].overrun_count =
                                self.tasks[idx].overrun_count.saturating_add(1);
                            crate::klog!("task {} missed its period at tick {:?}", idx, self.tick);
                        }
                        self.tasks[idx].posted |= EventSet::ABS_TIMER;
                    }
                    CyclicOrder::Before => {}
                }
            }

            if self.try_release(idx, delay_fired).is_some() {
                self.remove_suspended_at(pos);
                let p = self.tasks[idx].priority;
                self.push_ready(idx, p);
            } else {
                pos += 1;
            }
        }

        // Round robin: a same-priority sibling is entitled to a
        // turn once the active task's slice runs out, which is a weaker
        // condition than `should_preempt_active`'s strictly-higher-priority
        // test. `time_slice_expired` loosens that test to "equal or higher"
        // for this one reschedule only.
        let mut time_slice_expired = false;
        if ROUND_ROBIN && self.active != Self::IDLE && self.round_robin_slice != 0 {
            self.tasks[self.active].round_robin_remaining =
                self.tasks[self.active].round_robin_remaining.saturating_sub(1);
            if self.tasks[self.active].round_robin_remaining == 0 {
                self.tasks[self.active].round_robin_remaining = self.round_robin_slice;
                time_slice_expired = true;
            }
        }

        let candidate = self.best_ready_candidate();
        let switch = if time_slice_expired {
            candidate != Self::IDLE && self.priority_of(candidate) >= self.priority_of(self.active)
        } else {
            self.should_preempt_active(candidate)
        };
        if !switch {
            return NextTask::Same;
        }
        self.remove_ready(candidate, self.priority_of(candidate));
        if self.active != Self::IDLE {
            let p = self.tasks[self.active].priority;
            self.push_ready(self.active, p);
        }
        self.tasks_set_active(candidate);
        NextTask::Switch(candidate)
    }
}
