//! Kernel: the executive's single context struct
//!
//! Owns the scheduler state, the thread registry, every queue, the mutex
//! table and the tick counter, plus the [`Port`] that performs the actual
//! CPU work. Thread lifecycle (create, exit, join, suspend, resume, abort,
//! delete) and the diagnostic queries live here.
//!
//! Author: Moroya Sakamoto

use heapless::Vec;

use crate::config::{KernelConfig, MAX_THREADS, NUM_PRIORITIES};
use crate::error::{Error, Fatal, Result};
use crate::mutex::MutexTable;
use crate::port::{Port, SoftwarePort};
use crate::priority::Priority;
use crate::queue::{QueueId, QueueTable, WaitOrder};
use crate::scheduler::{Context, Scheduler};
use crate::thread::{
    BlockCause, Thread, ThreadFlags, ThreadId, ThreadParams, ThreadState, ThreadTable,
};
use crate::timer::{SysTimer, TimeoutTable, WAKE_TIMEOUT};

/// Outcome of [`Kernel::join`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinStatus {
    /// Target had already exited with this code
    Exited(i32),
    /// Caller blocked; its wake value carries the exit code once resumed
    Waiting,
}

/// Registry snapshot entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadInfo {
    pub id: ThreadId,
    pub priority: Priority,
    pub base_priority: Priority,
    pub state: ThreadState,
    pub dispatches: u32,
    /// Absolute tick of an armed timeout
    pub deadline: Option<u64>,
}

/// Executive instance
pub struct Kernel<P: Port> {
    pub(crate) sched: Scheduler,
    pub(crate) threads: ThreadTable,
    pub(crate) queues: QueueTable,
    pub(crate) mutexes: MutexTable,
    pub(crate) timer: SysTimer,
    pub(crate) timeouts: TimeoutTable,
    pub(crate) config: KernelConfig,
    pub(crate) port: P,
}

impl Kernel<SoftwarePort> {
    /// Host kernel with a recording port and no stack floor
    pub fn testing() -> Self {
        Self::new(SoftwarePort::new(), KernelConfig::testing())
    }
}

impl<P: Port> Kernel<P> {
    /// Build a kernel with only the idle thread registered
    ///
    /// Nothing is dispatched until [`start`](Self::start).
    pub fn new(port: P, config: KernelConfig) -> Self {
        let mut threads = ThreadTable::new();
        let mut idle = Thread::new(ThreadId::IDLE, "idle", Priority::MIN, config.idle_stack);
        idle.ready = true;
        idle.flags = ThreadFlags::NO_EXTENDED_STATE;
        threads.install(idle);

        Self {
            sched: Scheduler::new(),
            threads,
            queues: QueueTable::new(),
            mutexes: MutexTable::new(),
            timer: SysTimer::new(),
            timeouts: TimeoutTable::new(),
            config,
            port,
        }
    }

    /// Enable dispatch and switch to the highest ready thread
    pub fn start(&mut self) -> Result<()> {
        self.guarded(|k| {
            if k.sched.is_started() {
                return Err(Error::AlreadyInitialized);
            }
            k.mark_started();
            log::info!("executive started with {} threads", k.threads.count());
            k.schedule_now(Context::Thread)
        })
    }

    /// Run `f`, reporting any fatal outcome to the port exactly once
    pub(crate) fn guarded<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let result = f(self);
        if let Err(Error::Fatal(kind)) = result {
            log::error!("fatal: {}", kind);
            self.port.fatal(kind);
        }
        result
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Register a thread; it starts ready unless created suspended
    ///
    /// From [`Context::Interrupt`] a preempting thread is only staged.
    pub fn create(&mut self, ctx: Context, params: ThreadParams<'_>) -> Result<ThreadId> {
        let prio = Priority::new(params.priority)?;
        let min = self.config.min_stack_size;
        if params.stack.size < min {
            return Err(Error::StackTooSmall { size: params.stack.size, min });
        }
        let id = self.threads.vacant().ok_or(Error::RegistryFull)?;

        self.guarded(|k| {
            let suspended = params.flags.contains(ThreadFlags::SUSPENDED);
            let mut t = Thread::new(id, params.name, prio, params.stack);
            t.entry = Some(params.entry);
            t.arg = params.arg;
            t.exit_handler = params.exit_handler;
            t.flags = params.flags;
            if suspended {
                t.cause = Some(BlockCause::Suspended);
            }
            k.threads.install(t);
            k.port.init_context(id, params.entry, params.arg, params.stack);
            log::debug!(
                "created '{}' in slot {} at priority {}",
                params.name,
                id.slot(),
                prio.level()
            );

            if !suspended {
                k.threads.get_mut(id)?.ready = true;
                k.ready_insert(id, false)?;
                if !k.sched.is_locked() {
                    k.schedule_now(ctx)?;
                }
            }
            Ok(id)
        })
    }

    /// Terminate the calling thread
    ///
    /// Every thread already joined on the caller is woken with the exit
    /// code in a single scheduling pass. The caller never runs again.
    pub fn exit(&mut self, code: i32) -> Result<()> {
        self.guarded(|k| {
            let cur = k.sched.current();
            if cur.is_idle() {
                return Err(Error::IdleThread);
            }
            let t = k.threads.get(cur)?;
            if t.held > 0 || t.owned.is_some() {
                return Err(Fatal::OwnsMutexes.into());
            }
            let (flags, joiners) = (t.flags, t.exit_waiters);
            let code = match t.exit_handler {
                Some(handler) => handler(cur, code),
                None => code,
            };
            if !flags.contains(ThreadFlags::NO_EXTENDED_STATE) {
                k.port.release_extended_state(cur);
            }

            k.threads.get_mut(cur)?.wake_value = code;
            k.sched.lock();
            let woken = k.drain_queue(joiners, Some(BlockCause::Join), code)?;
            log::debug!("slot {} exited with {}, {} joiners", cur.slot(), code, woken);
            k.timeouts.cancel(cur);
            // Blocking drops the lock taken above
            k.block_current(BlockCause::Exited, None, WaitOrder::Fifo, 0)
        })
    }

    /// Wait for `target` to exit
    pub fn join(&mut self, target: ThreadId) -> Result<JoinStatus> {
        self.guarded(|k| {
            if target == k.sched.current() {
                return Err(Error::JoinSelf);
            }
            if target.is_idle() {
                return Err(Error::IdleThread);
            }
            let t = k.threads.get(target)?;
            if t.has_exited() {
                return Ok(JoinStatus::Exited(t.wake_value));
            }
            let joiners = t.exit_waiters;
            k.block_current(BlockCause::Join, Some(joiners), WaitOrder::Priority, 0)?;
            Ok(JoinStatus::Waiting)
        })
    }

    /// Take a ready thread off the CPU until [`resume`](Self::resume)
    pub fn suspend(&mut self, ctx: Context, thread: ThreadId) -> Result<()> {
        self.guarded(|k| {
            if thread.is_idle() {
                return Err(Error::IdleThread);
            }
            let t = k.threads.get(thread)?;
            if t.has_exited() {
                return Err(Error::AlreadyExited);
            }
            if !t.ready {
                return Err(Error::AlreadyBlocked);
            }

            let cur = k.sched.current();
            if thread == cur && ctx == Context::Thread {
                return k.block_current(BlockCause::Suspended, None, WaitOrder::Fifo, 0);
            }

            k.ready_remove(thread)?;
            let t = k.threads.get_mut(thread)?;
            t.ready = false;
            t.cause = Some(BlockCause::Suspended);

            let affects_dispatch = thread == cur || k.sched.next() == Some(thread);
            if affects_dispatch && !k.sched.is_locked() {
                k.schedule_now(ctx)?;
            }
            Ok(())
        })
    }

    pub fn resume(&mut self, ctx: Context, thread: ThreadId) -> Result<()> {
        self.guarded(|k| {
            if k.wake_thread(ctx, thread, Some(BlockCause::Suspended), 0)? {
                Ok(())
            } else {
                Err(Error::NotSuspended)
            }
        })
    }

    /// Force another thread through its abort path
    ///
    /// The port redirects the thread's resume point; the thread is made
    /// ready so it can run the abort sequence and exit.
    pub fn abort(&mut self, ctx: Context, thread: ThreadId, code: i32) -> Result<()> {
        self.guarded(|k| {
            if thread == k.sched.current() {
                return Err(Error::AbortSelf);
            }
            if thread.is_idle() {
                return Err(Error::IdleThread);
            }
            if k.threads.get(thread)?.has_exited() {
                return Err(Error::AlreadyExited);
            }

            k.port.redirect_to_abort(thread, code);
            log::debug!("aborting slot {} with {}", thread.slot(), code);
            k.make_ready(thread, None, code)?;
            if !k.sched.is_locked() {
                k.schedule_now(ctx)?;
            }
            Ok(())
        })
    }

    /// Remove a parked thread from the registry
    ///
    /// Only exited or suspended threads with no joiners, no queue
    /// membership and no held mutexes can be deleted.
    pub fn delete(&mut self, thread: ThreadId) -> Result<()> {
        self.guarded(|k| {
            if thread.is_idle() {
                return Err(Error::IdleThread);
            }
            let t = k.threads.get(thread)?;
            let parked = t.has_exited() || t.cause == Some(BlockCause::Suspended);
            if !parked || t.link.is_linked() || t.held > 0 {
                return Err(Error::ThreadBusy);
            }
            if !k.queues.is_empty(t.exit_waiters)? {
                return Err(Error::ThreadBusy);
            }

            k.timeouts.cancel(thread);
            k.threads.release(thread);
            log::debug!("deleted slot {}", thread.slot());
            Ok(())
        })
    }

    // ------------------------------------------------------------------
    // Time
    // ------------------------------------------------------------------

    /// Tick interrupt: fire expired timeouts and run time slicing
    pub fn tick(&mut self, delta: u64) -> Result<()> {
        self.guarded(|k| {
            k.timer.advance(delta);
            let now = k.timer.now();
            while let Some(expired) = k.timeouts.pop_expired(now) {
                log::trace!("timeout for slot {}", expired.thread.slot());
                k.wake_thread(
                    Context::Interrupt,
                    expired.thread,
                    Some(expired.cause),
                    WAKE_TIMEOUT,
                )?;
            }

            let slice = k.config.time_slice_ticks;
            if slice > 0 && k.sched.slice_elapsed(delta, u64::from(slice)) {
                k.rotate_current(Context::Interrupt)?;
            }
            Ok(())
        })
    }

    /// Block the caller for `ticks`; zero just yields
    pub fn sleep(&mut self, ticks: u64) -> Result<()> {
        if ticks == 0 {
            return self.yield_now(Context::Thread);
        }
        self.guarded(|k| k.block_current(BlockCause::Sleep, None, WaitOrder::Fifo, ticks))
    }

    pub fn now(&self) -> u64 {
        self.timer.now()
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn current(&self) -> ThreadId {
        self.sched.current()
    }

    pub fn next_staged(&self) -> Option<ThreadId> {
        self.sched.next()
    }

    pub fn ready_mask(&self) -> u32 {
        self.sched.ready_mask().bits()
    }

    pub fn switch_count(&self) -> u64 {
        self.sched.switches()
    }

    pub fn lock_depth(&self) -> u32 {
        self.sched.lock_depth()
    }

    pub fn is_started(&self) -> bool {
        self.sched.is_started()
    }

    pub fn thread(&self, thread: ThreadId) -> Result<&Thread> {
        Ok(self.threads.get(thread)?)
    }

    pub fn thread_state(&self, thread: ThreadId) -> Result<ThreadState> {
        let t = self.threads.get(thread)?;
        Ok(self.state_of(t))
    }

    pub fn priority(&self, thread: ThreadId) -> Result<Priority> {
        Ok(self.threads.get(thread)?.priority)
    }

    pub fn base_priority(&self, thread: ThreadId) -> Result<Priority> {
        Ok(self.threads.get(thread)?.base_priority)
    }

    pub fn wake_value(&self, thread: ThreadId) -> Result<i32> {
        Ok(self.threads.get(thread)?.wake_value)
    }

    pub fn block_cause(&self, thread: ThreadId) -> Result<Option<BlockCause>> {
        Ok(self.threads.get(thread)?.cause)
    }

    pub fn queue_len(&self, queue: QueueId) -> Result<usize> {
        Ok(self.queues.len(queue)?)
    }

    pub fn queue_head(&self, queue: QueueId) -> Result<Option<ThreadId>> {
        Ok(self.queues.head(queue)?)
    }

    /// Snapshot of every registered thread, idle included
    pub fn threads(&self) -> Vec<ThreadInfo, MAX_THREADS> {
        let mut out = Vec::new();
        for t in self.threads.iter() {
            // Table and snapshot share the same capacity
            let _ = out.push(ThreadInfo {
                id: t.id,
                priority: t.priority,
                base_priority: t.base_priority,
                state: self.state_of(t),
                dispatches: t.dispatches,
                deadline: self.timeouts.deadline_of(t.id),
            });
        }
        out
    }

    fn state_of(&self, t: &Thread) -> ThreadState {
        match (t.ready, t.cause) {
            (true, _) if t.id == self.sched.current() => ThreadState::Running,
            (true, _) | (false, None) => ThreadState::Ready,
            (false, Some(BlockCause::Suspended)) => ThreadState::Suspended,
            (false, Some(BlockCause::Exited)) => ThreadState::Exited,
            (false, Some(cause)) => ThreadState::Blocked(cause),
        }
    }

    /// Verify the bitmap, queue membership and owned-list invariants
    pub fn check_invariants(&self) -> core::result::Result<(), Fatal> {
        let mask = self.sched.ready_mask();
        for i in 0..NUM_PRIORITIES {
            let p = Priority::from_index(i);
            let q = QueueId::ready(p);
            let len = self.queues.audit(&self.threads, q)?;
            if (len > 0) != mask.contains(p) {
                return Err(Fatal::BitmapMismatch { priority: p.level() });
            }
        }

        let mut linked = 0usize;
        for q in self.queues.ids() {
            linked += self.queues.audit(&self.threads, q)?;
        }
        let mut expected = 0usize;

        for t in self.threads.iter() {
            let queue = t.link.queue;
            if queue.is_some() {
                expected += 1;
            }
            let in_ready = queue.map_or(false, |q| q.is_ready_queue());
            if t.id.is_idle() {
                if queue.is_some() {
                    return Err(Fatal::AlreadyLinked);
                }
            } else if t.ready && queue != Some(QueueId::ready(t.priority)) {
                return Err(Fatal::NotLinked);
            } else if !t.ready && in_ready {
                return Err(Fatal::AlreadyLinked);
            }

            let mut cursor = t.owned;
            let mut last = Priority::MAX;
            let mut hops = 0;
            while let Some(m) = cursor {
                let rec = self.mutexes.get(m)?;
                hops += 1;
                if rec.owner != Some(t.id) || rec.priority > last || hops > MAX_THREADS * 2 {
                    return Err(Fatal::InvalidMutex);
                }
                last = rec.priority;
                cursor = rec.owned_next;
            }
        }

        if linked != expected {
            return Err(Fatal::NotLinked);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutex::MutexKind;
    use crate::thread::StackRegion;
    use core::sync::atomic::{AtomicU32, Ordering};

    const SEM: BlockCause = BlockCause::Wait("sem");

    fn entry(_: usize) -> i32 {
        0
    }

    fn double_code(_: ThreadId, code: i32) -> i32 {
        code * 2
    }

    fn params(name: &str, prio: u8) -> ThreadParams<'_> {
        ThreadParams::new(name, entry, StackRegion::new(0x2000, 1024), prio)
    }

    fn spawn(k: &mut Kernel<SoftwarePort>, name: &str, prio: u8) -> ThreadId {
        k.create(Context::Thread, params(name, prio)).unwrap()
    }

    #[test]
    fn test_new_kernel_has_only_idle() {
        let k = Kernel::testing();
        assert_eq!(k.current(), ThreadId::IDLE);
        assert!(!k.is_started());
        let all = k.threads();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].state, ThreadState::Running);
        k.check_invariants().unwrap();
    }

    #[test]
    fn test_double_start_rejected() {
        let mut k = Kernel::testing();
        k.start().unwrap();
        assert_eq!(k.start(), Err(Error::AlreadyInitialized));
    }

    #[test]
    fn test_create_validation() {
        let mut k = Kernel::new(SoftwarePort::new(), KernelConfig::new());
        assert_eq!(k.create(Context::Thread, params("p", 32)), Err(Error::InvalidPriority(32)));
        let small = ThreadParams::new("s", entry, StackRegion::new(0, 64), 3);
        assert_eq!(
            k.create(Context::Thread, small),
            Err(Error::StackTooSmall { size: 64, min: 256 })
        );
        assert_eq!(k.port().contexts, 0);
        k.create(Context::Thread, params("ok", 3)).unwrap();
        assert_eq!(k.port().contexts, 1);
    }

    #[test]
    fn test_registry_full() {
        let mut k = Kernel::testing();
        for _ in 1..MAX_THREADS {
            k.create(Context::Thread, params("t", 1).suspended()).unwrap();
        }
        assert_eq!(k.create(Context::Thread, params("x", 1)), Err(Error::RegistryFull));
    }

    #[test]
    fn test_created_suspended_stays_off_ready_list() {
        let mut k = Kernel::testing();
        k.start().unwrap();
        let t = k.create(Context::Thread, params("t", 4).suspended()).unwrap();
        assert_eq!(k.thread_state(t).unwrap(), ThreadState::Suspended);
        assert_eq!(k.ready_mask(), 0);
        assert_eq!(k.resume(Context::Thread, ThreadId::IDLE), Err(Error::NotSuspended));
        k.resume(Context::Thread, t).unwrap();
        assert_eq!(k.current(), t);
        assert_eq!(k.resume(Context::Thread, t), Err(Error::NotSuspended));
    }

    #[test]
    fn test_exit_wakes_joiners_and_late_join() {
        let mut k = Kernel::testing();
        k.start().unwrap();
        let target = spawn(&mut k, "target", 3);
        let j1 = spawn(&mut k, "j1", 5);
        assert_eq!(k.join(target).unwrap(), JoinStatus::Waiting);
        let j2 = spawn(&mut k, "j2", 6);
        assert_eq!(k.join(target).unwrap(), JoinStatus::Waiting);
        assert_eq!(k.current(), target);

        k.exit(42).unwrap();
        assert_eq!(k.current(), j2);
        assert_eq!(k.wake_value(j1).unwrap(), 42);
        assert_eq!(k.wake_value(j2).unwrap(), 42);
        assert_eq!(k.thread_state(target).unwrap(), ThreadState::Exited);
        assert_eq!(k.lock_depth(), 0);

        let _late = spawn(&mut k, "late", 9);
        assert_eq!(k.join(target).unwrap(), JoinStatus::Exited(42));
        k.check_invariants().unwrap();
    }

    #[test]
    fn test_exit_handler_rewrites_code() {
        let mut k = Kernel::testing();
        k.start().unwrap();
        let t = k.create(Context::Thread, params("t", 2).on_exit(double_code)).unwrap();
        k.exit(21).unwrap();
        assert_eq!(k.wake_value(t).unwrap(), 42);
        assert_eq!(k.port().released.as_slice(), &[t]);
    }

    #[test]
    fn test_exit_skips_extended_state_release() {
        let mut k = Kernel::testing();
        k.start().unwrap();
        k.create(Context::Thread, params("t", 2).flags(ThreadFlags::NO_EXTENDED_STATE)).unwrap();
        k.exit(0).unwrap();
        assert!(k.port().released.is_empty());
    }

    #[test]
    fn test_exit_holding_mutex_is_fatal() {
        let mut k = Kernel::testing();
        k.start().unwrap();
        spawn(&mut k, "t", 2);
        let m = k.mutex_create(MutexKind::Plain).unwrap();
        k.mutex_lock(m).unwrap();
        assert_eq!(k.exit(1), Err(Error::Fatal(Fatal::OwnsMutexes)));
        assert_eq!(k.port().fatals.as_slice(), &[Fatal::OwnsMutexes]);
    }

    static HANDLER_RUNS: AtomicU32 = AtomicU32::new(0);

    fn count_exit(_: ThreadId, code: i32) -> i32 {
        HANDLER_RUNS.fetch_add(1, Ordering::SeqCst);
        code
    }

    #[test]
    fn test_fatal_exit_skips_handler() {
        let mut k = Kernel::testing();
        k.start().unwrap();
        let t = k.create(Context::Thread, params("t", 2).on_exit(count_exit)).unwrap();
        let m = k.mutex_create(MutexKind::Inherit).unwrap();
        k.mutex_lock(m).unwrap();
        assert_eq!(k.exit(5), Err(Error::Fatal(Fatal::OwnsMutexes)));
        assert_eq!(HANDLER_RUNS.load(Ordering::SeqCst), 0);

        k.mutex_unlock(m).unwrap();
        k.exit(5).unwrap();
        assert_eq!(HANDLER_RUNS.load(Ordering::SeqCst), 1);
        assert_eq!(k.thread_state(t).unwrap(), ThreadState::Exited);
    }

    #[test]
    fn test_create_from_interrupt_is_staged() {
        let mut k = Kernel::testing();
        k.start().unwrap();
        let low = spawn(&mut k, "low", 2);
        let switches = k.switch_count();

        let high = k.create(Context::Interrupt, params("high", 7)).unwrap();
        assert_eq!(k.current(), low);
        assert_eq!(k.next_staged(), Some(high));
        assert_eq!(k.switch_count(), switches);
        assert_eq!(k.port().pends, 1);

        k.dispatch_staged().unwrap();
        assert_eq!(k.current(), high);
        k.check_invariants().unwrap();
    }

    #[test]
    fn test_join_rejections() {
        let mut k = Kernel::testing();
        k.start().unwrap();
        let a = spawn(&mut k, "a", 2);
        assert_eq!(k.join(a), Err(Error::JoinSelf));
        assert_eq!(k.join(ThreadId::IDLE), Err(Error::IdleThread));
    }

    #[test]
    fn test_suspend_running_thread() {
        let mut k = Kernel::testing();
        k.start().unwrap();
        let low = spawn(&mut k, "low", 1);
        let high = spawn(&mut k, "high", 7);
        k.suspend(Context::Thread, high).unwrap();
        assert_eq!(k.current(), low);
        assert_eq!(k.suspend(Context::Thread, high), Err(Error::AlreadyBlocked));
        k.resume(Context::Thread, high).unwrap();
        assert_eq!(k.current(), high);
    }

    #[test]
    fn test_suspend_from_interrupt_stages() {
        let mut k = Kernel::testing();
        k.start().unwrap();
        let low = spawn(&mut k, "low", 1);
        let high = spawn(&mut k, "high", 7);
        k.suspend(Context::Interrupt, high).unwrap();
        assert_eq!(k.current(), high);
        assert_eq!(k.next_staged(), Some(low));
        k.dispatch_staged().unwrap();
        assert_eq!(k.current(), low);
    }

    #[test]
    fn test_abort_blocked_thread() {
        let mut k = Kernel::testing();
        k.start().unwrap();
        let q = k.create_wait_queue().unwrap();
        let victim = spawn(&mut k, "victim", 3);
        k.block(SEM, Some(q), WaitOrder::Fifo).unwrap();
        let killer = spawn(&mut k, "killer", 5);

        assert_eq!(k.abort(Context::Thread, killer, 1), Err(Error::AbortSelf));
        k.abort(Context::Thread, victim, -7).unwrap();
        assert_eq!(k.port().aborts.as_slice(), &[(victim, -7)]);
        assert_eq!(k.thread_state(victim).unwrap(), ThreadState::Ready);
        assert_eq!(k.queue_len(q).unwrap(), 0);
        assert_eq!(k.current(), killer);
    }

    #[test]
    fn test_abort_exited_rejected() {
        let mut k = Kernel::testing();
        k.start().unwrap();
        let a = spawn(&mut k, "a", 3);
        k.exit(0).unwrap();
        spawn(&mut k, "b", 3);
        assert_eq!(k.abort(Context::Thread, a, 1), Err(Error::AlreadyExited));
        assert_eq!(k.abort(Context::Thread, ThreadId::IDLE, 1), Err(Error::IdleThread));
    }

    #[test]
    fn test_delete_recycles_slot() {
        let mut k = Kernel::testing();
        k.start().unwrap();
        let a = spawn(&mut k, "a", 3);
        assert_eq!(k.delete(a), Err(Error::ThreadBusy));
        k.exit(0).unwrap();
        k.delete(a).unwrap();
        assert_eq!(k.thread(a).err(), Some(Error::Fatal(Fatal::InvalidThread)));

        let b = spawn(&mut k, "b", 3);
        assert_eq!(b.slot(), a.slot());
        assert_ne!(b, a);
        assert_eq!(k.resume(Context::Thread, a), Err(Error::Fatal(Fatal::InvalidThread)));
    }

    #[test]
    fn test_delete_suspended() {
        let mut k = Kernel::testing();
        let t = k.create(Context::Thread, params("t", 3).suspended()).unwrap();
        k.delete(t).unwrap();
        assert_eq!(k.threads().len(), 1);
    }

    #[test]
    fn test_sleep_wakes_on_deadline() {
        let mut k = Kernel::testing();
        k.start().unwrap();
        let a = spawn(&mut k, "a", 3);
        k.sleep(10).unwrap();
        assert_eq!(k.current(), ThreadId::IDLE);

        k.tick(9).unwrap();
        assert_eq!(k.thread_state(a).unwrap(), ThreadState::Blocked(BlockCause::Sleep));
        k.tick(1).unwrap();
        assert_eq!(k.next_staged(), Some(a));
        assert_eq!(k.port().pends, 0);
        k.dispatch_staged().unwrap();
        assert_eq!(k.current(), a);
        assert_eq!(k.wake_value(a).unwrap(), WAKE_TIMEOUT);
        assert_eq!(k.now(), 10);
    }

    #[test]
    fn test_sleep_zero_yields() {
        let mut k = Kernel::testing();
        let a = spawn(&mut k, "a", 4);
        let b = spawn(&mut k, "b", 4);
        k.start().unwrap();
        k.sleep(0).unwrap();
        assert_eq!(k.current(), b);
        assert_eq!(k.thread_state(a).unwrap(), ThreadState::Ready);
    }

    #[test]
    fn test_time_slice_rotation() {
        let mut k = Kernel::new(SoftwarePort::new(), KernelConfig::testing().with_time_slice(2));
        let a = k.create(Context::Thread, params("a", 5)).unwrap();
        let b = k.create(Context::Thread, params("b", 5)).unwrap();
        k.start().unwrap();
        assert_eq!(k.current(), a);

        k.tick(1).unwrap();
        assert_eq!(k.next_staged(), None);
        k.tick(1).unwrap();
        assert_eq!(k.next_staged(), Some(b));
        assert_eq!(k.port().pends, 1);
        k.dispatch_staged().unwrap();
        assert_eq!(k.current(), b);
    }

    #[test]
    fn test_threads_snapshot() {
        let mut k = Kernel::testing();
        k.start().unwrap();
        let a = spawn(&mut k, "a", 3);
        let b = k.create(Context::Thread, params("b", 1).suspended()).unwrap();
        let snap = k.threads();
        assert_eq!(snap.len(), 3);
        let find = |id| snap.iter().find(|i| i.id == id).unwrap();
        assert_eq!(find(a).state, ThreadState::Running);
        assert_eq!(find(a).dispatches, 1);
        assert_eq!(find(b).state, ThreadState::Suspended);
        assert_eq!(find(ThreadId::IDLE).state, ThreadState::Ready);
        assert_eq!(find(a).deadline, None);

        k.tick(3).unwrap();
        k.sleep(7).unwrap();
        let snap = k.threads();
        let a_info = snap.iter().find(|i| i.id == a).unwrap();
        assert_eq!(a_info.state, ThreadState::Blocked(BlockCause::Sleep));
        assert_eq!(a_info.deadline, Some(10));
    }

    #[test]
    fn test_invariants_catch_corruption() {
        let mut k = Kernel::testing();
        k.start().unwrap();
        let a = spawn(&mut k, "a", 3);
        k.create(Context::Thread, params("b", 6).suspended()).unwrap();
        k.check_invariants().unwrap();

        // Ready-queue member that claims to be blocked
        k.threads.get_mut(a).unwrap().ready = false;
        assert_eq!(k.check_invariants(), Err(Fatal::AlreadyLinked));
    }
}
