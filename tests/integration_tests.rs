//! End-to-end executive scenarios on the host port
//!
//! Author: Moroya Sakamoto

use alice_exec::{
    BlockCause, Context, Error, JoinStatus, Kernel, KernelCell, KernelConfig, LockStatus, MutexId,
    MutexKind, Priority, QueueId, SoftwarePort, StackRegion, ThreadId, ThreadParams, ThreadState,
    WaitOrder, WAKE_TIMEOUT,
};
use proptest::prelude::*;

const SEM: BlockCause = BlockCause::Wait("semaphore");

fn work(_: usize) -> i32 {
    0
}

fn spawn(k: &mut Kernel<SoftwarePort>, name: &str, prio: u8) -> ThreadId {
    k.create(Context::Thread, ThreadParams::new(name, work, StackRegion::new(0x8000, 2048), prio))
        .unwrap()
}

fn prio(level: u8) -> Priority {
    Priority::new(level).unwrap()
}

#[test]
fn test_block_falls_to_idle_then_wake_resumes_low() {
    let mut k = Kernel::testing();
    let sem = k.create_wait_queue().unwrap();
    let low = spawn(&mut k, "low", 1);
    let params = ThreadParams::new("high", work, StackRegion::new(0x9000, 2048), 10).suspended();
    let high = k.create(Context::Thread, params).unwrap();
    k.start().unwrap();
    assert_eq!(k.current(), low);

    k.block(SEM, Some(sem), WaitOrder::Fifo).unwrap();
    assert_eq!(k.current(), ThreadId::IDLE);
    assert_eq!(k.ready_mask(), 0);

    // Another context (an interrupt here) signals the semaphore
    assert!(k.wake(Context::Interrupt, low, Some(SEM), 1).unwrap());
    k.dispatch_staged().unwrap();
    assert_eq!(k.current(), low);
    assert_eq!(k.wake_value(low).unwrap(), 1);
    assert_eq!(k.thread_state(high).unwrap(), ThreadState::Suspended);
    k.check_invariants().unwrap();
}

#[test]
fn test_mutex_inheritance_round_trip() {
    let mut k = Kernel::testing();
    k.start().unwrap();
    let m = k.mutex_create(MutexKind::Inherit).unwrap();

    let low = spawn(&mut k, "low", 1);
    assert_eq!(k.mutex_lock(m).unwrap(), LockStatus::Acquired);

    let high = spawn(&mut k, "high", 10);
    assert_eq!(k.mutex_lock(m).unwrap(), LockStatus::Blocked);
    assert_eq!(k.priority(low).unwrap(), prio(10));
    assert_eq!(k.current(), low);

    // A mid-priority thread becoming ready must not overtake the owner
    let mid = spawn(&mut k, "mid", 5);
    assert_eq!(k.current(), low);

    k.mutex_unlock(m).unwrap();
    assert_eq!(k.current(), high);
    assert_eq!(k.priority(low).unwrap(), prio(1));
    assert_eq!(k.mutex_owner(m).unwrap(), Some(high));

    // High finishes with the lock; mid runs before low
    k.mutex_unlock(m).unwrap();
    k.exit(0).unwrap();
    assert_eq!(k.current(), mid);
    k.check_invariants().unwrap();
}

#[test]
fn test_exit_reaches_every_joiner() {
    let mut k = Kernel::testing();
    k.start().unwrap();
    let worker = spawn(&mut k, "worker", 2);

    let j1 = spawn(&mut k, "j1", 4);
    assert_eq!(k.join(worker).unwrap(), JoinStatus::Waiting);
    let j2 = spawn(&mut k, "j2", 4);
    assert_eq!(k.join(worker).unwrap(), JoinStatus::Waiting);
    assert_eq!(k.current(), worker);

    k.exit(42).unwrap();
    // Equal priority joiners wake in join order
    assert_eq!(k.current(), j1);
    assert_eq!(k.wake_value(j1).unwrap(), 42);
    assert_eq!(k.wake_value(j2).unwrap(), 42);
    assert_eq!(k.thread_state(j2).unwrap(), ThreadState::Ready);

    let before = k.switch_count();
    let _j3 = spawn(&mut k, "j3", 9);
    assert_eq!(k.join(worker).unwrap(), JoinStatus::Exited(42));
    assert_eq!(k.switch_count(), before + 1);
}

#[test]
fn test_equal_priority_round_robin() {
    let mut k = Kernel::testing();
    let a = spawn(&mut k, "a", 5);
    let b = spawn(&mut k, "b", 5);
    let c = spawn(&mut k, "c", 5);
    k.start().unwrap();

    let mut order = Vec::new();
    for _ in 0..6 {
        order.push(k.current());
        k.yield_now(Context::Thread).unwrap();
    }
    assert_eq!(order, vec![a, b, c, a, b, c]);
}

#[test]
fn test_time_slice_from_tick_interrupt() {
    let mut k = Kernel::new(SoftwarePort::new(), KernelConfig::testing().with_time_slice(1));
    let a = k.create(Context::Thread, ThreadParams::new("a", work, StackRegion::EMPTY, 5)).unwrap();
    let b = k.create(Context::Thread, ThreadParams::new("b", work, StackRegion::EMPTY, 5)).unwrap();
    k.start().unwrap();

    let mut order = Vec::new();
    for _ in 0..4 {
        order.push(k.current());
        k.tick(1).unwrap();
        assert!(k.dispatch_staged().unwrap());
    }
    assert_eq!(order, vec![a, b, a, b]);
}

#[test]
fn test_interrupt_wake_is_staged_until_epilogue() {
    let mut k = Kernel::testing();
    k.start().unwrap();
    let rx = k.create_wait_queue().unwrap();
    let handler = spawn(&mut k, "handler", 8);
    k.block(BlockCause::Wait("rx"), Some(rx), WaitOrder::Fifo).unwrap();
    let busy = spawn(&mut k, "busy", 2);
    assert_eq!(k.current(), busy);

    // ISR body
    {
        let guard = k
            .wake_all_in_queue(Context::Interrupt, rx, Some(BlockCause::Wait("rx")), 64)
            .unwrap();
        assert_eq!(guard.next_staged(), None);
        assert_eq!(guard.queue_len(rx).unwrap(), 0);
    }
    assert_eq!(k.current(), busy);
    assert_eq!(k.next_staged(), Some(handler));
    assert_eq!(k.port().pends, 1);

    // ISR epilogue
    assert!(k.dispatch_staged().unwrap());
    assert_eq!(k.current(), handler);
    assert_eq!(k.wake_value(handler).unwrap(), 64);
}

#[test]
fn test_timeout_races_real_wake() {
    let mut k = Kernel::testing();
    k.start().unwrap();
    let sem = k.create_wait_queue().unwrap();
    let waiter = spawn(&mut k, "waiter", 3);
    k.block_timeout(SEM, Some(sem), WaitOrder::Fifo, 5).unwrap();

    // The event arrives first
    assert!(k.wake(Context::Interrupt, waiter, Some(SEM), 9).unwrap());
    k.dispatch_staged().unwrap();
    k.tick(10).unwrap();
    assert_eq!(k.wake_value(waiter).unwrap(), 9);
    assert_eq!(k.next_staged(), None);

    // Now let the deadline win
    k.block_timeout(SEM, Some(sem), WaitOrder::Fifo, 5).unwrap();
    k.tick(5).unwrap();
    assert!(!k.wake(Context::Interrupt, waiter, Some(SEM), 9).unwrap());
    k.dispatch_staged().unwrap();
    assert_eq!(k.current(), waiter);
    assert_eq!(k.wake_value(waiter).unwrap(), WAKE_TIMEOUT);
    assert_eq!(k.queue_len(sem).unwrap(), 0);
}

#[test]
fn test_block_twice_rejected() {
    let mut k = Kernel::testing();
    k.start().unwrap();
    let t = spawn(&mut k, "t", 4);
    k.suspend(Context::Interrupt, t).unwrap();
    assert_eq!(k.block(SEM, None, WaitOrder::Fifo), Err(Error::AlreadyBlocked));
    assert_eq!(k.thread_state(t).unwrap(), ThreadState::Suspended);
}

#[test]
fn test_kernel_cell_from_thread_and_isr() {
    static KERNEL: KernelCell<SoftwarePort> = KernelCell::new();
    KERNEL.init(Kernel::testing()).unwrap();

    let (sem, t) = KERNEL
        .with(|k| -> Result<(QueueId, ThreadId), Error> {
            k.start()?;
            let sem = k.create_wait_queue()?;
            let t = k.create(Context::Thread, ThreadParams::new("t", work, StackRegion::EMPTY, 3))?;
            k.block(SEM, Some(sem), WaitOrder::Priority)?;
            Ok((sem, t))
        })
        .unwrap()
        .unwrap();

    KERNEL
        .with(|k| {
            k.wake(Context::Interrupt, t, Some(SEM), 0)?;
            k.dispatch_staged()
        })
        .unwrap()
        .unwrap();
    assert_eq!(KERNEL.with(|k| k.current()).unwrap(), t);
    assert_eq!(KERNEL.with(|k| k.queue_len(sem)).unwrap(), Ok(0));
}

// ----------------------------------------------------------------------
// Random operation sequences
// ----------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Op {
    Create(u8),
    Block(usize, bool),
    Wake(usize, bool),
    SetPriority(usize, u8, bool),
    Yield,
    Suspend(usize, bool),
    Resume(usize, bool),
    Abort(usize),
    Lock(usize),
    LockTimeout(usize, u64),
    Unlock(usize),
    Sleep(u64),
    Tick(u64),
    Dispatch,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..32).prop_map(Op::Create),
        (0usize..3, any::<bool>()).prop_map(|(q, p)| Op::Block(q, p)),
        (0usize..3, any::<bool>()).prop_map(|(q, i)| Op::Wake(q, i)),
        (0usize..16, 0u8..32, any::<bool>()).prop_map(|(t, p, i)| Op::SetPriority(t, p, i)),
        Just(Op::Yield),
        (0usize..16, any::<bool>()).prop_map(|(t, i)| Op::Suspend(t, i)),
        (0usize..16, any::<bool>()).prop_map(|(t, i)| Op::Resume(t, i)),
        (0usize..16).prop_map(Op::Abort),
        (0usize..3).prop_map(Op::Lock),
        (0usize..3, 1u64..8).prop_map(|(m, d)| Op::LockTimeout(m, d)),
        (0usize..3).prop_map(Op::Unlock),
        (0u64..6).prop_map(Op::Sleep),
        (1u64..4).prop_map(Op::Tick),
        Just(Op::Dispatch),
    ]
}

fn ctx(isr: bool) -> Context {
    if isr {
        Context::Interrupt
    } else {
        Context::Thread
    }
}

struct World {
    threads: Vec<ThreadId>,
    queues: Vec<QueueId>,
    mutexes: Vec<MutexId>,
}

impl World {
    fn new(k: &mut Kernel<SoftwarePort>) -> Self {
        let queues = (0..3).map(|_| k.create_wait_queue().unwrap()).collect();
        let mutexes = [
            MutexKind::Plain,
            MutexKind::Inherit,
            MutexKind::Ceiling(prio(20)),
        ]
        .into_iter()
        .map(|kind| k.mutex_create(kind).unwrap())
        .collect();
        Self { threads: Vec::new(), queues, mutexes }
    }

    fn thread(&self, i: usize) -> Option<ThreadId> {
        if self.threads.is_empty() {
            None
        } else {
            Some(self.threads[i % self.threads.len()])
        }
    }
}

fn apply(k: &mut Kernel<SoftwarePort>, w: &mut World, op: &Op) -> Result<(), Error> {
    match *op {
        Op::Create(p) => {
            let t = k.create(Context::Thread, ThreadParams::new("p", work, StackRegion::EMPTY, p))?;
            w.threads.push(t);
        }
        Op::Block(q, by_prio) => {
            let order = if by_prio { WaitOrder::Priority } else { WaitOrder::Fifo };
            k.block(SEM, Some(w.queues[q]), order)?;
        }
        Op::Wake(q, isr) => {
            if let Some(t) = k.queue_head(w.queues[q])? {
                k.wake(ctx(isr), t, Some(SEM), 0)?;
            }
        }
        Op::SetPriority(i, p, isr) => {
            if let Some(t) = w.thread(i) {
                k.set_priority(ctx(isr), t, p)?;
            }
        }
        Op::Yield => k.yield_now(Context::Thread)?,
        Op::Suspend(i, isr) => {
            if let Some(t) = w.thread(i) {
                k.suspend(ctx(isr), t)?;
            }
        }
        Op::Resume(i, isr) => {
            if let Some(t) = w.thread(i) {
                k.resume(ctx(isr), t)?;
            }
        }
        Op::Abort(i) => {
            if let Some(t) = w.thread(i) {
                k.abort(Context::Interrupt, t, -2)?;
            }
        }
        Op::Lock(m) => {
            k.mutex_lock(w.mutexes[m])?;
        }
        Op::LockTimeout(m, d) => {
            k.mutex_lock_timeout(w.mutexes[m], d)?;
        }
        Op::Unlock(m) => k.mutex_unlock(w.mutexes[m])?,
        Op::Sleep(d) => k.sleep(d)?,
        Op::Tick(d) => k.tick(d)?,
        Op::Dispatch => {
            k.dispatch_staged()?;
        }
    }
    Ok(())
}

proptest! {
    #[test]
    fn prop_random_operations_keep_invariants(ops in prop::collection::vec(op(), 1..150)) {
        let mut k = Kernel::testing();
        k.start().unwrap();
        let mut w = World::new(&mut k);

        for op in &ops {
            if let Err(e) = apply(&mut k, &mut w, op) {
                prop_assert!(!e.is_fatal(), "{:?} raised {:?}", op, e);
            }
            prop_assert_eq!(k.check_invariants(), Ok(()));
            prop_assert_eq!(k.lock_depth(), 0);

            // With nothing staged the CPU belongs to the highest ready thread
            if k.next_staged().is_none() {
                let best = k
                    .threads()
                    .iter()
                    .filter(|t| !t.id.is_idle())
                    .filter(|t| matches!(t.state, ThreadState::Ready | ThreadState::Running))
                    .map(|t| t.priority)
                    .max();
                match best {
                    Some(p) => {
                        prop_assert_eq!(k.priority(k.current()).unwrap(), p);
                        prop_assert_eq!(k.thread_state(k.current()).unwrap(), ThreadState::Running);
                    }
                    None => prop_assert_eq!(k.current(), ThreadId::IDLE),
                }
            }
        }
        prop_assert!(k.port().fatals.is_empty());
    }
}
