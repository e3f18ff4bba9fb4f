mod common;

use common::*;
use lifetime_bridge::engine::{EngineParams, EngineRequest};
use lifetime_bridge::event::DeferredAction;
use lifetime_bridge::gc::{ClassCounters, ClassDefinition};
use lifetime_bridge::{
    BridgeConfig, CounterBank, CounterId, EventKind, EventLoopError, EventLoopStatus, GlobalFlag,
    LoopEvent, LoopState, Priority,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;

#[test]
fn test_require_before_run_is_not_running() {
    let (manager, _host) = new_manager();

    assert_eq!(manager.require_event_loop(), Err(EventLoopError::NotRunning));
    assert_eq!(manager.lease_count(), 0);
    assert!(!manager.has_owner());
}

#[test]
fn test_run_until_last_release() {
    let (manager, host) = new_manager();
    let starts = Arc::new(AtomicUsize::new(0));
    let jobs = Arc::new(AtomicUsize::new(0));

    let m = Arc::clone(&manager);
    let starts_clone = Arc::clone(&starts);
    let start = callback(move || {
        starts_clone.fetch_add(1, Ordering::SeqCst);
        assert!(m.is_event_thread());
        assert_eq!(m.loop_state(), LoopState::Running);
        assert_eq!(m.lease_count(), 1);

        m.require_event_loop().unwrap();
        assert_eq!(m.lease_count(), 2);
        m.release_event_loop();
        assert_eq!(m.posted_count(EventKind::Stop), 0);
        m.release_event_loop();
        assert_eq!(m.loop_state(), LoopState::Stopping);
        // Reaching zero leases queues exactly one Stop
        assert_eq!(m.posted_count(EventKind::Stop), 1);
    });

    let result = manager.run_event_loop(start, counting(&jobs), None);

    assert_eq!(result, Ok(()));
    assert_eq!(starts.load(Ordering::SeqCst), 1);
    // Started always runs the jobs callback once
    assert_eq!(jobs.load(Ordering::SeqCst), 1);
    assert_eq!(manager.loop_state(), LoopState::Stopped);
    assert_eq!(manager.lease_count(), 0);
    assert_eq!(host.callbacks_freed(), 2);
    assert_eq!(manager.require_event_loop(), Err(EventLoopError::NotRunning));
}

#[test]
fn test_lease_from_other_thread() {
    let (manager, _host) = new_manager();
    let (jobs_tx, jobs_rx) = mpsc::channel::<()>();
    let jobs_tx = std::sync::Mutex::new(jobs_tx);
    let jobs = callback(move || {
        let _ = jobs_tx.lock().unwrap().send(());
    });

    let m = Arc::clone(&manager);
    let worker_handle = Arc::new(std::sync::Mutex::new(None));
    let worker_slot = Arc::clone(&worker_handle);
    let jobs_rx = Arc::new(std::sync::Mutex::new(Some(jobs_rx)));

    let start = callback(move || {
        let (acquired_tx, acquired_rx) = mpsc::channel();
        let worker_manager = Arc::clone(&m);
        let jobs_rx = jobs_rx.lock().unwrap().take().unwrap();

        let handle = std::thread::spawn(move || {
            assert!(!worker_manager.is_event_thread());
            worker_manager.require_event_loop().unwrap();
            acquired_tx.send(()).unwrap();

            // One jobs call from Started, one from the notification
            jobs_rx.recv().unwrap();
            worker_manager.notify_pending_jobs();
            jobs_rx.recv().unwrap();

            worker_manager.release_event_loop();
        });

        acquired_rx.recv().unwrap();
        m.release_event_loop();
        *worker_slot.lock().unwrap() = Some(handle);
    });

    assert_eq!(manager.run_event_loop(start, jobs, None), Ok(()));

    let handle = worker_handle.lock().unwrap().take().unwrap();
    handle.join().unwrap();
    assert_eq!(manager.lease_count(), 0);
}

#[test]
fn test_notify_coalesces() {
    let (manager, _host) = new_manager();
    let jobs = Arc::new(AtomicUsize::new(0));

    let m = Arc::clone(&manager);
    let start = callback(move || {
        m.notify_pending_jobs();
        m.notify_pending_jobs();
        m.notify_pending_jobs();
    });

    let m = Arc::clone(&manager);
    let jobs_clone = Arc::clone(&jobs);
    let jobs_cb = callback(move || {
        if jobs_clone.fetch_add(1, Ordering::SeqCst) == 1 {
            m.release_event_loop();
        }
    });

    assert_eq!(manager.run_event_loop(start, jobs_cb, None), Ok(()));
    assert_eq!(jobs.load(Ordering::SeqCst), 2);
}

#[test]
fn test_notify_without_lease_is_dropped() {
    let (manager, _host) = new_manager();
    run_once(&manager);

    manager.notify_pending_jobs();

    let jobs = Arc::new(AtomicUsize::new(0));
    manager
        .run_event_loop(release_on_start(&manager), counting(&jobs), None)
        .unwrap();
    assert_eq!(jobs.load(Ordering::SeqCst), 1);
}

#[test]
fn test_second_run_while_running() {
    let (manager, host) = new_manager();
    let nested = Arc::new(std::sync::Mutex::new(None));

    let m = Arc::clone(&manager);
    let nested_clone = Arc::clone(&nested);
    let start = callback(move || {
        *nested_clone.lock().unwrap() = Some(m.run_event_loop(noop(), noop(), None));
        assert_eq!(m.lease_count(), 1);
        assert_eq!(m.loop_state(), LoopState::Running);

        let other = Arc::clone(&m);
        let from_other = std::thread::spawn(move || other.run_event_loop(noop(), noop(), None))
            .join()
            .unwrap();
        assert_eq!(from_other, Err(EventLoopError::AlreadyRunning));
        assert_eq!(m.lease_count(), 1);
        assert_eq!(m.loop_state(), LoopState::Running);

        m.release_event_loop();
    });

    assert_eq!(manager.run_event_loop(start, noop(), None), Ok(()));
    assert_eq!(
        *nested.lock().unwrap(),
        Some(Err(EventLoopError::AlreadyRunning))
    );
    // Two refused runs and the real one each gave back start and jobs
    assert_eq!(host.callbacks_freed(), 6);
}

#[test]
fn test_run_from_other_thread_after_owner_exists() {
    let (manager, _host) = new_manager();
    run_once(&manager);

    let other = Arc::clone(&manager);
    let result = std::thread::spawn(move || other.run_event_loop(noop(), noop(), None))
        .join()
        .unwrap();

    assert_eq!(result, Err(EventLoopError::WrongThread));
    assert_eq!(EventLoopStatus::from(result), EventLoopStatus::WrongThread);

    // The owning thread can run again
    run_once(&manager);
}

#[test]
fn test_shutdown_lifecycle() {
    let (manager, host) = new_manager();

    let m = Arc::clone(&manager);
    let during = Arc::new(std::sync::Mutex::new(None));
    let during_clone = Arc::clone(&during);
    let start = callback(move || {
        *during_clone.lock().unwrap() = Some(m.shutdown());
        m.release_event_loop();
    });
    manager.run_event_loop(start, noop(), None).unwrap();
    assert_eq!(
        *during.lock().unwrap(),
        Some(Err(EventLoopError::AlreadyRunning))
    );

    let other = Arc::clone(&manager);
    let from_other = std::thread::spawn(move || other.shutdown()).join().unwrap();
    assert_eq!(from_other, Err(EventLoopError::WrongThread));

    assert_eq!(manager.shutdown(), Ok(()));
    assert!(!manager.has_owner());
    assert_eq!(manager.loop_state(), LoopState::Shutdown);
    assert!(!manager.is_event_thread());

    let freed_before = host.callbacks_freed();
    assert_eq!(
        manager.run_event_loop(noop(), noop(), Some(noop())),
        Err(EventLoopError::PostShutdown)
    );
    assert_eq!(host.callbacks_freed(), freed_before + 3);

    assert!(!manager.set_args(vec!["late".into()]));
    assert!(!manager.set_flag(GlobalFlag::EnableQmlDebug, true));
    assert_eq!(manager.shutdown(), Ok(()));
    assert_eq!(manager.require_event_loop(), Err(EventLoopError::NotRunning));
}

#[test]
fn test_shutdown_from_any_thread_without_owner() {
    let (manager, _host) = new_manager();

    let other = Arc::clone(&manager);
    let result = std::thread::spawn(move || other.shutdown()).join().unwrap();

    assert_eq!(result, Ok(()));
    // Without an owner shutdown is not terminal
    assert_eq!(manager.loop_state(), LoopState::Stopped);
    run_once(&manager);
}

#[test]
fn test_args_consumed_by_owner() {
    let (manager, _host) = new_manager();
    let args: Vec<String> = ["app", "-platform", "offscreen", "scene.qml", "-reverse"]
        .iter()
        .map(|s| s.to_string())
        .collect();

    assert!(manager.set_args(args));
    assert!(manager.set_flag(GlobalFlag::ShareOpenGLContexts, true));
    run_once(&manager);

    assert_eq!(manager.args(), vec!["app".to_string(), "scene.qml".to_string()]);
    let options = manager.toolkit_options().unwrap();
    assert_eq!(options.platform.as_deref(), Some("offscreen"));
    assert!(options.reverse_layout);
    assert_eq!(manager.args_count(), 2);
    assert!(!manager.set_args(vec!["other".into()]));
    assert!(!manager.set_flag(GlobalFlag::ShareOpenGLContexts, false));
    assert!(manager.flag(GlobalFlag::ShareOpenGLContexts));
}

#[test]
fn test_idle_callback_runs_on_empty_queue() {
    let (manager, host) = new_manager();
    let ticks = Arc::new(AtomicUsize::new(0));

    let m = Arc::clone(&manager);
    let ticks_clone = Arc::clone(&ticks);
    let idle = callback(move || {
        assert!(m.is_event_thread());
        if ticks_clone.fetch_add(1, Ordering::SeqCst) == 4 {
            m.release_event_loop();
        }
    });

    assert_eq!(manager.run_event_loop(noop(), noop(), Some(idle)), Ok(()));
    assert!(ticks.load(Ordering::SeqCst) >= 5);
    assert_eq!(host.callbacks_freed(), 3);
}

#[test]
fn test_release_without_lease_is_ignored() {
    let (manager, _host) = new_manager();

    manager.release_event_loop();
    manager.release_event_loop();
    assert_eq!(manager.lease_count(), 0);
    run_once(&manager);
    assert_eq!(manager.lease_count(), 0);
}

#[test]
fn test_interrupt_with_zero_reenters() {
    let (manager, _host) = new_manager();
    let jobs = Arc::new(AtomicUsize::new(0));

    let m = Arc::clone(&manager);
    let start = callback(move || {
        m.post_event(LoopEvent::CreateEngine(EngineRequest {
            proxy: TestEngineProxy::alive(),
            params: EngineParams::default(),
            stop_cb: noop(),
        }));

        let interrupter = Arc::clone(&m);
        m.post_event(LoopEvent::DeferredDelete(DeferredAction::new(
            "interrupt",
            move || {
                assert_eq!(interrupter.counters().get(CounterId::EngineCount), 1);
                assert!(interrupter.interrupt_event_loop(0));
                interrupter.notify_pending_jobs();
            },
        )));
    });

    let m = Arc::clone(&manager);
    let jobs_clone = Arc::clone(&jobs);
    let jobs_cb = callback(move || {
        if jobs_clone.fetch_add(1, Ordering::SeqCst) == 1 {
            // Dispatch was re-entered, tearing down the engine on the way
            assert_eq!(m.counters().get(CounterId::EngineCount), 0);
            assert_eq!(m.lease_count(), 1);
            m.release_event_loop();
        }
    });

    assert_eq!(manager.run_event_loop(start, jobs_cb, None), Ok(()));
    assert_eq!(jobs.load(Ordering::SeqCst), 2);
}

#[test]
fn test_interrupt_with_error_code() {
    let (manager, host) = new_manager();

    let m = Arc::clone(&manager);
    let start = callback(move || {
        m.notify_pending_jobs();
        assert!(m.interrupt_event_loop(3));
    });
    let result = manager.run_event_loop(start, noop(), None);

    assert_eq!(result, Err(EventLoopError::Abnormal(3)));
    assert_eq!(EventLoopStatus::from(result), EventLoopStatus::OtherError);
    assert_eq!(manager.loop_state(), LoopState::Stopped);
    assert_eq!(manager.lease_count(), 0);
    assert_eq!(host.callbacks_freed(), 2);
    assert!(!manager.interrupt_event_loop(1));

    // Leftovers from the aborted run are gone
    let jobs = Arc::new(AtomicUsize::new(0));
    manager
        .run_event_loop(release_on_start(&manager), counting(&jobs), None)
        .unwrap();
    assert_eq!(jobs.load(Ordering::SeqCst), 1);
}

#[test]
fn test_interrupt_after_stop_does_not_leak_into_next_run() {
    let (manager, _host) = new_manager();
    let accepted = Arc::new(std::sync::Mutex::new(None));

    let m = Arc::clone(&manager);
    let accepted_clone = Arc::clone(&accepted);
    let start = callback(move || {
        m.release_event_loop();

        // Queued behind Stop, so it runs after dispatch has returned
        let late = Arc::clone(&m);
        let accepted = Arc::clone(&accepted_clone);
        m.post_event_with_priority(
            LoopEvent::DeferredDelete(DeferredAction::new("late interrupt", move || {
                assert_eq!(late.loop_state(), LoopState::Quitting);
                *accepted.lock().unwrap() = Some(late.interrupt_event_loop(3));
            })),
            Priority::Low,
        );
    });

    assert_eq!(manager.run_event_loop(start, noop(), None), Ok(()));
    assert_eq!(*accepted.lock().unwrap(), Some(false));

    let starts = Arc::new(AtomicUsize::new(0));
    let m = Arc::clone(&manager);
    let starts_clone = Arc::clone(&starts);
    let start = callback(move || {
        starts_clone.fetch_add(1, Ordering::SeqCst);
        m.release_event_loop();
    });

    assert_eq!(manager.run_event_loop(start, noop(), None), Ok(()));
    assert_eq!(starts.load(Ordering::SeqCst), 1);
}

#[test]
fn test_create_engine_events() {
    let (manager, host) = new_manager();
    let live_stops = Arc::new(AtomicUsize::new(0));
    let dead_stops = Arc::new(AtomicUsize::new(0));

    let m = Arc::clone(&manager);
    let live = counting(&live_stops);
    let dead = counting(&dead_stops);
    let pending = std::sync::Mutex::new(Some((live, dead)));
    let start = callback(move || {
        let (live, dead) = pending.lock().unwrap().take().unwrap();

        assert!(m.post_event(LoopEvent::CreateEngine(EngineRequest {
            proxy: TestEngineProxy::alive(),
            params: EngineParams {
                init_url: "qrc:/main.qml".into(),
                ..EngineParams::default()
            },
            stop_cb: live,
        })));
        assert!(m.post_event(LoopEvent::CreateEngine(EngineRequest {
            proxy: TestEngineProxy::dead(),
            params: EngineParams::default(),
            stop_cb: dead,
        })));

        let checker = Arc::clone(&m);
        assert!(m.post_event(LoopEvent::DeferredDelete(DeferredAction::new(
            "check-engines",
            move || {
                assert_eq!(checker.counters().get(CounterId::EngineCount), 1);
                checker.set_active_engine(Some(lifetime_bridge::engine::EngineId(0)));
                checker.release_event_loop();
            },
        ))));
    });

    assert_eq!(manager.run_event_loop(start, noop(), None), Ok(()));

    assert_eq!(live_stops.load(Ordering::SeqCst), 1);
    assert_eq!(dead_stops.load(Ordering::SeqCst), 1);
    assert_eq!(manager.counters().get(CounterId::EngineCount), 0);
    assert_eq!(manager.counters().get(CounterId::EngineSerial), 1);
    // Destroying the active engine clears the slot
    assert_eq!(manager.active_engine(), None);
    // start, jobs and both stop callbacks
    assert_eq!(host.callbacks_freed(), 4);
}

#[test]
fn test_post_event_without_owner() {
    let (manager, host) = new_manager();
    let stops = Arc::new(AtomicUsize::new(0));

    let posted = manager.post_event(LoopEvent::CreateEngine(EngineRequest {
        proxy: TestEngineProxy::alive(),
        params: EngineParams::default(),
        stop_cb: counting(&stops),
    }));

    assert!(!posted);
    assert_eq!(stops.load(Ordering::SeqCst), 0);
    assert_eq!(host.callbacks_freed(), 1);
    assert!(!manager.post_event(LoopEvent::PendingJobs));
}

struct ZombieClass {
    _counters: ClassCounters,
}

impl ZombieClass {
    fn new(counters: &Arc<CounterBank>) -> Box<dyn ClassDefinition> {
        Box::new(Self {
            _counters: ClassCounters::new(counters),
        })
    }
}

impl ClassDefinition for ZombieClass {
    fn name(&self) -> &str {
        "ZombieClass"
    }
}

#[test]
fn test_zombies_live_until_shutdown() {
    let (manager, _host) = new_manager();
    let counters = Arc::clone(manager.counters());

    run_once(&manager);
    manager.zombify(ZombieClass::new(&counters));
    manager.zombify(ZombieClass::new(&counters));
    assert_eq!(counters.get(CounterId::ClassCount), 2);

    run_once(&manager);
    assert_eq!(counters.get(CounterId::ClassCount), 2);

    manager.shutdown().unwrap();
    assert_eq!(counters.get(CounterId::ClassCount), 0);

    // After shutdown there is no owner to defer to
    manager.zombify(ZombieClass::new(&counters));
    assert_eq!(counters.get(CounterId::ClassCount), 0);
    assert_eq!(counters.get(CounterId::ClassSerial), 3);
}

#[test]
fn test_window_icon() {
    let (manager, _host) = new_manager();
    let icon = std::env::temp_dir().join(format!("bridge-icon-{}.png", std::process::id()));
    std::fs::write(&icon, b"png").unwrap();

    assert!(!manager.set_window_icon(&icon));
    run_once(&manager);

    assert!(manager.set_window_icon(&icon));
    assert_eq!(manager.window_icon(), Some(icon.clone()));
    assert!(!manager.set_window_icon(icon.with_extension("missing")));
    assert_eq!(manager.window_icon(), Some(icon.clone()));

    std::fs::remove_file(&icon).unwrap();
}

#[test]
fn test_debug_port_in_use_is_not_fatal() {
    let blocker = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let config = BridgeConfig {
        debug_port: blocker.local_addr().unwrap().port(),
        ..BridgeConfig::default()
    };
    let (manager, _host) = new_manager_with(config);

    assert!(manager.set_flag(GlobalFlag::EnableQmlDebug, true));
    run_once(&manager);
    assert!(manager.flag(GlobalFlag::EnableQmlDebug));
    assert!(manager.debug_server_addr().is_none());
}

#[test]
fn test_debug_listener_serves_while_owner_lives() {
    let config = BridgeConfig {
        debug_port: 0,
        ..BridgeConfig::default()
    };
    let (manager, _host) = new_manager_with(config);
    assert!(manager.debug_server_addr().is_none());

    manager.set_flag(GlobalFlag::EnableQmlDebug, true);
    run_once(&manager);

    let addr = manager.debug_server_addr().unwrap();
    let mut stream = std::net::TcpStream::connect(addr).unwrap();
    let mut greeting = vec![0u8; lifetime_bridge::debug_server::DEBUG_BANNER.len()];
    std::io::Read::read_exact(&mut stream, &mut greeting).unwrap();
    assert_eq!(greeting, lifetime_bridge::debug_server::DEBUG_BANNER);

    manager.shutdown().unwrap();
    assert!(manager.debug_server_addr().is_none());
}
