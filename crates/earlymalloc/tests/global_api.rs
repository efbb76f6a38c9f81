//! The process-wide entry points.
//!
//! Tests that depend on a fresh process (nothing initialized yet, or fork
//! handlers disabled) run as child copies of this binary, selected through
//! `EARLYMALLOC_API_SCENARIO`; the child exits 0 on success.

use std::process::Command;

const SCENARIO_VAR: &str = "EARLYMALLOC_API_SCENARIO";

fn run_subprocess(scenario_name: &str, extra_env: &[(&str, &str)]) {
    let exe = std::env::current_exe().expect("cannot determine test binary path");
    let mut cmd = Command::new(&exe);
    cmd.env(SCENARIO_VAR, scenario_name)
        .arg("--exact")
        .arg("scenario_driver")
        .arg("--nocapture")
        .env("RUST_TEST_THREADS", "1");
    for (key, value) in extra_env {
        cmd.env(key, value);
    }
    let output = cmd.output().expect("failed to spawn subprocess");
    assert!(
        output.status.success(),
        "scenario '{}' failed: {:?}\nstderr:\n{}",
        scenario_name,
        output.status,
        String::from_utf8_lossy(&output.stderr)
    );
}

#[test]
fn scenario_driver() {
    let scenario = match std::env::var(SCENARIO_VAR) {
        Ok(s) => s,
        Err(_) => return,
    };
    match scenario.as_str() {
        "queries_before_init" => scenario_queries_before_init(),
        "configured_arena_size" => scenario_configured_arena_size(),
        "manual_lock_across_fork" => scenario_manual_lock_across_fork(),
        _ => panic!("unknown scenario: {}", scenario),
    }
}

fn scenario_queries_before_init() {
    let mut local = [0u8; 16];
    assert!(!earlymalloc::is_initialized());
    assert!(!earlymalloc::owns(local.as_mut_ptr()));
    assert_eq!(earlymalloc::alloc_size(local.as_ptr()), 0);
    assert_eq!(earlymalloc::zone_base(), None);
    assert_eq!(earlymalloc::statistics(), earlymalloc::ZoneStatistics::default());
    unsafe { earlymalloc::free(std::ptr::null_mut()) };

    // The first allocation initializes.
    let p = earlymalloc::alloc(24).unwrap();
    assert!(earlymalloc::is_initialized());
    assert_eq!(earlymalloc::alloc_size(p.as_ptr()), 32);
}

fn scenario_configured_arena_size() {
    earlymalloc::initialize();
    let stats = earlymalloc::statistics();
    let base = earlymalloc::zone_base().unwrap().as_ptr() as usize;
    let reader = unsafe { earlymalloc::introspect::LocalReader::new() };
    let snapshot = earlymalloc::introspect::ZoneSnapshot::capture(&reader, base).unwrap();
    assert_eq!(snapshot.layout().storage_size(), 256 * 1024);
    assert!(stats.size_allocated >= 256 * 1024);
    assert!(!earlymalloc::hardening::fork::is_registered());
}

fn scenario_manual_lock_across_fork() {
    let p = earlymalloc::alloc(64).unwrap();
    earlymalloc::lock();
    let pid = unsafe { libc::fork() };
    assert!(pid >= 0, "fork failed");
    if pid == 0 {
        // Child: the copied lock is held; reset it before using the arena.
        unsafe { earlymalloc::reinit_lock() };
        let ok = match earlymalloc::alloc(128) {
            Some(q) => {
                unsafe { earlymalloc::free(q.as_ptr()) };
                earlymalloc::alloc_size(p.as_ptr()) == 64
            }
            None => false,
        };
        unsafe { libc::_exit(if ok { 0 } else { 1 }) };
    }
    unsafe { earlymalloc::unlock() };
    assert_eq!(wait_for(pid), 0);
    unsafe { earlymalloc::free(p.as_ptr()) };
}

fn wait_for(pid: libc::pid_t) -> libc::c_int {
    let mut status = 0;
    let rc = unsafe { libc::waitpid(pid, &mut status, 0) };
    assert_eq!(rc, pid);
    assert!(libc::WIFEXITED(status), "child did not exit normally");
    libc::WEXITSTATUS(status)
}

#[test]
fn queries_before_initialization() {
    run_subprocess("queries_before_init", &[]);
}

#[test]
fn arena_size_from_environment() {
    run_subprocess(
        "configured_arena_size",
        &[("EARLYMALLOC_ARENA_SIZE", "262144"), ("EARLYMALLOC_NO_ATFORK", "1")],
    );
}

#[test]
fn manual_lock_survives_fork() {
    run_subprocess("manual_lock_across_fork", &[("EARLYMALLOC_NO_ATFORK", "1")]);
}

#[test]
fn initialize_is_idempotent() {
    let first = earlymalloc::initialize() as *const earlymalloc::Arena;
    let second = earlymalloc::initialize() as *const earlymalloc::Arena;
    assert_eq!(first, second);
    assert!(earlymalloc::is_initialized());
    assert!(earlymalloc::zone_base().is_some());
}

#[test]
fn alloc_free_round_trip() {
    let p = earlymalloc::alloc(100).unwrap();
    assert_eq!(p.as_ptr() as usize % earlymalloc::QUANTUM, 0);
    assert!(earlymalloc::owns(p.as_ptr()));
    assert_eq!(earlymalloc::alloc_size(p.as_ptr()), 112);
    let bytes = unsafe { std::slice::from_raw_parts_mut(p.as_ptr(), 112) };
    assert!(bytes.iter().all(|&b| b == 0));
    bytes.fill(0x5A);
    unsafe { earlymalloc::free(p.as_ptr()) };
}

#[test]
fn oversized_requests_fall_through() {
    assert!(earlymalloc::alloc(earlymalloc::MAX_ALLOC_SIZE + 1).is_none());
    let p = earlymalloc::alloc(earlymalloc::MAX_ALLOC_SIZE).unwrap();
    unsafe { earlymalloc::free(p.as_ptr()) };
}

#[test]
fn foreign_pointers_are_not_owned() {
    earlymalloc::initialize();
    let local = 0u64;
    let heap = Box::new(0u64);
    assert!(!earlymalloc::owns((&local as *const u64).cast()));
    assert!(!earlymalloc::owns((&*heap as *const u64).cast()));
    assert_eq!(earlymalloc::alloc_size((&*heap as *const u64).cast()), 0);
}

#[test]
fn fork_child_can_allocate() {
    let p = earlymalloc::alloc(64).unwrap();
    assert!(earlymalloc::hardening::fork::is_registered());
    let pid = unsafe { libc::fork() };
    assert!(pid >= 0, "fork failed");
    if pid == 0 {
        let ok = match earlymalloc::alloc(256) {
            Some(q) => {
                unsafe { earlymalloc::free(q.as_ptr()) };
                earlymalloc::alloc_size(p.as_ptr()) == 64
            }
            None => false,
        };
        unsafe { libc::_exit(if ok { 0 } else { 1 }) };
    }
    assert_eq!(wait_for(pid), 0);
    unsafe { earlymalloc::free(p.as_ptr()) };
}
