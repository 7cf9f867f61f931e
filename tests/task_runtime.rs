use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use interceptor::error::InterceptorError;
use interceptor::task::{CancelToken, TaskRuntime, TaskStatus, WorkItem};

fn wait_for_end(runtime: &TaskRuntime, name: &str) -> String {
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut output = String::new();
    loop {
        let TaskStatus { running, output: chunk } = runtime.poll_status(name).unwrap();
        output.push_str(&chunk);
        if !running {
            return output;
        }
        assert!(Instant::now() < deadline, "{name} never finished");
        thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn duplicate_names_get_numeric_suffixes() {
    let runtime = TaskRuntime::new();
    let release = Arc::new(AtomicBool::new(false));

    let mut names = Vec::new();
    for _ in 0..3 {
        let release = Arc::clone(&release);
        let item = WorkItem::new(move |_out| {
            while !release.load(Ordering::Acquire) {
                thread::sleep(Duration::from_millis(2));
            }
            Ok(true)
        });
        names.push(runtime.start("scan", item).unwrap());
    }
    assert_eq!(names, ["scan", "scan_1", "scan_2"]);
    assert_eq!(runtime.list_tasks(), names);

    release.store(true, Ordering::Release);
    for name in &names {
        wait_for_end(&runtime, name);
    }
    assert!(runtime.list_tasks().is_empty());
}

#[test]
fn final_output_is_delivered_once() {
    let runtime = TaskRuntime::new();
    let name = runtime
        .start(
            "hello",
            WorkItem::new(|out| {
                out.line("first");
                out.write("second\n");
                Ok(true)
            }),
        )
        .unwrap();

    assert_eq!(wait_for_end(&runtime, &name), "first\nsecond\n");
    assert!(matches!(
        runtime.poll_status(&name),
        Err(InterceptorError::TaskNotFound(n)) if n == "hello"
    ));
}

#[test]
fn errors_and_panics_become_output() {
    let runtime = TaskRuntime::new();
    let failing = runtime
        .start(
            "failing",
            WorkItem::new(|_out| Err(InterceptorError::HostNotFound(4))),
        )
        .unwrap();
    let panicking = runtime
        .start("panicking", WorkItem::new(|_out| panic!("boom")))
        .unwrap();

    assert!(wait_for_end(&runtime, &failing).starts_with("error: "));
    let out = wait_for_end(&runtime, &panicking);
    assert!(out.contains("panicked"));
    assert!(out.contains("boom"));
}

#[test]
fn stop_reaches_stoppable_tasks_only() {
    let runtime = TaskRuntime::new();

    let token = CancelToken::new();
    let watched = token.clone();
    let stoppable = runtime
        .start(
            "watch",
            WorkItem::stoppable(token, move |out| {
                while !watched.is_cancelled() {
                    thread::sleep(Duration::from_millis(2));
                }
                out.line("stopped");
                Ok(false)
            }),
        )
        .unwrap();

    let release = Arc::new(AtomicBool::new(false));
    let gate = Arc::clone(&release);
    let plain = runtime
        .start(
            "plain",
            WorkItem::new(move |_out| {
                while !gate.load(Ordering::Acquire) {
                    thread::sleep(Duration::from_millis(2));
                }
                Ok(true)
            }),
        )
        .unwrap();

    assert!(runtime.stop_task(&stoppable).unwrap());
    assert_eq!(wait_for_end(&runtime, &stoppable), "stopped\n");

    assert!(!runtime.stop_task(&plain).unwrap());
    thread::sleep(Duration::from_millis(30));
    assert!(runtime.poll_status(&plain).unwrap().running);

    release.store(true, Ordering::Release);
    wait_for_end(&runtime, &plain);
    assert!(matches!(
        runtime.stop_task(&plain),
        Err(InterceptorError::TaskNotFound(_))
    ));
}
