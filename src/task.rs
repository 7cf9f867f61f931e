// Background task runtime.
//
// Each task runs one work item on its own named worker thread. Output flows
// through a per-task channel and is drained by pollers; a task leaves the
// live set the first time a poll observes it finished.

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, unbounded};
use serde::Serialize;

use crate::error::InterceptorError;

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// Shared cooperative stop flag. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

// ---------------------------------------------------------------------------
// Output sink
// ---------------------------------------------------------------------------

/// Writer handle given to a work item. Text is delivered to pollers in
/// write order.
#[derive(Debug, Clone)]
pub struct OutputSink {
    tx: Sender<String>,
}

impl OutputSink {
    /// A sink and the receiving end of its buffer.
    pub fn channel() -> (Self, Receiver<String>) {
        let (tx, rx) = unbounded();
        (Self { tx }, rx)
    }

    pub fn write(&self, text: impl Into<String>) {
        // A dropped receiver means nobody polls this task anymore.
        let _ = self.tx.send(text.into());
    }

    pub fn line(&self, text: impl fmt::Display) {
        self.write(format!("{text}\n"));
    }
}

impl fmt::Write for OutputSink {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.write(s);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Work items
// ---------------------------------------------------------------------------

/// Whether a work item can be asked to stop.
#[derive(Debug, Clone)]
pub enum Capability {
    Plain,
    Stoppable(CancelToken),
}

type WorkFn = Box<dyn FnOnce(OutputSink) -> Result<bool, InterceptorError> + Send>;

/// A unit of work: a closure that writes to the sink and reports success.
pub struct WorkItem {
    run: WorkFn,
    capability: Capability,
}

impl WorkItem {
    pub fn new<F>(run: F) -> Self
    where
        F: FnOnce(OutputSink) -> Result<bool, InterceptorError> + Send + 'static,
    {
        Self {
            run: Box::new(run),
            capability: Capability::Plain,
        }
    }

    /// A work item that honours `token`.
    pub fn stoppable<F>(token: CancelToken, run: F) -> Self
    where
        F: FnOnce(OutputSink) -> Result<bool, InterceptorError> + Send + 'static,
    {
        Self {
            run: Box::new(run),
            capability: Capability::Stoppable(token),
        }
    }

    pub fn capability(&self) -> &Capability {
        &self.capability
    }
}

// ---------------------------------------------------------------------------
// Runtime
// ---------------------------------------------------------------------------

/// Result of polling a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskStatus {
    pub running: bool,
    pub output: String,
}

struct Task {
    handle: Option<JoinHandle<()>>,
    running: Arc<AtomicBool>,
    output: Receiver<String>,
    capability: Capability,
}

#[derive(Default)]
pub struct TaskRuntime {
    tasks: Mutex<HashMap<String, Task>>,
}

impl TaskRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    fn tasks(&self) -> MutexGuard<'_, HashMap<String, Task>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start `item` on a worker thread. Returns the task's unique name,
    /// which is `name` or `name_N` if `name` is taken.
    pub fn start(&self, name: &str, item: WorkItem) -> Result<String, InterceptorError> {
        let mut tasks = self.tasks();

        let mut unique = name.to_string();
        let mut suffix = 1;
        while tasks.contains_key(&unique) {
            unique = format!("{name}_{suffix}");
            suffix += 1;
        }

        let (sink, output) = OutputSink::channel();
        let running = Arc::new(AtomicBool::new(true));
        let WorkItem { run, capability } = item;

        let flag = Arc::clone(&running);
        let task_name = unique.clone();
        let handle = thread::Builder::new()
            .name(format!("task-{unique}"))
            .spawn(move || {
                let result = panic::catch_unwind(AssertUnwindSafe(|| run(sink.clone())));
                match result {
                    Ok(Ok(success)) => {
                        log::info!("task {task_name} finished (success={success})");
                    }
                    Ok(Err(e)) => {
                        log::warn!("task {task_name} failed: {e}");
                        sink.line(format_args!("error: {e}"));
                    }
                    Err(payload) => {
                        let msg = panic_message(payload.as_ref());
                        log::error!("task {task_name} panicked: {msg}");
                        sink.line(format_args!("error: task panicked: {msg}"));
                    }
                }
                // Output written above happens-before a poller seeing false.
                flag.store(false, Ordering::Release);
            })
            .map_err(|e| InterceptorError::Fatal(format!("spawn task {unique}: {e}")))?;

        log::info!("task {unique} started");
        tasks.insert(
            unique.clone(),
            Task {
                handle: Some(handle),
                running,
                output,
                capability,
            },
        );
        Ok(unique)
    }

    /// Drain output produced since the last poll. A finished task is
    /// removed once this has reported `running == false`.
    pub fn poll_status(&self, name: &str) -> Result<TaskStatus, InterceptorError> {
        let mut tasks = self.tasks();
        let task = tasks
            .get(name)
            .ok_or_else(|| InterceptorError::TaskNotFound(name.to_string()))?;

        let running = task.running.load(Ordering::Acquire);
        let output: String = task.output.try_iter().collect();

        if !running {
            if let Some(mut task) = tasks.remove(name) {
                if let Some(handle) = task.handle.take() {
                    let _ = handle.join();
                }
            }
            log::debug!("task {name} reaped");
        }

        Ok(TaskStatus { running, output })
    }

    /// Request a cooperative stop. Returns false if the task has no stop
    /// hook; the worker is never killed.
    pub fn stop_task(&self, name: &str) -> Result<bool, InterceptorError> {
        let tasks = self.tasks();
        let task = tasks
            .get(name)
            .ok_or_else(|| InterceptorError::TaskNotFound(name.to_string()))?;
        match &task.capability {
            Capability::Stoppable(token) => {
                log::info!("stop requested for task {name}");
                token.cancel();
                Ok(true)
            }
            Capability::Plain => {
                log::debug!("task {name} is not stoppable");
                Ok(false)
            }
        }
    }

    pub fn list_tasks(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tasks().keys().cloned().collect();
        names.sort();
        names
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn wait_finished(rt: &TaskRuntime, name: &str) -> String {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut out = String::new();
        loop {
            let status = rt.poll_status(name).unwrap();
            out.push_str(&status.output);
            if !status.running {
                return out;
            }
            assert!(Instant::now() < deadline, "task {name} did not finish");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn ut_cancel_token_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn ut_output_in_write_order() {
        let rt = TaskRuntime::new();
        let name = rt
            .start(
                "count",
                WorkItem::new(|out| {
                    for i in 0..5 {
                        out.line(i);
                    }
                    Ok(true)
                }),
            )
            .unwrap();
        assert_eq!(wait_finished(&rt, &name), "0\n1\n2\n3\n4\n");
    }

    #[test]
    fn ut_error_and_panic_reported_in_output() {
        let rt = TaskRuntime::new();
        let failing = rt
            .start(
                "fail",
                WorkItem::new(|_| Err(InterceptorError::Fatal("boom".into()))),
            )
            .unwrap();
        assert!(wait_finished(&rt, &failing).contains("error: boom"));

        let panicking = rt
            .start("panic", WorkItem::new(|_| panic!("kaput")))
            .unwrap();
        assert!(wait_finished(&rt, &panicking).contains("kaput"));
    }

    #[test]
    fn ut_stop_plain_task_is_noop() {
        let rt = TaskRuntime::new();
        let name = rt.start("plain", WorkItem::new(|_| Ok(true))).unwrap();
        let stopped = rt.stop_task(&name).unwrap();
        assert!(!stopped);
        wait_finished(&rt, &name);
        assert!(matches!(
            rt.stop_task(&name),
            Err(InterceptorError::TaskNotFound(_))
        ));
    }
}
