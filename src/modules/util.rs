use std::thread;
use std::time::{Duration, Instant};

use crate::error::InterceptorError;
use crate::module::{Arguments, Module, ModuleContext, ParamKind, ParamSpec};
use crate::task::OutputSink;

const TICK: Duration = Duration::from_secs(1);
const CANCEL_POLL: Duration = Duration::from_millis(50);

/// Counts up once per second. Handy for exercising background tasks.
pub struct Count;

const PARAMS: &[ParamSpec] = &[ParamSpec::with_default(
    "seconds",
    ParamKind::Int,
    "30",
    "how long to count",
)];

impl Module for Count {
    fn name(&self) -> &'static str {
        "util.count"
    }

    fn description(&self) -> &'static str {
        "Count up once per second"
    }

    fn params(&self) -> &'static [ParamSpec] {
        PARAMS
    }

    fn stoppable(&self) -> bool {
        true
    }

    fn run(
        &self,
        ctx: &ModuleContext,
        args: &Arguments,
        out: &OutputSink,
    ) -> Result<bool, InterceptorError> {
        let seconds = args.require_int("seconds")?.max(0);
        for i in 1..=seconds {
            let deadline = Instant::now() + TICK;
            while Instant::now() < deadline {
                if ctx.is_cancelled() {
                    out.line(format_args!("Stopped counting at {}.", i - 1));
                    return Ok(false);
                }
                thread::sleep(CANCEL_POLL.min(deadline.saturating_duration_since(Instant::now())));
            }
            out.line(i);
        }
        out.line(format_args!("Finished counting to {seconds}!"));
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::testing::{self, MockNetwork};
    use crate::net::socket::MemoryLink;

    #[test]
    fn ut_counts_to_target() {
        let (ctx, _) = testing::context(MockNetwork::new(|| MemoryLink::new("mock0")));
        let (result, out) = testing::run(&Count, &ctx, &[("seconds", "1")]);
        assert!(result.unwrap());
        assert_eq!(out, "1\nFinished counting to 1!\n");
    }

    #[test]
    fn ut_cancel_stops_early() {
        let (ctx, _) = testing::context(MockNetwork::new(|| MemoryLink::new("mock0")));
        ctx.cancel.cancel();
        let (result, out) = testing::run(&Count, &ctx, &[]);
        assert!(!result.unwrap());
        assert_eq!(out, "Stopped counting at 0.\n");
    }
}
