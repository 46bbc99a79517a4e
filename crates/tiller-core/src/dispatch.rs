//! Tool dispatch for one turn.
//!
//! Calls are checked against the permission gate in emission order.
//! Concurrency-safe tools overlap; any other tool waits for in-flight work
//! and runs alone. Results land in per-call slots so the returned messages
//! always follow call order, whatever order executions finish in.

use crate::message::{Message, ToolCall};
use crate::permission::{
    semantic_subject, ApprovalAction, ConfirmCallback, ConfirmRequest, Decision, PermissionGate,
};
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use tiller_tools::{ToolContext, ToolRegistry, ToolResult};
use tokio_util::sync::CancellationToken;

/// Observer fired once per finished tool call, in completion order.
pub type ToolDoneCallback = Arc<dyn Fn(&ToolCall, &ToolResult) + Send + Sync>;

pub(crate) const CANCELLED_RESULT: &str = "cancelled before execution";

enum Authorization {
    Granted,
    Denied(ToolResult),
    Cancelled,
}

pub(crate) struct Dispatcher<'a> {
    pub tools: &'a ToolRegistry,
    pub gate: &'a PermissionGate,
    pub confirm: Option<&'a ConfirmCallback>,
    pub on_tool_done: Option<&'a ToolDoneCallback>,
    pub ctx: &'a ToolContext,
    pub cancel: &'a CancellationToken,
}

impl Dispatcher<'_> {
    /// Run `calls` and return one tool message per call, in call order.
    ///
    /// Once cancellation is observed nothing new starts; executions already
    /// started are awaited, and calls that never ran get an error result.
    pub async fn dispatch(&self, calls: &[ToolCall]) -> Vec<Message> {
        let mut slots: Vec<Option<ToolResult>> = vec![None; calls.len()];
        let mut in_flight = FuturesUnordered::new();

        for (idx, call) in calls.iter().enumerate() {
            if self.cancel.is_cancelled() {
                break;
            }

            if !self.tools.has(&call.name) {
                tracing::debug!(tool = %call.name, "model requested unknown tool");
                let result = ToolResult::error(format!("Unknown tool: {}", call.name));
                self.finish(&mut slots, idx, call, result);
                continue;
            }

            let args = call.arguments();
            // Safe calls already queued keep running while a confirmation is pending.
            let authorization = {
                let pending = self.authorize(call, &args);
                tokio::pin!(pending);
                loop {
                    tokio::select! {
                        biased;
                        Some((done, result)) = in_flight.next(), if !in_flight.is_empty() => {
                            self.finish(&mut slots, done, &calls[done], result);
                        }
                        authorization = &mut pending => break authorization,
                    }
                }
            };
            match authorization {
                Authorization::Granted => {}
                Authorization::Denied(result) => {
                    self.finish(&mut slots, idx, call, result);
                    continue;
                }
                Authorization::Cancelled => break,
            }

            if self.tools.is_concurrency_safe(&call.name) {
                in_flight.push(self.execute(idx, call, args));
                continue;
            }

            while let Some((done, result)) = in_flight.next().await {
                self.finish(&mut slots, done, &calls[done], result);
            }
            if self.cancel.is_cancelled() {
                break;
            }
            let (done, result) = self.execute(idx, call, args).await;
            self.finish(&mut slots, done, call, result);
        }

        while let Some((done, result)) = in_flight.next().await {
            self.finish(&mut slots, done, &calls[done], result);
        }

        calls
            .iter()
            .zip(slots)
            .map(|(call, slot)| {
                let result = slot.unwrap_or_else(|| ToolResult::error(CANCELLED_RESULT));
                Message::tool_result_with_metadata(
                    call.id.clone(),
                    result.output,
                    result.is_error,
                    result.metadata,
                )
            })
            .collect()
    }

    async fn authorize(&self, call: &ToolCall, args: &serde_json::Value) -> Authorization {
        match self.gate.check(&call.name, args) {
            Decision::Permit => Authorization::Granted,
            Decision::Reject => Authorization::Denied(denied(&call.name)),
            Decision::Prompt => {
                let Some(confirm) = self.confirm else {
                    tracing::warn!(
                        tool = %call.name,
                        "confirmation required but no handler is attached; rejecting"
                    );
                    return Authorization::Denied(denied(&call.name));
                };

                let subject = semantic_subject(&call.name, args);
                let request = ConfirmRequest {
                    tool: call.name.clone(),
                    params: args.clone(),
                    diff_context: (subject != "*" && !subject.is_empty()).then_some(subject),
                };

                let action = tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return Authorization::Cancelled,
                    action = confirm(request) => action,
                };

                match action {
                    ApprovalAction::AllowOnce => Authorization::Granted,
                    ApprovalAction::AllowAlways => {
                        self.gate.remember(&call.name, args);
                        Authorization::Granted
                    }
                    ApprovalAction::Deny => Authorization::Denied(ToolResult::error(format!(
                        "permission denied: user declined '{}'",
                        call.name
                    ))),
                }
            }
        }
    }

    async fn execute(
        &self,
        idx: usize,
        call: &ToolCall,
        args: serde_json::Value,
    ) -> (usize, ToolResult) {
        // Queued futures are lazy; cancellation may land before the first poll.
        if self.cancel.is_cancelled() {
            return (idx, ToolResult::error(CANCELLED_RESULT));
        }
        tracing::debug!(tool = %call.name, id = %call.id, "executing tool");
        let result = self.tools.execute(&call.name, args, self.ctx).await;
        (idx, result)
    }

    fn finish(
        &self,
        slots: &mut [Option<ToolResult>],
        idx: usize,
        call: &ToolCall,
        result: ToolResult,
    ) {
        if let Some(cb) = self.on_tool_done {
            cb(call, &result);
        }
        slots[idx] = Some(result);
    }
}

fn denied(tool: &str) -> ToolResult {
    ToolResult::error(format!("permission denied: '{tool}' is not allowed"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ContentBlock;
    use crate::permission::{ApprovalCache, PermissionPolicy, PermissionRule, RuleSet};
    use async_trait::async_trait;
    use futures::future::BoxFuture;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tiller_tools::{Tool, ToolError};

    /// Sleeps for `delay_ms` from its arguments, then echoes its tag.
    struct SleepTool {
        name: &'static str,
        safe: bool,
        calls: Arc<AtomicUsize>,
        active: Arc<AtomicUsize>,
        max_active: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Tool for SleepTool {
        fn name(&self) -> &str {
            self.name
        }
        fn label(&self) -> &str {
            "Sleep"
        }
        fn description(&self) -> &str {
            "sleeps"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }
        fn is_concurrency_safe(&self) -> bool {
            self.safe
        }
        async fn execute(
            &self,
            args: serde_json::Value,
            ctx: &ToolContext,
        ) -> Result<ToolResult, ToolError> {
            assert!(!ctx.cancel.is_cancelled(), "tool started after cancellation");
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
            let delay = args["delay_ms"].as_u64().unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(ToolResult::success(format!(
                "{} done",
                args["tag"].as_str().unwrap_or("?")
            )))
        }
    }

    struct Harness {
        tools: ToolRegistry,
        calls: Arc<AtomicUsize>,
        max_active: Arc<AtomicUsize>,
    }

    fn harness() -> Harness {
        let calls = Arc::new(AtomicUsize::new(0));
        let active = Arc::new(AtomicUsize::new(0));
        let max_active = Arc::new(AtomicUsize::new(0));
        let mut tools = ToolRegistry::new();
        for (name, safe) in [("slow_read", true), ("write_thing", false)] {
            tools.register(Arc::new(SleepTool {
                name,
                safe,
                calls: calls.clone(),
                active: active.clone(),
                max_active: max_active.clone(),
            }));
        }
        Harness {
            tools,
            calls,
            max_active,
        }
    }

    fn call(id: &str, name: &str, tag: &str, delay_ms: u64) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            name: name.to_string(),
            input: serde_json::json!({"tag": tag, "delay_ms": delay_ms}).to_string(),
        }
    }

    fn outputs(messages: &[Message]) -> Vec<(String, String, bool)> {
        messages
            .iter()
            .map(|m| match &m.content[0] {
                ContentBlock::ToolResult {
                    tool_call_id,
                    content,
                    is_error,
                    ..
                } => (tool_call_id.clone(), content.clone(), *is_error),
                other => panic!("unexpected block {other:?}"),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_results_follow_call_order() {
        let h = harness();
        let gate = PermissionGate::permit_all();
        let ctx = ToolContext::default();
        let cancel = CancellationToken::new();
        let completion_order = Arc::new(Mutex::new(Vec::new()));
        let order = completion_order.clone();
        let on_done: ToolDoneCallback = Arc::new(move |call: &ToolCall, _: &ToolResult| {
            order.lock().unwrap().push(call.id.clone());
        });

        let calls = vec![
            call("c1", "slow_read", "first", 80),
            call("c2", "slow_read", "second", 10),
            call("c3", "slow_read", "third", 40),
        ];
        let messages = Dispatcher {
            tools: &h.tools,
            gate: &gate,
            confirm: None,
            on_tool_done: Some(&on_done),
            ctx: &ctx,
            cancel: &cancel,
        }
        .dispatch(&calls)
        .await;

        let got = outputs(&messages);
        assert_eq!(got.len(), 3);
        for (i, (id, _, is_error)) in got.iter().enumerate() {
            assert_eq!(id, &calls[i].id);
            assert!(!is_error);
        }
        assert_eq!(got[0].1, "first done");
        assert_eq!(*completion_order.lock().unwrap(), vec!["c2", "c3", "c1"]);
        assert!(h.max_active.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_unsafe_tool_runs_alone() {
        let h = harness();
        let gate = PermissionGate::permit_all();
        let ctx = ToolContext::default();
        let cancel = CancellationToken::new();

        let calls = vec![
            call("c1", "slow_read", "a", 30),
            call("c2", "write_thing", "b", 30),
            call("c3", "slow_read", "c", 30),
        ];
        let messages = Dispatcher {
            tools: &h.tools,
            gate: &gate,
            confirm: None,
            on_tool_done: None,
            ctx: &ctx,
            cancel: &cancel,
        }
        .dispatch(&calls)
        .await;

        assert_eq!(messages.len(), 3);
        assert_eq!(h.max_active.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_tool_never_reaches_registry() {
        let h = harness();
        let gate = PermissionGate::permit_all();
        let ctx = ToolContext::default();
        let cancel = CancellationToken::new();

        let calls = vec![
            call("c1", "MyTool", "x", 0),
            call("c2", "slow_read", "y", 0),
        ];
        let messages = Dispatcher {
            tools: &h.tools,
            gate: &gate,
            confirm: None,
            on_tool_done: None,
            ctx: &ctx,
            cancel: &cancel,
        }
        .dispatch(&calls)
        .await;

        let got = outputs(&messages);
        assert!(got[0].2);
        assert!(got[0].1.contains("MyTool"));
        assert!(!got[1].2);
        assert_eq!(h.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_prompt_without_handler_is_rejected() {
        let h = harness();
        let gate = PermissionGate::default();
        let ctx = ToolContext::default();
        let cancel = CancellationToken::new();

        let messages = Dispatcher {
            tools: &h.tools,
            gate: &gate,
            confirm: None,
            on_tool_done: None,
            ctx: &ctx,
            cancel: &cancel,
        }
        .dispatch(&[call("c1", "write_thing", "x", 0)])
        .await;

        let got = outputs(&messages);
        assert!(got[0].2);
        assert!(got[0].1.contains("permission denied"));
        assert_eq!(h.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_confirmation_answers() {
        let h = harness();
        let gate = PermissionGate::new(
            PermissionPolicy::Rules(RuleSet::new(
                vec![PermissionRule::deny("write_thing", "*")],
                Decision::Prompt,
            )),
            ApprovalCache::new(),
        );
        let ctx = ToolContext::default();
        let cancel = CancellationToken::new();
        let asked = Arc::new(AtomicUsize::new(0));
        let counter = asked.clone();
        let confirm: ConfirmCallback = Arc::new(
            move |request: ConfirmRequest| -> BoxFuture<'static, ApprovalAction> {
                counter.fetch_add(1, Ordering::SeqCst);
                let answer = if request.params["tag"] == "no" {
                    ApprovalAction::Deny
                } else {
                    ApprovalAction::AllowAlways
                };
                Box::pin(async move { answer })
            },
        );

        let calls = vec![
            call("c1", "slow_read", "no", 0),
            call("c2", "slow_read", "yes", 0),
            call("c3", "slow_read", "again", 0),
            call("c4", "write_thing", "denied", 0),
        ];
        let messages = Dispatcher {
            tools: &h.tools,
            gate: &gate,
            confirm: Some(&confirm),
            on_tool_done: None,
            ctx: &ctx,
            cancel: &cancel,
        }
        .dispatch(&calls)
        .await;

        let got = outputs(&messages);
        assert!(got[0].2);
        assert!(!got[1].2);
        assert!(!got[2].2);
        assert!(got[3].2);
        // The AllowAlways answer for c2 covers c3; the deny rule never prompts.
        assert_eq!(asked.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancel_drains_started_and_skips_rest() {
        let h = harness();
        let gate = PermissionGate::new(PermissionPolicy::default(), ApprovalCache::new());
        let cancel = CancellationToken::new();
        let ctx = ToolContext {
            cancel: cancel.clone(),
            ..Default::default()
        };
        let trigger = cancel.clone();
        let confirm: ConfirmCallback = Arc::new(
            move |_: ConfirmRequest| -> BoxFuture<'static, ApprovalAction> {
                trigger.cancel();
                Box::pin(futures::future::pending())
            },
        );
        gate.approvals().insert("slow_read", "*");

        let calls = vec![
            call("c1", "slow_read", "started", 30),
            call("c2", "write_thing", "waits", 0),
            call("c3", "slow_read", "never", 0),
        ];
        let messages = Dispatcher {
            tools: &h.tools,
            gate: &gate,
            confirm: Some(&confirm),
            on_tool_done: None,
            ctx: &ctx,
            cancel: &cancel,
        }
        .dispatch(&calls)
        .await;

        let got = outputs(&messages);
        assert_eq!(got.len(), 3);
        assert_eq!(got[0].1, "started done");
        assert_eq!(got[1].1, CANCELLED_RESULT);
        assert_eq!(got[2].1, CANCELLED_RESULT);
        assert_eq!(h.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_safe_calls_run_during_confirmation() {
        let h = harness();
        let gate = PermissionGate::new(PermissionPolicy::default(), ApprovalCache::new());
        gate.approvals().insert("slow_read", "*");
        let ctx = ToolContext::default();
        let cancel = CancellationToken::new();
        let events = Arc::new(Mutex::new(Vec::new()));

        let log = events.clone();
        let on_done: ToolDoneCallback = Arc::new(move |call: &ToolCall, _: &ToolResult| {
            log.lock().unwrap().push(call.id.clone());
        });
        let log = events.clone();
        let confirm: ConfirmCallback = Arc::new(
            move |_: ConfirmRequest| -> BoxFuture<'static, ApprovalAction> {
                let log = log.clone();
                Box::pin(async move {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    log.lock().unwrap().push("answered".to_string());
                    ApprovalAction::AllowOnce
                })
            },
        );

        let calls = vec![
            call("c1", "slow_read", "early", 10),
            call("c2", "write_thing", "gated", 0),
        ];
        let messages = Dispatcher {
            tools: &h.tools,
            gate: &gate,
            confirm: Some(&confirm),
            on_tool_done: Some(&on_done),
            ctx: &ctx,
            cancel: &cancel,
        }
        .dispatch(&calls)
        .await;

        let got = outputs(&messages);
        assert_eq!(got[0].1, "early done");
        assert_eq!(got[1].1, "gated done");
        assert_eq!(*events.lock().unwrap(), vec!["c1", "answered", "c2"]);
    }

    #[tokio::test]
    async fn test_queued_call_skipped_once_cancelled() {
        let h = harness();
        let gate = PermissionGate::permit_all();
        let cancel = CancellationToken::new();
        let ctx = ToolContext {
            cancel: cancel.clone(),
            ..Default::default()
        };
        let dispatcher = Dispatcher {
            tools: &h.tools,
            gate: &gate,
            confirm: None,
            on_tool_done: None,
            ctx: &ctx,
            cancel: &cancel,
        };

        let queued = call("c1", "slow_read", "late", 0);
        let pending = dispatcher.execute(0, &queued, queued.arguments());
        cancel.cancel();
        let (idx, result) = pending.await;

        assert_eq!(idx, 0);
        assert!(result.is_error);
        assert_eq!(result.output, CANCELLED_RESULT);
        assert_eq!(h.calls.load(Ordering::SeqCst), 0);
    }
}
