use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, error, info};

use super::strategy::{CallError, CallStrategy};
use super::{Action, ActionCaller, ActionError, Attempt};

/// Tries candidates in order and returns the first answer.
pub struct ActionResolver {
    candidates: Vec<Box<dyn CallStrategy>>,
}

impl ActionResolver {
    pub fn new(candidates: Vec<Box<dyn CallStrategy>>) -> Self {
        Self { candidates }
    }

    /// Logs what each surface looks like. Purely informational.
    fn log_surfaces(&self, action: Action) {
        let surfaces: BTreeMap<&str, String> = self
            .candidates
            .iter()
            .map(|c| (c.name(), c.describe()))
            .collect();
        info!("[api] {action}: inspect surfaces: {surfaces:?}");
    }
}

#[async_trait]
impl ActionCaller for ActionResolver {
    async fn call(&self, action: Action, params: Value) -> Result<Value, ActionError> {
        self.log_surfaces(action);

        let mut attempts = Vec::new();
        for candidate in &self.candidates {
            if !candidate.applicable(action) {
                continue;
            }
            match candidate.invoke(action, &params).await {
                Ok(Some(value)) => {
                    info!("[api] {action} succeeded via {}", candidate.name());
                    return Ok(value);
                }
                Ok(None) => {
                    debug!("[api] {action}: {} not available", candidate.name());
                }
                Err(CallError::Rejected(failure)) => {
                    info!(
                        "[api] {action} refused via {} (retcode {}): {}",
                        candidate.name(),
                        failure.retcode,
                        failure.message
                    );
                    return Err(failure.into());
                }
                Err(CallError::Transport(reason)) => {
                    debug!("[api] {action} via {} failed: {reason}", candidate.name());
                    attempts.push(Attempt {
                        name: candidate.name().to_string(),
                        reason,
                    });
                }
            }
        }

        let err = ActionError::NoApiSurface { action, attempts };
        error!("[api] {err}");
        Err(err)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::onebot::{ApiFailure, FailureKind};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// What a scripted candidate does when invoked
    pub enum Script {
        Answer(Value),
        Absent,
        Transport(&'static str),
        Reject(FailureKind),
    }

    /// Candidate with a fixed behavior and an invocation counter.
    pub struct Scripted {
        pub name: &'static str,
        pub only: Option<Action>,
        pub script: Script,
        pub calls: Arc<AtomicUsize>,
    }

    impl Scripted {
        pub fn new(name: &'static str, script: Script) -> Self {
            Self {
                name,
                only: None,
                script,
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }

        pub fn only(mut self, action: Action) -> Self {
            self.only = Some(action);
            self
        }
    }

    #[async_trait]
    impl CallStrategy for Scripted {
        fn name(&self) -> &str {
            self.name
        }

        fn applicable(&self, action: Action) -> bool {
            self.only.map_or(true, |only| only == action)
        }

        fn describe(&self) -> String {
            "scripted".to_string()
        }

        async fn invoke(&self, _action: Action, _params: &Value) -> Result<Option<Value>, CallError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.script {
                Script::Answer(v) => Ok(Some(v.clone())),
                Script::Absent => Ok(None),
                Script::Transport(reason) => Err(CallError::Transport(reason.to_string())),
                Script::Reject(kind) => Err(CallError::Rejected(ApiFailure {
                    kind: *kind,
                    retcode: 200,
                    message: "refused".to_string(),
                })),
            }
        }
    }

    #[tokio::test]
    async fn test_first_answer_wins() {
        let first = Scripted::new("a", Script::Answer(json!({"nickname": "A"})));
        let second = Scripted::new("b", Script::Answer(json!({"nickname": "B"})));
        let second_calls = second.calls.clone();
        let resolver = ActionResolver::new(vec![Box::new(first), Box::new(second)]);

        let value = resolver
            .call(Action::GetStrangerInfo, json!({"user_id": 1}))
            .await
            .unwrap();
        assert_eq!(value["nickname"], "A");
        assert_eq!(second_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_transport_errors_fall_through() {
        let resolver = ActionResolver::new(vec![
            Box::new(Scripted::new("broken", Script::Transport("reset"))),
            Box::new(Scripted::new("absent", Script::Absent)),
            Box::new(Scripted::new("good", Script::Answer(Value::Null))),
        ]);
        let value = resolver.call(Action::SendLike, json!({})).await.unwrap();
        assert_eq!(value, Value::Null);
    }

    #[tokio::test]
    async fn test_inapplicable_candidates_skipped() {
        let dedicated = Scripted::new("dedicated", Script::Answer(json!(1))).only(Action::SendLike);
        let calls = dedicated.calls.clone();
        let resolver = ActionResolver::new(vec![Box::new(dedicated)]);

        let err = resolver
            .call(Action::GetProfileLike, json!({}))
            .await
            .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            err,
            ActionError::NoApiSurface {
                action: Action::GetProfileLike,
                attempts: vec![],
            }
        );
    }

    #[tokio::test]
    async fn test_exhaustion_reports_every_failure() {
        let a = Scripted::new("a", Script::Transport("timeout"));
        let b = Scripted::new("b", Script::Absent);
        let c = Scripted::new("c", Script::Transport("closed"));
        let counters = [a.calls.clone(), b.calls.clone(), c.calls.clone()];
        let resolver = ActionResolver::new(vec![Box::new(a), Box::new(b), Box::new(c)]);

        let err = resolver.call(Action::SendLike, json!({})).await.unwrap_err();
        for counter in &counters {
            assert_eq!(counter.load(Ordering::SeqCst), 1);
        }
        let ActionError::NoApiSurface { action, attempts } = err else {
            panic!("expected NoApiSurface");
        };
        assert_eq!(action, Action::SendLike);
        let names: Vec<&str> = attempts.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["a", "c"]);
        assert_eq!(attempts[0].reason, "timeout");
    }

    #[tokio::test]
    async fn test_rejection_is_final() {
        let reject = Scripted::new("host", Script::Reject(FailureKind::RateLimited));
        let fallback = Scripted::new("fallback", Script::Answer(json!(true)));
        let fallback_calls = fallback.calls.clone();
        let resolver = ActionResolver::new(vec![Box::new(reject), Box::new(fallback)]);

        let err = resolver.call(Action::SendLike, json!({})).await.unwrap_err();
        assert!(matches!(err, ActionError::RateLimited(_)));
        assert_eq!(fallback_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_candidate_list() {
        let resolver = ActionResolver::new(vec![]);
        assert!(matches!(
            resolver.call(Action::SendLike, json!({})).await,
            Err(ActionError::NoApiSurface { .. })
        ));
    }
}
