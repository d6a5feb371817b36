use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

use loom_core::{ExecutionError, ExecutionRequest, ExecutionResult};

/// Lifecycle hooks around one execution.
///
/// `before_execution` may rewrite or reject the request; `after_execution`
/// may rewrite the result. Hooks run in registration order.
#[async_trait]
pub trait ExecutionHooks: Send + Sync {
    fn name(&self) -> &str;

    async fn before_execution(
        &self,
        request: ExecutionRequest,
    ) -> Result<ExecutionRequest, ExecutionError> {
        Ok(request)
    }

    async fn after_execution(&self, result: ExecutionResult) -> ExecutionResult {
        result
    }

    /// Observes every failed attempt, including ones that will be retried.
    async fn on_error(&self, _error: &ExecutionError, _request: &ExecutionRequest) {}
}

pub type ReferenceLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

static VAULT_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{vault:([A-Za-z0-9_.\-]+)\}\}").expect("valid vault token regex")
});

/// Replaces `{{vault:name}}` tokens with resolved values before the code runs.
pub struct ReferenceInliner {
    lookup: ReferenceLookup,
}

impl ReferenceInliner {
    pub fn new(lookup: ReferenceLookup) -> Self {
        Self { lookup }
    }

    pub fn from_map(values: HashMap<String, String>) -> Self {
        Self::new(Arc::new(move |name: &str| values.get(name).cloned()))
    }
}

#[async_trait]
impl ExecutionHooks for ReferenceInliner {
    fn name(&self) -> &str {
        "reference_inliner"
    }

    async fn before_execution(
        &self,
        mut request: ExecutionRequest,
    ) -> Result<ExecutionRequest, ExecutionError> {
        let source = std::mem::take(&mut request.code);
        let mut code = String::with_capacity(source.len());
        let mut last = 0;
        for caps in VAULT_TOKEN.captures_iter(&source) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let reference = format!("vault:{}", name.as_str());
            let value = (self.lookup)(name.as_str())
                .ok_or_else(|| ExecutionError::UnresolvedReference(reference.clone()))?;
            code.push_str(&source[last..whole.start()]);
            code.push_str(&value);
            last = whole.end();

            if !request.references.contains(&reference) {
                request.references.push(reference);
            }
        }
        if last == 0 {
            request.code = source;
            return Ok(request);
        }
        code.push_str(&source[last..]);
        debug!(references = request.references.len(), "inlined vault references");
        request.code = code;
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inliner() -> ReferenceInliner {
        ReferenceInliner::from_map(HashMap::from([
            ("api.base".to_string(), "https://example.test".to_string()),
            ("token".to_string(), "abc123".to_string()),
        ]))
    }

    #[tokio::test]
    async fn replaces_tokens_and_records_references() {
        let request = ExecutionRequest::new(
            "curl {{vault:api.base}}/items -H 'auth: {{vault:token}}' {{vault:token}}",
        );
        let out = inliner().before_execution(request).await.unwrap();
        assert_eq!(
            out.code,
            "curl https://example.test/items -H 'auth: abc123' abc123"
        );
        assert_eq!(out.references, vec!["vault:api.base", "vault:token"]);
    }

    #[tokio::test]
    async fn untouched_without_tokens() {
        let request = ExecutionRequest::new("echo {{not-a-token}}");
        let out = inliner().before_execution(request.clone()).await.unwrap();
        assert_eq!(out, request);
    }

    #[tokio::test]
    async fn unresolved_reference_fails() {
        let err = inliner()
            .before_execution(ExecutionRequest::new("echo {{vault:missing}}"))
            .await
            .unwrap_err();
        assert_eq!(err, ExecutionError::UnresolvedReference("vault:missing".into()));
        assert!(err.is_reference_error());
    }

    struct Noop;

    #[async_trait]
    impl ExecutionHooks for Noop {
        fn name(&self) -> &str {
            "noop"
        }
    }

    #[tokio::test]
    async fn defaults_pass_through() {
        let request = ExecutionRequest::new("true").with_references(vec!["r".into()]);
        let out = Noop.before_execution(request.clone()).await.unwrap();
        assert_eq!(out, request);
    }
}
