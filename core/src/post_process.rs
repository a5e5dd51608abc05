//! Post-processing hooks run after a response has been mapped.

use serde_json::Value;
use thiserror::Error;

use crate::descriptor::RequestDescriptor;

#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct PostProcessError(pub String);

impl PostProcessError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Cross-cutting transform over every successfully mapped response.
///
/// Processors run in registration order; each receives the previous one's
/// output. An error aborts the operation with
/// `RestError::PostProcessingFailed`.
pub trait PostProcessor: Send + Sync {
    fn post_process(
        &self,
        object: Value,
        descriptor: &RequestDescriptor,
    ) -> Result<Value, PostProcessError>;
}

pub(crate) fn run_chain(
    processors: &[std::sync::Arc<dyn PostProcessor>],
    mut object: Value,
    descriptor: &RequestDescriptor,
) -> Result<Value, PostProcessError> {
    for processor in processors {
        object = processor.post_process(object, descriptor)?;
    }
    Ok(object)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::http::HttpMethod;

    struct Stamp(&'static str);

    impl PostProcessor for Stamp {
        fn post_process(&self, mut object: Value, _: &RequestDescriptor) -> Result<Value, PostProcessError> {
            if let Some(trail) = object.get_mut("trail").and_then(Value::as_array_mut) {
                trail.push(json!(self.0));
            }
            Ok(object)
        }
    }

    struct Reject;

    impl PostProcessor for Reject {
        fn post_process(&self, _: Value, _: &RequestDescriptor) -> Result<Value, PostProcessError> {
            Err(PostProcessError::new("rejected"))
        }
    }

    #[test]
    fn processors_run_in_registration_order() {
        let chain: Vec<Arc<dyn PostProcessor>> = vec![Arc::new(Stamp("a")), Arc::new(Stamp("b"))];
        let out = run_chain(&chain, json!({"trail": []}), &RequestDescriptor::new(HttpMethod::Get, "/x")).unwrap();
        assert_eq!(out, json!({"trail": ["a", "b"]}));
    }

    #[test]
    fn first_failure_stops_the_chain() {
        let chain: Vec<Arc<dyn PostProcessor>> = vec![Arc::new(Reject), Arc::new(Stamp("never"))];
        let err = run_chain(&chain, json!({"trail": []}), &RequestDescriptor::new(HttpMethod::Get, "/x")).unwrap_err();
        assert_eq!(err.to_string(), "rejected");
    }
}
