//! Request id assignment.

use uuid::Uuid;

use crate::chain::{Handler, Middleware};
use crate::envelope::ToolRequest;

/// Gives every request a request id.
///
/// Requests whose context already has one keep it. Others get a random
/// UUID v4, which downstream log lines then carry.
#[derive(Debug, Clone, Default)]
pub struct RequestId;

impl Middleware for RequestId {
    fn name(&self) -> &str {
        "request_id"
    }

    fn process(&self, next: Handler) -> Handler {
        Handler::new(move |mut request: ToolRequest| {
            if request.context.request_id().is_none() {
                request.context = request
                    .context
                    .clone()
                    .with_request_id(Uuid::new_v4().to_string());
            }
            next.call(request)
        })
    }
}
