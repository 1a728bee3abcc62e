use crate::context::{DocumentPath, RequestContext};

/// True iff the caller is authenticated and its uid equals the target document id.
///
/// Holds the same way for every operation kind; there is no public-read exception.
pub fn is_owner(context: &RequestContext, path: &DocumentPath) -> bool {
    match &context.caller_id {
        Some(caller_id) => *caller_id == path.document_id,
        None => false,
    }
}
