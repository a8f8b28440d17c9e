use tokio_util::sync::CancellationToken;

use crate::error::{CoreError, CoreResult};

/// A single parent cancellation handle that propagates from the caller into
/// the pipeline context (§5). `stopExecution` cancels this handle; stages
/// check it via [`ensure_active`] before any long operation.
#[derive(Debug, Clone)]
pub struct CancellationHandle {
    token: CancellationToken,
}

impl CancellationHandle {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }
}

impl Default for CancellationHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Raised when a cancelled handle is observed at a suspension point.
/// Cancellation is never classified as a recoverable error (§5, §7).
pub fn ensure_active(handle: &CancellationHandle) -> CoreResult<()> {
    if handle.is_cancelled() {
        return Err(CoreError::Conflict("cancelled".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_token_observes_parent_cancel() {
        let parent = CancellationHandle::new();
        let child = parent.child();
        assert!(!child.is_cancelled());
        parent.cancel();
        assert!(child.is_cancelled());
        assert!(ensure_active(&child).is_err());
    }
}
