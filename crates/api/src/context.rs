use jobflow_core::CorrelationId;

/// Correlation context for a request.
///
/// Inserted by the correlation middleware on every request, so handlers can
/// always extract it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationContext {
    correlation_id: CorrelationId,
}

impl CorrelationContext {
    pub fn new(correlation_id: CorrelationId) -> Self {
        Self { correlation_id }
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }
}
