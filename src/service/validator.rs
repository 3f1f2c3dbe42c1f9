use async_trait::async_trait;

/// One validation layer
///
/// Layers know nothing about each other; the orchestrator decides execution
/// order and join conditions.
#[async_trait]
pub trait Validator: Send + Sync {
    type Input: Send + 'static;
    type Output: Send;

    async fn validate(&self, input: Self::Input) -> Self::Output;
}
