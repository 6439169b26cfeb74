/// Recommended error type for your scenario `main` function and your protocol handlers. Handlers
/// return this type, so you can use `?` to propagate errors.
pub type LoadTestResult<T> = anyhow::Result<T>;
