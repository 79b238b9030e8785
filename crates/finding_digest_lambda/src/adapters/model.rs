/// Synchronous model invocation returning the raw response body.
pub trait SummaryModel {
    fn invoke_model(&self, model_id: &str, body: &[u8]) -> Result<Vec<u8>, String>;
}
