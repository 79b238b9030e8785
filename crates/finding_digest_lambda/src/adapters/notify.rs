/// Publishes a plaintext message to the notification topic, returning its message id.
pub trait Notifier {
    fn publish(&self, subject: &str, message: &str) -> Result<String, String>;
}
