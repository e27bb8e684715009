/// Receives the cumulative decoded suffix once per generated token.
///
/// Called synchronously from the decode loop, so implementations must not
/// block for long.
pub trait TokenSink {
    fn on_token(&mut self, text: &str);
}

impl<F: FnMut(&str)> TokenSink for F {
    fn on_token(&mut self, text: &str) {
        self(text)
    }
}
