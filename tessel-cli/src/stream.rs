use std::io::Write;

use tracing::warn;

use tessel_core::TokenSink;

/// Prints cumulative decode updates as deltas.
///
/// The decoder hands over the whole generated suffix every step; only the
/// part not yet written is printed. Trailing U+FFFD is held back until the
/// rest of a multi-byte character arrives. If the tokenizer rewrites earlier
/// text the new suffix is printed on a fresh line.
pub struct WriterSink<W: Write> {
    out: W,
    printed: String,
}

impl<W: Write> WriterSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            printed: String::new(),
        }
    }

    pub fn printed(&self) -> &str {
        &self.printed
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_delta(&mut self, text: &str) -> std::io::Result<()> {
        match text.strip_prefix(self.printed.as_str()) {
            Some(delta) => self.out.write_all(delta.as_bytes())?,
            None => {
                self.out.write_all(b"\n")?;
                self.out.write_all(text.as_bytes())?;
            }
        }
        self.out.flush()
    }

    /// Writes whatever of `text` is still held back, including a trailing
    /// replacement character the generation ended on.
    pub fn finish(&mut self, text: &str) {
        self.emit(text);
    }

    fn emit(&mut self, text: &str) {
        if let Err(e) = self.write_delta(text) {
            warn!(error = %e, "failed to write generated text");
        }
        self.printed.clear();
        self.printed.push_str(text);
    }
}

impl<W: Write> TokenSink for WriterSink<W> {
    fn on_token(&mut self, text: &str) {
        self.emit(text.trim_end_matches(char::REPLACEMENT_CHARACTER));
    }
}
