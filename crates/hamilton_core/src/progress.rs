/// Text sink for diagnostics emitted during long sweeps.
///
/// Passed around as `Option<&dyn Progress>`; `None` discards everything.
pub trait Progress: Sync {
    fn write(&self, text: &str);
}

impl<F> Progress for F
where
    F: Fn(&str) + Sync,
{
    fn write(&self, text: &str) {
        self(text)
    }
}

pub(crate) fn report(sink: Option<&dyn Progress>, text: &str) {
    if let Some(sink) = sink {
        sink.write(text);
    }
}
