use std::sync::Mutex;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ClipboardError {
    #[error("clipboard unavailable: {0}")]
    Unavailable(#[from] arboard::Error),
    #[error("clipboard lock poisoned")]
    Poisoned,
}

pub trait Clipboard {
    /// Makes `text` the system clipboard contents before returning.
    fn set_text(&self, text: &str) -> Result<(), ClipboardError>;
}

impl<T: Clipboard + ?Sized> Clipboard for &T {
    fn set_text(&self, text: &str) -> Result<(), ClipboardError> {
        (**self).set_text(text)
    }
}

/// Writes straight to the platform clipboard.
///
/// The handle is opened on first use and kept for the life of the host: on
/// X11 and Wayland the owning process has to stay around to serve the
/// contents.
#[derive(Default)]
pub struct SystemClipboard {
    inner: Mutex<Option<arboard::Clipboard>>,
}

impl SystemClipboard {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clipboard for SystemClipboard {
    fn set_text(&self, text: &str) -> Result<(), ClipboardError> {
        let mut guard = self.inner.lock().map_err(|_| ClipboardError::Poisoned)?;
        let clipboard = match guard.take() {
            Some(clipboard) => clipboard,
            None => arboard::Clipboard::new()?,
        };
        let clipboard = guard.insert(clipboard);
        clipboard.set_text(text)?;
        debug!(chars = text.chars().count(), "copied text to clipboard");
        Ok(())
    }
}
