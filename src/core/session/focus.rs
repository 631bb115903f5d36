use tokio::sync::watch;

/// The conversation the user is looking at. Stream handlers read it through
/// [`FocusCell::current`] for every event, never a copy taken at stream open.
#[derive(Clone)]
pub struct FocusCell {
    tx: watch::Sender<Option<String>>,
}

impl Default for FocusCell {
    fn default() -> Self {
        Self::new()
    }
}

impl FocusCell {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    pub fn set(&self, conversation_id: Option<&str>) {
        self.tx.send_replace(conversation_id.map(str::to_string));
    }

    pub fn current(&self) -> Option<String> {
        self.tx.borrow().clone()
    }

    pub fn is_focused(&self, conversation_id: &str) -> bool {
        self.tx.borrow().as_deref() == Some(conversation_id)
    }
}
