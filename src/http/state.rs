use crate::call::CallHandle;
use crate::translate::Translator;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub call: CallHandle,
    pub translator: Translator,
}

impl AppState {
    pub fn new(call: CallHandle, translator: Translator) -> Self {
        Self { call, translator }
    }
}
