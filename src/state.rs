use crate::report::ReportSettings;
use crate::source::RowSource;
use std::sync::Arc;
use std::time::Instant;

/// Shared state handed to every request handler.
pub struct AppState {
    settings: ReportSettings,
    source: Arc<dyn RowSource>,
    started_at: Instant,
}

impl AppState {
    pub fn new(settings: ReportSettings, source: Arc<dyn RowSource>) -> Self {
        Self {
            settings,
            source,
            started_at: Instant::now(),
        }
    }

    pub fn settings(&self) -> &ReportSettings {
        &self.settings
    }

    pub fn source(&self) -> &dyn RowSource {
        self.source.as_ref()
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemoryRowSource;

    #[test]
    fn exposes_source_and_settings() {
        let state = AppState::new(ReportSettings::default(), Arc::new(MemoryRowSource::new()));
        assert_eq!(state.source().kind(), "memory");
        assert_eq!(state.settings().price_column, "price");
    }
}
