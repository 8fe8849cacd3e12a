use crate::error::Result;
use crate::models::{PageMode, ReadingSettings, Theme};
use crate::services::store::KeyValueStore;

pub const SETTINGS_KEY: &str = "readingSettings";

pub const MIN_FONT_SIZE: f32 = 24.0;
pub const MAX_FONT_SIZE: f32 = 48.0;
pub const FONT_SIZE_STEP: f32 = 2.0;

impl ReadingSettings {
    /// Saved settings, or the defaults when none are stored or they are unreadable.
    pub fn load<S: KeyValueStore>(store: &S) -> Self {
        match store.get_json(SETTINGS_KEY) {
            Ok(settings) => settings.unwrap_or_default(),
            Err(err) => {
                tracing::warn!(error = %err, "unreadable reading settings, using defaults");
                Self::default()
            }
        }
    }

    pub fn stored<S: KeyValueStore>(store: &S) -> Option<Self> {
        store.get_json(SETTINGS_KEY).ok().flatten()
    }

    pub fn save<S: KeyValueStore>(&self, store: &mut S) -> Result<()> {
        store.set_json(SETTINGS_KEY, self)
    }

    /// One step larger, up to [`MAX_FONT_SIZE`]. Returns false at the limit.
    pub fn increase_font_size(&mut self) -> bool {
        if self.font_size < MAX_FONT_SIZE {
            self.font_size = (self.font_size + FONT_SIZE_STEP).min(MAX_FONT_SIZE);
            true
        } else {
            false
        }
    }

    /// One step smaller, down to [`MIN_FONT_SIZE`]. Returns false at the limit.
    pub fn decrease_font_size(&mut self) -> bool {
        if self.font_size > MIN_FONT_SIZE {
            self.font_size = (self.font_size - FONT_SIZE_STEP).max(MIN_FONT_SIZE);
            true
        } else {
            false
        }
    }

    pub fn set_theme(&mut self, theme: Theme) {
        let (background, text) = theme.colors();
        self.bg_theme = theme;
        self.background_color = background.to_string();
        self.text_color = text.to_string();
        self.is_night_mode = theme == Theme::Dark;
    }

    pub fn toggle_night_mode(&mut self) {
        let theme = if self.is_night_mode {
            Theme::White
        } else {
            Theme::Dark
        };
        self.set_theme(theme);
    }

    pub fn set_page_mode(&mut self, mode: PageMode) {
        self.page_mode = mode;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::store::MemoryStore;

    #[test]
    fn font_size_moves_in_steps_within_bounds() {
        let mut settings = ReadingSettings::default();
        assert_eq!(settings.font_size, 32.0);
        assert!(settings.increase_font_size());
        assert_eq!(settings.font_size, 34.0);

        while settings.increase_font_size() {}
        assert_eq!(settings.font_size, MAX_FONT_SIZE);
        while settings.decrease_font_size() {}
        assert_eq!(settings.font_size, MIN_FONT_SIZE);
        assert!(!settings.decrease_font_size());
    }

    #[test]
    fn night_mode_switches_theme_colors() {
        let mut settings = ReadingSettings::default();
        settings.toggle_night_mode();
        assert!(settings.is_night_mode);
        assert_eq!(settings.bg_theme, Theme::Dark);
        assert_eq!(settings.background_color, "#1a1a1a");

        settings.set_theme(Theme::Sepia);
        assert!(!settings.is_night_mode);
        assert_eq!(settings.text_color, "#5c4b37");
    }

    #[test]
    fn settings_persist_through_the_store() {
        let mut store = MemoryStore::new();
        assert_eq!(ReadingSettings::load(&store), ReadingSettings::default());
        assert!(ReadingSettings::stored(&store).is_none());

        let mut settings = ReadingSettings::default();
        settings.decrease_font_size();
        settings.set_page_mode(PageMode::Slide);
        settings.save(&mut store).unwrap();

        let raw = store.get(SETTINGS_KEY).unwrap().unwrap();
        assert!(raw.contains("\"fontSize\":30.0"));
        assert!(raw.contains("\"pageMode\":\"slide\""));
        assert_eq!(ReadingSettings::load(&store), settings);
    }

    #[test]
    fn partial_settings_fill_in_defaults() {
        let mut store = MemoryStore::new();
        store.set(SETTINGS_KEY, r#"{"fontSize":40}"#).unwrap();
        let settings = ReadingSettings::load(&store);
        assert_eq!(settings.font_size, 40.0);
        assert_eq!(settings.bg_theme, Theme::White);
    }
}
