pub mod preferences;

pub use preferences::{
    BuildPreferences, EditorPreferences, Preferences, PreferencesError, PreferencesStore,
    UiPreferences,
};
