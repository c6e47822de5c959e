pub mod settings;

pub use settings::{ FoundrySettings, IdentitySettings, SettingsError };
