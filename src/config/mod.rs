pub mod settings;

pub use settings::IpcSettings;
