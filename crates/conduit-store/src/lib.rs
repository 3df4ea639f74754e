pub mod commands;
pub mod database;
pub mod error;
pub mod messages;
pub mod row_helpers;
pub mod schema;
pub mod sessions;
pub mod settings;
pub mod transcript;

pub use commands::{CommandRepo, CommandRow};
pub use database::Database;
pub use error::StoreError;
pub use messages::{MessageRepo, MessageRow};
pub use sessions::{SessionRepo, SessionRow};
pub use settings::SettingsRepo;
pub use transcript::SqliteTranscript;
