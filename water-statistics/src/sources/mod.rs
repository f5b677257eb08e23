pub mod delta_csv_file;
pub mod delta_ndjson_file;
pub mod remote_api;

pub use delta_csv_file::DeltaCsvFileSource;
pub use delta_ndjson_file::DeltaNdjsonFileSource;
pub use remote_api::{RemoteApiSource, Session, SessionProvider, StaticCookieSession};
