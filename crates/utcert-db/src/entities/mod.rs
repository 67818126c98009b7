pub mod certificates;
pub mod contacts;
pub mod refresh_tokens;
pub mod sequences;
pub mod users;
