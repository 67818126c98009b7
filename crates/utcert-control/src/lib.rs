pub mod auth;
pub mod certificate_queries;
pub mod certificates;
pub mod config;
pub mod contacts;
pub mod dashboard;
pub mod error;
pub mod import;
pub mod paging;
pub mod render;
pub mod request_meta;
pub mod routes;
pub mod security;
pub mod sessions;
pub mod state;
pub mod storage;
pub mod users;

#[cfg(test)]
pub(crate) mod testing;
