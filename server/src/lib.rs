pub mod api;
pub mod auth;
pub mod candidates;
pub mod comments;
pub mod config;
pub mod db;
pub mod error;
pub mod files;
pub mod housekeeping;
pub mod images;
pub mod landing;
pub mod model;
pub mod posts;
pub mod reconcile;
pub mod scanner;
pub mod users;
