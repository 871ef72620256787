pub mod cache;
pub mod config;
pub mod domain;
pub mod error;
pub mod fs_util;
pub mod key;
pub mod layout;
pub mod output;
pub mod processor;
pub mod request;
pub mod source;
