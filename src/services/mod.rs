pub mod cache;
pub mod fetch;
pub mod library;
pub mod normalizer;
pub mod pagination;
pub mod reader;
pub mod scanner;
pub mod segmenter;
pub mod session;
pub mod settings;
pub mod store;
