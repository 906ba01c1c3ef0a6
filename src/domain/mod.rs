pub mod dispatcher;
pub mod errors;
pub mod gestures;
pub mod interpreter;
pub mod labels;
pub mod models;
pub mod session;
pub mod settings;
pub mod store;
