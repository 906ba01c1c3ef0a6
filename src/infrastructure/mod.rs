pub mod bluetooth;
pub mod feed;
pub mod logging;
pub mod storage;
