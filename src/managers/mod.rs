pub mod backup;
pub mod catalog;
pub mod logging;
pub mod notification;
pub mod restore;
pub mod retention;
pub mod scheduler;
