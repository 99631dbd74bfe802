pub mod command;
pub mod cron;
pub mod format;
pub mod locker;
